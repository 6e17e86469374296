use std::fmt::Display;

use validator::ValidateEmail;

/// A syntactically valid email address. Used for subscribers, list
/// notification recipients and senders alike.
///
/// Surrounding whitespace is dropped and the address is lower-cased: a list
/// holds an address once, however it was capitalised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberEmail(String);

impl SubscriberEmail {
    pub fn parse(email: String) -> Result<Self, String> {
        let email = email.trim().to_lowercase();
        ValidateEmail::validate_email(&email)
            .then_some(Self(email.clone()))
            .ok_or(format!("{email:?} is not a valid email address."))
    }
}

impl AsRef<str> for SubscriberEmail {
    fn as_ref(&self) -> &str { &self.0 }
}

impl Display for SubscriberEmail {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
