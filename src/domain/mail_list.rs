use std::fmt::Display;
use std::str::FromStr;

/// Single opt-in confirms immediately; double opt-in waits for the
/// subscriber to follow the confirmation link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptIn {
    Single,
    Double,
}

impl OptIn {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Double => "double",
        }
    }
}

impl Display for OptIn {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptIn {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(Self::Single),
            "double" => Ok(Self::Double),
            other => Err(format!("{other:?} is not a valid opt-in mode")),
        }
    }
}

/// A subscriber list, owned by a customer
#[derive(Debug, Clone, PartialEq)]
pub struct MailList {
    pub list_id: i64,
    pub list_uid: String,
    pub customer_id: i64,
    pub name: String,
    pub opt_in: OptIn,
    pub requires_approval: bool,
    pub welcome_email: bool,
    pub from_name: String,
    pub from_email: String,
    /// Receive approval requests and "new subscriber" notices
    pub notification_recipients: Vec<String>,
    pub notify_on_subscribe: bool,
}

/// List settings before the store assigns ids
#[derive(Debug, Clone)]
pub struct NewList {
    pub name: String,
    pub opt_in: OptIn,
    pub requires_approval: bool,
    pub welcome_email: bool,
    pub from_name: String,
    pub from_email: String,
    pub notification_recipients: Vec<String>,
    pub notify_on_subscribe: bool,
}

impl Default for NewList {
    fn default() -> Self {
        Self {
            name: "Newsletter".to_string(),
            opt_in: OptIn::Double,
            requires_approval: false,
            welcome_email: false,
            from_name: "Newsletter".to_string(),
            from_email: "newsletter@example.com".to_string(),
            notification_recipients: vec![],
            notify_on_subscribe: false,
        }
    }
}
