use super::Subscriber;
use super::SubscriberStatus;

/// What to do with a submission, given the row already holding the same
/// (list, email), if any
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Insert,
    /// Resubscribe: the existing row is reused
    UpdateInPlace(Subscriber),
    Reject,
}

pub struct DuplicateEmailResolver;

impl DuplicateEmailResolver {
    /// Only unsubscribed rows can be re-entered; every other status keeps the
    /// address out of the list.
    pub fn resolve(existing: Option<&Subscriber>) -> Resolution {
        match existing {
            None => Resolution::Insert,
            Some(s) if s.status == SubscriberStatus::Unsubscribed => {
                Resolution::UpdateInPlace(s.clone())
            }
            Some(_) => Resolution::Reject,
        }
    }
}
