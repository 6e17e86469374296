use super::Quota;

/// Owner of lists, delivery servers and blacklist entries. API requests are
/// attributed to a customer through its api key.
#[derive(Debug, Clone, PartialEq)]
pub struct Customer {
    pub customer_id: i64,
    pub api_key: String,
    pub quota: Quota,
}
