use secrecy::Secret;

pub type ServerId = i64;

/// A set of sending credentials. `customer_id == None` marks a system server,
/// shared by every customer that has no usable server of its own.
#[derive(Debug, Clone)]
pub struct DeliveryServer {
    pub server_id: ServerId,
    pub customer_id: Option<i64>,
    pub name: String,
    /// Root of the http sending api
    pub base_url: String,
    pub token: Secret<String>,
    pub from_email: String,
    /// Relative selection weight, 1..=100
    pub probability: u32,
    pub active: bool,
}

impl DeliveryServer {
    pub fn is_usable_by(
        &self,
        customer_id: i64,
    ) -> bool {
        self.active && self.customer_id.map_or(true, |owner| owner == customer_id)
    }
}
