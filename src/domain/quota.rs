/// Ceiling value meaning "no limit"
pub const UNLIMITED: i64 = -1;

/// Subscriber ceilings of a customer. Counts are never persisted; they are
/// recomputed from the subscriber rows on every admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    /// Not consulted by ingestion; lists are created elsewhere
    pub max_lists: i64,
    /// Across all of the customer's lists
    pub max_subscribers: i64,
    pub max_subscribers_per_list: i64,
}

impl Default for Quota {
    fn default() -> Self {
        Self {
            max_lists: UNLIMITED,
            max_subscribers: UNLIMITED,
            max_subscribers_per_list: UNLIMITED,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allow,
    DenyTotal,
    DenyPerList,
}

/// Advisory check run before a subscriber row is written. It has no side
/// effects, so callers wanting a hard guarantee must hold the ingestion lock
/// between the count queries and the write.
pub struct QuotaGate;

impl QuotaGate {
    pub fn admit(
        customer_total: i64,
        max_total: i64,
        list_total: i64,
        max_per_list: i64,
    ) -> Admission {
        if reached(customer_total, max_total) {
            Admission::DenyTotal
        } else if reached(list_total, max_per_list) {
            Admission::DenyPerList
        } else {
            Admission::Allow
        }
    }

    pub fn admit_quota(
        quota: &Quota,
        customer_total: i64,
        list_total: i64,
    ) -> Admission {
        Self::admit(
            customer_total,
            quota.max_subscribers,
            list_total,
            quota.max_subscribers_per_list,
        )
    }
}

fn reached(
    count: i64,
    max: i64,
) -> bool {
    max != UNLIMITED && count >= max
}
