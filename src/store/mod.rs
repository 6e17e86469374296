//! Persistence seam. Handlers and the ingestion pipeline only see
//! `SubscriberStore`; `PostgresStore` backs the server, `InMemoryStore` backs
//! the tests.

mod memory;
mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::BlacklistEntry;
use crate::domain::CustomFieldDefinition;
use crate::domain::Customer;
use crate::domain::DeliveryServer;
use crate::domain::FieldValues;
use crate::domain::MailList;
use crate::domain::NewSubscriber;
use crate::domain::Subscriber;
use crate::domain::SubscriberId;
use crate::utils::error_chain_fmt;
pub use memory::CustomerMessage;
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

/// Shared handle, stored in the app data
pub type Store = Arc<dyn SubscriberStore>;

#[derive(thiserror::Error)]
pub enum StoreError {
    /// Unique (list, email) violated; a concurrent writer won
    #[error("A subscriber with this email already exists in the list")]
    Duplicate,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl std::fmt::Debug for StoreError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

#[async_trait]
pub trait SubscriberStore: Send + Sync {
    async fn customer_by_api_key(
        &self,
        api_key: &str,
    ) -> Result<Option<Customer>, StoreError>;

    /// Only lists owned by `customer_id` are visible
    async fn list_by_uid(
        &self,
        customer_id: i64,
        list_uid: &str,
    ) -> Result<Option<MailList>, StoreError>;

    /// Any customer's list; only for links followed by subscribers themselves
    async fn list_by_public_uid(
        &self,
        list_uid: &str,
    ) -> Result<Option<MailList>, StoreError>;

    async fn lists_of_customer(
        &self,
        customer_id: i64,
    ) -> Result<Vec<MailList>, StoreError>;

    /// Ordered by `sort_order`, then id
    async fn list_fields(
        &self,
        list_id: i64,
    ) -> Result<Vec<CustomFieldDefinition>, StoreError>;

    async fn count_customer_subscribers(
        &self,
        customer_id: i64,
    ) -> Result<i64, StoreError>;

    async fn count_list_subscribers(
        &self,
        list_id: i64,
    ) -> Result<i64, StoreError>;

    async fn find_by_email(
        &self,
        list_id: i64,
        email: &str,
    ) -> Result<Option<Subscriber>, StoreError>;

    async fn find_by_uid(
        &self,
        list_id: i64,
        subscriber_uid: Uuid,
    ) -> Result<Option<Subscriber>, StoreError>;

    /// Fails with `StoreError::Duplicate` if (list, email) is taken
    async fn insert_subscriber(
        &self,
        new_subscriber: &NewSubscriber,
    ) -> Result<Subscriber, StoreError>;

    /// Persist email, status, source and ip of an existing row; bumps
    /// `last_updated`
    async fn update_subscriber(
        &self,
        subscriber: &Subscriber,
    ) -> Result<Subscriber, StoreError>;

    /// Field values go with the row
    async fn delete_subscriber(
        &self,
        subscriber_id: SubscriberId,
    ) -> Result<(), StoreError>;

    /// `insert_subscriber` and the row's field values, in one transaction.
    /// Only the tags present in `values` are replaced; tags unknown to the
    /// list are ignored.
    async fn insert_with_values(
        &self,
        new_subscriber: &NewSubscriber,
        values: &FieldValues,
    ) -> Result<Subscriber, StoreError>;

    /// `update_subscriber` and the row's field values, in one transaction
    async fn update_with_values(
        &self,
        subscriber: &Subscriber,
        values: &FieldValues,
    ) -> Result<Subscriber, StoreError>;

    async fn field_values(
        &self,
        subscriber_id: SubscriberId,
    ) -> Result<FieldValues, StoreError>;

    /// Oldest first
    async fn page_subscribers(
        &self,
        list_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Subscriber>, StoreError>;

    /// Global entries plus the customer's own
    async fn blacklist_entries(
        &self,
        customer_id: i64,
    ) -> Result<Vec<BlacklistEntry>, StoreError>;

    /// Servers the customer may send through: its own and the system ones
    async fn delivery_servers(
        &self,
        customer_id: i64,
    ) -> Result<Vec<DeliveryServer>, StoreError>;

    /// Customer-facing notification
    async fn add_customer_message(
        &self,
        customer_id: i64,
        title: &str,
        message: &str,
    ) -> Result<(), StoreError>;
}
