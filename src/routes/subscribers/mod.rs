mod confirm;
mod create;
mod get;
mod search;
mod update;
pub use confirm::*;
pub use create::*;
pub use get::*;
pub use search::*;
pub use update::*;

use actix_web::http::StatusCode;
use actix_web::web;
use actix_web::HttpResponse;
use actix_web::ResponseError;
use serde_json::json;
use serde_json::Map;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::Customer;
use crate::domain::FieldValues;
use crate::domain::MailList;
use crate::domain::Subscriber;
use crate::ingestion::IngestError;
use crate::store::Store;
use crate::store::StoreError;
use crate::utils::error_chain_fmt;
use crate::utils::failure;

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Everything a handler of this api can fail with. Rendered as
/// `{"status": "error", "error": ..}`.
#[derive(thiserror::Error)]
pub enum ApiError {
    #[error("You are not allowed to access this resource without a valid api key.")]
    Unauthorized,
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl std::fmt::Debug for ApiError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self { ApiError::Ingest(e.into()) }
}

pub fn ingest_status(e: &IngestError) -> StatusCode {
    match e {
        IngestError::Validation(_) | IngestError::FieldErrors(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        IngestError::ListNotFound
        | IngestError::SubscriberNotFound
        | IngestError::MissingFields => StatusCode::NOT_FOUND,
        IngestError::Duplicate
        | IngestError::QuotaTotal
        | IngestError::QuotaPerList
        | IngestError::Blacklisted
        | IngestError::LockBusy => StatusCode::CONFLICT,
        IngestError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// The `error` member of an envelope: per-tag messages for field errors, a
/// single message otherwise. Internal causes are not exposed.
pub fn ingest_error_body(e: &IngestError) -> Value {
    match e {
        IngestError::FieldErrors(errors) => json!(errors),
        IngestError::Unexpected(_) => json!("An unexpected error occurred."),
        e => json!(e.to_string()),
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Ingest(e) => ingest_status(e),
            Self::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            Self::Ingest(e) => ingest_error_body(e),
            Self::Unexpected(_) => json!("An unexpected error occurred."),
            e => json!(e.to_string()),
        };
        failure(self.status_code(), body)
    }
}

/// Flat view of a subscriber: its field values keyed by tag (a single value
/// unwrapped), plus the row's own attributes.
pub fn record(
    subscriber: &Subscriber,
    values: &FieldValues,
) -> Value {
    let mut record = Map::new();
    for (tag, tag_values) in values {
        let value = match tag_values.as_slice() {
            [single] => json!(single),
            many => json!(many),
        };
        record.insert(tag.clone(), value);
    }
    record.insert("subscriber_uid".into(), json!(subscriber.subscriber_uid));
    record.insert("email".into(), json!(subscriber.email));
    record.insert("status".into(), json!(subscriber.status));
    record.insert("source".into(), json!(subscriber.source));
    record.insert("ip_address".into(), json!(subscriber.ip_address));
    record.insert(
        "date_added".into(),
        json!(subscriber.date_added.format(DATE_FORMAT).to_string()),
    );
    record.insert(
        "last_updated".into(),
        json!(subscriber.last_updated.format(DATE_FORMAT).to_string()),
    );
    Value::Object(record)
}

/// A list of `customer`'s, or 404
async fn load_list(
    store: &Store,
    customer: &Customer,
    list_uid: &str,
) -> Result<MailList, ApiError> {
    store
        .list_by_uid(customer.customer_id, list_uid)
        .await?
        .ok_or(ApiError::Ingest(IngestError::ListNotFound))
}

/// A malformed uid cannot name any subscriber
fn parse_uid(subscriber_uid: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(subscriber_uid).map_err(|_| ApiError::Ingest(IngestError::SubscriberNotFound))
}

/// Fallback of a resource, for any verb it does not route
pub fn wrong_method(allowed: &'static str) -> actix_web::Route {
    web::to(move || async move {
        failure(
            StatusCode::BAD_REQUEST,
            format!("Only {allowed} requests allowed for this endpoint."),
        )
    })
}
