use actix_web::http::StatusCode;
use actix_web::web;
use actix_web::HttpResponse;
use serde::Deserialize;
use serde_json::json;

use super::load_list;
use super::record;
use super::ApiError;
use crate::domain::Customer;
use crate::ingestion::IngestError;
use crate::store::Store;
use crate::utils::success;

#[derive(Deserialize)]
pub struct EmailQuery {
    #[serde(rename = "EMAIL")]
    email: Option<String>,
}

impl EmailQuery {
    fn email(&self) -> Result<&str, IngestError> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| {
                IngestError::Validation("Please provide the subscriber email address.".to_string())
            })
    }
}

/// `GET /lists/{list_uid}/subscribers/search-by-email?EMAIL=john@foo.com`
#[tracing::instrument(name = "Searching subscriber by email", skip(query, customer, store))]
pub async fn search_by_email(
    path: web::Path<String>,
    query: web::Query<EmailQuery>,
    customer: web::ReqData<Customer>,
    store: web::Data<Store>,
) -> Result<HttpResponse, ApiError> {
    let list = load_list(&store, &customer, &path).await?;
    let subscriber = store
        .find_by_email(list.list_id, query.email()?)
        .await?
        .ok_or(IngestError::SubscriberNotFound)?;
    let values = store.field_values(subscriber.subscriber_id).await?;
    Ok(success(
        StatusCode::OK,
        json!({ "record": record(&subscriber, &values) }),
    ))
}

/// `GET /lists/subscribers/search-by-email-in-all-lists?EMAIL=john@foo.com`
///
/// Every list of the caller holding the address; none found is an empty
/// result, not an error.
#[tracing::instrument(name = "Searching subscriber in all lists", skip(query, customer, store))]
pub async fn search_by_email_in_all_lists(
    query: web::Query<EmailQuery>,
    customer: web::ReqData<Customer>,
    store: web::Data<Store>,
) -> Result<HttpResponse, ApiError> {
    let email = query.email()?;
    let mut records = vec![];
    for list in store.lists_of_customer(customer.customer_id).await? {
        if let Some(subscriber) = store.find_by_email(list.list_id, email).await? {
            records.push(json!({
                "subscriber_uid": subscriber.subscriber_uid,
                "email": subscriber.email,
                "status": subscriber.status,
                "source": subscriber.source,
                "date_added": subscriber.date_added.format("%Y-%m-%d %H:%M:%S").to_string(),
                "list": {
                    "list_uid": list.list_uid,
                    "name": list.name,
                },
            }));
        }
    }
    Ok(success(
        StatusCode::OK,
        json!({ "count": records.len(), "records": records }),
    ))
}
