use actix_web::http::StatusCode;
use actix_web::web;
use actix_web::HttpResponse;
use serde::Deserialize;
use serde_json::json;
use serde_json::Value;

use super::ingest_error_body;
use super::load_list;
use super::record;
use super::ApiError;
use crate::domain::Customer;
use crate::ingestion::IngestionService;
use crate::ingestion::SubscriberPayload;
use crate::store::Store;
use crate::utils::success;

/// `POST /lists/{list_uid}/subscribers`
///
/// ```sh
///     curl -H 'X-Api-Key: ...' -H 'Content-Type: application/json' \
///         -d '{"EMAIL": "john@foo.com", "FNAME": "John", "details": {"ip_address": "1.2.3.4"}}' \
///         http://127.0.0.1:8000/lists/ab123cd456efg/subscribers
/// ```
#[tracing::instrument(
    name = "Adding new subscriber",
    skip(body, customer, store, service),
    fields(customer_id = customer.customer_id)
)]
pub async fn create_subscriber(
    path: web::Path<String>,
    body: web::Json<SubscriberPayload>,
    customer: web::ReqData<Customer>,
    store: web::Data<Store>,
    service: web::Data<IngestionService>,
) -> Result<HttpResponse, ApiError> {
    let list = load_list(&store, &customer, &path).await?;
    let created = service.create(&customer, &list, &body).await?;
    Ok(success(
        StatusCode::CREATED,
        json!({ "record": record(&created.subscriber, &created.values) }),
    ))
}

#[derive(Deserialize)]
pub struct BulkPayload {
    /// Items are parsed one by one, so a malformed item only fails itself
    #[serde(default)]
    subscribers: Vec<Value>,
}

/// `POST /lists/{list_uid}/subscribers/bulk`
///
/// 201 whatever happened to the individual items; `records[i]` is the
/// outcome of `subscribers[i]`.
#[tracing::instrument(
    name = "Adding subscribers in bulk",
    skip(body, customer, store, service),
    fields(customer_id = customer.customer_id)
)]
pub async fn create_subscribers_bulk(
    path: web::Path<String>,
    body: web::Json<BulkPayload>,
    customer: web::ReqData<Customer>,
    store: web::Data<Store>,
    service: web::Data<IngestionService>,
) -> Result<HttpResponse, ApiError> {
    let list = load_list(&store, &customer, &path).await?;
    let items = body.into_inner().subscribers;
    let outcomes = service.create_bulk(&customer, &list, items).await?;

    let records: Vec<Value> = outcomes
        .iter()
        .map(|outcome| match outcome {
            Ok(created) => json!({
                "status": "success",
                "data": { "record": record(&created.subscriber, &created.values) },
            }),
            Err(e) => json!({
                "status": "error",
                "error": ingest_error_body(e),
            }),
        })
        .collect();
    let admitted = outcomes.iter().filter(|o| o.is_ok()).count();
    tracing::info!(admitted, rejected = outcomes.len() - admitted, "bulk request done");

    Ok(success(StatusCode::CREATED, json!({ "records": records })))
}
