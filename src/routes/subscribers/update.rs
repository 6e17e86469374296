use actix_web::http::StatusCode;
use actix_web::web;
use actix_web::HttpResponse;
use serde_json::json;

use super::load_list;
use super::parse_uid;
use super::record;
use super::ApiError;
use crate::domain::Customer;
use crate::ingestion::IngestionService;
use crate::ingestion::SubscriberPayload;
use crate::store::Store;
use crate::utils::success;

/// `PUT /lists/{list_uid}/subscribers/{subscriber_uid}`
///
/// Tags missing from the body keep their values; send a tag with `null` or
/// `""` to clear an optional field.
#[tracing::instrument(name = "Updating subscriber", skip(body, customer, store, service))]
pub async fn update_subscriber(
    path: web::Path<(String, String)>,
    body: web::Json<SubscriberPayload>,
    customer: web::ReqData<Customer>,
    store: web::Data<Store>,
    service: web::Data<IngestionService>,
) -> Result<HttpResponse, ApiError> {
    let (list_uid, subscriber_uid) = path.into_inner();
    let list = load_list(&store, &customer, &list_uid).await?;
    let (subscriber, values) = service
        .update(&customer, &list, parse_uid(&subscriber_uid)?, &body)
        .await?;
    Ok(success(
        StatusCode::OK,
        json!({ "record": record(&subscriber, &values) }),
    ))
}

/// `PUT /lists/{list_uid}/subscribers/{subscriber_uid}/unsubscribe`
#[tracing::instrument(name = "Unsubscribing subscriber", skip(customer, store, service))]
pub async fn unsubscribe_subscriber(
    path: web::Path<(String, String)>,
    customer: web::ReqData<Customer>,
    store: web::Data<Store>,
    service: web::Data<IngestionService>,
) -> Result<HttpResponse, ApiError> {
    let (list_uid, subscriber_uid) = path.into_inner();
    let list = load_list(&store, &customer, &list_uid).await?;
    let subscriber = service
        .unsubscribe(&list, parse_uid(&subscriber_uid)?)
        .await?;
    let values = store.field_values(subscriber.subscriber_id).await?;
    Ok(success(
        StatusCode::OK,
        json!({ "record": record(&subscriber, &values) }),
    ))
}

/// `DELETE /lists/{list_uid}/subscribers/{subscriber_uid}`
#[tracing::instrument(name = "Deleting subscriber", skip(customer, store, service))]
pub async fn delete_subscriber(
    path: web::Path<(String, String)>,
    customer: web::ReqData<Customer>,
    store: web::Data<Store>,
    service: web::Data<IngestionService>,
) -> Result<HttpResponse, ApiError> {
    let (list_uid, subscriber_uid) = path.into_inner();
    let list = load_list(&store, &customer, &list_uid).await?;
    service.delete(&list, parse_uid(&subscriber_uid)?).await?;
    Ok(success(StatusCode::OK, json!({})))
}
