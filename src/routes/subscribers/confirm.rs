use actix_web::http::StatusCode;
use actix_web::web;
use actix_web::HttpResponse;
use serde_json::json;

use super::parse_uid;
use super::record;
use super::ApiError;
use crate::ingestion::IngestError;
use crate::ingestion::IngestionService;
use crate::store::Store;
use crate::utils::success;

/// `GET /lists/{list_uid}/confirm-subscribe/{subscriber_uid}`
///
/// Followed by the subscriber from the confirmation email, so no api key is
/// asked for.
#[tracing::instrument(name = "Confirming pending subscriber", skip(store, service))]
pub async fn confirm_subscriber(
    path: web::Path<(String, String)>,
    store: web::Data<Store>,
    service: web::Data<IngestionService>,
) -> Result<HttpResponse, ApiError> {
    let (list_uid, subscriber_uid) = path.into_inner();
    let list = store
        .list_by_public_uid(&list_uid)
        .await?
        .ok_or(IngestError::ListNotFound)?;
    let subscriber = service
        .confirm(&list, parse_uid(&subscriber_uid)?)
        .await?;
    let values = store.field_values(subscriber.subscriber_id).await?;
    Ok(success(
        StatusCode::OK,
        json!({ "record": record(&subscriber, &values) }),
    ))
}
