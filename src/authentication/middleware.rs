use actix_web::body::MessageBody;
use actix_web::dev::ServiceRequest;
use actix_web::dev::ServiceResponse;
use actix_web::web::Data;
use actix_web::HttpMessage;
use actix_web_lab::middleware::Next;

use crate::routes::ApiError;
use crate::store::Store;

pub const API_KEY_HEADER: &str = "X-Api-Key";

/// Resolve the `X-Api-Key` header to a `Customer`, which is inserted into the
/// request extensions for handlers to extract with `web::ReqData<Customer>`.
/// A missing or unknown key ends the request with 401.
///
/// For more details, refer to the documentation for
/// `actix_web_lab::middleware::from_fn`
pub async fn reject_unknown_api_keys(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, actix_web::Error> {
    let api_key = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string);
    let Some(api_key) = api_key else {
        return Err(ApiError::Unauthorized.into());
    };

    let store = req
        .app_data::<Data<Store>>()
        .ok_or_else(|| ApiError::Unexpected(anyhow::anyhow!("no store in app data")))?
        .clone();
    let customer = store
        .customer_by_api_key(&api_key)
        .await
        .map_err(ApiError::from)?;

    match customer {
        Some(customer) => {
            req.extensions_mut().insert(customer);
            next.call(req).await
        }
        None => Err(ApiError::Unauthorized.into()),
    }
}
