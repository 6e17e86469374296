use actix_web::http::StatusCode;
use actix_web::web;
use actix_web::HttpResponse;
use serde::Deserialize;
use serde_json::json;

use super::load_list;
use super::parse_uid;
use super::record;
use super::ApiError;
use crate::domain::Customer;
use crate::ingestion::IngestError;
use crate::store::Store;
use crate::utils::success;

const MIN_PER_PAGE: i64 = 10;
const MAX_PER_PAGE: i64 = 50;
/// Past this, `offset` would overflow; such a page is simply empty
const MAX_PAGE: i64 = i64::MAX / MAX_PER_PAGE;

/// Kept as strings: a malformed number falls back to the default rather than
/// failing the request
#[derive(Deserialize)]
pub struct PageQuery {
    page: Option<String>,
    per_page: Option<String>,
}

#[derive(Debug, PartialEq)]
struct Page {
    page: i64,
    per_page: i64,
}

impl Page {
    fn from_query(query: &PageQuery) -> Self {
        let parse = |v: &Option<String>| v.as_deref().and_then(|s| s.trim().parse::<i64>().ok());
        Self {
            page: parse(&query.page).unwrap_or(1).clamp(1, MAX_PAGE),
            per_page: parse(&query.per_page)
                .unwrap_or(MIN_PER_PAGE)
                .clamp(MIN_PER_PAGE, MAX_PER_PAGE),
        }
    }

    fn offset(&self) -> i64 { (self.page - 1) * self.per_page }

    fn total_pages(
        &self,
        count: i64,
    ) -> i64 {
        (count + self.per_page - 1) / self.per_page
    }
}

/// `GET /lists/{list_uid}/subscribers?page=1&per_page=10`
#[tracing::instrument(name = "Listing subscribers", skip(query, customer, store))]
pub async fn list_subscribers(
    path: web::Path<String>,
    query: web::Query<PageQuery>,
    customer: web::ReqData<Customer>,
    store: web::Data<Store>,
) -> Result<HttpResponse, ApiError> {
    let list = load_list(&store, &customer, &path).await?;
    let page = Page::from_query(&query);

    let count = store.count_list_subscribers(list.list_id).await?;
    let total_pages = page.total_pages(count);
    let subscribers = store
        .page_subscribers(list.list_id, page.offset(), page.per_page)
        .await?;
    let mut records = Vec::with_capacity(subscribers.len());
    for subscriber in &subscribers {
        let values = store.field_values(subscriber.subscriber_id).await?;
        records.push(record(subscriber, &values));
    }

    Ok(success(
        StatusCode::OK,
        json!({
            "count": count,
            "total_pages": total_pages,
            "current_page": page.page,
            "next_page": (page.page < total_pages).then_some(page.page + 1),
            "prev_page": (page.page > 1).then_some(page.page - 1),
            "records": records,
        }),
    ))
}

/// `GET /lists/{list_uid}/subscribers/{subscriber_uid}`
#[tracing::instrument(name = "Fetching subscriber", skip(customer, store))]
pub async fn get_subscriber(
    path: web::Path<(String, String)>,
    customer: web::ReqData<Customer>,
    store: web::Data<Store>,
) -> Result<HttpResponse, ApiError> {
    let (list_uid, subscriber_uid) = path.into_inner();
    let list = load_list(&store, &customer, &list_uid).await?;
    let subscriber = store
        .find_by_uid(list.list_id, parse_uid(&subscriber_uid)?)
        .await?
        .ok_or(IngestError::SubscriberNotFound)?;
    let values = store.field_values(subscriber.subscriber_id).await?;
    Ok(success(
        StatusCode::OK,
        json!({ "record": record(&subscriber, &values) }),
    ))
}
