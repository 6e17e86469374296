use list_ingest::domain::NewList;
use list_ingest::domain::SubscriberStatus;

use crate::helpers::envelope;
use crate::helpers::spawn_app;

#[tokio::test]
async fn search_by_email_finds_subscriber() {
    let app = spawn_app().await;
    let list = app.list(NewList::default());
    let subscriber = app
        .existing_subscriber(&list, "john@foo.com", SubscriberStatus::Confirmed)
        .await;

    let resp = app.search_by_email(&list.list_uid, "john@foo.com").await;

    assert_eq!(resp.status().as_u16(), 200);
    let record = envelope(resp).await["data"]["record"].clone();
    assert_eq!(record["subscriber_uid"], subscriber.subscriber_uid.to_string());
    assert_eq!(record["status"], "confirmed");
}

#[tokio::test]
async fn search_by_email_misses() {
    let app = spawn_app().await;
    let list = app.list(NewList::default());

    let resp = app.search_by_email(&list.list_uid, "john@foo.com").await;
    assert_eq!(resp.status().as_u16(), 404);

    let resp = app.search_by_email(&list.list_uid, "").await;
    assert_eq!(resp.status().as_u16(), 422);
    assert_eq!(
        envelope(resp).await["error"],
        "Please provide the subscriber email address."
    );
}

#[tokio::test]
async fn search_in_all_lists_only_covers_own_lists() {
    let app = spawn_app().await;
    let news = app.list(NewList {
        name: "News".to_string(),
        ..NewList::default()
    });
    let offers = app.list(NewList {
        name: "Offers".to_string(),
        ..NewList::default()
    });
    app.list(NewList::default());
    app.existing_subscriber(&news, "john@foo.com", SubscriberStatus::Confirmed)
        .await;
    app.existing_subscriber(&offers, "john@foo.com", SubscriberStatus::Unsubscribed)
        .await;

    let other = app
        .store
        .insert_customer("other-key", list_ingest::domain::Quota::default());
    let foreign = app.store.insert_list(other.customer_id, NewList::default());
    app.existing_subscriber(&foreign, "john@foo.com", SubscriberStatus::Confirmed)
        .await;

    let resp = app.search_in_all_lists("john@foo.com").await;

    assert_eq!(resp.status().as_u16(), 200);
    let data = envelope(resp).await["data"].clone();
    assert_eq!(data["count"], 2);
    let mut names: Vec<_> = data["records"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["list"]["name"].as_str().unwrap().to_string())
        .collect();
    names.sort();
    assert_eq!(names, ["News", "Offers"]);

    let resp = app.search_in_all_lists("nobody@foo.com").await;
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(envelope(resp).await["data"]["count"], 0);
}
