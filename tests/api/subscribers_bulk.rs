use list_ingest::domain::NewList;
use list_ingest::domain::OptIn;
use list_ingest::domain::SubscriberStatus;
use serde_json::json;

use crate::helpers::envelope;
use crate::helpers::spawn_app;

#[tokio::test]
async fn bulk_items_succeed_or_fail_independently() {
    let app = spawn_app().await;
    let list = app.list(NewList {
        opt_in: OptIn::Single,
        ..NewList::default()
    });
    app.existing_subscriber(&list, "taken@foo.com", SubscriberStatus::Confirmed)
        .await;

    let resp = app
        .post_bulk(
            &list.list_uid,
            &json!({"subscribers": [
                {"EMAIL": "first@foo.com"},
                {"EMAIL": "not-an-email"},
                {"EMAIL": "taken@foo.com"},
                "not even an object",
                {"EMAIL": "second@foo.com"},
            ]}),
        )
        .await;

    assert_eq!(resp.status().as_u16(), 201);
    let body = envelope(resp).await;
    assert_eq!(body["status"], "success");
    let records = body["data"]["records"].as_array().unwrap();
    assert_eq!(records.len(), 5);

    let statuses: Vec<_> = records
        .iter()
        .map(|r| r["status"].as_str().unwrap())
        .collect();
    assert_eq!(statuses, ["success", "error", "error", "error", "success"]);
    assert_eq!(records[0]["data"]["record"]["email"], "first@foo.com");
    assert_eq!(records[4]["data"]["record"]["email"], "second@foo.com");
    assert_eq!(
        records[2]["error"],
        "The subscriber already exists in this list."
    );

    assert_eq!(app.store.subscribers_of(list.list_id).len(), 3);
}

#[tokio::test]
async fn same_email_twice_in_one_batch_is_a_duplicate() {
    let app = spawn_app().await;
    let list = app.list(NewList::default());

    let resp = app
        .post_bulk(
            &list.list_uid,
            &json!({"subscribers": [{"EMAIL": "john@foo.com"}, {"EMAIL": "john@foo.com"}]}),
        )
        .await;

    assert_eq!(resp.status().as_u16(), 201);
    let records = envelope(resp).await["data"]["records"].clone();
    assert_eq!(records[0]["status"], "success");
    assert_eq!(records[1]["status"], "error");
    assert_eq!(app.store.subscribers_of(list.list_id).len(), 1);
}

#[tokio::test]
async fn empty_or_oversized_batch_is_422() {
    let app = spawn_app().await;
    let list = app.list(NewList::default());
    let oversized: Vec<_> = (0..10_001)
        .map(|i| json!({ "EMAIL": format!("user{i}@foo.com") }))
        .collect();

    for (body, msg) in [
        (json!({"subscribers": []}), "empty batch"),
        (json!({}), "no subscribers key"),
        (json!({ "subscribers": oversized }), "over the item limit"),
    ] {
        let resp = app.post_bulk(&list.list_uid, &body).await;
        assert_eq!(resp.status().as_u16(), 422, "{msg}");
        assert_eq!(envelope(resp).await["status"], "error", "{msg}");
    }
    assert!(app.store.subscribers_of(list.list_id).is_empty());
}
