use list_ingest::domain::BlacklistEntry;
use list_ingest::domain::BlacklistScope;
use list_ingest::domain::NewField;
use list_ingest::domain::NewList;
use list_ingest::domain::OptIn;
use list_ingest::domain::Quota;
use list_ingest::domain::SubscriberStatus;
use serde_json::json;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::Mock;
use wiremock::ResponseTemplate;

use crate::helpers::envelope;
use crate::helpers::spawn_app;
use crate::helpers::spawn_app_with_quota;

#[tokio::test]
async fn create_on_double_opt_in_list_sends_confirmation() {
    let app = spawn_app().await;
    let list = app.list(NewList::default());
    app.delivery_server("primary");

    Mock::given(path("/primary/email"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&app.email_server)
        .await;

    let resp = app
        .post_subscriber(&list.list_uid, &json!({"EMAIL": "john@foo.com"}))
        .await;

    assert_eq!(resp.status().as_u16(), 201);
    let body = envelope(resp).await;
    assert_eq!(body["status"], "success");
    let record = &body["data"]["record"];
    assert!(!record["subscriber_uid"].as_str().unwrap().is_empty());
    assert_eq!(record["email"], "john@foo.com");
    assert_eq!(record["status"], "unconfirmed");
    assert_eq!(record["source"], "api");

    let stored = app.store.subscribers_of(list.list_id);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, SubscriberStatus::Unconfirmed);
    assert_eq!(stored[0].subscriber_uid.to_string(), record["subscriber_uid"]);
}

#[tokio::test]
async fn create_on_single_opt_in_list_is_confirmed() {
    let app = spawn_app().await;
    let list = app.list(NewList {
        opt_in: OptIn::Single,
        ..NewList::default()
    });
    app.delivery_server("primary");

    // no welcome email configured: nothing is sent
    Mock::given(path("/primary/email"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&app.email_server)
        .await;

    let resp = app
        .post_subscriber(
            &list.list_uid,
            &json!({"EMAIL": "john@foo.com", "details": {"ip_address": "10.0.0.1", "source": "import"}}),
        )
        .await;

    assert_eq!(resp.status().as_u16(), 201);
    let record = envelope(resp).await["data"]["record"].clone();
    assert_eq!(record["status"], "confirmed");
    assert_eq!(record["ip_address"], "10.0.0.1");
    assert_eq!(record["source"], "import");
}

#[tokio::test]
async fn resubmitted_unsubscribed_email_reuses_row() {
    let app = spawn_app().await;
    let list = app.list(NewList::default());
    let existing = app
        .existing_subscriber(&list, "john@foo.com", SubscriberStatus::Unsubscribed)
        .await;

    let resp = app
        .post_subscriber(&list.list_uid, &json!({"EMAIL": "john@foo.com"}))
        .await;

    assert_eq!(resp.status().as_u16(), 201);
    let record = envelope(resp).await["data"]["record"].clone();
    assert_eq!(record["subscriber_uid"], existing.subscriber_uid.to_string());
    assert_eq!(record["status"], "unconfirmed");

    let stored = app.store.subscribers_of(list.list_id);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].subscriber_id, existing.subscriber_id);
}

#[tokio::test]
async fn customer_at_total_quota_gets_409() {
    let app = spawn_app_with_quota(Quota {
        max_subscribers: 5,
        ..Quota::default()
    })
    .await;
    let first = app.list(NewList::default());
    let second = app.list(NewList::default());
    for i in 0..3 {
        app.existing_subscriber(&first, &format!("a{i}@foo.com"), SubscriberStatus::Confirmed)
            .await;
    }
    for i in 0..2 {
        app.existing_subscriber(&second, &format!("b{i}@foo.com"), SubscriberStatus::Confirmed)
            .await;
    }
    let third = app.list(NewList::default());

    for list in [&first, &second, &third] {
        let resp = app
            .post_subscriber(&list.list_uid, &json!({"EMAIL": "new@foo.com"}))
            .await;

        assert_eq!(resp.status().as_u16(), 409);
        let body = envelope(resp).await;
        assert_eq!(body["status"], "error");
        assert_eq!(
            body["error"],
            "The maximum number of allowed subscribers has been reached."
        );
    }
    assert!(app.store.subscribers_of(third.list_id).is_empty());
    assert_eq!(app.store.subscribers_of(first.list_id).len(), 3);
}

#[tokio::test]
async fn list_at_quota_gets_409() {
    let app = spawn_app_with_quota(Quota {
        max_subscribers_per_list: 1,
        ..Quota::default()
    })
    .await;
    let list = app.list(NewList::default());
    app.existing_subscriber(&list, "a@foo.com", SubscriberStatus::Confirmed)
        .await;

    let resp = app
        .post_subscriber(&list.list_uid, &json!({"EMAIL": "new@foo.com"}))
        .await;

    assert_eq!(resp.status().as_u16(), 409);
    assert_eq!(
        envelope(resp).await["error"],
        "The maximum number of allowed subscribers for this list has been reached."
    );
}

#[tokio::test]
async fn duplicate_and_blacklisted_get_409() {
    let app = spawn_app().await;
    let list = app.list(NewList::default());
    app.existing_subscriber(&list, "john@foo.com", SubscriberStatus::Unconfirmed)
        .await;
    app.store
        .insert_blacklist_entry(BlacklistEntry::literal("spam@foo.com", BlacklistScope::Global));
    app.store.insert_blacklist_entry(BlacklistEntry {
        pattern: r"/@blocked\.example$/".to_string(),
        scope: BlacklistScope::Customer(app.customer.customer_id),
        zones: vec![list_ingest::domain::BlacklistZone::ListSubscribe],
    });

    for (email, error) in [
        ("john@foo.com", "The subscriber already exists in this list."),
        ("JOHN@Foo.com", "The subscriber already exists in this list."),
        ("spam@foo.com", "This email address is blacklisted."),
        ("anyone@blocked.example", "This email address is blacklisted."),
        ("Anyone@BLOCKED.example", "This email address is blacklisted."),
    ] {
        let resp = app
            .post_subscriber(&list.list_uid, &json!({ "EMAIL": email }))
            .await;
        assert_eq!(resp.status().as_u16(), 409, "{email}");
        assert_eq!(envelope(resp).await["error"], error, "{email}");
    }
    assert_eq!(app.store.subscribers_of(list.list_id).len(), 1);
}

#[tokio::test]
async fn invalid_payloads_get_422() {
    let app = spawn_app().await;
    let list = app.list(NewList::default());

    for (body, msg) in [
        (json!({}), "no email"),
        (json!({"EMAIL": ""}), "empty email"),
        (json!({"EMAIL": "not-an-email"}), "invalid email"),
        (json!({"FNAME": "John"}), "fields but no email"),
    ] {
        let resp = app.post_subscriber(&list.list_uid, &body).await;
        assert_eq!(resp.status().as_u16(), 422, "{msg}");
        assert_eq!(envelope(resp).await["status"], "error", "{msg}");
    }
    assert!(app.store.subscribers_of(list.list_id).is_empty());
}

#[tokio::test]
async fn blank_required_fields_are_reported_together() {
    let app = spawn_app().await;
    let list = app.list(NewList::default());
    app.store
        .insert_field(list.list_id, NewField::new("FNAME", "First name").required());
    app.store
        .insert_field(list.list_id, NewField::new("LNAME", "Last name").required());
    app.store
        .insert_field(list.list_id, NewField::new("CITY", "City").required());

    let resp = app
        .post_subscriber(
            &list.list_uid,
            &json!({"EMAIL": "john@foo.com", "FNAME": "", "CITY": "Paris"}),
        )
        .await;

    assert_eq!(resp.status().as_u16(), 422);
    let error = envelope(resp).await["error"].clone();
    assert_eq!(error["FNAME"], "First name cannot be blank.");
    assert_eq!(error["LNAME"], "Last name cannot be blank.");
    assert!(error.get("CITY").is_none());
    assert!(error.get("EMAIL").is_none());
}

#[tokio::test]
async fn defaults_and_truncation_apply_to_stored_values() {
    let app = spawn_app().await;
    let list = app.list(NewList {
        opt_in: OptIn::Single,
        ..NewList::default()
    });
    app.store.insert_field(
        list.list_id,
        NewField::new("SIGNUP_IP", "Signup ip").with_default("[IP_ADDRESS]"),
    );
    app.store
        .insert_field(list.list_id, NewField::new("BIO", "Bio"));
    let long = "é".repeat(300);

    let resp = app
        .post_subscriber(
            &list.list_uid,
            &json!({"EMAIL": "john@foo.com", "BIO": long, "details": {"ip_address": "10.0.0.9"}}),
        )
        .await;

    assert_eq!(resp.status().as_u16(), 201);
    let record = envelope(resp).await["data"]["record"].clone();
    assert_eq!(record["SIGNUP_IP"], "10.0.0.9");
    let bio = record["BIO"].as_str().unwrap();
    assert_eq!(bio.chars().count(), 255);
    assert!(bio.chars().all(|c| c == 'é'));
}

#[tokio::test]
async fn list_without_fields_is_404() {
    let app = spawn_app().await;
    let list = app.list(NewList::default());
    app.store.clear_fields(list.list_id);

    let resp = app
        .post_subscriber(&list.list_uid, &json!({"EMAIL": "john@foo.com"}))
        .await;

    assert_eq!(resp.status().as_u16(), 404);
    assert_eq!(
        envelope(resp).await["error"],
        "The subscribers list does not have any custom field defined."
    );
}

#[tokio::test]
async fn api_key_is_required() {
    let app = spawn_app().await;
    let list = app.list(NewList::default());
    let url = format!("{}/lists/{}/subscribers", app.addr, list.list_uid);
    let body = json!({"EMAIL": "john@foo.com"});

    let missing = app.api_client.post(&url).json(&body).send().await.unwrap();
    assert_eq!(missing.status().as_u16(), 401);
    assert_eq!(envelope(missing).await["status"], "error");

    let unknown = app
        .api_client
        .post(&url)
        .header("X-Api-Key", "nope")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status().as_u16(), 401);
    assert!(app.store.subscribers_of(list.list_id).is_empty());
}

#[tokio::test]
async fn unknown_or_foreign_list_is_404() {
    let app = spawn_app().await;
    let other = app.store.insert_customer("other-key", Quota::default());
    let foreign = app.store.insert_list(other.customer_id, NewList::default());

    for list_uid in ["does-not-exist", foreign.list_uid.as_str()] {
        let resp = app
            .post_subscriber(list_uid, &json!({"EMAIL": "john@foo.com"}))
            .await;
        assert_eq!(resp.status().as_u16(), 404, "{list_uid}");
        assert_eq!(
            envelope(resp).await["error"],
            "The subscribers list does not exist."
        );
    }
}

#[tokio::test]
async fn wrong_verb_is_400() {
    let app = spawn_app().await;
    let list = app.list(NewList::default());

    let resp = app
        .request(
            reqwest::Method::PATCH,
            &format!("/lists/{}/subscribers", list.list_uid),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    assert_eq!(
        envelope(resp).await["error"],
        "Only GET and POST requests allowed for this endpoint."
    );

    let resp = app
        .request(
            reqwest::Method::GET,
            &format!("/lists/{}/subscribers/bulk", list.list_uid),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    assert_eq!(
        envelope(resp).await["error"],
        "Only POST requests allowed for this endpoint."
    );
}

#[tokio::test]
async fn malformed_json_is_400() {
    let app = spawn_app().await;
    let list = app.list(NewList::default());

    let resp = app
        .request(
            reqwest::Method::POST,
            &format!("/lists/{}/subscribers", list.list_uid),
        )
        .header("Content-Type", "application/json")
        .body("{\"EMAIL\": ")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 400);
    assert_eq!(envelope(resp).await["status"], "error");
}

#[tokio::test]
async fn confirmation_fails_over_between_servers() {
    let app = spawn_app().await;
    let list = app.list(NewList::default());
    // the customer's own servers are tried before system ones, so both
    // failing servers come first, in either order
    for name in ["down1", "down2"] {
        app.own_delivery_server(name);
    }
    app.delivery_server("up");

    for name in ["down1", "down2"] {
        Mock::given(path(format!("/{name}/email")))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&app.email_server)
            .await;
    }
    Mock::given(path("/up/email"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&app.email_server)
        .await;

    let resp = app
        .post_subscriber(&list.list_uid, &json!({"EMAIL": "john@foo.com"}))
        .await;

    assert_eq!(resp.status().as_u16(), 201);
    let received = app.email_server.received_requests().await.unwrap();
    assert_eq!(received.len(), 3);
    assert_eq!(received[2].url.path(), "/up/email");
    assert!(app.store.customer_messages(app.customer.customer_id).is_empty());
}

#[tokio::test]
async fn delivery_failure_does_not_block_admission() {
    let app = spawn_app().await;
    let list = app.list(NewList::default());
    for name in ["a", "b", "c", "d"] {
        app.delivery_server(name);
    }

    // four servers, but never more than three attempts
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&app.email_server)
        .await;

    let resp = app
        .post_subscriber(&list.list_uid, &json!({"EMAIL": "john@foo.com"}))
        .await;

    assert_eq!(resp.status().as_u16(), 201);
    assert_eq!(app.store.subscribers_of(list.list_id).len(), 1);
    let messages = app.store.customer_messages(app.customer.customer_id);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].title, "No suitable delivery server");
}

#[tokio::test]
async fn no_delivery_server_still_admits() {
    let app = spawn_app().await;
    let list = app.list(NewList::default());

    let resp = app
        .post_subscriber(&list.list_uid, &json!({"EMAIL": "john@foo.com"}))
        .await;

    assert_eq!(resp.status().as_u16(), 201);
    assert_eq!(app.store.customer_messages(app.customer.customer_id).len(), 1);
}

#[tokio::test]
async fn approval_list_notifies_owner() {
    let app = spawn_app().await;
    let list = app.list(NewList {
        requires_approval: true,
        notification_recipients: vec!["owner@foo.com".to_string()],
        ..NewList::default()
    });
    app.delivery_server("primary");

    Mock::given(path("/primary/email"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&app.email_server)
        .await;

    let resp = app
        .post_subscriber(&list.list_uid, &json!({"EMAIL": "john@foo.com"}))
        .await;

    assert_eq!(resp.status().as_u16(), 201);
    assert_eq!(envelope(resp).await["data"]["record"]["status"], "unapproved");

    let requests = app.email_server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["To"], "owner@foo.com");
    assert!(body["TextBody"].as_str().unwrap().contains("EMAIL: john@foo.com"));
}

#[tokio::test]
async fn approval_list_without_server_confirms() {
    let app = spawn_app().await;
    let list = app.list(NewList {
        requires_approval: true,
        notification_recipients: vec!["owner@foo.com".to_string()],
        ..NewList::default()
    });

    let resp = app
        .post_subscriber(&list.list_uid, &json!({"EMAIL": "john@foo.com"}))
        .await;

    assert_eq!(resp.status().as_u16(), 201);
    assert_eq!(envelope(resp).await["data"]["record"]["status"], "confirmed");
}
