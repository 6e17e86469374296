use std::sync::Arc;

use list_ingest::configuration::get_configuration;
use list_ingest::domain::Customer;
use list_ingest::domain::DeliveryServer;
use list_ingest::domain::MailList;
use list_ingest::domain::NewList;
use list_ingest::domain::NewSubscriber;
use list_ingest::domain::Quota;
use list_ingest::domain::Subscriber;
use list_ingest::domain::SubscriberEmail;
use list_ingest::domain::SubscriberSource;
use list_ingest::domain::SubscriberStatus;
use list_ingest::startup::Application;
use list_ingest::store::InMemoryStore;
use list_ingest::store::SubscriberStore;
use list_ingest::telemetry::get_subscriber;
use list_ingest::telemetry::init_subscriber;
use once_cell::sync::Lazy;
use secrecy::Secret;
use serde_json::Value;
use wiremock::MockServer;

pub const API_KEY: &str = "test-api-key";

/// Init a static subscriber using the `once_cell` crate.
///
/// To opt in to verbose logging, use the env var `TEST_LOG`:
///
/// ```sh
///      TEST_LOG=true cargo test [test_name] | bunyan
/// ```
static TRACING: Lazy<()> = Lazy::new(|| {
    // the two sinks are different types, hence the unwieldy match arms
    match std::env::var("TEST_LOG") {
        Ok(_) => {
            let subscriber = get_subscriber("test", "debug", std::io::stdout);
            init_subscriber(subscriber).unwrap();
        }
        Err(_) => {
            let subscriber = get_subscriber("test", "debug", std::io::sink);
            init_subscriber(subscriber).unwrap();
        }
    };
});

pub struct TestApp {
    pub addr: String,
    pub port: u16,
    /// Shared with the server: seed before a request, inspect after
    pub store: InMemoryStore,
    /// Stands in for every delivery server
    pub email_server: MockServer,
    pub customer: Customer,
    pub api_client: reqwest::Client,
}

/// Links found in an email, with the port rewritten to the test server's
pub struct ConfirmationLinks {
    pub html: reqwest::Url,
    pub plain_text: reqwest::Url,
}

impl TestApp {
    pub fn list(
        &self,
        new_list: NewList,
    ) -> MailList {
        self.store.insert_list(self.customer.customer_id, new_list)
    }

    /// A system server reachable at `{email_server}/{name}`; mock
    /// `POST /{name}/email` to control it
    pub fn delivery_server(
        &self,
        name: &str,
    ) -> DeliveryServer {
        self.insert_delivery_server(name, None)
    }

    /// Like `delivery_server`, owned by the test customer
    pub fn own_delivery_server(
        &self,
        name: &str,
    ) -> DeliveryServer {
        self.insert_delivery_server(name, Some(self.customer.customer_id))
    }

    fn insert_delivery_server(
        &self,
        name: &str,
        customer_id: Option<i64>,
    ) -> DeliveryServer {
        self.store.insert_delivery_server(DeliveryServer {
            server_id: 0,
            customer_id,
            name: name.to_string(),
            base_url: format!("{}/{name}", self.email_server.uri()),
            token: Secret::new(format!("{name}-token")),
            from_email: "sender@example.com".to_string(),
            probability: 100,
            active: true,
        })
    }

    /// Insert a row directly, bypassing the pipeline
    pub async fn existing_subscriber(
        &self,
        list: &MailList,
        email: &str,
        status: SubscriberStatus,
    ) -> Subscriber {
        self.store
            .insert_subscriber(&NewSubscriber {
                list_id: list.list_id,
                email: SubscriberEmail::parse(email.to_string()).unwrap(),
                status,
                source: SubscriberSource::Import,
                ip_address: None,
            })
            .await
            .unwrap()
    }

    fn url(
        &self,
        path: &str,
    ) -> String {
        format!("{}{path}", self.addr)
    }

    /// Authenticated request to `path`
    pub fn request(
        &self,
        method: reqwest::Method,
        path: &str,
    ) -> reqwest::RequestBuilder {
        self.api_client
            .request(method, self.url(path))
            .header("X-Api-Key", API_KEY)
    }

    pub async fn post_subscriber(
        &self,
        list_uid: &str,
        body: &Value,
    ) -> reqwest::Response {
        self.request(reqwest::Method::POST, &format!("/lists/{list_uid}/subscribers"))
            .json(body)
            .send()
            .await
            .expect("execute request")
    }

    pub async fn post_bulk(
        &self,
        list_uid: &str,
        body: &Value,
    ) -> reqwest::Response {
        self.request(reqwest::Method::POST, &format!("/lists/{list_uid}/subscribers/bulk"))
            .json(body)
            .send()
            .await
            .expect("execute request")
    }

    pub async fn get_subscribers(
        &self,
        list_uid: &str,
        query: &str,
    ) -> reqwest::Response {
        self.request(reqwest::Method::GET, &format!("/lists/{list_uid}/subscribers?{query}"))
            .send()
            .await
            .expect("execute request")
    }

    pub async fn get_subscriber(
        &self,
        list_uid: &str,
        subscriber_uid: &str,
    ) -> reqwest::Response {
        self.request(
            reqwest::Method::GET,
            &format!("/lists/{list_uid}/subscribers/{subscriber_uid}"),
        )
        .send()
        .await
        .expect("execute request")
    }

    pub async fn put_subscriber(
        &self,
        list_uid: &str,
        subscriber_uid: &str,
        body: &Value,
    ) -> reqwest::Response {
        self.request(
            reqwest::Method::PUT,
            &format!("/lists/{list_uid}/subscribers/{subscriber_uid}"),
        )
        .json(body)
        .send()
        .await
        .expect("execute request")
    }

    pub async fn unsubscribe(
        &self,
        list_uid: &str,
        subscriber_uid: &str,
    ) -> reqwest::Response {
        self.request(
            reqwest::Method::PUT,
            &format!("/lists/{list_uid}/subscribers/{subscriber_uid}/unsubscribe"),
        )
        .send()
        .await
        .expect("execute request")
    }

    pub async fn delete_subscriber(
        &self,
        list_uid: &str,
        subscriber_uid: &str,
    ) -> reqwest::Response {
        self.request(
            reqwest::Method::DELETE,
            &format!("/lists/{list_uid}/subscribers/{subscriber_uid}"),
        )
        .send()
        .await
        .expect("execute request")
    }

    pub async fn search_by_email(
        &self,
        list_uid: &str,
        email: &str,
    ) -> reqwest::Response {
        self.request(
            reqwest::Method::GET,
            &format!("/lists/{list_uid}/subscribers/search-by-email"),
        )
        .query(&[("EMAIL", email)])
        .send()
        .await
        .expect("execute request")
    }

    pub async fn search_in_all_lists(
        &self,
        email: &str,
    ) -> reqwest::Response {
        self.request(
            reqwest::Method::GET,
            "/lists/subscribers/search-by-email-in-all-lists",
        )
        .query(&[("EMAIL", email)])
        .send()
        .await
        .expect("execute request")
    }

    /// Extract the confirmation links from a request intercepted by the mock
    /// delivery server
    pub fn get_confirmation_links(
        &self,
        email_request: &wiremock::Request,
    ) -> ConfirmationLinks {
        let body: Value = serde_json::from_slice(&email_request.body).unwrap();

        let get_link = |s: &str| {
            let links: Vec<_> = linkify::LinkFinder::new()
                .links(s)
                .filter(|l| *l.kind() == linkify::LinkKind::Url)
                .collect();
            assert_eq!(links.len(), 1);
            let raw_link = links[0].as_str().to_owned();
            let mut confirmation_link = reqwest::Url::parse(&raw_link).unwrap();
            // make sure we don't call random APIs on the web
            assert_eq!(confirmation_link.host_str().unwrap(), "127.0.0.1");
            confirmation_link.set_port(Some(self.port)).unwrap();
            confirmation_link
        };

        let html = get_link(body["HtmlBody"].as_str().unwrap());
        let plain_text = get_link(body["TextBody"].as_str().unwrap());
        ConfirmationLinks { html, plain_text }
    }
}

/// `{"status": .., "data"|"error": ..}` of a response
pub async fn envelope(response: reqwest::Response) -> Value {
    response.json().await.expect("json envelope")
}

pub async fn spawn_app() -> TestApp { spawn_app_with_quota(Quota::default()).await }

/// Spawn the server on a random port against a fresh in-memory store, with a
/// single customer (key `API_KEY`) holding `quota`.
pub async fn spawn_app_with_quota(quota: Quota) -> TestApp {
    // init the tracing subscriber once only
    Lazy::force(&TRACING);

    let email_server = MockServer::start().await;

    let cfg = {
        let mut c = get_configuration().expect("read configuration");
        // port 0 is reserved by the OS; the server will be spawned on an
        // address with a random available port
        c.application.port = 0;
        c.application.base_url = "http://127.0.0.1".to_string();
        c.email_client.timeout_milliseconds = 500;
        c
    };

    let store = InMemoryStore::default();
    let customer = store.insert_customer(API_KEY, quota);

    let app = Application::build_with_store(cfg, Arc::new(store.clone()))
        .await
        .expect("build application");
    let port = app.get_port();
    let addr = format!("http://127.0.0.1:{port}");
    tokio::spawn(app.run_until_stopped());

    TestApp {
        addr,
        port,
        store,
        email_server,
        customer,
        api_client: reqwest::Client::new(),
    }
}
