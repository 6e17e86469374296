use std::net::TcpListener;
use std::sync::Arc;

use actix_web::dev::Server;
use actix_web::web;
use actix_web::web::Data;
use actix_web::App;
use actix_web::HttpServer;
use anyhow::Context;
use actix_web_lab::middleware::from_fn;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_actix_web::TracingLogger;

use crate::authentication::reject_unknown_api_keys;
use crate::configuration::DatabaseSettings;
use crate::configuration::Settings;
use crate::delivery::DeliveryServerSelector;
use crate::delivery::WeightedRotation;
use crate::ingestion::IngestionService;
use crate::routes::confirm_subscriber;
use crate::routes::create_subscriber;
use crate::routes::create_subscribers_bulk;
use crate::routes::delete_subscriber;
use crate::routes::get_subscriber;
use crate::routes::health_check;
use crate::routes::list_subscribers;
use crate::routes::search_by_email;
use crate::routes::search_by_email_in_all_lists;
use crate::routes::unsubscribe_subscriber;
use crate::routes::update_subscriber;
use crate::routes::wrong_method;
use crate::routes::ApiError;
use crate::store::PostgresStore;
use crate::store::Store;
use crate::workflow::ApprovalWorkflow;

/// Bulk bodies carry up to ten thousand subscribers
const JSON_LIMIT: usize = 16 * 1024 * 1024;

/// Wrapper for actix's `Server` with access to the bound port. Not to be
/// confused with actix's `App`!
pub struct Application {
    /// Left private; use `get_port` to access
    port: u16,
    server: Server,
}

impl Application {
    /// Bind the configured address, backed by Postgres
    pub async fn build(cfg: Settings) -> Result<Self, anyhow::Error> {
        let store: Store = Arc::new(PostgresStore::new(get_connection_pool(&cfg.database)));
        Self::build_with_store(cfg, store).await
    }

    /// Like `build`, with the caller's store; tests pass an `InMemoryStore`
    /// and keep a handle on it to seed and inspect
    pub async fn build_with_store(
        cfg: Settings,
        store: Store,
    ) -> Result<Self, anyhow::Error> {
        // env-dependent host; port 0 lets the OS pick
        let addr = format!("{}:{}", cfg.application.host, cfg.application.port);
        let listener = TcpListener::bind(&addr).with_context(|| format!("could not bind {addr}"))?;
        let port = listener.local_addr()?.port();

        let selector = DeliveryServerSelector::new(
            store.clone(),
            Arc::new(WeightedRotation),
            Arc::new(cfg.email_client.client()),
            cfg.ingestion.max_send_attempts,
        );
        let workflow = ApprovalWorkflow::new(store.clone(), selector, cfg.application.base_url);
        let service = IngestionService::new(store.clone(), workflow, cfg.ingestion);

        let server = run(listener, store, service)?;
        Ok(Self { port, server })
    }

    pub fn get_port(&self) -> u16 { self.port }

    /// Because this consumes `self`, this should be the final function call (or
    /// passed to `tokio::spawn`)
    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> { self.server.await }
}

/// Connects lazily, so the server starts (and `/health_check` answers) before
/// the database is reachable
pub fn get_connection_pool(db_cfg: &DatabaseSettings) -> PgPool {
    PgPoolOptions::new().connect_lazy_with(db_cfg.connection())
}

/// The server is not responsible for binding to an address, it only listens to
/// an already bound address.
///
/// Declares all API endpoints. Within `/lists`, fixed segments
/// (`bulk`, `search-by-email`) are registered before `{subscriber_uid}`.
pub fn run(
    listener: TcpListener,
    store: Store,
    service: IngestionService,
) -> Result<Server, anyhow::Error> {
    // `Data` is externally an `Arc` (for sharing/cloning)
    let store = Data::new(store);
    let service = Data::new(service);

    let server = HttpServer::new(move || {
        let json_cfg = web::JsonConfig::default()
            .limit(JSON_LIMIT)
            .error_handler(|e, _req| ApiError::BadRequest(e.to_string()).into());

        App::new()
            .wrap(TracingLogger::default())
            .route("/health_check", web::get().to(health_check))
            // followed from emails; outside the api key scope
            .service(
                web::resource("/lists/{list_uid}/confirm-subscribe/{subscriber_uid}")
                    .route(web::get().to(confirm_subscriber))
                    .default_service(wrong_method("GET")),
            )
            .service(
                web::scope("/lists")
                    .wrap(from_fn(reject_unknown_api_keys))
                    .service(
                        web::resource("/subscribers/search-by-email-in-all-lists")
                            .route(web::get().to(search_by_email_in_all_lists))
                            .default_service(wrong_method("GET")),
                    )
                    .service(
                        web::resource("/{list_uid}/subscribers")
                            .route(web::get().to(list_subscribers))
                            .route(web::post().to(create_subscriber))
                            .default_service(wrong_method("GET and POST")),
                    )
                    .service(
                        web::resource("/{list_uid}/subscribers/bulk")
                            .route(web::post().to(create_subscribers_bulk))
                            .default_service(wrong_method("POST")),
                    )
                    .service(
                        web::resource("/{list_uid}/subscribers/search-by-email")
                            .route(web::get().to(search_by_email))
                            .default_service(wrong_method("GET")),
                    )
                    .service(
                        web::resource("/{list_uid}/subscribers/{subscriber_uid}")
                            .route(web::get().to(get_subscriber))
                            .route(web::put().to(update_subscriber))
                            .route(web::delete().to(delete_subscriber))
                            .default_service(wrong_method("GET, PUT and DELETE")),
                    )
                    .service(
                        web::resource("/{list_uid}/subscribers/{subscriber_uid}/unsubscribe")
                            .route(web::put().to(unsubscribe_subscriber))
                            .default_service(wrong_method("PUT")),
                    ),
            )
            .app_data(json_cfg)
            .app_data(store.clone())
            .app_data(service.clone())
    })
    .listen(listener)?
    .run();

    Ok(server)
}
