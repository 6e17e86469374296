use list_ingest::configuration::get_configuration;
use list_ingest::startup::Application;
use list_ingest::telemetry::get_subscriber;
use list_ingest::telemetry::init_subscriber;

/// Initialise telemetry, load config, and start the server
#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // only logs at the specified level and higher are emitted; `RUST_LOG`
    // overrides
    let subscriber = get_subscriber("list-ingest", "info", std::io::stdout);
    init_subscriber(subscriber)?;

    let cfg = get_configuration()?;
    let app = Application::build(cfg).await?;
    tracing::info!(port = app.get_port(), "listening");

    if let Err(e) = app.run_until_stopped().await {
        tracing::error!(
            error.cause_chain=?e,
            error.message=%e,
            "API failed"
        );
        return Err(e.into());
    }
    tracing::info!("API exited gracefully");
    Ok(())
}
