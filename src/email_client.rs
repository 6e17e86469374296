use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Serialize;

use crate::domain::DeliveryServer;

/// A rendered message, ready to hand to a delivery server
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
    pub from_name: Option<String>,
    /// Overrides the server's own sender address
    pub from_email: Option<String>,
}

/// One delivery attempt through one server. Failover between servers is not
/// the transport's business; see `DeliveryServerSelector`.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(
        &self,
        server: &DeliveryServer,
        email: &OutgoingEmail,
    ) -> Result<(), anyhow::Error>;
}

/// Http transport. The underlying `Client` keeps a connection pool, so a
/// single instance should be built at startup and shared.
#[derive(Clone)]
pub struct EmailClient {
    http_client: Client,
}

/// JSON body of `POST {base_url}/email`
#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendEmailRequest<'a> {
    from: String,
    to: &'a str,
    subject: &'a str,
    html_body: &'a str,
    text_body: &'a str,
}

impl EmailClient {
    pub fn new(timeout: Duration) -> Self {
        // `build` only fails if the tls backend cannot be initialised
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { http_client }
    }
}

#[async_trait]
impl EmailTransport for EmailClient {
    #[tracing::instrument(
        name = "Sending email through delivery server",
        skip(self, server, email),
        fields(server_id = server.server_id, recipient = %email.to)
    )]
    async fn send(
        &self,
        server: &DeliveryServer,
        email: &OutgoingEmail,
    ) -> Result<(), anyhow::Error> {
        let url = format!("{}/email", server.base_url.trim_end_matches('/'));
        let from_email = email.from_email.as_deref().unwrap_or(&server.from_email);
        let from = match &email.from_name {
            Some(name) => format!("{name} <{from_email}>"),
            None => from_email.to_string(),
        };
        let body = SendEmailRequest {
            from,
            to: &email.to,
            subject: &email.subject,
            html_body: &email.html_body,
            text_body: &email.text_body,
        };
        self.http_client
            .post(&url)
            .header("X-Postmark-Server-Token", server.token.expose_secret())
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
