//! Subscriber ingestion for mailing lists: a JSON api admitting subscribers
//! through quota, duplicate, blacklist and custom field checks, then routing
//! them to approval, confirmation or activation, with emails sent through
//! failover-capable delivery servers.

pub mod authentication;
pub mod configuration;
pub mod delivery;
pub mod domain;
pub mod email_client;
pub mod ingestion;
pub mod lock;
pub mod routes;
pub mod startup;
pub mod store;
pub mod telemetry;
pub mod utils;
pub mod workflow;
