use std::fmt::Display;
use std::str::FromStr;

use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use super::SubscriberEmail;

pub type SubscriberId = i64;

/// Lifecycle of a list subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriberStatus {
    Confirmed,
    Unconfirmed,
    Unsubscribed,
    Unapproved,
    Blacklisted,
}

impl SubscriberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Unconfirmed => "unconfirmed",
            Self::Unsubscribed => "unsubscribed",
            Self::Unapproved => "unapproved",
            Self::Blacklisted => "blacklisted",
        }
    }
}

impl Display for SubscriberStatus {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriberStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "confirmed" => Ok(Self::Confirmed),
            "unconfirmed" => Ok(Self::Unconfirmed),
            "unsubscribed" => Ok(Self::Unsubscribed),
            "unapproved" => Ok(Self::Unapproved),
            "blacklisted" => Ok(Self::Blacklisted),
            other => Err(format!("{other:?} is not a valid subscriber status.")),
        }
    }
}

/// Where a subscriber came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriberSource {
    Api,
    Web,
    Import,
}

impl SubscriberSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Web => "web",
            Self::Import => "import",
        }
    }
}

impl Display for SubscriberSource {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriberSource {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "api" => Ok(Self::Api),
            "web" => Ok(Self::Web),
            "import" => Ok(Self::Import),
            other => Err(format!("{other:?} is not a valid subscriber source.")),
        }
    }
}

/// A persisted subscriber row. Belongs to exactly one list; `(list_id,
/// email)` is unique.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscriber {
    pub subscriber_id: SubscriberId,
    pub subscriber_uid: Uuid,
    pub list_id: i64,
    pub email: String,
    pub status: SubscriberStatus,
    pub source: SubscriberSource,
    pub ip_address: Option<String>,
    pub date_added: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// A subscriber that has passed admission but has no id yet
pub struct NewSubscriber {
    pub list_id: i64,
    pub email: SubscriberEmail,
    pub status: SubscriberStatus,
    pub source: SubscriberSource,
    pub ip_address: Option<String>,
}
