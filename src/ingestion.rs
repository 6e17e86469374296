//! The admission pipeline, shared by the single, bulk and update endpoints.
//!
//! lock -> quota -> duplicate -> blacklist -> fields -> persist -> workflow

use std::collections::BTreeMap;

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::configuration::IngestionSettings;
use crate::domain::Admission;
use crate::domain::BindContext;
use crate::domain::BlacklistFilter;
use crate::domain::BlacklistZone;
use crate::domain::Customer;
use crate::domain::DuplicateEmailResolver;
use crate::domain::FieldErrors;
use crate::domain::FieldValues;
use crate::domain::MailList;
use crate::domain::NewSubscriber;
use crate::domain::QuotaGate;
use crate::domain::Resolution;
use crate::domain::SubmittedFields;
use crate::domain::Subscriber;
use crate::domain::SubscriberEmail;
use crate::domain::SubscriberFieldBinder;
use crate::domain::SubscriberSource;
use crate::domain::SubscriberStatus;
use crate::domain::EMAIL_TAG;
use crate::lock::lock_key;
use crate::lock::LockGuard;
use crate::lock::LockScope;
use crate::lock::NamedLocks;
use crate::store::Store;
use crate::store::StoreError;
use crate::utils::error_chain_fmt;
use crate::workflow::initial_status;
use crate::workflow::ApprovalWorkflow;
use crate::workflow::WorkflowState;

const LOCK_OPERATION: &str = "create";

/// Optional overrides sent next to the field values
#[derive(Debug, Default, Deserialize)]
pub struct SubscriberDetails {
    pub status: Option<String>,
    pub ip_address: Option<String>,
    pub source: Option<String>,
}

/// One subscriber as submitted: `{"EMAIL": .., "FNAME": .., "details": {..}}`.
/// Every key but `details` is taken as a field tag.
#[derive(Debug, Default, Deserialize)]
pub struct SubscriberPayload {
    #[serde(default)]
    pub details: Option<SubscriberDetails>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl SubscriberPayload {
    /// Field values as strings. Scalars give one value, arrays one per
    /// element; `null` gives none (sent, but blank).
    pub fn submitted(&self) -> SubmittedFields {
        self.fields
            .iter()
            .map(|(tag, value)| (tag.clone(), values_of(value)))
            .collect()
    }

    /// First non-blank `EMAIL` value
    pub fn email(&self) -> Option<String> {
        self.fields
            .get(EMAIL_TAG)
            .map(values_of)
            .unwrap_or_default()
            .into_iter()
            .map(|v| v.trim().to_string())
            .find(|v| !v.is_empty())
    }

    fn details(&self) -> &SubscriberDetails {
        static NONE: SubscriberDetails = SubscriberDetails {
            status: None,
            ip_address: None,
            source: None,
        };
        self.details.as_ref().unwrap_or(&NONE)
    }

    fn requested_status(&self) -> Option<SubscriberStatus> {
        self.details().status.as_deref().and_then(|s| s.parse().ok())
    }

    fn source(&self) -> SubscriberSource {
        self.details()
            .source
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(SubscriberSource::Api)
    }

    fn ip_address(&self) -> Option<String> {
        self.details()
            .ip_address
            .as_deref()
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .map(str::to_string)
    }
}

fn values_of(value: &Value) -> Vec<String> {
    match value {
        Value::Null => vec![],
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items.iter().flat_map(values_of).collect(),
        Value::Object(_) => vec![],
        other => vec![other.to_string()],
    }
}

#[derive(thiserror::Error)]
pub enum IngestError {
    #[error("{0}")]
    Validation(String),
    /// Per-tag messages; all blank required fields at once
    #[error("Some of the submitted fields are invalid.")]
    FieldErrors(FieldErrors),
    #[error("The subscribers list does not exist.")]
    ListNotFound,
    #[error("The subscriber does not exist in this list.")]
    SubscriberNotFound,
    #[error("The subscribers list does not have any custom field defined.")]
    MissingFields,
    #[error("The subscriber already exists in this list.")]
    Duplicate,
    #[error("The maximum number of allowed subscribers has been reached.")]
    QuotaTotal,
    #[error("The maximum number of allowed subscribers for this list has been reached.")]
    QuotaPerList,
    #[error("This email address is blacklisted.")]
    Blacklisted,
    #[error("Another request for this email address is in progress.")]
    LockBusy,
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl std::fmt::Debug for IngestError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl From<StoreError> for IngestError {
    fn from(e: StoreError) -> Self {
        match e {
            // lost a race against a concurrent admission of the same address
            StoreError::Duplicate => IngestError::Duplicate,
            e => IngestError::Unexpected(anyhow::Error::new(e)),
        }
    }
}

/// An admitted subscriber
#[derive(Debug)]
pub struct Created {
    pub subscriber: Subscriber,
    pub values: FieldValues,
    pub state: WorkflowState,
}

/// Entry point of every subscriber mutation. Cheap to clone; clones share the
/// lock registry.
#[derive(Clone)]
pub struct IngestionService {
    store: Store,
    workflow: ApprovalWorkflow,
    locks: NamedLocks,
    settings: IngestionSettings,
}

impl IngestionService {
    pub fn new(
        store: Store,
        workflow: ApprovalWorkflow,
        settings: IngestionSettings,
    ) -> Self {
        Self {
            store,
            workflow,
            locks: NamedLocks::default(),
            settings,
        }
    }

    fn binder(&self) -> SubscriberFieldBinder {
        SubscriberFieldBinder::new(self.settings.field_value_max_length)
    }

    fn lock(
        &self,
        scope: LockScope,
        list: &MailList,
        email: &str,
    ) -> Result<Option<LockGuard>, IngestError> {
        match lock_key(scope, LOCK_OPERATION, list.list_id, email, Utc::now()) {
            None => Ok(None),
            Some(key) => self
                .locks
                .try_acquire(key)
                .map(Some)
                .ok_or(IngestError::LockBusy),
        }
    }

    #[tracing::instrument(
        name = "Creating subscriber",
        skip_all,
        fields(list_uid = %list.list_uid, email = tracing::field::Empty)
    )]
    pub async fn create(
        &self,
        customer: &Customer,
        list: &MailList,
        payload: &SubscriberPayload,
    ) -> Result<Created, IngestError> {
        let email = parse_email(payload)?;
        tracing::Span::current().record("email", tracing::field::display(&email));
        let _guard = self.lock(self.settings.lock.single, list, email.as_ref())?;
        self.admit(customer, list, email, payload).await
    }

    /// Items fail independently. The outer error rejects the request as a
    /// whole: too many items, or a list-wide lock already held.
    #[tracing::instrument(
        name = "Creating subscribers in bulk",
        skip_all,
        fields(list_uid = %list.list_uid, items = items.len())
    )]
    pub async fn create_bulk(
        &self,
        customer: &Customer,
        list: &MailList,
        items: Vec<Value>,
    ) -> Result<Vec<Result<Created, IngestError>>, IngestError> {
        if items.is_empty() {
            return Err(IngestError::Validation(
                "Please provide the subscribers to be created.".to_string(),
            ));
        }
        if items.len() > self.settings.bulk_max_items {
            return Err(IngestError::Validation(format!(
                "You cannot create more than {} subscribers at once.",
                self.settings.bulk_max_items
            )));
        }

        let scope = self.settings.lock.bulk;
        let _list_guard = match scope {
            LockScope::List => self.lock(scope, list, "")?,
            _ => None,
        };

        let mut results = Vec::with_capacity(items.len());
        for item in items {
            results.push(self.create_item(customer, list, scope, item).await);
        }
        Ok(results)
    }

    async fn create_item(
        &self,
        customer: &Customer,
        list: &MailList,
        scope: LockScope,
        item: Value,
    ) -> Result<Created, IngestError> {
        let payload: SubscriberPayload = serde_json::from_value(item).map_err(|e| {
            IngestError::Validation(format!("The subscriber data is invalid: {e}"))
        })?;
        let email = parse_email(&payload)?;
        let _guard = match scope {
            LockScope::Email => self.lock(scope, list, email.as_ref())?,
            _ => None,
        };
        self.admit(customer, list, email, &payload).await
    }

    async fn admit(
        &self,
        customer: &Customer,
        list: &MailList,
        email: SubscriberEmail,
        payload: &SubscriberPayload,
    ) -> Result<Created, IngestError> {
        let fields = self.store.list_fields(list.list_id).await?;
        if fields.is_empty() {
            return Err(IngestError::MissingFields);
        }

        let customer_total = self
            .store
            .count_customer_subscribers(customer.customer_id)
            .await?;
        let list_total = self.store.count_list_subscribers(list.list_id).await?;
        match QuotaGate::admit_quota(&customer.quota, customer_total, list_total) {
            Admission::Allow => {}
            Admission::DenyTotal => return Err(IngestError::QuotaTotal),
            Admission::DenyPerList => return Err(IngestError::QuotaPerList),
        }

        let existing = self.store.find_by_email(list.list_id, email.as_ref()).await?;
        let resolution = DuplicateEmailResolver::resolve(existing.as_ref());
        if resolution == Resolution::Reject {
            return Err(IngestError::Duplicate);
        }

        let filter = BlacklistFilter::new(self.store.blacklist_entries(customer.customer_id).await?);
        if filter.is_blacklisted(email.as_ref(), BlacklistZone::ListSubscribe) {
            return Err(IngestError::Blacklisted);
        }

        let status = initial_status(list, payload.requested_status());
        let source = payload.source();
        let ip_address = payload.ip_address();
        let ctx = BindContext {
            email: email.as_ref(),
            ip_address: ip_address.as_deref(),
            source: source.as_str(),
            list_name: &list.name,
            now: Utc::now(),
        };
        let mut values = self
            .binder()
            .bind(&fields, &payload.submitted(), &ctx)
            .map_err(IngestError::FieldErrors)?;
        values.insert(EMAIL_TAG.to_string(), vec![email.as_ref().to_string()]);

        let mut subscriber = match resolution {
            Resolution::UpdateInPlace(mut existing) => {
                tracing::info!(subscriber_id = existing.subscriber_id, "resubscribing");
                existing.status = status;
                existing.source = source;
                existing.ip_address = ip_address;
                self.store.update_with_values(&existing, &values).await?
            }
            _ => {
                let new_subscriber = NewSubscriber {
                    list_id: list.list_id,
                    email,
                    status,
                    source,
                    ip_address,
                };
                self.store.insert_with_values(&new_subscriber, &values).await?
            }
        };

        let state = self.workflow.run(list, &mut subscriber, &values).await?;
        tracing::info!(subscriber_uid = %subscriber.subscriber_uid, ?state, "subscriber admitted");
        Ok(Created {
            subscriber,
            values,
            state,
        })
    }

    async fn find(
        &self,
        list: &MailList,
        subscriber_uid: Uuid,
    ) -> Result<Subscriber, IngestError> {
        self.store
            .find_by_uid(list.list_id, subscriber_uid)
            .await?
            .ok_or(IngestError::SubscriberNotFound)
    }

    /// Only what the payload carries is touched; an absent tag keeps its
    /// values.
    #[tracing::instrument(name = "Updating subscriber", skip(self, customer, list, payload))]
    pub async fn update(
        &self,
        customer: &Customer,
        list: &MailList,
        subscriber_uid: Uuid,
        payload: &SubscriberPayload,
    ) -> Result<(Subscriber, FieldValues), IngestError> {
        let mut subscriber = self.find(list, subscriber_uid).await?;

        if let Some(raw) = payload.email() {
            let email = SubscriberEmail::parse(raw)
                .map_err(|_| IngestError::Validation("Please provide a valid email address.".to_string()))?;
            if email.as_ref() != subscriber.email {
                if let Some(other) = self.store.find_by_email(list.list_id, email.as_ref()).await? {
                    if other.subscriber_id != subscriber.subscriber_id {
                        return Err(IngestError::Duplicate);
                    }
                }
                let filter =
                    BlacklistFilter::new(self.store.blacklist_entries(customer.customer_id).await?);
                if filter.is_blacklisted(email.as_ref(), BlacklistZone::ListSubscribe) {
                    return Err(IngestError::Blacklisted);
                }
                subscriber.email = email.as_ref().to_string();
            }
        }

        if let Some(status) = payload.requested_status().filter(|s| match s {
            SubscriberStatus::Blacklisted => false,
            SubscriberStatus::Unapproved => list.requires_approval,
            _ => true,
        }) {
            subscriber.status = status;
        }
        if payload.details().source.is_some() {
            subscriber.source = payload.source();
        }
        if let Some(ip_address) = payload.ip_address() {
            subscriber.ip_address = Some(ip_address);
        }

        let fields = self.store.list_fields(list.list_id).await?;
        let ctx = BindContext {
            email: &subscriber.email,
            ip_address: subscriber.ip_address.as_deref(),
            source: subscriber.source.as_str(),
            list_name: &list.name,
            now: Utc::now(),
        };
        let mut values = self
            .binder()
            .bind_partial(&fields, &payload.submitted(), &ctx)
            .map_err(IngestError::FieldErrors)?;
        if values.contains_key(EMAIL_TAG) {
            values.insert(EMAIL_TAG.to_string(), vec![subscriber.email.clone()]);
        }

        let subscriber = self.store.update_with_values(&subscriber, &values).await?;
        let values = self.store.field_values(subscriber.subscriber_id).await?;
        Ok((subscriber, values))
    }

    /// Unsubscribing twice is not an error
    #[tracing::instrument(name = "Unsubscribing subscriber", skip(self, list))]
    pub async fn unsubscribe(
        &self,
        list: &MailList,
        subscriber_uid: Uuid,
    ) -> Result<Subscriber, IngestError> {
        let mut subscriber = self.find(list, subscriber_uid).await?;
        if subscriber.status == SubscriberStatus::Unsubscribed {
            return Ok(subscriber);
        }
        subscriber.status = SubscriberStatus::Unsubscribed;
        Ok(self.store.update_subscriber(&subscriber).await?)
    }

    #[tracing::instrument(name = "Deleting subscriber", skip(self, list))]
    pub async fn delete(
        &self,
        list: &MailList,
        subscriber_uid: Uuid,
    ) -> Result<(), IngestError> {
        let subscriber = self.find(list, subscriber_uid).await?;
        self.store.delete_subscriber(subscriber.subscriber_id).await?;
        Ok(())
    }

    /// Target of the confirmation link. Only unconfirmed subscribers move;
    /// any other status is returned as it is, so following the link twice is
    /// harmless.
    #[tracing::instrument(name = "Confirming subscriber", skip(self, list))]
    pub async fn confirm(
        &self,
        list: &MailList,
        subscriber_uid: Uuid,
    ) -> Result<Subscriber, IngestError> {
        let mut subscriber = self.find(list, subscriber_uid).await?;
        if subscriber.status != SubscriberStatus::Unconfirmed {
            return Ok(subscriber);
        }
        subscriber.status = SubscriberStatus::Confirmed;
        let subscriber = self.store.update_subscriber(&subscriber).await?;
        let values = self.store.field_values(subscriber.subscriber_id).await?;
        self.workflow.activate(list, &subscriber, &values).await;
        Ok(subscriber)
    }
}

fn parse_email(payload: &SubscriberPayload) -> Result<SubscriberEmail, IngestError> {
    let raw = payload.email().ok_or_else(|| {
        IngestError::Validation("Please provide the subscriber email address.".to_string())
    })?;
    SubscriberEmail::parse(raw)
        .map_err(|_| IngestError::Validation("Please provide a valid email address.".to_string()))
}
