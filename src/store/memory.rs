use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::StoreError;
use super::SubscriberStore;
use crate::domain::BlacklistEntry;
use crate::domain::BlacklistScope;
use crate::domain::CustomFieldDefinition;
use crate::domain::Customer;
use crate::domain::DeliveryServer;
use crate::domain::FieldValues;
use crate::domain::MailList;
use crate::domain::NewField;
use crate::domain::NewList;
use crate::domain::NewSubscriber;
use crate::domain::Quota;
use crate::domain::Subscriber;
use crate::domain::SubscriberId;

/// A customer-facing notice, as recorded by `add_customer_message`
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerMessage {
    pub customer_id: i64,
    pub title: String,
    pub message: String,
}

#[derive(Default)]
struct Tables {
    next_id: i64,
    customers: Vec<Customer>,
    lists: Vec<MailList>,
    fields: Vec<CustomFieldDefinition>,
    subscribers: BTreeMap<SubscriberId, Subscriber>,
    values: BTreeMap<(SubscriberId, String), Vec<String>>,
    blacklist: Vec<BlacklistEntry>,
    servers: Vec<DeliveryServer>,
    messages: Vec<CustomerMessage>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn list(
        &self,
        list_id: i64,
    ) -> Option<&MailList> {
        self.lists.iter().find(|l| l.list_id == list_id)
    }

    fn insert_subscriber(
        &mut self,
        new_subscriber: &NewSubscriber,
    ) -> Result<Subscriber, StoreError> {
        let email = new_subscriber.email.as_ref();
        if self
            .subscribers
            .values()
            .any(|s| s.list_id == new_subscriber.list_id && same_email(&s.email, email))
        {
            return Err(StoreError::Duplicate);
        }
        let now = Utc::now();
        let subscriber = Subscriber {
            subscriber_id: self.next_id(),
            subscriber_uid: Uuid::new_v4(),
            list_id: new_subscriber.list_id,
            email: email.to_string(),
            status: new_subscriber.status,
            source: new_subscriber.source,
            ip_address: new_subscriber.ip_address.clone(),
            date_added: now,
            last_updated: now,
        };
        self.subscribers
            .insert(subscriber.subscriber_id, subscriber.clone());
        Ok(subscriber)
    }

    fn update_subscriber(
        &mut self,
        subscriber: &Subscriber,
    ) -> Result<Subscriber, StoreError> {
        if self.subscribers.values().any(|s| {
            s.list_id == subscriber.list_id
                && same_email(&s.email, &subscriber.email)
                && s.subscriber_id != subscriber.subscriber_id
        }) {
            return Err(StoreError::Duplicate);
        }
        let stored = self
            .subscribers
            .get_mut(&subscriber.subscriber_id)
            .ok_or_else(|| anyhow::anyhow!("no subscriber {}", subscriber.subscriber_id))?;
        stored.email = subscriber.email.clone();
        stored.status = subscriber.status;
        stored.source = subscriber.source;
        stored.ip_address = subscriber.ip_address.clone();
        stored.last_updated = Utc::now();
        Ok(stored.clone())
    }

    fn replace_values(
        &mut self,
        subscriber: &Subscriber,
        values: &FieldValues,
    ) {
        for (tag, tag_values) in values {
            let known = self
                .fields
                .iter()
                .any(|f| f.list_id == subscriber.list_id && f.tag == *tag);
            if known {
                self.values
                    .insert((subscriber.subscriber_id, tag.clone()), tag_values.clone());
            }
        }
    }
}

/// Addresses are one identity regardless of case
fn same_email(
    a: &str,
    b: &str,
) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

/// Process-local store. Cloning shares the same tables, so a test can keep a
/// handle to seed and inspect what the server writes.
///
/// The lock is never held across an `.await`.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryStore {
    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_customer(
        &self,
        api_key: &str,
        quota: Quota,
    ) -> Customer {
        let mut tables = self.tables();
        let customer = Customer {
            customer_id: tables.next_id(),
            api_key: api_key.to_string(),
            quota,
        };
        tables.customers.push(customer.clone());
        customer
    }

    /// The list is created with its `EMAIL` field
    pub fn insert_list(
        &self,
        customer_id: i64,
        new_list: NewList,
    ) -> MailList {
        let list = {
            let mut tables = self.tables();
            let list = MailList {
                list_id: tables.next_id(),
                list_uid: Uuid::new_v4().simple().to_string()[..13].to_string(),
                customer_id,
                name: new_list.name,
                opt_in: new_list.opt_in,
                requires_approval: new_list.requires_approval,
                welcome_email: new_list.welcome_email,
                from_name: new_list.from_name,
                from_email: new_list.from_email,
                notification_recipients: new_list.notification_recipients,
                notify_on_subscribe: new_list.notify_on_subscribe,
            };
            tables.lists.push(list.clone());
            list
        };
        self.insert_field(list.list_id, NewField::email());
        list
    }

    pub fn insert_field(
        &self,
        list_id: i64,
        new_field: NewField,
    ) -> CustomFieldDefinition {
        let mut tables = self.tables();
        let field = CustomFieldDefinition {
            field_id: tables.next_id(),
            list_id,
            tag: new_field.tag,
            label: new_field.label,
            required: new_field.required,
            default_value: new_field.default_value,
            visibility: new_field.visibility,
            sort_order: new_field.sort_order,
        };
        tables.fields.push(field.clone());
        field
    }

    /// Drop every field of a list, `EMAIL` included
    pub fn clear_fields(
        &self,
        list_id: i64,
    ) {
        self.tables().fields.retain(|f| f.list_id != list_id);
    }

    pub fn insert_blacklist_entry(
        &self,
        entry: BlacklistEntry,
    ) {
        self.tables().blacklist.push(entry);
    }

    /// `server_id` is assigned here; whatever the caller set is overwritten
    pub fn insert_delivery_server(
        &self,
        mut server: DeliveryServer,
    ) -> DeliveryServer {
        let mut tables = self.tables();
        server.server_id = tables.next_id();
        tables.servers.push(server.clone());
        server
    }

    pub fn subscribers_of(
        &self,
        list_id: i64,
    ) -> Vec<Subscriber> {
        self.tables()
            .subscribers
            .values()
            .filter(|s| s.list_id == list_id)
            .cloned()
            .collect()
    }

    pub fn customer_messages(
        &self,
        customer_id: i64,
    ) -> Vec<CustomerMessage> {
        self.tables()
            .messages
            .iter()
            .filter(|m| m.customer_id == customer_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SubscriberStore for InMemoryStore {
    async fn customer_by_api_key(
        &self,
        api_key: &str,
    ) -> Result<Option<Customer>, StoreError> {
        Ok(self
            .tables()
            .customers
            .iter()
            .find(|c| c.api_key == api_key)
            .cloned())
    }

    async fn list_by_uid(
        &self,
        customer_id: i64,
        list_uid: &str,
    ) -> Result<Option<MailList>, StoreError> {
        Ok(self
            .tables()
            .lists
            .iter()
            .find(|l| l.list_uid == list_uid && l.customer_id == customer_id)
            .cloned())
    }

    async fn list_by_public_uid(
        &self,
        list_uid: &str,
    ) -> Result<Option<MailList>, StoreError> {
        Ok(self
            .tables()
            .lists
            .iter()
            .find(|l| l.list_uid == list_uid)
            .cloned())
    }

    async fn lists_of_customer(
        &self,
        customer_id: i64,
    ) -> Result<Vec<MailList>, StoreError> {
        Ok(self
            .tables()
            .lists
            .iter()
            .filter(|l| l.customer_id == customer_id)
            .cloned()
            .collect())
    }

    async fn list_fields(
        &self,
        list_id: i64,
    ) -> Result<Vec<CustomFieldDefinition>, StoreError> {
        let mut fields: Vec<_> = self
            .tables()
            .fields
            .iter()
            .filter(|f| f.list_id == list_id)
            .cloned()
            .collect();
        fields.sort_by_key(|f| (f.sort_order, f.field_id));
        Ok(fields)
    }

    async fn count_customer_subscribers(
        &self,
        customer_id: i64,
    ) -> Result<i64, StoreError> {
        let tables = self.tables();
        let count = tables
            .subscribers
            .values()
            .filter(|s| tables.list(s.list_id).map(|l| l.customer_id) == Some(customer_id))
            .count();
        Ok(count as i64)
    }

    async fn count_list_subscribers(
        &self,
        list_id: i64,
    ) -> Result<i64, StoreError> {
        let count = self
            .tables()
            .subscribers
            .values()
            .filter(|s| s.list_id == list_id)
            .count();
        Ok(count as i64)
    }

    async fn find_by_email(
        &self,
        list_id: i64,
        email: &str,
    ) -> Result<Option<Subscriber>, StoreError> {
        Ok(self
            .tables()
            .subscribers
            .values()
            .find(|s| s.list_id == list_id && same_email(&s.email, email))
            .cloned())
    }

    async fn find_by_uid(
        &self,
        list_id: i64,
        subscriber_uid: Uuid,
    ) -> Result<Option<Subscriber>, StoreError> {
        Ok(self
            .tables()
            .subscribers
            .values()
            .find(|s| s.list_id == list_id && s.subscriber_uid == subscriber_uid)
            .cloned())
    }

    async fn insert_subscriber(
        &self,
        new_subscriber: &NewSubscriber,
    ) -> Result<Subscriber, StoreError> {
        self.tables().insert_subscriber(new_subscriber)
    }

    async fn update_subscriber(
        &self,
        subscriber: &Subscriber,
    ) -> Result<Subscriber, StoreError> {
        self.tables().update_subscriber(subscriber)
    }

    async fn insert_with_values(
        &self,
        new_subscriber: &NewSubscriber,
        values: &FieldValues,
    ) -> Result<Subscriber, StoreError> {
        let mut tables = self.tables();
        let subscriber = tables.insert_subscriber(new_subscriber)?;
        tables.replace_values(&subscriber, values);
        Ok(subscriber)
    }

    async fn update_with_values(
        &self,
        subscriber: &Subscriber,
        values: &FieldValues,
    ) -> Result<Subscriber, StoreError> {
        let mut tables = self.tables();
        let subscriber = tables.update_subscriber(subscriber)?;
        tables.replace_values(&subscriber, values);
        Ok(subscriber)
    }

    async fn delete_subscriber(
        &self,
        subscriber_id: SubscriberId,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables();
        tables.subscribers.remove(&subscriber_id);
        tables.values.retain(|(id, _), _| *id != subscriber_id);
        Ok(())
    }

    async fn field_values(
        &self,
        subscriber_id: SubscriberId,
    ) -> Result<FieldValues, StoreError> {
        Ok(self
            .tables()
            .values
            .iter()
            .filter(|((id, _), _)| *id == subscriber_id)
            .map(|((_, tag), values)| (tag.clone(), values.clone()))
            .collect())
    }

    async fn page_subscribers(
        &self,
        list_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Subscriber>, StoreError> {
        Ok(self
            .tables()
            .subscribers
            .values()
            .filter(|s| s.list_id == list_id)
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn blacklist_entries(
        &self,
        customer_id: i64,
    ) -> Result<Vec<BlacklistEntry>, StoreError> {
        Ok(self
            .tables()
            .blacklist
            .iter()
            .filter(|e| match e.scope {
                BlacklistScope::Global => true,
                BlacklistScope::Customer(owner) => owner == customer_id,
            })
            .cloned()
            .collect())
    }

    async fn delivery_servers(
        &self,
        customer_id: i64,
    ) -> Result<Vec<DeliveryServer>, StoreError> {
        Ok(self
            .tables()
            .servers
            .iter()
            .filter(|s| s.customer_id.map_or(true, |owner| owner == customer_id))
            .cloned()
            .collect())
    }

    async fn add_customer_message(
        &self,
        customer_id: i64,
        title: &str,
        message: &str,
    ) -> Result<(), StoreError> {
        self.tables().messages.push(CustomerMessage {
            customer_id,
            title: title.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }
}
