use async_trait::async_trait;
use secrecy::Secret;
use sqlx::postgres::PgRow;
use sqlx::PgPool;
use sqlx::Postgres;
use sqlx::Row;
use sqlx::Transaction;
use uuid::Uuid;

use super::StoreError;
use super::SubscriberStore;
use crate::domain::BlacklistEntry;
use crate::domain::BlacklistScope;
use crate::domain::BlacklistZone;
use crate::domain::CustomFieldDefinition;
use crate::domain::Customer;
use crate::domain::DeliveryServer;
use crate::domain::FieldValues;
use crate::domain::MailList;
use crate::domain::NewSubscriber;
use crate::domain::Quota;
use crate::domain::Subscriber;
use crate::domain::SubscriberId;

const SUBSCRIBER_COLUMNS: &str = "subscriber_id, subscriber_uid, list_id, email, status, source, \
                                  ip_address, date_added, last_updated";

const LIST_COLUMNS: &str = "list_id, list_uid, customer_id, name, opt_in, requires_approval, \
                            welcome_email, from_name, from_email, notification_recipients, \
                            notify_on_subscribe";

/// Queries are checked at runtime (`sqlx::query`, not `sqlx::query!`), so the
/// crate builds without a live database. Schema: `migrations/`.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
}

fn parse_column<T>(
    row: &PgRow,
    column: &str,
) -> Result<T, StoreError>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.try_get(column)?;
    raw.parse::<T>().map_err(|e| anyhow::anyhow!("{column}: {e}").into())
}

fn subscriber_from_row(row: &PgRow) -> Result<Subscriber, StoreError> {
    Ok(Subscriber {
        subscriber_id: row.try_get("subscriber_id")?,
        subscriber_uid: row.try_get("subscriber_uid")?,
        list_id: row.try_get("list_id")?,
        email: row.try_get("email")?,
        status: parse_column(row, "status")?,
        source: parse_column(row, "source")?,
        ip_address: row.try_get("ip_address")?,
        date_added: row.try_get("date_added")?,
        last_updated: row.try_get("last_updated")?,
    })
}

fn list_from_row(row: &PgRow) -> Result<MailList, StoreError> {
    Ok(MailList {
        list_id: row.try_get("list_id")?,
        list_uid: row.try_get("list_uid")?,
        customer_id: row.try_get("customer_id")?,
        name: row.try_get("name")?,
        opt_in: parse_column(row, "opt_in")?,
        requires_approval: row.try_get("requires_approval")?,
        welcome_email: row.try_get("welcome_email")?,
        from_name: row.try_get("from_name")?,
        from_email: row.try_get("from_email")?,
        notification_recipients: row.try_get("notification_recipients")?,
        notify_on_subscribe: row.try_get("notify_on_subscribe")?,
    })
}

/// Maps the unique (list_id, email) violation to `StoreError::Duplicate`
fn map_unique_violation(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate,
        _ => StoreError::Database(e),
    }
}

type PgTransaction = Transaction<'static, Postgres>;

async fn insert_subscriber_row(
    transaction: &mut PgTransaction,
    new_subscriber: &NewSubscriber,
) -> Result<Subscriber, StoreError> {
    let query = format!(
        r#"
        INSERT INTO list_subscribers
            (subscriber_uid, list_id, email, status, source, ip_address, date_added, last_updated)
        VALUES
            ($1, $2, $3, $4, $5, $6, now(), now())
        ON CONFLICT (list_id, (lower(email))) DO NOTHING
        RETURNING {SUBSCRIBER_COLUMNS}
        "#
    );
    let row = sqlx::query(&query)
        .bind(Uuid::new_v4())
        .bind(new_subscriber.list_id)
        .bind(new_subscriber.email.as_ref())
        .bind(new_subscriber.status.as_str())
        .bind(new_subscriber.source.as_str())
        .bind(new_subscriber.ip_address.as_deref())
        .fetch_optional(&mut **transaction)
        .await
        .map_err(|e| {
            tracing::error!("bad query: {e:?}");
            e
        })?;

    match row {
        Some(row) => subscriber_from_row(&row),
        // the conflict clause swallowed the insert
        None => Err(StoreError::Duplicate),
    }
}

/// Email, status, source and ip; bumps `last_updated`
async fn update_subscriber_row(
    transaction: &mut PgTransaction,
    subscriber: &Subscriber,
) -> Result<Subscriber, StoreError> {
    let query = format!(
        r#"
        UPDATE list_subscribers
        SET email = $2, status = $3, source = $4, ip_address = $5, last_updated = now()
        WHERE subscriber_id = $1
        RETURNING {SUBSCRIBER_COLUMNS}
        "#
    );
    let row = sqlx::query(&query)
        .bind(subscriber.subscriber_id)
        .bind(&subscriber.email)
        .bind(subscriber.status.as_str())
        .bind(subscriber.source.as_str())
        .bind(subscriber.ip_address.as_deref())
        .fetch_one(&mut **transaction)
        .await
        .map_err(map_unique_violation)?;
    subscriber_from_row(&row)
}

/// Replace the values of every tag present in `values`; tags unknown to the
/// list are skipped
async fn replace_field_values(
    transaction: &mut PgTransaction,
    subscriber: &Subscriber,
    values: &FieldValues,
) -> Result<(), StoreError> {
    for (tag, tag_values) in values {
        let field_id: Option<i64> =
            sqlx::query_scalar("SELECT field_id FROM list_fields WHERE list_id = $1 AND tag = $2")
                .bind(subscriber.list_id)
                .bind(tag)
                .fetch_optional(&mut **transaction)
                .await?;
        let Some(field_id) = field_id else {
            continue;
        };

        sqlx::query("DELETE FROM list_field_values WHERE field_id = $1 AND subscriber_id = $2")
            .bind(field_id)
            .bind(subscriber.subscriber_id)
            .execute(&mut **transaction)
            .await?;
        for value in tag_values {
            sqlx::query(
                "INSERT INTO list_field_values (field_id, subscriber_id, value) VALUES ($1, $2, \
                 $3)",
            )
            .bind(field_id)
            .bind(subscriber.subscriber_id)
            .bind(value)
            .execute(&mut **transaction)
            .await?;
        }
    }
    Ok(())
}

#[async_trait]
impl SubscriberStore for PostgresStore {
    #[tracing::instrument(name = "Fetching customer by api key", skip_all)]
    async fn customer_by_api_key(
        &self,
        api_key: &str,
    ) -> Result<Option<Customer>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT customer_id, api_key, max_lists, max_subscribers, max_subscribers_per_list
            FROM customers
            WHERE api_key = $1
            "#,
        )
        .bind(api_key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| -> Result<Customer, StoreError> {
            Ok(Customer {
                customer_id: r.try_get("customer_id")?,
                api_key: r.try_get("api_key")?,
                quota: Quota {
                    max_lists: r.try_get("max_lists")?,
                    max_subscribers: r.try_get("max_subscribers")?,
                    max_subscribers_per_list: r.try_get("max_subscribers_per_list")?,
                },
            })
        })
        .transpose()
    }

    #[tracing::instrument(name = "Fetching list", skip(self))]
    async fn list_by_uid(
        &self,
        customer_id: i64,
        list_uid: &str,
    ) -> Result<Option<MailList>, StoreError> {
        let query =
            format!("SELECT {LIST_COLUMNS} FROM lists WHERE list_uid = $1 AND customer_id = $2");
        sqlx::query(&query)
            .bind(list_uid)
            .bind(customer_id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(list_from_row)
            .transpose()
    }

    #[tracing::instrument(name = "Fetching list by uid", skip(self))]
    async fn list_by_public_uid(
        &self,
        list_uid: &str,
    ) -> Result<Option<MailList>, StoreError> {
        let query = format!("SELECT {LIST_COLUMNS} FROM lists WHERE list_uid = $1");
        sqlx::query(&query)
            .bind(list_uid)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(list_from_row)
            .transpose()
    }

    #[tracing::instrument(name = "Fetching lists of customer", skip(self))]
    async fn lists_of_customer(
        &self,
        customer_id: i64,
    ) -> Result<Vec<MailList>, StoreError> {
        let query = format!("SELECT {LIST_COLUMNS} FROM lists WHERE customer_id = $1 ORDER BY list_id");
        sqlx::query(&query)
            .bind(customer_id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(list_from_row)
            .collect()
    }

    #[tracing::instrument(name = "Fetching list fields", skip(self))]
    async fn list_fields(
        &self,
        list_id: i64,
    ) -> Result<Vec<CustomFieldDefinition>, StoreError> {
        sqlx::query(
            r#"
            SELECT field_id, list_id, tag, label, required, default_value, visibility, sort_order
            FROM list_fields
            WHERE list_id = $1
            ORDER BY sort_order, field_id
            "#,
        )
        .bind(list_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|r| -> Result<CustomFieldDefinition, StoreError> {
            Ok(CustomFieldDefinition {
                field_id: r.try_get("field_id")?,
                list_id: r.try_get("list_id")?,
                tag: r.try_get("tag")?,
                label: r.try_get("label")?,
                required: r.try_get("required")?,
                default_value: r.try_get("default_value")?,
                visibility: parse_column(r, "visibility")?,
                sort_order: r.try_get("sort_order")?,
            })
        })
        .collect()
    }

    #[tracing::instrument(name = "Counting subscribers of customer", skip(self))]
    async fn count_customer_subscribers(
        &self,
        customer_id: i64,
    ) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM list_subscribers s
            JOIN lists l USING (list_id)
            WHERE l.customer_id = $1
            "#,
        )
        .bind(customer_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    #[tracing::instrument(name = "Counting subscribers of list", skip(self))]
    async fn count_list_subscribers(
        &self,
        list_id: i64,
    ) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM list_subscribers WHERE list_id = $1")
            .bind(list_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    #[tracing::instrument(name = "Looking up subscriber by email", skip(self))]
    async fn find_by_email(
        &self,
        list_id: i64,
        email: &str,
    ) -> Result<Option<Subscriber>, StoreError> {
        let query = format!(
            "SELECT {SUBSCRIBER_COLUMNS} FROM list_subscribers WHERE list_id = $1 AND lower(email) = \
             lower($2)"
        );
        sqlx::query(&query)
            .bind(list_id)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(subscriber_from_row)
            .transpose()
    }

    #[tracing::instrument(name = "Looking up subscriber by uid", skip(self))]
    async fn find_by_uid(
        &self,
        list_id: i64,
        subscriber_uid: Uuid,
    ) -> Result<Option<Subscriber>, StoreError> {
        let query = format!(
            "SELECT {SUBSCRIBER_COLUMNS} FROM list_subscribers WHERE list_id = $1 AND \
             subscriber_uid = $2"
        );
        sqlx::query(&query)
            .bind(list_id)
            .bind(subscriber_uid)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(subscriber_from_row)
            .transpose()
    }

    #[tracing::instrument(name = "INSERTing new subscriber", skip_all)]
    async fn insert_subscriber(
        &self,
        new_subscriber: &NewSubscriber,
    ) -> Result<Subscriber, StoreError> {
        let mut transaction = self.pool.begin().await?;
        let subscriber = insert_subscriber_row(&mut transaction, new_subscriber).await?;
        transaction.commit().await?;
        Ok(subscriber)
    }

    #[tracing::instrument(name = "UPDATEing subscriber", skip_all)]
    async fn update_subscriber(
        &self,
        subscriber: &Subscriber,
    ) -> Result<Subscriber, StoreError> {
        let mut transaction = self.pool.begin().await?;
        let subscriber = update_subscriber_row(&mut transaction, subscriber).await?;
        transaction.commit().await?;
        Ok(subscriber)
    }

    #[tracing::instrument(name = "INSERTing new subscriber with field values", skip_all)]
    async fn insert_with_values(
        &self,
        new_subscriber: &NewSubscriber,
        values: &FieldValues,
    ) -> Result<Subscriber, StoreError> {
        let mut transaction = self.pool.begin().await?;
        let subscriber = insert_subscriber_row(&mut transaction, new_subscriber).await?;
        replace_field_values(&mut transaction, &subscriber, values).await?;
        transaction.commit().await?;
        Ok(subscriber)
    }

    #[tracing::instrument(name = "UPDATEing subscriber with field values", skip_all)]
    async fn update_with_values(
        &self,
        subscriber: &Subscriber,
        values: &FieldValues,
    ) -> Result<Subscriber, StoreError> {
        let mut transaction = self.pool.begin().await?;
        let subscriber = update_subscriber_row(&mut transaction, subscriber).await?;
        replace_field_values(&mut transaction, &subscriber, values).await?;
        transaction.commit().await?;
        Ok(subscriber)
    }

    #[tracing::instrument(name = "DELETEing subscriber", skip(self))]
    async fn delete_subscriber(
        &self,
        subscriber_id: SubscriberId,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM list_subscribers WHERE subscriber_id = $1")
            .bind(subscriber_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[tracing::instrument(name = "Fetching field values", skip(self))]
    async fn field_values(
        &self,
        subscriber_id: SubscriberId,
    ) -> Result<FieldValues, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT f.tag, v.value
            FROM list_field_values v
            JOIN list_fields f USING (field_id)
            WHERE v.subscriber_id = $1
            ORDER BY v.value_id
            "#,
        )
        .bind(subscriber_id)
        .fetch_all(&self.pool)
        .await?;

        let mut values = FieldValues::new();
        for row in rows {
            values
                .entry(row.try_get("tag")?)
                .or_insert_with(Vec::new)
                .push(row.try_get("value")?);
        }
        Ok(values)
    }

    #[tracing::instrument(name = "Paging subscribers", skip(self))]
    async fn page_subscribers(
        &self,
        list_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Subscriber>, StoreError> {
        let query = format!(
            "SELECT {SUBSCRIBER_COLUMNS} FROM list_subscribers WHERE list_id = $1 ORDER BY \
             subscriber_id OFFSET $2 LIMIT $3"
        );
        sqlx::query(&query)
            .bind(list_id)
            .bind(offset)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(subscriber_from_row)
            .collect()
    }

    #[tracing::instrument(name = "Fetching blacklist", skip(self))]
    async fn blacklist_entries(
        &self,
        customer_id: i64,
    ) -> Result<Vec<BlacklistEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT customer_id, pattern, zones
            FROM blacklist_entries
            WHERE customer_id IS NULL OR customer_id = $1
            "#,
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let owner: Option<i64> = row.try_get("customer_id")?;
            let zones: Vec<String> = row.try_get("zones")?;
            entries.push(BlacklistEntry {
                pattern: row.try_get("pattern")?,
                scope: owner.map_or(BlacklistScope::Global, BlacklistScope::Customer),
                zones: zones
                    .iter()
                    .filter_map(|z| z.parse::<BlacklistZone>().ok())
                    .collect(),
            });
        }
        Ok(entries)
    }

    #[tracing::instrument(name = "Fetching delivery servers", skip(self))]
    async fn delivery_servers(
        &self,
        customer_id: i64,
    ) -> Result<Vec<DeliveryServer>, StoreError> {
        sqlx::query(
            r#"
            SELECT server_id, customer_id, name, base_url, token, from_email, probability, active
            FROM delivery_servers
            WHERE customer_id IS NULL OR customer_id = $1
            ORDER BY server_id
            "#,
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|r| -> Result<DeliveryServer, StoreError> {
            let probability: i32 = r.try_get("probability")?;
            Ok(DeliveryServer {
                server_id: r.try_get("server_id")?,
                customer_id: r.try_get("customer_id")?,
                name: r.try_get("name")?,
                base_url: r.try_get("base_url")?,
                token: Secret::new(r.try_get("token")?),
                from_email: r.try_get("from_email")?,
                probability: probability.clamp(1, 100) as u32,
                active: r.try_get("active")?,
            })
        })
        .collect()
    }

    #[tracing::instrument(name = "Adding customer message", skip(self, message))]
    async fn add_customer_message(
        &self,
        customer_id: i64,
        title: &str,
        message: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO customer_messages (customer_id, title, message) VALUES ($1, $2, $3)")
            .bind(customer_id)
            .bind(title)
            .bind(message)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
