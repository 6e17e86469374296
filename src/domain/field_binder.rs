use std::collections::BTreeMap;

use chrono::DateTime;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Captures;
use regex::Regex;

use super::CustomFieldDefinition;
use super::FieldErrors;
use super::FieldValues;

static DEFAULT_VALUE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([A-Z_]+)\]").expect("static pattern"));

/// Raw values of a submission, keyed by tag
pub type SubmittedFields = BTreeMap<String, Vec<String>>;

/// Subscriber attributes that default-value templates may reference
pub struct BindContext<'a> {
    pub email: &'a str,
    pub ip_address: Option<&'a str>,
    pub source: &'a str,
    pub list_name: &'a str,
    pub now: DateTime<Utc>,
}

impl BindContext<'_> {
    /// Replace `[TAG]`s of `template`; unknown tags are left as they are
    fn render(
        &self,
        template: &str,
    ) -> String {
        DEFAULT_VALUE_TAG
            .replace_all(template, |caps: &Captures| match &caps[1] {
                "EMAIL" => self.email.to_string(),
                "IP" | "IP_ADDRESS" => self.ip_address.unwrap_or_default().to_string(),
                "SOURCE" => self.source.to_string(),
                "LIST_NAME" => self.list_name.to_string(),
                "DATE" => self.now.format("%Y-%m-%d").to_string(),
                "DATETIME" => self.now.format("%Y-%m-%d %H:%M:%S").to_string(),
                _ => caps[0].to_string(),
            })
            .into_owned()
    }
}

/// Maps submitted values onto a list's field schema.
pub struct SubscriberFieldBinder {
    max_length: usize,
}

impl SubscriberFieldBinder {
    pub fn new(max_length: usize) -> Self { Self { max_length } }

    /// Bind every field of the schema. Absent fields fall back to their
    /// default value; required fields left blank are reported, all of them at
    /// once.
    pub fn bind(
        &self,
        fields: &[CustomFieldDefinition],
        submitted: &SubmittedFields,
        ctx: &BindContext<'_>,
    ) -> Result<FieldValues, FieldErrors> {
        self.bind_fields(fields, submitted, ctx, false)
    }

    /// Bind only the fields present in `submitted`; the others are left out of
    /// the result entirely (absent is not the same as cleared).
    pub fn bind_partial(
        &self,
        fields: &[CustomFieldDefinition],
        submitted: &SubmittedFields,
        ctx: &BindContext<'_>,
    ) -> Result<FieldValues, FieldErrors> {
        self.bind_fields(fields, submitted, ctx, true)
    }

    fn bind_fields(
        &self,
        fields: &[CustomFieldDefinition],
        submitted: &SubmittedFields,
        ctx: &BindContext<'_>,
        partial: bool,
    ) -> Result<FieldValues, FieldErrors> {
        let mut values = FieldValues::new();
        let mut errors = FieldErrors::new();

        for field in fields {
            let given = submitted.get(&field.tag);
            if partial && given.is_none() {
                continue;
            }

            let mut bound: Vec<String> = given
                .into_iter()
                .flatten()
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(|v| self.truncate(v))
                .collect();

            // a default only fills in for a field that was not sent at all
            if bound.is_empty() && given.is_none() {
                if let Some(template) = &field.default_value {
                    let rendered = ctx.render(template);
                    if !rendered.trim().is_empty() {
                        bound.push(self.truncate(rendered.trim()));
                    }
                }
            }

            if bound.is_empty() {
                if field.required {
                    errors.insert(field.tag.clone(), format!("{} cannot be blank.", field.label));
                }
                continue;
            }
            values.insert(field.tag.clone(), bound);
        }

        match errors.is_empty() {
            true => Ok(values),
            false => Err(errors),
        }
    }

    /// Cut to `max_length` characters without splitting a UTF-8 sequence
    fn truncate(
        &self,
        value: &str,
    ) -> String {
        match value.char_indices().nth(self.max_length) {
            Some((end, _)) => value[..end].to_string(),
            None => value.to_string(),
        }
    }
}
