use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

/// Tag of the field every list carries
pub const EMAIL_TAG: &str = "EMAIL";

/// Field values of one subscriber, keyed by tag. A field may hold several
/// values.
pub type FieldValues = BTreeMap<String, Vec<String>>;

/// Per-field validation messages, keyed by tag
pub type FieldErrors = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldVisibility {
    Visible,
    Hidden,
}

impl FieldVisibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Visible => "visible",
            Self::Hidden => "hidden",
        }
    }
}

impl Display for FieldVisibility {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldVisibility {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "visible" => Ok(Self::Visible),
            "hidden" => Ok(Self::Hidden),
            other => Err(format!("{other:?} is not a valid field visibility")),
        }
    }
}

/// One entry of a list's field schema
#[derive(Debug, Clone, PartialEq)]
pub struct CustomFieldDefinition {
    pub field_id: i64,
    pub list_id: i64,
    pub tag: String,
    pub label: String,
    pub required: bool,
    /// May reference subscriber attributes, e.g. `[IP]`
    pub default_value: Option<String>,
    pub visibility: FieldVisibility,
    pub sort_order: i32,
}

/// Field definition before the store assigns ids
#[derive(Debug, Clone)]
pub struct NewField {
    pub tag: String,
    pub label: String,
    pub required: bool,
    pub default_value: Option<String>,
    pub visibility: FieldVisibility,
    pub sort_order: i32,
}

impl NewField {
    pub fn new(
        tag: &str,
        label: &str,
    ) -> Self {
        Self {
            tag: tag.to_string(),
            label: label.to_string(),
            required: false,
            default_value: None,
            visibility: FieldVisibility::Visible,
            sort_order: 0,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(
        mut self,
        default_value: &str,
    ) -> Self {
        self.default_value = Some(default_value.to_string());
        self
    }

    /// The field every list is created with
    pub fn email() -> Self { Self::new(EMAIL_TAG, "Email").required() }
}
