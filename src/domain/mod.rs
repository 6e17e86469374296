mod blacklist;
mod custom_field;
mod customer;
mod delivery_server;
mod duplicate;
mod field_binder;
mod mail_list;
mod quota;
mod subscriber;
mod subscriber_email;

// allow external `use` statements to skip the submodule
pub use blacklist::BlacklistEntry;
pub use blacklist::BlacklistFilter;
pub use blacklist::BlacklistScope;
pub use blacklist::BlacklistZone;
pub use custom_field::CustomFieldDefinition;
pub use custom_field::FieldErrors;
pub use custom_field::FieldValues;
pub use custom_field::FieldVisibility;
pub use custom_field::NewField;
pub use custom_field::EMAIL_TAG;
pub use customer::Customer;
pub use delivery_server::DeliveryServer;
pub use delivery_server::ServerId;
pub use duplicate::DuplicateEmailResolver;
pub use duplicate::Resolution;
pub use field_binder::BindContext;
pub use field_binder::SubmittedFields;
pub use field_binder::SubscriberFieldBinder;
pub use mail_list::MailList;
pub use mail_list::NewList;
pub use mail_list::OptIn;
pub use quota::Admission;
pub use quota::Quota;
pub use quota::QuotaGate;
pub use quota::UNLIMITED;
pub use subscriber::NewSubscriber;
pub use subscriber::Subscriber;
pub use subscriber::SubscriberId;
pub use subscriber::SubscriberSource;
pub use subscriber::SubscriberStatus;
pub use subscriber_email::SubscriberEmail;
