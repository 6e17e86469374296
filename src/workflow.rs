use crate::delivery::DeliveryServerSelector;
use crate::domain::FieldValues;
use crate::domain::MailList;
use crate::domain::OptIn;
use crate::domain::Subscriber;
use crate::domain::SubscriberStatus;
use crate::email_client::OutgoingEmail;
use crate::store::Store;
use crate::store::StoreError;

/// Where a freshly admitted subscriber ends up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    /// Waiting for a list owner to approve
    PendingApproval,
    /// Waiting for the subscriber to follow the confirmation link
    PendingConfirmation,
    Active,
}

/// Status a new (or resubscribing) row is written with. An explicit status
/// is honoured when it is one a subscriber may be created with; `unapproved`
/// only on a list that requires approval, as nothing would ever approve it
/// elsewhere.
pub fn initial_status(
    list: &MailList,
    requested: Option<SubscriberStatus>,
) -> SubscriberStatus {
    match requested {
        Some(s @ (SubscriberStatus::Confirmed | SubscriberStatus::Unconfirmed)) => s,
        Some(SubscriberStatus::Unapproved) if list.requires_approval => SubscriberStatus::Unapproved,
        _ if list.requires_approval => SubscriberStatus::Unapproved,
        _ => match list.opt_in {
            OptIn::Double => SubscriberStatus::Unconfirmed,
            OptIn::Single => SubscriberStatus::Confirmed,
        },
    }
}

/// Post-persistence routing: decides the state of a subscriber and sends
/// whatever emails that state calls for. Send failures are absorbed by the
/// selector and never change the state.
#[derive(Clone)]
pub struct ApprovalWorkflow {
    store: Store,
    selector: DeliveryServerSelector,
    base_url: String,
}

impl ApprovalWorkflow {
    pub fn new(
        store: Store,
        selector: DeliveryServerSelector,
        base_url: String,
    ) -> Self {
        Self {
            store,
            selector,
            base_url,
        }
    }

    pub fn confirmation_link(
        &self,
        list: &MailList,
        subscriber: &Subscriber,
    ) -> String {
        format!(
            "{}/lists/{}/confirm-subscribe/{}",
            self.base_url.trim_end_matches('/'),
            list.list_uid,
            subscriber.subscriber_uid
        )
    }

    /// `subscriber` must already be persisted. Its status may be rewritten
    /// (approval requested but nobody can be emailed about it).
    #[tracing::instrument(
        name = "Routing new subscriber",
        skip_all,
        fields(subscriber_uid = %subscriber.subscriber_uid, status = %subscriber.status)
    )]
    pub async fn run(
        &self,
        list: &MailList,
        subscriber: &mut Subscriber,
        values: &FieldValues,
    ) -> Result<WorkflowState, StoreError> {
        if list.requires_approval && subscriber.status == SubscriberStatus::Unapproved {
            if self.selector.has_available_server(list).await {
                for recipient in &list.notification_recipients {
                    let email = approval_request(list, subscriber, values, recipient);
                    self.selector.send(list, &email).await;
                }
                return Ok(WorkflowState::PendingApproval);
            }
            // nobody could ever be told about the request
            tracing::warn!("no delivery server for the approval request, confirming directly");
            subscriber.status = SubscriberStatus::Confirmed;
            *subscriber = self.store.update_subscriber(subscriber).await?;
        }

        if subscriber.status == SubscriberStatus::Unconfirmed && list.opt_in == OptIn::Double {
            let email = self.confirmation_request(list, subscriber);
            self.selector.send(list, &email).await;
            return Ok(WorkflowState::PendingConfirmation);
        }

        self.activate(list, subscriber, values).await;
        Ok(WorkflowState::Active)
    }

    /// Emails of a subscriber becoming active. Rows with any status other than
    /// confirmed get none.
    pub async fn activate(
        &self,
        list: &MailList,
        subscriber: &Subscriber,
        values: &FieldValues,
    ) {
        if subscriber.status != SubscriberStatus::Confirmed {
            return;
        }
        if list.notify_on_subscribe {
            for recipient in &list.notification_recipients {
                let email = created_notification(list, subscriber, values, recipient);
                self.selector.send(list, &email).await;
            }
        }
        if list.welcome_email {
            self.selector.send(list, &welcome(list, subscriber)).await;
        }
    }

    fn confirmation_request(
        &self,
        list: &MailList,
        subscriber: &Subscriber,
    ) -> OutgoingEmail {
        let link = self.confirmation_link(list, subscriber);
        OutgoingEmail {
            to: subscriber.email.clone(),
            subject: format!("Please confirm your subscription to {}", list.name),
            html_body: format!(
                "Please confirm your subscription to {} by clicking <a href=\"{link}\">here</a>.",
                list.name
            ),
            text_body: format!(
                "Please confirm your subscription to {} by visiting {link}",
                list.name
            ),
            from_name: Some(list.from_name.clone()),
            from_email: Some(list.from_email.clone()),
        }
    }
}

fn sender(
    list: &MailList,
    to: &str,
    subject: String,
    text_body: String,
) -> OutgoingEmail {
    OutgoingEmail {
        to: to.to_string(),
        subject,
        html_body: text_body.replace('\n', "<br />\n"),
        text_body,
        from_name: Some(list.from_name.clone()),
        from_email: Some(list.from_email.clone()),
    }
}

/// `TAG: a, b` per line
fn describe(values: &FieldValues) -> String {
    values
        .iter()
        .map(|(tag, v)| format!("{tag}: {}", v.join(", ")))
        .collect::<Vec<_>>()
        .join("\n")
}

fn approval_request(
    list: &MailList,
    subscriber: &Subscriber,
    values: &FieldValues,
    recipient: &str,
) -> OutgoingEmail {
    sender(
        list,
        recipient,
        format!("New subscriber awaiting approval in {}", list.name),
        format!(
            "{} asked to join {} and needs your approval.\n\n{}",
            subscriber.email,
            list.name,
            describe(values)
        ),
    )
}

fn created_notification(
    list: &MailList,
    subscriber: &Subscriber,
    values: &FieldValues,
    recipient: &str,
) -> OutgoingEmail {
    sender(
        list,
        recipient,
        format!("New subscriber in {}", list.name),
        format!(
            "{} has been added to {}.\n\n{}",
            subscriber.email,
            list.name,
            describe(values)
        ),
    )
}

fn welcome(
    list: &MailList,
    subscriber: &Subscriber,
) -> OutgoingEmail {
    sender(
        list,
        &subscriber.email,
        format!("Welcome to {}", list.name),
        format!("Thank you for subscribing to {}.", list.name),
    )
}
