use std::collections::HashSet;
use std::sync::Arc;

use rand::distributions::WeightedIndex;
use rand::prelude::Distribution;

use crate::domain::DeliveryServer;
use crate::domain::MailList;
use crate::domain::ServerId;
use crate::email_client::EmailTransport;
use crate::email_client::OutgoingEmail;
use crate::store::Store;

/// Chooses the next server to try. Implementations must never return a server
/// whose id is in `tried`.
pub trait ServerRotation: Send + Sync {
    fn pick(
        &self,
        customer_id: i64,
        candidates: &[DeliveryServer],
        tried: &HashSet<ServerId>,
    ) -> Option<DeliveryServer>;
}

/// Servers owned by the customer are preferred; system servers are only
/// considered once none of the customer's own is left. Within a group, the
/// draw is weighted by `probability`.
#[derive(Default)]
pub struct WeightedRotation;

impl ServerRotation for WeightedRotation {
    fn pick(
        &self,
        customer_id: i64,
        candidates: &[DeliveryServer],
        tried: &HashSet<ServerId>,
    ) -> Option<DeliveryServer> {
        let usable: Vec<&DeliveryServer> = candidates
            .iter()
            .filter(|s| s.is_usable_by(customer_id) && !tried.contains(&s.server_id))
            .collect();
        let own: Vec<&DeliveryServer> = usable
            .iter()
            .copied()
            .filter(|s| s.customer_id == Some(customer_id))
            .collect();
        let pool = match own.is_empty() {
            true => usable,
            false => own,
        };
        if pool.is_empty() {
            return None;
        }

        // a weight of 0 would make `WeightedIndex` reject the whole set
        let weights = pool.iter().map(|s| s.probability.max(1));
        let idx = match WeightedIndex::new(weights) {
            Ok(dist) => dist.sample(&mut rand::thread_rng()),
            Err(_) => 0,
        };
        pool.get(idx).map(|s| (*s).clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent { server_id: ServerId, attempts: usize },
    Failed { attempts: usize },
}

/// Sends one email on behalf of a list, failing over between servers.
///
/// Delivery problems are reported to the operator log and to the customer's
/// messages, never to the caller: a subscriber admitted before the send stays
/// admitted.
#[derive(Clone)]
pub struct DeliveryServerSelector {
    store: Store,
    rotation: Arc<dyn ServerRotation>,
    transport: Arc<dyn EmailTransport>,
    max_attempts: usize,
}

impl DeliveryServerSelector {
    pub fn new(
        store: Store,
        rotation: Arc<dyn ServerRotation>,
        transport: Arc<dyn EmailTransport>,
        max_attempts: usize,
    ) -> Self {
        Self {
            store,
            rotation,
            transport,
            max_attempts,
        }
    }

    async fn candidates(
        &self,
        customer_id: i64,
    ) -> Vec<DeliveryServer> {
        match self.store.delivery_servers(customer_id).await {
            Ok(servers) => servers,
            Err(e) => {
                tracing::error!(error.cause_chain = ?e, "could not load delivery servers");
                vec![]
            }
        }
    }

    /// Whether at least one server could be picked for `list` right now
    pub async fn has_available_server(
        &self,
        list: &MailList,
    ) -> bool {
        let candidates = self.candidates(list.customer_id).await;
        self.rotation
            .pick(list.customer_id, &candidates, &HashSet::new())
            .is_some()
    }

    #[tracing::instrument(
        name = "Delivering email",
        skip(self, list, email),
        fields(list_uid = %list.list_uid, recipient = %email.to)
    )]
    pub async fn send(
        &self,
        list: &MailList,
        email: &OutgoingEmail,
    ) -> DeliveryOutcome {
        let candidates = self.candidates(list.customer_id).await;
        let mut tried = HashSet::new();
        let mut attempts = 0;

        while attempts < self.max_attempts {
            let Some(server) = self.rotation.pick(list.customer_id, &candidates, &tried) else {
                break;
            };
            attempts += 1;
            match self.transport.send(&server, email).await {
                Ok(()) => {
                    return DeliveryOutcome::Sent {
                        server_id: server.server_id,
                        attempts,
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        error.cause_chain = ?e,
                        server_id = server.server_id,
                        attempt = attempts,
                        "delivery server failed, trying the next one"
                    );
                    tried.insert(server.server_id);
                }
            }
        }

        tracing::error!(
            customer_id = list.customer_id,
            attempts,
            "no suitable delivery server, email to {} dropped",
            email.to
        );
        let message = format!(
            "No suitable delivery server has been found to send the email \"{}\" for the list \"{}\".",
            email.subject, list.name
        );
        if let Err(e) = self
            .store
            .add_customer_message(list.customer_id, "No suitable delivery server", &message)
            .await
        {
            tracing::error!(error.cause_chain = ?e, "could not record customer message");
        }
        DeliveryOutcome::Failed { attempts }
    }
}
