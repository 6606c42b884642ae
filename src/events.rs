//! Ledger event propagation.
//!
//! The bridge subscribes to an allow-listed set of contract events and
//! republishes each emission on a [`NotificationBus`] as
//! `contract:<EventName>`. Consumers (dashboards, list views, route guards)
//! subscribe to the bus and decide for themselves what to refresh; the bridge
//! carries no business logic.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::Serialize;
use serde_json::Value;

use crate::chain::{ContractBinding, EventListener, ListenerId, Registry};
use crate::connection::BindingSet;

/// Namespace prefix for notifications republished from the ledger.
pub const CONTRACT_NOTIFICATION_PREFIX: &str = "contract:";

/// Local notification name for a contract event.
pub fn notification_name(event: &str) -> String {
    format!("{CONTRACT_NOTIFICATION_PREFIX}{event}")
}

/// A local notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    /// Bus key, e.g. `contract:UserVerified`.
    pub name: String,
    pub registry: Registry,
    pub event: String,
    /// Raw emitted arguments.
    pub args: Vec<Value>,
}

pub type NotificationHandler = Arc<dyn Fn(&Notification) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Process-wide publish/subscribe medium keyed by notification name.
pub trait NotificationBus: Send + Sync {
    fn publish(&self, notification: Notification);

    fn subscribe(&self, name: &str, handler: NotificationHandler) -> SubscriptionId;

    /// Returns `false` if `id` was not subscribed.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

/// In-process bus. Handlers run synchronously in registration order.
#[derive(Default)]
pub struct LocalBus {
    next_id: AtomicU64,
    subscribers: RwLock<Vec<(SubscriptionId, String, NotificationHandler)>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl NotificationBus for LocalBus {
    fn publish(&self, notification: Notification) {
        // Snapshot first so handlers may subscribe or unsubscribe.
        let handlers: Vec<NotificationHandler> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, name, _)| *name == notification.name)
            .map(|(_, _, handler)| handler.clone())
            .collect();

        tracing::trace!(
            name = %notification.name,
            handlers = handlers.len(),
            "publishing notification"
        );
        for handler in handlers {
            handler(&notification);
        }
    }

    fn subscribe(&self, name: &str, handler: NotificationHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, name.to_string(), handler));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|(existing, _, _)| *existing != id);
        subscribers.len() != before
    }
}

/// Events to bridge, per registry.
pub type AllowList = BTreeMap<Registry, Vec<String>>;

/// Events the registries emit that consumers refresh on.
pub fn default_allow_list() -> AllowList {
    let entries: [(Registry, &[&str]); 4] = [
        (
            Registry::Identity,
            &[
                "UserRegistered",
                "UserVerified",
                "UserRejected",
                "InspectorAdded",
                "InspectorRemoved",
            ],
        ),
        (
            Registry::Asset,
            &[
                "LandRegistered",
                "LandVerified",
                "LandForSaleChanged",
                "LandRemoved",
                "OwnershipTransferred",
            ],
        ),
        (
            Registry::Transaction,
            &[
                "PurchaseRequested",
                "RequestAccepted",
                "RequestRejected",
                "PaymentCompleted",
            ],
        ),
        (Registry::Dispute, &["DisputeRaised", "DisputeResolved"]),
    ];
    entries
        .into_iter()
        .map(|(registry, events)| (registry, events.iter().map(|e| e.to_string()).collect()))
        .collect()
}

/// Every notification name an allow list can produce.
pub fn notification_names(allow_list: &AllowList) -> BTreeSet<String> {
    allow_list
        .values()
        .flatten()
        .map(|event| notification_name(event))
        .collect()
}

struct Registration {
    binding: Arc<dyn ContractBinding>,
    event: String,
    id: ListenerId,
}

/// Listeners installed by one [`EventBridge::attach`] call.
///
/// Dropping the handle detaches it.
pub struct BridgeHandle {
    registrations: Mutex<Vec<Registration>>,
}

impl BridgeHandle {
    /// Remove every listener this bridge installed. Idempotent.
    pub fn detach(&self) {
        let registrations = std::mem::take(
            &mut *self
                .registrations
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        if registrations.is_empty() {
            return;
        }
        tracing::debug!(listeners = registrations.len(), "detaching event bridge");
        for registration in registrations {
            registration
                .binding
                .unsubscribe(&registration.event, registration.id);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Republishes allow-listed contract events on a notification bus.
pub struct EventBridge;

impl EventBridge {
    /// Subscribe once to every allow-listed event the bound contracts declare.
    ///
    /// Events missing from a contract's interface and registries missing from
    /// the binding set are skipped; deployments on older interfaces simply
    /// produce fewer notifications.
    pub fn attach(
        bindings: &BindingSet,
        allow_list: &AllowList,
        bus: Arc<dyn NotificationBus>,
    ) -> BridgeHandle {
        let mut registrations = Vec::new();

        for (registry, events) in allow_list {
            let Some(binding) = bindings.get(*registry) else {
                tracing::debug!(%registry, "registry not bound; skipping its events");
                continue;
            };

            let unique: BTreeSet<&str> = events.iter().map(String::as_str).collect();
            for event in unique {
                if !binding.has_event(event) {
                    tracing::debug!(%registry, event, "event not in contract interface; skipping");
                    continue;
                }

                let listener = republisher(bus.clone(), *registry, event);
                let id = binding.subscribe(event, listener);
                registrations.push(Registration {
                    binding: binding.clone(),
                    event: event.to_string(),
                    id,
                });
            }
        }

        tracing::info!(listeners = registrations.len(), "event bridge attached");
        BridgeHandle {
            registrations: Mutex::new(registrations),
        }
    }
}

fn republisher(bus: Arc<dyn NotificationBus>, registry: Registry, event: &str) -> EventListener {
    let event = event.to_string();
    let name = notification_name(&event);
    Arc::new(move |args: &[Value]| {
        bus.publish(Notification {
            name: name.clone(),
            registry,
            event: event.clone(),
            args: args.to_vec(),
        });
    })
}
