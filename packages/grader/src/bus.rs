use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::Result;
use common::{DomainEvent, EventKind};
use tracing::{debug, error};

/// Receives domain events of the kinds it was subscribed to.
pub trait Subscriber: Send + Sync {
    /// Subscriber identifier, used in logs.
    fn id(&self) -> &str;

    fn on_event(&self, event: &DomainEvent) -> Result<()>;
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct FnSubscriber<F> {
    id: String,
    f: F,
}

impl<F> Subscriber for FnSubscriber<F>
where
    F: Fn(&DomainEvent) -> Result<()> + Send + Sync,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn on_event(&self, event: &DomainEvent) -> Result<()> {
        (self.f)(event)
    }
}

#[derive(Clone)]
struct Registration {
    id: SubscriptionId,
    subscriber: Arc<dyn Subscriber>,
}

/// Typed publish/subscribe bus keyed by event kind.
///
/// Subscribers of a kind run in registration order. A subscriber that fails
/// or panics is logged and skipped; the others and the publisher carry on.
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    subscribers: RwLock<HashMap<EventKind, Vec<Registration>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, kind: EventKind, subscriber: Arc<dyn Subscriber>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut map = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        map.entry(kind)
            .or_default()
            .push(Registration { id, subscriber });
        id
    }

    /// Subscribe a closure.
    pub fn subscribe_fn<F>(&self, kind: EventKind, id: impl Into<String>, f: F) -> SubscriptionId
    where
        F: Fn(&DomainEvent) -> Result<()> + Send + Sync + 'static,
    {
        self.subscribe(kind, Arc::new(FnSubscriber { id: id.into(), f }))
    }

    /// Returns false if the subscription was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut map = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        for list in map.values_mut() {
            if let Some(pos) = list.iter().position(|r| r.id == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Deliver `event` to every current subscriber of its kind.
    pub fn publish(&self, event: DomainEvent) {
        let kind = event.kind();
        // Snapshot so subscribers may (un)subscribe without deadlocking.
        let targets: Vec<Registration> = self
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        debug!(kind = %kind, subscribers = targets.len(), "Publishing event");

        for registration in &targets {
            let subscriber = &registration.subscriber;
            match catch_unwind(AssertUnwindSafe(|| subscriber.on_event(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(
                        kind = %kind,
                        subscriber = subscriber.id(),
                        error = %e,
                        "Subscriber failed, continuing"
                    );
                }
                Err(_) => {
                    error!(
                        kind = %kind,
                        subscriber = subscriber.id(),
                        "Subscriber panicked, continuing"
                    );
                }
            }
        }
    }
}
