use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use chrono::DateTime;
use chrono::Utc;
use tracing::debug;

use uipilot_common::mutex_lock_or_recover;
use uipilot_model::EventSource;
use uipilot_model::HandlerFn;
use uipilot_model::NodeRef;
use uipilot_model::Subscription;
use uipilot_model::UiValue;

use crate::error::ServiceError;

struct Registration {
    /// Strong reference: a registered element stays alive until the
    /// registration is dropped, so its invocation log stays reachable.
    source: NodeRef,
    event: Arc<EventSource>,
    event_name: String,
    subscription: Subscription,
    registered_at: DateTime<Utc>,
    log: Vec<Vec<UiValue>>,
}

/// Tracks remote event registrations and their invocation logs.
///
/// The map mutex is the only synchronization point: recorder handlers fire
/// on the UI thread with the event's own handler lock held, then take the
/// map lock to append. To keep that ordering acyclic the registrar never
/// subscribes or unsubscribes while holding the map lock.
///
/// Invocations fired between a handler's subscription and the completion
/// of its registration are not recorded.
pub struct EventRegistrar {
    inner: Arc<Mutex<HashMap<String, Registration>>>,
}

impl Default for EventRegistrar {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRegistrar {
    pub fn new() -> Self {
        EventRegistrar {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Attaches a recording handler to `element`'s event under the
    /// caller-chosen `event_id`.
    pub fn register(
        &self,
        event_id: &str,
        element: &NodeRef,
        event_name: &str,
    ) -> Result<(), ServiceError> {
        let event = element
            .event(event_name)
            .ok_or_else(|| ServiceError::UnknownEvent(event_name.to_string()))?;

        if let Some(reason) = event.shape().unsupported_reason() {
            return Err(ServiceError::UnsupportedEventShape {
                event: event_name.to_string(),
                reason,
            });
        }

        {
            let registrations = mutex_lock_or_recover(&self.inner);
            if registrations.contains_key(event_id) {
                return Err(ServiceError::DuplicateRegistration(event_id.to_string()));
            }
        }

        let subscription = event.subscribe(self.make_recorder(event_id));

        let mut registrations = mutex_lock_or_recover(&self.inner);
        match registrations.entry(event_id.to_string()) {
            Entry::Occupied(_) => {
                // Lost a race against a concurrent register with the same
                // id; back out our handler.
                drop(registrations);
                event.unsubscribe(subscription);
                Err(ServiceError::DuplicateRegistration(event_id.to_string()))
            }
            Entry::Vacant(slot) => {
                debug!(event_id, event = event_name, "event registered");
                slot.insert(Registration {
                    source: element.clone(),
                    event,
                    event_name: event_name.to_string(),
                    subscription,
                    registered_at: Utc::now(),
                    log: Vec::new(),
                });
                Ok(())
            }
        }
    }

    /// Detaches the handler and forgets the registration with its log.
    pub fn unregister(&self, event_id: &str) -> Result<(), ServiceError> {
        let registration = {
            let mut registrations = mutex_lock_or_recover(&self.inner);
            registrations
                .remove(event_id)
                .ok_or_else(|| ServiceError::UnknownRegistration(event_id.to_string()))?
        };

        debug!(
            event_id,
            event = registration.event_name.as_str(),
            element = registration.source.type_name(),
            invocations = registration.log.len(),
            "event unregistered"
        );

        if registration.event.unsubscribe(registration.subscription) {
            Ok(())
        } else {
            Err(ServiceError::DetachFailed(event_id.to_string()))
        }
    }

    /// Snapshot of every invocation recorded so far, oldest first. The log
    /// is never cleared by reading it.
    pub fn invocations(&self, event_id: &str) -> Result<Vec<Vec<UiValue>>, ServiceError> {
        let registrations = mutex_lock_or_recover(&self.inner);
        registrations
            .get(event_id)
            .map(|registration| registration.log.clone())
            .ok_or_else(|| ServiceError::UnknownRegistration(event_id.to_string()))
    }

    pub fn registered_at(&self, event_id: &str) -> Result<DateTime<Utc>, ServiceError> {
        let registrations = mutex_lock_or_recover(&self.inner);
        registrations
            .get(event_id)
            .map(|registration| registration.registered_at)
            .ok_or_else(|| ServiceError::UnknownRegistration(event_id.to_string()))
    }

    pub fn len(&self) -> usize {
        mutex_lock_or_recover(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The handler holds the map weakly. A strong capture would cycle
    /// through Registration::source back to the event's handler list and
    /// leak the whole tree.
    fn make_recorder(&self, event_id: &str) -> HandlerFn {
        let weak = Arc::downgrade(&self.inner);
        let event_id = event_id.to_string();
        Box::new(move |args: &[UiValue]| {
            if let Some(inner) = weak.upgrade() {
                let mut registrations = mutex_lock_or_recover(&inner);
                if let Some(registration) = registrations.get_mut(&event_id) {
                    registration.log.push(args.to_vec());
                }
            }
        })
    }
}
