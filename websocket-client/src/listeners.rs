// websocket-client/src/listeners.rs
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::error::DriverError;

/// Kinds of event a listener can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    Opened,
    Message,
    Error,
    Closed,
}

/// An event dispatched to listeners
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    Opened,
    /// A parsed inbound frame
    Message(Map<String, Value>),
    Error(DriverError),
    Closed { code: Option<u16>, reason: String },
}

impl DriverEvent {
    pub fn category(&self) -> EventCategory {
        match self {
            DriverEvent::Opened => EventCategory::Opened,
            DriverEvent::Message(_) => EventCategory::Message,
            DriverEvent::Error(_) => EventCategory::Error,
            DriverEvent::Closed { .. } => EventCategory::Closed,
        }
    }
}

pub type Listener = Box<dyn Fn(&DriverEvent) + Send>;

/// Handle returned by registration, used to remove that exact listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Ordered listeners per event category.
///
/// Dispatch runs listeners in registration order. A panicking listener is
/// logged and the remaining listeners still run.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: u64,
    listeners: HashMap<EventCategory, Vec<(ListenerId, Listener)>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&mut self, category: EventCategory, listener: Listener) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.listeners.entry(category).or_default().push((id, listener));
        id
    }

    pub fn off(&mut self, category: EventCategory, id: ListenerId) -> bool {
        match self.listeners.get_mut(&category) {
            Some(list) => {
                let before = list.len();
                list.retain(|(existing, _)| *existing != id);
                list.len() != before
            },
            None => false,
        }
    }

    pub fn len(&self, category: EventCategory) -> usize {
        self.listeners.get(&category).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.values().all(Vec::is_empty)
    }

    /// Run every listener for the event's category, returning how many completed
    pub fn dispatch(&self, event: &DriverEvent) -> usize {
        let category = event.category();
        let Some(list) = self.listeners.get(&category) else {
            return 0;
        };

        let mut completed = 0;
        for (id, listener) in list {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => completed += 1,
                Err(_) => tracing::error!("Listener {:?} panicked handling {:?} event", id, category),
            }
        }
        completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> Listener {
        let log = Arc::clone(log);
        Box::new(move |_event| log.lock().unwrap().push(name.to_string()))
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ListenerRegistry::new();
        registry.on(EventCategory::Opened, recorder(&log, "first"));
        registry.on(EventCategory::Opened, recorder(&log, "second"));
        registry.on(EventCategory::Closed, recorder(&log, "closed"));

        assert_eq!(registry.dispatch(&DriverEvent::Opened), 2);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_off_removes_only_that_listener() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ListenerRegistry::new();
        let a = registry.on(EventCategory::Opened, recorder(&log, "a"));
        registry.on(EventCategory::Opened, recorder(&log, "b"));

        assert!(!registry.off(EventCategory::Closed, a));
        assert!(registry.off(EventCategory::Opened, a));
        assert!(!registry.off(EventCategory::Opened, a));

        registry.dispatch(&DriverEvent::Opened);
        assert_eq!(*log.lock().unwrap(), vec!["b"]);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ListenerRegistry::new();
        registry.on(EventCategory::Error, recorder(&log, "before"));
        registry.on(EventCategory::Error, Box::new(|_| panic!("listener bug")));
        registry.on(EventCategory::Error, recorder(&log, "after"));

        let event = DriverEvent::Error(DriverError::NotConnected);
        assert_eq!(registry.dispatch(&event), 2);
        assert_eq!(*log.lock().unwrap(), vec!["before", "after"]);
    }

    #[test]
    fn test_dispatch_without_listeners() {
        let registry = ListenerRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.dispatch(&DriverEvent::Opened), 0);
        assert_eq!(registry.len(EventCategory::Opened), 0);
    }
}
