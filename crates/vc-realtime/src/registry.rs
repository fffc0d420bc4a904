//! Fan-out from inbound hub events to domain handlers.
//!
//! The registry decouples "which hub delivered this" from "who cares about
//! this event type". The handler list is fixed at construction; new event
//! types are declared on a handler, never wired into the transport layer.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error};

use crate::handlers::EventHandler;
use crate::hub::HubName;

pub struct EventRegistry {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventRegistry {
    pub fn new(handlers: Vec<Arc<dyn EventHandler>>) -> Self {
        Self { handlers }
    }

    /// Invoke every handler that declares support for `event`, in
    /// registration order. A failing handler is logged and never prevents
    /// delivery to its siblings; an unrecognized event is a diagnostic, not
    /// an error.
    pub fn dispatch(&self, event: &str, payload: &Value, hub: HubName) {
        let mut matched = 0usize;

        for handler in &self.handlers {
            if !handler.supports_event(event) {
                continue;
            }
            matched += 1;
            if let Err(e) = handler.handle(event, payload, hub) {
                error!(
                    handler = handler.name(),
                    event,
                    %hub,
                    error = %e,
                    "event handler failed"
                );
            }
        }

        if matched == 0 {
            debug!(event, %hub, "no handler registered for event");
        }
    }

    /// De-duplicated union of every handler's declared events. The manager
    /// subscribes each freshly opened hub to exactly this list.
    pub fn supported_events(&self) -> Vec<String> {
        self.handlers
            .iter()
            .flat_map(|h| h.supported_events().iter().copied())
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        events: &'static [&'static str],
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingHandler {
        fn new(events: &'static [&'static str], fail: bool) -> Arc<Self> {
            Arc::new(Self {
                events,
                calls: AtomicUsize::new(0),
                fail,
            })
        }
    }

    impl EventHandler for CountingHandler {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn supported_events(&self) -> &'static [&'static str] {
            self.events
        }

        fn handle(&self, _event: &str, _payload: &Value, _hub: HubName) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("simulated handler failure");
            }
            Ok(())
        }
    }

    #[test]
    fn unrecognized_event_is_ignored() {
        let handler = CountingHandler::new(&["Known"], false);
        let registry = EventRegistry::new(vec![handler.clone()]);

        registry.dispatch("TotallyNew", &Value::Null, HubName::Operator);

        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failing_handler_does_not_block_siblings() {
        let first = CountingHandler::new(&["Shared"], true);
        let second = CountingHandler::new(&["Shared"], false);
        let registry = EventRegistry::new(vec![first.clone(), second.clone()]);

        registry.dispatch("Shared", &Value::Null, HubName::Admin);

        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn supported_events_is_a_deduplicated_union() {
        let first = CountingHandler::new(&["A", "B"], false);
        let second = CountingHandler::new(&["B", "C"], false);
        let registry = EventRegistry::new(vec![first, second]);

        assert_eq!(registry.supported_events(), vec!["A", "B", "C"]);
    }
}
