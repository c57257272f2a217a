//! In-process, synchronous domain event bus.
//!
//! The bus is a **static registration table** built once at startup: each event
//! type maps to zero or more handlers. After a command commits, the dispatcher
//! hands every pending event to [`DomainEventBus::deliver`], which calls each
//! registered handler exactly once, in registration order, on the caller's thread.
//!
//! ## Handlers and context
//!
//! Handlers receive the event envelope plus a caller-supplied context `C` (for the
//! command pipeline this is the dispatcher itself, so a handler can issue the next
//! command recursively). Handler failures are collected, never short-circuited:
//! one failing handler does not prevent the others from seeing the event.
//!
//! ## Acyclicity
//!
//! A handler may declare which event types its reaction can produce (`emits`).
//! The table is expected to stay acyclic; [`DomainEventBus::find_cycle`] exposes
//! the check so it can be asserted in tests. It is not enforced at runtime.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::{Event, EventEnvelope};

/// Reacts to one kind of domain event.
pub trait EventHandler<E, C: ?Sized, X>: Send + Sync {
    /// Stable handler name, used in logs and failure reports.
    fn name(&self) -> &'static str;

    /// Event types the handler's reaction can (transitively) produce.
    fn emits(&self) -> &'static [&'static str] {
        &[]
    }

    fn handle(&self, event: &EventEnvelope<E>, ctx: &C) -> Result<(), X>;
}

/// A handler that failed while reacting to an event.
#[derive(Debug)]
pub struct HandlerFailure<X> {
    pub event_type: &'static str,
    pub handler: &'static str,
    pub error: X,
}

/// Outcome of delivering one event to its handlers.
#[derive(Debug)]
pub struct DeliveryReport<X> {
    pub handled: usize,
    pub failures: Vec<HandlerFailure<X>>,
}

impl<X> DeliveryReport<X> {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

type HandlerRef<E, C, X> = Arc<dyn EventHandler<E, C, X>>;

/// Startup-built event type → handlers table.
pub struct DomainEventBus<E, C: ?Sized, X> {
    handlers: HashMap<&'static str, Vec<HandlerRef<E, C, X>>>,
}

impl<E, C: ?Sized, X> DomainEventBus<E, C, X> {
    pub fn builder() -> DomainEventBusBuilder<E, C, X> {
        DomainEventBusBuilder {
            handlers: HashMap::new(),
        }
    }

    /// A bus with no registrations (events are committed but trigger nothing).
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Handler names registered for `event_type`, in delivery order.
    pub fn handlers_for(&self, event_type: &str) -> Vec<&'static str> {
        self.handlers
            .get(event_type)
            .map(|hs| hs.iter().map(|h| h.name()).collect())
            .unwrap_or_default()
    }

    /// Event types with at least one handler.
    pub fn event_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.handlers.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Deliver one event to every handler registered for its type.
    pub fn deliver(&self, event: &EventEnvelope<E>, ctx: &C) -> DeliveryReport<X>
    where
        E: Event,
    {
        let event_type = event.payload().event_type();
        let mut report = DeliveryReport {
            handled: 0,
            failures: Vec::new(),
        };

        let Some(handlers) = self.handlers.get(event_type) else {
            return report;
        };

        for handler in handlers {
            report.handled += 1;
            if let Err(error) = handler.handle(event, ctx) {
                report.failures.push(HandlerFailure {
                    event_type,
                    handler: handler.name(),
                    error,
                });
            }
        }

        report
    }

    /// Find a cycle in the event → (handler emits) → event graph.
    ///
    /// Returns the event types along the cycle, starting and ending with the same type.
    pub fn find_cycle(&self) -> Option<Vec<&'static str>> {
        let mut edges: HashMap<&'static str, Vec<&'static str>> = HashMap::new();
        for (event_type, handlers) in &self.handlers {
            let targets = edges.entry(*event_type).or_default();
            for handler in handlers {
                targets.extend(handler.emits().iter().copied());
            }
        }

        let mut done: HashSet<&'static str> = HashSet::new();
        for start in self.event_types() {
            let mut path = Vec::new();
            if let Some(cycle) = visit(start, &edges, &mut path, &mut done) {
                return Some(cycle);
            }
        }
        None
    }
}

fn visit(
    node: &'static str,
    edges: &HashMap<&'static str, Vec<&'static str>>,
    path: &mut Vec<&'static str>,
    done: &mut HashSet<&'static str>,
) -> Option<Vec<&'static str>> {
    if let Some(pos) = path.iter().position(|n| *n == node) {
        let mut cycle = path[pos..].to_vec();
        cycle.push(node);
        return Some(cycle);
    }
    if done.contains(node) {
        return None;
    }

    path.push(node);
    for next in edges.get(node).into_iter().flatten() {
        if let Some(cycle) = visit(*next, edges, path, done) {
            return Some(cycle);
        }
    }
    path.pop();
    done.insert(node);
    None
}

impl<E, C: ?Sized, X> core::fmt::Debug for DomainEventBus<E, C, X> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut map = f.debug_map();
        for event_type in self.event_types() {
            map.entry(&event_type, &self.handlers_for(event_type));
        }
        map.finish()
    }
}

/// Collects registrations; the bus is immutable once built.
pub struct DomainEventBusBuilder<E, C: ?Sized, X> {
    handlers: HashMap<&'static str, Vec<HandlerRef<E, C, X>>>,
}

impl<E, C: ?Sized, X> DomainEventBusBuilder<E, C, X> {
    pub fn register<H>(self, event_type: &'static str, handler: H) -> Self
    where
        H: EventHandler<E, C, X> + 'static,
    {
        self.register_arc(event_type, Arc::new(handler))
    }

    pub fn register_arc(mut self, event_type: &'static str, handler: HandlerRef<E, C, X>) -> Self {
        self.handlers.entry(event_type).or_default().push(handler);
        self
    }

    pub fn build(self) -> DomainEventBus<E, C, X> {
        DomainEventBus {
            handlers: self.handlers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;
    use uuid::Uuid;

    use shopfloor_core::AggregateId;

    #[derive(Debug, Clone)]
    struct Ping(&'static str);

    impl Event for Ping {
        fn event_type(&self) -> &'static str {
            self.0
        }

        fn version(&self) -> u32 {
            1
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            DateTime::<Utc>::UNIX_EPOCH
        }
    }

    #[derive(Default)]
    struct Log(Mutex<Vec<String>>);

    struct Recorder {
        name: &'static str,
        fail: bool,
        emits: &'static [&'static str],
    }

    impl EventHandler<Ping, Log, String> for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        fn emits(&self) -> &'static [&'static str] {
            self.emits
        }

        fn handle(&self, event: &EventEnvelope<Ping>, ctx: &Log) -> Result<(), String> {
            ctx.0
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, event.payload().0));
            if self.fail {
                return Err(format!("{} failed", self.name));
            }
            Ok(())
        }
    }

    fn envelope(event_type: &'static str) -> EventEnvelope<Ping> {
        EventEnvelope::new(
            Uuid::now_v7(),
            AggregateId::new(),
            "test",
            1,
            event_type,
            Utc::now(),
            Ping(event_type),
        )
    }

    fn recorder(name: &'static str) -> Recorder {
        Recorder {
            name,
            fail: false,
            emits: &[],
        }
    }

    #[test]
    fn delivers_only_to_handlers_of_the_event_type() {
        let bus = DomainEventBus::<Ping, Log, String>::builder()
            .register("a", recorder("h1"))
            .register("a", recorder("h2"))
            .register("b", recorder("h3"))
            .build();
        let log = Log::default();

        let report = bus.deliver(&envelope("a"), &log);

        assert!(report.is_success());
        assert_eq!(report.handled, 2);
        assert_eq!(*log.0.lock().unwrap(), vec!["h1:a", "h2:a"]);
    }

    #[test]
    fn unregistered_event_type_is_a_no_op() {
        let bus = DomainEventBus::<Ping, Log, String>::empty();
        let log = Log::default();

        let report = bus.deliver(&envelope("nobody"), &log);

        assert_eq!(report.handled, 0);
        assert!(log.0.lock().unwrap().is_empty());
    }

    #[test]
    fn failing_handler_does_not_stop_the_others() {
        let bus = DomainEventBus::<Ping, Log, String>::builder()
            .register(
                "a",
                Recorder {
                    name: "broken",
                    fail: true,
                    emits: &[],
                },
            )
            .register("a", recorder("healthy"))
            .build();
        let log = Log::default();

        let report = bus.deliver(&envelope("a"), &log);

        assert_eq!(report.handled, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].handler, "broken");
        assert_eq!(report.failures[0].error, "broken failed");
        assert_eq!(log.0.lock().unwrap().len(), 2);
    }

    #[test]
    fn find_cycle_reports_loops_in_the_table() {
        let acyclic = DomainEventBus::<Ping, Log, String>::builder()
            .register(
                "a",
                Recorder {
                    name: "a->b",
                    fail: false,
                    emits: &["b"],
                },
            )
            .register(
                "b",
                Recorder {
                    name: "b->c",
                    fail: false,
                    emits: &["c"],
                },
            )
            .build();
        assert_eq!(acyclic.find_cycle(), None);

        let cyclic = DomainEventBus::<Ping, Log, String>::builder()
            .register(
                "a",
                Recorder {
                    name: "a->b",
                    fail: false,
                    emits: &["b"],
                },
            )
            .register(
                "b",
                Recorder {
                    name: "b->a",
                    fail: false,
                    emits: &["a"],
                },
            )
            .build();
        let cycle = cyclic.find_cycle().expect("cycle");
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 3);
    }
}
