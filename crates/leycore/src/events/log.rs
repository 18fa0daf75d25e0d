use super::{EventBus, ExecutionEvent, SubscriptionToken};
use crate::ExecutionId;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Bounded record of the most recent events.
#[derive(Clone)]
pub struct EventLog {
    capacity: usize,
    events: Arc<Mutex<VecDeque<ExecutionEvent>>>,
}

impl EventLog {
    pub const DEFAULT_CAPACITY: usize = 1000;

    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Record every event published on `bus` from now on
    pub fn attach(&self, bus: &EventBus) -> SubscriptionToken {
        let log = self.clone();
        bus.subscribe_all(move |event| log.record(event.clone()))
    }

    pub fn record(&self, event: ExecutionEvent) {
        let mut events = self.events.lock();
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    pub fn snapshot(&self) -> Vec<ExecutionEvent> {
        self.events.lock().iter().cloned().collect()
    }

    pub fn for_execution(&self, execution_id: ExecutionId) -> Vec<ExecutionEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.execution_id == execution_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventKind;
    use uuid::Uuid;

    #[test]
    fn keeps_only_the_newest_events() {
        let bus = EventBus::new(8);
        let log = EventLog::new(2);
        log.attach(&bus);

        for kind in [EventKind::ExecutionStarted, EventKind::NodeStarted, EventKind::NodeCompleted] {
            bus.emit(ExecutionEvent::new(kind, Uuid::nil()));
        }

        let kinds: Vec<_> = log.snapshot().into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::NodeStarted, EventKind::NodeCompleted]);
    }
}
