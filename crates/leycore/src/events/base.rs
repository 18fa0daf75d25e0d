use crate::{ExecutionError, ExecutionId, NodeId, Value};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ExecutionStarted,
    ExecutionCompleted,
    ExecutionFailed,
    ExecutionCancelled,
    NodeStarted,
    NodeCompleted,
    NodeFailed,
    NodeSkipped,
    DataFlow,
    BreakpointHit,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::ExecutionStarted,
        EventKind::ExecutionCompleted,
        EventKind::ExecutionFailed,
        EventKind::ExecutionCancelled,
        EventKind::NodeStarted,
        EventKind::NodeCompleted,
        EventKind::NodeFailed,
        EventKind::NodeSkipped,
        EventKind::DataFlow,
        EventKind::BreakpointHit,
    ];
}

/// One entry of the live progress stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub execution_id: ExecutionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<EventData>,
}

impl ExecutionEvent {
    pub fn new(kind: EventKind, execution_id: ExecutionId) -> Self {
        Self {
            kind,
            execution_id,
            node_id: None,
            timestamp: Utc::now(),
            data: None,
        }
    }

    pub fn for_node(mut self, node_id: impl Into<NodeId>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn with_data(mut self, data: EventData) -> Self {
        self.data = Some(data);
        self
    }
}

/// Typed payloads carried by events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "payload", rename_all = "snake_case")]
pub enum EventData {
    #[serde(rename_all = "camelCase")]
    Plan {
        execution_order: Vec<NodeId>,
        parallel_groups: Vec<Vec<NodeId>>,
        entry_points: Vec<NodeId>,
        exit_points: Vec<NodeId>,
    },
    #[serde(rename_all = "camelCase")]
    Summary {
        execution_time_ms: u64,
        errors: Vec<ExecutionError>,
        outputs: BTreeMap<String, Value>,
    },
    #[serde(rename_all = "camelCase")]
    NodeStarted { node_type: String, label: String },
    #[serde(rename_all = "camelCase")]
    NodeCompleted { result: Value, duration_ms: u64 },
    Failure { error: ExecutionError },
    Skipped { reason: SkipReason },
    DataFlow(DataFlow),
    #[serde(rename_all = "camelCase")]
    Breakpoint { node_ids: Vec<NodeId>, step_mode: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A dependency failed or was itself skipped
    UpstreamFailure,
    /// The run was cancelled before the node could start
    Cancelled,
}

/// Value travelling along one edge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFlow {
    pub from_node_id: NodeId,
    pub to_node_id: NodeId,
    pub from_handle: String,
    pub to_handle: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

pub type Listener = Arc<dyn Fn(&ExecutionEvent) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`]; pass it back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

struct Subscription {
    kind: Option<EventKind>,
    listener: Listener,
}

/// Publish/subscribe channel for execution events.
///
/// Synchronous listeners are registered per kind and removed by token.
/// Async consumers can instead take a broadcast receiver that sees every
/// event. A panicking listener is logged and otherwise ignored.
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
    listeners: RwLock<HashMap<SubscriptionToken, Subscription>>,
    next_token: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            listeners: RwLock::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    /// Register a listener for one event kind
    pub fn subscribe<F>(&self, kind: EventKind, listener: F) -> SubscriptionToken
    where
        F: Fn(&ExecutionEvent) + Send + Sync + 'static,
    {
        self.insert(Some(kind), Arc::new(listener))
    }

    /// Register a listener for every event kind
    pub fn subscribe_all<F>(&self, listener: F) -> SubscriptionToken
    where
        F: Fn(&ExecutionEvent) + Send + Sync + 'static,
    {
        self.insert(None, Arc::new(listener))
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.listeners.write().remove(&token).is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Stream of every event, for async consumers
    pub fn subscribe_stream(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        // Listeners run outside the lock so they may (un)subscribe themselves.
        let targets: Vec<Listener> = self
            .listeners
            .read()
            .values()
            .filter(|s| s.kind.map_or(true, |k| k == event.kind))
            .map(|s| Arc::clone(&s.listener))
            .collect();

        for listener in targets {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                tracing::error!(
                    kind = ?event.kind,
                    execution_id = %event.execution_id,
                    "Error in execution event listener"
                );
            }
        }

        let _ = self.sender.send(event);
    }

    fn insert(&self, kind: Option<EventKind>, listener: Listener) -> SubscriptionToken {
        let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().insert(token, Subscription { kind, listener });
        token
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
