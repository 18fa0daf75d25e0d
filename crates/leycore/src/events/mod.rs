mod base;
mod log;

pub use base::{
    DataFlow, EventBus, EventData, EventKind, ExecutionEvent, Listener, SkipReason,
    SubscriptionToken,
};
pub use log::EventLog;
