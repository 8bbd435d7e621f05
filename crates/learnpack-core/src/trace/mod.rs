//! Live agent trace: push-channel events reduced into one running trace, a bounded
//! recent-actions buffer and a bounded history.

mod connection;
mod event;
mod model;
mod monitor;
mod reducer;

pub use connection::{CloseReason, ConnectionState, ReconnectPolicy, TraceConnection};
pub use event::{parse_timestamp, payload_text, TraceEvent, WireAction, WireTrace};
pub use model::{
    ActionPatch, ActionStatus, AgentAction, AgentKind, AgentTrace, NewAction, TraceStatus,
};
pub use monitor::{TraceMonitor, TraceSnapshot};
pub use reducer::{TraceReducer, DEFAULT_HISTORY_CAPACITY, DEFAULT_RECENT_CAPACITY};
