//! Re-export of common types for easier use

pub use crate::agent::{
    Activity, AgentId, AgentRecord, AgentRegistry, AgentStateMachine, Team,
};
pub use crate::calls::{ActiveCall, ActiveCalls, CallDirection, CompletedCall};
pub use crate::config::{
    DatabaseConfig, DestinationMode, DialerConfig, DialingConfig, GeneralConfig, StoreConfig,
    SwitchConfig,
};
pub use crate::database::{CallLogRow, DatabaseManager, NewLead};
pub use crate::error::{DialerError, Result};
pub use crate::events::{
    map_hangup_cause, CallOutcome, EventDispatcher, EventHandler, PersistenceSink, SwitchEvent,
};
pub use crate::orchestrator::{DialerEngine, DialerStats, TickReport};
pub use crate::queue::{
    QueueManager, QueueRefiller, QueuedLead, RefillOutcome, Segment, ACQUISITION_BUCKET,
};
pub use crate::server::{DialerServer, DialerServerBuilder};
pub use crate::store::{MemoryBackend, StateStore, StoreBackend, StoreError};
pub use crate::switch::{
    EslSwitch, OriginateRequest, SwitchAdapter, SwitchControl, SwitchError,
};
