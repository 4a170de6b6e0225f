//! Session scheduling engine.
//!
//! Sessions are timed focus/break schedules. They live in a partitioned
//! in-memory store, advance on per-session clocks, and are controlled through
//! the session service.

pub mod duration;
pub mod error;
pub mod events;
pub mod locks;
pub mod model;
pub mod service;
pub mod store;
pub mod templates;
pub mod timer;

pub use error::SessionError;
pub use events::{EventBus, SessionEvent, SubscriptionId};
pub use locks::SessionLocks;
pub use model::{
    session_key, Phase, Session, SessionConfig, SessionKey, SessionStatus, MAX_ID_LEN,
};
pub use service::{OperationResult, SessionService};
pub use store::SessionStore;
pub use templates::{ConfigProvider, ConfigRegistry};
pub use timer::{SessionTimer, StartKind};
