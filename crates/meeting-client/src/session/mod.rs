//! Session actor and its message types.
//!
//! ```text
//! SessionActorHandle (cloneable, held by the UI)
//!     └── SessionActor (one per client)
//!         ├── owns call state, transports, producers, consumers, peers
//!         └── spawns request tasks tagged with the current generation
//! ```
//!
//! - [`actor`] - `SessionActor` and its handle
//! - [`messages`] - Commands, events and state snapshots

pub mod actor;
pub mod messages;

pub use actor::{SessionActor, SessionActorHandle};
pub use messages::{CallState, ConnectionState, SessionEvent, SessionMessage, SessionState};
