//! # Meeting Client Test Utilities
//!
//! Fakes and fixtures for testing the meeting client without a media stack
//! or a signaling server.
//!
//! ## Modules
//!
//! - `fake_engine` - In-memory media engine recording everything it creates
//! - `fake_signaling` - Socket side of the signaling channel
//! - `fixtures` - Server event payloads and ids
//! - `harness` - A spawned session wired to both fakes
//!
//! ## Usage
//!
//! ```rust,ignore
//! use meeting_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let mut session = TestSession::start();
//!     session.join_to_in_call().await;
//!
//!     session.server.push(new_producer("p-1", MediaKind::Video, "alice", "Alice")).await;
//!     session.server.expect("start_consuming").await;
//! }
//! ```

pub mod fake_engine;
pub mod fake_signaling;
pub mod fixtures;
pub mod harness;

pub use fake_engine::*;
pub use fake_signaling::*;
pub use fixtures::*;
pub use harness::*;
