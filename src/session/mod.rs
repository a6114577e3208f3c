//! Stream sessions
//!
//! A session is the unit of supervision: one source, one decoder process at a
//! time, one monitor task. See [`stream`] for the task layout and [`state`] for
//! the lifecycle.

pub mod context;
pub(crate) mod process;
pub(crate) mod reader;
pub mod state;
pub mod stream;

pub use context::SessionContext;
pub use state::SessionState;
pub use stream::{SessionId, StreamSession};
