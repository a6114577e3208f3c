//! Session registry
//!
//! Maps source URLs to their live sessions. At most one session exists per
//! URL; lookups and the check-then-insert of a start happen under one lock.
//!
//! ```text
//!                        Arc<SessionRegistry>
//!                  ┌──────────────────────────────┐
//!                  │ sessions: HashMap<url,       │
//!                  │   Arc<StreamSession>>        │
//!                  └──────────────┬───────────────┘
//!                                 │
//!        ┌────────────────────────┼─────────────────────────┐
//!        ▼                        ▼                         ▼
//!   start_stream()           stop_stream()           monitor task
//!   claim(url)               get(url) + stop         remove_if(url, id)
//! ```
//!
//! Sessions are stopped and awaited outside the lock.

pub mod store;

pub use store::{Claim, SessionRegistry};
