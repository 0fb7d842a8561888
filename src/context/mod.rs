//! Speaker context cache
//!
//! Keeps a short rolling history of (source, translation) pairs per speaker
//! so that follow-up requests from the same speaker can be translated with
//! their recent conversation in view.
//!
//! - `store` - the shared, lock-guarded speaker map
//! - `scheduler` - periodic idle-speaker eviction

pub mod scheduler;
pub mod store;

pub use scheduler::CleanupScheduler;
pub use store::{unix_seconds, ContextExport, ContextPair, ContextStore, SpeakerStats, SystemStats};
