//! Crash-safe per-session persistence for the drost gateway.
//!
//! Each session owns a canonical JSON record, a sidecar lock file, and two
//! append-only logs. A single index file mirrors the light per-session
//! fields. Corrupt records are quarantined, never fatal.

pub mod budget;
pub mod fs_lock;
pub mod session_key;
pub mod store;
pub mod transcript;

pub use budget::{apply_budget, TrimReport};
pub use fs_lock::{FileLock, LockOptions};
pub use session_key::{derive_session_id, sanitize_session_id, SessionKeyParts};
pub use store::{IndexEntry, LoadDiagnostic, LoadResult, SaveReport, SessionFileStore};
pub use transcript::{TranscriptLine, TranscriptWriter};
