/* src/lib.rs */

//! Zone-file generation and commit reconciliation for a BIND nameserver fleet.

pub mod bind;
pub mod builder;
pub mod committer;
pub mod config;
pub mod daemon;
pub mod error;
pub mod records;
pub mod rfc2317;
pub mod store;
pub mod zone;

pub use builder::Builder;
pub use committer::{CommitSummary, Committer};
pub use config::AppConfig;
pub use daemon::{DaemonControl, Rndc};
pub use store::{MemoryStore, ZoneStore};
