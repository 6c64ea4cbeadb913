//! Remote synchronization
//!
//! - `remote`: the remote collection API and its HTTP client
//! - `synchronizer`: queue draining and last-writer-wins pull
//! - `connectivity`: online/offline tracking that drives the synchronizer

mod connectivity;
mod remote;
mod synchronizer;

pub use connectivity::{
    ConnectivityMonitor, ConnectivityProbe, ConnectivityState, HttpProbe, MonitorConfig,
};
pub use remote::{HttpRemote, RemoteService};
pub use synchronizer::{
    ConflictResolver, MAX_RETRIES, NoopConflictResolver, PullSummary, RETRY_DELAY, SyncConfig,
    SyncResult, SyncTrigger, Synchronizer,
};
