//! Local storage services built on the data layer
//!
//! Handles:
//! - Media blob caching (URL keyed, expiring)
//! - Backup export/import of entity tables

mod backup;
mod media;

pub use backup::{BackupService, ExportDocument, ImportSummary};
pub use media::{DEFAULT_MEDIA_TTL, MediaCache};
