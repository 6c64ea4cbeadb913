//! Backup and restore of local entities
//!
//! Exports every entity into a single interchange document and restores
//! from one. The document is plain JSON:
//!
//! ```text
//! { "teas": [...], "growthRecords": [...], "healthRecords": [...],
//!   "exportDate": "2024-06-01T12:00:00Z" }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::data::{Database, GrowthRecord, HealthRecord, Record, Tea, upsert_row};
use crate::error::{AppError, Result};

/// Interchange document for backup/restore
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    #[serde(default)]
    pub teas: Vec<Tea>,
    #[serde(default)]
    pub growth_records: Vec<GrowthRecord>,
    #[serde(default)]
    pub health_records: Vec<HealthRecord>,
    pub export_date: DateTime<Utc>,
}

/// Counts restored by an import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub teas: usize,
    pub growth_records: usize,
    pub health_records: usize,
}

/// Backup service for the local store
pub struct BackupService {
    db: Arc<Database>,
}

impl BackupService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Snapshot every entity table
    pub async fn export_data(&self) -> Result<ExportDocument> {
        let document = ExportDocument {
            teas: self.db.list::<Tea>().await?,
            growth_records: self.db.list::<GrowthRecord>().await?,
            health_records: self.db.list::<HealthRecord>().await?,
            export_date: Utc::now(),
        };

        tracing::info!(
            teas = document.teas.len(),
            growth_records = document.growth_records.len(),
            health_records = document.health_records.len(),
            "Local data exported"
        );

        Ok(document)
    }

    /// Replace every entity table with the document's contents
    ///
    /// Runs in one transaction and queues nothing: a restore reproduces a
    /// previous local state rather than issuing new writes. Every entity is
    /// validated before anything is touched.
    pub async fn import_data(&self, document: &ExportDocument) -> Result<ImportSummary> {
        validate_all(&document.teas)?;
        validate_all(&document.growth_records)?;
        validate_all(&document.health_records)?;

        let mut tx = self.db.pool().begin().await?;

        for table in ["teas", "growth_records", "health_records"] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *tx)
                .await?;
        }
        for tea in &document.teas {
            upsert_row(&mut *tx, tea, false).await?;
        }
        for record in &document.growth_records {
            upsert_row(&mut *tx, record, false).await?;
        }
        for record in &document.health_records {
            upsert_row(&mut *tx, record, false).await?;
        }

        tx.commit().await?;

        let summary = ImportSummary {
            teas: document.teas.len(),
            growth_records: document.growth_records.len(),
            health_records: document.health_records.len(),
        };

        tracing::info!(
            teas = summary.teas,
            growth_records = summary.growth_records,
            health_records = summary.health_records,
            export_date = %document.export_date,
            "Local data restored from backup"
        );

        Ok(summary)
    }

    /// Export to a JSON file
    pub async fn write_backup(&self, path: &Path) -> Result<ExportDocument> {
        let document = self.export_data().await?;
        let body = serde_json::to_vec_pretty(&document)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::Storage(format!("Failed to create backup dir: {}", e)))?;
        }
        tokio::fs::write(path, body)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to write backup: {}", e)))?;

        Ok(document)
    }

    /// Import from a JSON file written by [`BackupService::write_backup`]
    pub async fn read_backup(&self, path: &Path) -> Result<ImportSummary> {
        let body = tokio::fs::read(path)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to read backup: {}", e)))?;
        let document: ExportDocument = serde_json::from_slice(&body)?;

        self.import_data(&document).await
    }
}

fn validate_all<T: Record>(records: &[T]) -> Result<()> {
    records.iter().try_for_each(Record::validate)
}
