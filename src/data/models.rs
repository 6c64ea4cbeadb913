//! Data models
//!
//! Rust structs representing stored entities, queue items and cache rows.
//! Entity timestamps are epoch milliseconds; queue item IDs embed a ULID.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use crate::error::{AppError, Result};

/// Prefix marking an entity created locally and not yet known to the remote
pub const TEMP_ID_PREFIX: &str = "temp_";

/// Current time in epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Expiry time `ttl` after `now`, clamped to the largest timestamp
pub fn expires_after(now: i64, ttl: Duration) -> i64 {
    now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

/// Generate a temporary identifier for a locally created entity
///
/// Example: "temp_01ARZ3NDEKTSV4RRFFQ69G5FAV"
pub fn new_temp_id() -> String {
    format!("{}{}", TEMP_ID_PREFIX, ulid::Ulid::new())
}

/// Whether an identifier carries the temporary prefix
pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

// =============================================================================
// Resources
// =============================================================================

/// Entity kind, doubling as the remote path segment and queue `resource` tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "camelCase")]
#[sqlx(rename_all = "camelCase")]
pub enum Resource {
    Teas,
    GrowthRecords,
    HealthRecords,
}

impl Resource {
    pub const ALL: [Resource; 3] = [
        Resource::Teas,
        Resource::GrowthRecords,
        Resource::HealthRecords,
    ];

    /// Wire name, used in remote paths
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Teas => "teas",
            Self::GrowthRecords => "growthRecords",
            Self::HealthRecords => "healthRecords",
        }
    }

    /// Local SQLite table holding this kind
    pub(crate) fn table(&self) -> &'static str {
        match self {
            Self::Teas => "teas",
            Self::GrowthRecords => "growth_records",
            Self::HealthRecords => "health_records",
        }
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Entities
// =============================================================================

/// A tea plant in the garden
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tea {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variety: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// ISO-8601 date
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planted_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub last_modified: i64,
    /// Fields this build does not know about, kept so records round-trip
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Tea {
    /// New locally created tea with a temporary id
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: new_temp_id(),
            name: name.into(),
            variety: None,
            origin: None,
            planted_date: None,
            location: None,
            notes: None,
            last_modified: 0,
            extra: Map::new(),
        }
    }
}

/// A growth measurement for one tea
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrowthRecord {
    pub id: String,
    pub tea_id: String,
    /// ISO-8601 date of the measurement
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height_cm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaf_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub last_modified: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A health observation for one tea
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecord {
    pub id: String,
    pub tea_id: String,
    pub date: String,
    /// e.g. healthy, stressed, diseased
    pub status: String,
    #[serde(default)]
    pub symptoms: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub treatment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub last_modified: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Any one of the stored entity kinds
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Tea(Tea),
    GrowthRecord(GrowthRecord),
    HealthRecord(HealthRecord),
}

impl Entity {
    pub fn resource(&self) -> Resource {
        match self {
            Self::Tea(_) => Resource::Teas,
            Self::GrowthRecord(_) => Resource::GrowthRecords,
            Self::HealthRecord(_) => Resource::HealthRecords,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Tea(tea) => &tea.id,
            Self::GrowthRecord(record) => &record.id,
            Self::HealthRecord(record) => &record.id,
        }
    }

    pub fn last_modified(&self) -> i64 {
        match self {
            Self::Tea(tea) => tea.last_modified,
            Self::GrowthRecord(record) => record.last_modified,
            Self::HealthRecord(record) => record.last_modified,
        }
    }

    /// Decode a wire payload for the given resource
    pub fn from_value(resource: Resource, value: Value) -> Result<Self> {
        let entity = match resource {
            Resource::Teas => Self::Tea(serde_json::from_value(value)?),
            Resource::GrowthRecords => Self::GrowthRecord(serde_json::from_value(value)?),
            Resource::HealthRecords => Self::HealthRecord(serde_json::from_value(value)?),
        };
        Ok(entity)
    }

    pub fn to_value(&self) -> Result<Value> {
        let value = match self {
            Self::Tea(tea) => serde_json::to_value(tea)?,
            Self::GrowthRecord(record) => serde_json::to_value(record)?,
            Self::HealthRecord(record) => serde_json::to_value(record)?,
        };
        Ok(value)
    }
}

/// Reference to an entity by kind and id (payload of a delete)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityRef {
    pub resource: Resource,
    pub id: String,
}

/// Behaviour shared by every stored entity kind
///
/// The store is generic over this trait; each kind maps to its own table.
pub trait Record: Clone + Send + Sync + Unpin + Serialize + DeserializeOwned + 'static {
    const RESOURCE: Resource;

    fn id(&self) -> &str;

    fn last_modified(&self) -> i64;

    fn set_last_modified(&mut self, timestamp: i64);

    /// Owning tea, for per-tea records
    fn tea_id(&self) -> Option<&str> {
        None
    }

    /// Record date, for dated records
    fn date(&self) -> Option<&str> {
        None
    }

    /// Check the key fields before a write
    fn validate(&self) -> Result<()> {
        require_field(Self::RESOURCE, "id", self.id())?;
        if let Some(tea_id) = self.tea_id() {
            require_field(Self::RESOURCE, "teaId", tea_id)?;
        }
        if let Some(date) = self.date() {
            require_field(Self::RESOURCE, "date", date)?;
        }
        Ok(())
    }

    fn into_entity(self) -> Entity;

    fn from_entity(entity: Entity) -> Option<Self>;
}

fn require_field(resource: Resource, field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!(
            "{} entity is missing required field `{}`",
            resource, field
        )));
    }
    Ok(())
}

impl Record for Tea {
    const RESOURCE: Resource = Resource::Teas;

    fn id(&self) -> &str {
        &self.id
    }

    fn last_modified(&self) -> i64 {
        self.last_modified
    }

    fn set_last_modified(&mut self, timestamp: i64) {
        self.last_modified = timestamp;
    }

    fn validate(&self) -> Result<()> {
        require_field(Self::RESOURCE, "id", &self.id)?;
        require_field(Self::RESOURCE, "name", &self.name)
    }

    fn into_entity(self) -> Entity {
        Entity::Tea(self)
    }

    fn from_entity(entity: Entity) -> Option<Self> {
        match entity {
            Entity::Tea(tea) => Some(tea),
            _ => None,
        }
    }
}

impl Record for GrowthRecord {
    const RESOURCE: Resource = Resource::GrowthRecords;

    fn id(&self) -> &str {
        &self.id
    }

    fn last_modified(&self) -> i64 {
        self.last_modified
    }

    fn set_last_modified(&mut self, timestamp: i64) {
        self.last_modified = timestamp;
    }

    fn tea_id(&self) -> Option<&str> {
        Some(&self.tea_id)
    }

    fn date(&self) -> Option<&str> {
        Some(&self.date)
    }

    fn into_entity(self) -> Entity {
        Entity::GrowthRecord(self)
    }

    fn from_entity(entity: Entity) -> Option<Self> {
        match entity {
            Entity::GrowthRecord(record) => Some(record),
            _ => None,
        }
    }
}

impl Record for HealthRecord {
    const RESOURCE: Resource = Resource::HealthRecords;

    fn id(&self) -> &str {
        &self.id
    }

    fn last_modified(&self) -> i64 {
        self.last_modified
    }

    fn set_last_modified(&mut self, timestamp: i64) {
        self.last_modified = timestamp;
    }

    fn tea_id(&self) -> Option<&str> {
        Some(&self.tea_id)
    }

    fn date(&self) -> Option<&str> {
        Some(&self.date)
    }

    fn into_entity(self) -> Entity {
        Entity::HealthRecord(self)
    }

    fn from_entity(entity: Entity) -> Option<Self> {
        match entity {
            Entity::HealthRecord(record) => Some(record),
            _ => None,
        }
    }
}

// =============================================================================
// Sync Queue
// =============================================================================

/// Kind of mutation a queue item carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queue item lifecycle state
///
/// `Completed` items are deleted, so the state is only observable in
/// transit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Syncing,
    Failed,
    Completed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Failed => "failed",
            Self::Completed => "completed",
        }
    }
}

/// One durable pending mutation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueItem {
    /// "{resource}_{entityId}_{ulid}"
    pub id: String,
    #[serde(rename = "type")]
    pub op_type: OperationType,
    pub resource: Resource,
    /// Full entity for create/update, `{id}` for delete
    pub data: Value,
    /// Enqueue time (epoch ms)
    pub timestamp: i64,
    pub retries: u32,
    pub status: QueueStatus,
    pub last_error: Option<String>,
}

impl SyncQueueItem {
    pub(crate) fn new(op_type: OperationType, resource: Resource, entity_id: &str, data: Value) -> Self {
        Self {
            id: format!("{}_{}_{}", resource, entity_id, ulid::Ulid::new()),
            op_type,
            resource,
            data,
            timestamp: now_millis(),
            retries: 0,
            status: QueueStatus::Pending,
            last_error: None,
        }
    }

    /// Id of the entity this item mutates, if the payload carries one
    pub fn entity_id(&self) -> Option<&str> {
        self.data.get("id").and_then(Value::as_str)
    }

    /// Decode the stored payload into a typed operation
    ///
    /// Fails with a validation error when the payload does not match the
    /// resource's schema.
    pub fn operation(&self) -> Result<SyncOperation> {
        match self.op_type {
            OperationType::Create => Ok(SyncOperation::Create(Entity::from_value(
                self.resource,
                self.data.clone(),
            )?)),
            OperationType::Update => Ok(SyncOperation::Update(Entity::from_value(
                self.resource,
                self.data.clone(),
            )?)),
            OperationType::Delete => {
                let id = self
                    .entity_id()
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| {
                        AppError::Validation(format!(
                            "delete item {} has no entity id",
                            self.id
                        ))
                    })?;
                Ok(SyncOperation::Delete(EntityRef {
                    resource: self.resource,
                    id: id.to_string(),
                }))
            }
        }
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> for SyncQueueItem {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        use sqlx::Row;

        let raw: String = row.try_get("data")?;
        let retries: i64 = row.try_get("retries")?;
        Ok(Self {
            id: row.try_get("id")?,
            op_type: row.try_get("type")?,
            resource: row.try_get("resource")?,
            // A corrupt payload becomes Null and fails validation at dispatch
            data: serde_json::from_str(&raw).unwrap_or(Value::Null),
            timestamp: row.try_get("timestamp")?,
            retries: retries.max(0) as u32,
            status: row.try_get("status")?,
            last_error: row.try_get("last_error")?,
        })
    }
}

/// Typed view of a queue item, dispatched exhaustively to the remote
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOperation {
    Create(Entity),
    Update(Entity),
    Delete(EntityRef),
}

impl SyncOperation {
    pub fn op_type(&self) -> OperationType {
        match self {
            Self::Create(_) => OperationType::Create,
            Self::Update(_) => OperationType::Update,
            Self::Delete(_) => OperationType::Delete,
        }
    }

    pub fn resource(&self) -> Resource {
        match self {
            Self::Create(entity) | Self::Update(entity) => entity.resource(),
            Self::Delete(target) => target.resource,
        }
    }
}

// =============================================================================
// Cache
// =============================================================================

/// A cached value with its expiry metadata
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub data: T,
    /// Write time (epoch ms)
    pub timestamp: i64,
    /// Expiry time (epoch ms); `None` never expires
    pub expires_at: Option<i64>,
    /// Cache schema version the entry was written with
    pub version: i64,
}

impl<T> CacheEntry<T> {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// A cached media blob keyed by its source URL
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct MediaEntry {
    pub url: String,
    pub data: Vec<u8>,
    pub content_type: Option<String>,
    pub timestamp: i64,
    pub expires_at: i64,
}

/// Row counts per table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub teas: i64,
    pub growth_records: i64,
    pub health_records: i64,
    pub cache_entries: i64,
    pub media_entries: i64,
    pub pending_items: i64,
    pub failed_items: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn temp_ids_are_recognised() {
        let tea = Tea::new("Sencha");
        assert!(is_temp_id(&tea.id));
        assert!(!is_temp_id("tea_7"));
    }

    #[test]
    fn tea_preserves_unknown_fields() {
        let value = json!({
            "id": "tea_1",
            "name": "Gyokuro",
            "lastModified": 200,
            "shadeDays": 21
        });

        let tea: Tea = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(tea.extra.get("shadeDays"), Some(&json!(21)));
        assert_eq!(serde_json::to_value(&tea).unwrap(), value);
    }

    #[test]
    fn validate_rejects_blank_keys() {
        let mut record = GrowthRecord {
            id: "growth_1".to_string(),
            tea_id: " ".to_string(),
            date: "2024-05-01".to_string(),
            height_cm: Some(12.5),
            leaf_count: None,
            notes: None,
            last_modified: 0,
            extra: Map::new(),
        };

        let error = record.validate().expect_err("blank teaId must fail");
        assert!(matches!(error, AppError::Validation(message) if message.contains("teaId")));

        record.tea_id = "tea_1".to_string();
        assert!(record.validate().is_ok());
    }

    #[test]
    fn delete_item_decodes_to_entity_ref() {
        let item = SyncQueueItem::new(
            OperationType::Delete,
            Resource::Teas,
            "tea_7",
            json!({ "id": "tea_7" }),
        );

        assert!(item.id.starts_with("teas_tea_7_"));
        assert_eq!(
            item.operation().unwrap(),
            SyncOperation::Delete(EntityRef {
                resource: Resource::Teas,
                id: "tea_7".to_string(),
            })
        );
    }

    #[test]
    fn malformed_payload_is_a_validation_error() {
        let item = SyncQueueItem::new(
            OperationType::Update,
            Resource::HealthRecords,
            "health_1",
            json!({ "id": "health_1" }),
        );

        let error = item.operation().unwrap_err();
        assert!(!error.is_retryable());
    }

    #[test]
    fn cache_entry_expiry_is_inclusive() {
        let entry = CacheEntry {
            data: 1,
            timestamp: 0,
            expires_at: Some(100),
            version: 1,
        };
        assert!(!entry.is_expired(99));
        assert!(entry.is_expired(100));
    }
}
