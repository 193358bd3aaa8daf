/* src/store.rs */

//! Query surface the builder and committer consume, plus an in-memory store
//! seeded from TOML that implements it.

use crate::error::{StoreError, ZoneError};
use crate::records::{is_domain_name, parse_value};
use crate::zone::Zone;
use async_trait::async_trait;
use chrono::Local;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;

/// Upper bound on store work issued from the periodic workers.
pub const STORE_DEADLINE: Duration = Duration::from_secs(5 * 60);

/// Runs a store operation under [`STORE_DEADLINE`]. Dropping a timed-out
/// transaction rolls it back.
pub async fn with_deadline<T>(
    op: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    timeout(STORE_DEADLINE, op)
        .await
        .map_err(|_| StoreError::Timeout)?
}

/// Durable view of a record row.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoredRecord {
    pub id: i64,
    pub zone_id: i64,
    #[serde(default)]
    pub name: String,
    /// Type tag as stored; may name a type this build does not know.
    #[serde(rename = "type")]
    pub record_type: String,
    #[serde(default)]
    pub ttl: Option<u32>,
    pub value: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[async_trait]
pub trait ZoneStore: Send + Sync + 'static {
    type Tx: StoreTx;

    async fn active_zones(&self) -> Result<Vec<Zone>, StoreError>;

    /// Current row of one zone, including its latest serial.
    async fn zone(&self, zone_id: i64) -> Result<Zone, StoreError>;

    /// Durable, active records of one zone in store order.
    async fn zone_active_records(&self, zone_id: i64) -> Result<Vec<StoredRecord>, StoreError>;

    async fn zone_nameserver_group(&self, zone_id: i64) -> Result<Option<String>, StoreError>;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;
}

/// A store transaction. Dropping it without calling `commit` rolls it back.
#[async_trait]
pub trait StoreTx: Send {
    /// Promotes pending creates and updates; returns the number of rows changed.
    async fn commit_zone_records(&mut self, zone_id: i64) -> Result<u64, StoreError>;

    /// Removes rows pending deletion; returns the number of rows removed.
    async fn commit_deleted_zone_records(&mut self, zone_id: i64) -> Result<u64, StoreError>;

    /// Advances the zone serial and returns the new value.
    async fn bump_zone_serial(&mut self, zone_id: i64) -> Result<u32, StoreError>;

    async fn commit(self) -> Result<(), StoreError>;
}

/// Content of a record that is, or will be once promoted, served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordState {
    pub ttl: Option<u32>,
    pub value: String,
    pub active: bool,
}

#[derive(Debug, Clone)]
enum Pending {
    Upsert(RecordState),
    Delete,
}

#[derive(Debug, Clone)]
struct Row {
    id: i64,
    zone_id: i64,
    name: String,
    record_type: String,
    live: Option<RecordState>,
    pending: Option<Pending>,
}

#[derive(Debug, Clone, Default)]
struct StoreState {
    zones: BTreeMap<i64, Zone>,
    rows: BTreeMap<i64, Row>,
    next_record_id: i64,
}

impl StoreState {
    fn zone_mut(&mut self, zone_id: i64) -> Result<&mut Zone, StoreError> {
        self.zones
            .get_mut(&zone_id)
            .ok_or(StoreError::ZoneNotFound(zone_id))
    }

    fn ensure_zone(&self, zone_id: i64) -> Result<&Zone, StoreError> {
        self.zones.get(&zone_id).ok_or(StoreError::ZoneNotFound(zone_id))
    }

    fn row_mut(&mut self, record_id: i64) -> Result<&mut Row, StoreError> {
        self.rows
            .get_mut(&record_id)
            .ok_or(StoreError::RecordNotFound(record_id))
    }
}

#[derive(Debug, Default, Deserialize)]
struct Seed {
    #[serde(default)]
    zones: Vec<Zone>,
    #[serde(default)]
    records: Vec<StoredRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads zones and committed records from a TOML seed file.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let seed_err = |reason: String| StoreError::Seed {
            path: path.to_path_buf(),
            reason,
        };
        let content = fs::read_to_string(path).map_err(|e| seed_err(e.to_string()))?;
        let seed: Seed = toml::from_str(&content).map_err(|e| seed_err(e.to_string()))?;

        let mut state = StoreState::default();
        for zone in seed.zones {
            check_zone(&zone)?;
            state.zones.insert(zone.id, zone);
        }
        for record in seed.records {
            state.ensure_zone(record.zone_id)?;
            insert_row(&mut state, record);
        }
        Ok(Self {
            state: Arc::new(Mutex::new(state)),
        })
    }

    /// Inserts or replaces a zone.
    pub async fn upsert_zone(&self, zone: Zone) -> Result<(), StoreError> {
        check_zone(&zone)?;
        self.state.lock().await.zones.insert(zone.id, zone);
        Ok(())
    }

    /// Inserts an already-committed record as-is, without validating it.
    pub async fn insert_record(&self, record: StoredRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.ensure_zone(record.zone_id)?;
        insert_row(&mut state, record);
        Ok(())
    }

    /// Stages a new record; it is served once the committer promotes it.
    pub async fn stage_create(
        &self,
        zone_id: i64,
        name: &str,
        record_type: &str,
        record: RecordState,
    ) -> Result<i64, StoreError> {
        parse_value(record_type, &record.value)?;
        let mut state = self.state.lock().await;
        state.ensure_zone(zone_id)?;
        state.next_record_id += 1;
        let id = state.next_record_id;
        state.rows.insert(
            id,
            Row {
                id,
                zone_id,
                name: name.to_string(),
                record_type: record_type.to_string(),
                live: None,
                pending: Some(Pending::Upsert(record)),
            },
        );
        Ok(id)
    }

    pub async fn stage_update(&self, record_id: i64, record: RecordState) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let row = state.row_mut(record_id)?;
        parse_value(&row.record_type, &record.value)?;
        row.pending = Some(Pending::Upsert(record));
        Ok(())
    }

    /// Marks a record for deletion. A record that was never promoted is
    /// dropped straight away.
    pub async fn stage_delete(&self, record_id: i64) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let row = state.row_mut(record_id)?;
        if row.live.is_none() {
            state.rows.remove(&record_id);
        } else {
            row.pending = Some(Pending::Delete);
        }
        Ok(())
    }
}

fn check_zone(zone: &Zone) -> Result<(), StoreError> {
    if !is_domain_name(&zone.name) {
        return Err(ZoneError::InvalidOrigin(zone.name.clone()).into());
    }
    zone.check_timers()?;
    Ok(())
}

fn insert_row(state: &mut StoreState, record: StoredRecord) {
    state.next_record_id = state.next_record_id.max(record.id);
    state.rows.insert(
        record.id,
        Row {
            id: record.id,
            zone_id: record.zone_id,
            name: record.name,
            record_type: record.record_type,
            live: Some(RecordState {
                ttl: record.ttl,
                value: record.value,
                active: record.active,
            }),
            pending: None,
        },
    );
}

#[async_trait]
impl ZoneStore for MemoryStore {
    type Tx = MemoryTx;

    async fn active_zones(&self) -> Result<Vec<Zone>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.zones.values().filter(|z| z.active).cloned().collect())
    }

    async fn zone(&self, zone_id: i64) -> Result<Zone, StoreError> {
        self.state.lock().await.ensure_zone(zone_id).cloned()
    }

    async fn zone_active_records(&self, zone_id: i64) -> Result<Vec<StoredRecord>, StoreError> {
        let state = self.state.lock().await;
        state.ensure_zone(zone_id)?;
        Ok(state
            .rows
            .values()
            .filter(|row| row.zone_id == zone_id)
            .filter_map(|row| {
                let live = row.live.as_ref().filter(|live| live.active)?;
                Some(StoredRecord {
                    id: row.id,
                    zone_id: row.zone_id,
                    name: row.name.clone(),
                    record_type: row.record_type.clone(),
                    ttl: live.ttl,
                    value: live.value.clone(),
                    active: live.active,
                })
            })
            .collect())
    }

    async fn zone_nameserver_group(&self, zone_id: i64) -> Result<Option<String>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.ensure_zone(zone_id)?.nameserver_group.clone())
    }

    async fn begin(&self) -> Result<MemoryTx, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let work = guard.clone();
        Ok(MemoryTx { guard, work })
    }
}

/// Holds the store lock for its whole lifetime and works on a copy, so a
/// half-applied transaction is never visible.
pub struct MemoryTx {
    guard: OwnedMutexGuard<StoreState>,
    work: StoreState,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn commit_zone_records(&mut self, zone_id: i64) -> Result<u64, StoreError> {
        self.work.ensure_zone(zone_id)?;
        let mut changed = 0;
        for row in self.work.rows.values_mut().filter(|r| r.zone_id == zone_id) {
            match row.pending.take() {
                Some(Pending::Upsert(state)) => {
                    row.live = Some(state);
                    changed += 1;
                }
                other => row.pending = other,
            }
        }
        Ok(changed)
    }

    async fn commit_deleted_zone_records(&mut self, zone_id: i64) -> Result<u64, StoreError> {
        self.work.ensure_zone(zone_id)?;
        let doomed: Vec<i64> = self
            .work
            .rows
            .values()
            .filter(|r| r.zone_id == zone_id && matches!(r.pending, Some(Pending::Delete)))
            .map(|r| r.id)
            .collect();
        for id in &doomed {
            self.work.rows.remove(id);
        }
        Ok(doomed.len() as u64)
    }

    async fn bump_zone_serial(&mut self, zone_id: i64) -> Result<u32, StoreError> {
        let zone = self.work.zone_mut(zone_id)?;
        zone.serial = Zone::next_serial(zone.serial, Local::now().date_naive());
        Ok(zone.serial)
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        *self.guard = std::mem::take(&mut self.work);
        Ok(())
    }
}
