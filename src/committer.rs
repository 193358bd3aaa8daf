/* src/committer.rs */

use crate::builder::Builder;
use crate::config::AppConfig;
use crate::daemon::DaemonControl;
use crate::error::{CommitError, StoreError};
use crate::store::{StoreTx, ZoneStore, with_deadline};
use crate::zone::Zone;
use fancy_log::{LogLevel, log};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};

/// Outcome of promoting one zone's pending mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitSummary {
    pub updated: u64,
    pub deleted: u64,
    /// New serial, present only when something was promoted.
    pub serial: Option<u32>,
}

impl CommitSummary {
    pub fn changed(&self) -> bool {
        self.updated + self.deleted > 0
    }
}

/// Promotes pending record mutations on the primary and pushes the result
/// out through the builder.
pub struct Committer<S, D> {
    store: Arc<S>,
    builder: Arc<Builder<S, D>>,
    daemon: Arc<D>,
    interval: Duration,
    primary: bool,
}

impl<S: ZoneStore, D: DaemonControl> Committer<S, D> {
    pub fn new(
        store: Arc<S>,
        builder: Arc<Builder<S, D>>,
        daemon: Arc<D>,
        config: &AppConfig,
    ) -> Self {
        Self {
            store,
            builder,
            daemon,
            interval: config.committer_interval(),
            primary: config.primary,
        }
    }

    /// Spawns the ticker. Secondaries never commit, so nothing runs there.
    pub fn start(self: Arc<Self>) -> Option<JoinHandle<()>> {
        if !self.primary {
            log(
                LogLevel::Info,
                "Not a primary node; pending record changes will not be committed here.",
            );
            return None;
        }
        log(
            LogLevel::Info,
            &format!("Committer running every {:?}", self.interval),
        );
        Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
            loop {
                ticker.tick().await;
                self.tick().await;
            }
        }))
    }

    pub async fn tick(&self) {
        let zones = match with_deadline(self.store.active_zones()).await {
            Ok(zones) => zones,
            Err(e) => {
                log(
                    LogLevel::Warn,
                    &format!("Failed to list active zones, skipping this pass: {}", e),
                );
                return;
            }
        };

        for zone in &zones {
            match self.commit(zone).await {
                Ok(summary) if summary.changed() => log(
                    LogLevel::Info,
                    &format!(
                        "Committed zone {} ({}): {} updated, {} deleted, serial {:?}",
                        zone.id, zone.name, summary.updated, summary.deleted, summary.serial
                    ),
                ),
                Ok(_) => {}
                Err(e) => log(
                    LogLevel::Error,
                    &format!("Failed to commit zone {} ({}): {}", zone.id, zone.name, e),
                ),
            }
        }
    }

    /// Promotes and bumps the serial in one transaction, regenerates the zone,
    /// and notifies secondaries only when something changed.
    pub async fn commit(&self, zone: &Zone) -> Result<CommitSummary, CommitError> {
        let summary = with_deadline(async {
            let mut tx = self.store.begin().await?;
            let updated = tx.commit_zone_records(zone.id).await?;
            let deleted = tx.commit_deleted_zone_records(zone.id).await?;
            let serial = if updated + deleted > 0 {
                Some(tx.bump_zone_serial(zone.id).await?)
            } else {
                None
            };
            tx.commit().await?;
            Ok::<_, StoreError>(CommitSummary {
                updated,
                deleted,
                serial,
            })
        })
        .await?;

        // The builder re-reads the zone row, so it publishes the bumped serial.
        self.builder.generate(zone).await?;

        if summary.changed() {
            self.daemon.notify(&zone.name).await?;
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::testing::{Call, FakeDaemon};
    use crate::store::{MemoryStore, RecordState, StoredRecord};
    use std::fs;
    use std::path::PathBuf;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        store: Arc<MemoryStore>,
        daemon: Arc<FakeDaemon>,
        builder: Arc<Builder<MemoryStore, FakeDaemon>>,
        committer: Arc<Committer<MemoryStore, FakeDaemon>>,
    }

    fn fixture(primary: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let config = AppConfig::from_toml(&format!(
            r#"
zone_dir = "{}"
bind_gen_conf = "{}"
primary = {}

[nameservers]
default = "main"

[nameservers.groups]
main = ["ns1.example.com", "ns2.example.com", "ns3.example.com"]
"#,
            root.display(),
            root.join("named.conf.generated").display(),
            primary
        ))
        .unwrap();
        let store = Arc::new(MemoryStore::new());
        let daemon = Arc::new(FakeDaemon::default());
        let builder = Arc::new(Builder::new(store.clone(), daemon.clone(), &config).unwrap());
        let committer = Arc::new(Committer::new(
            store.clone(),
            builder.clone(),
            daemon.clone(),
            &config,
        ));
        Fixture {
            _dir: dir,
            root,
            store,
            daemon,
            builder,
            committer,
        }
    }

    fn zone() -> Zone {
        Zone {
            id: 1,
            name: "example.com".to_string(),
            serial: 2001062501,
            admin: "hostmaster.example.com".to_string(),
            refresh: 21600,
            retry: 3600,
            expire: 604800,
            ttl: 86400,
            active: true,
            nameserver_group: None,
        }
    }

    fn state(value: &str) -> RecordState {
        RecordState {
            ttl: None,
            value: value.to_string(),
            active: true,
        }
    }

    fn notifies(daemon: &FakeDaemon) -> usize {
        daemon.count(&Call::Notify("example.com".to_string()))
    }

    #[tokio::test]
    async fn nothing_pending_regenerates_without_notify() {
        let f = fixture(true);
        f.store.upsert_zone(zone()).await.unwrap();

        let summary = f.committer.commit(&zone()).await.unwrap();
        assert!(!summary.changed());
        assert_eq!(summary.serial, None);
        assert_eq!(f.store.zone(1).await.unwrap().serial, 2001062501);
        assert_eq!(notifies(&f.daemon), 0);
        assert_eq!(
            f.daemon.count(&Call::ReloadZone("example.com".to_string())),
            1
        );
    }

    #[tokio::test]
    async fn promoted_update_bumps_serial_and_notifies_once() {
        let f = fixture(true);
        f.store.upsert_zone(zone()).await.unwrap();
        f.store
            .stage_create(1, "www", "A", state("10.0.0.1"))
            .await
            .unwrap();

        let summary = f.committer.commit(&zone()).await.unwrap();
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.deleted, 0);
        let serial = summary.serial.unwrap();
        assert!(serial > 2001062501);
        assert_eq!(f.store.zone(1).await.unwrap().serial, serial);
        assert_eq!(notifies(&f.daemon), 1);

        let published = fs::read_to_string(f.root.join("example.com.zone")).unwrap();
        assert!(published.contains(&format!("\t\t\t{} ; Serial\n", serial)));
        assert!(published.ends_with("www\tIN\tA\t10.0.0.1\n"));

        let again = f
            .committer
            .commit(&f.store.zone(1).await.unwrap())
            .await
            .unwrap();
        assert_eq!(again.serial, None);
        assert_eq!(f.store.zone(1).await.unwrap().serial, serial);
        assert_eq!(notifies(&f.daemon), 1);
    }

    #[tokio::test]
    async fn builder_pass_after_commit_keeps_the_bumped_serial() {
        let f = fixture(true);
        f.store.upsert_zone(zone()).await.unwrap();
        let listed = f.store.active_zones().await.unwrap().remove(0);

        f.store
            .stage_create(1, "www", "A", state("10.0.0.1"))
            .await
            .unwrap();
        let serial = f.committer.commit(&listed).await.unwrap().serial.unwrap();
        assert_eq!(notifies(&f.daemon), 1);

        f.builder.generate(&listed).await.unwrap();
        let published = fs::read_to_string(f.root.join("example.com.zone")).unwrap();
        assert!(published.contains(&format!("\t\t\t{} ; Serial\n", serial)));
        assert!(!published.contains("2001062501 ; Serial"));
        assert!(published.ends_with("www\tIN\tA\t10.0.0.1\n"));
    }

    #[tokio::test]
    async fn promoted_delete_removes_the_record() {
        let f = fixture(true);
        f.store.upsert_zone(zone()).await.unwrap();
        f.store
            .insert_record(StoredRecord {
                id: 9,
                zone_id: 1,
                name: "old".to_string(),
                record_type: "CNAME".to_string(),
                ttl: None,
                value: "www.example.com".to_string(),
                active: true,
            })
            .await
            .unwrap();
        f.store.stage_delete(9).await.unwrap();

        let summary = f.committer.commit(&zone()).await.unwrap();
        assert_eq!(summary.deleted, 1);
        assert!(summary.serial.is_some());
        assert_eq!(notifies(&f.daemon), 1);
        let published = fs::read_to_string(f.root.join("example.com.zone")).unwrap();
        assert!(!published.contains("old\tIN\tCNAME"));
    }

    #[tokio::test]
    async fn failed_generation_keeps_the_commit_but_skips_notify() {
        let f = fixture(true);
        f.store.upsert_zone(zone()).await.unwrap();
        f.store
            .stage_create(1, "www", "A", state("10.0.0.1"))
            .await
            .unwrap();
        *f.daemon.fail_check_zone.lock() = true;

        assert!(matches!(
            f.committer.commit(&zone()).await,
            Err(CommitError::Build(_))
        ));
        assert!(f.store.zone(1).await.unwrap().serial > 2001062501);
        assert_eq!(notifies(&f.daemon), 0);
    }

    #[tokio::test]
    async fn unknown_zone_is_neither_generated_nor_notified() {
        let f = fixture(true);
        assert!(matches!(
            f.committer.commit(&zone()).await,
            Err(CommitError::Store(StoreError::ZoneNotFound(1)))
        ));
        assert!(f.daemon.calls().is_empty());
    }

    #[tokio::test]
    async fn tick_commits_every_active_zone() {
        let f = fixture(true);
        f.store.upsert_zone(zone()).await.unwrap();
        f.store
            .stage_create(1, "www", "A", state("10.0.0.1"))
            .await
            .unwrap();
        f.committer.tick().await;
        assert_eq!(notifies(&f.daemon), 1);
        assert_eq!(f.store.zone_active_records(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn secondary_does_not_start() {
        let f = fixture(false);
        assert!(f.committer.clone().start().is_none());
    }
}
