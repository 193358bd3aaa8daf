/* src/builder.rs */

//! Periodic zone-file generation.
//!
//! Each tick renders every active zone, publishes it through a staged file
//! that must pass the zone checker before it is renamed into place, and keeps
//! the daemon's zone-inclusion config in step with the set of loadable zones.

use crate::bind::write_bind_config;
use crate::config::{AppConfig, NameserverConfig, ReverseStub};
use crate::daemon::DaemonControl;
use crate::error::{BuildError, ConfigError, ZoneError};
use crate::records::{Record, RecordType, fqdn};
use crate::rfc2317::{Rfc2317Stub, rfc2317_stub};
use crate::store::{ZoneStore, with_deadline};
use crate::zone::{Zone, write_zone};
use fancy_log::{LogLevel, log};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};

pub struct Builder<S, D> {
    store: Arc<S>,
    daemon: Arc<D>,
    zone_dir: PathBuf,
    bind_gen_conf: PathBuf,
    nameservers: NameserverConfig,
    reverse_stubs: Vec<ReverseStub>,
    interval: Duration,
    /// Serializes every staged write, check and rename.
    gen_lock: Mutex<()>,
    /// Sorted zone names in the last successfully published config.
    loaded_zones: parking_lot::Mutex<Vec<String>>,
}

/// Classless delegations sharing one parent reverse zone. The first stub
/// supplies the SOA fields.
struct ReverseZone<'a> {
    head: &'a ReverseStub,
    delegations: Vec<(&'a ReverseStub, Rfc2317Stub)>,
}

impl<S: ZoneStore, D: DaemonControl> Builder<S, D> {
    pub fn new(store: Arc<S>, daemon: Arc<D>, config: &AppConfig) -> Result<Self, ConfigError> {
        config.nameservers.validate()?;
        Ok(Self {
            store,
            daemon,
            zone_dir: config.zone_dir.clone(),
            bind_gen_conf: config.bind_gen_conf.clone(),
            nameservers: config.nameservers.clone(),
            reverse_stubs: config.reverse_stubs.clone(),
            interval: config.generator_interval(),
            gen_lock: Mutex::new(()),
            loaded_zones: parking_lot::Mutex::new(Vec::new()),
        })
    }

    /// Renders `zone` from the store and publishes it, then asks the daemon to
    /// reload it. Nothing visible changes unless the checker accepts the file.
    ///
    /// Only `zone.id` is taken from the argument. SOA fields and records are
    /// read from the store under the generation lock, so a serial bumped after
    /// the caller listed its zones is never published backwards.
    pub async fn generate(&self, zone: &Zone) -> Result<(), BuildError> {
        let _lock = self.gen_lock.lock().await;
        let (current, content) = self.render(zone.id).await?;
        self.publish_zone(&current.name, &content).await?;
        log(
            LogLevel::Debug,
            &format!("Published zone {} (serial {})", current.name, current.serial),
        );
        Ok(())
    }

    /// Writes exactly what `generate` would publish for `zone`.
    pub async fn preview<W: Write + Send>(&self, zone: &Zone, w: &mut W) -> Result<(), BuildError> {
        let (_, content) = self.render(zone.id).await?;
        w.write_all(&content).map_err(ZoneError::Io)?;
        Ok(())
    }

    /// Zone names in the last published zone-inclusion config.
    pub fn loaded_zones(&self) -> Vec<String> {
        self.loaded_zones.lock().clone()
    }

    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        log(
            LogLevel::Info,
            &format!("Zone builder running every {:?}", self.interval),
        );
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
            loop {
                ticker.tick().await;
                self.tick().await;
            }
        })
    }

    /// One generation pass over every active zone and reverse stub.
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

        let mut loaded = Vec::with_capacity(zones.len());
        for zone in &zones {
            let result = self.generate(zone).await;
            if let Err(e) = &result {
                log(
                    LogLevel::Error,
                    &format!(
                        "Failed to generate zone {} ({}): {}",
                        zone.id, zone.name, e
                    ),
                );
            }
            if result.is_ok() || self.is_published(&zone.name) {
                loaded.push(zone.name.trim_end_matches('.').to_string());
            }
        }

        for (parent, reverse) in self.reverse_zones() {
            if zones.iter().any(|z| z.name.trim_end_matches('.') == parent) {
                log(
                    LogLevel::Warn,
                    &format!(
                        "Reverse zone {} is also a stored zone; its RFC 2317 stubs are not published",
                        parent
                    ),
                );
                continue;
            }
            let result = self.generate_reverse_zone(&parent, &reverse).await;
            if let Err(e) = &result {
                log(
                    LogLevel::Error,
                    &format!("Failed to generate reverse zone {}: {}", parent, e),
                );
            }
            if result.is_ok() || self.is_published(&parent) {
                loaded.push(parent);
            }
        }

        loaded.sort();
        loaded.dedup();
        if *self.loaded_zones.lock() == loaded {
            return;
        }

        match self.publish_config(&loaded).await {
            Ok(()) => {
                log(
                    LogLevel::Info,
                    &format!(
                        "Published zone config {:?} with {} zones",
                        self.bind_gen_conf,
                        loaded.len()
                    ),
                );
                *self.loaded_zones.lock() = loaded;
            }
            Err(e) => log(
                LogLevel::Error,
                &format!("Failed to publish zone config: {}", e),
            ),
        }
    }

    async fn render(&self, zone_id: i64) -> Result<(Zone, Vec<u8>), BuildError> {
        let zone = with_deadline(self.store.zone(zone_id)).await?;
        zone.check_timers()?;
        let group = with_deadline(self.store.zone_nameserver_group(zone.id)).await?;
        let hosts = self.hosts(group.as_deref())?;
        let stored = with_deadline(self.store.zone_active_records(zone.id)).await?;

        let mut records = nameserver_records(hosts);
        records.reserve(stored.len());
        for row in stored {
            records.push(Record {
                name: row.name,
                ttl: row.ttl,
                record_type: row.record_type.parse::<RecordType>()?,
                value: row.value,
            });
        }
        let content = serialize(&zone, hosts, &records)?;
        Ok((zone, content))
    }

    async fn generate_reverse_zone(
        &self,
        parent: &str,
        reverse: &ReverseZone<'_>,
    ) -> Result<(), BuildError> {
        let _lock = self.gen_lock.lock().await;
        let head = reverse.head;
        let zone = Zone {
            id: 0,
            name: parent.to_string(),
            serial: head.serial,
            admin: head.admin.clone(),
            refresh: head.refresh,
            retry: head.retry,
            expire: head.expire,
            ttl: head.ttl,
            active: true,
            nameserver_group: head.nameserver_group.clone(),
        };
        zone.check_timers()?;
        let hosts = self.hosts(head.nameserver_group.as_deref())?;

        let mut records = nameserver_records(hosts);
        for (stub, delegation) in &reverse.delegations {
            records.extend(
                stub.delegate_to
                    .iter()
                    .map(|host| Record::new(delegation.delegation.as_str(), RecordType::Ns, host.as_str())),
            );
            records.extend(delegation.cnames.iter().map(|cname| Record {
                name: fqdn(&cname.name),
                ..cname.clone()
            }));
        }

        let content = serialize(&zone, hosts, &records)?;
        self.publish_zone(parent, &content).await
    }

    /// Configured stubs grouped by parent reverse zone, in config order.
    fn reverse_zones(&self) -> BTreeMap<String, ReverseZone<'_>> {
        let mut zones: BTreeMap<String, ReverseZone<'_>> = BTreeMap::new();
        for stub in &self.reverse_stubs {
            let Some(delegation) = rfc2317_stub(stub.prefix, None) else {
                continue;
            };
            zones
                .entry(delegation.parent_zone.clone())
                .or_insert_with(|| ReverseZone {
                    head: stub,
                    delegations: Vec::new(),
                })
                .delegations
                .push((stub, delegation));
        }
        zones
    }

    fn hosts(&self, group: Option<&str>) -> Result<&[String], BuildError> {
        self.nameservers
            .group(group)
            .filter(|hosts| !hosts.is_empty())
            .ok_or_else(|| {
                BuildError::UnknownNameserverGroup(
                    group.unwrap_or(&self.nameservers.default).to_string(),
                )
            })
    }

    fn zone_path(&self, zone: &str) -> Result<PathBuf, BuildError> {
        let stem = zone.trim_end_matches('.');
        if stem.is_empty() || stem.contains(['/', '\\']) {
            return Err(ZoneError::InvalidOrigin(zone.to_string()).into());
        }
        Ok(self.zone_dir.join(format!("{}.zone", stem)))
    }

    fn is_published(&self, zone: &str) -> bool {
        self.zone_path(zone).is_ok_and(|path| path.exists())
    }

    async fn publish_zone(&self, zone: &str, content: &[u8]) -> Result<(), BuildError> {
        let target = self.zone_path(zone)?;
        let staged = StagedFile::write(with_suffix(&target, ".temp"), content)?;
        self.daemon.check_zone(zone, staged.path()).await?;
        staged.persist(&target)?;
        self.daemon.reload_zone(zone).await?;
        Ok(())
    }

    async fn publish_config(&self, zones: &[String]) -> Result<(), BuildError> {
        let _lock = self.gen_lock.lock().await;
        let mut content = Vec::new();
        write_bind_config(&mut content, &self.zone_dir, zones).map_err(|source| BuildError::Io {
            path: self.bind_gen_conf.clone(),
            source,
        })?;
        let staged = StagedFile::write(with_suffix(&self.bind_gen_conf, ".temp"), &content)?;
        self.daemon.check_config(staged.path()).await?;
        staged.persist(&self.bind_gen_conf)?;
        self.daemon.reload().await?;
        Ok(())
    }
}

fn nameserver_records(hosts: &[String]) -> Vec<Record> {
    hosts
        .iter()
        .map(|host| Record::new("@", RecordType::Ns, host.as_str()))
        .collect()
}

fn serialize(zone: &Zone, hosts: &[String], records: &[Record]) -> Result<Vec<u8>, BuildError> {
    let primary = hosts.first().map(String::as_str).unwrap_or_default();
    let mut content = Vec::new();
    write_zone(&mut content, &zone.name, zone.ttl, &zone.soa(primary), records)?;
    Ok(content)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// A file written next to its final location. It is removed on drop unless
/// `persist` renamed it into place.
struct StagedFile {
    path: PathBuf,
    armed: bool,
}

impl StagedFile {
    /// Writes and fsyncs `content`, so a rename never exposes a file whose
    /// data did not reach the disk.
    fn write(path: PathBuf, content: &[u8]) -> Result<Self, BuildError> {
        let staged = Self { path, armed: true };
        let io_err = |source: std::io::Error| BuildError::Io {
            path: staged.path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&staged.path)
            .map_err(io_err)?;
        file.write_all(content).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        Ok(staged)
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn persist(mut self, target: &Path) -> Result<(), BuildError> {
        fs::rename(&self.path, target).map_err(|source| BuildError::Io {
            path: target.to_path_buf(),
            source,
        })?;
        self.armed = false;

        // Makes the rename itself durable.
        if let Some(parent) = target.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.armed {
            let _ = fs::remove_file(&self.path);
        }
    }
}
