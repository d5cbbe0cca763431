use crate::source::DeviceSource;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use rpacore::{parse_device_ids, DeviceProbe};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Allocation state of a pooled device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Unavailable,
    Available,
    Allocating,
    Busy,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceStatus::Unavailable => "unavailable",
            DeviceStatus::Available => "available",
            DeviceStatus::Allocating => "allocating",
            DeviceStatus::Busy => "busy",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceRecord {
    pub id: String,
    pub status: DeviceStatus,
    pub last_heartbeat: DateTime<Utc>,
    /// Bumped by every claim attempt
    #[serde(skip)]
    claims: u64,
}

impl DeviceRecord {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            status: DeviceStatus::Unavailable,
            last_heartbeat: Utc::now(),
            claims: 0,
        }
    }

    fn set(&mut self, status: DeviceStatus) {
        self.status = status;
        self.last_heartbeat = Utc::now();
    }
}

/// Point-in-time view of one device for reporting
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSnapshot {
    pub status: DeviceStatus,
    pub connected: bool,
    pub seconds_since_heartbeat: i64,
    pub quarantined: bool,
}

/// Changes applied by one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Undeclared but still busy; retried on the next pass
    pub deferred: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub health_check_interval: Duration,
    pub reconcile_interval: Duration,
    pub quarantine_grace: Duration,
    pub quarantine_sweep_interval: Duration,
    pub probe_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(10),
            reconcile_interval: Duration::from_secs(600),
            quarantine_grace: Duration::from_secs(600),
            quarantine_sweep_interval: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Default)]
struct PoolState {
    devices: HashMap<String, DeviceRecord>,
    quarantined: HashMap<String, DateTime<Utc>>,
}

struct PoolInner {
    state: Mutex<PoolState>,
    probe: Arc<dyn DeviceProbe>,
    config: PoolConfig,
}

#[derive(Clone, Copy)]
enum ClaimPass {
    /// Only devices the health check already saw as available
    Available,
    /// Anything not currently claimed, including unknown ids
    Idle,
}

/// Process-wide registry of devices shared by all running flows
///
/// The device table and the quarantine list sit behind one mutex, so the
/// transition from "observed claimable" to `Allocating` is a single
/// indivisible step. Probes run with the lock released; a record is only
/// written back if nobody else moved it in the meantime.
#[derive(Clone)]
pub struct DevicePool {
    inner: Arc<PoolInner>,
}

impl DevicePool {
    pub fn new(probe: Arc<dyn DeviceProbe>) -> Self {
        Self::with_config(probe, PoolConfig::default())
    }

    pub fn with_config(probe: Arc<dyn DeviceProbe>, config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState::default()),
                probe,
                config,
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Add devices from a comma separated list as `Unavailable`
    pub fn register_devices(&self, csv_ids: &str) {
        self.register(&parse_device_ids(csv_ids));
    }

    pub fn register(&self, ids: &[String]) {
        let mut state = self.inner.state.lock();
        for id in ids {
            if !state.devices.contains_key(id) {
                state.devices.insert(id.clone(), DeviceRecord::new(id));
                tracing::info!("Device {} added to pool", id);
            }
        }
    }

    pub fn status(&self, id: &str) -> Option<DeviceStatus> {
        self.inner.state.lock().devices.get(id).map(|r| r.status)
    }

    pub fn is_quarantined(&self, id: &str) -> bool {
        self.inner.state.lock().quarantined.contains_key(id)
    }

    pub fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.state.lock().devices.keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn probe(&self, id: &str) -> bool {
        match tokio::time::timeout(self.inner.config.probe_timeout, self.inner.probe.probe(id)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::debug!("Probe of {} failed: {}", id, e);
                false
            }
            Err(_) => {
                tracing::debug!("Probe of {} timed out", id);
                false
            }
        }
    }

    /// Claim one device from a comma separated candidate list
    ///
    /// Returns `None` when nothing could be claimed; retrying is up to the
    /// caller.
    pub async fn get_available_device(&self, candidate_ids: &str) -> Option<String> {
        self.claim(&parse_device_ids(candidate_ids)).await
    }

    pub async fn claim(&self, candidates: &[String]) -> Option<String> {
        for pass in [ClaimPass::Available, ClaimPass::Idle] {
            for id in candidates {
                if !self.begin_claim(id, pass) {
                    continue;
                }
                if self.finish_claim(id).await {
                    tracing::info!("Device {} allocated", id);
                    return Some(id.clone());
                }
            }
        }
        None
    }

    fn begin_claim(&self, id: &str, pass: ClaimPass) -> bool {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        if state.quarantined.contains_key(id) {
            return false;
        }
        let record = match pass {
            ClaimPass::Available => match state.devices.get_mut(id) {
                Some(record) => record,
                None => return false,
            },
            ClaimPass::Idle => state
                .devices
                .entry(id.to_string())
                .or_insert_with(|| DeviceRecord::new(id)),
        };
        let eligible = match pass {
            ClaimPass::Available => record.status == DeviceStatus::Available,
            ClaimPass::Idle => !matches!(record.status, DeviceStatus::Busy | DeviceStatus::Allocating),
        };
        if eligible {
            record.set(DeviceStatus::Allocating);
            record.claims += 1;
        }
        eligible
    }

    async fn finish_claim(&self, id: &str) -> bool {
        let connected = self.probe(id).await;
        let mut state = self.inner.state.lock();
        match state.devices.get_mut(id) {
            Some(record) if record.status == DeviceStatus::Allocating => {
                if connected {
                    record.set(DeviceStatus::Busy);
                } else {
                    record.set(DeviceStatus::Unavailable);
                }
                connected
            }
            _ => false,
        }
    }

    /// Return a device to the pool after a probe
    ///
    /// The result is only written back if no claim started on the device
    /// while the probe ran; otherwise the device belongs to that claim.
    pub async fn release_device(&self, id: &str) {
        let Some(claims) = self.inner.state.lock().devices.get(id).map(|r| r.claims) else {
            return;
        };
        let connected = self.probe(id).await;
        let mut state = self.inner.state.lock();
        match state.devices.get_mut(id) {
            Some(record) if record.claims == claims => commit_release(record, connected),
            Some(_) => tracing::debug!("Release of {} skipped, device was claimed again", id),
            None => {}
        }
    }

    /// Quarantine a device whose task failed
    ///
    /// The device is skipped by every claim until the sweep releases it
    /// after the grace period.
    pub fn add_error_task_device(&self, id: &str) {
        self.inner
            .state
            .lock()
            .quarantined
            .insert(id.to_string(), Utc::now());
        tracing::warn!("Device {} quarantined after task failure", id);
    }

    /// Release quarantined devices whose grace period has elapsed
    ///
    /// A device stays on the quarantine list while it is probed, so no claim
    /// can start on it before its new status is written.
    pub async fn sweep_quarantine(&self) -> Vec<String> {
        let grace = self.inner.config.quarantine_grace;
        let now = Utc::now();
        let expired: Vec<(String, DateTime<Utc>)> = {
            let state = self.inner.state.lock();
            state
                .quarantined
                .iter()
                .filter(|(_, since)| (now - **since).to_std().is_ok_and(|elapsed| elapsed >= grace))
                .map(|(id, since)| (id.clone(), *since))
                .collect()
        };

        let mut released = Vec::new();
        for (id, since) in expired {
            let connected = self.probe(&id).await;
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            // quarantined again while the check ran
            if state.quarantined.get(&id) != Some(&since) {
                continue;
            }
            state.quarantined.remove(&id);
            if let Some(record) = state.devices.get_mut(&id) {
                commit_release(record, connected);
            }
            tracing::info!("Device {} left quarantine after grace period", id);
            released.push(id);
        }
        released.sort();
        released
    }

    /// Probe every idle or unavailable device and update its status
    ///
    /// Claimed devices are left alone.
    pub async fn check_health(&self) {
        let targets: Vec<String> = {
            let state = self.inner.state.lock();
            state
                .devices
                .values()
                .filter(|r| matches!(r.status, DeviceStatus::Available | DeviceStatus::Unavailable))
                .map(|r| r.id.clone())
                .collect()
        };

        let probes = targets.iter().map(|id| async move { (id, self.probe(id).await) });
        let outcomes = join_all(probes).await;

        let mut state = self.inner.state.lock();
        for (id, connected) in outcomes {
            let Some(record) = state.devices.get_mut(id.as_str()) else {
                continue;
            };
            if !matches!(record.status, DeviceStatus::Available | DeviceStatus::Unavailable) {
                continue;
            }
            let next = if connected {
                DeviceStatus::Available
            } else {
                DeviceStatus::Unavailable
            };
            if record.status != next {
                tracing::info!("Device {} is now {}", id, next);
            }
            record.set(next);
        }
    }

    /// Align the pool with the set of currently declared device ids
    pub fn reconcile(&self, declared: &[String]) -> ReconcileReport {
        let declared: HashSet<&str> = declared.iter().map(String::as_str).collect();
        let mut report = ReconcileReport::default();
        let mut state = self.inner.state.lock();

        let stale: Vec<(String, DeviceStatus)> = state
            .devices
            .values()
            .filter(|r| !declared.contains(r.id.as_str()))
            .map(|r| (r.id.clone(), r.status))
            .collect();
        for (id, status) in stale {
            if matches!(status, DeviceStatus::Busy | DeviceStatus::Allocating) {
                report.deferred.push(id);
                continue;
            }
            state.devices.remove(&id);
            tracing::info!("Device {} removed from pool, no longer declared", id);
            report.removed.push(id);
        }

        for id in declared {
            if !state.devices.contains_key(id) {
                state.devices.insert(id.to_string(), DeviceRecord::new(id));
                tracing::info!("Device {} added to pool as unavailable", id);
                report.added.push(id.to_string());
            }
        }

        report.added.sort();
        report.removed.sort();
        report.deferred.sort();
        report
    }

    /// Status of every pooled device, probing each for live connectivity
    pub async fn get_all_devices(&self) -> HashMap<String, DeviceSnapshot> {
        let (records, quarantined): (Vec<DeviceRecord>, HashSet<String>) = {
            let state = self.inner.state.lock();
            (
                state.devices.values().cloned().collect(),
                state.quarantined.keys().cloned().collect(),
            )
        };
        let now = Utc::now();

        let probes = records.into_iter().map(|record| {
            let quarantined = quarantined.contains(&record.id);
            async move {
                let connected = self.probe(&record.id).await;
                let snapshot = DeviceSnapshot {
                    status: record.status,
                    connected,
                    seconds_since_heartbeat: (now - record.last_heartbeat).num_seconds(),
                    quarantined,
                };
                (record.id, snapshot)
            }
        });
        join_all(probes).await.into_iter().collect()
    }

    /// Start the health-check, reconciliation and quarantine loops
    pub fn spawn_maintenance(&self, source: Arc<dyn DeviceSource>) -> MaintenanceHandle {
        let config = self.inner.config.clone();

        let pool = self.clone();
        let health = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.health_check_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                pool.check_health().await;
            }
        });

        let pool = self.clone();
        let reconcile = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.reconcile_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let source = source.clone();
                match tokio::task::spawn_blocking(move || source.declared_devices()).await {
                    Ok(declared) => {
                        let report = pool.reconcile(&declared);
                        tracing::debug!("Reconciled device pool: {:?}", report);
                    }
                    Err(e) => tracing::error!("Device source task failed: {}", e),
                }
            }
        });

        let pool = self.clone();
        let sweep = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.quarantine_sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                pool.sweep_quarantine().await;
            }
        });

        MaintenanceHandle {
            tasks: vec![health, reconcile, sweep],
        }
    }
}

fn commit_release(record: &mut DeviceRecord, connected: bool) {
    match record.status {
        DeviceStatus::Busy | DeviceStatus::Unavailable => {}
        status => {
            tracing::debug!("Release of {} skipped, device is {}", record.id, status);
            return;
        }
    }
    if connected {
        record.set(DeviceStatus::Available);
        tracing::info!("Device {} released", record.id);
    } else {
        record.set(DeviceStatus::Unavailable);
        tracing::warn!("Device {} released but unreachable", record.id);
    }
}

/// Background pool loops; aborted when dropped
pub struct MaintenanceHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl MaintenanceHandle {
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
