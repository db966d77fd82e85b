// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Source of truth for what devices exist and which driver instance backs
//! each. A passive container: no scheduling, probing, or reporting happens
//! here. Reads are snapshots; register/reload take the write lock briefly.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::device::{DeviceDescriptor, DeviceRuntime, DeviceSnapshot};
use crate::driver::{self, disabled::DisabledDriver, BuildError, Driver};
use crate::metrics::Metrics;
use crate::secret::SecretStore;

/// A registered device: descriptor, driver, and runtime state, owned
/// together for the descriptor's lifetime.
pub struct DeviceEntry {
    pub descriptor: DeviceDescriptor,
    pub driver: Box<dyn Driver>,
    /// Written only by this device's scheduler task.
    pub runtime: RwLock<DeviceRuntime>,
    /// Depth of the action queue waiting on this device.
    pub pending_actions: AtomicU32,
    /// Serializes probe and act on this device.
    pub op_lock: Mutex<()>,
    /// Child of the process-wide shutdown token; also cancelled on removal.
    pub cancel: CancellationToken,
    /// Effective base probe interval (already clamped).
    pub interval: Duration,
}

impl DeviceEntry {
    pub async fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            runtime: self.runtime.read().await.clone(),
            pending_actions: self.pending_actions.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate device id: {0}")]
    DuplicateId(String),
    #[error("device not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Build(#[from] BuildError),
}

/// Outcome of a transactional reload.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ReloadDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub replaced: Vec<String>,
}

pub struct Registry {
    devices: RwLock<IndexMap<String, Arc<DeviceEntry>>>,
    secrets: Arc<SecretStore>,
    metrics: Option<Arc<Metrics>>,
    shutdown: CancellationToken,
}

impl Registry {
    pub fn new(
        secrets: Arc<SecretStore>,
        metrics: Option<Arc<Metrics>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self { devices: RwLock::new(IndexMap::new()), secrets, metrics, shutdown }
    }

    /// Drop a retired entry's per-id metric series so removed devices don't
    /// keep reporting their last-seen values.
    async fn forget_series(&self, entry: &DeviceEntry) {
        let Some(ref metrics) = self.metrics else {
            return;
        };
        // Env-sensor gauges are keyed {id, module}; recover the module names
        // from the last reading the scheduler recorded.
        let modules: Vec<String> = {
            let runtime = entry.runtime.read().await;
            runtime
                .last_reading
                .as_ref()
                .and_then(|r| r.get("modules"))
                .and_then(|m| m.as_object())
                .map(|m| m.keys().cloned().collect())
                .unwrap_or_default()
        };
        metrics.forget_device(
            &entry.descriptor.id,
            entry.descriptor.category.as_str(),
            &entry.descriptor.driver,
            &modules,
        );
    }

    /// Construct the driver and store descriptor + driver together.
    pub async fn register(
        &self,
        descriptor: DeviceDescriptor,
        interval: Duration,
    ) -> Result<Arc<DeviceEntry>, RegistryError> {
        if self.devices.read().await.contains_key(&descriptor.id) {
            return Err(RegistryError::DuplicateId(descriptor.id));
        }
        let driver = driver::build(&descriptor, &self.secrets).await?;
        self.insert(descriptor, driver, interval).await
    }

    /// Register with the `disabled` driver after a build failure, so the
    /// device stays visible instead of silently vanishing.
    pub async fn register_disabled(
        &self,
        descriptor: DeviceDescriptor,
        interval: Duration,
        reason: &str,
    ) -> Result<Arc<DeviceEntry>, RegistryError> {
        if self.devices.read().await.contains_key(&descriptor.id) {
            return Err(RegistryError::DuplicateId(descriptor.id));
        }
        let driver: Box<dyn Driver> = Box::new(DisabledDriver::new(reason));
        self.insert(descriptor, driver, interval).await
    }

    /// Register a pre-built driver. Used by reload plumbing and test rigs.
    pub(crate) async fn insert(
        &self,
        descriptor: DeviceDescriptor,
        driver: Box<dyn Driver>,
        interval: Duration,
    ) -> Result<Arc<DeviceEntry>, RegistryError> {
        let entry = Arc::new(DeviceEntry {
            descriptor,
            driver,
            runtime: RwLock::new(DeviceRuntime::default()),
            pending_actions: AtomicU32::new(0),
            op_lock: Mutex::new(()),
            cancel: self.shutdown.child_token(),
            interval,
        });
        let mut devices = self.devices.write().await;
        if devices.contains_key(&entry.descriptor.id) {
            return Err(RegistryError::DuplicateId(entry.descriptor.id.clone()));
        }
        devices.insert(entry.descriptor.id.clone(), Arc::clone(&entry));
        Ok(entry)
    }

    pub async fn lookup(&self, id: &str) -> Result<Arc<DeviceEntry>, RegistryError> {
        self.devices
            .read()
            .await
            .get(id)
            .map(Arc::clone)
            .ok_or_else(|| RegistryError::NotFound(id.to_owned()))
    }

    /// Read-only projection: descriptors plus consistent runtime snapshots,
    /// in configuration order.
    pub async fn list(&self) -> Vec<(DeviceDescriptor, DeviceSnapshot)> {
        let entries: Vec<Arc<DeviceEntry>> =
            self.devices.read().await.values().map(Arc::clone).collect();
        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            out.push((entry.descriptor.clone(), entry.snapshot().await));
        }
        out
    }

    /// All current entries, for scheduler spawn and shutdown.
    pub async fn entries(&self) -> Vec<Arc<DeviceEntry>> {
        self.devices.read().await.values().map(Arc::clone).collect()
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }

    /// Remove one device: cancels its scheduler and closes the driver.
    pub async fn remove(&self, id: &str) -> Result<Arc<DeviceEntry>, RegistryError> {
        let entry = {
            let mut devices = self.devices.write().await;
            devices
                .shift_remove(id)
                .ok_or_else(|| RegistryError::NotFound(id.to_owned()))?
        };
        entry.cancel.cancel();
        entry.driver.close().await;
        self.forget_series(&entry).await;
        Ok(entry)
    }

    /// Transactional reload: construct all new drivers first, then swap
    /// atomically, then tear down removed/replaced drivers. If any new
    /// driver fails to construct, the old set stays live untouched.
    ///
    /// Returns the diff plus the entries that need fresh scheduler tasks.
    pub async fn reload(
        &self,
        descriptors: Vec<(DeviceDescriptor, Duration)>,
    ) -> Result<(ReloadDiff, Vec<Arc<DeviceEntry>>), RegistryError> {
        // Phase 1: construct everything before touching live state.
        let mut fresh: Vec<Arc<DeviceEntry>> = Vec::with_capacity(descriptors.len());
        for (descriptor, interval) in descriptors {
            let driver = driver::build(&descriptor, &self.secrets).await?;
            fresh.push(Arc::new(DeviceEntry {
                descriptor,
                driver,
                runtime: RwLock::new(DeviceRuntime::default()),
                pending_actions: AtomicU32::new(0),
                op_lock: Mutex::new(()),
                cancel: self.shutdown.child_token(),
                interval,
            }));
        }

        // Phase 2: atomic swap.
        let (diff, retired) = {
            let mut devices = self.devices.write().await;
            let mut diff = ReloadDiff::default();
            let mut next: IndexMap<String, Arc<DeviceEntry>> =
                IndexMap::with_capacity(fresh.len());
            for entry in &fresh {
                let id = entry.descriptor.id.clone();
                if devices.contains_key(&id) {
                    diff.replaced.push(id.clone());
                } else {
                    diff.added.push(id.clone());
                }
                next.insert(id, Arc::clone(entry));
            }
            for id in devices.keys() {
                if !next.contains_key(id) {
                    diff.removed.push(id.clone());
                }
            }
            let retired: Vec<Arc<DeviceEntry>> =
                devices.values().map(Arc::clone).collect();
            *devices = next;
            (diff, retired)
        };

        // Phase 3: tear down everything from the old generation. Replaced
        // devices lose their series too; the fresh scheduler repopulates
        // them on its first probe.
        for entry in retired {
            entry.cancel.cancel();
            entry.driver.close().await;
            self.forget_series(&entry).await;
        }

        Ok((diff, fresh))
    }

    /// Cancel and close every device. Used by process shutdown.
    pub async fn close_all(&self) {
        let entries = self.entries().await;
        for entry in &entries {
            entry.cancel.cancel();
        }
        for entry in &entries {
            entry.driver.close().await;
        }
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
