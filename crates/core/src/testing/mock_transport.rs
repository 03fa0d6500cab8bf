//! Mock device transport for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::session::{DeviceTransport, TransportError};

/// Mock implementation of the DeviceTransport trait.
///
/// Devices are reachable unless marked otherwise. Restarts and liveness
/// probes are counted.
#[derive(Debug)]
pub struct MockTransport {
    unreachable: Arc<RwLock<HashMap<String, bool>>>,
    probes: Arc<RwLock<HashMap<String, usize>>>,
    restarts: AtomicUsize,
    restart_fails: AtomicBool,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            unreachable: Arc::new(RwLock::new(HashMap::new())),
            probes: Arc::new(RwLock::new(HashMap::new())),
            restarts: AtomicUsize::new(0),
            restart_fails: AtomicBool::new(false),
        }
    }

    pub async fn set_reachable(&self, udid: &str, reachable: bool) {
        self.unreachable
            .write()
            .await
            .insert(udid.to_string(), !reachable);
    }

    pub fn set_restart_fails(&self, fails: bool) {
        self.restart_fails.store(fails, Ordering::SeqCst);
    }

    pub fn restart_count(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }

    pub async fn probe_count(&self, udid: &str) -> usize {
        self.probes.read().await.get(udid).copied().unwrap_or(0)
    }
}

#[async_trait]
impl DeviceTransport for MockTransport {
    async fn check_liveness(&self, udid: &str) -> Result<(), TransportError> {
        *self
            .probes
            .write()
            .await
            .entry(udid.to_string())
            .or_insert(0) += 1;

        let unreachable = self
            .unreachable
            .read()
            .await
            .get(udid)
            .copied()
            .unwrap_or(false);
        if unreachable {
            Err(TransportError::Unreachable {
                udid: udid.to_string(),
                output: "ERROR: AFC_E_MUX_ERROR".to_string(),
            })
        } else {
            Ok(())
        }
    }

    async fn restart(&self) -> Result<(), TransportError> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        if self.restart_fails.load(Ordering::SeqCst) {
            Err(TransportError::CommandFailed("usbmuxd: not found".to_string()))
        } else {
            Ok(())
        }
    }
}
