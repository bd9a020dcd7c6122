//! Host port allocation for sandbox SSH publishing.
//!
//! Usage is derived from the runtime on every allocation. Ports picked but not
//! yet visible in the runtime are held in an in-process reservation table so
//! two concurrent creates can never be handed the same port.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use super::error::SandboxError;
use super::runtime::ContainerRuntime;

/// A port handed out but not yet committed.
#[derive(Debug, Clone)]
struct Reservation {
    holder: String,
    since: Instant,
}

type ReservationTable = Arc<Mutex<BTreeMap<u16, Reservation>>>;

/// Picks free host ports from a fixed pool.
#[derive(Debug)]
pub(crate) struct PortAllocator {
    pool: Vec<u16>,
    reservations: ReservationTable,
    /// Serializes the list-then-pick scan across concurrent callers.
    scan: AsyncMutex<()>,
}

impl PortAllocator {
    pub fn new(pool: Vec<u16>) -> Self {
        Self {
            pool,
            reservations: Arc::new(Mutex::new(BTreeMap::new())),
            scan: AsyncMutex::new(()),
        }
    }

    /// Reserve the first pool port not used by any container or reservation.
    ///
    /// Never waits for a port to free up: an exhausted pool is `NoFreePort`.
    pub async fn reserve(
        &self,
        runtime: &dyn ContainerRuntime,
        holder: &str,
    ) -> Result<PortLease, SandboxError> {
        let _scan = self.scan.lock().await;

        let containers = runtime
            .list()
            .await
            .map_err(|e| SandboxError::runtime(e.to_string()))?;

        let used: HashSet<u16> = containers
            .iter()
            .flat_map(|c| c.occupied_ports())
            .collect();

        let mut table = self
            .reservations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let port = first_free(&self.pool, |p| used.contains(&p) || table.contains_key(&p))
            .ok_or(SandboxError::NoFreePort)?;

        table.insert(
            port,
            Reservation {
                holder: holder.to_string(),
                since: Instant::now(),
            },
        );
        debug!("Reserved port {} for {}", port, holder);

        Ok(PortLease {
            port,
            table: Arc::clone(&self.reservations),
            settled: false,
        })
    }

    /// Ports currently reserved but not committed.
    #[cfg(test)]
    pub fn reserved_ports(&self) -> Vec<u16> {
        self.reservations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }
}

/// Deterministic pick: pool order, first port not in use.
fn first_free<F>(pool: &[u16], in_use: F) -> Option<u16>
where
    F: Fn(u16) -> bool,
{
    pool.iter().copied().find(|p| !in_use(*p))
}

/// A reserved port. Dropping it without `commit` releases the reservation.
#[derive(Debug)]
pub(crate) struct PortLease {
    port: u16,
    table: ReservationTable,
    settled: bool,
}

impl PortLease {
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The runtime now holds the binding; stop tracking it in-process.
    pub fn commit(mut self) {
        if let Some(r) = self.take() {
            debug!(
                "Committed port {} for {} after {:?}",
                self.port,
                r.holder,
                r.since.elapsed()
            );
        }
    }

    /// Give the port back explicitly.
    pub fn release(mut self) {
        if let Some(r) = self.take() {
            debug!("Released port {} held by {}", self.port, r.holder);
        }
    }

    fn take(&mut self) -> Option<Reservation> {
        self.settled = true;
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.port)
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        if !self.settled {
            if let Some(r) = self.take() {
                warn!("Port {} reservation for {} dropped unsettled", self.port, r.holder);
            }
        }
    }
}
