//! Capacity guard: approximate serialized size of the local cache against a
//! fixed ceiling, with an edge-triggered "at capacity" flag.

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, watch};

use crate::types::CacheSnapshot;

const EDGE_CHANNEL_CAPACITY: usize = 16;

/// Point-in-time capacity reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CapacityStatus {
    pub used_bytes: u64,
    pub ceiling_bytes: u64,
    pub percent_used: f64,
    pub at_capacity: bool,
}

/// Fired only when the flag flips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityEdge {
    Reached,
    Cleared,
}

/// Advisory only: never deletes or truncates anything.
pub struct CapacityGuard {
    ceiling_bytes: u64,
    warn_fraction: f64,
    status: watch::Sender<CapacityStatus>,
    edges: broadcast::Sender<CapacityEdge>,
    /// Serializes recomputation so flag flips are observed in order.
    flag: Mutex<bool>,
}

impl CapacityGuard {
    pub fn new(ceiling_bytes: u64, warn_fraction: f64) -> Self {
        let ceiling_bytes = ceiling_bytes.max(1);
        let (status, _) = watch::channel(CapacityStatus {
            used_bytes: 0,
            ceiling_bytes,
            percent_used: 0.0,
            at_capacity: false,
        });
        let (edges, _) = broadcast::channel(EDGE_CHANNEL_CAPACITY);
        Self {
            ceiling_bytes,
            warn_fraction,
            status,
            edges,
            flag: Mutex::new(false),
        }
    }

    /// Serialized size of all three collections, in bytes.
    pub fn estimate(snapshot: &CacheSnapshot) -> u64 {
        match serde_json::to_vec(snapshot) {
            Ok(bytes) => bytes.len() as u64,
            Err(err) => {
                tracing::warn!("capacity estimate failed: {err}");
                0
            }
        }
    }

    pub fn recompute(&self, snapshot: &CacheSnapshot) -> CapacityStatus {
        self.observe_bytes(Self::estimate(snapshot))
    }

    /// Record a new size reading and flip the flag if the threshold was crossed.
    pub fn observe_bytes(&self, used_bytes: u64) -> CapacityStatus {
        let mut flag = self.flag.lock();
        let percent_used = used_bytes as f64 / self.ceiling_bytes as f64 * 100.0;
        let at_capacity = percent_used >= self.warn_fraction * 100.0;

        if at_capacity != *flag {
            *flag = at_capacity;
            let edge = if at_capacity {
                tracing::warn!(
                    used_bytes,
                    ceiling_bytes = self.ceiling_bytes,
                    "local storage nearly full ({percent_used:.1}%), new records disabled"
                );
                CapacityEdge::Reached
            } else {
                tracing::info!(
                    used_bytes,
                    ceiling_bytes = self.ceiling_bytes,
                    "local storage back under threshold ({percent_used:.1}%)"
                );
                CapacityEdge::Cleared
            };
            let _ = self.edges.send(edge);
        }

        let status = CapacityStatus {
            used_bytes,
            ceiling_bytes: self.ceiling_bytes,
            percent_used,
            at_capacity,
        };
        self.status.send_replace(status);
        status
    }

    pub fn status(&self) -> CapacityStatus {
        *self.status.borrow()
    }

    pub fn at_capacity(&self) -> bool {
        self.status.borrow().at_capacity
    }

    pub fn subscribe(&self) -> watch::Receiver<CapacityStatus> {
        self.status.subscribe()
    }

    pub fn subscribe_edges(&self) -> broadcast::Receiver<CapacityEdge> {
        self.edges.subscribe()
    }
}
