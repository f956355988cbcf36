// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Port allocation for instance listeners.
//!
//! Ports are handed out lowest-first from an inclusive range. The table is
//! small (tens of instances), so every operation is a linear scan under a
//! single mutex.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};

use super::error::{InstanceError, InstanceResult};

/// Reserves ports from `[base_port, max_port]` on behalf of instances.
#[derive(Debug)]
pub struct PortAllocator {
    base_port: u16,
    max_port: u16,
    /// Allocated port -> owning instance ID.
    allocated: Mutex<BTreeMap<u16, String>>,
}

impl PortAllocator {
    /// Create an allocator over an inclusive port range.
    pub fn new(base_port: u16, max_port: u16) -> InstanceResult<Self> {
        if base_port > max_port {
            return Err(InstanceError::InvalidPortRange {
                base: base_port,
                max: max_port,
            });
        }

        Ok(Self {
            base_port,
            max_port,
            allocated: Mutex::new(BTreeMap::new()),
        })
    }

    /// Reserve the smallest free port for `owner`.
    pub fn allocate(&self, owner: &str) -> InstanceResult<u16> {
        let mut allocated = self.table();

        let port = self
            .range()
            .find(|port| !allocated.contains_key(port))
            .ok_or(InstanceError::PortsExhausted {
                base: self.base_port,
                max: self.max_port,
            })?;

        allocated.insert(port, owner.to_string());
        debug!(port, owner, "Allocated port");
        Ok(port)
    }

    /// Release a port. Releasing an unallocated port is a no-op.
    pub fn release(&self, port: u16) {
        if let Some(owner) = self.table().remove(&port) {
            debug!(port, owner = %owner, "Released port");
        } else {
            trace!(port, "Release of unallocated port ignored");
        }
    }

    /// Whether `port` lies in range and is not reserved.
    pub fn is_available(&self, port: u16) -> bool {
        self.range().contains(&port) && !self.table().contains_key(&port)
    }

    /// The instance that owns `port`, if any.
    pub fn owner(&self, port: u16) -> Option<String> {
        self.table().get(&port).cloned()
    }

    /// Number of ports currently reserved.
    pub fn allocated(&self) -> usize {
        self.table().len()
    }

    /// Total number of ports in the range.
    pub fn capacity(&self) -> usize {
        usize::from(self.max_port - self.base_port) + 1
    }

    /// The inclusive port range managed by this allocator.
    pub fn range(&self) -> RangeInclusive<u16> {
        self.base_port..=self.max_port
    }

    fn table(&self) -> MutexGuard<'_, BTreeMap<u16, String>> {
        self.allocated.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
