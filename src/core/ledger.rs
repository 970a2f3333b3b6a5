//! Per-device capacity accounting.
//!
//! The ledger is the only mutator of capacity counters. Each device has its
//! own `parking_lot::Mutex`, so a reserve or release is a single critical
//! section per device and concurrent rounds on different devices never
//! contend. A reservation is all-or-nothing across dimensions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::core::device::{DeviceSpec, DeviceType};
use crate::core::error::SchedulerError;
use crate::core::resources::Resources;

/// Proof of a grant of `Resources` on one device to one task.
///
/// Not `Clone`: the holding task owns the grant and hands it back to
/// [`ResourceLedger::release`] exactly once.
#[derive(Debug)]
pub struct ResourceContext {
    ticket: u64,
    task_id: u64,
    spec: DeviceSpec,
    resources: Resources,
}

impl ResourceContext {
    /// Ledger-unique identifier of this grant.
    #[must_use]
    pub const fn ticket(&self) -> u64 {
        self.ticket
    }

    /// Task the grant was issued to.
    #[must_use]
    pub const fn task_id(&self) -> u64 {
        self.task_id
    }

    /// Device the grant lives on.
    #[must_use]
    pub const fn spec(&self) -> DeviceSpec {
        self.spec
    }

    /// Granted quantities.
    #[must_use]
    pub const fn resources(&self) -> &Resources {
        &self.resources
    }
}

#[derive(Debug)]
struct DeviceAccount {
    capacity: Resources,
    allocated: Resources,
    live: HashMap<u64, Resources>,
}

/// Snapshot of one device's accounting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceUsage {
    /// Device identity.
    pub spec: DeviceSpec,
    /// Configured capacity.
    pub capacity: Resources,
    /// Remaining capacity.
    pub available: Resources,
    /// Number of outstanding grants.
    pub live_grants: usize,
}

/// Tracks capacity and current allocation per device, per resource dimension.
#[derive(Debug)]
pub struct ResourceLedger {
    devices: HashMap<DeviceSpec, Mutex<DeviceAccount>>,
    /// Devices in (type, ordinal) order for deterministic placement.
    order: Vec<DeviceSpec>,
    next_ticket: AtomicU64,
}

impl ResourceLedger {
    /// Create a ledger from a device inventory.
    pub fn new(inventory: impl IntoIterator<Item = (DeviceSpec, Resources)>) -> Self {
        let mut devices = HashMap::new();
        for (spec, capacity) in inventory {
            devices.insert(
                spec,
                Mutex::new(DeviceAccount {
                    capacity,
                    allocated: Resources::zero(),
                    live: HashMap::new(),
                }),
            );
        }
        let mut order: Vec<DeviceSpec> = devices.keys().copied().collect();
        order.sort();
        Self {
            devices,
            order,
            next_ticket: AtomicU64::new(1),
        }
    }

    /// All devices in (type, ordinal) order.
    #[must_use]
    pub fn devices(&self) -> &[DeviceSpec] {
        &self.order
    }

    /// Devices of one type in ordinal order.
    pub fn devices_of_type(&self, device_type: DeviceType) -> impl Iterator<Item = DeviceSpec> + '_ {
        self.order
            .iter()
            .copied()
            .filter(move |spec| spec.device_type == device_type)
    }

    /// Atomically check and commit `need` on `spec` for `task_id`.
    ///
    /// # Errors
    ///
    /// - `AdmissionDenied` if any dimension exceeds the remaining capacity
    /// - `UnknownDevice` if `spec` is not in the ledger
    pub fn try_reserve(
        &self,
        spec: DeviceSpec,
        task_id: u64,
        need: &Resources,
    ) -> Result<ResourceContext, SchedulerError> {
        let account = self
            .devices
            .get(&spec)
            .ok_or(SchedulerError::UnknownDevice(spec))?;
        let mut account = account.lock();
        let available = account.capacity.saturating_sub(&account.allocated);
        if !need.fits_within(&available) {
            return Err(SchedulerError::AdmissionDenied(spec));
        }
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        account.allocated.add_assign_saturating(need);
        account.live.insert(ticket, need.clone());
        debug!(device = %spec, ticket, task_id, need = %need, "reserved");
        Ok(ResourceContext {
            ticket,
            task_id,
            spec,
            resources: need.clone(),
        })
    }

    /// Return a grant's resources to its device.
    ///
    /// # Errors
    ///
    /// Returns `DoubleRelease` if the grant was already released (or was not
    /// issued by this ledger), and `UnknownDevice` for a foreign device.
    pub fn release(&self, context: &ResourceContext) -> Result<(), SchedulerError> {
        let account = self
            .devices
            .get(&context.spec)
            .ok_or(SchedulerError::UnknownDevice(context.spec))?;
        let mut account = account.lock();
        let Some(granted) = account.live.remove(&context.ticket) else {
            error!(
                device = %context.spec,
                ticket = context.ticket,
                task_id = context.task_id,
                "release of a grant that is not live"
            );
            return Err(SchedulerError::DoubleRelease(context.ticket));
        };
        if !account.allocated.sub_assign_saturating(&granted) {
            error!(device = %context.spec, ticket = context.ticket, "allocation underflow on release");
        }
        debug!(device = %context.spec, ticket = context.ticket, "released");
        Ok(())
    }

    /// Configured capacity of a device.
    #[must_use]
    pub fn capacity_of(&self, spec: DeviceSpec) -> Option<Resources> {
        self.devices.get(&spec).map(|a| a.lock().capacity.clone())
    }

    /// Remaining capacity of a device.
    #[must_use]
    pub fn available_of(&self, spec: DeviceSpec) -> Option<Resources> {
        self.devices.get(&spec).map(|a| {
            let a = a.lock();
            a.capacity.saturating_sub(&a.allocated)
        })
    }

    /// Currently granted quantities on a device.
    #[must_use]
    pub fn allocated_of(&self, spec: DeviceSpec) -> Option<Resources> {
        self.devices.get(&spec).map(|a| a.lock().allocated.clone())
    }

    /// Whether `need` could ever fit on `spec` when the device is idle.
    #[must_use]
    pub fn is_feasible(&self, spec: DeviceSpec, need: &Resources) -> bool {
        self.devices
            .get(&spec)
            .is_some_and(|a| need.fits_within(&a.lock().capacity))
    }

    /// Sum of capacities over every device.
    #[must_use]
    pub fn total_capacity(&self) -> Resources {
        let mut total = Resources::zero();
        for account in self.devices.values() {
            total.add_assign_saturating(&account.lock().capacity);
        }
        total
    }

    /// Outstanding grants across all devices.
    #[must_use]
    pub fn live_grants(&self) -> usize {
        self.devices.values().map(|a| a.lock().live.len()).sum()
    }

    /// Per-device snapshot in (type, ordinal) order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<DeviceUsage> {
        self.order
            .iter()
            .filter_map(|spec| {
                self.devices.get(spec).map(|a| {
                    let a = a.lock();
                    DeviceUsage {
                        spec: *spec,
                        capacity: a.capacity.clone(),
                        available: a.capacity.saturating_sub(&a.allocated),
                        live_grants: a.live.len(),
                    }
                })
            })
            .collect()
    }
}
