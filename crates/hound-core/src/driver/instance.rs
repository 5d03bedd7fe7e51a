//! Per-path driver instance: state machine, subscription refcounting, and
//! the aggregate request set handed to the driver.
//!
//! An instance is `Initialized` after creation. The first subscription
//! reference commits the aggregate via `setdata`, starts the driver, and
//! attaches its descriptor to the I/O loop (`Started`). When the last
//! reference goes away the aggregate is cleared, the descriptor leaves the
//! loop, and the driver stops. The instance returns to `Initialized` and
//! can be started again or destroyed.

use std::os::fd::{AsRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::io::EventLoop;
use crate::queue::RecordQueue;
use crate::schema::{DataDescriptor, DriverDataDesc, SchemaDescriptor};
use crate::types::{DataId, DataRequest, DeviceId, Period, DEVICE_NAME_MAX};

use super::{Driver, DriverMode, IoKind};

/// One enabled data stream of an instance, with its advertised periods.
#[derive(Debug, Clone)]
pub(crate) struct InstanceDescriptor {
    /// The enabled stream.
    pub(crate) data_id: DataId,
    /// Periods the driver advertises for it.
    pub(crate) periods: SmallVec<[Period; 8]>,
    /// Index of the stream's schema entry in the instance's schema set.
    schema_index: usize,
}

/// One entry of the aggregate active set, refcounted across contexts.
struct ActiveRequest {
    id: DataId,
    period: Period,
    refs: usize,
}

/// The mutable half of an instance, guarded by the subscription lock.
struct SubState {
    /// Descriptor returned by `start`; `Some` exactly while `Started`.
    fd: Option<OwnedFd>,
    /// Aggregate active set with per-(id, period) refcounts.
    active: Vec<ActiveRequest>,
    /// Set when the instance has been removed from the device table.
    retired: bool,
}

impl SubState {
    fn aggregate(&self) -> Vec<DataRequest> {
        self.active
            .iter()
            .map(|a| DataRequest {
                id: a.id,
                period_ns: a.period,
            })
            .collect()
    }

    fn undo_merge(&mut self, requests: &[DataRequest]) {
        for rq in requests {
            if let Some(pos) = self
                .active
                .iter()
                .position(|a| a.id == rq.id && a.period == rq.period_ns)
            {
                self.active[pos].refs -= 1;
                if self.active[pos].refs == 0 {
                    self.active.remove(pos);
                }
            }
        }
    }
}

/// A live driver bound to one device path.
pub(crate) struct DriverInstance {
    id: DeviceId,
    driver_name: String,
    path: PathBuf,
    device_name: String,
    schemas: Vec<SchemaDescriptor>,
    descriptors: Vec<InstanceDescriptor>,
    io_kind: IoKind,
    driver: Mutex<Box<dyn Driver>>,
    sub: Mutex<SubState>,
}

impl DriverInstance {
    /// Builds an instance around freshly created driver state.
    ///
    /// Runs the `device_name` and `datadesc` hooks and captures the enabled
    /// descriptor set. The caller is responsible for global data-ID conflict
    /// checks and table insertion.
    pub(crate) fn init(
        id: DeviceId,
        driver_name: &str,
        path: &Path,
        mut driver: Box<dyn Driver>,
        schemas: Vec<SchemaDescriptor>,
    ) -> Result<Self> {
        let device_name = driver.device_name()?;
        if device_name.len() >= DEVICE_NAME_MAX || device_name.contains('\0') {
            return Err(Error::InvalidString);
        }

        let mut descs: Vec<DriverDataDesc<'_>> =
            schemas.iter().map(DriverDataDesc::new).collect();
        driver.datadesc(&mut descs)?;

        let descriptors = descs
            .iter()
            .enumerate()
            .filter(|(_, d)| d.enabled)
            .map(|(schema_index, d)| InstanceDescriptor {
                data_id: d.data_id(),
                periods: d.periods.clone(),
                schema_index,
            })
            .collect();
        drop(descs);

        let io_kind = driver.io_kind();

        Ok(Self {
            id,
            driver_name: driver_name.to_owned(),
            path: path.to_owned(),
            device_name,
            schemas,
            descriptors,
            io_kind,
            driver: Mutex::new(driver),
            sub: Mutex::new(SubState {
                fd: None,
                active: Vec::new(),
                retired: false,
            }),
        })
    }

    /// The core-assigned device ID.
    pub(crate) fn id(&self) -> DeviceId {
        self.id
    }

    /// The registry name this instance was created from.
    pub(crate) fn driver_name(&self) -> &str {
        &self.driver_name
    }

    /// The normalized device path.
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// The name reported by the driver's `device_name` hook.
    pub(crate) fn device_name(&self) -> &str {
        &self.device_name
    }

    /// The enabled descriptor set.
    pub(crate) fn descriptors(&self) -> &[InstanceDescriptor] {
        &self.descriptors
    }

    /// The driver's I/O modality.
    pub(crate) fn io_kind(&self) -> IoKind {
        self.io_kind
    }

    /// The driver state, for I/O-loop dispatch.
    pub(crate) fn driver(&self) -> &Mutex<Box<dyn Driver>> {
        &self.driver
    }

    /// Whether `period` is advertised for `id` on this instance.
    pub(crate) fn period_supported(&self, id: DataId, period: Period) -> bool {
        self.descriptors
            .iter()
            .find(|d| d.data_id == id)
            .is_some_and(|d| d.periods.contains(&period))
    }

    /// Marks the instance as removed from the device table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DriverInUse`] while subscriptions are active.
    pub(crate) fn retire(&self) -> Result<()> {
        let mut sub = self.sub.lock();
        if !sub.active.is_empty() {
            return Err(Error::DriverInUse);
        }
        sub.retired = true;
        Ok(())
    }

    /// Current production mode, derived from the aggregate active set.
    pub(crate) fn mode(&self) -> DriverMode {
        if self.sub.lock().active.iter().any(|a| a.period == 0) {
            DriverMode::Pull
        } else {
            DriverMode::Push
        }
    }

    /// Public data descriptors for every enabled stream.
    pub(crate) fn datadescs(&self) -> Vec<DataDescriptor> {
        self.descriptors
            .iter()
            .map(|d| {
                let schema = &self.schemas[d.schema_index];
                DataDescriptor {
                    data_id: d.data_id,
                    dev_id: self.id,
                    name: schema.name.clone(),
                    periods: d.periods.to_vec(),
                    formats: schema.formats.clone(),
                }
            })
            .collect()
    }

    /// Adds one subscription reference per request and attaches `queue` to
    /// the instance's descriptor.
    ///
    /// The first reference to a new (id, period) pair re-commits the
    /// aggregate via `setdata`; the first reference overall starts the
    /// driver and registers its descriptor with the I/O loop. On failure the
    /// aggregate is restored and driver-side effects are rolled back.
    pub(crate) fn ref_requests(
        self: &Arc<Self>,
        io: &EventLoop,
        queue: &Arc<RecordQueue>,
        requests: &[DataRequest],
    ) -> Result<()> {
        let pause = io.pause();
        let mut sub = self.sub.lock();

        if sub.retired {
            return Err(Error::DevDoesNotExist);
        }
        for rq in requests {
            if !self.descriptors.iter().any(|d| d.data_id == rq.id) {
                return Err(Error::IdNotInSchema);
            }
        }

        let mut fresh = false;
        for rq in requests {
            match sub
                .active
                .iter_mut()
                .find(|a| a.id == rq.id && a.period == rq.period_ns)
            {
                Some(entry) => entry.refs += 1,
                None => {
                    sub.active.push(ActiveRequest {
                        id: rq.id,
                        period: rq.period_ns,
                        refs: 1,
                    });
                    fresh = true;
                }
            }
        }

        if fresh {
            let aggregate = sub.aggregate();
            if let Err(err) = self.driver.lock().setdata(&aggregate) {
                sub.undo_merge(requests);
                return Err(err);
            }
        }

        let raw = match sub.fd.as_ref() {
            Some(fd) => fd.as_raw_fd(),
            None => {
                // The guard must not outlive the call: the rollback path
                // relocks the driver.
                let started = { self.driver.lock().start() };
                let fd = match started {
                    Ok(fd) => fd,
                    Err(err) => {
                        self.rollback_setdata(&mut sub, requests, fresh);
                        return Err(err);
                    }
                };
                let raw = fd.as_raw_fd();
                if let Err(err) = io.add_fd(&pause, raw, Arc::clone(self)) {
                    if let Err(stop_err) = self.driver.lock().stop() {
                        tracing::warn!(
                            driver = %self.driver_name,
                            error = %stop_err,
                            "driver failed to stop during rollback"
                        );
                    }
                    self.rollback_setdata(&mut sub, requests, fresh);
                    return Err(err);
                }
                sub.fd = Some(fd);
                raw
            }
        };

        io.add_queue(&pause, raw, Arc::clone(queue));
        Ok(())
    }

    /// Removes one subscription reference per request and detaches `queue`.
    ///
    /// When an (id, period) pair drops to zero references the aggregate is
    /// re-committed; when the aggregate empties, the descriptor leaves the
    /// I/O loop and the driver stops.
    pub(crate) fn unref_requests(
        &self,
        io: &EventLoop,
        queue: &Arc<RecordQueue>,
        requests: &[DataRequest],
    ) -> Result<()> {
        let pause = io.pause();
        let mut sub = self.sub.lock();

        let mut removed = false;
        for rq in requests {
            if let Some(pos) = sub
                .active
                .iter()
                .position(|a| a.id == rq.id && a.period == rq.period_ns)
            {
                sub.active[pos].refs -= 1;
                if sub.active[pos].refs == 0 {
                    sub.active.remove(pos);
                    removed = true;
                }
            }
        }

        let Some(raw) = sub.fd.as_ref().map(AsRawFd::as_raw_fd) else {
            return Ok(());
        };

        if removed {
            let aggregate = sub.aggregate();
            if let Err(err) = self.driver.lock().setdata(&aggregate) {
                tracing::warn!(
                    driver = %self.driver_name,
                    error = %err,
                    "driver rejected reduced aggregate on unref"
                );
            }
        }

        io.remove_queue(&pause, raw, queue);

        if sub.active.is_empty() {
            io.remove_fd(&pause, raw);
            let result = self.driver.lock().stop();
            sub.fd = None;
            result?;
        }
        Ok(())
    }

    /// Asks the driver for `n` on-demand samples of `id`. A no-op in push
    /// mode.
    pub(crate) fn next_records(&self, id: DataId, n: usize) -> Result<()> {
        if self.mode() == DriverMode::Push {
            return Ok(());
        }
        let mut driver = self.driver.lock();
        for _ in 0..n {
            driver.next(id)?;
        }
        Ok(())
    }

    /// Asks the driver for up to `bytes` of on-demand data for `id`. A no-op
    /// in push mode.
    pub(crate) fn next_bytes(&self, id: DataId, bytes: usize) -> Result<()> {
        if self.mode() == DriverMode::Push {
            return Ok(());
        }
        self.driver.lock().next_bytes(id, bytes)
    }

    fn rollback_setdata(&self, sub: &mut SubState, requests: &[DataRequest], fresh: bool) {
        sub.undo_merge(requests);
        if fresh {
            let aggregate = sub.aggregate();
            if let Err(err) = self.driver.lock().setdata(&aggregate) {
                tracing::warn!(
                    driver = %self.driver_name,
                    error = %err,
                    "driver rejected aggregate restore during rollback"
                );
            }
        }
    }
}

impl std::fmt::Debug for DriverInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverInstance")
            .field("id", &self.id)
            .field("driver", &self.driver_name)
            .field("path", &self.path)
            .field("device_name", &self.device_name)
            .field("descriptors", &self.descriptors.len())
            .finish_non_exhaustive()
    }
}
