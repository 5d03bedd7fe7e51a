//! The I/O event loop: one background thread that watches every driver
//! descriptor, turns readable bytes into records, and fans them out.
//!
//! ## Pause/resume barrier
//!
//! Mutators (descriptor add/remove, queue attach/detach) never race the
//! loop: they acquire a [`PauseGuard`], which pokes the loop's wake pipe and
//! waits until the loop acknowledges it is idle, edit the shared poll set,
//! and resume on drop. The wake pipe's read end is always entry 0 of the
//! poll set; a byte written between the poke and the next `poll(2)` stays
//! readable until the loop drains it, so the wakeup cannot be lost.
//!
//! The loop holds no locks while blocked in `poll(2)`. It takes the poll-set
//! lock only to build the descriptor array and to process ready
//! descriptors, and mutators only touch the set while the loop is parked,
//! so the loop observes a stable snapshot for each full cycle.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use smallvec::SmallVec;

use crate::driver::{DriverInstance, IoKind, PollEvents};
use crate::error::{Error, Result};
use crate::queue::RecordQueue;
use crate::record::{Record, RecordSink};
use crate::types::SeqNo;

/// Size of the scratch buffer one readable descriptor is drained into per
/// cycle.
const READ_BUF_SIZE: usize = 100 * 1024;

/// Event mask that means "data to read" for parse-style drivers.
const POLL_HAS_DATA: i16 = libc::POLLIN | libc::POLLPRI;

/// Loop-side state for one driver descriptor. Index-aligned with the
/// descriptor array.
struct FdContext {
    instance: Arc<DriverInstance>,
    next_seqno: SeqNo,
    queues: SmallVec<[Arc<RecordQueue>; 2]>,
}

/// One watched descriptor.
struct FdEntry {
    fd: RawFd,
    events: i16,
    /// Armed by poll-style drivers that want a turn even without events.
    timeout: Option<Duration>,
}

/// The poll set: descriptors and their contexts, index-aligned.
#[derive(Default)]
struct PollSets {
    entries: Vec<FdEntry>,
    ctxs: Vec<FdContext>,
}

impl PollSets {
    fn index_of(&self, fd: RawFd) -> usize {
        let Some(idx) = self.entries.iter().position(|e| e.fd == fd) else {
            unreachable!("fd {fd} is not registered with the I/O loop");
        };
        idx
    }
}

/// Barrier flags shared between the loop and mutators.
struct Ctl {
    /// What mutators want the loop to be doing.
    active_target: bool,
    /// Whether the loop is currently inside a poll/drain cycle.
    active_current: bool,
    /// Terminates the loop thread.
    shutdown: bool,
    /// Cached descriptor count so the barrier check needs no poll-set lock.
    fd_count: usize,
}

struct Shared {
    ctl: Mutex<Ctl>,
    cond: Condvar,
    sets: Mutex<PollSets>,
    wake_rx: OwnedFd,
    wake_tx: OwnedFd,
}

/// Handle to the background I/O thread.
pub(crate) struct EventLoop {
    shared: Arc<Shared>,
    /// Serializes mutators across their whole pause..resume window.
    mutators: Mutex<()>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// Proof that the I/O loop is quiescent. Mutation entry points require one;
/// dropping it resumes the loop.
pub(crate) struct PauseGuard<'a> {
    shared: &'a Shared,
    _serial: MutexGuard<'a, ()>,
}

impl Drop for PauseGuard<'_> {
    fn drop(&mut self) {
        let mut ctl = self.shared.ctl.lock();
        ctl.active_target = true;
        self.shared.cond.notify_all();
    }
}

impl EventLoop {
    /// Creates the wake pipe and spawns the loop thread.
    pub(crate) fn new() -> Result<Self> {
        let mut pipe = [0i32; 2];
        let rc = unsafe { libc::pipe2(pipe.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) };
        if rc != 0 {
            return Err(Error::IoError);
        }
        // SAFETY: pipe2 succeeded, so both descriptors are valid and owned
        // by us alone.
        let (wake_rx, wake_tx) =
            unsafe { (OwnedFd::from_raw_fd(pipe[0]), OwnedFd::from_raw_fd(pipe[1])) };

        let shared = Arc::new(Shared {
            ctl: Mutex::new(Ctl {
                active_target: true,
                active_current: false,
                shutdown: false,
                fd_count: 0,
            }),
            cond: Condvar::new(),
            sets: Mutex::new(PollSets::default()),
            wake_rx,
            wake_tx,
        });

        let thread_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("hound-io".into())
            .spawn(move || run(&thread_shared))
            .map_err(|_| Error::Oom)?;

        Ok(Self {
            shared,
            mutators: Mutex::new(()),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Quiesces the loop and returns the guard mutators need.
    pub(crate) fn pause(&self) -> PauseGuard<'_> {
        let serial = self.mutators.lock();
        let mut ctl = self.shared.ctl.lock();
        ctl.active_target = false;
        if ctl.active_current {
            wake(&self.shared.wake_tx);
            while ctl.active_current {
                self.shared.cond.wait(&mut ctl);
            }
        }
        drop(ctl);
        PauseGuard {
            shared: &self.shared,
            _serial: serial,
        }
    }

    /// Registers a driver descriptor. The descriptor is switched to
    /// non-blocking mode; its record sequence starts at 0.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IoError`] if the descriptor cannot be made
    /// non-blocking.
    pub(crate) fn add_fd(
        &self,
        _pause: &PauseGuard<'_>,
        fd: RawFd,
        instance: Arc<DriverInstance>,
    ) -> Result<()> {
        set_nonblocking(fd)?;
        let mut sets = self.shared.sets.lock();
        sets.entries.push(FdEntry {
            fd,
            events: POLL_HAS_DATA,
            timeout: None,
        });
        sets.ctxs.push(FdContext {
            instance,
            next_seqno: 0,
            queues: SmallVec::new(),
        });
        self.shared.ctl.lock().fd_count = sets.entries.len();
        Ok(())
    }

    /// Deregisters a driver descriptor and drops its context.
    pub(crate) fn remove_fd(&self, _pause: &PauseGuard<'_>, fd: RawFd) {
        let mut sets = self.shared.sets.lock();
        let idx = sets.index_of(fd);
        sets.entries.remove(idx);
        sets.ctxs.remove(idx);
        self.shared.ctl.lock().fd_count = sets.entries.len();
    }

    /// Attaches a subscriber queue to a descriptor.
    pub(crate) fn add_queue(&self, _pause: &PauseGuard<'_>, fd: RawFd, queue: Arc<RecordQueue>) {
        let mut sets = self.shared.sets.lock();
        let idx = sets.index_of(fd);
        sets.ctxs[idx].queues.push(queue);
    }

    /// Detaches a subscriber queue from a descriptor.
    pub(crate) fn remove_queue(&self, _pause: &PauseGuard<'_>, fd: RawFd, queue: &Arc<RecordQueue>) {
        let mut sets = self.shared.sets.lock();
        let idx = sets.index_of(fd);
        let queues = &mut sets.ctxs[idx].queues;
        let Some(pos) = queues.iter().position(|q| Arc::ptr_eq(q, queue)) else {
            unreachable!("queue is not attached to fd {fd}");
        };
        queues.remove(pos);
    }

    /// Stops and joins the loop thread. Idempotent.
    pub(crate) fn shutdown(&self) {
        {
            let mut ctl = self.shared.ctl.lock();
            ctl.shutdown = true;
            ctl.active_target = false;
            wake(&self.shared.wake_tx);
            self.shared.cond.notify_all();
        }
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                tracing::error!("I/O thread panicked during shutdown");
            }
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn wake(wake_tx: &OwnedFd) {
    let byte = 1u8;
    // EAGAIN means a wakeup is already pending, which is just as good.
    let rc = unsafe { libc::write(wake_tx.as_raw_fd(), std::ptr::addr_of!(byte).cast(), 1) };
    if rc < 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EAGAIN) {
            tracing::error!(error = %err, "failed to poke the I/O loop wake pipe");
        }
    }
}

fn drain_wake(wake_rx: &OwnedFd) {
    let mut buf = [0u8; 64];
    loop {
        let n = unsafe { libc::read(wake_rx.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };
        if n < 0 || (n as usize) < buf.len() {
            break;
        }
    }
}

fn set_nonblocking(fd: RawFd) -> Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags < 0 {
        return Err(Error::IoError);
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(Error::IoError);
    }
    Ok(())
}

/// Loop thread body.
fn run(shared: &Shared) {
    let mut scratch = vec![0u8; READ_BUF_SIZE];
    let mut sink = RecordSink::new();
    let mut pollfds: Vec<libc::pollfd> = Vec::new();

    loop {
        // Barrier: park until mutators want us running and there is at
        // least one descriptor to watch.
        {
            let mut ctl = shared.ctl.lock();
            loop {
                if ctl.shutdown {
                    ctl.active_current = false;
                    shared.cond.notify_all();
                    return;
                }
                if ctl.active_target && ctl.fd_count > 0 {
                    break;
                }
                ctl.active_current = false;
                shared.cond.notify_all();
                shared.cond.wait(&mut ctl);
            }
            ctl.active_current = true;
        }

        // Snapshot the poll set. Mutators cannot touch it until the loop
        // parks again, so the indices stay aligned through this cycle.
        let timeout_ms = {
            let sets = shared.sets.lock();
            pollfds.clear();
            pollfds.push(libc::pollfd {
                fd: shared.wake_rx.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            });
            let mut timeout: Option<Duration> = None;
            for entry in &sets.entries {
                pollfds.push(libc::pollfd {
                    fd: entry.fd,
                    events: entry.events,
                    revents: 0,
                });
                if let Some(t) = entry.timeout {
                    timeout = Some(timeout.map_or(t, |m| m.min(t)));
                }
            }
            timeout.map_or(-1i32, |t| {
                i32::try_from(t.as_millis().max(1)).unwrap_or(i32::MAX)
            })
        };

        let ready = unsafe {
            libc::poll(
                pollfds.as_mut_ptr(),
                pollfds.len() as libc::nfds_t,
                timeout_ms,
            )
        };
        if ready < 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                tracing::error!(error = %err, "poll failed");
            }
            continue;
        }

        // A wake poke trumps data: re-run the barrier first. Driver data
        // stays readable and is picked up next cycle.
        if pollfds[0].revents != 0 {
            drain_wake(&shared.wake_rx);
            continue;
        }

        let mut sets = shared.sets.lock();
        if ready == 0 {
            // Armed timeout expired: poll-style drivers get a turn with no
            // events.
            for idx in 0..sets.entries.len() {
                if sets.entries[idx].timeout.is_some()
                    && sets.ctxs[idx].instance.io_kind() == IoKind::Poll
                {
                    service_poll(&mut sets, idx, PollEvents::empty(), &mut sink);
                }
            }
            continue;
        }

        for idx in 0..sets.entries.len() {
            let revents = pollfds[idx + 1].revents;
            if revents == 0 {
                continue;
            }
            match sets.ctxs[idx].instance.io_kind() {
                IoKind::Parse => service_parse(&mut sets, idx, &mut scratch, &mut sink),
                IoKind::Poll => {
                    service_poll(&mut sets, idx, PollEvents::from_bits(revents), &mut sink);
                }
            }
        }
    }
}

/// Reads a readable parse-style descriptor and runs the driver's parse loop
/// over the bytes.
fn service_parse(sets: &mut PollSets, idx: usize, scratch: &mut [u8], sink: &mut RecordSink) {
    let fd = sets.entries[idx].fd;
    let ctx = &mut sets.ctxs[idx];

    let total = unsafe { libc::read(fd, scratch.as_mut_ptr().cast(), scratch.len()) };
    if total < 0 {
        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EAGAIN | libc::EINTR) => {}
            _ => tracing::error!(fd, error = %err, "read failed on driver fd"),
        }
        return;
    }
    #[allow(clippy::cast_sign_loss)]
    let total = total as usize;
    if total == 0 {
        return;
    }

    let mut pos = 0;
    while pos < total {
        sink.clear();
        let consumed = {
            let mut driver = ctx.instance.driver().lock();
            match driver.parse(&scratch[pos..total], sink) {
                Ok(consumed) => consumed,
                Err(err) => {
                    tracing::warn!(
                        driver = %ctx.instance.driver_name(),
                        bytes = total - pos,
                        error = %err,
                        "driver failed to parse records"
                    );
                    return;
                }
            }
        };
        debug_assert!(consumed <= total - pos, "driver consumed more than offered");
        if consumed == 0 {
            // No progress: the driver buffers across cycles on its own, and
            // the unconsumed remainder is discarded.
            break;
        }
        pos += consumed;
        publish(ctx, sink);
    }
}

/// Gives a poll-style driver its turn and applies the event-mask/timeout it
/// asks for.
fn service_poll(sets: &mut PollSets, idx: usize, events: PollEvents, sink: &mut RecordSink) {
    sink.clear();
    let outcome = {
        let ctx = &sets.ctxs[idx];
        let mut driver = ctx.instance.driver().lock();
        match driver.poll(events, sink) {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(
                    driver = %ctx.instance.driver_name(),
                    error = %err,
                    "driver poll hook failed"
                );
                return;
            }
        }
    };
    publish(&mut sets.ctxs[idx], sink);
    let entry = &mut sets.entries[idx];
    if let Some(next) = outcome.next_events {
        entry.events = next.bits();
    }
    entry.timeout = outcome.timeout;
}

/// Stamps sequence number and device ID on each produced record and pushes
/// one reference per attached queue.
fn publish(ctx: &mut FdContext, sink: &mut RecordSink) {
    let dev_id = ctx.instance.id();
    for raw in sink.take() {
        let record = Arc::new(Record {
            seqno: ctx.next_seqno,
            data_id: raw.data_id,
            dev_id,
            timestamp: raw.timestamp,
            payload: raw.payload,
        });
        ctx.next_seqno += 1;
        for queue in &ctx.queues {
            queue.push(Arc::clone(&record));
        }
    }
}
