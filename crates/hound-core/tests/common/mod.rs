//! Shared fixtures for the integration tests: a table-backed schema parser
//! and the nop, counter, and file test drivers.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Read, Write};
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use hound_core::{
    DataFormat, DataId, DataRequest, Driver, DriverDataDesc, DriverRecord, Error, IoKind, Period,
    RecordSink, Result, ScalarType, SchemaDescriptor, SchemaParser, Unit, MAX_RECORDS_PER_CALL,
};

pub const NS_PER_SEC: Period = 1_000_000_000;

// Distinct ids for the fixed-function test devices.
pub const ACCEL: DataId = DataId(0x2);
pub const GYRO: DataId = DataId(0x3);
pub const COUNTER: DataId = DataId(0x10);
pub const FILE: DataId = DataId(0x20);
pub const PULSE: DataId = DataId(0x30);

/// Schema parser backed by an in-memory table keyed on file name.
pub struct TableSchemaParser {
    schemas: HashMap<String, Vec<SchemaDescriptor>>,
}

impl TableSchemaParser {
    pub fn new() -> Self {
        Self {
            schemas: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_schema(mut self, file: &str, descs: Vec<SchemaDescriptor>) -> Self {
        self.schemas.insert(file.to_owned(), descs);
        self
    }
}

impl SchemaParser for TableSchemaParser {
    fn parse(&self, _base_dir: &Path, file: &str) -> Result<Vec<SchemaDescriptor>> {
        self.schemas.get(file).cloned().ok_or(Error::IoError)
    }
}

pub fn bytes_schema(id: DataId, name: &str) -> SchemaDescriptor {
    SchemaDescriptor {
        data_id: id,
        name: name.to_owned(),
        formats: vec![DataFormat {
            name: "data".into(),
            unit: Unit::None,
            offset: 0,
            len: 0,
            scalar: ScalarType::Bytes,
        }],
    }
}

pub fn u64_schema(id: DataId, name: &str) -> SchemaDescriptor {
    SchemaDescriptor {
        data_id: id,
        name: name.to_owned(),
        formats: vec![DataFormat {
            name: "count".into(),
            unit: Unit::None,
            offset: 0,
            len: 8,
            scalar: ScalarType::U64,
        }],
    }
}

fn socket_pair() -> (OwnedFd, UnixStream) {
    let (rx, tx) = UnixStream::pair().expect("socketpair");
    (OwnedFd::from(rx), tx)
}

// ---------------------------------------------------------------------------
// Nop driver
// ---------------------------------------------------------------------------

/// Implements the full driver contract but never produces data.
pub struct NopDriver {
    /// Held write end keeps the descriptor open and silent while started.
    hold: Option<UnixStream>,
}

impl NopDriver {
    pub fn new() -> Self {
        Self { hold: None }
    }
}

impl Driver for NopDriver {
    fn device_name(&self) -> Result<String> {
        Ok("dummy".into())
    }

    fn datadesc(&mut self, descs: &mut [DriverDataDesc<'_>]) -> Result<()> {
        for desc in descs {
            desc.enabled = true;
            if desc.data_id() == GYRO {
                desc.periods.push(0);
            } else {
                desc.periods.extend_from_slice(&[
                    0,
                    NS_PER_SEC,
                    NS_PER_SEC / 10,
                    NS_PER_SEC / 500,
                    NS_PER_SEC / 1000,
                    NS_PER_SEC / 2000,
                ]);
            }
        }
        Ok(())
    }

    fn setdata(&mut self, _requests: &[DataRequest]) -> Result<()> {
        Ok(())
    }

    fn io_kind(&self) -> IoKind {
        IoKind::Parse
    }

    fn parse(&mut self, buf: &[u8], _sink: &mut RecordSink) -> Result<usize> {
        Ok(buf.len())
    }

    fn start(&mut self) -> Result<OwnedFd> {
        let (rx, tx) = socket_pair();
        self.hold = Some(tx);
        Ok(rx)
    }

    fn stop(&mut self) -> Result<()> {
        self.hold = None;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Counter driver
// ---------------------------------------------------------------------------

/// Observable driver-side state shared with the test body.
#[derive(Default)]
pub struct CounterProbe {
    /// Every aggregate `setdata` was called with, in order.
    pub setdata_calls: Mutex<Vec<Vec<DataRequest>>>,
    /// Whether `stop` has run.
    pub stopped: AtomicBool,
}

/// Produces a monotonically increasing `u64` at the subscribed period from a
/// background producer thread.
pub struct CounterDriver {
    probe: Arc<CounterProbe>,
    period_ns: Arc<AtomicU64>,
    quit: Arc<AtomicBool>,
    producer: Option<JoinHandle<()>>,
    carry: Vec<u8>,
}

impl CounterDriver {
    pub fn new(probe: Arc<CounterProbe>) -> Self {
        Self {
            probe,
            period_ns: Arc::new(AtomicU64::new(NS_PER_SEC)),
            quit: Arc::new(AtomicBool::new(false)),
            producer: None,
            carry: Vec::new(),
        }
    }
}

impl Driver for CounterDriver {
    fn device_name(&self) -> Result<String> {
        Ok("counter0".into())
    }

    fn datadesc(&mut self, descs: &mut [DriverDataDesc<'_>]) -> Result<()> {
        for desc in descs {
            if desc.data_id() == COUNTER {
                desc.enabled = true;
                desc.periods.extend_from_slice(&[
                    NS_PER_SEC,
                    NS_PER_SEC / 100,
                    NS_PER_SEC / 1000,
                ]);
            }
        }
        Ok(())
    }

    fn setdata(&mut self, requests: &[DataRequest]) -> Result<()> {
        if requests.iter().any(|rq| rq.id != COUNTER) {
            return Err(Error::IdNotInSchema);
        }
        self.probe
            .setdata_calls
            .lock()
            .unwrap()
            .push(requests.to_vec());
        if let Some(rq) = requests.first() {
            self.period_ns.store(rq.period_ns, Ordering::Release);
        }
        Ok(())
    }

    fn io_kind(&self) -> IoKind {
        IoKind::Parse
    }

    fn parse(&mut self, buf: &[u8], sink: &mut RecordSink) -> Result<usize> {
        // Consume everything the record ceiling allows; sub-record tails are
        // carried across cycles.
        let budget = MAX_RECORDS_PER_CALL * 8 - self.carry.len();
        let take = buf.len().min(budget);
        self.carry.extend_from_slice(&buf[..take]);

        let complete = self.carry.len() / 8 * 8;
        for chunk in self.carry[..complete].chunks_exact(8) {
            sink.push(DriverRecord {
                data_id: COUNTER,
                timestamp: SystemTime::now(),
                payload: chunk.to_vec(),
            })?;
        }
        self.carry.drain(..complete);
        Ok(take)
    }

    fn start(&mut self) -> Result<OwnedFd> {
        let (rx, mut tx) = socket_pair();
        let period = Duration::from_nanos(self.period_ns.load(Ordering::Acquire).max(1));
        let quit = Arc::clone(&self.quit);
        quit.store(false, Ordering::Release);

        let producer = thread::Builder::new()
            .name("counter-producer".into())
            .spawn(move || {
                let origin = Instant::now();
                let mut count: u64 = 0;
                while !quit.load(Ordering::Acquire) {
                    if tx.write_all(&count.to_le_bytes()).is_err() {
                        break;
                    }
                    count += 1;
                    // Absolute schedule, so sleep jitter does not accumulate.
                    let target = origin + period * u32::try_from(count).unwrap_or(u32::MAX);
                    let now = Instant::now();
                    if target > now {
                        thread::sleep(target - now);
                    }
                }
            })
            .map_err(|_| Error::Oom)?;

        self.producer = Some(producer);
        Ok(rx)
    }

    fn stop(&mut self) -> Result<()> {
        self.quit.store(true, Ordering::Release);
        if let Some(producer) = self.producer.take() {
            producer.join().map_err(|_| Error::DriverFail)?;
        }
        self.carry.clear();
        self.probe.stopped.store(true, Ordering::Release);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File driver
// ---------------------------------------------------------------------------

/// Frame header: little-endian u16 payload length.
const FRAME_HEADER: usize = 2;

/// On-demand driver that serves a file in fixed-size chunks. Each `next`
/// call frames one chunk onto the descriptor; `next_bytes` frames a chunk of
/// the requested size.
pub struct FileDriver {
    path: PathBuf,
    contents: Vec<u8>,
    cursor: usize,
    chunk: usize,
    tx: Option<UnixStream>,
    carry: Vec<u8>,
}

impl FileDriver {
    pub const CHUNK: usize = 256;

    pub fn open(path: &Path) -> Result<Self> {
        let mut contents = Vec::new();
        std::fs::File::open(path)
            .and_then(|mut f| f.read_to_end(&mut contents))
            .map_err(|_| Error::IoError)?;
        Ok(Self {
            path: path.to_owned(),
            contents,
            cursor: 0,
            chunk: Self::CHUNK,
            tx: None,
            carry: Vec::new(),
        })
    }

    fn emit(&mut self, len: usize) -> Result<()> {
        let remaining = self.contents.len() - self.cursor;
        let len = len.min(remaining);
        if len == 0 {
            return Ok(());
        }
        let Some(tx) = self.tx.as_mut() else {
            return Err(Error::CtxNotActive);
        };
        let header = u16::try_from(len).map_err(|_| Error::InvalidValue)?;
        tx.write_all(&header.to_le_bytes())
            .and_then(|()| tx.write_all(&self.contents[self.cursor..self.cursor + len]))
            .map_err(|_| Error::IoError)?;
        self.cursor += len;
        Ok(())
    }
}

impl Driver for FileDriver {
    fn device_name(&self) -> Result<String> {
        Ok(self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default())
    }

    fn datadesc(&mut self, descs: &mut [DriverDataDesc<'_>]) -> Result<()> {
        for desc in descs {
            if desc.data_id() == FILE {
                desc.enabled = true;
                desc.periods.push(0);
            }
        }
        Ok(())
    }

    fn setdata(&mut self, requests: &[DataRequest]) -> Result<()> {
        if requests.iter().any(|rq| rq.id != FILE) {
            return Err(Error::IdNotInSchema);
        }
        Ok(())
    }

    fn io_kind(&self) -> IoKind {
        IoKind::Parse
    }

    fn parse(&mut self, buf: &[u8], sink: &mut RecordSink) -> Result<usize> {
        self.carry.extend_from_slice(buf);
        loop {
            if self.carry.len() < FRAME_HEADER {
                break;
            }
            let len = usize::from(u16::from_le_bytes([self.carry[0], self.carry[1]]));
            if self.carry.len() < FRAME_HEADER + len {
                break;
            }
            sink.push(DriverRecord {
                data_id: FILE,
                timestamp: SystemTime::now(),
                payload: self.carry[FRAME_HEADER..FRAME_HEADER + len].to_vec(),
            })?;
            self.carry.drain(..FRAME_HEADER + len);
        }
        Ok(buf.len())
    }

    fn start(&mut self) -> Result<OwnedFd> {
        let (rx, tx) = socket_pair();
        self.tx = Some(tx);
        self.cursor = 0;
        Ok(rx)
    }

    fn next(&mut self, id: DataId) -> Result<()> {
        if id != FILE {
            return Err(Error::IdNotInSchema);
        }
        self.emit(self.chunk)
    }

    fn next_bytes(&mut self, id: DataId, bytes: usize) -> Result<()> {
        if id != FILE {
            return Err(Error::IdNotInSchema);
        }
        self.emit(bytes)
    }

    fn stop(&mut self) -> Result<()> {
        self.tx = None;
        self.carry.clear();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Pulse driver
// ---------------------------------------------------------------------------

/// Test-side handles into a running [`PulseDriver`].
#[derive(Default)]
pub struct PulseProbe {
    /// Write end of the driver's descriptor, populated by `start`.
    pub tx: Mutex<Option<UnixStream>>,
    /// Number of timeout-driven poll invocations.
    pub timeouts: std::sync::atomic::AtomicUsize,
}

/// Heartbeat marker emitted on timeout-driven polls.
pub const PULSE_HEARTBEAT: u8 = 0xee;

/// Poll-style driver: services its own descriptor, emitting one record per
/// received byte, and arms a timeout that emits heartbeat records when the
/// line is quiet.
pub struct PulseDriver {
    probe: Arc<PulseProbe>,
    rx: Option<UnixStream>,
}

impl PulseDriver {
    pub const TIMEOUT: Duration = Duration::from_millis(25);

    pub fn new(probe: Arc<PulseProbe>) -> Self {
        Self { probe, rx: None }
    }
}

impl Driver for PulseDriver {
    fn device_name(&self) -> Result<String> {
        Ok("pulse0".into())
    }

    fn datadesc(&mut self, descs: &mut [DriverDataDesc<'_>]) -> Result<()> {
        for desc in descs {
            if desc.data_id() == PULSE {
                desc.enabled = true;
                desc.periods.push(NS_PER_SEC / 100);
            }
        }
        Ok(())
    }

    fn setdata(&mut self, requests: &[DataRequest]) -> Result<()> {
        if requests.iter().any(|rq| rq.id != PULSE) {
            return Err(Error::IdNotInSchema);
        }
        Ok(())
    }

    fn io_kind(&self) -> IoKind {
        IoKind::Poll
    }

    fn poll(
        &mut self,
        events: hound_core::PollEvents,
        sink: &mut RecordSink,
    ) -> Result<hound_core::PollOutcome> {
        let Some(rx) = self.rx.as_mut() else {
            return Err(Error::CtxNotActive);
        };
        if events.readable() {
            let mut buf = [0u8; 64];
            loop {
                match rx.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        for &byte in &buf[..n] {
                            sink.push(DriverRecord {
                                data_id: PULSE,
                                timestamp: SystemTime::now(),
                                payload: vec![byte],
                            })?;
                        }
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(_) => return Err(Error::IoError),
                }
            }
        } else {
            self.probe.timeouts.fetch_add(1, Ordering::Relaxed);
            sink.push(DriverRecord {
                data_id: PULSE,
                timestamp: SystemTime::now(),
                payload: vec![PULSE_HEARTBEAT],
            })?;
        }
        Ok(hound_core::PollOutcome {
            next_events: Some(hound_core::PollEvents::IN | hound_core::PollEvents::PRI),
            timeout: Some(Self::TIMEOUT),
        })
    }

    fn start(&mut self) -> Result<OwnedFd> {
        let (rx, tx) = UnixStream::pair().map_err(|_| Error::IoError)?;
        let core_side = rx.try_clone().map_err(|_| Error::IoError)?;
        self.rx = Some(rx);
        *self.probe.tx.lock().unwrap() = Some(tx);
        Ok(OwnedFd::from(core_side))
    }

    fn stop(&mut self) -> Result<()> {
        self.rx = None;
        *self.probe.tx.lock().unwrap() = None;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Polls `predicate` until it holds or `timeout` elapses.
pub fn wait_for(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    predicate()
}
