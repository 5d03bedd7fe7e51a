//! The library handle and public driver-management API.
//!
//! [`Hound`] owns the driver registry, the live device table, and the I/O
//! loop. The host constructs one with [`Hound::builder`], registers its
//! driver factories, and initializes drivers per device path. Schema and
//! config file parsing stay outside the core: the builder accepts them as
//! trait objects.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use fxhash::FxHashMap;
use parking_lot::Mutex;

use crate::ctx::{Context, ContextRequest};
use crate::driver::{DriverFactory, DriverInstance, DriverRegistry};
use crate::error::{Error, Result};
use crate::io::EventLoop;
use crate::schema::{validate_schema, DataDescriptor, SchemaDescriptor};
use crate::types::{DataId, DeviceId, InitArg};
use crate::util::normalize_path;

/// Parses schema files into descriptors. Implemented by the host; the core
/// only consumes the parsed structure.
pub trait SchemaParser: Send + Sync {
    /// Parses `file` relative to `base_dir` into schema descriptors.
    ///
    /// # Errors
    ///
    /// Implementations report parse failures with a taxonomy error, usually
    /// [`Error::InvalidString`] or [`Error::IoError`].
    fn parse(&self, base_dir: &Path, file: &str) -> Result<Vec<SchemaDescriptor>>;
}

/// One driver to initialize, as produced by a config parser.
#[derive(Debug, Clone)]
pub struct ConfigEntry {
    /// Registered driver name.
    pub driver: String,
    /// Device path.
    pub path: PathBuf,
    /// Directory containing the schema file.
    pub schema_base: PathBuf,
    /// Schema file name.
    pub schema: String,
    /// Driver init arguments.
    pub args: Vec<InitArg>,
}

/// Parses config files into bulk-init entries. Implemented by the host.
pub trait ConfigParser: Send + Sync {
    /// Parses the config file at `path`.
    ///
    /// # Errors
    ///
    /// Implementations report parse failures with a taxonomy error.
    fn parse(&self, path: &Path) -> Result<Vec<ConfigEntry>>;
}

/// Live device table: path-keyed instances plus the global data-ID claims.
struct DeviceTable {
    by_path: FxHashMap<PathBuf, Arc<DriverInstance>>,
    by_dev: FxHashMap<DeviceId, Arc<DriverInstance>>,
    claims: FxHashMap<DataId, Arc<DriverInstance>>,
    next_dev_id: u16,
}

impl DeviceTable {
    fn new() -> Self {
        Self {
            by_path: FxHashMap::default(),
            by_dev: FxHashMap::default(),
            claims: FxHashMap::default(),
            next_dev_id: 0,
        }
    }

    fn remove(&mut self, instance: &Arc<DriverInstance>) {
        self.by_path.remove(instance.path());
        self.by_dev.remove(&instance.id());
        self.claims
            .retain(|_, claimant| !Arc::ptr_eq(claimant, instance));
    }
}

/// Shared state behind [`Hound`] and every [`Context`].
pub(crate) struct HoundInner {
    registry: DriverRegistry,
    devices: Mutex<DeviceTable>,
    io: EventLoop,
    schema_parser: Option<Box<dyn SchemaParser>>,
    config_parser: Option<Box<dyn ConfigParser>>,
}

impl HoundInner {
    pub(crate) fn io(&self) -> &EventLoop {
        &self.io
    }

    /// The instance claiming `id`, if any.
    pub(crate) fn claimant(&self, id: DataId) -> Option<Arc<DriverInstance>> {
        self.devices.lock().claims.get(&id).cloned()
    }
}

/// Builder for [`Hound`].
#[derive(Default)]
pub struct HoundBuilder {
    schema_parser: Option<Box<dyn SchemaParser>>,
    config_parser: Option<Box<dyn ConfigParser>>,
}

impl HoundBuilder {
    /// Supplies the schema parser used by
    /// [`init_driver`](Hound::init_driver).
    #[must_use]
    pub fn schema_parser(mut self, parser: impl SchemaParser + 'static) -> Self {
        self.schema_parser = Some(Box::new(parser));
        self
    }

    /// Supplies the config parser used by
    /// [`init_config`](Hound::init_config).
    #[must_use]
    pub fn config_parser(mut self, parser: impl ConfigParser + 'static) -> Self {
        self.config_parser = Some(Box::new(parser));
        self
    }

    /// Spawns the I/O loop and returns the handle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IoError`] or [`Error::Oom`] if the loop's wake pipe
    /// or thread cannot be created.
    pub fn build(self) -> Result<Hound> {
        Ok(Hound {
            inner: Arc::new(HoundInner {
                registry: DriverRegistry::new(),
                devices: Mutex::new(DeviceTable::new()),
                io: EventLoop::new()?,
                schema_parser: self.schema_parser,
                config_parser: self.config_parser,
            }),
        })
    }
}

/// The library handle.
///
/// Dropping it (after every [`Context`] is gone) tears down the I/O loop.
pub struct Hound {
    inner: Arc<HoundInner>,
}

impl Hound {
    /// Starts building a handle.
    #[must_use]
    pub fn builder() -> HoundBuilder {
        HoundBuilder::default()
    }

    /// Registers a driver factory under `name`. One-shot: registering the
    /// same name twice fails.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DriverAlreadyRegistered`] if the name is taken and
    /// [`Error::InvalidString`] for an empty name.
    pub fn register_driver(
        &self,
        name: &str,
        factory: impl DriverFactory + 'static,
    ) -> Result<()> {
        self.inner.registry.register(name, Arc::new(factory))
    }

    /// Initializes a driver for one device path.
    ///
    /// Parses and validates the schema, creates driver state, runs the
    /// `device_name` and `datadesc` hooks, claims the enabled data IDs, and
    /// assigns a device ID. The driver does not start producing until a
    /// context subscribes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NullValue`] without a schema parser,
    /// [`Error::DriverNotRegistered`] for an unknown name,
    /// [`Error::DriverAlreadyPresent`] if the path is occupied,
    /// [`Error::ConflictingDrivers`] if another instance claims one of the
    /// enabled data IDs, and [`Error::MissingDeviceIds`] when device IDs are
    /// exhausted. Schema and driver hook errors pass through.
    pub fn init_driver(
        &self,
        name: &str,
        path: impl AsRef<Path>,
        schema_base: impl AsRef<Path>,
        schema_file: &str,
        args: &[InitArg],
    ) -> Result<()> {
        let parser = self.inner.schema_parser.as_ref().ok_or(Error::NullValue)?;
        let factory = self.inner.registry.lookup(name)?;
        let path = normalize_path(path.as_ref());

        let mut devices = self.inner.devices.lock();
        if devices.by_path.contains_key(&path) {
            return Err(Error::DriverAlreadyPresent);
        }
        if devices.next_dev_id > u16::from(u8::MAX) {
            return Err(Error::MissingDeviceIds);
        }

        let schemas = parser.parse(schema_base.as_ref(), schema_file)?;
        validate_schema(&schemas)?;

        let driver = factory.create(&path, args)?;
        #[allow(clippy::cast_possible_truncation)]
        let dev_id = DeviceId(devices.next_dev_id as u8);
        let instance = Arc::new(DriverInstance::init(dev_id, name, &path, driver, schemas)?);

        for desc in instance.descriptors() {
            if devices.claims.contains_key(&desc.data_id) {
                return Err(Error::ConflictingDrivers);
            }
        }

        devices.next_dev_id += 1;
        for desc in instance.descriptors() {
            devices.claims.insert(desc.data_id, Arc::clone(&instance));
        }
        devices.by_dev.insert(dev_id, Arc::clone(&instance));
        devices.by_path.insert(path, instance);
        Ok(())
    }

    /// Destroys the driver instance at `path`, releasing its data-ID claims.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DevDoesNotExist`] for an unoccupied path and
    /// [`Error::DriverInUse`] while contexts still hold subscriptions on it.
    pub fn destroy_driver(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = normalize_path(path.as_ref());
        let mut devices = self.inner.devices.lock();
        let instance = devices
            .by_path
            .get(&path)
            .cloned()
            .ok_or(Error::DevDoesNotExist)?;
        instance.retire()?;
        devices.remove(&instance);
        Ok(())
    }

    /// Destroys every driver instance.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DriverInUse`] at the first instance that still has
    /// subscriptions; instances destroyed before it stay destroyed.
    pub fn destroy_all(&self) -> Result<()> {
        let mut devices = self.inner.devices.lock();
        let instances: Vec<_> = devices.by_path.values().cloned().collect();
        for instance in instances {
            instance.retire()?;
            devices.remove(&instance);
        }
        Ok(())
    }

    /// Bulk-initializes drivers from a config file via the registered
    /// config parser. On failure, drivers initialized by this call are
    /// destroyed again in reverse order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NullValue`] without a config parser; parser and
    /// per-entry init errors pass through.
    pub fn init_config(&self, config: impl AsRef<Path>) -> Result<()> {
        let parser = self.inner.config_parser.as_ref().ok_or(Error::NullValue)?;
        let entries = parser.parse(config.as_ref())?;

        let mut initialized: Vec<PathBuf> = Vec::with_capacity(entries.len());
        for entry in &entries {
            match self.init_driver(
                &entry.driver,
                &entry.path,
                &entry.schema_base,
                &entry.schema,
                &entry.args,
            ) {
                Ok(()) => initialized.push(entry.path.clone()),
                Err(err) => {
                    for path in initialized.iter().rev() {
                        if let Err(destroy_err) = self.destroy_driver(path) {
                            tracing::warn!(
                                path = %path.display(),
                                error = %destroy_err,
                                "failed to roll back driver during init_config"
                            );
                        }
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Describes every enabled data stream across all initialized drivers.
    #[must_use]
    pub fn datadescs(&self) -> Vec<DataDescriptor> {
        let devices = self.inner.devices.lock();
        let mut descs: Vec<DataDescriptor> = devices
            .by_path
            .values()
            .flat_map(|instance| instance.datadescs())
            .collect();
        descs.sort_by_key(|d| (d.dev_id.0, d.data_id));
        descs
    }

    /// Returns the name the driver at `id` reported for its device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DevDoesNotExist`] for unassigned device IDs.
    pub fn device_name(&self, id: DeviceId) -> Result<String> {
        self.inner
            .devices
            .lock()
            .by_dev
            .get(&id)
            .map(|instance| instance.device_name().to_owned())
            .ok_or(Error::DevDoesNotExist)
    }

    /// Allocates a subscription context. See [`Context`] for the lifecycle.
    ///
    /// # Errors
    ///
    /// Validation failures per [`ContextRequest`]: empty request list,
    /// oversized list, duplicate IDs, unknown IDs, unadvertised periods, or
    /// a zero queue capacity.
    pub fn alloc_ctx(&self, request: ContextRequest) -> Result<Context> {
        Context::alloc(Arc::clone(&self.inner), request)
    }
}

impl std::fmt::Debug for Hound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let devices = self.inner.devices.lock();
        f.debug_struct("Hound")
            .field("devices", &devices.by_path.len())
            .field("claims", &devices.claims.len())
            .finish_non_exhaustive()
    }
}
