//! Protocol registry.
//!
//! Maps protocol strings (case-insensitive) to factories that build a
//! [`Driver`] for a mount request. The defaults cover the local store and
//! HTTP(S); network filesystems are registered with the connector they
//! should use.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::backends::{
    Driver, HttpsDriver, HttpsOptions, LocalDriver, NetFsDriver, NetFsOptions, RamStore,
    SessionConnector, SharedRamStore, UreqTransport,
};
use crate::error::{VfsError, VfsResult};
use crate::mount::MountRequest;
use crate::ops::BackendKind;

/// Protocol names registered by [`BackendRegistry::with_defaults`].
pub const DEFAULT_PROTOCOLS: &[&str] = &["ram", "xfs", "local", "https", "http"];

/// Builds drivers for one protocol.
pub trait DriverFactory: Send + Sync {
    /// Family of the drivers this factory builds.
    fn kind(&self) -> BackendKind;

    /// Build a driver for `request`.
    fn create(&self, request: &MountRequest) -> VfsResult<Driver>;
}

/// Local drivers over a shared RAM store.
#[derive(Debug, Clone)]
pub struct LocalFactory {
    store: SharedRamStore,
}

impl LocalFactory {
    pub fn new(store: SharedRamStore) -> Self {
        Self { store }
    }
}

impl DriverFactory for LocalFactory {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn create(&self, request: &MountRequest) -> VfsResult<Driver> {
        Ok(Driver::Local(LocalDriver::new(
            self.store.clone(),
            &request.path,
        )?))
    }
}

/// HTTPS drivers, each with its own ureq transport.
#[derive(Debug, Clone, Default)]
pub struct HttpsFactory {
    options: HttpsOptions,
}

impl HttpsFactory {
    pub fn new(options: HttpsOptions) -> Self {
        Self { options }
    }
}

impl DriverFactory for HttpsFactory {
    fn kind(&self) -> BackendKind {
        BackendKind::Https
    }

    fn create(&self, request: &MountRequest) -> VfsResult<Driver> {
        let transport = Box::new(UreqTransport::with_timeout(self.options.timeout));
        Ok(Driver::Https(HttpsDriver::new(
            request,
            transport,
            self.options.clone(),
        )?))
    }
}

/// Network filesystem drivers over a session connector.
pub struct NetFsFactory {
    connector: Arc<dyn SessionConnector>,
    options: NetFsOptions,
}

impl NetFsFactory {
    pub fn new(connector: Arc<dyn SessionConnector>, options: NetFsOptions) -> Self {
        Self { connector, options }
    }
}

impl DriverFactory for NetFsFactory {
    fn kind(&self) -> BackendKind {
        BackendKind::NetworkFs
    }

    fn create(&self, request: &MountRequest) -> VfsResult<Driver> {
        Ok(Driver::NetworkFs(NetFsDriver::connect(
            request,
            self.connector.as_ref(),
            self.options.clone(),
        )?))
    }
}

/// Protocol string to factory.
pub struct BackendRegistry {
    factories: HashMap<String, Arc<dyn DriverFactory>>,
    ram: SharedRamStore,
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("protocols", &self.protocols())
            .finish_non_exhaustive()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults(HttpsOptions::default())
    }
}

impl BackendRegistry {
    /// Empty registry with a fresh RAM store.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            ram: RamStore::shared(),
        }
    }

    /// Registry with the local and HTTP(S) protocols.
    pub fn with_defaults(https: HttpsOptions) -> Self {
        let mut registry = Self::new();
        let local: Arc<dyn DriverFactory> = Arc::new(LocalFactory::new(registry.ram.clone()));
        let web: Arc<dyn DriverFactory> = Arc::new(HttpsFactory::new(https));
        for &name in DEFAULT_PROTOCOLS {
            match BackendKind::from_str(name) {
                Some(BackendKind::Local) => registry.register_arc(name, local.clone()),
                Some(BackendKind::Https) => registry.register_arc(name, web.clone()),
                _ => {}
            }
        }
        registry
    }

    /// Register `factory` under `protocol`, replacing any previous entry.
    pub fn register(&mut self, protocol: &str, factory: impl DriverFactory + 'static) {
        self.register_arc(protocol, Arc::new(factory));
    }

    pub fn register_arc(&mut self, protocol: &str, factory: Arc<dyn DriverFactory>) {
        self.factories.insert(protocol.to_ascii_lowercase(), factory);
    }

    /// Register a network filesystem protocol served through `connector`.
    pub fn register_network_fs(
        &mut self,
        protocol: &str,
        connector: Arc<dyn SessionConnector>,
        options: NetFsOptions,
    ) {
        self.register(protocol, NetFsFactory::new(connector, options));
    }

    /// Factory for `protocol`, or `ENODEV`.
    pub fn lookup(&self, protocol: &str) -> VfsResult<Arc<dyn DriverFactory>> {
        self.factories
            .get(&protocol.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| VfsError::UnknownProtocol(protocol.to_string()))
    }

    pub fn contains(&self, protocol: &str) -> bool {
        self.factories.contains_key(&protocol.to_ascii_lowercase())
    }

    /// Registered protocol names, sorted.
    pub fn protocols(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// The RAM store shared by every local mount.
    pub fn ram_store(&self) -> SharedRamStore {
        self.ram.clone()
    }

    /// Driver for slot 0.
    pub fn root_driver(&self) -> Driver {
        Driver::Local(LocalDriver::at_root(self.ram.clone()))
    }
}
