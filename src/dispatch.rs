//! Module boundary: bootstrap and call dispatch.
//!
//! [`CameraModule`] owns the one [`Registry`] instance; [`Dispatch`] borrows
//! it and maps the fixed module call shape (string device names, signed
//! ids) onto registry operations.

use std::sync::Arc;

use log::{debug, info};

use crate::config::RegistryConfig;
use crate::device::{DevNodeProbe, V4L2Factory, DEVICE_API_VERSION};
use crate::error::{RegistryError, RegistryResult};
use crate::registry::{DeviceSession, Registry};
use crate::traits::{CameraId, CameraInfo, HandleFactory, NotificationChannel, PresenceProbe};

/// Static description of the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleInfo {
    /// Human readable module name.
    pub name: &'static str,
    /// Module API version as (major, minor).
    pub module_api_version: (u8, u8),
    /// Device API version of every camera handed out.
    pub device_api_version: u32,
}

/// Module identity reported to the framework.
pub const MODULE_INFO: ModuleInfo = ModuleInfo {
    name: "V4L2 hotplug camera module",
    module_api_version: (2, 4),
    device_api_version: DEVICE_API_VERSION,
};

/// Validates module-call arguments and forwards them to the registry.
#[derive(Clone, Copy)]
pub struct Dispatch<'r> {
    registry: &'r Registry,
}

impl<'r> Dispatch<'r> {
    /// Dispatch onto `registry`.
    pub const fn new(registry: &'r Registry) -> Self {
        Self { registry }
    }

    /// Open the camera named by its decimal id, as the module ABI passes it.
    pub fn open(&self, name: &str) -> RegistryResult<DeviceSession> {
        let id = name.trim().parse::<i64>().map_err(|_| {
            debug!("open: camera name {name:?} is not a number");
            RegistryError::InvalidArgument(format!("camera name {name:?} is not a number"))
        })?;
        self.open_id(id)
    }

    /// Open camera `id`.
    pub fn open_id(&self, id: i64) -> RegistryResult<DeviceSession> {
        let id = checked_id(id)?;
        self.registry.open_camera(id)
    }

    /// Cameras currently attached.
    pub fn get_number_of_cameras(&self) -> usize {
        self.registry.get_camera_count()
    }

    /// Descriptor of camera `id`.
    pub fn get_camera_info(&self, id: i64) -> RegistryResult<CameraInfo> {
        let id = checked_id(id)?;
        self.registry.get_camera_info(id)
    }

    /// Install the framework's notification channel.
    pub fn set_callbacks<C>(&self, channel: C)
    where
        C: NotificationChannel + 'static,
    {
        self.registry.set_notification_channel(channel);
    }

    /// Module identity.
    pub const fn module_info(&self) -> ModuleInfo {
        MODULE_INFO
    }
}

fn checked_id(id: i64) -> RegistryResult<CameraId> {
    CameraId::try_from(id).map_err(|_| {
        debug!("camera id {id} is out of bounds");
        RegistryError::OutOfRange(id)
    })
}

/// Loaded camera module: owns the registry for its whole lifetime.
pub struct CameraModule {
    registry: Registry,
}

impl CameraModule {
    /// Load with the V4L2 backend on `config.node_prefix`.
    pub fn load(config: RegistryConfig) -> Self {
        let factory: Arc<dyn HandleFactory> = Arc::new(V4L2Factory::new(config.clone()));
        let probe: Arc<dyn PresenceProbe> = Arc::new(DevNodeProbe::new(config.clone()));
        Self::with_backend(config, factory, probe)
    }

    /// Load with a custom backend.
    pub fn with_backend(
        config: RegistryConfig,
        factory: Arc<dyn HandleFactory>,
        probe: Arc<dyn PresenceProbe>,
    ) -> Self {
        info!(
            "loading {} (module API {}.{})",
            MODULE_INFO.name, MODULE_INFO.module_api_version.0, MODULE_INFO.module_api_version.1
        );
        Self {
            registry: Registry::new(config, factory, probe),
        }
    }

    /// Call dispatch bound to this module's registry.
    pub const fn dispatch(&self) -> Dispatch<'_> {
        Dispatch::new(&self.registry)
    }

    /// The registry itself.
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Stop hotplug detection and release every camera.
    pub fn unload(self) {
        info!("unloading {}", MODULE_INFO.name);
        self.registry.shutdown();
    }
}
