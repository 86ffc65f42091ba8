//! Pi-Cam-Registry: camera registry and hotplug lifecycle manager for V4L2 cameras.
//!
//! The [`Registry`] owns a fixed table of camera slots, keeps it consistent
//! while a background thread reports cameras being attached and detached,
//! and notifies the owning framework once a new camera is ready to use.
//! [`CameraModule`] and [`Dispatch`] expose it through the fixed module call
//! shape.

pub mod config;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod hotplug;
pub mod registry;
pub mod traits;

#[cfg(test)]
pub mod mock;

pub use config::RegistryConfig;
pub use device::{DevNodeProbe, V4L2Camera, V4L2Factory};
pub use dispatch::{CameraModule, Dispatch, ModuleInfo, MODULE_INFO};
pub use error::{CameraError, ConfigError, RegistryError, RegistryResult};
pub use hotplug::{HotplugDetector, HotplugSink, PresenceTracker};
pub use registry::{DeviceSession, Registry, Transition};
pub use traits::{
    CameraFacing, CameraHandle, CameraId, CameraInfo, CameraSession, DeviceCapabilities, Format,
    FourCC, Frame, FrameMetadata, HandleFactory, HotplugEvent, HotplugStatus, NotificationChannel,
    PresenceProbe, SlotStatus, MAX_CAMERA_NUM,
};
