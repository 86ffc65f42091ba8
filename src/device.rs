//! V4L2 camera backend using the v4l crate.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use log::{debug, info};
use nix::errno::Errno;
use nix::unistd::{access, AccessFlags};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream as V4lCaptureStream;
use v4l::video::Capture;
use v4l::Device;

use crate::config::RegistryConfig;
use crate::error::{CameraError, Result};
use crate::traits::{
    CameraFacing, CameraHandle, CameraId, CameraInfo, CameraSession, DeviceCapabilities, Format,
    FourCC, Frame, FrameMetadata, HandleFactory, PresenceProbe, SlotStatus,
};

/// Device API version implemented by [`V4L2Camera`].
pub const DEVICE_API_VERSION: u32 = 3;

/// Buffers queued for a single-frame capture.
const CAPTURE_BUFFERS: u32 = 2;

fn open_device(path: &Path) -> Result<Device> {
    Device::with_path(path)
        .map_err(|err| CameraError::DeviceOpenFailed(format!("{}: {err}", path.display())))
}

fn query_capabilities(device: &Device) -> Result<DeviceCapabilities> {
    let caps = device
        .query_caps()
        .map_err(|err| CameraError::DeviceOpenFailed(err.to_string()))?;

    Ok(DeviceCapabilities {
        driver: caps.driver,
        card: caps.card,
        bus_info: caps.bus,
        can_capture: caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE),
        can_stream: caps.capabilities.contains(v4l::capability::Flags::STREAMING),
    })
}

fn read_format(device: &Device) -> Result<Format> {
    let fmt = device
        .format()
        .map_err(|err| CameraError::StreamError(err.to_string()))?;

    Ok(Format {
        width: fmt.width,
        height: fmt.height,
        fourcc: FourCC::from(fmt.fourcc),
        stride: fmt.stride,
        size: fmt.size,
    })
}

/// Camera handle backed by a `/dev/videoN` node.
pub struct V4L2Camera {
    id: CameraId,
    path: PathBuf,
    facing: CameraFacing,
    orientation: u32,
    info: Option<CameraInfo>,
    status: Mutex<SlotStatus>,
    plugged: AtomicBool,
}

impl V4L2Camera {
    /// Describe the camera at `path`. Nothing is opened until `initialize`.
    pub const fn new(id: CameraId, path: PathBuf, facing: CameraFacing, orientation: u32) -> Self {
        Self {
            id,
            path,
            facing,
            orientation,
            info: None,
            status: Mutex::new(SlotStatus::Absent),
            plugged: AtomicBool::new(false),
        }
    }

    /// Device node this camera is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn fallback_info(&self) -> CameraInfo {
        CameraInfo {
            id: self.id,
            facing: self.facing,
            orientation: self.orientation,
            device_version: DEVICE_API_VERSION,
            capabilities: DeviceCapabilities::default(),
            format: None,
        }
    }
}

impl CameraHandle for V4L2Camera {
    fn id(&self) -> CameraId {
        self.id
    }

    fn initialize(&mut self) -> Result<()> {
        let device = open_device(&self.path)?;
        let capabilities = query_capabilities(&device)?;
        if !capabilities.can_capture {
            return Err(CameraError::DeviceOpenFailed(format!(
                "{} is not a capture device",
                self.path.display()
            )));
        }
        // Some drivers refuse G_FMT until configured; the descriptor is still usable.
        let format = read_format(&device).ok();

        info!(
            "camera {}: {} ({}) on {}",
            self.id,
            capabilities.card,
            capabilities.driver,
            self.path.display()
        );

        self.info = Some(CameraInfo {
            id: self.id,
            facing: self.facing,
            orientation: self.orientation,
            device_version: DEVICE_API_VERSION,
            capabilities,
            format,
        });
        Ok(())
    }

    fn connect(&self) -> Result<Box<dyn CameraSession>> {
        if !self.plugged.load(Ordering::Acquire) {
            return Err(CameraError::Disconnected(self.id));
        }
        let device = open_device(&self.path)?;
        debug!("camera {}: session opened", self.id);
        Ok(Box::new(V4L2Session {
            id: self.id,
            device,
        }))
    }

    fn info(&self) -> CameraInfo {
        self.info.clone().unwrap_or_else(|| self.fallback_info())
    }

    fn status(&self) -> SlotStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, status: SlotStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    fn plug(&self) {
        self.plugged.store(true, Ordering::Release);
    }

    fn unplug(&self) {
        self.plugged.store(false, Ordering::Release);
    }
}

/// Open V4L2 device. The file descriptor is closed on drop.
pub struct V4L2Session {
    id: CameraId,
    device: Device,
}

impl CameraSession for V4L2Session {
    fn format(&self) -> Result<Format> {
        read_format(&self.device)
    }

    fn set_format(&mut self, format: &Format) -> Result<Format> {
        let mut fmt = self
            .device
            .format()
            .map_err(|err| CameraError::StreamError(err.to_string()))?;

        fmt.width = format.width;
        fmt.height = format.height;
        fmt.fourcc = format.fourcc.into();

        let fmt = self
            .device
            .set_format(&fmt)
            .map_err(|_| CameraError::FormatNotSupported(format.clone()))?;

        Ok(Format {
            width: fmt.width,
            height: fmt.height,
            fourcc: FourCC::from(fmt.fourcc),
            stride: fmt.stride,
            size: fmt.size,
        })
    }

    fn capture_frame(&mut self) -> Result<Frame> {
        let mut stream = Stream::with_buffers(&self.device, Type::VideoCapture, CAPTURE_BUFFERS)
            .map_err(|err| CameraError::StreamError(err.to_string()))?;

        let (buf, meta) = stream
            .next()
            .map_err(|err| CameraError::StreamError(err.to_string()))?;

        // Safe conversions: V4L2 timestamps are always non-negative in practice
        #[allow(clippy::cast_sign_loss)]
        let secs = meta.timestamp.sec.max(0) as u64;
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let nanos = (meta.timestamp.usec.max(0) as u32).saturating_mul(1000);

        debug!("camera {}: captured frame {}", self.id, meta.sequence);
        Ok(Frame {
            data: buf.to_vec(),
            metadata: FrameMetadata {
                sequence: meta.sequence,
                timestamp: Duration::new(secs, nanos),
                bytes_used: meta.bytesused,
            },
        })
    }
}

/// Creates [`V4L2Camera`] handles for `<node_prefix><id>`.
#[derive(Debug, Clone)]
pub struct V4L2Factory {
    config: RegistryConfig,
}

impl V4L2Factory {
    /// Factory using the node prefix, facing and orientation from `config`.
    pub const fn new(config: RegistryConfig) -> Self {
        Self { config }
    }

    /// Facing reported for `id`.
    pub fn facing(&self, id: CameraId) -> CameraFacing {
        if self.config.front_facing.contains(&id) {
            CameraFacing::Front
        } else {
            CameraFacing::Back
        }
    }
}

impl HandleFactory for V4L2Factory {
    fn create(&self, id: CameraId) -> Box<dyn CameraHandle> {
        Box::new(V4L2Camera::new(
            id,
            self.config.node_path(id),
            self.facing(id),
            self.config.orientation,
        ))
    }
}

/// Presence check on device nodes: the node exists and this process may
/// read and write it.
#[derive(Debug, Clone)]
pub struct DevNodeProbe {
    config: RegistryConfig,
}

impl DevNodeProbe {
    /// Probe nodes under the prefix from `config`.
    pub const fn new(config: RegistryConfig) -> Self {
        Self { config }
    }
}

impl PresenceProbe for DevNodeProbe {
    fn is_present(&self, id: CameraId) -> Result<bool> {
        let path = self.config.node_path(id);
        match access(path.as_path(), AccessFlags::R_OK | AccessFlags::W_OK) {
            Ok(()) => Ok(true),
            Err(Errno::ENOENT | Errno::ENOTDIR | Errno::EACCES | Errno::EPERM | Errno::EROFS) => {
                Ok(false)
            }
            Err(errno) => Err(CameraError::Io(io::Error::from(errno))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_prefix(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join(format!("pi-cam-registry-{name}-{}", std::process::id()));
        fs::create_dir_all(&dir).expect("create temp dir");
        dir.join("video")
    }

    #[test]
    fn test_dev_node_probe() {
        let prefix = temp_prefix("probe");
        let config = RegistryConfig::new().with_node_prefix(&prefix);
        let probe = DevNodeProbe::new(config.clone());

        assert!(!probe.is_present(0).expect("probe failed"));

        fs::write(config.node_path(0), b"").expect("create node");
        assert!(probe.is_present(0).expect("probe failed"));
        assert!(!probe.is_present(1).expect("probe failed"));

        fs::remove_file(config.node_path(0)).expect("remove node");
        assert!(!probe.is_present(0).expect("probe failed"));
    }

    #[test]
    fn test_dev_node_probe_unreachable_prefix() {
        let prefix = temp_prefix("blocked");
        fs::write(&prefix, b"").expect("create file");
        // Prefix is a plain file, so `<prefix>/video0` can never be accessed.
        let config = RegistryConfig::new().with_node_prefix(prefix.join("video"));
        let probe = DevNodeProbe::new(config);

        assert!(!probe.is_present(0).expect("probe failed"));
        fs::remove_file(&prefix).expect("remove file");
    }

    #[test]
    fn test_factory_facing() {
        let factory = V4L2Factory::new(RegistryConfig::new().with_orientation(90));
        assert_eq!(factory.facing(0), CameraFacing::Back);
        assert_eq!(factory.facing(1), CameraFacing::Front);

        let handle = factory.create(1);
        let info = handle.info();
        assert_eq!(info.id, 1);
        assert_eq!(info.facing, CameraFacing::Front);
        assert_eq!(info.orientation, 90);
        assert_eq!(info.device_version, DEVICE_API_VERSION);
    }

    #[test]
    fn test_initialize_missing_node_fails() {
        let prefix = temp_prefix("missing");
        let mut camera =
            V4L2Camera::new(0, prefix.with_file_name("video9"), CameraFacing::Back, 0);
        assert!(matches!(
            camera.initialize(),
            Err(CameraError::DeviceOpenFailed(_))
        ));
    }

    #[test]
    fn test_connect_requires_plug() {
        let camera =
            V4L2Camera::new(0, PathBuf::from("/nonexistent/video0"), CameraFacing::Back, 0);
        assert_eq!(camera.id(), 0);
        assert_eq!(camera.path(), Path::new("/nonexistent/video0"));
        assert!(matches!(
            camera.connect(),
            Err(CameraError::Disconnected(0))
        ));

        camera.plug();
        assert!(matches!(
            camera.connect(),
            Err(CameraError::DeviceOpenFailed(_))
        ));
        camera.unplug();
        camera.set_status(SlotStatus::PendingRemoval);
        assert_eq!(camera.status(), SlotStatus::PendingRemoval);
    }
}
