//! Core types and the device contracts the registry is built on.

use std::time::Duration;

use crate::error::Result;

/// Maximum number of camera slots (`/dev/video0` through `/dev/video5`).
pub const MAX_CAMERA_NUM: usize = 6;

/// Stable numeric identity of a camera slot.
pub type CameraId = u32;

/// Pixel format representation (e.g., YUYV).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Video format specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Bytes per line (stride).
    pub stride: u32,
    /// Total frame size in bytes.
    pub size: u32,
}

impl Format {
    /// Create a packed 4:2:2 format specification.
    #[must_use]
    pub const fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        let stride = width * 2;
        let size = stride * height;
        Self {
            width,
            height,
            fourcc,
            stride,
            size,
        }
    }
}

/// Capabilities reported by the capture driver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming.
    pub can_stream: bool,
}

/// Direction a camera faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraFacing {
    /// Facing away from the screen.
    Back,
    /// Facing the user.
    Front,
}

/// Static descriptor returned by `get_camera_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraInfo {
    /// Slot the camera occupies.
    pub id: CameraId,
    /// Facing direction.
    pub facing: CameraFacing,
    /// Sensor orientation in degrees (0, 90, 180 or 270).
    pub orientation: u32,
    /// Device API version the handle implements.
    pub device_version: u32,
    /// Driver capabilities.
    pub capabilities: DeviceCapabilities,
    /// Format the driver reported at initialization, if any.
    pub format: Option<Format>,
}

/// Presence state as reported by hotplug detection and to the framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HotplugStatus {
    /// Hardware is attached.
    Present,
    /// Hardware is gone.
    #[default]
    NotPresent,
}

/// Lifecycle state of a registry slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotStatus {
    /// No handle.
    #[default]
    Absent,
    /// Handle constructed, `initialize` in progress.
    Initializing,
    /// Usable.
    Ready,
    /// Reported gone; handle retained until reclaimed.
    PendingRemoval,
}

/// A single presence change for one camera id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HotplugEvent {
    /// Camera the event refers to.
    pub id: CameraId,
    /// New presence state.
    pub status: HotplugStatus,
}

/// Metadata for a captured frame.
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    /// Frame sequence number.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
    /// Actual bytes used in the frame buffer.
    pub bytes_used: u32,
}

/// A captured video frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw frame data.
    pub data: Vec<u8>,
    /// Frame metadata.
    pub metadata: FrameMetadata,
}

/// An open connection to a camera. Dropping the session closes it.
pub trait CameraSession: Send {
    /// Get current format.
    fn format(&self) -> Result<Format>;

    /// Set capture format. Returns the actual format set by the driver.
    fn set_format(&mut self, format: &Format) -> Result<Format>;

    /// Capture a single frame.
    fn capture_frame(&mut self) -> Result<Frame>;
}

/// One camera device as seen by the registry.
///
/// `initialize` runs before the handle is shared; everything else takes
/// `&self` and may be called from several threads at once.
pub trait CameraHandle: Send + Sync {
    /// Slot this handle was created for.
    fn id(&self) -> CameraId;

    /// Probe the hardware and cache the descriptor.
    fn initialize(&mut self) -> Result<()>;

    /// Open a session on the device.
    fn connect(&self) -> Result<Box<dyn CameraSession>>;

    /// Static descriptor cached by `initialize`.
    fn info(&self) -> CameraInfo;

    /// Lifecycle state last assigned by the registry.
    fn status(&self) -> SlotStatus;

    /// Record the lifecycle state assigned by the registry.
    fn set_status(&self, status: SlotStatus);

    /// Hardware attached (again).
    fn plug(&self);

    /// Hardware detached; the handle goes inert.
    fn unplug(&self);
}

/// Builds uninitialized handles for newly discovered cameras.
pub trait HandleFactory: Send + Sync {
    /// Construct a handle for `id`. The registry calls `initialize` next.
    fn create(&self, id: CameraId) -> Box<dyn CameraHandle>;
}

/// Platform check for whether a candidate camera is present.
pub trait PresenceProbe: Send + Sync {
    /// Whether the backing device for `id` currently exists.
    fn is_present(&self, id: CameraId) -> Result<bool>;
}

/// Callback through which the registry informs the framework of changes.
///
/// Called outside the table lock. Implementations must return quickly and
/// must not call back into registry mutation operations.
pub trait NotificationChannel: Send + Sync {
    /// Camera `id` changed presence.
    fn on_status_changed(&self, id: CameraId, status: HotplugStatus);
}

impl<F> NotificationChannel for F
where
    F: Fn(CameraId, HotplugStatus) + Send + Sync,
{
    fn on_status_changed(&self, id: CameraId, status: HotplugStatus) {
        self(id, status);
    }
}
