//! Registry configuration.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use log::warn;

use crate::error::ConfigError;
use crate::traits::{CameraId, MAX_CAMERA_NUM};

/// Environment variable overriding the device node prefix.
pub const ENV_NODE_PREFIX: &str = "PI_CAM_NODE_PREFIX";
/// Environment variable overriding the poll interval in milliseconds.
pub const ENV_POLL_MS: &str = "PI_CAM_POLL_MS";
/// Environment variable enabling removal notifications (`1`/`true`).
pub const ENV_NOTIFY_REMOVAL: &str = "PI_CAM_NOTIFY_REMOVAL";
/// Environment variable toggling the hotplug detector (`0`/`false` disables).
pub const ENV_HOTPLUG: &str = "PI_CAM_HOTPLUG";

/// Tunables for the registry, the hotplug detector and the V4L2 backend.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Device nodes are `<node_prefix><id>`.
    pub node_prefix: PathBuf,
    /// Ids the detector watches.
    pub candidates: Vec<CameraId>,
    /// Run the background hotplug detector.
    pub detect_hotplug: bool,
    /// Detector poll period.
    pub poll_interval: Duration,
    /// Delay before the first device-node check on attach.
    pub attach_settle: Duration,
    /// Additional device-node checks on attach.
    pub attach_retries: u32,
    /// Delay between device-node checks.
    pub attach_retry_delay: Duration,
    /// Forward NotPresent to the notification channel on detach.
    pub notify_removal: bool,
    /// Ids reported as front facing.
    pub front_facing: Vec<CameraId>,
    /// Sensor orientation reported for every camera.
    pub orientation: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryConfig {
    /// Defaults for `/dev/video0`..`/dev/video5`.
    #[must_use]
    pub fn new() -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let candidates = (0..MAX_CAMERA_NUM as CameraId).collect();
        Self {
            node_prefix: PathBuf::from("/dev/video"),
            candidates,
            detect_hotplug: true,
            poll_interval: Duration::from_millis(500),
            attach_settle: Duration::from_millis(200),
            attach_retries: 4,
            attach_retry_delay: Duration::from_millis(200),
            notify_removal: false,
            front_facing: vec![1],
            orientation: 0,
        }
    }

    /// Defaults overridden by the `PI_CAM_*` environment variables.
    ///
    /// Unparsable values are logged and ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::new();

        if let Ok(prefix) = env::var(ENV_NODE_PREFIX) {
            config.node_prefix = PathBuf::from(prefix);
        }
        if let Ok(value) = env::var(ENV_POLL_MS) {
            match value.parse::<u64>() {
                Ok(ms) => config.poll_interval = Duration::from_millis(ms),
                Err(err) => warn!("ignoring {ENV_POLL_MS}={value}: {err}"),
            }
        }
        if let Ok(value) = env::var(ENV_NOTIFY_REMOVAL) {
            match parse_flag(&value) {
                Some(flag) => config.notify_removal = flag,
                None => warn!("ignoring {ENV_NOTIFY_REMOVAL}={value}: expected a boolean"),
            }
        }
        if let Ok(value) = env::var(ENV_HOTPLUG) {
            match parse_flag(&value) {
                Some(flag) => config.detect_hotplug = flag,
                None => warn!("ignoring {ENV_HOTPLUG}={value}: expected a boolean"),
            }
        }

        config
    }

    /// Set the device node prefix.
    #[must_use]
    pub fn with_node_prefix<P: Into<PathBuf>>(mut self, prefix: P) -> Self {
        self.node_prefix = prefix.into();
        self
    }

    /// Set the ids the detector watches.
    #[must_use]
    pub fn with_candidates(mut self, candidates: Vec<CameraId>) -> Self {
        self.candidates = candidates;
        self
    }

    /// Enable or disable the background detector.
    #[must_use]
    pub const fn with_hotplug_detection(mut self, enabled: bool) -> Self {
        self.detect_hotplug = enabled;
        self
    }

    /// Set the detector poll period.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the bounded device-node wait used on attach.
    #[must_use]
    pub const fn with_attach_wait(
        mut self,
        settle: Duration,
        retries: u32,
        delay: Duration,
    ) -> Self {
        self.attach_settle = settle;
        self.attach_retries = retries;
        self.attach_retry_delay = delay;
        self
    }

    /// Forward NotPresent notifications on detach.
    #[must_use]
    pub const fn with_notify_removal(mut self, enabled: bool) -> Self {
        self.notify_removal = enabled;
        self
    }

    /// Set the ids reported as front facing.
    #[must_use]
    pub fn with_front_facing(mut self, ids: Vec<CameraId>) -> Self {
        self.front_facing = ids;
        self
    }

    /// Set the sensor orientation.
    #[must_use]
    pub const fn with_orientation(mut self, degrees: u32) -> Self {
        self.orientation = degrees;
        self
    }

    /// Check values the registry depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.detect_hotplug && self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        if let Some(&id) = self
            .candidates
            .iter()
            .find(|&&id| id as usize >= MAX_CAMERA_NUM)
        {
            return Err(ConfigError::CandidateOutOfRange(id, MAX_CAMERA_NUM));
        }
        if self.orientation % 90 != 0 || self.orientation >= 360 {
            return Err(ConfigError::InvalidOrientation(self.orientation));
        }
        Ok(())
    }

    /// Device node path for `id`.
    pub fn node_path(&self, id: CameraId) -> PathBuf {
        let mut path = self.node_prefix.clone().into_os_string();
        path.push(id.to_string());
        PathBuf::from(path)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
