//! Mock backend for testing the registry without hardware.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{CameraError, Result};
use crate::traits::{
    CameraFacing, CameraHandle, CameraId, CameraInfo, CameraSession, DeviceCapabilities, Format,
    FourCC, Frame, FrameMetadata, HandleFactory, HotplugStatus, NotificationChannel,
    PresenceProbe, SlotStatus,
};

#[derive(Debug, Default)]
struct FactoryState {
    created: HashMap<CameraId, u32>,
    dropped: HashMap<CameraId, u32>,
    plugs: HashMap<CameraId, u32>,
    unplugs: HashMap<CameraId, u32>,
    fail_initialize: HashSet<CameraId>,
    fail_connect: HashSet<CameraId>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn bump(counter: &mut HashMap<CameraId, u32>, id: CameraId) {
    *counter.entry(id).or_default() += 1;
}

/// Factory producing [`MockHandle`]s and recording their lifecycle.
#[derive(Debug, Clone, Default)]
pub struct MockFactory {
    state: Arc<Mutex<FactoryState>>,
}

impl MockFactory {
    /// Create a factory whose handles all succeed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `initialize` fail for handles created for `id`.
    pub fn fail_initialize(&self, id: CameraId, fail: bool) {
        let mut state = lock(&self.state);
        if fail {
            state.fail_initialize.insert(id);
        } else {
            state.fail_initialize.remove(&id);
        }
    }

    /// Make `connect` fail for `id`.
    pub fn fail_connect(&self, id: CameraId, fail: bool) {
        let mut state = lock(&self.state);
        if fail {
            state.fail_connect.insert(id);
        } else {
            state.fail_connect.remove(&id);
        }
    }

    /// Handles constructed for `id`.
    pub fn created(&self, id: CameraId) -> u32 {
        lock(&self.state).created.get(&id).copied().unwrap_or(0)
    }

    /// Handles destroyed for `id`.
    pub fn dropped(&self, id: CameraId) -> u32 {
        lock(&self.state).dropped.get(&id).copied().unwrap_or(0)
    }

    /// `plug` calls for `id`.
    pub fn plugs(&self, id: CameraId) -> u32 {
        lock(&self.state).plugs.get(&id).copied().unwrap_or(0)
    }

    /// `unplug` calls for `id`.
    pub fn unplugs(&self, id: CameraId) -> u32 {
        lock(&self.state).unplugs.get(&id).copied().unwrap_or(0)
    }
}

impl HandleFactory for MockFactory {
    fn create(&self, id: CameraId) -> Box<dyn CameraHandle> {
        bump(&mut lock(&self.state).created, id);
        Box::new(MockHandle {
            id,
            state: Arc::clone(&self.state),
            status: Mutex::new(SlotStatus::Absent),
            plugged: Mutex::new(false),
            info: None,
        })
    }
}

/// Mock camera handle.
pub struct MockHandle {
    id: CameraId,
    state: Arc<Mutex<FactoryState>>,
    status: Mutex<SlotStatus>,
    plugged: Mutex<bool>,
    info: Option<CameraInfo>,
}

impl CameraHandle for MockHandle {
    fn id(&self) -> CameraId {
        self.id
    }

    fn initialize(&mut self) -> Result<()> {
        if lock(&self.state).fail_initialize.contains(&self.id) {
            return Err(CameraError::DeviceNotFound(self.id));
        }
        self.info = Some(CameraInfo {
            id: self.id,
            facing: CameraFacing::Back,
            orientation: 0,
            device_version: 3,
            capabilities: DeviceCapabilities {
                driver: "mock".to_owned(),
                card: "Mock Camera".to_owned(),
                bus_info: format!("mock:{}", self.id),
                can_capture: true,
                can_stream: true,
            },
            format: Some(Format::new(64, 48, FourCC::YUYV)),
        });
        Ok(())
    }

    fn connect(&self) -> Result<Box<dyn CameraSession>> {
        if lock(&self.state).fail_connect.contains(&self.id) {
            return Err(CameraError::DeviceOpenFailed(format!("mock {}", self.id)));
        }
        Ok(Box::new(MockSession {
            format: Format::new(64, 48, FourCC::YUYV),
            frame_count: 0,
        }))
    }

    fn info(&self) -> CameraInfo {
        self.info.clone().unwrap_or_else(|| CameraInfo {
            id: self.id,
            facing: CameraFacing::Back,
            orientation: 0,
            device_version: 3,
            capabilities: DeviceCapabilities::default(),
            format: None,
        })
    }

    fn status(&self) -> SlotStatus {
        *lock(&self.status)
    }

    fn set_status(&self, status: SlotStatus) {
        *lock(&self.status) = status;
    }

    fn plug(&self) {
        *lock(&self.plugged) = true;
        bump(&mut lock(&self.state).plugs, self.id);
    }

    fn unplug(&self) {
        *lock(&self.plugged) = false;
        bump(&mut lock(&self.state).unplugs, self.id);
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        bump(&mut lock(&self.state).dropped, self.id);
    }
}

/// Mock capture session producing solid gray frames.
pub struct MockSession {
    format: Format,
    frame_count: u32,
}

impl CameraSession for MockSession {
    fn format(&self) -> Result<Format> {
        Ok(self.format.clone())
    }

    fn set_format(&mut self, format: &Format) -> Result<Format> {
        self.format = format.clone();
        Ok(self.format.clone())
    }

    fn capture_frame(&mut self) -> Result<Frame> {
        let seq = self.frame_count;
        self.frame_count += 1;

        Ok(Frame {
            data: vec![128; self.format.size as usize],
            metadata: FrameMetadata {
                sequence: seq,
                timestamp: Duration::from_millis(u64::from(seq) * 33), // ~30fps
                bytes_used: self.format.size,
            },
        })
    }
}

#[derive(Debug, Default)]
struct ProbeState {
    present: HashSet<CameraId>,
    failing: HashSet<CameraId>,
    checks: HashMap<CameraId, u32>,
}

/// Presence probe driven by the test.
#[derive(Debug, Clone, Default)]
pub struct MockProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl MockProbe {
    /// Create a probe reporting nothing present.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether `id` is present.
    pub fn set_present(&self, id: CameraId, present: bool) {
        let mut state = lock(&self.state);
        if present {
            state.present.insert(id);
        } else {
            state.present.remove(&id);
        }
    }

    /// Make presence checks for `id` fail.
    pub fn fail(&self, id: CameraId, fail: bool) {
        let mut state = lock(&self.state);
        if fail {
            state.failing.insert(id);
        } else {
            state.failing.remove(&id);
        }
    }

    /// Number of presence checks made for `id`.
    pub fn checks(&self, id: CameraId) -> u32 {
        lock(&self.state).checks.get(&id).copied().unwrap_or(0)
    }
}

impl PresenceProbe for MockProbe {
    fn is_present(&self, id: CameraId) -> Result<bool> {
        let mut state = lock(&self.state);
        bump(&mut state.checks, id);
        if state.failing.contains(&id) {
            return Err(CameraError::Timeout);
        }
        Ok(state.present.contains(&id))
    }
}

/// Notification channel recording every call.
#[derive(Debug, Clone, Default)]
pub struct RecordingChannel {
    events: Arc<(Mutex<Vec<(CameraId, HotplugStatus)>>, Condvar)>,
}

impl RecordingChannel {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications received so far.
    pub fn events(&self) -> Vec<(CameraId, HotplugStatus)> {
        lock(&self.events.0).clone()
    }

    /// Block until at least `count` notifications arrived or `timeout` passes.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (events, arrived) = &*self.events;
        let mut guard = lock(events);
        while guard.len() < count {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            guard = arrived
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

impl NotificationChannel for RecordingChannel {
    fn on_status_changed(&self, id: CameraId, status: HotplugStatus) {
        let (events, arrived) = &*self.events;
        lock(events).push((id, status));
        arrived.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_handle_lifecycle() {
        let factory = MockFactory::new();
        let mut handle = factory.create(4);
        assert_eq!(handle.id(), 4);
        handle.initialize().expect("initialize should succeed");
        assert_eq!(handle.info().capabilities.driver, "mock");

        handle.plug();
        handle.set_status(SlotStatus::Ready);
        assert_eq!(handle.status(), SlotStatus::Ready);
        drop(handle);

        assert_eq!(factory.created(4), 1);
        assert_eq!(factory.plugs(4), 1);
        assert_eq!(factory.dropped(4), 1);
    }

    #[test]
    fn test_mock_session_capture() {
        let factory = MockFactory::new();
        let handle = factory.create(0);
        let mut session = handle.connect().expect("connect should succeed");

        let frame1 = session.capture_frame().expect("capture should succeed");
        assert_eq!(frame1.metadata.sequence, 0);
        assert_eq!(frame1.data.len(), (64 * 48 * 2) as usize);

        let frame2 = session.capture_frame().expect("capture should succeed");
        assert_eq!(frame2.metadata.sequence, 1);
    }
}
