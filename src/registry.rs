//! Camera registry and hotplug state machine.
//!
//! The registry owns a fixed table of slots, one per camera id. Every
//! mutation runs as a numbered *pass* under the pass lock; each pass first
//! reaps handles that were marked for removal by an earlier pass and are no
//! longer referenced by an open session, then applies its own event.
//! Notifications go out after the table lock is released, so a channel
//! callback can immediately query the registry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread;

use log::{debug, error, info, warn};

use crate::config::RegistryConfig;
use crate::error::{RegistryError, RegistryResult, Result};
use crate::hotplug::{HotplugDetector, HotplugSink, PresenceTracker};
use crate::traits::{
    CameraHandle, CameraId, CameraInfo, CameraSession, Format, Frame, HandleFactory,
    HotplugEvent, HotplugStatus, NotificationChannel, PresenceProbe, SlotStatus, MAX_CAMERA_NUM,
};

/// Outcome of applying one hotplug event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// New handle constructed, initialized and made ready.
    Attached,
    /// Retained handle revived from pending removal.
    Reattached,
    /// Ready handle marked for removal.
    Removed,
    /// Event matched the last reported status.
    Duplicate,
    /// Attach failed during construction or initialization.
    AttachFailed,
    /// Id outside the table.
    OutOfRange,
    /// Registry is not ready.
    Rejected,
}

enum SlotState {
    Absent,
    Initializing,
    Ready(Arc<dyn CameraHandle>),
    PendingRemoval {
        handle: Arc<dyn CameraHandle>,
        marked_in: u64,
    },
}

struct Slot {
    state: SlotState,
    // Last status reported by detection.
    hotplug: HotplugStatus,
    // Last status delivered to the notification channel.
    notified: HotplugStatus,
}

impl Default for Slot {
    fn default() -> Self {
        Self {
            state: SlotState::Absent,
            hotplug: HotplugStatus::NotPresent,
            notified: HotplugStatus::NotPresent,
        }
    }
}

impl Slot {
    const fn status(&self) -> SlotStatus {
        match self.state {
            SlotState::Absent => SlotStatus::Absent,
            SlotState::Initializing => SlotStatus::Initializing,
            SlotState::Ready(_) => SlotStatus::Ready,
            SlotState::PendingRemoval { .. } => SlotStatus::PendingRemoval,
        }
    }

    fn ready_handle(&self) -> Option<&Arc<dyn CameraHandle>> {
        match &self.state {
            SlotState::Ready(handle) => Some(handle),
            _ => None,
        }
    }
}

struct Table {
    slots: [Slot; MAX_CAMERA_NUM],
    occupied: usize,
    pass: u64,
}

impl Table {
    fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| Slot::default()),
            occupied: 0,
            pass: 0,
        }
    }

    fn slot(&self, id: CameraId) -> Option<&Slot> {
        self.slots.get(id as usize)
    }

    fn slot_mut(&mut self, id: CameraId) -> Option<&mut Slot> {
        self.slots.get_mut(id as usize)
    }

    /// Destroy handles marked in an earlier pass that no session still holds.
    fn reap(&mut self, skip: Option<CameraId>) -> usize {
        let pass = self.pass;
        let mut reaped = 0;

        for (index, slot) in self.slots.iter_mut().enumerate() {
            if skip.is_some_and(|id| id as usize == index) {
                continue;
            }
            let SlotState::PendingRemoval { handle, marked_in } = &slot.state else {
                continue;
            };
            if *marked_in >= pass {
                continue;
            }
            if Arc::strong_count(handle) > 1 {
                debug!("camera {index}: removal deferred, session still open");
                continue;
            }

            handle.set_status(SlotStatus::Absent);
            *slot = Slot::default();
            reaped += 1;
            info!("camera {index}: handle reclaimed");
        }

        reaped
    }

    fn count_active(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot.status(), SlotStatus::Initializing | SlotStatus::Ready))
            .count()
    }
}

/// What the in-table phase of a pass decided.
enum Step {
    Done(Transition, Option<HotplugStatus>),
    Attach,
}

struct Shared {
    config: RegistryConfig,
    factory: Arc<dyn HandleFactory>,
    probe: Arc<dyn PresenceProbe>,
    table: Mutex<Table>,
    passes: Mutex<()>,
    channel: RwLock<Option<Arc<dyn NotificationChannel>>>,
    ready: AtomicBool,
}

impl Shared {
    fn lock_table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_passes(&self) -> MutexGuard<'_, ()> {
        self.passes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn notify(&self, id: CameraId, status: HotplugStatus) {
        let channel = self
            .channel
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match channel {
            Some(channel) => {
                debug!("camera {id}: notifying {status:?}");
                channel.on_status_changed(id, status);
            }
            None => debug!("camera {id}: no notification channel for {status:?}"),
        }
    }

    /// Construct and initialize a handle for `id` into an absent slot.
    fn attach(&self, table: &mut Table, id: CameraId) -> Transition {
        let Some(slot) = table.slot_mut(id) else {
            return Transition::OutOfRange;
        };
        if !matches!(slot.state, SlotState::Absent) {
            return Transition::Duplicate;
        }

        slot.state = SlotState::Initializing;
        let mut handle = self.factory.create(id);
        handle.set_status(SlotStatus::Initializing);

        if let Err(err) = handle.initialize() {
            error!("camera {id}: unable to initialize: {err}");
            slot.state = SlotState::Absent;
            return Transition::AttachFailed;
        }

        let handle: Arc<dyn CameraHandle> = Arc::from(handle);
        handle.set_status(SlotStatus::Ready);
        handle.plug();
        slot.state = SlotState::Ready(handle);
        slot.hotplug = HotplugStatus::Present;
        table.occupied += 1;

        Transition::Attached
    }

    /// Bounded wait for the backing device to show up after an attach event.
    fn wait_for_device(&self, id: CameraId) {
        let config = &self.config;
        thread::sleep(config.attach_settle);

        for attempt in 0..=config.attach_retries {
            match self.probe.is_present(id) {
                Ok(true) => {
                    debug!("camera {id}: device present");
                    return;
                }
                Ok(false) => debug!("camera {id}: device not present yet, attempt {attempt}"),
                Err(err) => debug!("camera {id}: presence check failed, attempt {attempt}: {err}"),
            }
            if attempt < config.attach_retries {
                thread::sleep(config.attach_retry_delay);
            }
        }

        warn!("camera {id}: device did not appear, initializing anyway");
    }

    /// In-table part of a pass. Runs with the table locked.
    fn transition(&self, table: &mut Table, event: HotplugEvent) -> Step {
        let notify_removal = self.config.notify_removal;
        let HotplugEvent { id, status } = event;
        let pass = table.pass;

        let Some(slot) = table.slot_mut(id) else {
            return Step::Done(Transition::OutOfRange, None);
        };

        if matches!(slot.state, SlotState::Absent) {
            return match status {
                HotplugStatus::Present => Step::Attach,
                HotplugStatus::NotPresent => Step::Done(Transition::Duplicate, None),
            };
        }

        if slot.hotplug == status {
            return Step::Done(Transition::Duplicate, None);
        }

        let state = std::mem::replace(&mut slot.state, SlotState::Absent);
        match (state, status) {
            (SlotState::Ready(handle), HotplugStatus::NotPresent) => {
                handle.unplug();
                handle.set_status(SlotStatus::PendingRemoval);
                slot.state = SlotState::PendingRemoval {
                    handle,
                    marked_in: pass,
                };
                slot.hotplug = HotplugStatus::NotPresent;
                let notify = (notify_removal && slot.notified != HotplugStatus::NotPresent)
                    .then(|| {
                        slot.notified = HotplugStatus::NotPresent;
                        HotplugStatus::NotPresent
                    });
                table.occupied -= 1;
                Step::Done(Transition::Removed, notify)
            }
            (SlotState::PendingRemoval { handle, .. }, HotplugStatus::Present) => {
                handle.set_status(SlotStatus::Ready);
                handle.plug();
                slot.state = SlotState::Ready(handle);
                slot.hotplug = HotplugStatus::Present;
                let notify = (slot.notified != HotplugStatus::Present).then(|| {
                    slot.notified = HotplugStatus::Present;
                    HotplugStatus::Present
                });
                table.occupied += 1;
                Step::Done(Transition::Reattached, notify)
            }
            (state, _) => {
                // Ready+Present and Pending+NotPresent are caught by the
                // duplicate check; Initializing is never visible between passes.
                slot.state = state;
                Step::Done(Transition::Duplicate, None)
            }
        }
    }

    fn reclaim(&self) -> usize {
        let _pass = self.lock_passes();
        let mut table = self.lock_table();
        table.pass += 1;
        table.reap(None)
    }

    /// Destroy every handle and empty the table.
    fn release_all(&self) {
        let mut table = self.lock_table();
        debug_assert_eq!(table.occupied, table.count_active());
        for (index, slot) in table.slots.iter_mut().enumerate() {
            if let SlotState::Ready(handle) | SlotState::PendingRemoval { handle, .. } =
                &slot.state
            {
                handle.set_status(SlotStatus::Absent);
                debug!("camera {index}: destroyed");
            }
            *slot = Slot::default();
        }
        table.occupied = 0;
    }

    fn on_status_changed(&self, event: HotplugEvent) -> Transition {
        let HotplugEvent { id, status } = event;
        let _pass = self.lock_passes();

        if !self.is_ready() {
            warn!("camera {id}: dropping {status:?}, registry not ready");
            return Transition::Rejected;
        }

        let step = {
            let mut table = self.lock_table();
            table.pass += 1;
            table.reap(Some(id));
            self.transition(&mut table, event)
        };

        let (transition, notify) = match step {
            Step::Done(transition, notify) => (transition, notify),
            Step::Attach => {
                self.wait_for_device(id);
                let mut table = self.lock_table();
                let transition = self.attach(&mut table, id);
                let mut notify = None;
                if transition == Transition::Attached {
                    if let Some(slot) = table.slot_mut(id) {
                        slot.notified = HotplugStatus::Present;
                        notify = Some(HotplugStatus::Present);
                    }
                }
                (transition, notify)
            }
        };

        match transition {
            Transition::Duplicate => debug!("camera {id}: ignoring transition to the same status"),
            Transition::OutOfRange => warn!("camera {id}: hotplug event for id out of range"),
            other => info!("camera {id}: {status:?} -> {other:?}"),
        }

        if let Some(status) = notify {
            self.notify(id, status);
        }

        transition
    }
}

/// Feeds detector output into the registry.
struct DetectorSink {
    shared: Arc<Shared>,
}

impl HotplugSink for DetectorSink {
    fn on_event(&mut self, event: HotplugEvent) {
        self.shared.on_status_changed(event);
    }

    fn on_idle(&mut self) {
        self.shared.reclaim();
    }
}

/// An open camera. Keeps the handle alive until dropped.
pub struct DeviceSession {
    id: CameraId,
    session: Box<dyn CameraSession>,
    // Held so the registry cannot reclaim the handle under an open session.
    handle: Arc<dyn CameraHandle>,
}

impl DeviceSession {
    /// Camera this session belongs to.
    pub const fn id(&self) -> CameraId {
        self.id
    }

    /// Descriptor of the underlying camera.
    pub fn info(&self) -> CameraInfo {
        self.handle.info()
    }

    /// Get current format.
    pub fn format(&self) -> Result<Format> {
        self.session.format()
    }

    /// Set capture format. Returns the actual format set by the driver.
    pub fn set_format(&mut self, format: &Format) -> Result<Format> {
        self.session.set_format(format)
    }

    /// Capture a single frame.
    pub fn capture_frame(&mut self) -> Result<Frame> {
        self.session.capture_frame()
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Owns the camera table and the hotplug detector.
pub struct Registry {
    shared: Arc<Shared>,
    detector: Mutex<Option<HotplugDetector>>,
}

impl Registry {
    /// Scan for present cameras and start hotplug detection.
    ///
    /// Construction never fails outright: an invalid configuration or a
    /// detector that cannot be started leaves the registry answering
    /// `NotReady` to every call.
    pub fn new(
        config: RegistryConfig,
        factory: Arc<dyn HandleFactory>,
        probe: Arc<dyn PresenceProbe>,
    ) -> Self {
        Self::start(config, factory, probe, Self::spawn_detector)
    }

    fn start<S>(
        config: RegistryConfig,
        factory: Arc<dyn HandleFactory>,
        probe: Arc<dyn PresenceProbe>,
        spawn: S,
    ) -> Self
    where
        S: FnOnce(&Self, &[CameraId]) -> std::io::Result<HotplugDetector>,
    {
        let valid = config.validate();
        let shared = Arc::new(Shared {
            config,
            factory,
            probe,
            table: Mutex::new(Table::new()),
            passes: Mutex::new(()),
            channel: RwLock::new(None),
            ready: AtomicBool::new(false),
        });
        let registry = Self {
            shared,
            detector: Mutex::new(None),
        };

        if let Err(err) = valid {
            error!("camera registry failed to initialize: {err}");
            return registry;
        }

        let present = registry.initial_scan();

        if registry.shared.config.detect_hotplug {
            match spawn(&registry, &present) {
                Ok(detector) => {
                    *registry
                        .detector
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner) = Some(detector);
                }
                Err(err) => {
                    error!("camera registry failed to start hotplug detection: {err}");
                    registry.shared.release_all();
                    return registry;
                }
            }
        }

        registry.shared.ready.store(true, Ordering::Release);
        info!("{} cameras are being created", registry.get_camera_count());
        registry
    }

    fn initial_scan(&self) -> Vec<CameraId> {
        let shared = &self.shared;
        let mut table = shared.lock_table();
        let mut present = Vec::new();

        for &id in &shared.config.candidates {
            match shared.probe.is_present(id) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    warn!("camera {id}: presence check failed during scan: {err}");
                    continue;
                }
            }

            if shared.attach(&mut table, id) == Transition::Attached {
                // The framework learns about initial cameras by enumerating.
                if let Some(slot) = table.slot_mut(id) {
                    slot.notified = HotplugStatus::Present;
                }
                present.push(id);
            }
        }

        present
    }

    fn spawn_detector(&self, present: &[CameraId]) -> std::io::Result<HotplugDetector> {
        let config = &self.shared.config;
        let tracker = PresenceTracker::new(&config.candidates, present);
        let sink = DetectorSink {
            shared: Arc::clone(&self.shared),
        };

        HotplugDetector::spawn(tracker, Arc::clone(&self.shared.probe), config.poll_interval, sink)
    }

    /// Whether initialization succeeded and the registry is not shut down.
    pub fn is_ready(&self) -> bool {
        self.shared.is_ready()
    }

    /// Number of cameras currently attached.
    pub fn get_camera_count(&self) -> usize {
        self.shared.lock_table().occupied
    }

    /// Descriptor of a ready camera.
    pub fn get_camera_info(&self, id: CameraId) -> RegistryResult<CameraInfo> {
        if !self.is_ready() {
            error!("get_camera_info: camera registry has failed to initialize");
            return Err(RegistryError::NotReady);
        }

        let table = self.shared.lock_table();
        table
            .slot(id)
            .and_then(Slot::ready_handle)
            .map(|handle| handle.info())
            .ok_or_else(|| {
                debug!("camera {id}: get_camera_info out of range ({})", table.occupied);
                RegistryError::OutOfRange(i64::from(id))
            })
    }

    /// Open a session on a ready camera.
    pub fn open_camera(&self, id: CameraId) -> RegistryResult<DeviceSession> {
        if !self.is_ready() {
            error!("open_camera: camera registry has failed to initialize");
            return Err(RegistryError::NotReady);
        }

        let handle = {
            let table = self.shared.lock_table();
            table
                .slot(id)
                .and_then(Slot::ready_handle)
                .map(Arc::clone)
                .ok_or_else(|| {
                    debug!("camera {id}: open out of range ({})", table.occupied);
                    RegistryError::OutOfRange(i64::from(id))
                })?
        };

        let session = handle.connect()?;
        debug!("camera {id}: opened");
        Ok(DeviceSession {
            id,
            session,
            handle,
        })
    }

    /// Lifecycle state of a slot; `None` for ids outside the table.
    pub fn slot_status(&self, id: CameraId) -> Option<SlotStatus> {
        self.shared.lock_table().slot(id).map(Slot::status)
    }

    /// Install the notification channel, replacing any previous one.
    pub fn set_notification_channel<C>(&self, channel: C)
    where
        C: NotificationChannel + 'static,
    {
        *self
            .shared
            .channel
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(channel));
    }

    /// Remove the notification channel.
    pub fn clear_notification_channel(&self) {
        *self
            .shared
            .channel
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Apply a presence change for `id`.
    ///
    /// The detector thread calls this for every change it observes;
    /// platforms with an event-driven hotplug signal may call it directly.
    pub fn on_status_changed(&self, id: CameraId, status: HotplugStatus) -> Transition {
        self.shared.on_status_changed(HotplugEvent { id, status })
    }

    /// Run a reclamation pass. Returns the number of handles destroyed.
    ///
    /// The detector runs one after every poll cycle that saw no change.
    /// Without a detector, handles marked for removal are only reclaimed by
    /// later events for other ids or by calling this.
    pub fn reclaim(&self) -> usize {
        self.shared.reclaim()
    }

    /// Stop detection and destroy every handle. Later calls get `NotReady`.
    pub fn shutdown(&self) {
        let detector = self
            .detector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut detector) = detector {
            detector.join();
        }

        let _pass = self.shared.lock_passes();
        if !self.shared.ready.swap(false, Ordering::AcqRel) {
            return;
        }

        self.shared.release_all();
        info!("camera registry shut down");
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
impl Registry {
    fn occupied_matches_slots(&self) -> bool {
        let table = self.shared.lock_table();
        table.occupied == table.count_active()
    }
}
