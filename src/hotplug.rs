//! Background hotplug detection.
//!
//! A single worker thread polls a [`PresenceProbe`] for a fixed set of
//! candidate ids and hands one [`HotplugEvent`] per observed change to a
//! [`HotplugSink`]. Events for one id are delivered in order because only
//! the worker ever delivers them.

use std::collections::BTreeMap;
use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

use crate::traits::{CameraId, HotplugEvent, HotplugStatus, PresenceProbe};

/// Receiver of detector output. Runs on the detector thread.
pub trait HotplugSink {
    /// A candidate changed presence.
    fn on_event(&mut self, event: HotplugEvent);

    /// A poll cycle finished without any change.
    fn on_idle(&mut self) {}
}

impl<F> HotplugSink for F
where
    F: FnMut(HotplugEvent),
{
    fn on_event(&mut self, event: HotplugEvent) {
        self(event);
    }
}

/// Last known presence per candidate id; turns observations into events.
#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
    known: BTreeMap<CameraId, HotplugStatus>,
}

impl PresenceTracker {
    /// Track `candidates`; ids in `present` start out Present.
    pub fn new(candidates: &[CameraId], present: &[CameraId]) -> Self {
        let known = candidates
            .iter()
            .map(|&id| {
                let status = if present.contains(&id) {
                    HotplugStatus::Present
                } else {
                    HotplugStatus::NotPresent
                };
                (id, status)
            })
            .collect();
        Self { known }
    }

    /// Candidate ids in ascending order.
    pub fn candidates(&self) -> Vec<CameraId> {
        self.known.keys().copied().collect()
    }

    /// Last known state of `id`.
    pub fn status(&self, id: CameraId) -> Option<HotplugStatus> {
        self.known.get(&id).copied()
    }

    /// Record an observation. Returns an event when it differs from the last one.
    pub fn observe(&mut self, id: CameraId, present: bool) -> Option<HotplugEvent> {
        let status = if present {
            HotplugStatus::Present
        } else {
            HotplugStatus::NotPresent
        };
        let known = self.known.get_mut(&id)?;
        if *known == status {
            return None;
        }
        *known = status;
        Some(HotplugEvent { id, status })
    }

    /// Probe every candidate once, calling `sink` for each change.
    /// Returns the number of changes delivered.
    ///
    /// Probe failures leave the last known state untouched so the id is
    /// checked again next cycle.
    pub fn poll<F>(&mut self, probe: &dyn PresenceProbe, sink: &mut F) -> usize
    where
        F: FnMut(HotplugEvent),
    {
        let mut delivered = 0;
        for id in self.candidates() {
            match probe.is_present(id) {
                Ok(present) => {
                    if let Some(event) = self.observe(id, present) {
                        debug!("camera {id}: detected {:?}", event.status);
                        sink(event);
                        delivered += 1;
                    }
                }
                Err(err) => warn!("camera {id}: presence check failed, retrying: {err}"),
            }
        }
        delivered
    }
}

/// Handle to the running detector thread.
pub struct HotplugDetector {
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl HotplugDetector {
    /// Start polling `probe` every `interval`, delivering changes to `sink`.
    pub fn spawn<S>(
        tracker: PresenceTracker,
        probe: Arc<dyn PresenceProbe>,
        interval: Duration,
        sink: S,
    ) -> io::Result<Self>
    where
        S: HotplugSink + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("camera-hotplug".to_owned())
            .spawn(move || detector_main(tracker, probe.as_ref(), interval, &stop_rx, sink))?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Ask the worker to exit. Wakes it if it is sleeping between polls.
    pub fn request_stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            // The worker may already be gone; dropping the sender is enough.
            stop_tx.send(()).ok();
        }
    }

    /// Stop the worker and wait for it to finish.
    pub fn join(&mut self) {
        self.request_stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("hotplug detector thread panicked");
            }
        }
    }

    /// Whether the worker thread is still running.
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for HotplugDetector {
    fn drop(&mut self) {
        self.join();
    }
}

fn detector_main<S>(
    mut tracker: PresenceTracker,
    probe: &dyn PresenceProbe,
    interval: Duration,
    stop_rx: &mpsc::Receiver<()>,
    mut sink: S,
) where
    S: HotplugSink,
{
    info!(
        "hotplug detector watching cameras {:?} every {interval:?}",
        tracker.candidates()
    );

    loop {
        match stop_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {
                if tracker.poll(probe, &mut |event| sink.on_event(event)) == 0 {
                    sink.on_idle();
                }
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!("hotplug detector stopped");
}
