//! Application state and lifecycle management.
//!
//! [`MixerApp`] owns the engine and is driven from a single thread. Device
//! notifications arrive on the backend's monitoring thread and are handed
//! over through a channel that [`MixerApp::pump`] drains.

use crate::audio::{AudioBackend, AudioError, ControlIntent, ControlOutcome, DeviceEvent};
use crate::config::{ConfigError, MixerConfig};
use crate::mixer::{
    CancelToken, ChannelStore, Controller, EndpointCatalog, EndpointReport, MixerSnapshot,
    ReconcileSchedule, SessionMatcher, TickKind,
};
use crate::process::ProcessTable;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Upper bound on how long [`MixerApp::run_until_cancelled`] sleeps, so a
/// cancellation is noticed promptly.
const MAX_WAIT: Duration = Duration::from_millis(250);

/// Main application state.
///
/// Fields drop in declaration order: channel handles are released before the
/// catalog unregisters its notification callback and before the backend goes.
pub struct MixerApp {
    /// Channels of the selected endpoint
    store: ChannelStore,

    controller: Controller,

    catalog: EndpointCatalog,

    /// Name of the selected endpoint
    selected: Option<String>,

    schedule: ReconcileSchedule,

    config: MixerConfig,

    processes: Rc<dyn ProcessTable>,

    events_tx: Sender<DeviceEvent>,
    events_rx: Receiver<DeviceEvent>,

    /// Events received while waiting, not yet handled
    stash: VecDeque<DeviceEvent>,

    /// Last control failure, for UI display
    pub error_message: Option<String>,
}

impl MixerApp {
    /// Build the engine, subscribe to device changes and run the first match.
    ///
    /// Only an invalid `config` is rejected. Backend failures are logged and the
    /// engine starts with whatever could be discovered.
    pub fn new(
        backend: Rc<dyn AudioBackend>,
        processes: Rc<dyn ProcessTable>,
        config: MixerConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let (events_tx, events_rx) = mpsc::channel();
        let mut catalog = EndpointCatalog::new(backend);
        if let Err(e) = catalog.subscribe(events_tx.clone()) {
            warn!(error = %e, "Failed to register for device notifications");
        }

        let mut app = Self {
            store: ChannelStore::new(),
            controller: Controller::new(&config),
            catalog,
            selected: None,
            schedule: ReconcileSchedule::new(config.poll_interval(), config.full_rescan_every),
            config,
            processes,
            events_tx,
            events_rx,
            stash: VecDeque::new(),
            error_message: None,
        };

        app.force_rematch();
        app.schedule.start(Instant::now());
        Ok(app)
    }

    /// Re-enumerate endpoints and keep the selection valid.
    ///
    /// The previous selection survives if the endpoint still exists, otherwise
    /// the first endpoint is selected. An empty result changes nothing.
    fn refresh_endpoints(&mut self) {
        let count = match self.catalog.refresh() {
            Ok(endpoints) => endpoints.len(),
            Err(e) => {
                warn!(error = %e, "Failed to enumerate playback endpoints");
                return;
            }
        };
        if count == 0 {
            warn!("No active playback endpoints");
            return;
        }

        let still_present = self
            .selected
            .as_deref()
            .is_some_and(|name| self.catalog.get(name).is_some());
        if !still_present {
            self.selected = self
                .catalog
                .endpoints()
                .first()
                .map(|e| e.name().to_string());
            info!(endpoint = ?self.selected, "Selected playback endpoint");
        }
    }

    /// Rebuild the channel set of the selected endpoint.
    pub fn rematch(&mut self) {
        let Some(name) = self.selected.clone() else {
            debug!("No endpoint selected");
            return;
        };
        let Some(endpoint) = self.catalog.get(&name).cloned() else {
            warn!(endpoint = %name, "Selected endpoint is not active");
            return;
        };

        let refresh = self.catalog.capabilities().session_refresh;
        let matcher = SessionMatcher::new(&self.config, self.processes.as_ref());
        let channels = matcher.match_endpoint(endpoint.as_ref(), self.catalog.endpoints(), refresh);
        self.store.replace(&name, channels);

        if !self.store.has_applications() {
            info!(endpoint = %name, "No active audio sessions found");
        }
    }

    /// Refresh the endpoint catalog, then rebuild the channel set.
    pub fn force_rematch(&mut self) {
        self.refresh_endpoints();
        self.rematch();
    }

    /// Enumerate endpoints in every state for diagnostics, then re-match.
    pub fn force_detect(&mut self) -> Result<Vec<EndpointReport>, AudioError> {
        info!("Forcing audio session detection");
        let reports = self.catalog.refresh_all()?;
        self.force_rematch();
        Ok(reports)
    }

    /// Switch to another active endpoint.
    pub fn select_endpoint(&mut self, name: &str) -> Result<(), AudioError> {
        if self.catalog.get(name).is_none() {
            return Err(AudioError::EndpointNotFound {
                name: name.to_string(),
            });
        }
        info!(endpoint = name, "Endpoint selected");
        self.selected = Some(name.to_string());
        self.rematch();
        Ok(())
    }

    /// Apply a control intent from the presentation layer.
    pub fn apply(&mut self, intent: ControlIntent, now: Instant) -> Result<ControlOutcome, AudioError> {
        match intent {
            ControlIntent::SetVolume { channel, level } => {
                self.set_volume(&channel, f32::from(level) / 100.0)
            }
            ControlIntent::SetMute { channel, muted } => self.set_mute(&channel, muted, now),
            ControlIntent::Redirect { channel, endpoint } => {
                warn!(channel = %channel, endpoint = %endpoint, "Audio redirection requested");
                Err(AudioError::Unsupported("Redirecting audio to another endpoint"))
            }
        }
    }

    pub fn set_volume(&mut self, name: &str, level: f32) -> Result<ControlOutcome, AudioError> {
        self.with_retry(name, "set volume on", |app| {
            app.controller.set_volume(&mut app.store, name, level)
        })
    }

    pub fn set_mute(
        &mut self,
        name: &str,
        muted: bool,
        now: Instant,
    ) -> Result<ControlOutcome, AudioError> {
        let action = if muted { "mute" } else { "unmute" };
        self.with_retry(name, action, |app| {
            app.controller
                .set_mute(&mut app.store, &app.config, name, muted, now)
        })
    }

    /// Run a write; on a transient fault re-match once and try again.
    fn with_retry<F>(
        &mut self,
        name: &str,
        action: &'static str,
        mut op: F,
    ) -> Result<ControlOutcome, AudioError>
    where
        F: FnMut(&mut Self) -> Result<ControlOutcome, AudioError>,
    {
        let result = match op(self) {
            Err(e) if e.is_transient() => {
                warn!(channel = name, error = %e, "Write rejected, re-matching sessions");
                self.force_rematch();
                op(self)
            }
            other => other,
        };

        match result {
            Ok(outcome) => {
                self.error_message = None;
                Ok(outcome)
            }
            Err(e) => {
                let err = AudioError::MutationFailed {
                    channel: name.to_string(),
                    action,
                    source: Box::new(e),
                };
                warn!(error = %err, "Control failed");
                self.error_message = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Last observed state, without touching any handle.
    pub fn snapshot(&self) -> MixerSnapshot {
        self.store.snapshot(&self.catalog.names())
    }

    /// Re-read every handle, then return the snapshot.
    pub fn read_snapshot(&mut self) -> MixerSnapshot {
        let names = self.catalog.names();
        self.store.read(&names)
    }

    /// Log a device event. Returns whether it calls for a catalog refresh.
    fn handle_device_event(&self, event: &DeviceEvent) -> bool {
        match event {
            DeviceEvent::DeviceAdded { device_id } => info!(device_id = %device_id, "Device added"),
            DeviceEvent::DeviceRemoved { device_id } => {
                info!(device_id = %device_id, "Device removed")
            }
            DeviceEvent::DeviceStateChanged {
                device_id,
                new_state,
            } => info!(device_id = %device_id, state = %new_state, "Device state changed"),
            DeviceEvent::DefaultDeviceChanged { device_id } => {
                info!(device_id = ?device_id, "Default device changed")
            }
            DeviceEvent::PropertyChanged { device_id } => {
                debug!(device_id = %device_id, "Device property changed")
            }
        }
        event.triggers_refresh()
    }

    fn next_event(&mut self) -> Option<DeviceEvent> {
        if let Some(event) = self.stash.pop_front() {
            return Some(event);
        }
        match self.events_rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Handle queued device events; a burst causes a single refresh.
    fn drain_events(&mut self) {
        let mut refresh = false;
        while let Some(event) = self.next_event() {
            refresh |= self.handle_device_event(&event);
        }
        if refresh {
            self.force_rematch();
        }
    }

    /// Do all work that is due at `now`: device events, deferred mute
    /// re-assertions, and the reconciliation tick. Returns the tick that ran.
    pub fn pump(&mut self, now: Instant) -> Option<TickKind> {
        self.drain_events();
        self.controller.run_due(&mut self.store, now);

        let tick = self.schedule.poll(now)?;
        let started = Instant::now();
        match tick {
            TickKind::Refresh => {
                let failures = self.store.refresh();
                if failures > 0 {
                    debug!(failures, "Some channels could not be read");
                }
            }
            TickKind::Rescan => self.rematch(),
        }
        self.schedule.finish(now + started.elapsed());
        Some(tick)
    }

    /// Earliest instant at which [`pump`](Self::pump) has work to do.
    pub fn next_wakeup(&self) -> Option<Instant> {
        match (self.schedule.next_due(), self.controller.next_due()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Block until a device event arrives or `timeout` elapses. Returns
    /// whether an event arrived.
    pub fn wait_for_event(&mut self, timeout: Duration) -> bool {
        if !self.stash.is_empty() {
            return true;
        }
        match self.events_rx.recv_timeout(timeout) {
            Ok(event) => {
                self.stash.push_back(event);
                true
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Drive the engine until `token` is cancelled, reporting every snapshot
    /// that differs from the previous one.
    pub fn run_until_cancelled<F>(&mut self, token: &CancelToken, mut on_change: F)
    where
        F: FnMut(&MixerSnapshot),
    {
        let mut last = self.snapshot();
        on_change(&last);

        while !token.is_cancelled() {
            let now = Instant::now();
            let wait = self
                .next_wakeup()
                .map(|due| due.saturating_duration_since(now))
                .unwrap_or(MAX_WAIT)
                .min(MAX_WAIT);
            self.wait_for_event(wait);
            if token.is_cancelled() {
                break;
            }

            self.pump(Instant::now());
            let snapshot = self.snapshot();
            if snapshot != last {
                on_change(&snapshot);
                last = snapshot;
            }
        }

        self.shutdown();
    }

    /// Stop the schedule, drop pending work and unregister notifications.
    pub fn shutdown(&mut self) {
        self.schedule.cancel();
        self.controller.cancel_all();
        self.catalog.unsubscribe();
        info!("Mixer stopped");
    }

    /// Sender that feeds the device event queue.
    pub fn event_sender(&self) -> Sender<DeviceEvent> {
        self.events_tx.clone()
    }

    pub fn selected_endpoint(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn config(&self) -> &MixerConfig {
        &self.config
    }

    pub fn store(&self) -> &ChannelStore {
        &self.store
    }

    pub fn schedule(&self) -> &ReconcileSchedule {
        &self.schedule
    }

    pub fn is_mute_reassert_pending(&self, name: &str) -> bool {
        self.controller.is_pending(name)
    }
}
