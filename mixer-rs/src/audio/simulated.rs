//! In-memory audio subsystem.
//!
//! Implements the backend traits over shared in-process state so the mixer
//! can be driven without a sound card. Faults the real subsystem produces
//! (rejected writes, invalidated handles, sessions vanishing, volume being
//! reset behind our back) can be injected from the outside.

use super::backend::{
    AudioBackend, AudioEndpoint, AudioSession, BackendCapabilities, Subscription, VolumeControl,
};
use super::device::{AudioError, DeviceEvent, EndpointState, SessionState, StateFilter};
use crate::process::{ProcessInfo, ProcessTable};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::mpsc::Sender;

/// HRESULT returned by WASAPI when a device or session handle has gone away.
pub const AUDCLNT_E_DEVICE_INVALIDATED: i32 = 0x8889_0004_u32 as i32;

/// Key of a session inside a [`SimulatedBackend`].
pub type SessionKey = u64;

/// Description of a simulated session.
#[derive(Debug, Clone)]
pub struct SimulatedSession {
    pub identifier: String,
    pub process_id: u32,
    pub display_name: String,
    pub state: SessionState,
    pub volume: f32,
    pub muted: bool,
    /// Metadata reads (identifier, process id) fail for this session
    pub fail_reads: bool,
}

impl SimulatedSession {
    /// An active, unmuted session at full volume.
    pub fn new(identifier: impl Into<String>, process_id: u32) -> Self {
        Self {
            identifier: identifier.into(),
            process_id,
            display_name: String::new(),
            state: SessionState::Active,
            volume: 1.0,
            muted: false,
            fail_reads: false,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    pub fn failing_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }
}

struct SimEndpoint {
    id: String,
    name: String,
    state: EndpointState,
    volume: f32,
    muted: bool,
    sessions: Vec<(SessionKey, SimulatedSession)>,
}

#[derive(Default)]
struct SimState {
    endpoints: Vec<SimEndpoint>,
    generation: u64,
    next_key: SessionKey,
    write_failures: u32,
    subscribers: Vec<(u64, Sender<DeviceEvent>)>,
    next_subscriber: u64,
    session_refresh: bool,
    refresh_calls: usize,
    live_handles: usize,
}

impl SimState {
    fn session_mut(&mut self, key: SessionKey) -> Option<&mut SimulatedSession> {
        self.endpoints
            .iter_mut()
            .flat_map(|e| e.sessions.iter_mut())
            .find(|(k, _)| *k == key)
            .map(|(_, s)| s)
    }

    fn endpoint_mut(&mut self, id: &str) -> Option<&mut SimEndpoint> {
        self.endpoints.iter_mut().find(|e| e.id == id)
    }

    fn check_write(&mut self) -> Result<(), AudioError> {
        if self.write_failures > 0 {
            self.write_failures -= 1;
            return Err(AudioError::Platform {
                code: AUDCLNT_E_DEVICE_INVALIDATED,
                message: "The audio endpoint device has been unplugged or reconfigured"
                    .to_string(),
            });
        }
        Ok(())
    }
}

/// Simulated audio subsystem. Clones share the same state.
#[derive(Clone, Default)]
pub struct SimulatedBackend {
    state: Rc<RefCell<SimState>>,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an active endpoint; returns its device id.
    pub fn add_endpoint(&self, name: &str) -> String {
        self.add_endpoint_with_state(name, EndpointState::Active)
    }

    pub fn add_endpoint_with_state(&self, name: &str, state: EndpointState) -> String {
        let mut sim = self.state.borrow_mut();
        let id = format!("{{0.0.0.00000000}}.{{sim-{}}}", sim.endpoints.len());
        sim.endpoints.push(SimEndpoint {
            id: id.clone(),
            name: name.to_string(),
            state,
            volume: 1.0,
            muted: false,
            sessions: Vec::new(),
        });
        id
    }

    pub fn remove_endpoint(&self, name: &str) {
        self.state.borrow_mut().endpoints.retain(|e| e.name != name);
    }

    /// Attach a session to the named endpoint.
    ///
    /// # Panics
    /// Panics if no endpoint has that name.
    pub fn add_session(&self, endpoint: &str, session: SimulatedSession) -> SessionKey {
        let mut sim = self.state.borrow_mut();
        let key = sim.next_key;
        sim.next_key += 1;
        let endpoint = sim
            .endpoints
            .iter_mut()
            .find(|e| e.name == endpoint)
            .unwrap_or_else(|| panic!("unknown simulated endpoint {endpoint}"));
        endpoint.sessions.push((key, session));
        key
    }

    pub fn remove_session(&self, key: SessionKey) {
        for endpoint in &mut self.state.borrow_mut().endpoints {
            endpoint.sessions.retain(|(k, _)| *k != key);
        }
    }

    pub fn session_volume(&self, key: SessionKey) -> Option<f32> {
        self.state.borrow_mut().session_mut(key).map(|s| s.volume)
    }

    pub fn session_muted(&self, key: SessionKey) -> Option<bool> {
        self.state.borrow_mut().session_mut(key).map(|s| s.muted)
    }

    /// Change a session's volume as the subsystem or another application would.
    pub fn set_session_volume(&self, key: SessionKey, volume: f32) {
        if let Some(session) = self.state.borrow_mut().session_mut(key) {
            session.volume = volume;
        }
    }

    pub fn set_session_muted(&self, key: SessionKey, muted: bool) {
        if let Some(session) = self.state.borrow_mut().session_mut(key) {
            session.muted = muted;
        }
    }

    pub fn master_volume(&self, endpoint: &str) -> Option<f32> {
        let sim = self.state.borrow();
        sim.endpoints.iter().find(|e| e.name == endpoint).map(|e| e.volume)
    }

    pub fn master_muted(&self, endpoint: &str) -> Option<bool> {
        let sim = self.state.borrow();
        sim.endpoints.iter().find(|e| e.name == endpoint).map(|e| e.muted)
    }

    /// Reject the next `count` volume or mute writes with a platform fault.
    pub fn fail_next_writes(&self, count: u32) {
        self.state.borrow_mut().write_failures = count;
    }

    /// Invalidate every handle handed out so far.
    pub fn invalidate_handles(&self) {
        self.state.borrow_mut().generation += 1;
    }

    /// Deliver an event to every subscriber.
    pub fn emit(&self, event: DeviceEvent) {
        for (_, sender) in &self.state.borrow().subscribers {
            let _ = sender.send(event.clone());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.borrow().subscribers.len()
    }

    /// Advertise [`BackendCapabilities::session_refresh`].
    pub fn set_session_refresh(&self, supported: bool) {
        self.state.borrow_mut().session_refresh = supported;
    }

    pub fn refresh_calls(&self) -> usize {
        self.state.borrow().refresh_calls
    }

    /// Number of endpoint handles currently alive.
    pub fn live_endpoint_handles(&self) -> usize {
        self.state.borrow().live_handles
    }
}

impl AudioBackend for SimulatedBackend {
    fn endpoints(&self, filter: StateFilter) -> Result<Vec<Rc<dyn AudioEndpoint>>, AudioError> {
        let generation = self.state.borrow().generation;
        let selected: Vec<(String, String, EndpointState)> = self
            .state
            .borrow()
            .endpoints
            .iter()
            .filter(|e| filter == StateFilter::All || e.state.is_active())
            .map(|e| (e.id.clone(), e.name.clone(), e.state))
            .collect();

        Ok(selected
            .into_iter()
            .map(|(id, name, state)| {
                self.state.borrow_mut().live_handles += 1;
                Rc::new(SimEndpointHandle {
                    sim: Rc::clone(&self.state),
                    id,
                    name,
                    state,
                    generation,
                }) as Rc<dyn AudioEndpoint>
            })
            .collect())
    }

    fn subscribe(&self, sender: Sender<DeviceEvent>) -> Result<Box<dyn Subscription>, AudioError> {
        let mut sim = self.state.borrow_mut();
        let id = sim.next_subscriber;
        sim.next_subscriber += 1;
        sim.subscribers.push((id, sender));
        Ok(Box::new(SimSubscription {
            sim: Rc::clone(&self.state),
            id,
        }))
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            session_refresh: self.state.borrow().session_refresh,
        }
    }
}

struct SimSubscription {
    sim: Rc<RefCell<SimState>>,
    id: u64,
}

impl Subscription for SimSubscription {}

impl Drop for SimSubscription {
    fn drop(&mut self) {
        let id = self.id;
        self.sim.borrow_mut().subscribers.retain(|(s, _)| *s != id);
    }
}

struct SimEndpointHandle {
    sim: Rc<RefCell<SimState>>,
    id: String,
    name: String,
    state: EndpointState,
    generation: u64,
}

impl Drop for SimEndpointHandle {
    fn drop(&mut self) {
        self.sim.borrow_mut().live_handles -= 1;
    }
}

impl AudioEndpoint for SimEndpointHandle {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> EndpointState {
        self.state
    }

    fn master(&self) -> Result<Rc<dyn VolumeControl>, AudioError> {
        Ok(Rc::new(SimMaster {
            sim: Rc::clone(&self.sim),
            endpoint_id: self.id.clone(),
            generation: self.sim.borrow().generation,
        }))
    }

    fn sessions(&self) -> Result<Vec<Rc<dyn AudioSession>>, AudioError> {
        let sim = self.sim.borrow();
        if sim.generation != self.generation {
            return Err(AudioError::StaleHandle);
        }
        let endpoint = sim
            .endpoints
            .iter()
            .find(|e| e.id == self.id)
            .ok_or(AudioError::StaleHandle)?;
        Ok(endpoint
            .sessions
            .iter()
            .map(|(key, _)| {
                Rc::new(SimSessionHandle {
                    sim: Rc::clone(&self.sim),
                    key: *key,
                    generation: sim.generation,
                }) as Rc<dyn AudioSession>
            })
            .collect())
    }

    fn refresh_sessions(&self) -> Result<(), AudioError> {
        let mut sim = self.sim.borrow_mut();
        if !sim.session_refresh {
            return Err(AudioError::Unsupported("Session refresh"));
        }
        sim.refresh_calls += 1;
        Ok(())
    }
}

struct SimMaster {
    sim: Rc<RefCell<SimState>>,
    endpoint_id: String,
    generation: u64,
}

impl SimMaster {
    fn with_endpoint<T>(
        &self,
        write: bool,
        f: impl FnOnce(&mut SimEndpoint) -> T,
    ) -> Result<T, AudioError> {
        let mut sim = self.sim.borrow_mut();
        if sim.generation != self.generation {
            return Err(AudioError::StaleHandle);
        }
        if write {
            sim.check_write()?;
        }
        let endpoint = sim
            .endpoint_mut(&self.endpoint_id)
            .ok_or(AudioError::StaleHandle)?;
        Ok(f(endpoint))
    }
}

impl VolumeControl for SimMaster {
    fn volume(&self) -> Result<f32, AudioError> {
        self.with_endpoint(false, |e| e.volume)
    }

    fn set_volume(&self, level: f32) -> Result<(), AudioError> {
        self.with_endpoint(true, |e| e.volume = level.clamp(0.0, 1.0))
    }

    fn is_muted(&self) -> Result<bool, AudioError> {
        self.with_endpoint(false, |e| e.muted)
    }

    fn set_mute(&self, muted: bool) -> Result<(), AudioError> {
        self.with_endpoint(true, |e| e.muted = muted)
    }
}

struct SimSessionHandle {
    sim: Rc<RefCell<SimState>>,
    key: SessionKey,
    generation: u64,
}

impl SimSessionHandle {
    fn with_session<T>(
        &self,
        write: bool,
        f: impl FnOnce(&mut SimulatedSession) -> Result<T, AudioError>,
    ) -> Result<T, AudioError> {
        let mut sim = self.sim.borrow_mut();
        if sim.generation != self.generation {
            return Err(AudioError::StaleHandle);
        }
        if write {
            sim.check_write()?;
        }
        let session = sim.session_mut(self.key).ok_or(AudioError::StaleHandle)?;
        f(session)
    }

    fn read_metadata<T>(&self, f: impl FnOnce(&SimulatedSession) -> T) -> Result<T, AudioError> {
        self.with_session(false, |s| {
            if s.fail_reads {
                Err(AudioError::Platform {
                    code: AUDCLNT_E_DEVICE_INVALIDATED,
                    message: "Session metadata unavailable".to_string(),
                })
            } else {
                Ok(f(s))
            }
        })
    }
}

impl VolumeControl for SimSessionHandle {
    fn volume(&self) -> Result<f32, AudioError> {
        self.with_session(false, |s| Ok(s.volume))
    }

    fn set_volume(&self, level: f32) -> Result<(), AudioError> {
        self.with_session(true, |s| {
            s.volume = level.clamp(0.0, 1.0);
            Ok(())
        })
    }

    fn is_muted(&self) -> Result<bool, AudioError> {
        self.with_session(false, |s| Ok(s.muted))
    }

    fn set_mute(&self, muted: bool) -> Result<(), AudioError> {
        self.with_session(true, |s| {
            s.muted = muted;
            Ok(())
        })
    }
}

impl AudioSession for SimSessionHandle {
    fn identifier(&self) -> Result<String, AudioError> {
        self.read_metadata(|s| s.identifier.clone())
    }

    fn process_id(&self) -> Result<u32, AudioError> {
        self.read_metadata(|s| s.process_id)
    }

    fn display_name(&self) -> Result<String, AudioError> {
        self.read_metadata(|s| s.display_name.clone())
    }

    fn state(&self) -> Result<SessionState, AudioError> {
        self.with_session(false, |s| Ok(s.state))
    }

    fn as_volume_control(&self) -> &dyn VolumeControl {
        self
    }
}

/// Simulated process table.
#[derive(Clone, Default)]
pub struct SimulatedProcesses {
    processes: Rc<RefCell<Vec<ProcessInfo>>>,
}

impl SimulatedProcesses {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, pid: u32, name: &str, window_title: Option<&str>) {
        self.processes.borrow_mut().push(ProcessInfo {
            pid,
            name: name.to_string(),
            window_title: window_title.map(str::to_string),
        });
    }

    /// The process exits.
    pub fn remove(&self, pid: u32) {
        self.processes.borrow_mut().retain(|p| p.pid != pid);
    }
}

impl ProcessTable for SimulatedProcesses {
    fn list_processes(&self) -> Result<Vec<ProcessInfo>, AudioError> {
        Ok(self.processes.borrow().clone())
    }

    fn process_by_id(&self, pid: u32) -> Result<ProcessInfo, AudioError> {
        self.processes
            .borrow()
            .iter()
            .find(|p| p.pid == pid)
            .cloned()
            .ok_or_else(|| AudioError::ProcessUnavailable {
                pid,
                reason: "Process has exited".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalidated_handles_go_stale() {
        let sim = SimulatedBackend::new();
        sim.add_endpoint("Speakers");
        let key = sim.add_session("Speakers", SimulatedSession::new("app", 10));

        let endpoints = sim.endpoints(StateFilter::Active).unwrap();
        let sessions = endpoints[0].sessions().unwrap();
        sessions[0].set_volume(0.4).unwrap();
        assert_eq!(sim.session_volume(key), Some(0.4));

        sim.invalidate_handles();
        assert_eq!(sessions[0].set_volume(0.2), Err(AudioError::StaleHandle));
        assert_eq!(sim.session_volume(key), Some(0.4));
    }

    #[test]
    fn test_subscription_drop_unregisters() {
        let sim = SimulatedBackend::new();
        let (tx, _rx) = std::sync::mpsc::channel();
        let subscription = sim.subscribe(tx).unwrap();
        assert_eq!(sim.subscriber_count(), 1);
        drop(subscription);
        assert_eq!(sim.subscriber_count(), 0);
    }

    #[test]
    fn test_state_filter() {
        let sim = SimulatedBackend::new();
        sim.add_endpoint("Speakers");
        sim.add_endpoint_with_state("HDMI", EndpointState::Unplugged);

        assert_eq!(sim.endpoints(StateFilter::Active).unwrap().len(), 1);
        assert_eq!(sim.endpoints(StateFilter::All).unwrap().len(), 2);
        assert_eq!(sim.live_endpoint_handles(), 0);
    }
}
