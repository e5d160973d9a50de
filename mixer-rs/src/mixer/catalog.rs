//! Endpoint catalog.
//!
//! Holds the active playback endpoints keyed by friendly name and owns the
//! device-change subscription.

use crate::audio::{
    AudioBackend, AudioEndpoint, AudioError, BackendCapabilities, DeviceEvent, EndpointState,
    SessionState, StateFilter, Subscription,
};
use std::rc::Rc;
use std::sync::mpsc::Sender;
use tracing::{debug, info, warn};

/// Diagnostic view of one session, produced by [`EndpointCatalog::refresh_all`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub identifier: Option<String>,
    pub process_id: Option<u32>,
    pub state: Option<SessionState>,
}

/// Diagnostic view of one endpoint in any state.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointReport {
    pub name: String,
    pub state: EndpointState,
    /// Sessions, for active endpoints
    pub sessions: Vec<SessionReport>,
    /// Session enumeration failure, if any
    pub error: Option<String>,
}

pub struct EndpointCatalog {
    endpoints: Vec<Rc<dyn AudioEndpoint>>,
    subscription: Option<Box<dyn Subscription>>,
    backend: Rc<dyn AudioBackend>,
}

impl EndpointCatalog {
    pub fn new(backend: Rc<dyn AudioBackend>) -> Self {
        Self {
            endpoints: Vec::new(),
            subscription: None,
            backend,
        }
    }

    /// Register for device-change notifications, replacing any earlier registration.
    pub fn subscribe(&mut self, sender: Sender<DeviceEvent>) -> Result<(), AudioError> {
        self.subscription = None;
        self.subscription = Some(self.backend.subscribe(sender)?);
        Ok(())
    }

    pub fn unsubscribe(&mut self) {
        self.subscription = None;
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// Re-enumerate active endpoints.
    ///
    /// Endpoints are keyed by name; when two share a name the later one
    /// replaces the earlier in place. On failure the previous catalog is kept.
    pub fn refresh(&mut self) -> Result<&[Rc<dyn AudioEndpoint>], AudioError> {
        let enumerated = self.backend.endpoints(StateFilter::Active)?;

        let mut endpoints: Vec<Rc<dyn AudioEndpoint>> = Vec::with_capacity(enumerated.len());
        for endpoint in enumerated {
            match endpoints.iter_mut().find(|e| e.name() == endpoint.name()) {
                Some(existing) => {
                    debug!(name = endpoint.name(), "Duplicate endpoint name, keeping latest");
                    *existing = endpoint;
                }
                None => endpoints.push(endpoint),
            }
        }

        debug!(count = endpoints.len(), "Enumerated playback endpoints");
        self.endpoints = endpoints;
        Ok(&self.endpoints)
    }

    /// Enumerate endpoints in every state and describe their sessions.
    ///
    /// Every handle acquired here is released before returning.
    pub fn refresh_all(&self) -> Result<Vec<EndpointReport>, AudioError> {
        let endpoints = self.backend.endpoints(StateFilter::All)?;
        let mut reports = Vec::with_capacity(endpoints.len());

        for endpoint in endpoints {
            info!(device = endpoint.name(), state = %endpoint.state(), "Device");
            let mut report = EndpointReport {
                name: endpoint.name().to_string(),
                state: endpoint.state(),
                sessions: Vec::new(),
                error: None,
            };

            if endpoint.state().is_active() {
                match endpoint.sessions() {
                    Ok(sessions) => {
                        info!(count = sessions.len(), "  Sessions found");
                        for (i, session) in sessions.iter().enumerate() {
                            let session_report = SessionReport {
                                identifier: session.identifier().ok(),
                                process_id: session.process_id().ok(),
                                state: session.state().ok(),
                            };
                            info!(
                                index = i,
                                id = session_report.identifier.as_deref().unwrap_or("?"),
                                pid = ?session_report.process_id,
                                state = ?session_report.state,
                                "  Session"
                            );
                            report.sessions.push(session_report);
                        }
                    }
                    Err(e) => {
                        warn!(device = endpoint.name(), error = %e, "Failed to inspect device");
                        report.error = Some(e.to_string());
                    }
                }
            }

            reports.push(report);
        }

        Ok(reports)
    }

    pub fn get(&self, name: &str) -> Option<&Rc<dyn AudioEndpoint>> {
        self.endpoints.iter().find(|e| e.name() == name)
    }

    pub fn endpoints(&self) -> &[Rc<dyn AudioEndpoint>] {
        &self.endpoints
    }

    pub fn names(&self) -> Vec<String> {
        self.endpoints.iter().map(|e| e.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn capabilities(&self) -> BackendCapabilities {
        self.backend.capabilities()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::simulated::{SimulatedBackend, SimulatedSession};

    #[test]
    fn test_refresh_keys_by_name_last_wins() {
        let sim = SimulatedBackend::new();
        let first = sim.add_endpoint("Speakers");
        sim.add_endpoint("Headphones");
        let second = sim.add_endpoint("Speakers");

        let mut catalog = EndpointCatalog::new(Rc::new(sim.clone()));
        catalog.refresh().unwrap();

        assert_eq!(catalog.names(), vec!["Speakers", "Headphones"]);
        let speakers = catalog.get("Speakers").unwrap();
        assert_eq!(speakers.id(), second);
        assert_ne!(speakers.id(), first);
    }

    #[test]
    fn test_refresh_all_releases_handles() {
        let sim = SimulatedBackend::new();
        sim.add_endpoint("Speakers");
        sim.add_endpoint_with_state("HDMI", EndpointState::Disabled);
        sim.add_session("Speakers", SimulatedSession::new("a", 1));
        sim.add_session("Speakers", SimulatedSession::new("b", 2).failing_reads());

        let catalog = EndpointCatalog::new(Rc::new(sim.clone()));
        let reports = catalog.refresh_all().unwrap();

        assert_eq!(sim.live_endpoint_handles(), 0);
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].sessions.len(), 2);
        assert_eq!(reports[0].sessions[0].process_id, Some(1));
        assert_eq!(reports[0].sessions[1].identifier, None);
        assert_eq!(reports[1].state, EndpointState::Disabled);
        assert!(reports[1].sessions.is_empty());
    }

    #[test]
    fn test_subscription_released_on_drop() {
        let sim = SimulatedBackend::new();
        let (tx, _rx) = std::sync::mpsc::channel();
        let mut catalog = EndpointCatalog::new(Rc::new(sim.clone()));

        catalog.subscribe(tx.clone()).unwrap();
        catalog.subscribe(tx).unwrap();
        assert_eq!(sim.subscriber_count(), 1);

        drop(catalog);
        assert_eq!(sim.subscriber_count(), 0);
    }
}
