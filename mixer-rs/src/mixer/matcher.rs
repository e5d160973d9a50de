//! Session matcher.
//!
//! Turns the sessions reported for an endpoint into the list of logical
//! channels shown to the user. The platform does not report every session on
//! the first pass, so two secondary lookups cross-reference the process table:
//! a targeted re-scan for applications listed in [`MixerConfig::rescan_hints`]
//! and a sweep over browser processes. Both search the sessions of every
//! active endpoint, not only the selected one.

use crate::audio::{AudioEndpoint, AudioError, AudioSession, LogicalChannel};
use crate::config::MixerConfig;
use crate::process::{ProcessInfo, ProcessTable};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use tracing::{debug, info, warn};

const UNKNOWN_APPLICATION: &str = "Unknown Application";

/// A session that made it through the exclusion filter.
struct Candidate {
    name: String,
    process_id: u32,
    process_name: Option<String>,
    session: Rc<dyn AudioSession>,
}

/// Process id to session lookup over every active endpoint.
///
/// Built on first use and reused for the rest of the pass.
struct SessionIndex<'e> {
    endpoints: &'e [Rc<dyn AudioEndpoint>],
    sessions: Option<Vec<(u32, Rc<dyn AudioSession>)>>,
}

impl<'e> SessionIndex<'e> {
    fn new(endpoints: &'e [Rc<dyn AudioEndpoint>]) -> Self {
        Self {
            endpoints,
            sessions: None,
        }
    }

    fn find(&mut self, pid: u32) -> Option<Rc<dyn AudioSession>> {
        let endpoints = self.endpoints;
        let sessions = self.sessions.get_or_insert_with(|| {
            let mut index = Vec::new();
            for endpoint in endpoints {
                let sessions = match endpoint.sessions() {
                    Ok(sessions) => sessions,
                    Err(e) => {
                        warn!(device = endpoint.name(), error = %e, "Failed to list sessions");
                        continue;
                    }
                };
                for session in sessions {
                    match session.process_id() {
                        Ok(pid) => index.push((pid, session)),
                        Err(e) => debug!(device = endpoint.name(), error = %e, "Skipping session"),
                    }
                }
            }
            index
        });

        sessions
            .iter()
            .find(|(p, _)| *p == pid)
            .map(|(_, session)| Rc::clone(session))
    }
}

pub struct SessionMatcher<'a> {
    config: &'a MixerConfig,
    processes: &'a dyn ProcessTable,
}

impl<'a> SessionMatcher<'a> {
    pub fn new(config: &'a MixerConfig, processes: &'a dyn ProcessTable) -> Self {
        Self { config, processes }
    }

    /// Build the channel list for `selected`.
    ///
    /// The master channel is always first. Application channels are unique by
    /// name: a later session resolving to an existing name replaces the
    /// earlier one in place. `all` is the full set of active endpoints used by
    /// the secondary lookups. When `refresh_sessions` is set the endpoint is
    /// asked to re-read its session list before enumeration.
    pub fn match_endpoint(
        &self,
        selected: &dyn AudioEndpoint,
        all: &[Rc<dyn AudioEndpoint>],
        refresh_sessions: bool,
    ) -> Vec<LogicalChannel> {
        let master = match selected.master() {
            Ok(control) => Some(control),
            Err(e) => {
                warn!(device = selected.name(), error = %e, "Master volume unavailable");
                None
            }
        };
        let mut channels = vec![LogicalChannel::master(
            self.config.master_channel_name.as_str(),
            master,
        )];

        if refresh_sessions {
            if let Err(e) = selected.refresh_sessions() {
                debug!(device = selected.name(), error = %e, "Session refresh failed");
            }
        }

        let processes = match self.processes.list_processes() {
            Ok(processes) => processes,
            Err(e) => {
                warn!(error = %e, "Failed to list processes, skipping secondary lookups");
                Vec::new()
            }
        };
        let known: HashMap<u32, &ProcessInfo> = processes.iter().map(|p| (p.pid, p)).collect();

        let mut candidates = self.direct_sessions(selected, &known);
        let mut index = SessionIndex::new(all);
        self.targeted_rescan(&processes, &mut candidates, &mut index);
        self.browser_sweep(&processes, &mut candidates, &mut index);

        for candidate in candidates {
            if candidate.name == self.config.master_channel_name {
                debug!(name = %candidate.name, "Session name collides with master channel");
                continue;
            }

            let channel = LogicalChannel::application(
                candidate.name,
                candidate.process_id,
                candidate.process_name,
                candidate.session,
            );
            match channels
                .iter_mut()
                .skip(1)
                .find(|c| c.name == channel.name)
            {
                Some(existing) => *existing = channel,
                None => channels.push(channel),
            }
        }

        debug!(
            device = selected.name(),
            channels = channels.len(),
            "Session match complete"
        );
        channels
    }

    fn direct_sessions(
        &self,
        endpoint: &dyn AudioEndpoint,
        known: &HashMap<u32, &ProcessInfo>,
    ) -> Vec<Candidate> {
        let sessions = match endpoint.sessions() {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(device = endpoint.name(), error = %e, "Failed to enumerate sessions");
                return Vec::new();
            }
        };
        info!(
            device = endpoint.name(),
            count = sessions.len(),
            "Found audio sessions"
        );

        let mut candidates = Vec::with_capacity(sessions.len());
        for (i, session) in sessions.into_iter().enumerate() {
            match self.inspect_session(i, session, known) {
                Ok(Some(candidate)) => candidates.push(candidate),
                Ok(None) => {}
                Err(e) => warn!(index = i, error = %e, "Error processing session"),
            }
        }
        candidates
    }

    fn inspect_session(
        &self,
        index: usize,
        session: Rc<dyn AudioSession>,
        known: &HashMap<u32, &ProcessInfo>,
    ) -> Result<Option<Candidate>, AudioError> {
        let identifier = session.identifier()?;
        let process_id = session.process_id()?;
        debug!(index, id = %identifier, pid = process_id, "Session");

        if self.config.is_excluded(&identifier) {
            debug!(id = %identifier, "Excluding system session");
            return Ok(None);
        }

        let process = self.resolve_process(process_id, known);
        let name = self.session_name(session.as_ref(), &identifier, process.as_ref());

        Ok(Some(Candidate {
            name,
            process_id,
            process_name: process.map(|p| p.name),
            session,
        }))
    }

    /// Look `pid` up in the pass's process listing, asking the table directly
    /// only for processes started after the listing was taken.
    fn resolve_process(&self, pid: u32, known: &HashMap<u32, &ProcessInfo>) -> Option<ProcessInfo> {
        if pid == 0 {
            return None;
        }
        if let Some(process) = known.get(&pid) {
            return Some((*process).clone());
        }
        match self.processes.process_by_id(pid) {
            Ok(process) => Some(process),
            Err(e) => {
                debug!(pid, error = %e, "Error getting process info");
                None
            }
        }
    }

    /// Resolve a channel name, first non-empty rule wins: the session's own
    /// display name, the owning process, the identifier's last path component.
    fn session_name(
        &self,
        session: &dyn AudioSession,
        identifier: &str,
        process: Option<&ProcessInfo>,
    ) -> String {
        match session.display_name() {
            Ok(name) if !name.trim().is_empty() => return name,
            Ok(_) => {}
            Err(e) => debug!(id = %identifier, error = %e, "Display name unavailable"),
        }

        if let Some(process) = process {
            if !process.name.is_empty() {
                return self.process_label(process);
            }
        }

        let last = identifier.rsplit('\\').next().unwrap_or_default();
        if !last.is_empty() {
            if self.config.is_browser(last) {
                return format!("{last} (Browser)");
            }
            return last.to_string();
        }

        UNKNOWN_APPLICATION.to_string()
    }

    fn process_label(&self, process: &ProcessInfo) -> String {
        match (&process.window_title, self.config.is_browser(&process.name)) {
            (Some(title), _) if !title.is_empty() => format!("{} - {}", process.name, title),
            (_, true) => format!("{} (Browser)", process.name),
            _ => process.name.clone(),
        }
    }

    fn targeted_rescan(
        &self,
        processes: &[ProcessInfo],
        candidates: &mut Vec<Candidate>,
        index: &mut SessionIndex<'_>,
    ) {
        for hint in &self.config.rescan_hints {
            let group: Vec<&ProcessInfo> = processes
                .iter()
                .filter(|p| hint.matches_process(&p.name))
                .collect();
            if group.is_empty() {
                continue;
            }

            let detected = group
                .iter()
                .any(|p| candidates.iter().any(|c| c.process_id == p.pid));
            if detected {
                continue;
            }

            debug!(app = %hint.name, processes = group.len(), "Re-scanning endpoints");
            for process in group {
                if let Some(session) = index.find(process.pid) {
                    info!(app = %hint.name, pid = process.pid, "Found missed session");
                    candidates.push(Candidate {
                        name: hint.name.clone(),
                        process_id: process.pid,
                        process_name: Some(process.name.clone()),
                        session,
                    });
                    break;
                }
            }
        }
    }

    fn browser_sweep(
        &self,
        processes: &[ProcessInfo],
        candidates: &mut Vec<Candidate>,
        index: &mut SessionIndex<'_>,
    ) {
        let browsers: Vec<&ProcessInfo> = processes
            .iter()
            .filter(|p| self.config.is_browser(&p.name))
            .collect();
        debug!(count = browsers.len(), "Browser processes");

        let mut detected: HashSet<u32> = candidates.iter().map(|c| c.process_id).collect();
        for process in browsers {
            if detected.contains(&process.pid) {
                continue;
            }
            let Some(session) = index.find(process.pid) else {
                continue;
            };

            let name = match &process.window_title {
                Some(title) if !title.is_empty() => format!("{} - {}", process.name, title),
                _ => format!("{} (Browser)", process.name),
            };
            info!(name = %name, pid = process.pid, "Found browser session");
            detected.insert(process.pid);
            candidates.push(Candidate {
                name,
                process_id: process.pid,
                process_name: Some(process.name.clone()),
                session,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::simulated::{SimulatedBackend, SimulatedProcesses, SimulatedSession};
    use crate::audio::{AudioBackend, ChannelKind, StateFilter};
    use std::cell::Cell;

    /// Counts table calls. `late` processes are only visible to lookups by id,
    /// as if they started after the listing was taken.
    #[derive(Default)]
    struct CountingProcesses {
        listed: SimulatedProcesses,
        late: Vec<ProcessInfo>,
        lists: Cell<usize>,
        lookups: Cell<usize>,
    }

    impl ProcessTable for CountingProcesses {
        fn list_processes(&self) -> Result<Vec<ProcessInfo>, AudioError> {
            self.lists.set(self.lists.get() + 1);
            self.listed.list_processes()
        }

        fn process_by_id(&self, pid: u32) -> Result<ProcessInfo, AudioError> {
            self.lookups.set(self.lookups.get() + 1);
            match self.late.iter().find(|p| p.pid == pid) {
                Some(process) => Ok(process.clone()),
                None => self.listed.process_by_id(pid),
            }
        }
    }

    struct Fixture {
        sim: SimulatedBackend,
        processes: SimulatedProcesses,
        config: MixerConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let sim = SimulatedBackend::new();
            sim.add_endpoint("Speakers");
            Self {
                sim,
                processes: SimulatedProcesses::new(),
                config: MixerConfig::default(),
            }
        }

        fn run(&self) -> Vec<LogicalChannel> {
            let endpoints = self.sim.endpoints(StateFilter::Active).unwrap();
            let matcher = SessionMatcher::new(&self.config, &self.processes);
            matcher.match_endpoint(endpoints[0].as_ref(), &endpoints, false)
        }

        fn names(&self) -> Vec<String> {
            self.run().into_iter().map(|c| c.name).collect()
        }
    }

    #[test]
    fn test_game_named_after_process() {
        let f = Fixture::new();
        f.sim.add_session(
            "Speakers",
            SimulatedSession::new(r"{0.0.0.00000000}.{guid}|\Device\HarddiskVolume3\Games\game.exe%b{1}", 100),
        );
        f.processes.add(100, "game.exe", None);

        let channels = f.run();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].kind, ChannelKind::Master);
        assert_eq!(channels[0].name, "Master Volume");
        assert_eq!(channels[1].name, "game.exe");
        assert_eq!(channels[1].process_id, 100);
        assert_eq!(channels[1].process_name.as_deref(), Some("game.exe"));
    }

    #[test]
    fn test_browser_windows_get_distinct_channels() {
        let f = Fixture::new();
        f.sim.add_session("Speakers", SimulatedSession::new("chrome-a", 201));
        f.sim.add_session("Speakers", SimulatedSession::new("chrome-b", 202));
        f.processes.add(201, "chrome.exe", Some("Music - YouTube"));
        f.processes.add(202, "chrome.exe", Some("Podcast"));

        assert_eq!(
            f.names(),
            vec![
                "Master Volume",
                "chrome.exe - Music - YouTube",
                "chrome.exe - Podcast"
            ]
        );
    }

    #[test]
    fn test_no_sessions_yields_master_only() {
        let f = Fixture::new();
        let channels = f.run();
        assert_eq!(channels.len(), 1);
        assert!(channels[0].is_master());
        assert!(channels[0].control.is_some());
    }

    #[test]
    fn test_match_is_idempotent() {
        let f = Fixture::new();
        f.sim.add_session("Speakers", SimulatedSession::new("a", 1).with_display_name("Player"));
        f.sim.add_session("Speakers", SimulatedSession::new("b", 2));
        f.processes.add(2, "editor.exe", Some("notes.txt"));

        let first: Vec<_> = f.run().into_iter().map(|c| (c.name, c.kind)).collect();
        let second: Vec<_> = f.run().into_iter().map(|c| (c.name, c.kind)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_system_sessions_excluded() {
        let f = Fixture::new();
        f.sim.add_session("Speakers", SimulatedSession::new(r"{0.0.0}|#%b{A9EF3FD9}|AudioSrv", 0));
        f.sim.add_session("Speakers", SimulatedSession::new("System Sounds", 0));
        assert_eq!(f.names(), vec!["Master Volume"]);
    }

    #[test]
    fn test_naming_fallbacks() {
        let f = Fixture::new();
        // Process is gone; falls back to the identifier.
        f.sim.add_session("Speakers", SimulatedSession::new(r"\Device\HarddiskVolume1\Apps\tool.exe", 301));
        // Process has exited, identifier names a browser.
        f.sim.add_session("Speakers", SimulatedSession::new(r"\Apps\firefox.exe", 302));
        // Nothing at all to go on.
        f.sim.add_session("Speakers", SimulatedSession::new("", 0));

        assert_eq!(
            f.names(),
            vec![
                "Master Volume",
                "tool.exe",
                "firefox.exe (Browser)",
                "Unknown Application"
            ]
        );
    }

    #[test]
    fn test_duplicate_names_last_wins() {
        let f = Fixture::new();
        f.sim.add_session("Speakers", SimulatedSession::new("a", 1).with_display_name("Player"));
        f.sim.add_session("Speakers", SimulatedSession::new("b", 2).with_display_name("Other"));
        f.sim.add_session("Speakers", SimulatedSession::new("c", 3).with_display_name("Player"));

        let channels = f.run();
        assert_eq!(channels.len(), 3);
        assert_eq!(channels[1].name, "Player");
        assert_eq!(channels[1].process_id, 3);
        assert_eq!(channels[2].name, "Other");
    }

    #[test]
    fn test_targeted_rescan_finds_group_on_other_endpoint() {
        let f = Fixture::new();
        f.sim.add_endpoint("Headset");
        f.sim.add_session("Headset", SimulatedSession::new("voice", 402));
        f.processes.add(401, "Discord.exe", Some("Discord"));
        f.processes.add(402, "Discord.exe", None);

        let channels = f.run();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[1].name, "Discord");
        assert_eq!(channels[1].process_id, 402);
    }

    #[test]
    fn test_targeted_rescan_skipped_when_group_detected() {
        let f = Fixture::new();
        f.sim.add_endpoint("Headset");
        f.sim.add_session("Speakers", SimulatedSession::new("main", 401));
        f.sim.add_session("Headset", SimulatedSession::new("voice", 402));
        f.processes.add(401, "Discord.exe", None);
        f.processes.add(402, "Discord.exe", None);

        assert_eq!(f.names(), vec!["Master Volume", "Discord.exe"]);
    }

    #[test]
    fn test_browser_sweep_searches_all_endpoints() {
        let f = Fixture::new();
        f.sim.add_endpoint("Headset");
        f.sim.add_session("Headset", SimulatedSession::new("edge", 501));
        f.sim.add_session("Headset", SimulatedSession::new("brave", 502));
        f.processes.add(501, "msedge.exe", Some("News"));
        f.processes.add(502, "brave.exe", None);
        f.processes.add(503, "firefox.exe", Some("No audio"));

        assert_eq!(
            f.names(),
            vec!["Master Volume", "msedge.exe - News", "brave.exe (Browser)"]
        );
    }

    #[test]
    fn test_failing_session_does_not_abort_pass() {
        let f = Fixture::new();
        f.sim.add_session("Speakers", SimulatedSession::new("broken", 1).failing_reads());
        f.sim.add_session("Speakers", SimulatedSession::new("ok", 2));
        f.processes.add(2, "game.exe", None);

        assert_eq!(f.names(), vec!["Master Volume", "game.exe"]);
    }

    #[test]
    fn test_refresh_capability_is_used_when_requested() {
        let f = Fixture::new();
        f.sim.set_session_refresh(true);
        let endpoints = f.sim.endpoints(StateFilter::Active).unwrap();
        let matcher = SessionMatcher::new(&f.config, &f.processes);

        matcher.match_endpoint(endpoints[0].as_ref(), &endpoints, false);
        assert_eq!(f.sim.refresh_calls(), 0);
        matcher.match_endpoint(endpoints[0].as_ref(), &endpoints, true);
        assert_eq!(f.sim.refresh_calls(), 1);
    }

    #[test]
    fn test_process_table_listed_once_per_pass() {
        let f = Fixture::new();
        for pid in 1..=20 {
            f.sim.add_session("Speakers", SimulatedSession::new(format!("app-{pid}"), pid));
        }
        f.sim.add_session("Speakers", SimulatedSession::new("late", 99));
        f.sim.add_session("Speakers", SimulatedSession::new("System Sounds", 0));

        let processes = CountingProcesses {
            late: vec![ProcessInfo {
                pid: 99,
                name: "late.exe".to_string(),
                window_title: None,
            }],
            ..CountingProcesses::default()
        };
        for pid in 1..=20 {
            processes.listed.add(pid, &format!("app{pid}.exe"), None);
        }

        let endpoints = f.sim.endpoints(StateFilter::Active).unwrap();
        let matcher = SessionMatcher::new(&f.config, &processes);
        let channels = matcher.match_endpoint(endpoints[0].as_ref(), &endpoints, false);

        assert_eq!(channels.len(), 22);
        assert_eq!(channels[1].name, "app1.exe");
        assert_eq!(channels[21].name, "late.exe");
        assert_eq!(processes.lists.get(), 1);
        assert_eq!(processes.lookups.get(), 1);
    }
}
