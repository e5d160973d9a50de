//! Volume and mute controller.
//!
//! Applies control writes to the handle behind a named channel. Channels
//! whose mute policy is [`MutePolicy::ForceZeroVolumeOnMute`] are also driven
//! to zero volume on mute, re-asserted once after a short delay, and restored
//! on unmute.

use super::deferred::DeferredQueue;
use super::store::ChannelStore;
use crate::audio::{AudioError, ControlOutcome, VolumeControl};
use crate::config::{MixerConfig, MutePolicy};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Second write of a forced-zero mute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reassert {
    pub channel: String,
}

pub struct Controller {
    deferred: DeferredQueue<Reassert>,
    reassert_delay: Duration,
    default_unmute_level: f32,
}

impl Controller {
    pub fn new(config: &MixerConfig) -> Self {
        Self {
            deferred: DeferredQueue::new(),
            reassert_delay: config.reassert_delay(),
            default_unmute_level: config.default_unmute_level,
        }
    }

    /// Set a channel's volume, clamped to 0.0..=1.0.
    pub fn set_volume(
        &mut self,
        store: &mut ChannelStore,
        name: &str,
        level: f32,
    ) -> Result<ControlOutcome, AudioError> {
        let level = if level.is_nan() { 0.0 } else { level.clamp(0.0, 1.0) };

        let Some(channel) = store.channel(name) else {
            debug!(channel = name, "Volume change for unknown channel");
            return Ok(ControlOutcome::UnknownChannel);
        };
        let control = channel.control.as_ref().ok_or_else(|| AudioError::NoControl {
            name: name.to_string(),
        })?;

        control.volume_control().set_volume(level)?;
        store.record(name, Some(level), None);
        debug!(channel = name, level, "Volume set");
        Ok(ControlOutcome::Applied)
    }

    /// Mute or unmute a channel according to its mute policy.
    pub fn set_mute(
        &mut self,
        store: &mut ChannelStore,
        config: &MixerConfig,
        name: &str,
        muted: bool,
        now: Instant,
    ) -> Result<ControlOutcome, AudioError> {
        let Some(channel) = store.channel(name) else {
            debug!(channel = name, "Mute change for unknown channel");
            return Ok(ControlOutcome::UnknownChannel);
        };
        let policy = config.mute_policy_for(name, channel.process_name.as_deref());
        let handle = channel
            .control
            .clone()
            .ok_or_else(|| AudioError::NoControl {
                name: name.to_string(),
            })?;
        let control = handle.volume_control();

        match (policy, muted) {
            (MutePolicy::Standard, _) => {
                control.set_mute(muted)?;
                store.record(name, None, Some(muted));
            }
            (MutePolicy::ForceZeroVolumeOnMute, true) => {
                let current = match control.volume() {
                    Ok(volume) => volume,
                    Err(e) => {
                        debug!(channel = name, error = %e, "Using last observed volume");
                        store
                            .get(name)
                            .map(|entry| entry.volume)
                            .unwrap_or(self.default_unmute_level)
                    }
                };
                if store.pending_mut().capture(name, current) {
                    debug!(channel = name, level = current, "Captured volume for restore");
                }

                force_zero(control)?;
                store.record(name, Some(0.0), Some(true));
                self.deferred.schedule(
                    name,
                    now + self.reassert_delay,
                    Reassert {
                        channel: name.to_string(),
                    },
                );
            }
            (MutePolicy::ForceZeroVolumeOnMute, false) => {
                self.deferred.cancel(name);
                control.set_mute(false)?;

                let level = store
                    .pending()
                    .get(name)
                    .unwrap_or(self.default_unmute_level);
                control.set_volume(level)?;
                store.pending_mut().take(name);
                store.record(name, Some(level), Some(false));
                debug!(channel = name, level, "Restored volume on unmute");
            }
        }

        info!(channel = name, muted, ?policy, "Mute set");
        Ok(ControlOutcome::Applied)
    }

    /// Run every re-assertion that is due. Returns how many ran.
    pub fn run_due(&mut self, store: &mut ChannelStore, now: Instant) -> usize {
        let due = self.deferred.take_due(now);
        let count = due.len();

        for Reassert { channel } in due {
            let Some(control) = store.channel(&channel).and_then(|c| c.control.clone()) else {
                debug!(channel = %channel, "Channel gone before mute re-assert");
                continue;
            };
            match force_zero(control.volume_control()) {
                Ok(()) => {
                    store.record(&channel, Some(0.0), Some(true));
                    debug!(channel = %channel, "Mute re-asserted");
                }
                Err(e) => warn!(channel = %channel, error = %e, "Failed to re-assert mute"),
            }
        }
        count
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.deferred.next_due()
    }

    pub fn is_pending(&self, name: &str) -> bool {
        self.deferred.is_pending(name)
    }

    /// Drop every pending re-assertion.
    pub fn cancel_all(&mut self) {
        self.deferred.clear();
    }
}

fn force_zero(control: &dyn VolumeControl) -> Result<(), AudioError> {
    control.set_volume(0.0)?;
    control.set_mute(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::simulated::{SimulatedBackend, SimulatedSession};
    use crate::audio::{AudioBackend, LogicalChannel, StateFilter};

    struct Fixture {
        sim: SimulatedBackend,
        store: ChannelStore,
        config: MixerConfig,
        controller: Controller,
    }

    fn fixture(sessions: &[(&str, f32)]) -> Fixture {
        let sim = SimulatedBackend::new();
        sim.add_endpoint("Speakers");
        for (i, (_, volume)) in sessions.iter().enumerate() {
            sim.add_session(
                "Speakers",
                SimulatedSession::new(format!("s{i}"), i as u32 + 1).with_volume(*volume),
            );
        }

        let endpoint = sim.endpoints(StateFilter::Active).unwrap().remove(0);
        let mut channels = vec![LogicalChannel::master("Master Volume", endpoint.master().ok())];
        for ((name, _), session) in sessions.iter().zip(endpoint.sessions().unwrap()) {
            channels.push(LogicalChannel::application(
                *name,
                session.process_id().unwrap(),
                Some(format!("{name}.exe")),
                session,
            ));
        }

        let mut store = ChannelStore::new();
        store.replace("Speakers", channels);
        let config = MixerConfig::default();
        let controller = Controller::new(&config);
        Fixture {
            sim,
            store,
            config,
            controller,
        }
    }

    #[test]
    fn test_volume_clamps() {
        let mut f = fixture(&[("game", 0.5)]);
        f.controller.set_volume(&mut f.store, "game", 1.5).unwrap();
        assert_eq!(f.sim.session_volume(0), Some(1.0));
        f.controller.set_volume(&mut f.store, "game", -0.2).unwrap();
        assert_eq!(f.sim.session_volume(0), Some(0.0));
        assert_eq!(f.store.get("game").unwrap().volume, 0.0);
    }

    #[test]
    fn test_master_volume_targets_endpoint() {
        let mut f = fixture(&[("game", 0.5)]);
        f.controller.set_volume(&mut f.store, "Master Volume", 0.25).unwrap();
        assert_eq!(f.sim.master_volume("Speakers"), Some(0.25));
        assert_eq!(f.sim.session_volume(0), Some(0.5));
    }

    #[test]
    fn test_unknown_channel_is_lookup_miss() {
        let mut f = fixture(&[]);
        let now = Instant::now();
        assert_eq!(
            f.controller.set_volume(&mut f.store, "does-not-exist", 0.5),
            Ok(ControlOutcome::UnknownChannel)
        );
        assert_eq!(
            f.controller
                .set_mute(&mut f.store, &f.config, "does-not-exist", true, now),
            Ok(ControlOutcome::UnknownChannel)
        );
    }

    #[test]
    fn test_standard_mute_leaves_volume() {
        let mut f = fixture(&[("game", 0.7)]);
        let now = Instant::now();
        f.controller
            .set_mute(&mut f.store, &f.config, "game", true, now)
            .unwrap();
        assert_eq!(f.sim.session_muted(0), Some(true));
        assert_eq!(f.sim.session_volume(0), Some(0.7));
        assert!(!f.controller.is_pending("game"));

        f.controller
            .set_mute(&mut f.store, &f.config, "game", false, now)
            .unwrap();
        assert_eq!(f.sim.session_muted(0), Some(false));
        assert_eq!(f.sim.session_volume(0), Some(0.7));
    }

    #[test]
    fn test_force_zero_mute_reasserts_and_restores() {
        let mut f = fixture(&[("Discord", 0.8)]);
        let now = Instant::now();
        f.controller
            .set_mute(&mut f.store, &f.config, "Discord", true, now)
            .unwrap();
        assert_eq!(f.sim.session_volume(0), Some(0.0));
        assert_eq!(f.sim.session_muted(0), Some(true));
        assert_eq!(f.store.pending().get("Discord"), Some(0.8));

        // The subsystem resets the volume shortly after the first write.
        f.sim.set_session_volume(0, 0.8);
        assert_eq!(f.controller.run_due(&mut f.store, now), 0);
        let later = now + Duration::from_millis(250);
        assert_eq!(f.controller.run_due(&mut f.store, later), 1);
        assert_eq!(f.sim.session_volume(0), Some(0.0));
        assert_eq!(f.sim.session_muted(0), Some(true));

        f.controller
            .set_mute(&mut f.store, &f.config, "Discord", false, later)
            .unwrap();
        assert_eq!(f.sim.session_volume(0), Some(0.8));
        assert_eq!(f.sim.session_muted(0), Some(false));
        assert!(f.store.pending().is_empty());
    }

    #[test]
    fn test_force_zero_unmute_without_capture_uses_default() {
        let mut f = fixture(&[("Discord", 0.8)]);
        f.controller
            .set_mute(&mut f.store, &f.config, "Discord", false, Instant::now())
            .unwrap();
        assert_eq!(f.sim.session_volume(0), Some(0.5));
    }

    #[test]
    fn test_second_mute_keeps_first_capture() {
        let mut f = fixture(&[("Discord", 0.6)]);
        let now = Instant::now();
        f.controller
            .set_mute(&mut f.store, &f.config, "Discord", true, now)
            .unwrap();
        f.controller
            .set_mute(&mut f.store, &f.config, "Discord", true, now)
            .unwrap();
        assert_eq!(f.store.pending().get("Discord"), Some(0.6));
    }

    #[test]
    fn test_unmute_cancels_reassert() {
        let mut f = fixture(&[("Discord", 0.6)]);
        let now = Instant::now();
        f.controller
            .set_mute(&mut f.store, &f.config, "Discord", true, now)
            .unwrap();
        f.controller
            .set_mute(&mut f.store, &f.config, "Discord", false, now)
            .unwrap();
        assert!(f.controller.next_due().is_none());
        assert_eq!(f.controller.run_due(&mut f.store, now + Duration::from_secs(1)), 0);
        assert_eq!(f.sim.session_volume(0), Some(0.6));
    }

    #[test]
    fn test_failed_write_leaves_displayed_state() {
        let mut f = fixture(&[("game", 0.4)]);
        f.sim.fail_next_writes(1);
        let err = f
            .controller
            .set_mute(&mut f.store, &f.config, "game", true, Instant::now())
            .unwrap_err();
        assert!(err.is_transient());
        assert!(!f.store.get("game").unwrap().muted);
    }

    #[test]
    fn test_failed_unmute_keeps_pending_level() {
        let mut f = fixture(&[("Discord", 0.9)]);
        let now = Instant::now();
        f.controller
            .set_mute(&mut f.store, &f.config, "Discord", true, now)
            .unwrap();
        f.sim.fail_next_writes(1);
        assert!(f
            .controller
            .set_mute(&mut f.store, &f.config, "Discord", false, now)
            .is_err());
        assert_eq!(f.store.pending().get("Discord"), Some(0.9));
    }
}
