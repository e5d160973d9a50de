//! Channel state store.
//!
//! The authoritative table of logical channels for the selected endpoint,
//! with the last volume/mute values observed on each channel's handle and the
//! pending restore levels for forced-zero mutes.

use crate::audio::{ChannelKind, LogicalChannel};
use std::collections::HashMap;
use tracing::debug;

/// A channel together with its last observed values.
#[derive(Debug, Clone)]
pub struct ChannelEntry {
    pub channel: LogicalChannel,
    /// Last observed volume (0.0 to 1.0)
    pub volume: f32,
    pub muted: bool,
}

/// Volume levels to restore when a forced-zero mute is lifted.
#[derive(Debug, Default, Clone)]
pub struct PendingRestoreTable {
    levels: HashMap<String, f32>,
}

impl PendingRestoreTable {
    /// Record `level` for `name` unless a level is already held. Returns
    /// whether the level was stored.
    pub fn capture(&mut self, name: &str, level: f32) -> bool {
        if self.levels.contains_key(name) {
            return false;
        }
        self.levels.insert(name.to_string(), level);
        true
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.levels.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.levels.contains_key(name)
    }

    /// Remove and return the level held for `name`.
    pub fn take(&mut self, name: &str) -> Option<f32> {
        self.levels.remove(name)
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// Presentation view of one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSnapshot {
    pub name: String,
    pub kind: ChannelKind,
    pub process_id: u32,
    pub volume: f32,
    pub muted: bool,
    /// Endpoints the channel could be redirected to
    pub endpoint_choices: Vec<String>,
}

/// Read-only state handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MixerSnapshot {
    /// Selected endpoint
    pub endpoint: Option<String>,
    /// All active endpoints
    pub endpoints: Vec<String>,
    /// Master first, then application channels
    pub channels: Vec<ChannelSnapshot>,
    /// No application channel was detected; show an explicit empty state
    pub empty: bool,
}

#[derive(Debug, Default)]
pub struct ChannelStore {
    endpoint: Option<String>,
    entries: Vec<ChannelEntry>,
    pending: PendingRestoreTable,
}

impl ChannelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the channel set wholesale with the result of a session match.
    ///
    /// Initial values are read from the new handles. The pending restore
    /// table is keyed by name and survives the replacement.
    pub fn replace(&mut self, endpoint: &str, channels: Vec<LogicalChannel>) {
        self.endpoint = Some(endpoint.to_string());
        self.entries = channels
            .into_iter()
            .map(|channel| {
                let (volume, muted) = read_live(&channel).unwrap_or((1.0, false));
                ChannelEntry {
                    channel,
                    volume,
                    muted,
                }
            })
            .collect();
    }

    /// Re-read volume and mute from every handle. Channels whose handle fails
    /// keep their last observed values. Returns the number of failed reads.
    pub fn refresh(&mut self) -> usize {
        let mut failures = 0;
        for entry in &mut self.entries {
            match read_live(&entry.channel) {
                Some((volume, muted)) => {
                    entry.volume = volume;
                    entry.muted = muted;
                }
                None => failures += 1,
            }
        }
        failures
    }

    /// Refresh from the live handles and return a snapshot.
    pub fn read(&mut self, endpoints: &[String]) -> MixerSnapshot {
        self.refresh();
        self.snapshot(endpoints)
    }

    /// Snapshot of the last observed values.
    pub fn snapshot(&self, endpoints: &[String]) -> MixerSnapshot {
        MixerSnapshot {
            endpoint: self.endpoint.clone(),
            endpoints: endpoints.to_vec(),
            channels: self
                .entries
                .iter()
                .map(|entry| ChannelSnapshot {
                    name: entry.channel.name.clone(),
                    kind: entry.channel.kind,
                    process_id: entry.channel.process_id,
                    volume: entry.volume,
                    muted: entry.muted,
                    endpoint_choices: endpoints.to_vec(),
                })
                .collect(),
            empty: !self.has_applications(),
        }
    }

    /// Record values that were just written successfully.
    pub fn record(&mut self, name: &str, volume: Option<f32>, muted: Option<bool>) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.channel.name == name) {
            if let Some(volume) = volume {
                entry.volume = volume;
            }
            if let Some(muted) = muted {
                entry.muted = muted;
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&ChannelEntry> {
        self.entries.iter().find(|e| e.channel.name == name)
    }

    pub fn channel(&self, name: &str) -> Option<&LogicalChannel> {
        self.get(name).map(|e| &e.channel)
    }

    pub fn entries(&self) -> &[ChannelEntry] {
        &self.entries
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn has_applications(&self) -> bool {
        self.entries.iter().any(|e| !e.channel.is_master())
    }

    pub fn pending(&self) -> &PendingRestoreTable {
        &self.pending
    }

    pub fn pending_mut(&mut self) -> &mut PendingRestoreTable {
        &mut self.pending
    }
}

fn read_live(channel: &LogicalChannel) -> Option<(f32, bool)> {
    let control = channel.control.as_ref()?.volume_control();
    match (control.volume(), control.is_muted()) {
        (Ok(volume), Ok(muted)) => Some((volume, muted)),
        (Err(e), _) | (_, Err(e)) => {
            debug!(channel = %channel.name, error = %e, "Failed to read channel state");
            None
        }
    }
}
