//! Mixer configuration.
//!
//! All per-application special cases live here as data: which sessions are
//! hidden, which process names count as browsers, which applications need a
//! secondary cross-endpoint scan, and which ones need the forced-zero mute.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// How a channel's mute request is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutePolicy {
    /// Set the subsystem's mute flag
    #[default]
    Standard,

    /// Also drive the volume to zero and restore it on unmute; for
    /// applications that keep emitting audio while flagged as muted
    ForceZeroVolumeOnMute,
}

/// Maps a case-insensitive substring of a channel or process name to a policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuteRule {
    pub pattern: String,
    pub policy: MutePolicy,
}

/// An application that direct session enumeration frequently misses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescanHint {
    /// Canonical channel name used when the application is found
    pub name: String,

    /// Process names that together form the application
    pub process_names: Vec<String>,
}

impl RescanHint {
    pub fn new(name: &str, process_names: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            process_names: process_names.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Whether a live process belongs to this application.
    pub fn matches_process(&self, process_name: &str) -> bool {
        let process_name = canonical_process_name(process_name);
        self.process_names
            .iter()
            .any(|p| canonical_process_name(p) == process_name)
    }
}

/// Lowercased process name without a trailing `.exe`.
pub fn canonical_process_name(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    match lower.strip_suffix(".exe") {
        Some(stem) => stem.to_string(),
        None => lower,
    }
}

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Engine configuration. Every field has a default so partial JSON works.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    /// Period of the cheap volume/mute refresh
    pub poll_interval_ms: u64,

    /// Every Nth poll also re-runs session matching
    pub full_rescan_every: u32,

    /// Delay before the forced-zero mute is asserted a second time
    pub reassert_delay_ms: u64,

    /// Volume applied on unmute when no level was captured at mute time
    pub default_unmute_level: f32,

    /// Name of the endpoint-wide channel
    pub master_channel_name: String,

    /// Sessions whose identifier contains any of these are hidden
    pub excluded_identifiers: Vec<String>,

    /// Case-insensitive process name substrings identifying browsers
    pub browser_names: Vec<String>,

    pub rescan_hints: Vec<RescanHint>,

    pub mute_policies: Vec<MuteRule>,

    /// Tracing filter directive (e.g. `debug`)
    pub log_level: Option<String>,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            full_rescan_every: 5,
            reassert_delay_ms: 250,
            default_unmute_level: 0.5,
            master_channel_name: "Master Volume".to_string(),
            excluded_identifiers: vec![
                "AudioSrv".to_string(),
                "System Sounds".to_string(),
                env!("CARGO_PKG_NAME").to_string(),
            ],
            browser_names: [
                "chrome", "firefox", "msedge", "iexplore", "opera", "brave", "vivaldi", "safari",
                "chromium",
            ]
            .iter()
            .map(|b| b.to_string())
            .collect(),
            rescan_hints: vec![
                RescanHint::new("Discord", &["Discord.exe"]),
                RescanHint::new("Spotify", &["Spotify.exe"]),
                RescanHint::new("Microsoft Teams", &["ms-teams.exe", "Teams.exe"]),
                RescanHint::new("Slack", &["slack.exe"]),
            ],
            mute_policies: vec![MuteRule {
                pattern: "discord".to_string(),
                policy: MutePolicy::ForceZeroVolumeOnMute,
            }],
            log_level: None,
        }
    }
}

impl MixerConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: MixerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "poll_interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.full_rescan_every == 0 {
            return Err(ConfigError::InvalidValue {
                field: "full_rescan_every",
                reason: "must be greater than zero".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.default_unmute_level) {
            return Err(ConfigError::InvalidValue {
                field: "default_unmute_level",
                reason: format!("{} is outside 0.0..=1.0", self.default_unmute_level),
            });
        }
        if self.master_channel_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "master_channel_name",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reassert_delay(&self) -> Duration {
        Duration::from_millis(self.reassert_delay_ms)
    }

    /// Whether a session identifier names a reserved system session.
    pub fn is_excluded(&self, identifier: &str) -> bool {
        self.excluded_identifiers
            .iter()
            .any(|reserved| !reserved.is_empty() && identifier.contains(reserved.as_str()))
    }

    /// Whether a process name belongs to a known browser.
    pub fn is_browser(&self, process_name: &str) -> bool {
        let name = process_name.to_lowercase();
        self.browser_names
            .iter()
            .any(|browser| name.contains(&browser.to_lowercase()))
    }

    /// Mute policy for a channel; the first matching rule wins.
    pub fn mute_policy_for(&self, channel_name: &str, process_name: Option<&str>) -> MutePolicy {
        let channel_name = channel_name.to_lowercase();
        let process_name = process_name.map(str::to_lowercase);

        self.mute_policies
            .iter()
            .find(|rule| {
                let pattern = rule.pattern.to_lowercase();
                !pattern.is_empty()
                    && (channel_name.contains(&pattern)
                        || process_name.as_deref().is_some_and(|p| p.contains(&pattern)))
            })
            .map(|rule| rule.policy)
            .unwrap_or_default()
    }
}
