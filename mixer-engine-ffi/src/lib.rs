//! FFI bindings for the Windows Audio Mixer engine.
//!
//! This crate provides C ABI functions for use from C# via P/Invoke.
//! All functions use panic::catch_unwind to prevent Rust panics from
//! unwinding across the FFI boundary.
//!
//! The engine is single-threaded: every call for a given handle must come
//! from the thread that created it (the UI thread), which must also call
//! `mixer_engine_tick` periodically.

use mixer_rs::audio::{AudioBackend, EndpointState, SessionState};
use mixer_rs::{
    default_backend, AudioError, ChannelKind, ConfigError, ControlIntent, ControlOutcome,
    EndpointReport, MixerApp, MixerConfig, MixerSnapshot, ProcessTable, SystemProcessTable,
    TickKind,
};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::ffi::{c_char, c_void, CStr, CString};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::rc::Rc;
use std::sync::OnceLock;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Error Handling
// ============================================================================

/// Status codes returned by FFI functions.
///
/// Zero is success, positive values are non-fatal outcomes, negative values
/// are errors.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Success = 0,
    /// The named channel does not exist; nothing was changed
    UnknownChannel = 1,
    InvalidHandle = -1,
    InvalidArgument = -2,
    EndpointNotFound = -3,
    PlatformError = -4,
    JsonError = -5,
    ControlNotAvailable = -6,
    NotSupported = -7,
    MutationFailed = -8,
    ConfigError = -9,
    BackendUnavailable = -10,
    Panic = -99,
}

impl From<&AudioError> for ErrorCode {
    fn from(err: &AudioError) -> Self {
        match err {
            AudioError::EndpointNotFound { .. } => ErrorCode::EndpointNotFound,
            AudioError::NoControl { .. } => ErrorCode::ControlNotAvailable,
            AudioError::MutationFailed { .. } => ErrorCode::MutationFailed,
            AudioError::Unsupported(_) => ErrorCode::NotSupported,
            AudioError::BackendUnavailable => ErrorCode::BackendUnavailable,
            AudioError::StringConversion(_) => ErrorCode::InvalidArgument,
            AudioError::ComInitFailed(_)
            | AudioError::EnumerationFailed(_)
            | AudioError::Platform { .. }
            | AudioError::StaleHandle
            | AudioError::ProcessUnavailable { .. } => ErrorCode::PlatformError,
        }
    }
}

/// An error on its way to the caller.
#[derive(Debug)]
struct FfiError {
    code: ErrorCode,
    message: String,
}

impl FfiError {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<AudioError> for FfiError {
    fn from(err: AudioError) -> Self {
        Self::new(ErrorCode::from(&err), err.to_string())
    }
}

impl From<ConfigError> for FfiError {
    fn from(err: ConfigError) -> Self {
        let code = match err {
            ConfigError::Parse(_) => ErrorCode::JsonError,
            _ => ErrorCode::ConfigError,
        };
        Self::new(code, err.to_string())
    }
}

impl From<serde_json::Error> for FfiError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorCode::JsonError, err.to_string())
    }
}

/// Thread-local storage for the last error.
thread_local! {
    static LAST_ERROR: RefCell<Option<(ErrorCode, String)>> = const { RefCell::new(None) };
}

fn set_last_error(code: ErrorCode, message: impl Into<String>) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = Some((code, message.into()));
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

// ============================================================================
// Logging
// ============================================================================

const DEFAULT_FILTER: &str = "info,mixer_rs=debug";

fn init_tracing(level: Option<&str>) {
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level.unwrap_or(DEFAULT_FILTER)));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .try_init();
    });
}

// ============================================================================
// Data Types for JSON Serialization
// ============================================================================

/// A channel with its current state.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChannelDto {
    pub name: String,
    /// `master` or `application`
    pub kind: String,
    pub process_id: u32,
    pub volume: f32,
    pub muted: bool,
    pub endpoint_choices: Vec<String>,
}

/// Everything the UI needs to draw the mixer.
#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotDto {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub endpoints: Vec<String>,
    pub channels: Vec<ChannelDto>,
    /// No application is playing audio; show the empty-state message
    pub empty: bool,
    /// Last control failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SnapshotDto {
    fn new(snapshot: MixerSnapshot, error: Option<String>) -> Self {
        Self {
            endpoint: snapshot.endpoint,
            endpoints: snapshot.endpoints,
            channels: snapshot
                .channels
                .into_iter()
                .map(|c| ChannelDto {
                    name: c.name,
                    kind: match c.kind {
                        ChannelKind::Master => "master",
                        ChannelKind::Application => "application",
                    }
                    .to_string(),
                    process_id: c.process_id,
                    volume: c.volume,
                    muted: c.muted,
                    endpoint_choices: c.endpoint_choices,
                })
                .collect(),
            empty: snapshot.empty,
            error,
        }
    }
}

/// A control intent from the UI.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntentDto {
    SetVolume { channel: String, level: u8 },
    SetMute { channel: String, muted: bool },
    Redirect { channel: String, endpoint: String },
}

impl From<IntentDto> for ControlIntent {
    fn from(intent: IntentDto) -> Self {
        match intent {
            IntentDto::SetVolume { channel, level } => ControlIntent::SetVolume {
                channel,
                level: level.min(100),
            },
            IntentDto::SetMute { channel, muted } => ControlIntent::SetMute { channel, muted },
            IntentDto::Redirect { channel, endpoint } => {
                ControlIntent::Redirect { channel, endpoint }
            }
        }
    }
}

/// Response containing operation result.
#[derive(Debug, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    /// `applied` or `unknown_channel`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionReportDto {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EndpointReportDto {
    pub name: String,
    pub state: String,
    pub sessions: Vec<SessionReportDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response of a forced detection.
#[derive(Debug, Serialize, Deserialize)]
pub struct DetectResponse {
    pub endpoints: Vec<EndpointReportDto>,
}

impl From<EndpointReport> for EndpointReportDto {
    fn from(report: EndpointReport) -> Self {
        Self {
            name: report.name,
            state: endpoint_state_name(report.state).to_string(),
            sessions: report
                .sessions
                .into_iter()
                .map(|s| SessionReportDto {
                    identifier: s.identifier,
                    process_id: s.process_id,
                    state: s.state.map(|state| session_state_name(state).to_string()),
                })
                .collect(),
            error: report.error,
        }
    }
}

fn endpoint_state_name(state: EndpointState) -> &'static str {
    match state {
        EndpointState::Active => "active",
        EndpointState::Disabled => "disabled",
        EndpointState::NotPresent => "not_present",
        EndpointState::Unplugged => "unplugged",
    }
}

fn session_state_name(state: SessionState) -> &'static str {
    match state {
        SessionState::Inactive => "inactive",
        SessionState::Active => "active",
        SessionState::Expired => "expired",
    }
}

fn outcome_name(outcome: ControlOutcome) -> &'static str {
    match outcome {
        ControlOutcome::Applied => "applied",
        ControlOutcome::UnknownChannel => "unknown_channel",
    }
}

// ============================================================================
// Engine Handle Type
// ============================================================================

/// Opaque handle to the mixer engine. Actually points to a MixerEngine struct.
pub type MixerEngineHandle = *mut c_void;

/// Internal engine state.
struct MixerEngine {
    app: MixerApp,
}

impl MixerEngine {
    fn new(config: MixerConfig) -> Result<Self, FfiError> {
        let backend = default_backend()?;
        Self::with_backend(backend, Rc::new(SystemProcessTable::new()), config)
    }

    fn with_backend(
        backend: Rc<dyn AudioBackend>,
        processes: Rc<dyn ProcessTable>,
        config: MixerConfig,
    ) -> Result<Self, FfiError> {
        Ok(Self {
            app: MixerApp::new(backend, processes, config)?,
        })
    }

    fn into_handle(self) -> MixerEngineHandle {
        Box::into_raw(Box::new(self)) as MixerEngineHandle
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Allocate a C string from a Rust string. Caller must free with mixer_engine_free_string.
fn alloc_c_string(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cs) => cs.into_raw(),
        // String contained a null byte, replace with empty
        Err(_) => CString::default().into_raw(),
    }
}

/// Parse a C string to a Rust string slice.
unsafe fn parse_c_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

fn required_str<'a>(ptr: *const c_char, what: &str) -> Result<&'a str, FfiError> {
    // SAFETY: the caller passes either null or a NUL-terminated string that
    // outlives the call.
    unsafe { parse_c_str(ptr) }
        .ok_or_else(|| FfiError::new(ErrorCode::InvalidArgument, format!("Invalid {what}")))
}

fn engine_mut<'a>(handle: MixerEngineHandle) -> Result<&'a mut MixerEngine, FfiError> {
    if handle.is_null() {
        return Err(FfiError::new(ErrorCode::InvalidHandle, "Null engine handle"));
    }
    // SAFETY: non-null handles come from mixer_engine_create and are only
    // used from the creating thread until mixer_engine_destroy.
    Ok(unsafe { &mut *(handle as *mut MixerEngine) })
}

/// Run an operation returning a status code.
fn run_code<F>(context: &str, f: F) -> i32
where
    F: FnOnce() -> Result<ErrorCode, FfiError>,
{
    clear_last_error();
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(code)) => code as i32,
        Ok(Err(e)) => {
            set_last_error(e.code, e.message);
            e.code as i32
        }
        Err(_) => {
            set_last_error(ErrorCode::Panic, format!("Panic during {context}"));
            ErrorCode::Panic as i32
        }
    }
}

/// Run an operation returning a JSON document, or null on failure.
fn run_json<T, F>(context: &str, f: F) -> *mut c_char
where
    T: Serialize,
    F: FnOnce() -> Result<T, FfiError>,
{
    clear_last_error();
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let value = f()?;
        Ok::<_, FfiError>(serde_json::to_string(&value)?)
    }));

    match result {
        Ok(Ok(json)) => alloc_c_string(&json),
        Ok(Err(e)) => {
            set_last_error(e.code, e.message);
            ptr::null_mut()
        }
        Err(_) => {
            set_last_error(ErrorCode::Panic, format!("Panic during {context}"));
            ptr::null_mut()
        }
    }
}

fn outcome_code(result: Result<ControlOutcome, AudioError>) -> Result<ErrorCode, FfiError> {
    match result? {
        ControlOutcome::Applied => Ok(ErrorCode::Success),
        ControlOutcome::UnknownChannel => Ok(ErrorCode::UnknownChannel),
    }
}

// ============================================================================
// FFI Functions - Lifecycle
// ============================================================================

/// Create a new mixer engine instance.
///
/// # Arguments
/// * `config_json` - JSON configuration string (can be null for defaults)
///
/// # Returns
/// Handle to the engine, or null on failure. Check mixer_engine_last_error_code() on failure.
///
/// # Safety
/// The returned handle must be freed with mixer_engine_destroy().
#[no_mangle]
pub extern "C" fn mixer_engine_create(config_json: *const c_char) -> MixerEngineHandle {
    clear_last_error();

    let result = panic::catch_unwind(|| -> Result<MixerEngineHandle, FfiError> {
        let config = if config_json.is_null() {
            MixerConfig::default()
        } else {
            MixerConfig::from_json(required_str(config_json, "config JSON")?)?
        };
        init_tracing(config.log_level.as_deref());
        info!(version = env!("CARGO_PKG_VERSION"), "Mixer engine starting");

        Ok(MixerEngine::new(config)?.into_handle())
    });

    match result {
        Ok(Ok(handle)) => handle,
        Ok(Err(e)) => {
            warn!(error = %e.message, "Engine creation failed");
            set_last_error(e.code, e.message);
            ptr::null_mut()
        }
        Err(_) => {
            set_last_error(ErrorCode::Panic, "Panic during engine creation");
            ptr::null_mut()
        }
    }
}

/// Destroy a mixer engine instance.
///
/// # Safety
/// The handle must have been created by mixer_engine_create() and must not be used after this call.
#[no_mangle]
pub extern "C" fn mixer_engine_destroy(handle: MixerEngineHandle) {
    if handle.is_null() {
        return;
    }

    let _ = panic::catch_unwind(|| unsafe {
        let mut engine = Box::from_raw(handle as *mut MixerEngine);
        engine.app.shutdown();
    });
}

// ============================================================================
// FFI Functions - State
// ============================================================================

/// Get the current mixer state.
///
/// # Returns
/// JSON snapshot. Caller must free with mixer_engine_free_string().
/// Returns null on failure.
#[no_mangle]
pub extern "C" fn mixer_engine_snapshot(handle: MixerEngineHandle) -> *mut c_char {
    run_json("snapshot", || {
        let engine = engine_mut(handle)?;
        Ok(SnapshotDto::new(
            engine.app.snapshot(),
            engine.app.error_message.clone(),
        ))
    })
}

/// Run whatever work is due: device events, deferred mute re-assertions and
/// the periodic refresh. Call from a UI timer.
///
/// # Returns
/// 0 if no refresh ran, 1 after a volume refresh, 2 after a session re-scan,
/// negative error code on failure.
#[no_mangle]
pub extern "C" fn mixer_engine_tick(handle: MixerEngineHandle) -> i32 {
    clear_last_error();

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        engine_mut(handle).map(|engine| engine.app.pump(Instant::now()))
    }));

    match result {
        Ok(Ok(None)) => 0,
        Ok(Ok(Some(TickKind::Refresh))) => 1,
        Ok(Ok(Some(TickKind::Rescan))) => 2,
        Ok(Err(e)) => {
            set_last_error(e.code, e.message);
            e.code as i32
        }
        Err(_) => {
            set_last_error(ErrorCode::Panic, "Panic during tick");
            ErrorCode::Panic as i32
        }
    }
}

/// Re-scan the selected endpoint for audio sessions.
///
/// # Returns
/// 0 on success, negative error code on failure.
#[no_mangle]
pub extern "C" fn mixer_engine_rematch(handle: MixerEngineHandle) -> i32 {
    run_code("rematch", || {
        engine_mut(handle)?.app.rematch();
        Ok(ErrorCode::Success)
    })
}

/// Enumerate endpoints in every state for diagnostics, then re-scan.
///
/// # Returns
/// JSON report. Caller must free with mixer_engine_free_string().
/// Returns null on failure.
#[no_mangle]
pub extern "C" fn mixer_engine_force_detect(handle: MixerEngineHandle) -> *mut c_char {
    run_json("force detect", || {
        let reports = engine_mut(handle)?.app.force_detect()?;
        Ok(DetectResponse {
            endpoints: reports.into_iter().map(Into::into).collect(),
        })
    })
}

/// Select the playback endpoint whose channels are shown.
///
/// # Arguments
/// * `handle` - Engine handle
/// * `name` - Endpoint friendly name (UTF-8 string)
///
/// # Returns
/// 0 on success, negative error code on failure.
#[no_mangle]
pub extern "C" fn mixer_engine_select_endpoint(
    handle: MixerEngineHandle,
    name: *const c_char,
) -> i32 {
    run_code("select endpoint", || {
        let name = required_str(name, "endpoint name")?;
        engine_mut(handle)?.app.select_endpoint(name)?;
        Ok(ErrorCode::Success)
    })
}

// ============================================================================
// FFI Functions - Control
// ============================================================================

/// Apply a JSON control intent, e.g.
/// `{"type":"set_volume","channel":"Discord","level":40}`.
///
/// # Returns
/// JSON operation result. Caller must free with mixer_engine_free_string().
/// Returns null if the handle or JSON is invalid.
#[no_mangle]
pub extern "C" fn mixer_engine_apply_intent(
    handle: MixerEngineHandle,
    intent_json: *const c_char,
) -> *mut c_char {
    run_json("apply intent", || {
        let intent: IntentDto = serde_json::from_str(required_str(intent_json, "intent JSON")?)?;
        let engine = engine_mut(handle)?;

        Ok(match engine.app.apply(intent.into(), Instant::now()) {
            Ok(outcome) => OperationResult {
                success: true,
                outcome: Some(outcome_name(outcome).to_string()),
                error: None,
                error_code: None,
            },
            Err(e) => OperationResult {
                success: false,
                outcome: None,
                error_code: Some(ErrorCode::from(&e) as i32),
                error: Some(e.to_string()),
            },
        })
    })
}

/// Set the volume of a channel.
///
/// # Arguments
/// * `handle` - Engine handle
/// * `name` - Channel name (UTF-8 string)
/// * `volume` - Volume level (0.0 to 1.0)
///
/// # Returns
/// 0 on success, 1 if no such channel exists, negative error code on failure.
#[no_mangle]
pub extern "C" fn mixer_engine_set_volume(
    handle: MixerEngineHandle,
    name: *const c_char,
    volume: f32,
) -> i32 {
    run_code("set volume", || {
        let name = required_str(name, "channel name")?;
        outcome_code(engine_mut(handle)?.app.set_volume(name, volume))
    })
}

/// Set the mute state of a channel.
///
/// # Arguments
/// * `handle` - Engine handle
/// * `name` - Channel name (UTF-8 string)
/// * `muted` - 1 = muted, 0 = unmuted
///
/// # Returns
/// 0 on success, 1 if no such channel exists, negative error code on failure.
#[no_mangle]
pub extern "C" fn mixer_engine_set_mute(
    handle: MixerEngineHandle,
    name: *const c_char,
    muted: i32,
) -> i32 {
    run_code("set mute", || {
        let name = required_str(name, "channel name")?;
        outcome_code(
            engine_mut(handle)?
                .app
                .set_mute(name, muted != 0, Instant::now()),
        )
    })
}

// ============================================================================
// FFI Functions - Memory Management
// ============================================================================

/// Free a string allocated by this library.
///
/// # Safety
/// The pointer must have been returned by one of the mixer_engine_* functions.
/// Do not call this on strings from other sources.
#[no_mangle]
pub extern "C" fn mixer_engine_free_string(ptr: *mut c_char) {
    if ptr.is_null() {
        return;
    }

    let _ = panic::catch_unwind(|| unsafe {
        let _ = CString::from_raw(ptr);
    });
}

// ============================================================================
// FFI Functions - Error Handling
// ============================================================================

/// Get the last error code.
///
/// # Returns
/// The error code from the last failed operation, or 0 if no error.
#[no_mangle]
pub extern "C" fn mixer_engine_last_error_code() -> i32 {
    LAST_ERROR.with(|e| {
        e.borrow()
            .as_ref()
            .map(|(code, _)| *code as i32)
            .unwrap_or(0)
    })
}

/// Get the last error message.
///
/// # Returns
/// Error message string. Caller must free with mixer_engine_free_string().
/// Returns null if no error.
#[no_mangle]
pub extern "C" fn mixer_engine_last_error_message() -> *mut c_char {
    LAST_ERROR.with(|e| {
        e.borrow()
            .as_ref()
            .map(|(_, msg)| alloc_c_string(msg))
            .unwrap_or(ptr::null_mut())
    })
}

// ============================================================================
// FFI Functions - Utility
// ============================================================================

/// Get the library version.
///
/// # Returns
/// Version string. Caller must free with mixer_engine_free_string().
#[no_mangle]
pub extern "C" fn mixer_engine_version() -> *mut c_char {
    alloc_c_string(env!("CARGO_PKG_VERSION"))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use mixer_rs::audio::simulated::{SimulatedBackend, SimulatedProcesses, SimulatedSession};

    struct Harness {
        sim: SimulatedBackend,
        handle: MixerEngineHandle,
    }

    impl Harness {
        fn new() -> Self {
            let sim = SimulatedBackend::new();
            sim.add_endpoint("Speakers");
            sim.add_endpoint("Headphones");
            sim.add_session("Speakers", SimulatedSession::new("game", 100).with_volume(0.8));
            sim.add_session("Speakers", SimulatedSession::new("voice", 200).with_volume(0.6));

            let processes = SimulatedProcesses::new();
            processes.add(100, "game.exe", None);
            processes.add(200, "Discord.exe", Some("Discord"));

            let handle = MixerEngine::with_backend(
                Rc::new(sim.clone()),
                Rc::new(processes),
                MixerConfig::default(),
            )
            .unwrap()
            .into_handle();
            Self { sim, handle }
        }

        fn snapshot(&self) -> SnapshotDto {
            take_json(mixer_engine_snapshot(self.handle))
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            mixer_engine_destroy(self.handle);
        }
    }

    fn take_json<T: serde::de::DeserializeOwned>(ptr: *mut c_char) -> T {
        assert!(!ptr.is_null());
        let value = unsafe { serde_json::from_str(CStr::from_ptr(ptr).to_str().unwrap()).unwrap() };
        mixer_engine_free_string(ptr);
        value
    }

    fn c(s: &str) -> CString {
        CString::new(s).unwrap()
    }

    #[test]
    fn test_error_code_conversion() {
        assert_eq!(
            ErrorCode::from(&AudioError::EndpointNotFound {
                name: "test".to_string()
            }),
            ErrorCode::EndpointNotFound
        );
        assert_eq!(
            ErrorCode::from(&AudioError::Unsupported("Redirect")),
            ErrorCode::NotSupported
        );
    }

    #[test]
    fn test_version() {
        let version = mixer_engine_version();
        assert!(!version.is_null());
        unsafe {
            let s = CStr::from_ptr(version).to_str().unwrap();
            assert!(!s.is_empty());
        }
        mixer_engine_free_string(version);
    }

    #[test]
    fn test_null_handle() {
        let name = c("Master Volume");
        assert_eq!(
            mixer_engine_set_volume(ptr::null_mut(), name.as_ptr(), 0.5),
            ErrorCode::InvalidHandle as i32
        );
        assert_eq!(mixer_engine_last_error_code(), ErrorCode::InvalidHandle as i32);
        assert!(mixer_engine_snapshot(ptr::null_mut()).is_null());
    }

    #[test]
    fn test_invalid_config_json() {
        let json = c("{ \"poll_interval_ms\": 0 }");
        assert!(mixer_engine_create(json.as_ptr()).is_null());
        assert_eq!(mixer_engine_last_error_code(), ErrorCode::ConfigError as i32);

        let json = c("not json");
        assert!(mixer_engine_create(json.as_ptr()).is_null());
        assert_eq!(mixer_engine_last_error_code(), ErrorCode::JsonError as i32);
    }

    #[test]
    fn test_snapshot_json() {
        let harness = Harness::new();
        let snapshot = harness.snapshot();

        assert_eq!(snapshot.endpoint.as_deref(), Some("Speakers"));
        assert_eq!(snapshot.endpoints, vec!["Speakers", "Headphones"]);
        assert!(!snapshot.empty);
        let names: Vec<_> = snapshot.channels.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Master Volume", "game.exe", "Discord.exe - Discord"]);
        assert_eq!(snapshot.channels[0].kind, "master");
        assert_eq!(snapshot.channels[1].volume, 0.8);
    }

    #[test]
    fn test_set_volume_and_unknown_channel() {
        let harness = Harness::new();
        let name = c("game.exe");
        assert_eq!(mixer_engine_set_volume(harness.handle, name.as_ptr(), 0.25), 0);
        assert_eq!(harness.sim.session_volume(0), Some(0.25));

        let missing = c("does-not-exist");
        assert_eq!(
            mixer_engine_set_volume(harness.handle, missing.as_ptr(), 0.5),
            ErrorCode::UnknownChannel as i32
        );
        assert_eq!(
            mixer_engine_set_mute(harness.handle, missing.as_ptr(), 1),
            ErrorCode::UnknownChannel as i32
        );
    }

    #[test]
    fn test_apply_intent_json() {
        let harness = Harness::new();
        let intent = c(r#"{"type":"set_mute","channel":"Discord.exe - Discord","muted":true}"#);
        let result: OperationResult =
            take_json(mixer_engine_apply_intent(harness.handle, intent.as_ptr()));
        assert!(result.success);
        assert_eq!(result.outcome.as_deref(), Some("applied"));
        assert_eq!(harness.sim.session_muted(1), Some(true));
        assert_eq!(harness.sim.session_volume(1), Some(0.0));

        let intent = c(r#"{"type":"redirect","channel":"game.exe","endpoint":"Headphones"}"#);
        let result: OperationResult =
            take_json(mixer_engine_apply_intent(harness.handle, intent.as_ptr()));
        assert!(!result.success);
        assert_eq!(result.error_code, Some(ErrorCode::NotSupported as i32));
    }

    #[test]
    fn test_select_endpoint() {
        let harness = Harness::new();
        let name = c("Headphones");
        assert_eq!(mixer_engine_select_endpoint(harness.handle, name.as_ptr()), 0);
        let snapshot = harness.snapshot();
        assert_eq!(snapshot.endpoint.as_deref(), Some("Headphones"));
        assert!(snapshot.empty);

        let name = c("HDMI");
        assert_eq!(
            mixer_engine_select_endpoint(harness.handle, name.as_ptr()),
            ErrorCode::EndpointNotFound as i32
        );
    }

    #[test]
    fn test_force_detect_json() {
        let harness = Harness::new();
        harness
            .sim
            .add_endpoint_with_state("HDMI", EndpointState::NotPresent);
        let report: DetectResponse = take_json(mixer_engine_force_detect(harness.handle));

        assert_eq!(report.endpoints.len(), 3);
        assert_eq!(report.endpoints[0].sessions.len(), 2);
        assert_eq!(report.endpoints[2].state, "not_present");
        assert_eq!(harness.sim.live_endpoint_handles(), 2);
    }

    #[test]
    fn test_tick_before_period_does_nothing() {
        let harness = Harness::new();
        assert_eq!(mixer_engine_tick(harness.handle), 0);
        assert_eq!(mixer_engine_rematch(harness.handle), 0);
    }
}
