//! Process table introspection.
//!
//! Resolves process ids to names and main window titles. Used only as a
//! naming hint; every lookup may fail because the process exited or denied
//! access, and callers treat that as a soft failure.

use crate::audio::AudioError;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    /// Executable name as reported by the OS (e.g. `chrome.exe`)
    pub name: String,
    /// Title of the process's main window, if it has one
    pub window_title: Option<String>,
}

/// Source of live process information.
pub trait ProcessTable {
    fn list_processes(&self) -> Result<Vec<ProcessInfo>, AudioError>;

    fn process_by_id(&self, pid: u32) -> Result<ProcessInfo, AudioError>;
}

/// Process table backed by the operating system.
#[derive(Debug, Default)]
pub struct SystemProcessTable;

impl SystemProcessTable {
    pub fn new() -> Self {
        Self
    }

    fn snapshot() -> System {
        let refresh = RefreshKind::new().with_processes(ProcessRefreshKind::new());
        System::new_with_specifics(refresh)
    }
}

impl ProcessTable for SystemProcessTable {
    fn list_processes(&self) -> Result<Vec<ProcessInfo>, AudioError> {
        let sys = Self::snapshot();
        let titles = crate::platform::main_window_titles();

        Ok(sys
            .processes()
            .iter()
            .map(|(pid, process)| {
                let pid = pid.as_u32();
                ProcessInfo {
                    pid,
                    name: process.name().to_string_lossy().to_string(),
                    window_title: titles.get(&pid).cloned(),
                }
            })
            .collect())
    }

    /// Refreshes only `pid`, not the whole table.
    fn process_by_id(&self, pid: u32) -> Result<ProcessInfo, AudioError> {
        let target = Pid::from_u32(pid);
        let mut sys = System::new();
        sys.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[target]),
            true,
            ProcessRefreshKind::new(),
        );
        let process = sys
            .process(target)
            .ok_or_else(|| AudioError::ProcessUnavailable {
                pid,
                reason: "Process has exited".to_string(),
            })?;

        let name = process.name().to_string_lossy().to_string();
        if name.is_empty() {
            return Err(AudioError::ProcessUnavailable {
                pid,
                reason: "Process name is not accessible".to_string(),
            });
        }

        Ok(ProcessInfo {
            pid,
            name,
            window_title: crate::platform::main_window_title(pid),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_own_process() {
        let table = SystemProcessTable::new();
        let pid = std::process::id();

        let process = table.process_by_id(pid).unwrap();
        assert_eq!(process.pid, pid);
        assert!(!process.name.is_empty());
        assert!(table.list_processes().unwrap().iter().any(|p| p.pid == pid));
    }

    #[test]
    fn test_missing_process_is_soft_failure() {
        let table = SystemProcessTable::new();
        assert!(matches!(
            table.process_by_id(u32::MAX),
            Err(AudioError::ProcessUnavailable { pid: u32::MAX, .. })
        ));
    }
}
