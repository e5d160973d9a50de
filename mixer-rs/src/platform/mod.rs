//! Platform-specific helpers.
//!
//! Window titles are only available on Windows; other platforms report none.

#[cfg(windows)]
mod win32;

use std::collections::HashMap;

/// Main window title of every process that has one.
#[cfg(windows)]
pub fn main_window_titles() -> HashMap<u32, String> {
    win32::main_window_titles()
}

#[cfg(not(windows))]
pub fn main_window_titles() -> HashMap<u32, String> {
    HashMap::new()
}

/// Main window title of a single process.
#[cfg(windows)]
pub fn main_window_title(pid: u32) -> Option<String> {
    win32::main_window_title(pid)
}

#[cfg(not(windows))]
pub fn main_window_title(_pid: u32) -> Option<String> {
    None
}
