//! Main window titles via top-level window enumeration.

use std::collections::HashMap;
use windows::Win32::Foundation::{BOOL, HWND, LPARAM};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetWindowTextLengthW, GetWindowTextW, GetWindowThreadProcessId, IsWindowVisible,
};

/// Title of the first visible, titled top-level window of every process.
pub fn main_window_titles() -> HashMap<u32, String> {
    let mut titles: HashMap<u32, String> = HashMap::new();

    unsafe {
        // EnumWindows calls our callback for each top-level window
        let _ = EnumWindows(
            Some(collect_titles_callback),
            LPARAM(&mut titles as *mut HashMap<u32, String> as isize),
        );
    }

    titles
}

/// Search state for [`main_window_title`].
struct TitleSearch {
    pid: u32,
    title: Option<String>,
}

/// Title of the first visible, titled top-level window of `pid`.
pub fn main_window_title(pid: u32) -> Option<String> {
    let mut search = TitleSearch { pid, title: None };

    unsafe {
        // Stopping early makes EnumWindows report an error; the title is what matters
        let _ = EnumWindows(
            Some(find_title_callback),
            LPARAM(&mut search as *mut TitleSearch as isize),
        );
    }

    search.title
}

/// Owning process and title of a visible, titled window.
unsafe fn visible_window_title(hwnd: HWND) -> Option<(u32, String)> {
    if !IsWindowVisible(hwnd).as_bool() {
        return None;
    }

    let title_len = GetWindowTextLengthW(hwnd);
    if title_len == 0 {
        return None;
    }

    let mut title_buf = vec![0u16; (title_len + 1) as usize];
    let actual_len = GetWindowTextW(hwnd, &mut title_buf);
    if actual_len == 0 {
        return None;
    }

    let mut pid: u32 = 0;
    GetWindowThreadProcessId(hwnd, Some(&mut pid));
    if pid == 0 {
        return None;
    }

    Some((pid, String::from_utf16_lossy(&title_buf[..actual_len as usize])))
}

/// Keeps the first visible window with a title per process.
unsafe extern "system" fn collect_titles_callback(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let titles = &mut *(lparam.0 as *mut HashMap<u32, String>);

    if let Some((pid, title)) = visible_window_title(hwnd) {
        titles.entry(pid).or_insert(title);
    }

    BOOL(1) // Continue enumeration
}

/// Stops at the first visible window with a title owned by the searched process.
unsafe extern "system" fn find_title_callback(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let search = &mut *(lparam.0 as *mut TitleSearch);

    match visible_window_title(hwnd) {
        Some((pid, title)) if pid == search.pid => {
            search.title = Some(title);
            BOOL(0)
        }
        _ => BOOL(1),
    }
}
