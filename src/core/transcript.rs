use std::collections::VecDeque;
use std::sync::RwLock;

use once_cell::sync::Lazy;
use tauri::{AppHandle, Emitter, Runtime};

static TRANSCRIPT: Lazy<RwLock<VecDeque<String>>> =
    Lazy::new(|| RwLock::new(VecDeque::with_capacity(512)));

/// Ring buffer of recent engine output lines, for the debug log viewer.
pub fn push_line(line: impl Into<String>) {
    let mut buffer = TRANSCRIPT.write().expect("transcript buffer poisoned");
    if buffer.len() >= 512 {
        buffer.pop_front();
    }
    buffer.push_back(line.into());
}

pub fn snapshot() -> Vec<String> {
    TRANSCRIPT
        .read()
        .map(|buffer| buffer.iter().cloned().collect())
        .unwrap_or_default()
}

pub fn broadcast<R: Runtime>(app: &AppHandle<R>) {
    let _ = app.emit("engine-transcript", snapshot());
}

pub fn initialize<R: Runtime>(app: &AppHandle<R>) {
    let handle = app.clone();
    tauri::async_runtime::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));
        loop {
            interval.tick().await;
            broadcast(&handle);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_lines_in_arrival_order() {
        push_line("first");
        push_line("second");
        let lines = snapshot();
        let first = lines.iter().position(|l| l == "first").unwrap();
        let second = lines.iter().position(|l| l == "second").unwrap();
        assert!(first < second);
    }
}
