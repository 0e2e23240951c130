use serde::Serialize;
use tauri::{AppHandle, Emitter};

use crate::engine::OutputChannel;

pub const EVENT_PROVISION: &str = "provision-assets";
pub const EVENT_INITIALIZE: &str = "initialize-engine";
pub const EVENT_REMOVE_BG: &str = "run-remove-bg";
pub const EVENT_DERENDER: &str = "run-derender";

pub const PROVISION_COMPLETE: &str = "complete";
pub const PROVISION_FAILED: &str = "failed";

pub fn emit_provision_progress(app: &AppHandle, percent: u8) {
    let _ = app.emit(EVENT_PROVISION, percent.to_string());
}

pub fn emit_provision_complete(app: &AppHandle) {
    let _ = app.emit(EVENT_PROVISION, PROVISION_COMPLETE.to_string());
}

pub fn emit_provision_failed(app: &AppHandle) {
    let _ = app.emit(EVENT_PROVISION, PROVISION_FAILED.to_string());
}

/// One chunk of engine output as the frontend sees it: the verbatim text,
/// whether it came from the progress stream (stderr), a parsed percentage
/// when one was found, and whether this chunk ended the stage.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineOutputPayload {
    pub description: String,
    pub is_progress: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    pub is_complete: bool,
}

impl EngineOutputPayload {
    #[must_use]
    pub fn from_channel(channel: OutputChannel, description: String) -> Self {
        Self {
            description,
            is_progress: channel == OutputChannel::Stderr,
            progress: None,
            is_complete: false,
        }
    }
}

pub fn emit_engine_output(app: &AppHandle, channel: &str, payload: &EngineOutputPayload) {
    let _ = app.emit(channel, payload.clone());
}
