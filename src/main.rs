#![cfg_attr(
    all(not(debug_assertions), target_os = "windows"),
    windows_subsystem = "windows"
)]

mod core;
mod engine;
mod manifest;

use crate::core::{app_state::AppState, credentials::CredentialStatus, lifecycle::RunRequest};

use tauri::{AppHandle, Manager};
use tracing::metadata::LevelFilter;

#[tauri::command]
async fn provision_assets(app: AppHandle, state: tauri::State<'_, AppState>) -> tauri::Result<()> {
    state
        .queue_provisioning(&app)
        .map_err(tauri::Error::from)
}

#[tauri::command]
async fn read_api_key(state: tauri::State<'_, AppState>) -> tauri::Result<CredentialStatus> {
    Ok(state.credentials().read())
}

#[tauri::command]
async fn submit_api_key(state: tauri::State<'_, AppState>, key: String) -> tauri::Result<()> {
    state.credentials().write(&key).map_err(tauri::Error::from)
}

#[tauri::command]
async fn initialize_engine(state: tauri::State<'_, AppState>) -> tauri::Result<()> {
    state
        .controller()
        .and_then(|controller| controller.initialize_engine())
        .map_err(tauri::Error::from)
}

#[tauri::command]
async fn refresh_local_manifest(state: tauri::State<'_, AppState>) -> tauri::Result<()> {
    state
        .controller()
        .and_then(|controller| controller.refresh_local_manifest())
        .map_err(tauri::Error::from)
}

/// Native chooser for an input file or directory. `None` means the user
/// cancelled, which callers treat as "no change".
#[tauri::command]
fn select_path(kind: String) -> Option<String> {
    let dialog = rfd::FileDialog::new();
    let chosen = match kind.as_str() {
        "file" => dialog.pick_file(),
        _ => dialog.pick_folder(),
    };
    chosen.map(|path| path.to_string_lossy().to_string())
}

#[tauri::command]
async fn run_remove_background(
    state: tauri::State<'_, AppState>,
    request: RunRequest,
) -> tauri::Result<()> {
    state
        .controller()
        .and_then(|controller| controller.start_background_removal(request))
        .map_err(tauri::Error::from)
}

#[tauri::command]
async fn run_derender(
    state: tauri::State<'_, AppState>,
    request: RunRequest,
) -> tauri::Result<()> {
    state
        .controller()
        .and_then(|controller| controller.start_derender(request))
        .map_err(tauri::Error::from)
}

#[cfg(debug_assertions)]
#[tauri::command]
async fn recent_engine_output() -> Vec<String> {
    crate::core::transcript::snapshot()
}

fn setup_logging() {
    let filter = std::env::var("RELIGHT_LOG")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(LevelFilter::INFO);

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(false)
        .compact()
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn main() {
    setup_logging();

    tauri::Builder::default()
        .manage(AppState::new())
        .invoke_handler(tauri::generate_handler![
            provision_assets,
            read_api_key,
            submit_api_key,
            initialize_engine,
            refresh_local_manifest,
            select_path,
            run_remove_background,
            run_derender,
            #[cfg(debug_assertions)]
            recent_engine_output
        ])
        .setup(|app| {
            if let Some(state) = app.try_state::<AppState>() {
                let handle = app.handle();
                state.initialize(&handle);
                #[cfg(debug_assertions)]
                crate::core::transcript::initialize(&handle);
            }
            Ok(())
        })
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
