use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, bail, Result};
use parking_lot::Mutex;
use reqwest::blocking::Client;
use serde::Deserialize;
use tauri::AppHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::core::credentials::CredentialStore;
use crate::core::events::{self, EngineOutputPayload};
#[cfg(debug_assertions)]
use crate::core::transcript;
use crate::engine::{
    engine_executable, frame_ratio_percent, is_frame_run_complete, is_init_complete, percent_token,
    EngineCommand, EngineProcess, EngineStage, OutputChannel, RunMode,
};
use crate::manifest::{fetch_remote, Manifest, ManifestStore, SectionKind};

/// Background removal writes its frames into this subdirectory of the
/// run's output directory; the derender stage reads from there when
/// background removal ran first.
pub const BG_REMOVAL_SUBDIR: &str = "bgremoval";

/// A processing request as the frontend sends it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub mode: RunMode,
    pub input_dir: String,
    pub output_dir: String,
}

/// Per-run state, recorded when the run starts. Whether background
/// removal was requested is carried here for the whole run; the
/// derender input is resolved from this flag, never from what happens
/// to be on disk.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub id: Uuid,
    pub mode: RunMode,
    pub input: PathBuf,
    pub output: PathBuf,
    pub background_removal: bool,
}

impl RunPlan {
    fn from_request(request: &RunRequest, background_removal: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode: request.mode,
            input: PathBuf::from(&request.input_dir),
            output: PathBuf::from(&request.output_dir),
            background_removal,
        }
    }

    #[must_use]
    pub fn background_removal_output(&self) -> PathBuf {
        self.output.join(BG_REMOVAL_SUBDIR)
    }

    #[must_use]
    pub fn derender_input(&self) -> PathBuf {
        if self.background_removal {
            self.background_removal_output()
        } else {
            self.input.clone()
        }
    }
}

/// One engine invocation within a run.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStage {
    pub stage: EngineStage,
    pub input: PathBuf,
    pub output: PathBuf,
}

/// The stage sequence a run executes, in order.
#[must_use]
pub fn stages_for(plan: &RunPlan) -> Vec<PlannedStage> {
    let mut stages = Vec::with_capacity(2);
    if plan.background_removal {
        stages.push(PlannedStage {
            stage: EngineStage::RemoveBackground,
            input: plan.input.clone(),
            output: plan.background_removal_output(),
        });
    }
    stages.push(PlannedStage {
        stage: EngineStage::Derender,
        input: plan.derender_input(),
        output: plan.output.clone(),
    });
    stages
}

/// True when the engine must (re)download the model during init: the
/// remote's first-listed model version differs from the installed one,
/// or an installed model file is missing from disk.
#[must_use]
pub fn model_needs_update(
    store: &ManifestStore,
    local: Option<&Manifest>,
    remote: &Manifest,
) -> bool {
    let Some(target) = remote.model.first() else {
        return false;
    };
    let Some(installed) = local.and_then(|manifest| manifest.model.installed()) else {
        return true;
    };
    if installed.version != target.version {
        return true;
    }
    installed
        .files
        .iter()
        .any(|file| !store.file_destination(SectionKind::Model, file).exists())
}

/// Sequences the engine stages and relays their output to the frontend.
/// Stages are strictly sequential; a second run request while one is
/// active is rejected rather than queued.
pub struct LifecycleController {
    app: AppHandle,
    store: Arc<ManifestStore>,
    credentials: Arc<CredentialStore>,
    remote_cache: Arc<Mutex<Option<Manifest>>>,
    engine_running: Arc<AtomicBool>,
}

impl LifecycleController {
    pub fn new(
        app: AppHandle,
        store: Arc<ManifestStore>,
        credentials: Arc<CredentialStore>,
        remote_cache: Arc<Mutex<Option<Manifest>>>,
    ) -> Self {
        Self {
            app,
            store,
            credentials,
            remote_cache,
            engine_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawns the engine in init mode, deciding first whether it must
    /// download the model. Requires a stored credential.
    pub fn initialize_engine(&self) -> Result<()> {
        if !self.credentials.exists() {
            bail!("no API key configured");
        }
        let guard = RunGuard::acquire(&self.engine_running)
            .ok_or_else(|| anyhow!("engine is already running"))?;

        let app = self.app.clone();
        let store = self.store.clone();
        let credentials = self.credentials.clone();
        let remote_cache = self.remote_cache.clone();

        thread::spawn(move || {
            let _guard = guard;
            let run_id = Uuid::new_v4();

            let key = match credentials.read().key {
                Some(key) if !key.is_empty() => key,
                _ => {
                    emit_stage_failure(&app, events::EVENT_INITIALIZE, "API key file is empty");
                    return;
                }
            };
            let remote = match ensure_remote(&remote_cache) {
                Ok(remote) => remote,
                Err(err) => {
                    emit_stage_failure(
                        &app,
                        events::EVENT_INITIALIZE,
                        &format!("failed to fetch engine manifest: {err}"),
                    );
                    return;
                }
            };

            let local = store.load();
            let needs_model = model_needs_update(&store, local.as_ref(), &remote);
            let target_version = remote.model.first().map(|entry| entry.version.clone());
            info!(%run_id, needs_model, "initializing engine");

            let command = EngineCommand {
                stage: EngineStage::Init,
                model_path: store.section_dir(SectionKind::Model),
                input: None,
                output: None,
                api_key: key,
                download_model: if needs_model { target_version } else { None },
            };
            run_stage(&app, run_id, &store, events::EVENT_INITIALIZE, &command);
        });

        Ok(())
    }

    /// Starts a background-removal run; on completion the derender stage
    /// follows automatically with the bgremoval output as its input.
    pub fn start_background_removal(&self, request: RunRequest) -> Result<()> {
        self.start_run(RunPlan::from_request(&request, true))
    }

    /// Starts a derender-only run over the original input.
    pub fn start_derender(&self, request: RunRequest) -> Result<()> {
        self.start_run(RunPlan::from_request(&request, false))
    }

    fn start_run(&self, plan: RunPlan) -> Result<()> {
        if !self.credentials.exists() {
            bail!("no API key configured");
        }
        let guard = RunGuard::acquire(&self.engine_running)
            .ok_or_else(|| anyhow!("engine is already running"))?;

        let app = self.app.clone();
        let store = self.store.clone();
        let credentials = self.credentials.clone();

        thread::spawn(move || {
            let _guard = guard;
            let Some(key) = credentials.read().key.filter(|key| !key.is_empty()) else {
                let channel = stage_channel(stages_for(&plan)[0].stage);
                emit_stage_failure(&app, channel, "API key file is empty");
                return;
            };

            info!(
                run_id = %plan.id,
                mode = ?plan.mode,
                background_removal = plan.background_removal,
                "starting run"
            );
            for spec in stages_for(&plan) {
                if let Err(error) = fs::create_dir_all(&spec.output) {
                    emit_stage_failure(
                        &app,
                        stage_channel(spec.stage),
                        &format!("failed to create output directory: {error}"),
                    );
                    return;
                }
                let command = EngineCommand {
                    stage: spec.stage,
                    model_path: store.section_dir(SectionKind::Model),
                    input: Some(spec.input.clone()),
                    output: Some(spec.output.clone()),
                    api_key: key.clone(),
                    download_model: None,
                };
                let completed =
                    run_stage(&app, plan.id, &store, stage_channel(spec.stage), &command);
                if !completed {
                    warn!(run_id = %plan.id, stage = ?spec.stage, "stage ended without its completion marker");
                    return;
                }
            }
            info!(run_id = %plan.id, "run finished");
        });

        Ok(())
    }

    /// Overwrites the local manifest with the remote manifest fetched
    /// earlier in this session. Only called after a successful engine
    /// initialization, so a failed cycle leaves the local manifest stale
    /// and the next provisioning pass re-evaluates from scratch.
    pub fn refresh_local_manifest(&self) -> Result<()> {
        let remote = self
            .remote_cache
            .lock()
            .clone()
            .ok_or_else(|| anyhow!("no remote manifest fetched this session"))?;
        self.store.save(&remote)
    }
}

fn ensure_remote(cache: &Mutex<Option<Manifest>>) -> Result<Manifest> {
    if let Some(remote) = cache.lock().clone() {
        return Ok(remote);
    }
    let remote = fetch_remote(&Client::new())?;
    *cache.lock() = Some(remote.clone());
    Ok(remote)
}

fn stage_channel(stage: EngineStage) -> &'static str {
    match stage {
        EngineStage::Init => events::EVENT_INITIALIZE,
        EngineStage::RemoveBackground => events::EVENT_REMOVE_BG,
        EngineStage::Derender => events::EVENT_DERENDER,
    }
}

/// Spawns one engine invocation and forwards its output until the stage's
/// terminal marker. Returns whether the marker was seen; a process that
/// exits without it leaves the stage incomplete (no retry, no timeout).
fn run_stage(
    app: &AppHandle,
    run_id: Uuid,
    store: &ManifestStore,
    channel: &'static str,
    command: &EngineCommand,
) -> bool {
    let engine_dir = store.section_dir(SectionKind::Engine);
    let executable = engine_executable(&engine_dir);
    let process = match EngineProcess::spawn(&executable, &command.to_args(), &engine_dir) {
        Ok(process) => process,
        Err(err) => {
            error!(%run_id, "engine failed to start: {err:#}");
            emit_stage_failure(app, channel, &format!("engine failed to start: {err:#}"));
            return false;
        }
    };

    let subscription = StageSubscription::open(app, channel, process);
    subscription.forward(command.stage)
}

fn emit_stage_failure(app: &AppHandle, channel: &str, description: &str) {
    error!("{description}");
    let payload = EngineOutputPayload {
        description: description.to_string(),
        is_progress: false,
        progress: None,
        is_complete: false,
    };
    events::emit_engine_output(app, channel, &payload);
}

/// Scoped subscription of one stage's event channel to one process's
/// output. `forward` consumes the subscription: when it returns, the
/// process receiver is dropped, so a straggling process cannot leak
/// chunks into a later stage reusing the same channel.
struct StageSubscription<'a> {
    app: &'a AppHandle,
    channel: &'static str,
    process: EngineProcess,
}

impl<'a> StageSubscription<'a> {
    fn open(app: &'a AppHandle, channel: &'static str, process: EngineProcess) -> Self {
        Self {
            app,
            channel,
            process,
        }
    }

    fn forward(self, stage: EngineStage) -> bool {
        for chunk in self.process.output().iter() {
            #[cfg(debug_assertions)]
            transcript::push_line(chunk.text.as_str());

            let mut payload = EngineOutputPayload::from_channel(chunk.channel, chunk.text.clone());
            payload.progress = match stage {
                EngineStage::Init => {
                    if chunk.channel == OutputChannel::Stderr {
                        percent_token(&chunk.text)
                    } else {
                        None
                    }
                }
                _ => frame_ratio_percent(&chunk.text),
            };
            let complete = match stage {
                EngineStage::Init => is_init_complete(&chunk.text),
                _ => is_frame_run_complete(&chunk.text),
            };
            payload.is_complete = complete;
            events::emit_engine_output(self.app, self.channel, &payload);

            if complete {
                return true;
            }
        }
        false
    }
}

/// Holds the single-run flag for the duration of a run; releases it on
/// drop so every exit path, including panics in the worker, clears it.
struct RunGuard {
    flag: Arc<AtomicBool>,
}

impl RunGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { flag: flag.clone() })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{Section, SectionEntry};

    fn request(mode: RunMode) -> RunRequest {
        RunRequest {
            mode,
            input_dir: "/work/in".into(),
            output_dir: "/work/out".into(),
        }
    }

    #[test]
    fn run_with_background_removal_chains_both_stages() {
        let plan = RunPlan::from_request(&request(RunMode::ImageSequence), true);
        let stages = stages_for(&plan);
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0].stage, EngineStage::RemoveBackground);
        assert_eq!(stages[1].stage, EngineStage::Derender);
        assert_eq!(stages[1].input, stages[0].output);
        assert_eq!(stages[0].output, PathBuf::from("/work/out/bgremoval"));
        assert_eq!(stages[1].output, PathBuf::from("/work/out"));
    }

    #[test]
    fn run_without_background_removal_derenders_original_input() {
        let plan = RunPlan::from_request(&request(RunMode::Video), false);
        let stages = stages_for(&plan);
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0].stage, EngineStage::Derender);
        assert_eq!(stages[0].input, PathBuf::from("/work/in"));
        assert_eq!(stages[0].output, PathBuf::from("/work/out"));
    }

    fn model_manifest(version: &str, files: &[&str]) -> Manifest {
        Manifest {
            model: Section::new(vec![SectionEntry {
                version: version.into(),
                files: files.iter().map(|f| f.to_string()).collect(),
            }]),
            ..Manifest::default()
        }
    }

    #[test]
    fn model_update_needed_without_local_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::with_root(dir.path().to_path_buf());
        let remote = model_manifest("2024-05-01", &["derender.onnx"]);
        assert!(model_needs_update(&store, None, &remote));
    }

    #[test]
    fn model_update_needed_on_version_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::with_root(dir.path().to_path_buf());
        let local = model_manifest("2024-01-01", &["derender.onnx"]);
        let remote = model_manifest("2024-05-01", &["derender.onnx"]);
        assert!(model_needs_update(&store, Some(&local), &remote));
    }

    #[test]
    fn model_update_needed_when_installed_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::with_root(dir.path().to_path_buf());
        let local = model_manifest("2024-05-01", &["derender.onnx"]);
        let remote = model_manifest("2024-05-01", &["derender.onnx"]);
        assert!(model_needs_update(&store, Some(&local), &remote));
    }

    #[test]
    fn model_up_to_date_when_version_matches_and_files_exist() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::with_root(dir.path().to_path_buf());
        let local = model_manifest("2024-05-01", &["derender.onnx"]);
        let remote = model_manifest("2024-05-01", &["derender.onnx"]);
        let file = store.file_destination(SectionKind::Model, "derender.onnx");
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, b"weights").unwrap();
        assert!(!model_needs_update(&store, Some(&local), &remote));
    }

    #[test]
    fn run_guard_is_exclusive_and_releases_on_drop() {
        let flag = Arc::new(AtomicBool::new(false));
        let guard = RunGuard::acquire(&flag).unwrap();
        assert!(RunGuard::acquire(&flag).is_none());
        drop(guard);
        assert!(RunGuard::acquire(&flag).is_some());
    }
}
