use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use reqwest::blocking::Client;
use tauri::AppHandle;
use tracing::{error, info};

use crate::core::events;

use super::provision::{build_plan, clean_stale_parts, execute_plan, HttpFetcher};
use super::remote::fetch_remote;
use super::schema::Manifest;
use super::store::ManifestStore;

#[derive(Debug, Clone)]
pub struct ProvisionJob;

/// Runs provisioning passes on a dedicated worker thread so the command
/// handlers never block on the network. Each job emits the
/// `provision-assets` stream: percent strings, then `complete` or
/// `failed`.
pub struct ProvisionService {
    sender: Sender<ProvisionJob>,
}

impl Clone for ProvisionService {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl ProvisionService {
    pub fn new(
        app: AppHandle,
        store: Arc<ManifestStore>,
        remote_cache: Arc<Mutex<Option<Manifest>>>,
    ) -> Self {
        let (sender, receiver) = unbounded();
        thread::spawn(move || worker_loop(receiver, app, store, remote_cache));
        Self { sender }
    }

    pub fn queue(&self) -> Result<()> {
        self.sender
            .send(ProvisionJob)
            .context("send provisioning job to worker")
    }
}

fn worker_loop(
    receiver: Receiver<ProvisionJob>,
    app: AppHandle,
    store: Arc<ManifestStore>,
    remote_cache: Arc<Mutex<Option<Manifest>>>,
) {
    let client = Client::new();
    for _job in receiver.iter() {
        match run_pass(&app, &client, &store, &remote_cache) {
            Ok(()) => events::emit_provision_complete(&app),
            Err(err) => {
                error!("provisioning failed: {err}");
                events::emit_provision_failed(&app);
            }
        }
    }
}

fn run_pass(
    app: &AppHandle,
    client: &Client,
    store: &ManifestStore,
    remote_cache: &Mutex<Option<Manifest>>,
) -> Result<(), super::provision::ProvisionError> {
    let remote = fetch_remote(client)?;
    *remote_cache.lock() = Some(remote.clone());

    let local = store.load();
    clean_stale_parts(store);

    let plan = build_plan(store, local.as_ref(), &remote);
    if plan.is_empty() {
        info!("assets already up to date");
        return Ok(());
    }

    info!("provisioning {} files", plan.len());
    let mut fetcher = HttpFetcher::new(client.clone());
    execute_plan(&plan, &mut fetcher, |percent| {
        events::emit_provision_progress(app, percent);
    })
}
