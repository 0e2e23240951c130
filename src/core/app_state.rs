use std::sync::Arc;

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use tauri::AppHandle;

use crate::core::credentials::CredentialStore;
use crate::core::lifecycle::LifecycleController;
use crate::manifest::{Manifest, ManifestStore, ProvisionService};

/// Long-lived components shared across command handlers. The controller
/// and provisioning service need an `AppHandle` to emit events, so they
/// are wired up in the Tauri setup hook rather than in `new`.
pub struct AppState {
    credentials: Arc<CredentialStore>,
    manifests: Arc<ManifestStore>,
    remote_cache: Arc<Mutex<Option<Manifest>>>,
    provisioner: Mutex<Option<ProvisionService>>,
    controller: Mutex<Option<Arc<LifecycleController>>>,
}

impl AppState {
    pub fn new() -> Self {
        let credentials = CredentialStore::new().expect("failed to initialize credential store");
        let manifests = ManifestStore::new().expect("failed to initialize manifest store");
        Self {
            credentials: Arc::new(credentials),
            manifests: Arc::new(manifests),
            remote_cache: Arc::new(Mutex::new(None)),
            provisioner: Mutex::new(None),
            controller: Mutex::new(None),
        }
    }

    pub fn initialize(&self, app: &AppHandle) {
        let controller = LifecycleController::new(
            app.clone(),
            self.manifests.clone(),
            self.credentials.clone(),
            self.remote_cache.clone(),
        );
        *self.controller.lock() = Some(Arc::new(controller));
    }

    pub fn credentials(&self) -> Arc<CredentialStore> {
        self.credentials.clone()
    }

    pub fn controller(&self) -> Result<Arc<LifecycleController>> {
        self.controller
            .lock()
            .as_ref()
            .cloned()
            .ok_or_else(|| anyhow!("lifecycle controller not initialized"))
    }

    pub fn queue_provisioning(&self, app: &AppHandle) -> Result<()> {
        let mut guard = self.provisioner.lock();
        let service = guard.get_or_insert_with(|| {
            ProvisionService::new(app.clone(), self.manifests.clone(), self.remote_cache.clone())
        });
        service.queue()
    }
}
