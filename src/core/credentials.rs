use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Serialize;

const KEY_FILE: &str = "api-key";

/// Result of a credential read. A missing file is the "not configured
/// yet" state, never an error.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialStatus {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// Persists the single API key as the entire contents of one file in the
/// config directory, outside the auto-updated install tree. The key is
/// stored verbatim and never validated locally.
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new() -> Result<Self> {
        let path = resolve_key_path()?;
        Ok(Self { path })
    }

    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    #[must_use]
    pub fn read(&self) -> CredentialStatus {
        match fs::read_to_string(&self.path) {
            Ok(contents) => CredentialStatus {
                exists: true,
                key: Some(contents.trim().to_string()),
            },
            Err(_) => CredentialStatus {
                exists: false,
                key: None,
            },
        }
    }

    pub fn write(&self, key: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("create credential directory")?;
        }
        fs::write(&self.path, key).context("write credential file")?;
        Ok(())
    }
}

fn resolve_key_path() -> Result<PathBuf> {
    let project_dirs = ProjectDirs::from("com", "RelightStudio", "RelightStudio")
        .context("missing project directories")?;
    let dir = project_dirs.config_dir();
    fs::create_dir_all(dir).context("create config directory")?;
    Ok(dir.join(KEY_FILE))
}
