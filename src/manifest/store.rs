use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use tracing::warn;

use super::schema::{Manifest, SectionKind};

const MANIFEST_FILE: &str = "engine-config.json";

/// Owns the on-disk asset layout: one subdirectory per manifest section
/// plus the local manifest file describing what is installed.
pub struct ManifestStore {
    root: PathBuf,
    manifest_path: PathBuf,
}

impl ManifestStore {
    pub fn new() -> Result<Self> {
        let root = resolve_asset_root()?;
        Ok(Self::with_root(root))
    }

    #[must_use]
    pub fn with_root(root: PathBuf) -> Self {
        let manifest_path = root.join(MANIFEST_FILE);
        Self {
            root,
            manifest_path,
        }
    }

    /// Reads the local manifest. A missing file, a parse failure, or a
    /// section carrying more than one version label all mean the same
    /// thing to provisioning: nothing reliably installed yet.
    #[must_use]
    pub fn load(&self) -> Option<Manifest> {
        if !self.manifest_path.exists() {
            return None;
        }
        let file = match File::open(&self.manifest_path) {
            Ok(file) => file,
            Err(error) => {
                warn!("failed to open local manifest: {error}");
                return None;
            }
        };
        let manifest: Manifest = match serde_json::from_reader(file) {
            Ok(manifest) => manifest,
            Err(error) => {
                warn!("failed to parse local manifest: {error}");
                return None;
            }
        };
        if !manifest.single_version_per_section() {
            warn!("local manifest lists multiple versions for a section, treating as absent");
            return None;
        }
        Some(manifest)
    }

    pub fn save(&self, manifest: &Manifest) -> Result<()> {
        fs::create_dir_all(&self.root).context("create asset root")?;
        let file = File::create(&self.manifest_path).context("create local manifest")?;
        serde_json::to_writer_pretty(file, manifest).context("write local manifest")?;
        Ok(())
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    #[must_use]
    pub fn section_dir(&self, kind: SectionKind) -> PathBuf {
        self.root.join(kind.dir_name())
    }

    #[must_use]
    pub fn file_destination(&self, kind: SectionKind, relative: &str) -> PathBuf {
        let mut path = self.section_dir(kind);
        for part in relative.split('/') {
            path.push(part);
        }
        path
    }
}

fn resolve_asset_root() -> Result<PathBuf> {
    let project_dirs = ProjectDirs::from("com", "RelightStudio", "RelightStudio")
        .context("missing project directories")?;
    let dir = project_dirs.data_dir().to_path_buf();
    fs::create_dir_all(&dir).context("create asset root")?;
    Ok(dir)
}
