use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use reqwest::blocking::Client;
use thiserror::Error;
use tracing::{debug, warn};

use super::remote::file_url;
use super::schema::{Manifest, SectionKind};
use super::store::ManifestStore;

/// Suffix for in-flight downloads. Leftovers from an interrupted run are
/// swept before the next plan executes, not at failure time.
pub const PART_SUFFIX: &str = ".part";

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("request for {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("download {url} failed with HTTP status {status}")]
    HttpStatus { url: String, status: u16 },
    #[error("filesystem error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("remote manifest rejected: {0}")]
    InvalidManifest(#[from] super::schema::ManifestError),
}

/// One file the plan will download: where it comes from and where it lands.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadUnit {
    pub section: SectionKind,
    pub version: String,
    pub relative_path: String,
    pub url: String,
    pub destination: PathBuf,
}

impl DownloadUnit {
    #[must_use]
    pub fn staging_path(&self) -> PathBuf {
        let mut name = self
            .destination
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(PART_SUFFIX);
        self.destination.with_file_name(name)
    }
}

/// Computes the download plan for every section except `model`, which is
/// provisioned by the engine itself once a credential exists.
///
/// Per section and remote version: a version label that differs from the
/// locally installed one replaces the whole file set; a matching label
/// only fills in files missing from disk.
#[must_use]
pub fn build_plan(
    store: &ManifestStore,
    local: Option<&Manifest>,
    remote: &Manifest,
) -> Vec<DownloadUnit> {
    let mut units = Vec::new();

    for kind in SectionKind::ALL {
        if kind == SectionKind::Model {
            continue;
        }
        let installed_version =
            local.and_then(|manifest| manifest.section(kind).installed().map(|e| &e.version));

        for entry in remote.section(kind).entries() {
            let full_replace = installed_version != Some(&entry.version);
            for relative in &entry.files {
                let destination = store.file_destination(kind, relative);
                if !full_replace && destination.exists() {
                    continue;
                }
                units.push(DownloadUnit {
                    section: kind,
                    version: entry.version.clone(),
                    relative_path: relative.clone(),
                    url: file_url(kind, &entry.version, relative),
                    destination,
                });
            }
        }
    }

    units
}

/// Removes `.part` leftovers from interrupted runs in every section
/// directory.
pub fn clean_stale_parts(store: &ManifestStore) {
    for kind in SectionKind::ALL {
        remove_parts_below(&store.section_dir(kind));
    }
}

fn remove_parts_below(dir: &Path) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            remove_parts_below(&path);
        } else if path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(PART_SUFFIX))
        {
            if let Err(error) = fs::remove_file(&path) {
                warn!("failed to remove stale partial {}: {error}", path.display());
            }
        }
    }
}

/// Fetches one unit into its staging path. Seam between the plan executor
/// and the network so the executor is testable without one.
pub trait UnitFetcher {
    fn fetch(&mut self, unit: &DownloadUnit, staging: &Path) -> Result<(), ProvisionError>;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl UnitFetcher for HttpFetcher {
    fn fetch(&mut self, unit: &DownloadUnit, staging: &Path) -> Result<(), ProvisionError> {
        let mut response = self
            .client
            .get(&unit.url)
            .send()
            .map_err(|source| ProvisionError::Request {
                url: unit.url.clone(),
                source,
            })?;
        if !response.status().is_success() {
            return Err(ProvisionError::HttpStatus {
                url: unit.url.clone(),
                status: response.status().as_u16(),
            });
        }

        let mut file = File::create(staging).map_err(|source| ProvisionError::Io {
            path: staging.to_path_buf(),
            source,
        })?;
        let mut buffer = [0u8; 32 * 1024];
        loop {
            let read = response
                .read(&mut buffer)
                .map_err(|source| ProvisionError::Io {
                    path: staging.to_path_buf(),
                    source,
                })?;
            if read == 0 {
                break;
            }
            file.write_all(&buffer[..read])
                .map_err(|source| ProvisionError::Io {
                    path: staging.to_path_buf(),
                    source,
                })?;
        }
        Ok(())
    }
}

/// Runs the plan sequentially: staging download, atomic rename into place,
/// aggregate percent after every finished unit. The first failure aborts
/// the remaining units.
pub fn execute_plan<F, P>(
    units: &[DownloadUnit],
    fetcher: &mut F,
    mut on_progress: P,
) -> Result<(), ProvisionError>
where
    F: UnitFetcher,
    P: FnMut(u8),
{
    let total = units.len();
    for (index, unit) in units.iter().enumerate() {
        if let Some(parent) = unit.destination.parent() {
            fs::create_dir_all(parent).map_err(|source| ProvisionError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let staging = unit.staging_path();
        fetcher.fetch(unit, &staging)?;
        fs::rename(&staging, &unit.destination).map_err(|source| ProvisionError::Io {
            path: unit.destination.clone(),
            source,
        })?;

        debug!(
            "provisioned {}/{}/{}",
            unit.section, unit.version, unit.relative_path
        );
        let done = index + 1;
        on_progress((done * 100 / total) as u8);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::schema::{Section, SectionEntry};

    fn entry(version: &str, files: &[&str]) -> SectionEntry {
        SectionEntry {
            version: version.into(),
            files: files.iter().map(|f| f.to_string()).collect(),
        }
    }

    fn remote_manifest() -> Manifest {
        Manifest {
            engine: Section::new(vec![entry("1.4.2", &["relight-engine.exe", "ort.dll"])]),
            model: Section::new(vec![entry("2024-05-01", &["derender.onnx"])]),
            sample_images: Section::new(vec![entry("1.0.0", &["samples/portrait.png"])]),
            thirdparty_libs: Section::new(vec![entry("1.1.0", &["ffmpeg/ffmpeg.exe"])]),
        }
    }

    struct WritingFetcher;

    impl UnitFetcher for WritingFetcher {
        fn fetch(&mut self, _unit: &DownloadUnit, staging: &Path) -> Result<(), ProvisionError> {
            fs::write(staging, b"payload").map_err(|source| ProvisionError::Io {
                path: staging.to_path_buf(),
                source,
            })
        }
    }

    struct FailingFetcher {
        fail_at: usize,
        attempted: usize,
    }

    impl UnitFetcher for FailingFetcher {
        fn fetch(&mut self, unit: &DownloadUnit, staging: &Path) -> Result<(), ProvisionError> {
            self.attempted += 1;
            if self.attempted == self.fail_at {
                return Err(ProvisionError::HttpStatus {
                    url: unit.url.clone(),
                    status: 503,
                });
            }
            fs::write(staging, b"payload").map_err(|source| ProvisionError::Io {
                path: staging.to_path_buf(),
                source,
            })
        }
    }

    #[test]
    fn version_mismatch_plans_full_replace() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::with_root(dir.path().to_path_buf());
        let local = Manifest {
            engine: Section::new(vec![entry("1.3.0", &["relight-engine.exe"])]),
            ..Manifest::default()
        };
        // The matching file already exists on disk; the label mismatch
        // still schedules it.
        let existing = store.file_destination(SectionKind::Engine, "relight-engine.exe");
        fs::create_dir_all(existing.parent().unwrap()).unwrap();
        fs::write(&existing, b"old").unwrap();

        let plan = build_plan(&store, Some(&local), &remote_manifest());
        let engine_units: Vec<&str> = plan
            .iter()
            .filter(|unit| unit.section == SectionKind::Engine)
            .map(|unit| unit.relative_path.as_str())
            .collect();
        assert_eq!(engine_units, ["relight-engine.exe", "ort.dll"]);
    }

    #[test]
    fn version_match_plans_only_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::with_root(dir.path().to_path_buf());
        let local = Manifest {
            engine: Section::new(vec![entry("1.4.2", &["relight-engine.exe", "ort.dll"])]),
            ..Manifest::default()
        };
        let existing = store.file_destination(SectionKind::Engine, "relight-engine.exe");
        fs::create_dir_all(existing.parent().unwrap()).unwrap();
        fs::write(&existing, b"installed").unwrap();

        let plan = build_plan(&store, Some(&local), &remote_manifest());
        let engine_units: Vec<&str> = plan
            .iter()
            .filter(|unit| unit.section == SectionKind::Engine)
            .map(|unit| unit.relative_path.as_str())
            .collect();
        assert_eq!(engine_units, ["ort.dll"]);
    }

    #[test]
    fn model_section_is_never_planned() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::with_root(dir.path().to_path_buf());
        let plan = build_plan(&store, None, &remote_manifest());
        assert!(plan.iter().all(|unit| unit.section != SectionKind::Model));
    }

    #[test]
    fn reprovisioning_after_full_run_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::with_root(dir.path().to_path_buf());
        let remote = remote_manifest();

        let plan = build_plan(&store, None, &remote);
        assert!(!plan.is_empty());
        execute_plan(&plan, &mut WritingFetcher, |_| {}).unwrap();
        store.save(&remote).unwrap();

        let local = store.load();
        let second = build_plan(&store, local.as_ref(), &remote);
        assert!(second.is_empty());
    }

    #[test]
    fn progress_is_monotonic_and_ends_at_hundred() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::with_root(dir.path().to_path_buf());
        let plan = build_plan(&store, None, &remote_manifest());

        let mut percents = Vec::new();
        execute_plan(&plan, &mut WritingFetcher, |pct| percents.push(pct)).unwrap();
        assert_eq!(percents.len(), plan.len());
        assert!(percents.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(percents.last(), Some(&100));
    }

    #[test]
    fn failure_aborts_remaining_units() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::with_root(dir.path().to_path_buf());
        let remote = Manifest {
            engine: Section::new(vec![entry(
                "1.0.0",
                &["f0", "f1", "f2", "f3", "f4", "f5", "f6", "f7", "f8", "f9"],
            )]),
            model: Section::new(vec![entry("1.0.0", &["m"])]),
            ..Manifest::default()
        };
        let plan = build_plan(&store, None, &remote);
        assert_eq!(plan.len(), 10);

        let mut fetcher = FailingFetcher {
            fail_at: 3,
            attempted: 0,
        };
        let mut percents = Vec::new();
        let result = execute_plan(&plan, &mut fetcher, |pct| percents.push(pct));
        assert!(matches!(
            result,
            Err(ProvisionError::HttpStatus { status: 503, .. })
        ));
        assert_eq!(fetcher.attempted, 3);
        assert_eq!(percents, [10, 20]);
        assert!(plan[1].destination.exists());
        assert!(!plan[2].destination.exists());
        assert!(!plan[3].destination.exists());
    }

    #[test]
    fn stale_parts_are_swept() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::with_root(dir.path().to_path_buf());
        let section = store.section_dir(SectionKind::Engine);
        fs::create_dir_all(section.join("nested")).unwrap();
        let stale = section.join("nested").join("engine.dll.part");
        let keep = section.join("nested").join("engine.dll");
        fs::write(&stale, b"partial").unwrap();
        fs::write(&keep, b"whole").unwrap();

        clean_stale_parts(&store);
        assert!(!stale.exists());
        assert!(keep.exists());
    }
}
