use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Versioned listing of asset files, local or remote. Sections are named
/// fields rather than a string-keyed map so malformed remote data fails at
/// the parse boundary instead of surfacing as missing keys downstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub engine: Section,
    pub model: Section,
    pub sample_images: Section,
    pub thirdparty_libs: Section,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionKind {
    Engine,
    Model,
    SampleImages,
    ThirdpartyLibs,
}

impl SectionKind {
    pub const ALL: [SectionKind; 4] = [
        SectionKind::Engine,
        SectionKind::Model,
        SectionKind::SampleImages,
        SectionKind::ThirdpartyLibs,
    ];

    #[must_use]
    pub fn dir_name(&self) -> &'static str {
        match self {
            SectionKind::Engine => "engine",
            SectionKind::Model => "model",
            SectionKind::SampleImages => "sample_images",
            SectionKind::ThirdpartyLibs => "thirdparty_libs",
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// One version label and the relative files shipped under it.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionEntry {
    pub version: String,
    pub files: Vec<String>,
}

/// Ordered list of version entries. The JSON form is an object mapping
/// version label to file list; document order is preserved because the
/// provisioning contract treats the first-listed version as the target.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Section {
    entries: Vec<SectionEntry>,
}

impl Section {
    #[must_use]
    pub fn new(entries: Vec<SectionEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> impl Iterator<Item = &SectionEntry> {
        self.entries.iter()
    }

    #[must_use]
    pub fn first(&self) -> Option<&SectionEntry> {
        self.entries.first()
    }

    /// The locally-installed entry. Local sections carry exactly one
    /// version label; anything else violates the store invariant.
    #[must_use]
    pub fn installed(&self) -> Option<&SectionEntry> {
        match self.entries.len() {
            1 => self.entries.first(),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Manifest {
    #[must_use]
    pub fn section(&self, kind: SectionKind) -> &Section {
        match kind {
            SectionKind::Engine => &self.engine,
            SectionKind::Model => &self.model,
            SectionKind::SampleImages => &self.sample_images,
            SectionKind::ThirdpartyLibs => &self.thirdparty_libs,
        }
    }

    pub fn section_mut(&mut self, kind: SectionKind) -> &mut Section {
        match kind {
            SectionKind::Engine => &mut self.engine,
            SectionKind::Model => &mut self.model,
            SectionKind::SampleImages => &mut self.sample_images,
            SectionKind::ThirdpartyLibs => &mut self.thirdparty_libs,
        }
    }

    /// True when every non-empty section carries a single version label,
    /// the shape a local manifest must have.
    #[must_use]
    pub fn single_version_per_section(&self) -> bool {
        SectionKind::ALL
            .iter()
            .all(|kind| self.section(*kind).len() <= 1)
    }
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest section {section} lists an empty version label")]
    EmptyVersion { section: SectionKind },
    #[error("manifest section {section} version {version} lists an invalid file path {path:?}")]
    InvalidFilePath {
        section: SectionKind,
        version: String,
        path: String,
    },
    #[error("remote manifest is missing any {section} version")]
    MissingSection { section: SectionKind },
}

/// Fail-fast validation for a freshly fetched remote manifest. The engine
/// and model sections must advertise at least one version; every entry
/// must have a non-empty label and sane relative file paths.
pub fn validate_remote(manifest: &Manifest) -> Result<(), ManifestError> {
    for kind in SectionKind::ALL {
        for entry in manifest.section(kind).entries() {
            if entry.version.trim().is_empty() {
                return Err(ManifestError::EmptyVersion { section: kind });
            }
            for file in &entry.files {
                let trimmed = file.trim();
                if trimmed.is_empty()
                    || trimmed.starts_with('/')
                    || trimmed.split('/').any(|part| part == "..")
                {
                    return Err(ManifestError::InvalidFilePath {
                        section: kind,
                        version: entry.version.clone(),
                        path: file.clone(),
                    });
                }
            }
        }
    }

    for kind in [SectionKind::Engine, SectionKind::Model] {
        if manifest.section(kind).is_empty() {
            return Err(ManifestError::MissingSection { section: kind });
        }
    }

    Ok(())
}

impl Serialize for Section {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in &self.entries {
            map.serialize_entry(&entry.version, &entry.files)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Section {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SectionVisitor;

        impl<'de> Visitor<'de> for SectionVisitor {
            type Value = Section;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a map of version label to file list")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(1));
                while let Some((version, files)) = access.next_entry::<String, Vec<String>>()? {
                    entries.push(SectionEntry { version, files });
                }
                Ok(Section { entries })
            }
        }

        deserializer.deserialize_map(SectionVisitor)
    }
}
