use reqwest::blocking::Client;

use super::provision::ProvisionError;
use super::schema::{validate_remote, Manifest, SectionKind};

const DEFAULT_ASSET_HOST: &str = "https://assets.relight.studio";

fn asset_host() -> String {
    std::env::var("RELIGHT_ASSET_HOST").unwrap_or_else(|_| DEFAULT_ASSET_HOST.to_string())
}

#[must_use]
pub fn manifest_url() -> String {
    format!("{}/engine/engine-config.json", asset_host())
}

/// Download URL for one asset file. Vendor libraries are published on a
/// flat path; every other section sits under the engine prefix.
#[must_use]
pub fn file_url(kind: SectionKind, version: &str, relative: &str) -> String {
    match kind {
        SectionKind::ThirdpartyLibs => {
            format!("{}/thirdparty/{version}/{relative}", asset_host())
        }
        _ => format!(
            "{}/engine/{}/{version}/{relative}",
            asset_host(),
            kind.dir_name()
        ),
    }
}

/// Fetches and validates the canonical remote manifest. Malformed remote
/// data is rejected here so nothing downstream sees a partial shape.
pub fn fetch_remote(client: &Client) -> Result<Manifest, ProvisionError> {
    let url = manifest_url();
    let manifest: Manifest = client
        .get(&url)
        .send()
        .map_err(|source| ProvisionError::Request {
            url: url.clone(),
            source,
        })?
        .error_for_status()
        .map_err(|source| ProvisionError::Request {
            url: url.clone(),
            source,
        })?
        .json()
        .map_err(|source| ProvisionError::Request {
            url: url.clone(),
            source,
        })?;
    validate_remote(&manifest).map_err(ProvisionError::InvalidManifest)?;
    Ok(manifest)
}
