mod provision;
mod remote;
mod schema;
mod service;
mod store;

#[allow(unused_imports)]
pub use provision::{
    build_plan, clean_stale_parts, execute_plan, DownloadUnit, HttpFetcher, ProvisionError,
    UnitFetcher, PART_SUFFIX,
};
#[allow(unused_imports)]
pub use remote::{fetch_remote, file_url, manifest_url};
#[allow(unused_imports)]
pub use schema::{validate_remote, Manifest, ManifestError, Section, SectionEntry, SectionKind};
pub use service::ProvisionService;
pub use store::ManifestStore;
