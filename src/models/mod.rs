mod download;
mod manager;
mod metadata;
mod roboflow;

pub use download::{
    download, download_with_progress, plan_for as build_download_plan, DownloadOutcome,
    DownloadPlan,
};
pub use manager::{
    ArchiveFormat, Catalog, ModelRecipe, ModelSource, ANDROID_ASSETS_DIR, ANDROID_ML_DIR,
};
pub use metadata::{compute_sha256, sha256_reader};
pub use roboflow::{RoboflowClient, DEFAULT_API_BASE};

pub(crate) use download::reuse_existing;
