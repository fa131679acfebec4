use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::artifact::{
    find_first_matching, place, ArtifactLocator, CandidateSet, Destination, Origin,
    PlacedArtifact,
};
use crate::export::{ExportRequest, Exporter, DEFAULT_FORMAT, DEFAULT_IMAGE_SIZE};
use crate::models::{
    build_download_plan, download, reuse_existing, ModelRecipe, ModelSource, RoboflowClient,
    DEFAULT_API_BASE,
};

#[derive(Debug, Clone)]
pub struct SetupOptions {
    /// Where weights are downloaded, the exporter runs and relative
    /// destinations are rooted.
    pub work_dir: PathBuf,
    pub format: String,
    pub image_size: u32,
    pub force_download: bool,
    pub api_key: Option<String>,
    pub roboflow_api_base: String,
}

impl Default for SetupOptions {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            format: DEFAULT_FORMAT.into(),
            image_size: DEFAULT_IMAGE_SIZE,
            force_download: false,
            api_key: None,
            roboflow_api_base: DEFAULT_API_BASE.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupReport {
    pub weights: PathBuf,
    pub exported: PathBuf,
    pub found_by_scan: bool,
    pub placed: PlacedArtifact,
}

pub struct SetupPipeline<E> {
    exporter: E,
    options: SetupOptions,
}

impl<E: Exporter> SetupPipeline<E> {
    pub fn new(exporter: E, options: SetupOptions) -> Self {
        Self { exporter, options }
    }

    pub fn options(&self) -> &SetupOptions {
        &self.options
    }

    pub fn run(&self, recipe: &ModelRecipe) -> Result<SetupReport> {
        info!("setting up {}", recipe.name);
        let weights = self.fetch(recipe)?;
        self.export_local(&weights, &recipe.aliases, &recipe.destination)
    }

    /// Makes the recipe's weights available in the working directory and
    /// returns the weights file.
    pub fn fetch(&self, recipe: &ModelRecipe) -> Result<PathBuf> {
        let work_dir = &self.options.work_dir;
        fs::create_dir_all(work_dir)
            .with_context(|| format!("create working directory {}", work_dir.display()))?;

        let fetched = match &recipe.source {
            ModelSource::Local { path } => {
                let path = work_dir.join(path);
                if !path.exists() {
                    bail!("weights not found at {}", path.display());
                }
                path
            }
            ModelSource::GithubRaw { uri } => {
                let plan = build_download_plan(recipe, uri.clone(), work_dir);
                download(&plan, self.options.force_download)?.final_path
            }
            ModelSource::Roboflow {
                workspace,
                project,
                version,
                format,
            } => {
                // The download URL is only known after the API call.
                let cached = build_download_plan(recipe, String::new(), work_dir);
                let reused = if self.options.force_download {
                    None
                } else {
                    reuse_existing(&cached)?
                };
                match reused {
                    Some(outcome) => outcome.final_path,
                    None => {
                        let api_key = self.options.api_key.as_deref().ok_or_else(|| {
                            anyhow!(
                                "{} needs a Roboflow API key (--api-key or ROBOFLOW_API_KEY)",
                                recipe.name
                            )
                        })?;
                        let client =
                            RoboflowClient::new(&self.options.roboflow_api_base, api_key)?;
                        let uri =
                            client.resolve_weights_url(workspace, project, *version, format)?;
                        let plan = build_download_plan(recipe, uri, work_dir);
                        download(&plan, true)?.final_path
                    }
                }
            }
        };

        locate_weights(&fetched, &recipe.weights_filename)
    }

    pub fn export_local(
        &self,
        weights: &Path,
        aliases: &[String],
        destination: &Destination,
    ) -> Result<SetupReport> {
        let work_dir = &self.options.work_dir;
        let request = ExportRequest::new(weights, work_dir)
            .with_format(&self.options.format)
            .with_image_size(self.options.image_size);
        self.exporter
            .export(&request)
            .with_context(|| format!("export of {} failed", weights.display()))?;

        let destination = destination.under(work_dir);
        let candidates = CandidateSet::new(request.weights_stem(), &self.options.format)
            .with_aliases(aliases.iter().cloned());
        let locator = ArtifactLocator::new(work_dir).excluding(destination.path());
        let (exported, origin) = locator.resolve(&candidates).into_result()?;
        if origin == Origin::Scan {
            warn!(
                "export output not at any expected path, using {}",
                exported.display()
            );
        }

        let placed = place(&exported, &destination)?;
        Ok(SetupReport {
            weights: weights.to_path_buf(),
            exported,
            found_by_scan: origin == Origin::Scan,
            placed,
        })
    }
}

/// `path` itself when it is a file; otherwise `filename` inside it, or the
/// first `.pt` file found below it.
fn locate_weights(path: &Path, filename: &str) -> Result<PathBuf> {
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    if !path.is_dir() {
        bail!("weights not found at {}", path.display());
    }

    let named = |candidate: &Path| {
        candidate
            .file_name()
            .map(|name| name == filename)
            .unwrap_or(false)
    };
    let any_weights = |candidate: &Path| {
        candidate
            .extension()
            .map(|ext| ext == "pt")
            .unwrap_or(false)
    };
    find_first_matching(path, &named)
        .or_else(|| find_first_matching(path, &any_weights))
        .ok_or_else(|| anyhow!("no {filename} or other .pt file below {}", path.display()))
}
