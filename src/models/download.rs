use std::{
    fs::{self, File},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zip::read::ZipArchive;

use super::{
    manager::{ArchiveFormat, ModelRecipe},
    metadata::compute_sha256,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("model-setup/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadPlan {
    pub uri: String,
    pub archive_format: ArchiveFormat,
    /// Weights file, or the extraction directory for archives.
    pub destination: PathBuf,
    pub expected_checksum: Option<String>,
}

impl DownloadPlan {
    #[must_use]
    pub fn staging_path(&self) -> PathBuf {
        let mut path = self.destination.clone();
        let ext = format!("download.{}", self.archive_format.extension());
        path.set_extension(ext);
        path
    }
}

pub fn plan_for(recipe: &ModelRecipe, uri: String, work_dir: &Path) -> DownloadPlan {
    let destination = match recipe.archive_format {
        ArchiveFormat::File => work_dir.join(&recipe.weights_filename),
        ArchiveFormat::Zip => work_dir.join(recipe.base_name()),
    };
    DownloadPlan {
        uri,
        archive_format: recipe.archive_format,
        destination,
        expected_checksum: recipe.checksum.clone(),
    }
}

#[derive(Debug)]
pub struct DownloadOutcome {
    pub final_path: PathBuf,
    pub bytes_downloaded: u64,
    pub checksum: Option<String>,
    /// The destination already existed and nothing was fetched.
    pub reused: bool,
}

pub(crate) fn http_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(None)
        .build()
        .context("create http client")
}

pub fn download(plan: &DownloadPlan, force: bool) -> Result<DownloadOutcome> {
    download_with_progress(plan, force, |_| {})
}

pub fn download_with_progress<F>(
    plan: &DownloadPlan,
    force: bool,
    mut progress: F,
) -> Result<DownloadOutcome>
where
    F: FnMut(u64),
{
    if !force {
        if let Some(outcome) = reuse_existing(plan)? {
            return Ok(outcome);
        }
    }

    let client = http_client()?;
    let staging = plan.staging_path();
    if let Some(parent) = staging.parent() {
        fs::create_dir_all(parent).context("create staging directory")?;
    }

    info!("downloading {}", plan.uri);
    let bytes_downloaded = download_to_file(&client, &plan.uri, &staging, &mut progress)?;

    let checksum = compute_sha256(&staging)?;
    if let Some(expected) = &plan.expected_checksum {
        if !checksum.eq_ignore_ascii_case(expected) {
            let _ = fs::remove_file(&staging);
            return Err(anyhow!(
                "checksum mismatch: expected {}, got {}",
                expected,
                checksum
            ));
        }
    }

    match plan.archive_format {
        ArchiveFormat::File => {
            fs::rename(&staging, &plan.destination).with_context(|| {
                format!("move download into {}", plan.destination.display())
            })?;
        }
        ArchiveFormat::Zip => {
            if plan.destination.exists() {
                fs::remove_dir_all(&plan.destination).with_context(|| {
                    format!("remove existing destination {}", plan.destination.display())
                })?;
            }
            fs::create_dir_all(&plan.destination).context("create destination directory")?;
            extract_zip(&plan.destination, &staging)?;
            let _ = fs::remove_file(&staging);
        }
    }

    info!(
        "saved {} ({bytes_downloaded} bytes)",
        plan.destination.display()
    );

    Ok(DownloadOutcome {
        final_path: plan.destination.clone(),
        bytes_downloaded,
        checksum: Some(checksum),
        reused: false,
    })
}

pub(crate) fn reuse_existing(plan: &DownloadPlan) -> Result<Option<DownloadOutcome>> {
    if !plan.destination.exists() {
        return Ok(None);
    }

    let checksum = if plan.destination.is_file() {
        Some(compute_sha256(&plan.destination)?)
    } else {
        None
    };

    if let (Some(expected), Some(actual)) = (&plan.expected_checksum, &checksum) {
        if !actual.eq_ignore_ascii_case(expected) {
            warn!(
                "{} does not match the expected checksum, downloading again",
                plan.destination.display()
            );
            return Ok(None);
        }
    }

    info!("already present: {}", plan.destination.display());
    Ok(Some(DownloadOutcome {
        final_path: plan.destination.clone(),
        bytes_downloaded: 0,
        checksum,
        reused: true,
    }))
}

fn download_to_file<F>(client: &Client, uri: &str, path: &Path, progress: &mut F) -> Result<u64>
where
    F: FnMut(u64),
{
    let mut response = client
        .get(uri)
        .send()
        .with_context(|| format!("request {uri}"))?
        .error_for_status()
        .with_context(|| format!("download {uri}"))?;

    let expected = response.content_length();
    let mut file = File::create(path).context("create staging file")?;
    let mut downloaded = 0u64;
    const CHUNK_SIZE: usize = 32 * 1024;
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let read = response.read(&mut buffer).context("read download chunk")?;
        if read == 0 {
            break;
        }
        file.write_all(&buffer[..read])
            .context("write download chunk")?;
        downloaded += read as u64;
        debug!("downloaded {downloaded} of {expected:?} bytes");
        progress(downloaded);
    }
    file.flush().context("flush staging file")?;

    if let Some(expected) = expected {
        if downloaded != expected {
            return Err(anyhow!(
                "size mismatch: expected {} bytes, got {}",
                expected,
                downloaded
            ));
        }
    }
    Ok(downloaded)
}

fn extract_zip(destination: &Path, archive_path: &Path) -> Result<()> {
    let file = File::open(archive_path).context("open archive")?;
    let mut archive = ZipArchive::new(file).context("open zip archive")?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).context("read zip entry")?;
        let dest = destination.join(entry.mangled_name());
        if entry.is_dir() {
            fs::create_dir_all(&dest).context("create zip dir")?;
        } else {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).context("create zip file parent")?;
            }
            let mut outfile = File::create(&dest).context("create zip file")?;
            io::copy(&mut entry, &mut outfile).context("write zip file")?;
        }
    }
    Ok(())
}
