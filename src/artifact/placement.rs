use std::{
    fs::{self, File},
    io::BufReader,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{locator::same_path, PlacementError};
use crate::models::sha256_reader;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    pub dir: PathBuf,
    pub filename: String,
}

impl Destination {
    pub fn new(dir: impl Into<PathBuf>, filename: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            filename: filename.into(),
        }
    }

    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.filename)
    }

    /// Same descriptor re-rooted under `root` when `dir` is relative.
    #[must_use]
    pub fn under(&self, root: &Path) -> Self {
        if self.dir.is_absolute() {
            return self.clone();
        }
        Self {
            dir: root.join(&self.dir),
            filename: self.filename.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacedArtifact {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub bytes: u64,
    pub checksum: String,
}

/// Copies `source` to `destination`, creating the directory first. An
/// existing file at the destination is overwritten; `source` is untouched.
pub fn place(source: &Path, destination: &Destination) -> Result<PlacedArtifact, PlacementError> {
    fs::create_dir_all(&destination.dir).map_err(|error| PlacementError::CreateDir {
        dir: destination.dir.clone(),
        source: error,
    })?;

    let target = destination.path();
    if same_path(source, &target) {
        debug!("{} is already in place", target.display());
    } else {
        fs::copy(source, &target).map_err(|error| PlacementError::Copy {
            source_path: source.to_path_buf(),
            destination: target.clone(),
            source: error,
        })?;
    }

    let expected = checksum(source)?;
    let actual = checksum(&target)?;
    if expected != actual {
        return Err(PlacementError::Mismatch {
            destination: target,
            expected,
            actual,
        });
    }

    let bytes = fs::metadata(&target)
        .map_err(|error| PlacementError::Verify {
            path: target.clone(),
            source: error,
        })?
        .len();

    info!("placed {} -> {} ({bytes} bytes)", source.display(), target.display());

    Ok(PlacedArtifact {
        source: source.to_path_buf(),
        destination: target,
        bytes,
        checksum: actual,
    })
}

fn checksum(path: &Path) -> Result<String, PlacementError> {
    File::open(path)
        .map(BufReader::new)
        .and_then(sha256_reader)
        .map_err(|error| PlacementError::Verify {
            path: path.to_path_buf(),
            source: error,
        })
}
