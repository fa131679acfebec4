mod locator;
mod placement;

use std::{io, path::PathBuf};

use thiserror::Error;

pub use locator::{ArtifactLocator, CandidateSet, Origin, Resolution};
pub use placement::{place, Destination, PlacedArtifact};

pub(crate) use locator::find_first_matching;

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("no exported artifact found; tried {}", display_paths(.attempted))]
    NotFound { attempted: Vec<PathBuf> },
    #[error("could not create destination directory {}", .dir.display())]
    CreateDir {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not copy {} to {}", .source_path.display(), .destination.display())]
    Copy {
        source_path: PathBuf,
        destination: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not verify {}", .path.display())]
    Verify {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{} differs from its source after copy (expected {expected}, got {actual})", .destination.display())]
    Mismatch {
        destination: PathBuf,
        expected: String,
        actual: String,
    },
    #[error("could not read the working directory")]
    WorkingDir(#[source] io::Error),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Resolves `base_name`'s exported artifact below the current working
/// directory and copies it to `destination_dir/destination_filename`.
pub fn resolve_and_place(
    base_name: &str,
    extension: &str,
    destination_dir: impl Into<PathBuf>,
    destination_filename: &str,
) -> Result<PlacedArtifact, PlacementError> {
    let locator = ArtifactLocator::current_dir()?;
    let destination = Destination::new(destination_dir, destination_filename);
    locator.resolve_and_place(&CandidateSet::new(base_name, extension), &destination)
}
