mod command;

use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use thiserror::Error;

pub use command::{CommandExporter, DEFAULT_ARGS, DEFAULT_PROGRAM, DEFAULT_TIMEOUT};

pub const DEFAULT_FORMAT: &str = "tflite";
pub const DEFAULT_IMAGE_SIZE: u32 = 640;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    pub weights: PathBuf,
    pub format: String,
    pub image_size: u32,
    pub work_dir: PathBuf,
}

impl ExportRequest {
    pub fn new(weights: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            weights: weights.into(),
            format: DEFAULT_FORMAT.into(),
            image_size: DEFAULT_IMAGE_SIZE,
            work_dir: work_dir.into(),
        }
    }

    #[must_use]
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    #[must_use]
    pub fn with_image_size(mut self, image_size: u32) -> Self {
        self.image_size = image_size;
        self
    }

    /// Weights file name without extension; exporters name their output
    /// after it.
    pub fn weights_stem(&self) -> String {
        stem(&self.weights)
    }
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub trait Exporter {
    fn export(&self, request: &ExportRequest) -> Result<(), ExportError>;
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("weights file not found: {}", .0.display())]
    MissingWeights(PathBuf),
    #[error("failed to spawn exporter {}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed polling exporter")]
    Wait(#[source] io::Error),
    #[error("exporter exited with status {status:?}: {stderr}")]
    Failed { status: Option<i32>, stderr: String },
    #[error("exporter exceeded {timeout:?} timeout")]
    TimedOut { timeout: Duration },
}
