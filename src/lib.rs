//! Fetches pretrained detection weights, exports them for on-device
//! inference and drops the result where the Android app loads it from.

pub mod artifact;
pub mod core;
pub mod export;
pub mod models;

pub use artifact::{
    resolve_and_place, ArtifactLocator, CandidateSet, Destination, PlacedArtifact,
    PlacementError, Resolution,
};
pub use export::{CommandExporter, ExportError, ExportRequest, Exporter};
