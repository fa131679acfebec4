use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::debug;

use super::{
    placement::{place, Destination, PlacedArtifact},
    PlacementError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSet {
    base_name: String,
    extension: String,
    aliases: Vec<String>,
}

impl CandidateSet {
    pub fn new(base_name: impl Into<String>, extension: impl Into<String>) -> Self {
        let extension = extension.into();
        Self {
            base_name: base_name.into(),
            extension: extension.trim_start_matches('.').to_string(),
            aliases: Vec::new(),
        }
    }

    /// Adds a base name probed after the primary one, e.g. `best` for
    /// weights that were renamed after download.
    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    #[must_use]
    pub fn with_aliases<I, S>(self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        aliases.into_iter().fold(self, |set, alias| set.with_alias(alias))
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Candidate paths in priority order. For every base the nested saved
    /// model layout comes first, then the flat float32 file, then a bare
    /// rename of the weights.
    pub fn paths(&self) -> Vec<PathBuf> {
        let ext = &self.extension;
        let mut paths: Vec<PathBuf> = Vec::new();
        for base in std::iter::once(&self.base_name).chain(self.aliases.iter()) {
            let templates = [
                PathBuf::from(format!("{base}_saved_model")).join(format!("{base}_float32.{ext}")),
                PathBuf::from(format!("{base}_float32.{ext}")),
                PathBuf::from(format!("{base}.{ext}")),
            ];
            for path in templates {
                if !paths.contains(&path) {
                    paths.push(path);
                }
            }
        }
        paths
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Index into [`CandidateSet::paths`].
    Candidate(usize),
    Scan,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found { path: PathBuf, origin: Origin },
    NotFound { attempted: Vec<PathBuf> },
}

impl Resolution {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Resolution::Found { path, .. } => Some(path.as_path()),
            Resolution::NotFound { .. } => None,
        }
    }

    pub fn into_result(self) -> Result<(PathBuf, Origin), PlacementError> {
        match self {
            Resolution::Found { path, origin } => Ok((path, origin)),
            Resolution::NotFound { attempted } => Err(PlacementError::NotFound { attempted }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactLocator {
    root: PathBuf,
    exclude: Vec<PathBuf>,
}

impl ArtifactLocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            exclude: Vec::new(),
        }
    }

    pub fn current_dir() -> Result<Self, PlacementError> {
        let root = std::env::current_dir().map_err(PlacementError::WorkingDir)?;
        Ok(Self::new(root))
    }

    /// Keeps `path` out of the fallback scan. The path is used as given,
    /// not joined onto the search root.
    #[must_use]
    pub fn excluding(mut self, path: impl Into<PathBuf>) -> Self {
        self.exclude.push(path.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, candidates: &CandidateSet) -> Resolution {
        self.resolve_with(candidates, |path| path.is_file())
    }

    /// Same as [`resolve`](Self::resolve) with a caller-supplied existence
    /// probe. The probe is never called again once a candidate matches.
    pub fn resolve_with<F>(&self, candidates: &CandidateSet, mut exists: F) -> Resolution
    where
        F: FnMut(&Path) -> bool,
    {
        let attempted = candidates.paths();
        for (index, relative) in attempted.iter().enumerate() {
            let path = self.root.join(relative);
            if exists(&path) {
                debug!("candidate {index} matched: {}", path.display());
                return Resolution::Found {
                    path,
                    origin: Origin::Candidate(index),
                };
            }
            debug!("candidate {index} missing: {}", path.display());
        }

        match self.scan(candidates.extension()) {
            Some(path) => {
                debug!("scan matched: {}", path.display());
                Resolution::Found {
                    path,
                    origin: Origin::Scan,
                }
            }
            None => Resolution::NotFound { attempted },
        }
    }

    /// First file below the root with the given extension. Entries are
    /// visited in file-name order, files of a directory before its
    /// subdirectories; symlinked directories are not followed.
    ///
    /// Excluded paths never match, so a root whose only artifact is the
    /// placement destination itself scans as empty.
    pub fn scan(&self, extension: &str) -> Option<PathBuf> {
        let extension = extension.trim_start_matches('.');
        let predicate = |path: &Path| {
            let matches_ext = path.extension().map(|ext| ext == extension).unwrap_or(false);
            matches_ext && !self.is_excluded(path)
        };
        find_first_matching(&self.root, &predicate)
    }

    /// Resolves the artifact and copies it to `destination`. A relative
    /// destination is rooted at the search root, and it is kept out of the
    /// fallback scan.
    pub fn resolve_and_place(
        &self,
        candidates: &CandidateSet,
        destination: &Destination,
    ) -> Result<PlacedArtifact, PlacementError> {
        let destination = destination.under(&self.root);
        let locator = self.clone().excluding(destination.path());
        let (source, _) = locator.resolve(candidates).into_result()?;
        place(&source, &destination)
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.exclude
            .iter()
            .any(|excluded| same_path(excluded, path))
    }
}

pub(crate) fn same_path(left: &Path, right: &Path) -> bool {
    if left == right {
        return true;
    }
    match (fs::canonicalize(left), fs::canonicalize(right)) {
        (Ok(left), Ok(right)) => left == right,
        _ => false,
    }
}

pub(crate) fn find_first_matching<F>(dir: &Path, predicate: &F) -> Option<PathBuf>
where
    F: Fn(&Path) -> bool,
{
    let mut entries: Vec<fs::DirEntry> = fs::read_dir(dir).ok()?.flatten().collect();
    entries.sort_by_key(|entry| entry.file_name());

    let mut subdirs = Vec::new();
    for entry in entries {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        let path = entry.path();
        if file_type.is_dir() {
            subdirs.push(path);
        } else if path.is_file() && predicate(&path) {
            return Some(path);
        }
    }

    subdirs
        .iter()
        .find_map(|subdir| find_first_matching(subdir, predicate))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(root: &Path, relative: &str, contents: &[u8]) -> PathBuf {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn candidates_follow_declared_priority() {
        let set = CandidateSet::new("model", "tflite");
        assert_eq!(
            set.paths(),
            vec![
                PathBuf::from("model_saved_model/model_float32.tflite"),
                PathBuf::from("model_float32.tflite"),
                PathBuf::from("model.tflite"),
            ]
        );
    }

    #[test]
    fn aliases_come_after_primary_base_without_duplicates() {
        let set = CandidateSet::new("foodvision_best", ".tflite")
            .with_alias("best")
            .with_alias("foodvision_best");
        let paths = set.paths();
        assert_eq!(paths.len(), 6);
        assert_eq!(
            paths[0],
            PathBuf::from("foodvision_best_saved_model/foodvision_best_float32.tflite")
        );
        assert_eq!(paths[3], PathBuf::from("best_saved_model/best_float32.tflite"));
        assert_eq!(paths[5], PathBuf::from("best.tflite"));
    }

    #[test]
    fn nested_saved_model_wins_over_flat_file() {
        let dir = tempfile::tempdir().unwrap();
        let nested = touch(dir.path(), "model_saved_model/model_float32.tflite", b"nested");
        touch(dir.path(), "model_float32.tflite", b"flat");

        let set = CandidateSet::new("model", "tflite");
        let resolution = ArtifactLocator::new(dir.path()).resolve(&set);
        assert_eq!(
            resolution,
            Resolution::Found {
                path: nested,
                origin: Origin::Candidate(0)
            }
        );
    }

    #[test]
    fn probing_stops_at_first_existing_candidate() {
        let locator = ArtifactLocator::new("/work");
        let set = CandidateSet::new("model", "tflite");
        let mut probed = Vec::new();
        let resolution = locator.resolve_with(&set, |path| {
            probed.push(path.to_path_buf());
            let flat = !path.to_string_lossy().contains("saved_model");
            path.ends_with("model_float32.tflite") && flat
        });

        assert_eq!(resolution.path(), Some(Path::new("/work/model_float32.tflite")));
        assert_eq!(
            probed,
            vec![
                PathBuf::from("/work/model_saved_model/model_float32.tflite"),
                PathBuf::from("/work/model_float32.tflite"),
            ]
        );
    }

    #[test]
    fn directory_at_candidate_path_is_not_a_match() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("model.tflite")).unwrap();
        let set = CandidateSet::new("model", "tflite");
        let resolution = ArtifactLocator::new(dir.path()).resolve(&set);
        assert!(matches!(resolution, Resolution::NotFound { .. }));
    }

    #[test]
    fn scan_finds_nested_file_when_no_candidate_exists() {
        let dir = tempfile::tempdir().unwrap();
        let other = touch(dir.path(), "nested/other.tflite", b"other");
        touch(dir.path(), "nested/notes.txt", b"ignored");

        let set = CandidateSet::new("model", "tflite");
        let resolution = ArtifactLocator::new(dir.path()).resolve(&set);
        assert_eq!(
            resolution,
            Resolution::Found {
                path: other,
                origin: Origin::Scan
            }
        );
    }

    #[test]
    fn scan_order_is_lexicographic_and_files_first() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "b/inner.tflite", b"1");
        touch(dir.path(), "a/z.tflite", b"2");
        touch(dir.path(), "a/m.tflite", b"3");
        touch(dir.path(), "a/deeper/a.tflite", b"4");

        let locator = ArtifactLocator::new(dir.path());
        assert_eq!(locator.scan("tflite"), Some(dir.path().join("a/m.tflite")));

        touch(dir.path(), "top.tflite", b"5");
        assert_eq!(locator.scan(".tflite"), Some(dir.path().join("top.tflite")));
    }

    #[test]
    fn scan_skips_excluded_destination() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "app/src/main/ml/model.tflite", b"previous run");
        let fresh = touch(dir.path(), "out/export.tflite", b"fresh");

        let locator = ArtifactLocator::new(dir.path())
            .excluding(dir.path().join("app/src/main/ml/model.tflite"));
        assert_eq!(locator.scan("tflite"), Some(fresh));
    }

    #[test]
    fn relative_destination_is_placed_under_root_and_skipped_by_scan() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "ml/model.tflite", b"previous run");
        touch(dir.path(), "out/export.tflite", b"fresh");

        let placed = ArtifactLocator::new(dir.path())
            .resolve_and_place(
                &CandidateSet::new("model", "tflite"),
                &Destination::new("ml", "model.tflite"),
            )
            .unwrap();

        assert_eq!(placed.source, dir.path().join("out/export.tflite"));
        assert_eq!(placed.destination, dir.path().join("ml/model.tflite"));
        assert_eq!(fs::read(dir.path().join("ml/model.tflite")).unwrap(), b"fresh");
    }

    #[test]
    fn destination_as_only_artifact_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "ml/model.tflite", b"previous run");

        let error = ArtifactLocator::new(dir.path())
            .resolve_and_place(
                &CandidateSet::new("export", "tflite"),
                &Destination::new("ml", "model.tflite"),
            )
            .unwrap_err();
        assert!(matches!(error, PlacementError::NotFound { .. }), "{error:?}");
        assert_eq!(fs::read(dir.path().join("ml/model.tflite")).unwrap(), b"previous run");
    }

    #[test]
    fn not_found_lists_every_attempted_candidate() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "weights.pt", b"pt");
        let set = CandidateSet::new("model", "tflite").with_alias("best");

        match ArtifactLocator::new(dir.path()).resolve(&set) {
            Resolution::NotFound { attempted } => assert_eq!(attempted, set.paths()),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }
}
