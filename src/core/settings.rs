use std::{
    fs,
    io::{self, BufRead, IsTerminal, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::export::{
    CommandExporter, DEFAULT_ARGS, DEFAULT_FORMAT, DEFAULT_IMAGE_SIZE, DEFAULT_PROGRAM,
    DEFAULT_TIMEOUT,
};
use crate::models::{Catalog, ModelRecipe, DEFAULT_API_BASE};

const CONFIG_FILE: &str = "config.json";
pub const ENV_API_KEY: &str = "ROBOFLOW_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct ExporterSettings {
    pub program: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for ExporterSettings {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.into(),
            args: DEFAULT_ARGS.iter().map(|arg| arg.to_string()).collect(),
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

impl ExporterSettings {
    pub fn build(&self) -> CommandExporter {
        CommandExporter::new(
            &self.program,
            self.args.clone(),
            Duration::from_secs(self.timeout_secs),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct RoboflowSettings {
    pub api_base: String,
    pub api_key: Option<String>,
}

impl Default for RoboflowSettings {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.into(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub work_dir: PathBuf,
    pub format: String,
    pub image_size: u32,
    pub exporter: ExporterSettings,
    pub roboflow: RoboflowSettings,
    /// Added to the built-in recipes, replacing any with the same name.
    pub recipes: Vec<ModelRecipe>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            format: DEFAULT_FORMAT.into(),
            image_size: DEFAULT_IMAGE_SIZE,
            exporter: ExporterSettings::default(),
            roboflow: RoboflowSettings::default(),
            recipes: Vec::new(),
        }
    }
}

impl Settings {
    /// Loads `explicit`, which must exist, or else the per-user config file
    /// when there is one.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return load_settings(path);
        }
        match resolve_config_path() {
            Some(path) if path.exists() => load_settings(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn catalog(&self) -> Catalog {
        let mut catalog = Catalog::builtin();
        for recipe in &self.recipes {
            catalog.register(recipe.clone());
        }
        catalog
    }
}

fn resolve_config_path() -> Option<PathBuf> {
    let project_dirs = ProjectDirs::from("com", "FoodExpiry", "ModelSetup")?;
    Some(project_dirs.config_dir().join(CONFIG_FILE))
}

fn load_settings(path: &Path) -> Result<Settings> {
    debug!("loading settings from {}", path.display());
    let bytes = fs::read(path).with_context(|| format!("failed reading {path:?}"))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("config json {path:?} could not be parsed"))
}

/// First non-blank key from the command line, the environment, then the
/// config file.
pub fn resolve_api_key(
    flag: Option<&str>,
    env: Option<&str>,
    config: Option<&str>,
) -> Option<String> {
    [flag, env, config]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|key| !key.is_empty())
        .map(str::to_string)
}

/// Asks for the key on the terminal. Returns `None` when stdin is not a
/// terminal or the answer is blank.
pub fn prompt_api_key() -> Result<Option<String>> {
    let stdin = io::stdin();
    if !stdin.is_terminal() {
        return Ok(None);
    }
    eprint!("Enter your PRIVATE Roboflow API key (https://app.roboflow.com/settings/api): ");
    io::stderr().flush().context("flush prompt")?;
    let mut line = String::new();
    stdin.lock().read_line(&mut line).context("read API key")?;
    Ok(resolve_api_key(Some(&line), None, None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_export_tflite_at_640() {
        let settings = Settings::default();
        assert_eq!(settings.format, "tflite");
        assert_eq!(settings.image_size, 640);
        assert_eq!(settings.exporter.program, "yolo");
        assert_eq!(settings.exporter.timeout_secs, 900);
        assert_eq!(settings.roboflow.api_base, "https://api.roboflow.com");
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "imageSize": 320, "exporter": { "program": "/opt/venv/bin/yolo" } }"#,
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.image_size, 320);
        assert_eq!(settings.exporter.program, "/opt/venv/bin/yolo");
        assert_eq!(settings.exporter.args, ExporterSettings::default().args);
        assert_eq!(settings.format, "tflite");
    }

    #[test]
    fn explicit_missing_config_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load(Some(&dir.path().join("nope.json"))).is_err());
    }

    #[test]
    fn malformed_config_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(Settings::load(Some(&path)).is_err());
    }

    #[test]
    fn config_recipes_extend_catalog() {
        let mut settings = Settings::default();
        let mut recipe = Catalog::builtin().find("foodvision").unwrap().clone();
        recipe.name = "foodvision-320".into();
        settings.recipes.push(recipe);

        let catalog = settings.catalog();
        assert!(catalog.find("foodvision-320").is_some());
        assert!(catalog.find("foodvision").is_some());
    }

    #[test]
    fn api_key_precedence_skips_blanks() {
        assert_eq!(
            resolve_api_key(Some("flag"), Some("env"), Some("config")),
            Some("flag".into())
        );
        assert_eq!(
            resolve_api_key(Some("  "), Some(" env\n"), Some("config")),
            Some("env".into())
        );
        assert_eq!(resolve_api_key(None, None, Some("config")), Some("config".into()));
        assert_eq!(resolve_api_key(None, Some(""), None), None);
    }
}
