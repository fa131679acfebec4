use serde::{Deserialize, Serialize};

use crate::artifact::Destination;

pub const ANDROID_ML_DIR: &str = "app/src/main/ml";
pub const ANDROID_ASSETS_DIR: &str = "app/src/main/assets";

const FOODVISION_URI: &str = "https://github.com/Nightey3s/foodvision/raw/main/best.pt";
const YOLO11N_URI: &str =
    "https://github.com/ultralytics/assets/releases/download/v8.3.0/yolo11n.pt";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ModelSource {
    /// Plain HTTP download, e.g. a GitHub raw or release asset.
    GithubRaw { uri: String },
    #[serde(rename_all = "camelCase")]
    Roboflow {
        workspace: String,
        project: String,
        version: u32,
        #[serde(default = "default_roboflow_format")]
        format: String,
    },
    Local { path: String },
}

fn default_roboflow_format() -> String {
    "pt".into()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveFormat {
    #[default]
    File,
    Zip,
}

impl ArchiveFormat {
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::File => "bin",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModelRecipe {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub source: ModelSource,
    /// File the weights are stored as in the working directory, or looked up
    /// inside an extracted download.
    pub weights_filename: String,
    /// Extra base names the exporter output may carry.
    #[serde(default)]
    pub aliases: Vec<String>,
    pub destination: Destination,
    #[serde(default)]
    pub archive_format: ArchiveFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl ModelRecipe {
    /// Stem of the weights file, which the exporter uses to name its output.
    #[must_use]
    pub fn base_name(&self) -> String {
        std::path::Path::new(&self.weights_filename)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.weights_filename.clone())
    }

    #[must_use]
    pub fn needs_api_key(&self) -> bool {
        matches!(self.source, ModelSource::Roboflow { .. })
    }
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    recipes: Vec<ModelRecipe>,
}

impl Catalog {
    pub fn builtin() -> Self {
        Self {
            recipes: default_recipes(),
        }
    }

    pub fn register(&mut self, recipe: ModelRecipe) {
        if let Some(existing) = self
            .recipes
            .iter_mut()
            .find(|current| current.name == recipe.name)
        {
            *existing = recipe;
        } else {
            self.recipes.push(recipe);
        }
    }

    pub fn find(&self, name: &str) -> Option<&ModelRecipe> {
        self.recipes.iter().find(|recipe| recipe.name == name)
    }

    pub fn recipes(&self) -> &[ModelRecipe] {
        &self.recipes
    }

    pub fn names(&self) -> Vec<&str> {
        self.recipes.iter().map(|recipe| recipe.name.as_str()).collect()
    }
}

fn default_recipes() -> Vec<ModelRecipe> {
    vec![
        ModelRecipe {
            name: "foodvision".into(),
            description: "FoodVision YOLOv8, 55 food classes".into(),
            source: ModelSource::GithubRaw {
                uri: FOODVISION_URI.into(),
            },
            weights_filename: "foodvision_best.pt".into(),
            aliases: vec!["best".into()],
            destination: Destination::new(ANDROID_ML_DIR, "foodvision_yolov8.tflite"),
            archive_format: ArchiveFormat::File,
            checksum: None,
        },
        ModelRecipe {
            name: "food-yolov8n".into(),
            description: "FoodVision weights exported under the food_yolov8n name".into(),
            source: ModelSource::GithubRaw {
                uri: FOODVISION_URI.into(),
            },
            weights_filename: "food_yolov8n.pt".into(),
            aliases: vec!["best".into()],
            destination: Destination::new(ANDROID_ML_DIR, "food_yolov8n_float32.tflite"),
            archive_format: ArchiveFormat::File,
            checksum: None,
        },
        ModelRecipe {
            name: "roboflow-food".into(),
            description: "Roboflow Food Imgae - YOLO, 85 food classes".into(),
            source: ModelSource::Roboflow {
                workspace: "food-image-classification".into(),
                project: "food-imgae-yolo".into(),
                version: 1,
                format: default_roboflow_format(),
            },
            weights_filename: "best.pt".into(),
            aliases: vec![],
            destination: Destination::new(ANDROID_ML_DIR, "food_yolov8_roboflow.tflite"),
            archive_format: ArchiveFormat::File,
            checksum: None,
        },
        ModelRecipe {
            name: "yolo11n".into(),
            description: "Ultralytics YOLO11n, 80 COCO classes".into(),
            source: ModelSource::GithubRaw {
                uri: YOLO11N_URI.into(),
            },
            weights_filename: "yolo11n.pt".into(),
            aliases: vec![],
            destination: Destination::new(ANDROID_ASSETS_DIR, "yolo11n_float32.tflite"),
            archive_format: ArchiveFormat::File,
            checksum: None,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_recipes_have_unique_names() {
        let catalog = Catalog::builtin();
        let mut names = catalog.names();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), catalog.recipes().len());
    }

    #[test]
    fn base_name_is_weights_stem() {
        let catalog = Catalog::builtin();
        assert_eq!(catalog.find("foodvision").unwrap().base_name(), "foodvision_best");
        assert_eq!(catalog.find("roboflow-food").unwrap().base_name(), "best");
    }

    #[test]
    fn only_hosted_recipes_need_a_key() {
        let catalog = Catalog::builtin();
        assert!(catalog.find("roboflow-food").unwrap().needs_api_key());
        assert!(!catalog.find("yolo11n").unwrap().needs_api_key());
    }

    #[test]
    fn register_replaces_by_name() {
        let mut catalog = Catalog::builtin();
        let mut recipe = catalog.find("yolo11n").unwrap().clone();
        recipe.destination = Destination::new("out", "custom.tflite");
        catalog.register(recipe);

        assert_eq!(catalog.recipes().len(), Catalog::builtin().recipes().len());
        assert_eq!(
            catalog.find("yolo11n").unwrap().destination.filename,
            "custom.tflite"
        );
    }

    #[test]
    fn recipe_parses_from_json() {
        let recipe: ModelRecipe = serde_json::from_str(
            r#"{
                "name": "custom",
                "source": { "kind": "roboflow", "workspace": "ws", "project": "p", "version": 3 },
                "weightsFilename": "best.pt",
                "destination": { "dir": "app/src/main/ml", "filename": "custom.tflite" }
            }"#,
        )
        .unwrap();

        assert_eq!(
            recipe.source,
            ModelSource::Roboflow {
                workspace: "ws".into(),
                project: "p".into(),
                version: 3,
                format: "pt".into(),
            }
        );
        assert_eq!(recipe.archive_format, ArchiveFormat::File);
        assert!(recipe.aliases.is_empty());
    }
}
