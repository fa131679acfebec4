pub mod pipeline;
pub mod settings;

pub use pipeline::{SetupOptions, SetupPipeline, SetupReport};
pub use settings::{prompt_api_key, resolve_api_key, Settings, ENV_API_KEY};
