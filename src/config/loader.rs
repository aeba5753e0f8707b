use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::ServerConfig;

/// Defaults every configuration is layered on top of.
pub const DEFAULT_CONFIG: &str = include_str!("default.yaml");

/// Prefix of environment overrides, e.g. `SWITCHYARD__HTTP__PORT=9000`.
pub const ENV_PREFIX: &str = "SWITCHYARD";

/// Load configuration: embedded defaults, then the optional file, then the
/// environment. Supported file formats: YAML, JSON, TOML.
pub async fn load_config(config_path: Option<&str>) -> Result<ServerConfig> {
    load_config_sync(config_path)
}

/// Load configuration synchronously
pub fn load_config_sync(config_path: Option<&str>) -> Result<ServerConfig> {
    load_with_environment(config_path, environment())
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

fn file_format(path: &Path) -> FileFormat {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        _ => FileFormat::Yaml,
    }
}

fn load_with_environment(config_path: Option<&str>, env: Environment) -> Result<ServerConfig> {
    let mut builder =
        Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Yaml));

    let source_name = match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            builder = builder.add_source(File::new(path_str, file_format(path)).required(true));
            path.display().to_string()
        }
        None => "built-in defaults".to_string(),
    };

    let settings = builder
        .add_source(env)
        .build()
        .with_context(|| format!("Failed to build config from {source_name}"))?;

    settings
        .try_deserialize::<ServerConfig>()
        .with_context(|| format!("Failed to deserialize config from {source_name}"))
}
