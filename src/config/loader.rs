//! Process settings: listen address, services directory, log format.
//!
//! Settings come from an optional settings file (YAML, JSON, TOML or INI by
//! extension) layered under `CANOPY_*` environment variables. Command line
//! flags override both in the binary.
use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Address the HTTP listener binds to
    pub listen_addr: String,
    /// Root folder for service checkouts and build hashes
    pub services_dir: PathBuf,
    pub log_format: LogFormat,
    /// Reload automatically when the config file changes on disk
    pub watch: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            services_dir: PathBuf::from("./services"),
            log_format: LogFormat::default(),
            watch: false,
        }
    }
}

fn file_format(path: &Path) -> FileFormat {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Toml,
    }
}

/// Load settings from `settings_file` (if given) and the environment.
pub fn load_settings(settings_file: Option<&Path>) -> Result<Settings> {
    let mut builder = Config::builder();

    if let Some(path) = settings_file {
        let name = path
            .to_str()
            .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", path.display()))?;
        builder = builder.add_source(File::new(name, file_format(path)));
    }

    let settings = builder
        .add_source(Environment::with_prefix("CANOPY").try_parsing(true))
        .build()
        .wrap_err("Failed to build settings")?;

    settings.try_deserialize().with_context(|| match settings_file {
        Some(path) => format!("Failed to deserialize settings from {}", path.display()),
        None => "Failed to deserialize settings from environment".to_string(),
    })
}
