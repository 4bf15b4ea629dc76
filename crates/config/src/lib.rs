//! Configuration loading for presswatch.
//!
//! Configuration is layered with `figment`: built-in defaults, then an
//! optional file (TOML, YAML or JSON, picked by extension), then environment
//! variables prefixed `PRESSWATCH_` using `__` to separate nested keys
//! (`PRESSWATCH_SCRAPE__RETENTION_DAYS=30`).

pub mod error;
mod models;

pub use crate::models::{
    Config, DatabaseConfig, FetchConfig, IdentityConfig, LockConfig, MigrateConfig, ScrapeConfig, SourceConfig,
    StorageConfig,
};
use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "PRESSWATCH_";

pub(crate) fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "presswatch", "presswatch")
}

/// Location of the configuration file used when none is given explicitly.
pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Build the layered figment without extracting it.
pub fn figment(path: Option<&Path>) -> Figment {
    let mut figment = Figment::from(Serialized::defaults(Config::default()));
    let path = path.map(Path::to_path_buf).or_else(default_config_path);
    if let Some(path) = path {
        tracing::debug!(path = %path.display(), "Reading configuration file");
        figment = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
            Some("json") => figment.merge(Json::file(path)),
            _ => figment.merge(Toml::file(path)),
        };
    }
    figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load and validate configuration.
///
/// A missing file is not an error (the defaults and environment still
/// apply); a file that exists but doesn't parse is.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let config: Config = figment(path).extract().or_raise(|| ErrorKind::Load)?;
    config.validate()?;
    Ok(config)
}
