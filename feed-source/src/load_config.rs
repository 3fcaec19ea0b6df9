/// `load_config` module: reads the YAML source definition the CLI runs against.
///
/// The file holds a single `source` section in the shape of
/// [`SourceConfig`]. Header values may reference environment variables as
/// `${NAME}`, so tokens stay out of the file; they are expanded here, after
/// `.env` has been loaded by `main`.
///
/// # Errors
/// Every failure is an `anyhow::Error` naming the config path and is surfaced
/// at the CLI boundary.
use anyhow::{anyhow, Context, Result};
use feed_source_core::config::SourceConfig;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{error, info};

#[derive(Debug, Deserialize)]
pub struct CliConfig {
    pub source: SourceConfig,
}

/// Loads and validates the config file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow!("Failed to read config file {:?}: {}", path_ref, e));
        }
    };

    let mut config: CliConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow!("Failed to parse config YAML {:?}: {e}", path_ref));
        }
    };

    for (name, value) in config.source.headers.iter_mut() {
        *value = expand_env(value)
            .with_context(|| format!("header `{name}` in {}", path_ref.display()))?;
    }

    config
        .source
        .parser_config()
        .with_context(|| format!("Invalid source in {}", path_ref.display()))?;

    Ok(config)
}

/// Replaces every `${NAME}` in `value` with the environment variable `NAME`.
pub fn expand_env(value: &str) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| anyhow!("unterminated `${{` in `{value}`"))?;
        let name = &after[..end];
        let resolved = std::env::var(name)
            .with_context(|| format!("environment variable {name} is not set"))?;
        out.push_str(&resolved);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
