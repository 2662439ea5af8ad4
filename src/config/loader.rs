use std::path::Path;

use super::{AppConfig, ConfigError};

/// Load configuration from a YAML file
///
/// Keys left out of the file take their built-in defaults.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig, ConfigError> {
    let path = path.as_ref();

    let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ConfigError::NotFound(path.display().to_string()),
        _ => ConfigError::Io(e),
    })?;
    tracing::debug!(path = %path.display(), bytes = content.len(), "Read configuration file");

    Ok(serde_yaml::from_str(&content)?)
}
