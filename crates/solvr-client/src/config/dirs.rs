use directories::ProjectDirs;
use std::path::PathBuf;

use crate::error::ConfigError;

/// Application directories under the XDG base directories
#[derive(Debug, Clone)]
pub struct Directories {
    /// Config directory (~/.config/solvr)
    pub config: PathBuf,

    /// Data directory (~/.local/share/solvr)
    pub data: PathBuf,

    /// Config file path
    pub config_file: PathBuf,

    /// Persistent state file
    pub state_file: PathBuf,
}

impl Directories {
    /// Create a new `Directories` instance with standard XDG paths.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn new() -> Result<Self, ConfigError> {
        let project = ProjectDirs::from("", "", "solvr").ok_or_else(|| {
            ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "could not determine the home directory",
            ))
        })?;

        let config = project.config_dir().to_path_buf();
        let data = project.data_dir().to_path_buf();

        Ok(Self {
            config_file: config.join("config.json"),
            state_file: data.join("state.json"),
            config,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_returns_xdg_paths() {
        let Ok(dirs) = Directories::new() else {
            return;
        };

        assert!(dirs.config.to_string_lossy().contains("solvr"));
        assert!(dirs.data.to_string_lossy().contains("solvr"));
        assert!(dirs.config_file.to_string_lossy().ends_with("config.json"));
        assert!(dirs.state_file.to_string_lossy().ends_with("state.json"));
    }
}
