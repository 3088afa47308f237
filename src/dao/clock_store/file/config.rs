use std::path::PathBuf;

/// Environment variable overriding the data directory.
const DATA_DIR_ENV: &str = "QUARTER_CLOCK_DATA_DIR";

/// Where the file backend keeps its collection files.
#[derive(Debug, Clone)]
pub struct FileConfig {
    pub directory: PathBuf,
}

impl FileConfig {
    /// Use `directory` as the data directory.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Take the data directory from the environment, falling back to `default`.
    pub fn from_env_or(default: impl Into<PathBuf>) -> Self {
        std::env::var_os(DATA_DIR_ENV)
            .map(PathBuf::from)
            .filter(|path| !path.as_os_str().is_empty())
            .map(Self::new)
            .unwrap_or_else(|| Self::new(default))
    }
}
