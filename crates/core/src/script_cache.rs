use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::profiles::{app_config_dir, ProfilesError};

#[derive(Debug, Error)]
pub enum ScriptCacheError {
    #[error("failed to read script at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to create script directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write script at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Per-(profile, database) SQL scratch files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptCache {
    dir: PathBuf,
}

impl ScriptCache {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn default_location() -> Result<Self, ProfilesError> {
        Ok(Self::new(app_config_dir()?.join("scripts")))
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn path_for(&self, profile: &str, database: &str) -> PathBuf {
        self.dir.join(format!(
            "{}.{}.sql",
            file_component(profile),
            file_component(database)
        ))
    }

    /// Returns `None` when no script was saved yet.
    pub fn load(&self, profile: &str, database: &str) -> Result<Option<String>, ScriptCacheError> {
        let path = self.path_for(profile, database);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ScriptCacheError::Read { path, source }),
        }
    }

    pub fn save(&self, profile: &str, database: &str, text: &str) -> Result<(), ScriptCacheError> {
        fs::create_dir_all(&self.dir).map_err(|source| ScriptCacheError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.path_for(profile, database);
        fs::write(&path, text).map_err(|source| ScriptCacheError::Write { path, source })
    }
}

fn file_component(raw: &str) -> String {
    raw.chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect()
}
