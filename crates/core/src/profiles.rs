use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFIG_DIR_ENV: &str = "SQLNAV_CONFIG_DIR";
const APP_DIR_NAME: &str = "sqlnav";
const PROFILES_FILE_NAME: &str = "connections.json";

/// Database engines a profile can target.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Postgres,
    Mysql,
    #[serde(rename = "sqlserver")]
    SqlServer,
}

impl EngineKind {
    pub const ALL: [Self; 3] = [Self::Postgres, Self::Mysql, Self::SqlServer];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
            Self::SqlServer => "sqlserver",
        }
    }

    #[must_use]
    pub fn default_port(self) -> u16 {
        match self {
            Self::Postgres => 5432,
            Self::Mysql => 3306,
            Self::SqlServer => 1433,
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PasswordSource {
    #[default]
    Config,
    Env,
    Keyring,
}

impl PasswordSource {
    pub const ALL: [Self; 3] = [Self::Config, Self::Env, Self::Keyring];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Env => "env",
            Self::Keyring => "keyring",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionProfile {
    #[serde(rename = "type")]
    pub engine: EngineKind,
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub password_source: PasswordSource,
}

impl ConnectionProfile {
    #[must_use]
    pub fn new(
        engine: EngineKind,
        name: impl Into<String>,
        host: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            name: name.into(),
            host: host.into(),
            port: 0,
            user: user.into(),
            password: String::new(),
            database: None,
            tls: false,
            password_source: PasswordSource::Config,
        }
    }

    /// Port to dial, falling back to the engine default when unset.
    #[must_use]
    pub fn effective_port(&self) -> u16 {
        if self.port == 0 {
            self.engine.default_port()
        } else {
            self.port
        }
    }
}

/// Text form of a profile while it is being created or edited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileDraft {
    /// Name of the stored profile this draft replaces; `None` adds a new one.
    pub original: Option<String>,
    pub engine: EngineKind,
    pub name: String,
    pub host: String,
    pub port: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub tls: bool,
    pub password_source: PasswordSource,
}

impl Default for ProfileDraft {
    fn default() -> Self {
        Self {
            original: None,
            engine: EngineKind::Postgres,
            name: String::new(),
            host: String::new(),
            port: String::new(),
            user: String::new(),
            password: String::new(),
            database: String::new(),
            tls: false,
            password_source: PasswordSource::Config,
        }
    }
}

impl ProfileDraft {
    #[must_use]
    pub fn edit(profile: &ConnectionProfile) -> Self {
        Self {
            original: Some(profile.name.clone()),
            engine: profile.engine,
            name: profile.name.clone(),
            host: profile.host.clone(),
            port: if profile.port == 0 {
                String::new()
            } else {
                profile.port.to_string()
            },
            user: profile.user.clone(),
            password: profile.password.clone(),
            database: profile.database.clone().unwrap_or_default(),
            tls: profile.tls,
            password_source: profile.password_source,
        }
    }

    /// A new profile prefilled from `profile`, named `<name> copy`.
    #[must_use]
    pub fn duplicate(profile: &ConnectionProfile) -> Self {
        Self {
            original: None,
            name: format!("{} copy", profile.name),
            ..Self::edit(profile)
        }
    }

    /// Validates the fields: name and host are required, the port is empty
    /// (engine default) or 1-65535.
    pub fn build(&self) -> Result<ConnectionProfile, DraftError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(DraftError::MissingName);
        }
        let host = self.host.trim();
        if host.is_empty() {
            return Err(DraftError::MissingHost);
        }
        let port = match self.port.trim() {
            "" => 0,
            port => port
                .parse::<u16>()
                .ok()
                .filter(|port| *port != 0)
                .ok_or_else(|| DraftError::InvalidPort(port.to_string()))?,
        };
        let database = Some(self.database.trim())
            .filter(|database| !database.is_empty())
            .map(str::to_string);

        Ok(ConnectionProfile {
            engine: self.engine,
            name: name.to_string(),
            host: host.to_string(),
            port,
            user: self.user.trim().to_string(),
            password: self.password.clone(),
            database,
            tls: self.tls,
            password_source: self.password_source,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DraftError {
    #[error("name is required")]
    MissingName,
    #[error("host is required")]
    MissingHost,
    #[error("invalid port `{0}`, expected 1-65535")]
    InvalidPort(String),
    #[error("a connection named `{0}` already exists")]
    DuplicateName(String),
}

#[derive(Debug, Error)]
pub enum ProfilesError {
    #[error("config directory is unavailable for this platform")]
    ConfigDirUnavailable,
    #[error("failed to read connections file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse connections file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to create config directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize connections: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write connections file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Ordered list of connection profiles backed by a JSON file.
#[derive(Debug, Clone)]
pub struct FileProfilesStore {
    path: PathBuf,
    profiles: Vec<ConnectionProfile>,
}

impl FileProfilesStore {
    pub fn load_default() -> Result<Self, ProfilesError> {
        let path = default_profiles_path()?;
        Self::load_from_path(path)
    }

    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, ProfilesError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self {
                path,
                profiles: Vec::new(),
            });
        }

        let raw = fs::read_to_string(&path).map_err(|source| ProfilesError::Read {
            path: path.clone(),
            source,
        })?;

        if raw.trim().is_empty() {
            return Ok(Self {
                path,
                profiles: Vec::new(),
            });
        }

        let profiles: Vec<ConnectionProfile> =
            serde_json::from_str(&raw).map_err(|source| ProfilesError::Parse {
                path: path.clone(),
                source,
            })?;

        Ok(Self { path, profiles })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn profiles(&self) -> &[ConnectionProfile] {
        &self.profiles
    }

    #[must_use]
    pub fn profile(&self, name: &str) -> Option<&ConnectionProfile> {
        self.profiles.iter().find(|profile| profile.name == name)
    }

    /// Validates `draft` and stores it. An edit replaces its original in
    /// place, keeping the list order across renames; anything else is
    /// appended. Names stay unique.
    pub fn apply_draft(&mut self, draft: &ProfileDraft) -> Result<ConnectionProfile, DraftError> {
        let profile = draft.build()?;
        let original = draft.original.as_deref();
        let taken = self
            .profiles
            .iter()
            .any(|existing| existing.name == profile.name && Some(existing.name.as_str()) != original);
        if taken {
            return Err(DraftError::DuplicateName(profile.name));
        }

        match original.and_then(|name| self.profiles.iter().position(|existing| existing.name == name)) {
            Some(index) => self.profiles[index] = profile.clone(),
            None => self.profiles.push(profile.clone()),
        }
        Ok(profile)
    }

    #[must_use]
    pub fn delete_profile(&mut self, name: &str) -> bool {
        let original_len = self.profiles.len();
        self.profiles.retain(|profile| profile.name != name);
        self.profiles.len() != original_len
    }

    pub fn persist(&self) -> Result<(), ProfilesError> {
        if let Some(parent_dir) = self.path.parent() {
            fs::create_dir_all(parent_dir).map_err(|source| ProfilesError::CreateDir {
                path: parent_dir.to_path_buf(),
                source,
            })?;
        }

        let rendered = serde_json::to_string_pretty(&self.profiles)
            .map_err(|source| ProfilesError::Serialize { source })?;

        fs::write(&self.path, rendered).map_err(|source| ProfilesError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

/// Per-user application directory, `<config dir>/sqlnav`.
pub fn app_config_dir() -> Result<PathBuf, ProfilesError> {
    let base_dir = if let Some(custom) = env::var_os(CONFIG_DIR_ENV) {
        PathBuf::from(custom)
    } else if cfg!(target_os = "windows") {
        env::var_os("APPDATA")
            .map(PathBuf::from)
            .ok_or(ProfilesError::ConfigDirUnavailable)?
    } else if let Some(xdg_config_home) = env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config_home)
    } else {
        let home = env::var_os("HOME").ok_or(ProfilesError::ConfigDirUnavailable)?;
        PathBuf::from(home).join(".config")
    };

    Ok(base_dir.join(APP_DIR_NAME))
}

pub fn default_profiles_path() -> Result<PathBuf, ProfilesError> {
    Ok(app_config_dir()?.join(PROFILES_FILE_NAME))
}
