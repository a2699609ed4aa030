use sqlnav_core::driver::DriverError;
use sqlnav_core::profiles::{ConnectionProfile, PasswordSource};

pub const PASSWORD_ENV: &str = "SQLNAV_DB_PASSWORD";

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
const KEYRING_SERVICE: &str = "sqlnav";

/// Password storage keyed by profile name. Calls may block.
pub trait PasswordVault {
    /// `Ok(None)` when nothing is stored for `profile`.
    fn load(&self, profile: &str) -> Result<Option<String>, DriverError>;

    fn store(&self, profile: &str, password: &str) -> Result<(), DriverError>;
}

/// The platform keyring (Secret Service, Keychain, Credential Manager).
#[derive(Debug, Clone, Copy, Default)]
pub struct OsKeyring;

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
impl PasswordVault for OsKeyring {
    fn load(&self, profile: &str) -> Result<Option<String>, DriverError> {
        match keyring_entry(profile)?.get_password() {
            Ok(password) => Ok(Some(password).filter(|pw| !pw.is_empty())),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(keyring_error(profile, &error)),
        }
    }

    fn store(&self, profile: &str, password: &str) -> Result<(), DriverError> {
        keyring_entry(profile)?
            .set_password(password)
            .map_err(|error| keyring_error(profile, &error))
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
impl PasswordVault for OsKeyring {
    fn load(&self, _profile: &str) -> Result<Option<String>, DriverError> {
        Ok(None)
    }

    fn store(&self, _profile: &str, _password: &str) -> Result<(), DriverError> {
        Ok(())
    }
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn keyring_entry(profile: &str) -> Result<keyring::Entry, DriverError> {
    keyring::Entry::new(KEYRING_SERVICE, profile).map_err(|error| keyring_error(profile, &error))
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn keyring_error(profile: &str, error: &keyring::Error) -> DriverError {
    DriverError::new(format!("keyring lookup for profile `{profile}` failed: {error}"))
}

/// Password for `profile` according to its `password_source`. Keyring
/// access runs on the blocking pool.
pub async fn resolve_password(profile: &ConnectionProfile) -> Result<Option<String>, DriverError> {
    let env_password = std::env::var(PASSWORD_ENV)
        .ok()
        .filter(|pw| !pw.is_empty());

    if profile.password_source != PasswordSource::Keyring {
        return resolve_password_with(profile, env_password, &OsKeyring);
    }

    let profile = profile.clone();
    tokio::task::spawn_blocking(move || resolve_password_with(&profile, env_password, &OsKeyring))
        .await
        .map_err(|error| DriverError::new(format!("keyring lookup task: {error}")))?
}

fn resolve_password_with(
    profile: &ConnectionProfile,
    env_password: Option<String>,
    vault: &dyn PasswordVault,
) -> Result<Option<String>, DriverError> {
    match profile.password_source {
        PasswordSource::Config => {
            Ok((!profile.password.is_empty()).then(|| profile.password.clone()))
        }
        PasswordSource::Env => Ok(env_password),
        PasswordSource::Keyring => {
            let stored = match vault.load(&profile.name) {
                Ok(stored) => stored,
                Err(error) if env_password.is_none() => return Err(error),
                Err(error) => {
                    tracing::debug!(profile = %profile.name, %error, "keyring unavailable, using {PASSWORD_ENV}");
                    None
                }
            };
            if stored.is_some() {
                return Ok(stored);
            }

            if let Some(password) = env_password {
                if let Err(error) = vault.store(&profile.name, &password) {
                    tracing::debug!(profile = %profile.name, %error, "could not store password in keyring");
                }
                return Ok(Some(password));
            }

            Ok(None)
        }
    }
}
