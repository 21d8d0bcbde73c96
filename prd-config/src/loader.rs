//! Configuration loader implementations.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::{ConfigError, ConfigResult, Credentials, ReleaseConfig};

/// Name of the credentials document inside a project directory.
pub const CREDENTIALS_FILENAME: &str = "credentials.json";

const ENV_MAX_CONCURRENCY: &str = "PRD_MAX_CONCURRENCY";
const ENV_REQUEST_TIMEOUT_SECS: &str = "PRD_REQUEST_TIMEOUT_SECS";

/// Reads and parses a credentials document.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when the file cannot be read and
/// [`ConfigError::Format`] when it is not a valid credentials document.
pub async fn load_credentials(path: impl AsRef<Path>) -> ConfigResult<Credentials> {
    let path = path.as_ref();
    let raw = tokio::fs::read(path).await.map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&raw).map_err(|err| ConfigError::Format {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}

impl ReleaseConfig {
    /// Loads the configuration of the project rooted at `project_dir`.
    ///
    /// Environment overrides are read from the process environment.
    ///
    /// # Errors
    ///
    /// Propagates credential loading, validation, and environment parsing
    /// errors.
    pub async fn load(project_dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let project_dir = project_dir.into();
        let credentials = load_credentials(project_dir.join(CREDENTIALS_FILENAME)).await?;
        let environments = credentials.resolve()?;
        debug!(
            source = environments.source.api_url(),
            target = environments.target.api_url(),
            same_organization = environments.same_organization,
            "credentials loaded"
        );
        Self::new(project_dir, environments).with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Applies `PRD_MAX_CONCURRENCY` and `PRD_REQUEST_TIMEOUT_SECS` from a
    /// custom environment source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a value is not a positive integer.
    pub fn with_env_overrides<F>(mut self, get_env: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = parse_positive(&get_env, ENV_MAX_CONCURRENCY)? {
            let permits = usize::try_from(value).map_err(|_| {
                ConfigError::invalid(format!("{ENV_MAX_CONCURRENCY} value {value} is too large"))
            })?;
            if let Some(permits) = NonZeroUsize::new(permits) {
                self = self.with_max_concurrency(permits);
            }
        }
        if let Some(secs) = parse_positive(&get_env, ENV_REQUEST_TIMEOUT_SECS)? {
            self = self.with_request_timeout(Duration::from_secs(secs));
        }
        Ok(self)
    }
}

fn parse_positive<F>(get_env: &F, key: &str) -> ConfigResult<Option<u64>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = get_env(key) else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => Err(ConfigError::invalid(format!(
            "{key} must be a positive integer, got '{raw}'"
        ))),
        Ok(value) => Ok(Some(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EnvironmentCredentials, Environments};

    fn environments() -> Environments {
        let env = EnvironmentCredentials {
            api_base: "https://a/api/v1".to_owned(),
            token: Some("t".to_owned()),
            ..EnvironmentCredentials::default()
        };
        Environments {
            source: env.clone(),
            target: env,
            same_organization: true,
        }
    }

    #[tokio::test]
    async fn loads_project_credentials() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join(CREDENTIALS_FILENAME),
            r#"{
                "source": {"api_base": "https://src/api/v1", "token": "s"},
                "target": {"api_base": "https://dst/api/v1/", "token": "t"}
            }"#,
        )
        .await
        .unwrap();

        let config = ReleaseConfig::load(dir.path()).await.unwrap();
        assert!(!config.same_organization());
        assert_eq!(config.environments().target.api_url(), "https://dst/api/v1");
        assert_eq!(config.mapping_path(), dir.path().join("mapping.yaml"));
        assert_eq!(config.organization_fields(), ["ui_settings", "metadata"]);
    }

    #[tokio::test]
    async fn missing_credentials_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ReleaseConfig::load(dir.path()).await.unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn env_overrides_apply() {
        let config = ReleaseConfig::new("/p", environments())
            .with_env_overrides(|key| match key {
                "PRD_MAX_CONCURRENCY" => Some("4".to_owned()),
                "PRD_REQUEST_TIMEOUT_SECS" => Some("5".to_owned()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.max_concurrency().get(), 4);
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn env_overrides_reject_zero() {
        let result = ReleaseConfig::new("/p", environments())
            .with_env_overrides(|key| (key == "PRD_MAX_CONCURRENCY").then(|| "0".to_owned()));
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn defaults_without_overrides() {
        let config = ReleaseConfig::new("/p", environments())
            .with_env_overrides(|_| None)
            .unwrap();
        assert_eq!(config.max_concurrency().get(), 16);
        assert!(!config.dry_run());
    }
}
