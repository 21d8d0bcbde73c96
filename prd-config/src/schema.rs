//! Strongly typed configuration schemas.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use prd_primitives::ObjectId;
use serde::{Deserialize, Serialize};

use crate::{ConfigError, ConfigResult};

/// Name of the persisted mapping inside a project directory.
pub const MAPPING_FILENAME: &str = "mapping.yaml";
/// Directory holding the downloaded source environment.
pub const SOURCE_DIRNAME: &str = "source";
/// Organization attributes that are carried over to the target.
pub const ORGANIZATION_FIELDS: [&str; 2] = ["ui_settings", "metadata"];
/// Placeholder URL given to private hooks whose real URL is unknown.
pub const PRIVATE_HOOK_DUMMY_URL: &str = "https://example.com";

const DEFAULT_MAX_CONCURRENCY: usize = 16;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Access details for one environment.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentCredentials {
    /// API base, e.g. `https://tenant.example.com/api/v1`.
    pub api_base: String,
    /// Static API token.
    #[serde(default)]
    pub token: Option<String>,
    /// Account name; only used to detect same-organization releases.
    #[serde(default)]
    pub username: Option<String>,
    /// Account password; only used to detect same-organization releases.
    #[serde(default)]
    pub password: Option<String>,
}

impl std::fmt::Debug for EnvironmentCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentCredentials")
            .field("api_base", &self.api_base)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl EnvironmentCredentials {
    /// API base without a trailing slash.
    #[must_use]
    pub fn api_url(&self) -> &str {
        self.api_base.trim_end_matches('/')
    }

    fn same_account(&self, other: &Self) -> bool {
        self.api_url() == other.api_url()
            && ((self.username.is_some()
                && self.username == other.username
                && self.password == other.password)
                || (self.token.is_some() && self.token == other.token))
    }
}

/// Raw contents of `credentials.json`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Environment objects are read from.
    pub source: EnvironmentCredentials,
    /// Environment objects are released to.
    #[serde(default)]
    pub target: Option<EnvironmentCredentials>,
    /// Releases inside the source organization.
    #[serde(default)]
    pub use_same_org_as_target: bool,
}

impl Credentials {
    /// Decides which environments take part in the release.
    ///
    /// A target identical to the source (same API base and same account)
    /// is treated as a same-organization release.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the source has no API base, or
    /// when no target is configured and `use_same_org_as_target` is not set.
    pub fn resolve(self) -> ConfigResult<Environments> {
        if self.source.api_base.trim().is_empty() {
            return Err(ConfigError::invalid("source.api_base is required"));
        }
        if self.use_same_org_as_target {
            return Ok(Environments {
                target: self.source.clone(),
                source: self.source,
                same_organization: true,
            });
        }

        let target = self
            .target
            .filter(|target| !target.api_base.trim().is_empty())
            .ok_or_else(|| {
                ConfigError::invalid(
                    "missing target credentials; set \"use_same_org_as_target\": true to release inside the source organization",
                )
            })?;
        let same_organization = self.source.same_account(&target);
        Ok(Environments {
            source: self.source,
            target,
            same_organization,
        })
    }
}

/// Validated source and target environments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Environments {
    /// Environment objects are read from.
    pub source: EnvironmentCredentials,
    /// Environment objects are released to.
    pub target: EnvironmentCredentials,
    /// Source and target are the same organization.
    pub same_organization: bool,
}

/// Everything a release needs to know before it starts.
#[derive(Clone, Debug)]
pub struct ReleaseConfig {
    project_dir: PathBuf,
    environments: Environments,
    organization_fields: Vec<String>,
    private_hook_dummy_url: String,
    token_owner: Option<ObjectId>,
    max_concurrency: NonZeroUsize,
    request_timeout: Duration,
    dry_run: bool,
}

impl ReleaseConfig {
    /// Creates a configuration with default limits.
    #[must_use]
    pub fn new(project_dir: impl Into<PathBuf>, environments: Environments) -> Self {
        Self {
            project_dir: project_dir.into(),
            environments,
            organization_fields: ORGANIZATION_FIELDS.map(str::to_owned).to_vec(),
            private_hook_dummy_url: PRIVATE_HOOK_DUMMY_URL.to_owned(),
            token_owner: None,
            max_concurrency: NonZeroUsize::new(DEFAULT_MAX_CONCURRENCY).expect("non-zero"),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            dry_run: false,
        }
    }

    /// Sets the number of remote calls allowed in flight.
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: NonZeroUsize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Fixes the target user that will own hook tokens.
    #[must_use]
    pub fn with_token_owner(mut self, user: ObjectId) -> Self {
        self.token_owner = Some(user);
        self
    }

    /// Stops after override validation.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Replaces the organization attribute whitelist.
    #[must_use]
    pub fn with_organization_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.organization_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Project root.
    #[must_use]
    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// Path of the persisted mapping.
    #[must_use]
    pub fn mapping_path(&self) -> PathBuf {
        self.project_dir.join(MAPPING_FILENAME)
    }

    /// Directory holding the downloaded source environment.
    #[must_use]
    pub fn source_path(&self) -> PathBuf {
        self.project_dir.join(SOURCE_DIRNAME)
    }

    /// Participating environments.
    #[must_use]
    pub fn environments(&self) -> &Environments {
        &self.environments
    }

    /// `true` when releasing inside the source organization.
    #[must_use]
    pub fn same_organization(&self) -> bool {
        self.environments.same_organization
    }

    /// Organization attributes carried over to the target.
    #[must_use]
    pub fn organization_fields(&self) -> &[String] {
        &self.organization_fields
    }

    /// Placeholder URL for private hooks.
    #[must_use]
    pub fn private_hook_dummy_url(&self) -> &str {
        &self.private_hook_dummy_url
    }

    /// Preconfigured hook token owner.
    #[must_use]
    pub fn token_owner(&self) -> Option<ObjectId> {
        self.token_owner
    }

    /// Number of remote calls allowed in flight.
    #[must_use]
    pub fn max_concurrency(&self) -> NonZeroUsize {
        self.max_concurrency
    }

    /// Per-request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// `true` when the release stops after validation.
    #[must_use]
    pub fn dry_run(&self) -> bool {
        self.dry_run
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(api_base: &str, token: &str) -> EnvironmentCredentials {
        EnvironmentCredentials {
            api_base: api_base.to_owned(),
            token: Some(token.to_owned()),
            ..EnvironmentCredentials::default()
        }
    }

    #[test]
    fn missing_target_is_rejected() {
        let credentials = Credentials {
            source: env("https://a/api/v1", "s"),
            ..Credentials::default()
        };
        assert!(matches!(
            credentials.resolve(),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn same_org_flag_reuses_source() {
        let credentials = Credentials {
            source: env("https://a/api/v1", "s"),
            target: None,
            use_same_org_as_target: true,
        };
        let environments = credentials.resolve().unwrap();
        assert!(environments.same_organization);
        assert_eq!(environments.target.api_url(), "https://a/api/v1");
    }

    #[test]
    fn identical_target_is_detected() {
        let credentials = Credentials {
            source: env("https://a/api/v1/", "s"),
            target: Some(env("https://a/api/v1", "s")),
            use_same_org_as_target: false,
        };
        assert!(credentials.resolve().unwrap().same_organization);

        let credentials = Credentials {
            source: env("https://a/api/v1", "s"),
            target: Some(env("https://b/api/v1", "t")),
            use_same_org_as_target: false,
        };
        assert!(!credentials.resolve().unwrap().same_organization);
    }

    #[test]
    fn debug_output_hides_secrets() {
        let rendered = format!("{:?}", env("https://a", "secret-token"));
        assert!(!rendered.contains("secret-token"));
    }
}
