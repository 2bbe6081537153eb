//! GitHub credential resolution.
//!
//! The token is looked up in the secrets file first and in the process
//! environment second. Both lookups treat an empty value as absent.

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;

/// Key used in both the secrets file and the environment.
pub const GITHUB_TOKEN_KEY: &str = "GITHUB_TOKEN";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("GitHub token is missing. Please set it in your secrets file or environment variables.")]
    Missing,
    #[error("failed to read secrets file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse secrets file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// A GitHub bearer token. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct GithubToken(String);

impl GithubToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for GithubToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("GithubToken(***)")
    }
}

/// Top-level string entries of a TOML secrets file.
#[derive(Debug, Default)]
pub struct SecretsFile {
    values: BTreeMap<String, String>,
}

impl SecretsFile {
    /// Reads the secrets file. A file that does not exist is an empty store.
    pub fn load(path: &Path) -> Result<Self, CredentialError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(CredentialError::Read {
                    path: path.display().to_string(),
                    source: e,
                })
            }
        };
        Self::parse(&content).map_err(|e| CredentialError::Parse {
            path: path.display().to_string(),
            source: e,
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        let table: toml::Table = toml::from_str(content)?;
        let values = table
            .into_iter()
            .filter_map(|(k, v)| match v {
                toml::Value::String(s) => Some((k, s)),
                _ => None,
            })
            .collect();
        Ok(Self { values })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// Resolves the token from `secrets`, falling back to `env_lookup`.
///
/// `env_lookup` is injected so callers (and tests) decide what "the
/// environment" is; production passes [`process_env`].
pub fn resolve_github_token<F>(
    secrets: &SecretsFile,
    env_lookup: F,
) -> Result<GithubToken, CredentialError>
where
    F: Fn(&str) -> Option<String>,
{
    let from_secrets = secrets
        .get(GITHUB_TOKEN_KEY)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    if let Some(token) = from_secrets {
        tracing::debug!("GitHub token resolved from secrets file");
        return Ok(GithubToken(token));
    }

    match env_lookup(GITHUB_TOKEN_KEY) {
        Some(token) if !token.trim().is_empty() => {
            tracing::debug!("GitHub token resolved from environment");
            Ok(GithubToken(token.trim().to_string()))
        }
        _ => Err(CredentialError::Missing),
    }
}

pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Loads the secrets file at `path` and resolves the token from it or the
/// process environment.
pub fn resolve_from_path(path: &Path) -> Result<GithubToken, CredentialError> {
    let secrets = SecretsFile::load(path)?;
    resolve_github_token(&secrets, process_env)
}
