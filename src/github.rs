//! GitHub repository loader.
//!
//! [`GithubLoader`] turns a `repo:<owner>/<name> type:repo` query into
//! [`SourceItem`]s, one per text file:
//!
//! 1. `GET /repos/{owner}/{name}` on the GitHub API (bearer token) to check
//!    the repository exists and resolve its default branch and web URL.
//! 2. Shallow `git clone` of that branch into a scratch directory. The token
//!    travels as an HTTP basic auth header set through `GIT_CONFIG_*`
//!    environment variables, so it is neither in the URL nor on the command
//!    line.
//! 3. Walk the checkout on the blocking pool, applying include/exclude globs
//!    and a size limit, and keep files that decode as UTF-8.
//!
//! Errors never contain the token.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use chrono::{TimeZone, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use walkdir::WalkDir;

use crate::config::GithubConfig;
use crate::credentials::GithubToken;
use crate::models::{LoaderQuery, SourceItem};

pub const SOURCE: &str = "github";

/// Fetches repository content for ingestion.
#[async_trait]
pub trait RepositoryLoader: Send + Sync {
    async fn load(&self, query: &LoaderQuery) -> Result<Vec<SourceItem>>;
}

pub struct GithubLoader {
    token: GithubToken,
    config: GithubConfig,
    client: reqwest::Client,
    filter: Arc<FileFilter>,
}

/// Which checkout files become source items.
struct FileFilter {
    include: GlobSet,
    exclude: GlobSet,
    max_file_bytes: u64,
}

impl FileFilter {
    fn is_wanted(&self, relative: &str) -> bool {
        !self.exclude.is_match(relative) && self.include.is_match(relative)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepoInfo {
    pub full_name: String,
    pub default_branch: String,
    pub html_url: String,
}

const DEFAULT_EXCLUDES: &[&str] = &[
    "**/.git/**",
    "**/target/**",
    "**/node_modules/**",
    "**/*.lock",
    "**/package-lock.json",
    "**/*.{png,jpg,jpeg,gif,ico,bmp,webp,pdf,zip,gz,tgz,tar,jar,war,class,woff,woff2,ttf,otf,eot,mp3,mp4,mov,so,dylib,dll,exe,bin,o,a,pyc}",
];

impl GithubLoader {
    pub fn new(token: GithubToken, config: &GithubConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("repo-chat/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        excludes.extend(config.exclude_globs.iter().cloned());

        Ok(Self {
            token,
            config: config.clone(),
            client,
            filter: Arc::new(FileFilter {
                include: build_globset(&config.include_globs)?,
                exclude: build_globset(&excludes)?,
                max_file_bytes: config.max_file_bytes,
            }),
        })
    }

    /// Looks the repository up on the GitHub API.
    pub async fn repo_info(&self, query: &LoaderQuery) -> Result<RepoInfo> {
        let url = format!(
            "{}/repos/{}/{}",
            self.config.api_base.trim_end_matches('/'),
            query.owner,
            query.name
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(self.token.expose())
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("GitHub API request failed: {}", e.without_url()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
                .unwrap_or(body);
            bail!(
                "GitHub API error {} for {}: {}",
                status,
                query.full_name(),
                self.redact(message.trim())
            );
        }

        Ok(response.json().await?)
    }

    fn clone_url(&self, query: &LoaderQuery) -> String {
        format!(
            "{}/{}/{}.git",
            self.config.clone_base.trim_end_matches('/'),
            query.owner,
            query.name
        )
    }

    /// Value of the `http.extraHeader` git setting that authenticates the clone.
    fn auth_header(&self) -> String {
        let basic = base64::engine::general_purpose::STANDARD
            .encode(format!("x-access-token:{}", self.token.expose()));
        format!("AUTHORIZATION: basic {}", basic)
    }

    fn redact(&self, text: &str) -> String {
        let basic = base64::engine::general_purpose::STANDARD
            .encode(format!("x-access-token:{}", self.token.expose()));
        text.replace(&basic, "***").replace(self.token.expose(), "***")
    }

    /// The clone command. The auth header is passed through the environment,
    /// which other local users cannot read, unlike the argument list.
    fn clone_command(&self, query: &LoaderQuery, branch: &str, dest: &Path) -> Command {
        let mut command = Command::new("git");
        command
            .args(["clone", "--depth", "1", "--single-branch", "--branch", branch])
            .arg(self.clone_url(query))
            .arg(dest)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_CONFIG_COUNT", "1")
            .env("GIT_CONFIG_KEY_0", "http.extraHeader")
            .env("GIT_CONFIG_VALUE_0", self.auth_header());
        command
    }

    async fn git_clone(&self, query: &LoaderQuery, branch: &str, dest: &Path) -> Result<()> {
        let output = self
            .clone_command(query, branch, dest)
            .output()
            .await
            .with_context(|| "Failed to execute 'git clone'. Is git installed?")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git clone failed: {}", self.redact(stderr.trim()));
        }
        Ok(())
    }
}

#[async_trait]
impl RepositoryLoader for GithubLoader {
    async fn load(&self, query: &LoaderQuery) -> Result<Vec<SourceItem>> {
        let info = self.repo_info(query).await?;
        tracing::info!(repo = %info.full_name, branch = %info.default_branch, "cloning repository");

        let scratch = tempfile::Builder::new()
            .prefix("repo-chat-clone-")
            .tempdir()
            .context("Failed to create clone directory")?;
        let checkout = scratch.path().join("checkout");

        self.git_clone(query, &info.default_branch, &checkout).await?;
        let head = head_commit(&checkout).await;

        let items = collect_files(self.filter.clone(), query.clone(), info, checkout, head).await?;
        if items.is_empty() {
            bail!("no text files found in {}", query.full_name());
        }
        Ok(items)
    }
}

/// Walks the checkout on the blocking pool so a large tree does not stall
/// the runtime.
async fn collect_files(
    filter: Arc<FileFilter>,
    query: LoaderQuery,
    info: RepoInfo,
    checkout: PathBuf,
    head: HeadCommit,
) -> Result<Vec<SourceItem>> {
    tokio::task::spawn_blocking(move || walk_checkout(&filter, &query, &info, &checkout, &head))
        .await
        .context("checkout walk panicked")?
}

fn walk_checkout(
    filter: &FileFilter,
    query: &LoaderQuery,
    info: &RepoInfo,
    checkout: &Path,
    head: &HeadCommit,
) -> Result<Vec<SourceItem>> {
    let mut items = Vec::new();
    let mut skipped = 0usize;

    let walker = WalkDir::new(checkout)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path
            .strip_prefix(checkout)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");

        if !filter.is_wanted(&relative) {
            continue;
        }
        if entry.metadata()?.len() > filter.max_file_bytes {
            skipped += 1;
            continue;
        }

        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let body = match decode_text(bytes) {
            Some(b) if !b.trim().is_empty() => b,
            _ => {
                skipped += 1;
                continue;
            }
        };

        items.push(file_to_source_item(query, info, head, &relative, body));
    }

    tracing::debug!(repo = %query.full_name(), files = items.len(), skipped, "walked checkout");
    items.sort_by(|a, b| a.source_id.cmp(&b.source_id));
    Ok(items)
}

struct HeadCommit {
    sha: String,
    timestamp: i64,
}

async fn head_commit(repo_dir: &Path) -> HeadCommit {
    let output = Command::new("git")
        .args(["log", "-1", "--format=%H %ct"])
        .current_dir(repo_dir)
        .output()
        .await
        .ok()
        .filter(|o| o.status.success());

    let parsed = output.and_then(|o| {
        let text = String::from_utf8_lossy(&o.stdout).trim().to_string();
        let (sha, ts) = text.split_once(' ')?;
        Some(HeadCommit {
            sha: sha.to_string(),
            timestamp: ts.parse().ok()?,
        })
    });

    parsed.unwrap_or_else(|| HeadCommit {
        sha: "unknown".to_string(),
        timestamp: Utc::now().timestamp(),
    })
}

/// UTF-8 text without NUL bytes, or `None` for binary content.
fn decode_text(bytes: Vec<u8>) -> Option<String> {
    if bytes.contains(&0) {
        return None;
    }
    String::from_utf8(bytes).ok()
}

fn file_to_source_item(
    query: &LoaderQuery,
    info: &RepoInfo,
    head: &HeadCommit,
    relative: &str,
    body: String,
) -> SourceItem {
    let title = relative.rsplit('/').next().unwrap_or(relative).to_string();
    let reference = if head.sha == "unknown" {
        info.default_branch.as_str()
    } else {
        head.sha.as_str()
    };

    let metadata = serde_json::json!({
        "data_type": SOURCE,
        "repo": query.full_name(),
        "path": relative,
        "branch": info.default_branch,
        "sha": head.sha,
    });

    let updated = Utc
        .timestamp_opt(head.timestamp, 0)
        .single()
        .unwrap_or_else(Utc::now);

    SourceItem {
        source: SOURCE.to_string(),
        source_id: format!("{}:{}", query.full_name(), relative),
        source_url: Some(format!(
            "{}/blob/{}/{}",
            info.html_url.trim_end_matches('/'),
            reference,
            relative
        )),
        title: Some(title),
        updated_at: updated,
        body,
        metadata_json: metadata.to_string(),
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader() -> GithubLoader {
        GithubLoader::new(GithubToken::new("ghp_testtoken"), &GithubConfig::default()).unwrap()
    }

    fn query() -> LoaderQuery {
        LoaderQuery::parse("repo:octocat/Hello-World type:repo").unwrap()
    }

    #[test]
    fn default_globs_skip_vendored_and_binary_files() {
        let f = loader().filter;
        assert!(f.is_wanted("README"));
        assert!(f.is_wanted("src/main.rs"));
        assert!(!f.is_wanted("node_modules/x/index.js"));
        assert!(!f.is_wanted("target/debug/app"));
        assert!(!f.is_wanted("Cargo.lock"));
        assert!(!f.is_wanted("assets/logo.png"));
    }

    #[test]
    fn custom_excludes_are_added_to_defaults() {
        let config = GithubConfig {
            exclude_globs: vec!["docs/**".to_string()],
            ..GithubConfig::default()
        };
        let f = GithubLoader::new(GithubToken::new("t"), &config).unwrap().filter;
        assert!(!f.is_wanted("docs/guide.md"));
        assert!(!f.is_wanted("a/node_modules/b.js"));
        assert!(f.is_wanted("src/lib.rs"));
    }

    #[test]
    fn redacts_token_and_header() {
        let l = loader();
        let header = l.auth_header();
        let leaked = format!("fatal: ghp_testtoken and {}", header);
        let clean = l.redact(&leaked);
        assert!(!clean.contains("ghp_testtoken"));
        assert!(!clean.contains(header.rsplit(' ').next().unwrap()));
    }

    #[test]
    fn clone_command_keeps_token_off_the_command_line() {
        let l = loader();
        let command = l.clone_command(&query(), "master", Path::new("/tmp/checkout"));
        let cmd = command.as_std();

        let basic = l.auth_header();
        let basic = basic.rsplit(' ').next().unwrap();
        for arg in cmd.get_args() {
            let arg = arg.to_string_lossy();
            assert!(!arg.contains("ghp_testtoken"), "token in argv: {}", arg);
            assert!(!arg.contains(basic), "auth header in argv: {}", arg);
        }

        let envs: Vec<(String, String)> = cmd
            .get_envs()
            .filter_map(|(k, v)| Some((k.to_string_lossy().into(), v?.to_string_lossy().into())))
            .collect();
        assert!(envs.contains(&("GIT_CONFIG_COUNT".into(), "1".into())));
        assert!(envs.contains(&("GIT_CONFIG_KEY_0".into(), "http.extraHeader".into())));
        assert!(envs.contains(&("GIT_CONFIG_VALUE_0".into(), l.auth_header())));
    }

    #[tokio::test]
    async fn walk_skips_git_dir_large_and_binary_files() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path().to_path_buf();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::write(root.join(".git/config"), "[core]").unwrap();
        std::fs::write(root.join("README"), "Hello World!").unwrap();
        std::fs::write(root.join("src/main.rs"), "fn main() {}").unwrap();
        std::fs::write(root.join("blob.dat"), [0u8, 1, 2]).unwrap();
        std::fs::write(root.join("big.txt"), "x".repeat(64)).unwrap();

        let config = GithubConfig {
            max_file_bytes: 32,
            ..GithubConfig::default()
        };
        let l = GithubLoader::new(GithubToken::new("t"), &config).unwrap();
        let info = RepoInfo {
            full_name: "octocat/Hello-World".to_string(),
            default_branch: "master".to_string(),
            html_url: "https://github.com/octocat/Hello-World".to_string(),
        };
        let head = HeadCommit {
            sha: "7fd1a60".to_string(),
            timestamp: 1_300_000_000,
        };

        let items = collect_files(l.filter.clone(), query(), info, root, head)
            .await
            .unwrap();
        let ids: Vec<&str> = items.iter().map(|i| i.source_id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["octocat/Hello-World:README", "octocat/Hello-World:src/main.rs"]
        );
    }

    #[test]
    fn clone_url_uses_base_without_credentials() {
        let url = loader().clone_url(&query());
        assert_eq!(url, "https://github.com/octocat/Hello-World.git");
    }

    #[test]
    fn source_item_points_at_commit() {
        let info = RepoInfo {
            full_name: "octocat/Hello-World".to_string(),
            default_branch: "master".to_string(),
            html_url: "https://github.com/octocat/Hello-World".to_string(),
        };
        let head = HeadCommit {
            sha: "7fd1a60".to_string(),
            timestamp: 1_300_000_000,
        };
        let item = file_to_source_item(&query(), &info, &head, "docs/README.md", "hi".into());
        assert_eq!(item.source, "github");
        assert_eq!(item.source_id, "octocat/Hello-World:docs/README.md");
        assert_eq!(item.title.as_deref(), Some("README.md"));
        assert_eq!(
            item.source_url.as_deref(),
            Some("https://github.com/octocat/Hello-World/blob/7fd1a60/docs/README.md")
        );
        let meta: serde_json::Value = serde_json::from_str(&item.metadata_json).unwrap();
        assert_eq!(meta["data_type"], "github");
        assert_eq!(meta["repo"], "octocat/Hello-World");
        assert_eq!(item.updated_at.timestamp(), 1_300_000_000);
    }

    #[test]
    fn binary_content_is_rejected() {
        assert!(decode_text(vec![0x89, b'P', b'N', b'G', 0]).is_none());
        assert!(decode_text(vec![0xff, 0xfe]).is_none());
        assert_eq!(decode_text(b"fn main() {}".to_vec()).as_deref(), Some("fn main() {}"));
    }
}
