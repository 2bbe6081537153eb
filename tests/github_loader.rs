//! `GithubLoader` against a stand-in GitHub API and a local bare-bones
//! repository served over `file://`. Needs `git` on PATH.

use axum::{
    extract::Path as UrlPath,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

use repo_chat::config::GithubConfig;
use repo_chat::credentials::GithubToken;
use repo_chat::github::{GithubLoader, RepositoryLoader};
use repo_chat::models::LoaderQuery;

const TOKEN: &str = "ghp_integration_token";

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "Octocat")
        .env("GIT_AUTHOR_EMAIL", "octocat@example.com")
        .env("GIT_COMMITTER_NAME", "Octocat")
        .env("GIT_COMMITTER_EMAIL", "octocat@example.com")
        .status()
        .unwrap();
    assert!(status.success(), "git {:?} failed", args);
}

/// Creates `<root>/octocat/Hello-World.git` as a working repository.
fn create_repo(root: &Path) {
    let repo = root.join("octocat").join("Hello-World.git");
    fs::create_dir_all(repo.join("src")).unwrap();
    fs::create_dir_all(repo.join("node_modules/left-pad")).unwrap();
    fs::write(repo.join("README"), "Hello World!\n").unwrap();
    fs::write(
        repo.join("src/main.rs"),
        "fn main() {\n    println!(\"Hello World!\");\n}\n",
    )
    .unwrap();
    fs::write(repo.join("node_modules/left-pad/index.js"), "module.exports = 1;\n").unwrap();
    fs::write(repo.join("logo.png"), [0x89, b'P', b'N', b'G', 0, 0]).unwrap();
    fs::write(repo.join("empty.txt"), "   \n").unwrap();

    git(&repo, &["init", "-q"]);
    git(&repo, &["checkout", "-q", "-b", "main"]);
    git(&repo, &["add", "-A"]);
    git(&repo, &["commit", "-q", "-m", "Initial commit"]);
}

async fn repo_info(
    UrlPath((owner, name)): UrlPath<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {}", TOKEN))
        .unwrap_or(false);
    if !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"message": "Bad credentials"})),
        )
            .into_response();
    }
    if owner != "octocat" || name != "Hello-World" {
        return (StatusCode::NOT_FOUND, Json(json!({"message": "Not Found"}))).into_response();
    }
    Json(json!({
        "full_name": "octocat/Hello-World",
        "default_branch": "main",
        "html_url": "https://github.com/octocat/Hello-World",
    }))
    .into_response()
}

async fn spawn_api() -> String {
    let app = Router::new().route("/repos/{owner}/{name}", get(repo_info));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn config(api_base: &str, clone_root: &Path) -> GithubConfig {
    GithubConfig {
        api_base: api_base.to_string(),
        clone_base: format!("file://{}", clone_root.display()),
        ..GithubConfig::default()
    }
}

fn query(repo: &str) -> LoaderQuery {
    LoaderQuery::parse(&LoaderQuery::for_repo(repo)).unwrap()
}

#[tokio::test]
async fn loads_text_files_from_default_branch() {
    let tmp = TempDir::new().unwrap();
    create_repo(tmp.path());
    let api = spawn_api().await;
    let loader = GithubLoader::new(GithubToken::new(TOKEN), &config(&api, tmp.path())).unwrap();

    let items = loader.load(&query("octocat/Hello-World")).await.unwrap();

    let ids: Vec<&str> = items.iter().map(|i| i.source_id.as_str()).collect();
    assert_eq!(ids, vec!["octocat/Hello-World:README", "octocat/Hello-World:src/main.rs"]);

    let readme = &items[0];
    assert_eq!(readme.source, "github");
    assert_eq!(readme.body, "Hello World!\n");
    let url = readme.source_url.as_deref().unwrap();
    assert!(url.starts_with("https://github.com/octocat/Hello-World/blob/"));
    assert!(url.ends_with("/README"));

    let meta: serde_json::Value = serde_json::from_str(&readme.metadata_json).unwrap();
    assert_eq!(meta["branch"], "main");
    assert_eq!(meta["sha"].as_str().unwrap().len(), 40);
}

#[tokio::test]
async fn unknown_repo_reports_api_error() {
    let tmp = TempDir::new().unwrap();
    let api = spawn_api().await;
    let loader = GithubLoader::new(GithubToken::new(TOKEN), &config(&api, tmp.path())).unwrap();

    let err = loader.load(&query("octocat/missing")).await.unwrap_err();
    let msg = format!("{:#}", err);
    assert!(msg.contains("404"));
    assert!(msg.contains("Not Found"));
}

#[tokio::test]
async fn bad_token_is_rejected_without_leaking_it() {
    let tmp = TempDir::new().unwrap();
    let api = spawn_api().await;
    let loader =
        GithubLoader::new(GithubToken::new("ghp_wrong"), &config(&api, tmp.path())).unwrap();

    let err = loader.load(&query("octocat/Hello-World")).await.unwrap_err();
    let msg = format!("{:#}", err);
    assert!(msg.contains("401"));
    assert!(msg.contains("Bad credentials"));
    assert!(!msg.contains("ghp_wrong"));
}

#[tokio::test]
async fn missing_clone_source_fails() {
    let tmp = TempDir::new().unwrap();
    let api = spawn_api().await;
    // API knows the repo, but nothing exists at the clone URL.
    let loader = GithubLoader::new(GithubToken::new(TOKEN), &config(&api, tmp.path())).unwrap();

    let err = loader.load(&query("octocat/Hello-World")).await.unwrap_err();
    let msg = format!("{:#}", err);
    assert!(msg.contains("git clone failed"));
    assert!(!msg.contains(TOKEN));
}
