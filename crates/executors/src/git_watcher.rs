//! Git watcher router (§4.4): opens `/workspace` as a repository (creating
//! one on first use) and exposes commit/diff/log operations over it.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use git2::{DiffFormat, Repository, Signature};
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::error::GitWatcherError;

const AUTHOR_NAME: &str = "User";
const AUTHOR_EMAIL: &str = "user@example.com";

fn open_or_init(workspace_root: &std::path::Path) -> Result<Repository, GitWatcherError> {
    match Repository::open(workspace_root) {
        Ok(repo) => Ok(repo),
        Err(_) => {
            let repo = Repository::init(workspace_root)?;
            let mut config = repo.config()?;
            config.set_str("user.name", AUTHOR_NAME)?;
            config.set_str("user.email", AUTHOR_EMAIL)?;
            Ok(repo)
        }
    }
}

fn signature() -> Result<Signature<'static>, GitWatcherError> {
    Signature::now(AUTHOR_NAME, AUTHOR_EMAIL).map_err(GitWatcherError::from)
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for GitWatcherError {
    fn into_response(self) -> Response {
        let status = match &self {
            GitWatcherError::UnknownCommit(_) => StatusCode::NOT_FOUND,
            GitWatcherError::Git(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

#[derive(Deserialize)]
pub struct CommitChangesRequest {
    commit_message: String,
}

#[derive(Serialize)]
struct CommitChangesResponse {
    commit_id: String,
}

/// Stages every change under `/workspace` and commits it. A commit with no
/// staged changes relative to `HEAD` is a no-op that returns the current
/// `HEAD` id rather than an empty commit.
pub async fn commit_changes(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CommitChangesRequest>,
) -> Response {
    let workspace_root = state.config.workspace_root.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<String, GitWatcherError> {
        let repo = open_or_init(&workspace_root)?;
        let mut index = repo.index()?;
        index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)?;
        index.write()?;
        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;

        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        if let Some(ref parent_commit) = parent {
            if parent_commit.tree_id() == tree_id {
                return Ok(parent_commit.id().to_string());
            }
        }

        let sig = signature()?;
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        let commit_id = repo.commit(Some("HEAD"), &sig, &sig, &req.commit_message, &tree, &parents)?;
        Ok(commit_id.to_string())
    })
    .await;

    match result {
        Ok(Ok(commit_id)) => Json(CommitChangesResponse { commit_id }).into_response(),
        Ok(Err(e)) => e.into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

#[derive(Deserialize)]
pub struct GenerateDiffRequest {
    #[serde(default)]
    commit_a: Option<String>,
    #[serde(default)]
    commit_b: Option<String>,
}

#[derive(Serialize)]
struct DiffResponse {
    diff: String,
}

/// Diffs `commit_a` against `commit_b`; when both are absent, diffs the
/// working tree (including unstaged changes) against `HEAD` (§4.4).
pub async fn generate_diff(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GenerateDiffRequest>,
) -> Response {
    let workspace_root = state.config.workspace_root.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<String, GitWatcherError> {
        let repo = open_or_init(&workspace_root)?;

        let diff = match (req.commit_a, req.commit_b) {
            (None, None) => {
                let head_tree = repo.head().ok().and_then(|h| h.peel_to_tree().ok());
                repo.diff_tree_to_workdir_with_index(head_tree.as_ref(), None)?
            }
            (a, b) => {
                let tree_a = a
                    .map(|rev| resolve_tree(&repo, &rev))
                    .transpose()?
                    .or_else(|| repo.head().ok().and_then(|h| h.peel_to_tree().ok()));
                let tree_b = b.map(|rev| resolve_tree(&repo, &rev)).transpose()?;
                repo.diff_tree_to_tree(tree_a.as_ref(), tree_b.as_ref(), None)?
            }
        };

        render_diff(&diff)
    })
    .await;

    match result {
        Ok(Ok(diff)) => Json(DiffResponse { diff }).into_response(),
        Ok(Err(e)) => e.into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

fn resolve_tree<'repo>(repo: &'repo Repository, rev: &str) -> Result<git2::Tree<'repo>, GitWatcherError> {
    let object = repo
        .revparse_single(rev)
        .map_err(|_| GitWatcherError::UnknownCommit(rev.to_string()))?;
    object
        .peel_to_tree()
        .map_err(|_| GitWatcherError::UnknownCommit(rev.to_string()))
}

fn render_diff(diff: &git2::Diff) -> Result<String, GitWatcherError> {
    let mut out = String::new();
    diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
        if let Ok(content) = std::str::from_utf8(line.content()) {
            match line.origin() {
                '+' | '-' | ' ' => out.push(line.origin()),
                _ => {}
            }
            out.push_str(content);
        }
        true
    })?;
    Ok(out)
}

#[derive(Serialize)]
struct GitLogEntry {
    commit_id: String,
    message: String,
    author: String,
    timestamp: i64,
    diff: String,
}

/// Returns every commit reachable from `HEAD`, each paired with its unified
/// diff against its first parent (§4.4).
pub async fn git_logs(State(state): State<Arc<AppState>>) -> Response {
    let workspace_root = state.config.workspace_root.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<Vec<GitLogEntry>, GitWatcherError> {
        let repo = open_or_init(&workspace_root)?;
        let mut walker = repo.revwalk()?;
        if walker.push_head().is_err() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for oid in walker.flatten() {
            let commit = repo.find_commit(oid)?;
            let tree = commit.tree()?;
            let parent_tree = commit.parents().next().and_then(|p| p.tree().ok());
            let diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?;
            entries.push(GitLogEntry {
                commit_id: commit.id().to_string(),
                message: commit.message().unwrap_or_default().to_string(),
                author: commit.author().name().unwrap_or_default().to_string(),
                timestamp: commit.time().seconds(),
                diff: render_diff(&diff)?,
            });
        }
        Ok(entries)
    })
    .await;

    match result {
        Ok(Ok(entries)) => Json(entries).into_response(),
        Ok(Err(e)) => e.into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}
