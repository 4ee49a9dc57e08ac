//! Workspace router (§4.4): sandboxed file I/O under `/workspace`. Every
//! path argument is resolved through [`safe_join`], which canonicalizes
//! symlinks *before* the prefix check (§9 "Workspace path canonicalization")
//! so a symlink planted inside the workspace cannot be used to escape it.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::error::WorkspaceError;

/// Resolves `rel` against `root`, requiring the canonical result to stay
/// under `root`'s canonical form. Resolves symlinks on whatever prefix of
/// the path already exists, so a pre-existing symlinked ancestor cannot be
/// used to walk outside the workspace even when the final component doesn't
/// exist yet (e.g. a file about to be created).
pub fn safe_join(root: &Path, rel: &str) -> Result<PathBuf, WorkspaceError> {
    let root_canon = std::fs::canonicalize(root)?;
    let rel = rel.trim_start_matches('/');
    let candidate = root_canon.join(rel);
    let resolved = canonicalize_existing_prefix(&candidate)?;
    if !resolved.starts_with(&root_canon) {
        return Err(WorkspaceError::PathEscape);
    }
    Ok(resolved)
}

fn canonicalize_existing_prefix(path: &Path) -> io::Result<PathBuf> {
    let mut trailing: Vec<std::ffi::OsString> = Vec::new();
    let mut current = path.to_path_buf();
    loop {
        match std::fs::canonicalize(&current) {
            Ok(mut canon) => {
                for component in trailing.iter().rev() {
                    canon.push(component);
                }
                return Ok(canon);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let Some(name) = current.file_name().map(|n| n.to_os_string()) else {
                    return Err(io::Error::new(io::ErrorKind::NotFound, "no existing ancestor"));
                };
                trailing.push(name);
                current = match current.parent() {
                    Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                    _ => return Err(io::Error::new(io::ErrorKind::NotFound, "no existing ancestor")),
                };
            }
            Err(e) => return Err(e),
        }
    }
}

impl From<WorkspaceError> for StatusCode {
    fn from(e: WorkspaceError) -> Self {
        match e {
            WorkspaceError::PathEscape => StatusCode::FORBIDDEN,
            WorkspaceError::DirectoryNotEmpty => StatusCode::BAD_REQUEST,
            WorkspaceError::Io(ref io_err) if io_err.kind() == io::ErrorKind::NotFound => StatusCode::NOT_FOUND,
            WorkspaceError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Deserialize)]
pub struct FilePathQuery {
    file_path: String,
}

pub async fn get_file(State(state): State<Arc<AppState>>, Query(q): Query<FilePathQuery>) -> Response {
    let path = match safe_join(&state.config.workspace_root, &q.file_path) {
        Ok(p) => p,
        Err(e) => return StatusCode::from(e).into_response(),
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => bytes.into_response(),
        Err(e) => StatusCode::from(WorkspaceError::Io(e)).into_response(),
    }
}

pub async fn create_file(
    State(state): State<Arc<AppState>>,
    Query(q): Query<FilePathQuery>,
    body: Bytes,
) -> Response {
    // The parent directory need not exist under the symlink-resolved root
    // check above; create it before the final write so `safe_join`'s
    // existing-ancestor walk always finds a concrete directory.
    let Some(parent_rel) = Path::new(&q.file_path).parent() else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    if !parent_rel.as_os_str().is_empty() {
        if let Ok(parent_abs) = safe_join(&state.config.workspace_root, &parent_rel.to_string_lossy()) {
            let _ = tokio::fs::create_dir_all(&parent_abs).await;
        }
    }
    let path = match safe_join(&state.config.workspace_root, &q.file_path) {
        Ok(p) => p,
        Err(e) => return StatusCode::from(e).into_response(),
    };
    match tokio::fs::write(&path, &body).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => StatusCode::from(WorkspaceError::Io(e)).into_response(),
    }
}

pub async fn delete_file(State(state): State<Arc<AppState>>, Query(q): Query<FilePathQuery>) -> StatusCode {
    let path = match safe_join(&state.config.workspace_root, &q.file_path) {
        Ok(p) => p,
        Err(e) => return StatusCode::from(e),
    };
    match tokio::fs::remove_file(&path).await {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(e) => StatusCode::from(WorkspaceError::Io(e)),
    }
}

#[derive(Deserialize)]
pub struct DirectoryQuery {
    directory: String,
}

#[derive(Serialize)]
struct ListItem {
    #[serde(rename = "type")]
    kind: &'static str,
    path: String,
}

#[derive(Serialize)]
struct ListStatistics {
    total_files: usize,
    total_directories: usize,
}

#[derive(Serialize)]
struct ListResponse {
    items: Vec<ListItem>,
    statistics: ListStatistics,
}

pub async fn list_directory(State(state): State<Arc<AppState>>, Query(q): Query<DirectoryQuery>) -> Response {
    let root = match safe_join(&state.config.workspace_root, &q.directory) {
        Ok(p) => p,
        Err(e) => return StatusCode::from(e).into_response(),
    };

    let mut items = Vec::new();
    let mut total_files = 0usize;
    let mut total_directories = 0usize;
    let mut stack = vec![root.clone()];
    while let Some(dir) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(e) => return StatusCode::from(WorkspaceError::Io(e)).into_response(),
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let rel = path.strip_prefix(&root).unwrap_or(&path).to_string_lossy().into_owned();
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if is_dir {
                total_directories += 1;
                items.push(ListItem { kind: "directory", path: rel });
                stack.push(path);
            } else {
                total_files += 1;
                items.push(ListItem { kind: "file", path: rel });
            }
        }
    }

    Json(ListResponse {
        items,
        statistics: ListStatistics { total_files, total_directories },
    })
    .into_response()
}

#[derive(Deserialize)]
pub struct DirectoryPathQuery {
    directory_path: String,
}

pub async fn create_directory(
    State(state): State<Arc<AppState>>,
    Query(q): Query<DirectoryPathQuery>,
) -> StatusCode {
    let target = match safe_join(&state.config.workspace_root, &q.directory_path) {
        Ok(p) => p,
        Err(e) => return StatusCode::from(e),
    };
    match tokio::fs::create_dir_all(&target).await {
        Ok(()) => StatusCode::CREATED,
        Err(e) => StatusCode::from(WorkspaceError::Io(e)),
    }
}

#[derive(Deserialize)]
pub struct DeleteDirectoryQuery {
    directory_path: String,
    #[serde(default)]
    recursive: bool,
}

pub async fn delete_directory(
    State(state): State<Arc<AppState>>,
    Query(q): Query<DeleteDirectoryQuery>,
) -> StatusCode {
    let path = match safe_join(&state.config.workspace_root, &q.directory_path) {
        Ok(p) => p,
        Err(e) => return StatusCode::from(e),
    };
    if q.recursive {
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => StatusCode::NO_CONTENT,
            Err(e) => StatusCode::from(WorkspaceError::Io(e)),
        }
    } else {
        match tokio::fs::remove_dir(&path).await {
            Ok(()) => StatusCode::NO_CONTENT,
            Err(e) if e.raw_os_error() == Some(libc::ENOTEMPTY) => {
                StatusCode::from(WorkspaceError::DirectoryNotEmpty)
            }
            Err(e) => StatusCode::from(WorkspaceError::Io(e)),
        }
    }
}

#[derive(Deserialize)]
pub struct MoveRequest {
    from: String,
    to: String,
}

/// Resolves a destination path that may not exist yet: the parent must
/// resolve under the workspace root, but the final component is appended
/// without requiring it to already exist.
fn resolve_destination(root: &Path, rel: &str) -> Result<PathBuf, WorkspaceError> {
    let rel_path = Path::new(rel);
    let (parent, file_name) = match (rel_path.parent(), rel_path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => (parent.to_string_lossy().into_owned(), name),
        (_, Some(name)) => (String::new(), name),
        _ => return Err(WorkspaceError::Io(io::Error::new(io::ErrorKind::InvalidInput, "empty destination path"))),
    };
    let parent_abs = safe_join(root, &parent)?;
    Ok(parent_abs.join(file_name))
}

pub async fn move_path(State(state): State<Arc<AppState>>, Json(req): Json<MoveRequest>) -> StatusCode {
    let from = match safe_join(&state.config.workspace_root, &req.from) {
        Ok(p) => p,
        Err(e) => return StatusCode::from(e),
    };
    let to = match resolve_destination(&state.config.workspace_root, &req.to) {
        Ok(p) => p,
        Err(e) => return StatusCode::from(e),
    };
    match tokio::fs::rename(&from, &to).await {
        Ok(()) => StatusCode::OK,
        Err(e) => StatusCode::from(WorkspaceError::Io(e)),
    }
}

#[derive(Deserialize)]
pub struct CopyRequest {
    from: String,
    to: String,
}

pub async fn copy_path(State(state): State<Arc<AppState>>, Json(req): Json<CopyRequest>) -> StatusCode {
    let from = match safe_join(&state.config.workspace_root, &req.from) {
        Ok(p) => p,
        Err(e) => return StatusCode::from(e),
    };
    let to = match resolve_destination(&state.config.workspace_root, &req.to) {
        Ok(p) => p,
        Err(e) => return StatusCode::from(e),
    };
    match tokio::fs::copy(&from, &to).await {
        Ok(_) => StatusCode::OK,
        Err(e) => StatusCode::from(WorkspaceError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn joins_simple_relative_path() {
        let root = workspace();
        std::fs::write(root.path().join("hello.txt"), b"hi").unwrap();
        let resolved = safe_join(root.path(), "hello.txt").unwrap();
        assert_eq!(resolved, std::fs::canonicalize(root.path()).unwrap().join("hello.txt"));
    }

    #[test]
    fn rejects_dotdot_escape() {
        let root = workspace();
        let err = safe_join(root.path(), "../etc/passwd").unwrap_err();
        assert!(matches!(err, WorkspaceError::PathEscape));
    }

    #[test]
    fn rejects_absolute_path_traversal() {
        let root = workspace();
        let err = safe_join(root.path(), "../../../etc/passwd").unwrap_err();
        assert!(matches!(err, WorkspaceError::PathEscape));
    }

    #[test]
    fn allows_path_to_not_yet_created_file() {
        let root = workspace();
        let resolved = safe_join(root.path(), "new_dir/new_file.txt").unwrap();
        assert!(resolved.starts_with(std::fs::canonicalize(root.path()).unwrap()));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_escape() {
        let root = workspace();
        let outside = workspace();
        std::fs::write(outside.path().join("secret.txt"), b"nope").unwrap();
        std::os::unix::fs::symlink(outside.path(), root.path().join("escape")).unwrap();

        let err = safe_join(root.path(), "escape/secret.txt").unwrap_err();
        assert!(matches!(err, WorkspaceError::PathEscape));
    }

    #[test]
    fn resolve_destination_allows_new_file_name() {
        let root = workspace();
        let dest = resolve_destination(root.path(), "renamed.txt").unwrap();
        assert_eq!(dest, std::fs::canonicalize(root.path()).unwrap().join("renamed.txt"));
    }
}
