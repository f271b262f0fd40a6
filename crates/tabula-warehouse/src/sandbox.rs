//! Workspace path resolution.
//!
//! Every path handed to the cache is resolved through [`Sandbox`], which keeps
//! reads under `<workspaces>/<workspace>/<root>` and writes under a draft root.

use std::path::{Component, Path, PathBuf};

use crate::error::TabularError;

pub const DEFAULT_ROOT: &str = "draft";
const META_DIR: &str = "meta";
const TABULAR_DIR: &str = "tabular";

/// A file located inside a workspace root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub workspace: String,
    pub root: String,
    pub rel_path: String,
    pub path: PathBuf,
}

/// Resolves workspace-relative paths to absolute paths inside the sandbox.
#[derive(Debug, Clone)]
pub struct Sandbox {
    workspaces_dir: PathBuf,
}

impl Sandbox {
    pub fn new(workspaces_dir: impl Into<PathBuf>) -> Self {
        Self {
            workspaces_dir: workspaces_dir.into(),
        }
    }

    pub fn workspaces_dir(&self) -> &Path {
        self.workspaces_dir.as_path()
    }

    /// Resolve a path for a read-class operation.
    pub fn resolve(
        &self,
        workspace: &str,
        root: Option<&str>,
        rel_path: &str,
    ) -> Result<ResolvedPath, TabularError> {
        let workspace = validate_workspace(workspace)?;
        let root = root.map(str::trim).filter(|root| !root.is_empty()).unwrap_or(DEFAULT_ROOT);
        validate_root(root)?;
        let rel_path = rel_path.trim();
        validate_rel_path(rel_path)?;

        let base = self.workspaces_dir.join(workspace).join(root);
        let path = base.join(rel_path);
        if !is_strictly_inside(&base, &path) {
            return Err(TabularError::validation("path escapes sandbox"));
        }

        Ok(ResolvedPath {
            workspace: workspace.to_string(),
            root: root.to_string(),
            rel_path: rel_path.to_string(),
            path,
        })
    }

    /// Resolve a path for a write-class operation; only draft roots are writable.
    pub fn resolve_for_write(
        &self,
        workspace: &str,
        root: Option<&str>,
        rel_path: &str,
    ) -> Result<ResolvedPath, TabularError> {
        let root = root.map(str::trim).filter(|root| !root.is_empty()).unwrap_or(DEFAULT_ROOT);
        validate_write_root(root)?;
        self.resolve(workspace, Some(root), rel_path)
    }

    /// Private per-workspace directory for cache artifacts.
    pub fn tabular_meta_dir(&self, workspace: &str) -> Result<PathBuf, TabularError> {
        let workspace = validate_workspace(workspace)?;
        let base = self.workspaces_dir.join(workspace);
        let dir = base.join(META_DIR).join(TABULAR_DIR);
        if !is_strictly_inside(&base, &dir) {
            return Err(TabularError::validation("invalid tabular cache path"));
        }
        Ok(dir)
    }
}

fn validate_workspace(workspace: &str) -> Result<&str, TabularError> {
    let workspace = workspace.trim();
    if workspace.is_empty() {
        return Err(TabularError::validation("missing workspace_id"));
    }
    if workspace.contains(['/', '\\']) || workspace == ".." || workspace == "." {
        return Err(TabularError::validation("invalid workspace_id"));
    }
    Ok(workspace)
}

fn validate_root(root: &str) -> Result<(), TabularError> {
    if root.is_empty() {
        return Err(TabularError::validation("missing root"));
    }
    if Path::new(root).is_absolute() {
        return Err(TabularError::validation("absolute root not allowed"));
    }
    if root.contains("..") || root.contains(['/', '\\']) {
        return Err(TabularError::validation("invalid root"));
    }
    Ok(())
}

fn validate_write_root(root: &str) -> Result<(), TabularError> {
    validate_root(root)?;
    if root == DEFAULT_ROOT || (root.starts_with("draft.") && root.ends_with(".staging")) {
        return Ok(());
    }
    Err(TabularError::validation("writes must target draft"))
}

fn validate_rel_path(rel_path: &str) -> Result<(), TabularError> {
    if rel_path.is_empty() {
        return Err(TabularError::validation("missing path"));
    }
    if Path::new(rel_path).is_absolute() {
        return Err(TabularError::validation("absolute path not allowed"));
    }
    if rel_path.contains("..") {
        return Err(TabularError::validation("invalid path"));
    }
    if rel_path.contains(['/', '\\']) {
        return Err(TabularError::validation("nested paths are not allowed"));
    }
    Ok(())
}

/// Lexical containment check; both paths are built from validated components.
fn is_strictly_inside(base: &Path, candidate: &Path) -> bool {
    let Ok(rest) = candidate.strip_prefix(base) else {
        return false;
    };
    let mut components = rest.components().peekable();
    if components.peek().is_none() {
        return false;
    }
    components.all(|component| matches!(component, Component::Normal(_)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> Sandbox {
        Sandbox::new("/srv/workspaces")
    }

    #[test]
    fn resolves_flat_path_under_default_root() {
        let resolved = sandbox().resolve("ws1", None, " data.csv ").expect("resolve");
        assert_eq!(resolved.root, "draft");
        assert_eq!(resolved.rel_path, "data.csv");
        assert_eq!(resolved.path, PathBuf::from("/srv/workspaces/ws1/draft/data.csv"));
    }

    #[test]
    fn rejects_traversal_nesting_and_absolute_paths() {
        for bad in ["../x.csv", "a/b.csv", "a\\b.csv", "/etc/passwd", ""] {
            let error = sandbox().resolve("ws1", None, bad).expect_err(bad);
            assert!(matches!(error, TabularError::Validation(_)), "{bad}");
        }
    }

    #[test]
    fn rejects_invalid_workspace_and_root() {
        assert!(sandbox().resolve("", None, "a.csv").is_err());
        assert!(sandbox().resolve("a/b", None, "a.csv").is_err());
        assert!(sandbox().resolve("ws", Some("../up"), "a.csv").is_err());
        assert!(sandbox().resolve("ws", Some("x/y"), "a.csv").is_err());
    }

    #[test]
    fn write_root_policy_only_allows_draft_areas() {
        assert!(sandbox().resolve_for_write("ws", None, "out.csv").is_ok());
        assert!(sandbox()
            .resolve_for_write("ws", Some("draft.review.staging"), "out.csv")
            .is_ok());
        let error = sandbox()
            .resolve_for_write("ws", Some("published"), "out.csv")
            .expect_err("published is read-only");
        assert_eq!(error.message(), "writes must target draft");
    }

    #[test]
    fn meta_dir_is_per_workspace() {
        let dir = sandbox().tabular_meta_dir("ws1").expect("meta dir");
        assert_eq!(dir, PathBuf::from("/srv/workspaces/ws1/meta/tabular"));
    }
}
