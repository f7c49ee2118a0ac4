use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use super::{Tool, ToolContext, ToolOutcome};

/// Sandboxed file writer. All writes are confined to a configured root
/// directory: absolute paths and any path whose lexical normalization
/// escapes the root are rejected before touching the filesystem.
pub struct FileWriteTool {
    root: PathBuf,
    max_bytes: u64,
}

impl FileWriteTool {
    pub fn new(root: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self { root: root.into(), max_bytes }
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file.write"
    }

    async fn run(&self, input: &Value, _ctx: &ToolContext) -> ToolOutcome {
        let Some(path) = input.get("path").and_then(Value::as_str) else {
            return ToolOutcome::fail("path is required");
        };
        let Some(content) = input.get("content").and_then(Value::as_str) else {
            return ToolOutcome::fail("content is required");
        };

        let relative = match sanitize_relative_path(path) {
            Ok(relative) => relative,
            Err(error) => return ToolOutcome::fail(error),
        };

        // Content is written UTF-8 without a BOM.
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);
        let bytes = content.as_bytes();
        if bytes.len() as u64 > self.max_bytes {
            return ToolOutcome::fail(format!(
                "content is {} bytes, exceeding the {} byte limit",
                bytes.len(),
                self.max_bytes
            ));
        }

        let resolved = self.root.join(&relative);
        if !resolved.starts_with(&self.root) {
            return ToolOutcome::fail(format!("path traversal rejected: {path}"));
        }

        if let Some(parent) = resolved.parent() {
            if let Err(error) = tokio::fs::create_dir_all(parent).await {
                return ToolOutcome::fail(format!("could not create parent directory: {error}"));
            }
        }
        if let Err(error) = tokio::fs::write(&resolved, bytes).await {
            return ToolOutcome::fail(format!("write failed: {error}"));
        }

        let digest = Sha256::digest(bytes);
        ToolOutcome::ok(json!({
            "path": relative.to_string_lossy(),
            "bytes": bytes.len(),
            "sha256": hex::encode(digest),
        }))
    }
}

/// Lexically normalizes a caller-supplied path, rejecting absolute paths
/// and any `..` sequence that would climb above the sandbox root.
fn sanitize_relative_path(raw: &str) -> Result<PathBuf, String> {
    if raw.trim().is_empty() {
        return Err("path is required".to_string());
    }

    let path = Path::new(raw);
    let mut normalized = Vec::new();

    for component in path.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if normalized.pop().is_none() {
                    return Err(format!("path traversal rejected: {raw}"));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(format!("absolute paths are not allowed: {raw}"));
            }
        }
    }

    if normalized.is_empty() {
        return Err(format!("path does not name a file: {raw}"));
    }

    Ok(normalized.iter().collect())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use taskrun_core::domain::task::TaskId;

    use super::FileWriteTool;
    use crate::tools::{Tool, ToolContext};

    fn ctx() -> ToolContext {
        ToolContext {
            task_id: TaskId("t-1".to_string()),
            step_number: 2,
            tenant: None,
            requested_by: None,
        }
    }

    #[tokio::test]
    async fn writes_inside_the_root_and_reports_hash() {
        let root = tempfile::tempdir().expect("tempdir");
        let tool = FileWriteTool::new(root.path(), 1024);

        let outcome = tool
            .run(&json!({"path": "notes/summary.txt", "content": "hello"}), &ctx())
            .await;

        assert!(outcome.success, "write should succeed: {:?}", outcome.error);
        let output = outcome.output.expect("output");
        assert_eq!(output["bytes"], 5);
        assert_eq!(
            output["sha256"],
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );

        let written = std::fs::read_to_string(root.path().join("notes/summary.txt"))
            .expect("file exists inside root");
        assert_eq!(written, "hello");
    }

    #[tokio::test]
    async fn path_traversal_is_rejected() {
        let root = tempfile::tempdir().expect("tempdir");
        let tool = FileWriteTool::new(root.path(), 1024);

        let outcome = tool
            .run(&json!({"path": "../../etc/passwd", "content": "owned"}), &ctx())
            .await;

        assert!(!outcome.success);
        assert!(outcome.error.expect("error").contains("path traversal"));
        assert!(!root.path().parent().expect("parent").join("etc/passwd").exists());
    }

    #[tokio::test]
    async fn interior_dotdot_may_not_escape_the_root() {
        let root = tempfile::tempdir().expect("tempdir");
        let tool = FileWriteTool::new(root.path(), 1024);

        // Collapses to "safe.txt" inside the root.
        let inside = tool
            .run(&json!({"path": "a/../safe.txt", "content": "x"}), &ctx())
            .await;
        assert!(inside.success);

        let escaping = tool
            .run(&json!({"path": "a/../../escape.txt", "content": "x"}), &ctx())
            .await;
        assert!(!escaping.success);
        assert!(escaping.error.expect("error").contains("path traversal"));
    }

    #[tokio::test]
    async fn absolute_paths_are_rejected() {
        let root = tempfile::tempdir().expect("tempdir");
        let tool = FileWriteTool::new(root.path(), 1024);

        let outcome = tool.run(&json!({"path": "/etc/passwd", "content": "x"}), &ctx()).await;
        assert!(!outcome.success);
        assert!(outcome.error.expect("error").contains("absolute paths"));
    }

    #[tokio::test]
    async fn oversized_content_is_rejected() {
        let root = tempfile::tempdir().expect("tempdir");
        let tool = FileWriteTool::new(root.path(), 4);

        let outcome = tool.run(&json!({"path": "big.txt", "content": "hello"}), &ctx()).await;
        assert!(!outcome.success);
        assert!(outcome.error.expect("error").contains("byte limit"));
    }

    #[tokio::test]
    async fn leading_bom_is_not_written() {
        let root = tempfile::tempdir().expect("tempdir");
        let tool = FileWriteTool::new(root.path(), 1024);

        let outcome = tool
            .run(&json!({"path": "bom.txt", "content": "\u{feff}data"}), &ctx())
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.output.expect("output")["bytes"], 4);

        let written = std::fs::read(root.path().join("bom.txt")).expect("file");
        assert_eq!(written, b"data");
    }
}
