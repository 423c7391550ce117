//! File write tool: write or create files with path validation.

use async_trait::async_trait;
use corvid_config::expand_home;
use corvid_core::error::ToolError;
use corvid_core::tool::Tool;
use std::path::{Component, Path, PathBuf};

/// System directories the tool never writes into.
const RESTRICTED_DIRS: &[&str] = &["/etc", "/sys", "/proc", "/dev", "/boot"];

pub struct FileWriteTool {
    /// Forbidden path prefixes.
    pub forbidden_paths: Vec<PathBuf>,
}

impl FileWriteTool {
    /// Create a file write tool that refuses the usual system directories.
    pub fn new() -> Self {
        Self {
            forbidden_paths: RESTRICTED_DIRS.iter().map(PathBuf::from).collect(),
        }
    }

    /// Create a file write tool with a custom forbidden list.
    pub fn with_forbidden(forbidden_paths: Vec<PathBuf>) -> Self {
        Self { forbidden_paths }
    }

    fn denied(&self, reason: String) -> ToolError {
        ToolError::PermissionDenied {
            tool_name: self.name().into(),
            reason,
        }
    }

    fn failed(&self, reason: String) -> ToolError {
        ToolError::InvocationFailed {
            tool_name: self.name().into(),
            reason,
        }
    }
}

impl Default for FileWriteTool {
    fn default() -> Self {
        Self::new()
    }
}

/// Make `path` absolute and drop `.`/`..` components without touching the
/// filesystem (the file may not exist yet).
fn normalize(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(path)
    };

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write text content to a file. Refuses to replace an existing file unless \
         overwrite is true. Parent directories are created by default."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path of the file to write (~ is expanded)"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write"
                },
                "overwrite": {
                    "type": "boolean",
                    "description": "Replace the file if it already exists (default false)"
                },
                "create_dirs": {
                    "type": "boolean",
                    "description": "Create missing parent directories (default true)"
                }
            },
            "required": ["file_path", "content"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let raw_path = arguments["file_path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'file_path' argument".into()))?;

        let content = arguments["content"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'content' argument".into()))?;

        let overwrite = arguments["overwrite"].as_bool().unwrap_or(false);
        let create_dirs = arguments["create_dirs"].as_bool().unwrap_or(true);

        let path = normalize(&expand_home(raw_path));

        if let Some(forbidden) = self.forbidden_paths.iter().find(|p| path.starts_with(p)) {
            return Err(self.denied(format!(
                "Cannot write to restricted directory: {}",
                forbidden.display()
            )));
        }

        if path.is_dir() {
            return Err(self.failed(format!("{} is a directory", path.display())));
        }

        if path.exists() && !overwrite {
            return Err(self.failed(format!(
                "File already exists: {}. Set overwrite=true to replace it.",
                path.display()
            )));
        }

        if let Some(parent) = path.parent()
            && !parent.exists()
        {
            if !create_dirs {
                return Err(self.failed(format!(
                    "Parent directory does not exist: {}",
                    parent.display()
                )));
            }
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.failed(format!("Failed to create directory: {e}")))?;
        }

        tokio::fs::write(&path, content)
            .await
            .map_err(|e| self.failed(format!("Failed to write file: {e}")))?;

        let file_size = content.len();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file_type = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_else(|| "no extension".into());

        let result = serde_json::json!({
            "success": true,
            "file_path": raw_path,
            "absolute_path": path.display().to_string(),
            "file_size": file_size,
            "file_type": file_type,
            "message": format!("Successfully wrote {file_size} bytes to {file_name}"),
        });
        serde_json::to_string_pretty(&result).map_err(|e| self.failed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(output: &str) -> serde_json::Value {
        serde_json::from_str(output).unwrap()
    }

    #[test]
    fn tool_definition() {
        let tool = FileWriteTool::new();
        assert_eq!(tool.name(), "write_file");
        let schema = tool.parameters_schema();
        assert_eq!(schema["required"], serde_json::json!(["file_path", "content"]));
        assert!(schema["properties"]["overwrite"].is_object());
    }

    #[tokio::test]
    async fn write_and_verify() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("notes.md");

        let output = FileWriteTool::new()
            .execute(serde_json::json!({
                "file_path": file_path.to_str().unwrap(),
                "content": "Hello from test!"
            }))
            .await
            .unwrap();

        let value = parse(&output);
        assert_eq!(value["success"], true);
        assert_eq!(value["file_size"], 16);
        assert_eq!(value["file_type"], ".md");
        assert_eq!(std::fs::read_to_string(&file_path).unwrap(), "Hello from test!");
    }

    #[tokio::test]
    async fn write_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("nested").join("dir").join("file.txt");

        FileWriteTool::new()
            .execute(serde_json::json!({
                "file_path": file_path.to_str().unwrap(),
                "content": "nested content"
            }))
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&file_path).unwrap(), "nested content");
    }

    #[tokio::test]
    async fn missing_parent_without_create_dirs_fails() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("absent").join("file.txt");

        let err = FileWriteTool::new()
            .execute(serde_json::json!({
                "file_path": file_path.to_str().unwrap(),
                "content": "x",
                "create_dirs": false
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvocationFailed { .. }));
        assert!(!file_path.exists());
    }

    #[tokio::test]
    async fn existing_file_requires_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("overwrite.txt");
        std::fs::write(&file_path, "old content").unwrap();

        let tool = FileWriteTool::new();
        let args = serde_json::json!({
            "file_path": file_path.to_str().unwrap(),
            "content": "new content"
        });
        let err = tool.execute(args).await.unwrap_err();
        assert!(err.to_string().contains("overwrite=true"));
        assert_eq!(std::fs::read_to_string(&file_path).unwrap(), "old content");

        tool.execute(serde_json::json!({
            "file_path": file_path.to_str().unwrap(),
            "content": "new content",
            "overwrite": true
        }))
        .await
        .unwrap();
        assert_eq!(std::fs::read_to_string(&file_path).unwrap(), "new content");
    }

    #[tokio::test]
    async fn missing_content_argument() {
        let result = FileWriteTool::new()
            .execute(serde_json::json!({ "file_path": "/tmp/corvid-test.txt" }))
            .await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }

    #[tokio::test]
    async fn restricted_directory_blocked() {
        let result = FileWriteTool::new()
            .execute(serde_json::json!({
                "file_path": "/etc/cron.d/job",
                "content": "malicious"
            }))
            .await;
        assert!(matches!(result, Err(ToolError::PermissionDenied { .. })));
    }

    #[tokio::test]
    async fn traversal_into_restricted_directory_blocked() {
        let result = FileWriteTool::new()
            .execute(serde_json::json!({
                "file_path": "/tmp/../etc/crontab",
                "content": "malicious"
            }))
            .await;
        assert!(matches!(result, Err(ToolError::PermissionDenied { .. })));
    }

    #[test]
    fn normalize_resolves_parent_components() {
        assert_eq!(normalize(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
    }
}
