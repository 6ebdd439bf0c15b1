//! Text file editing tool: view, create, str_replace, insert.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::{required_str, Tool, ToolError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EditCommand {
    View,
    Create,
    StrReplace,
    Insert,
}

impl EditCommand {
    fn parse(raw: &str) -> Result<Self, ToolError> {
        match raw {
            "view" => Ok(Self::View),
            "create" => Ok(Self::Create),
            "str_replace" => Ok(Self::StrReplace),
            "insert" => Ok(Self::Insert),
            other => Err(ToolError::InvalidArguments(format!(
                "unknown command '{}'; expected one of view, create, str_replace, insert",
                other
            ))),
        }
    }
}

/// View and mutate text files in the session workspace.
pub struct EditFile {
    max_view_chars: usize,
    confine: bool,
}

impl EditFile {
    pub fn new(max_view_chars: usize, confine: bool) -> Self {
        Self {
            max_view_chars,
            confine,
        }
    }

    /// Resolve a model-supplied path against the workspace.
    fn resolve(&self, workspace: &Path, raw: &str) -> Result<PathBuf, ToolError> {
        if raw.trim().is_empty() {
            return Err(ToolError::InvalidArguments("'path' must not be empty".to_string()));
        }
        let root = normalize(workspace);
        let candidate = Path::new(raw);
        let resolved = if candidate.is_absolute() {
            normalize(candidate)
        } else {
            normalize(&root.join(candidate))
        };
        if self.confine && !resolved.starts_with(&root) {
            return Err(ToolError::OutsideWorkspace(PathBuf::from(raw)));
        }
        Ok(resolved)
    }

    async fn view(&self, path: &Path, range: Option<(usize, Option<usize>)>) -> Result<String, ToolError> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| not_found_or_io(path, e))?;

        if meta.is_dir() {
            return list_dir(path).await;
        }

        let content = read_file(path).await?;
        let content = match range {
            None => content,
            Some((start, end)) => slice_lines(&content, start, end)?,
        };
        Ok(truncate_chars(content, self.max_view_chars))
    }

    async fn create(&self, path: &Path, text: &str) -> Result<String, ToolError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| ToolError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        write_atomic(path, text).await?;
        Ok(format!("File created successfully at: {}", path.display()))
    }

    async fn str_replace(&self, path: &Path, old: &str, new: &str) -> Result<String, ToolError> {
        if old.is_empty() {
            return Err(ToolError::InvalidArguments("'old_str' must not be empty".to_string()));
        }
        let content = read_file(path).await?;
        let occurrences = content.matches(old).count();
        if occurrences == 0 {
            return Err(ToolError::PatternNotFound(path.to_path_buf()));
        }

        let updated = content.replacen(old, new, 1);
        write_atomic(path, &updated).await?;

        if occurrences > 1 {
            Ok(format!(
                "Replaced the first of {} occurrences in {}. Include more context in old_str to target a different one.",
                occurrences,
                path.display()
            ))
        } else {
            Ok(format!("The file {} has been edited.", path.display()))
        }
    }

    async fn insert(&self, path: &Path, line: usize, text: &str) -> Result<String, ToolError> {
        let content = read_file(path).await?;
        let updated = insert_lines(&content, line, text)?;
        write_atomic(path, &updated).await?;
        Ok(format!(
            "Inserted {} line(s) before line {} of {}.",
            text.lines().count(),
            line,
            path.display()
        ))
    }
}

#[async_trait]
impl Tool for EditFile {
    fn name(&self) -> &str {
        "edit"
    }

    fn description(&self) -> &str {
        "View, create and edit text files in the workspace. Commands: `view` (optionally with view_range [start, end], 1-based inclusive, end -1 for end of file), `create` (writes file_text, creating parent directories, overwriting existing files), `str_replace` (replaces the first verbatim occurrence of old_str with new_str), `insert` (inserts new_str before 0-based line insert_line)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "enum": ["view", "create", "str_replace", "insert"],
                    "description": "The operation to perform"
                },
                "path": {
                    "type": "string",
                    "description": "File path, relative to the workspace"
                },
                "file_text": {
                    "type": "string",
                    "description": "Full file content for `create`"
                },
                "view_range": {
                    "type": "array",
                    "items": { "type": "integer" },
                    "description": "Optional [start, end] line range for `view` (1-based, inclusive; -1 means end of file)"
                },
                "old_str": {
                    "type": "string",
                    "description": "Exact text to replace for `str_replace`"
                },
                "new_str": {
                    "type": "string",
                    "description": "Replacement text for `str_replace`, or text to insert for `insert`"
                },
                "insert_line": {
                    "type": "integer",
                    "description": "0-based line index for `insert`; the text is placed before this line"
                }
            },
            "required": ["command", "path"]
        })
    }

    async fn execute(&self, args: Value, workspace: &Path) -> anyhow::Result<String> {
        let command = EditCommand::parse(required_str(&args, "command")?)?;
        let path = self.resolve(workspace, required_str(&args, "path")?)?;

        tracing::debug!(command = ?command, path = %path.display(), "edit");

        let output = match command {
            EditCommand::View => {
                let range = parse_view_range(&args["view_range"])?;
                self.view(&path, range).await?
            }
            EditCommand::Create => {
                let text = required_str(&args, "file_text")?;
                self.create(&path, text).await?
            }
            EditCommand::StrReplace => {
                let old = required_str(&args, "old_str")?;
                let new = args["new_str"].as_str().unwrap_or("");
                self.str_replace(&path, old, new).await?
            }
            EditCommand::Insert => {
                let line = args["insert_line"].as_u64().ok_or_else(|| {
                    ToolError::InvalidArguments(
                        "missing or negative 'insert_line' argument".to_string(),
                    )
                })?;
                let text = args["new_str"]
                    .as_str()
                    .or_else(|| args["insert_text"].as_str())
                    .ok_or_else(|| {
                        ToolError::InvalidArguments("missing 'new_str' argument".to_string())
                    })?;
                self.insert(&path, line as usize, text).await?
            }
        };
        Ok(output)
    }
}

/// Lexically resolve `.` and `..` without touching the file system.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn not_found_or_io(path: &Path, e: std::io::Error) -> ToolError {
    if e.kind() == std::io::ErrorKind::NotFound {
        ToolError::NotFound(path.to_path_buf())
    } else {
        ToolError::Io {
            path: path.to_path_buf(),
            source: e,
        }
    }
}

async fn read_file(path: &Path) -> Result<String, ToolError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| not_found_or_io(path, e))
}

async fn list_dir(path: &Path) -> Result<String, ToolError> {
    let io_err = |e| ToolError::Io {
        path: path.to_path_buf(),
        source: e,
    };
    let mut entries = Vec::new();
    let mut dir = tokio::fs::read_dir(path).await.map_err(io_err)?;
    while let Some(entry) = dir.next_entry().await.map_err(io_err)? {
        let mut name = entry.file_name().to_string_lossy().to_string();
        if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
            name.push('/');
        }
        entries.push(name);
    }
    entries.sort();
    if entries.is_empty() {
        return Ok(format!("{} is an empty directory", path.display()));
    }
    Ok(entries.join("\n"))
}

/// Replace `path` by writing a sibling temp file and renaming it over the target.
async fn write_atomic(path: &Path, contents: &str) -> Result<(), ToolError> {
    let io_err = |e| ToolError::Io {
        path: path.to_path_buf(),
        source: e,
    };
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| ToolError::InvalidArguments(format!("{} is not a file path", path.display())))?;
    let tmp = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

    let mut file = tokio::fs::File::create(&tmp).await.map_err(io_err)?;
    let written = async {
        file.write_all(contents.as_bytes()).await?;
        file.sync_all().await?;
        if let Ok(meta) = tokio::fs::metadata(path).await {
            tokio::fs::set_permissions(&tmp, meta.permissions()).await?;
        }
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_err(e));
    }
    Ok(())
}

fn parse_view_range(raw: &Value) -> Result<Option<(usize, Option<usize>)>, ToolError> {
    if raw.is_null() {
        return Ok(None);
    }
    let bounds = raw
        .as_array()
        .filter(|a| a.len() == 2)
        .and_then(|a| Some((a[0].as_i64()?, a[1].as_i64()?)))
        .ok_or_else(|| {
            ToolError::InvalidArguments("'view_range' must be [start, end]".to_string())
        })?;

    match bounds {
        (start, _) if start < 1 => Err(ToolError::InvalidRange(format!(
            "start line {} must be at least 1",
            start
        ))),
        (start, -1) => Ok(Some((start as usize, None))),
        (start, end) if end < start => Err(ToolError::InvalidRange(format!(
            "end line {} is before start line {}",
            end, start
        ))),
        (start, end) => Ok(Some((start as usize, Some(end as usize)))),
    }
}

/// Lines `start..=end` (1-based), clamping `end` to the file length.
fn slice_lines(content: &str, start: usize, end: Option<usize>) -> Result<String, ToolError> {
    let lines: Vec<&str> = content.lines().collect();
    if start > lines.len().max(1) {
        return Err(ToolError::InvalidRange(format!(
            "start line {} is beyond the end of the file ({} lines)",
            start,
            lines.len()
        )));
    }
    let end = end.unwrap_or(lines.len()).min(lines.len());
    Ok(lines
        .get(start - 1..end)
        .map(|slice| slice.join("\n"))
        .unwrap_or_default())
}

fn truncate_chars(content: String, max_chars: usize) -> String {
    let total = content.chars().count();
    if total <= max_chars {
        return content;
    }
    let cut = content
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(content.len());
    format!(
        "{}\n\n[... output truncated: showing {} of {} characters. Use view_range to read the rest.]",
        &content[..cut],
        max_chars,
        total
    )
}

/// Insert `text` as whole lines before 0-based line `index`.
fn insert_lines(content: &str, index: usize, text: &str) -> Result<String, ToolError> {
    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    if index > lines.len() {
        return Err(ToolError::InvalidRange(format!(
            "insert_line {} is beyond the end of the file ({} lines)",
            index,
            lines.len()
        )));
    }
    if text.is_empty() {
        return Ok(content.to_string());
    }

    let mut block = text.to_string();
    if !block.ends_with('\n') {
        block.push('\n');
    }

    let mut out = String::with_capacity(content.len() + block.len() + 1);
    for (i, line) in lines.iter().enumerate() {
        if i == index {
            out.push_str(&block);
        }
        out.push_str(line);
    }
    if index == lines.len() {
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&block);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> EditFile {
        EditFile::new(50_000, true)
    }

    async fn run(dir: &Path, args: Value) -> anyhow::Result<String> {
        tool().execute(args, dir).await
    }

    fn tool_error(err: &anyhow::Error) -> &ToolError {
        err.downcast_ref::<ToolError>().expect("tool error")
    }

    #[tokio::test]
    async fn view_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(dir.path(), json!({"command": "view", "path": "absent.txt"}))
            .await
            .unwrap_err();
        assert!(matches!(tool_error(&err), ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn create_then_view_round_trips_content() {
        let dir = tempfile::tempdir().unwrap();
        run(
            dir.path(),
            json!({"command": "create", "path": "out.txt", "file_text": "hello"}),
        )
        .await
        .unwrap();
        let viewed = run(dir.path(), json!({"command": "view", "path": "out.txt"}))
            .await
            .unwrap();
        assert_eq!(viewed, "hello");
    }

    #[tokio::test]
    async fn create_makes_parents_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let args = |text: &str| json!({"command": "create", "path": "a/b/c.md", "file_text": text});
        run(dir.path(), args("first")).await.unwrap();
        run(dir.path(), args("second")).await.unwrap();
        let content = std::fs::read_to_string(dir.path().join("a/b/c.md")).unwrap();
        assert_eq!(content, "second");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("a/b"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn view_range_returns_inclusive_slice() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "one\ntwo\nthree\nfour\n").unwrap();
        let viewed = run(
            dir.path(),
            json!({"command": "view", "path": "f.txt", "view_range": [2, 3]}),
        )
        .await
        .unwrap();
        assert_eq!(viewed, "two\nthree");

        let tail = run(
            dir.path(),
            json!({"command": "view", "path": "f.txt", "view_range": [3, -1]}),
        )
        .await
        .unwrap();
        assert_eq!(tail, "three\nfour");
    }

    #[tokio::test]
    async fn view_truncates_past_character_limit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.txt"), "é".repeat(30)).unwrap();
        let viewed = EditFile::new(10, true)
            .execute(json!({"command": "view", "path": "big.txt"}), dir.path())
            .await
            .unwrap();
        assert!(viewed.starts_with(&"é".repeat(10)));
        assert!(viewed.contains("showing 10 of 30 characters"));
    }

    #[tokio::test]
    async fn view_directory_lists_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        let listing = run(dir.path(), json!({"command": "view", "path": "."}))
            .await
            .unwrap();
        assert_eq!(listing, "b.txt\nsrc/");
    }

    #[tokio::test]
    async fn str_replace_replaces_first_occurrence_only() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.py");
        std::fs::write(&file, "x = 1\ny = 1\n").unwrap();
        let before = std::fs::read_to_string(&file).unwrap().len();

        run(
            dir.path(),
            json!({"command": "str_replace", "path": "f.py", "old_str": "x = 1", "new_str": "x = 100"}),
        )
        .await
        .unwrap();
        let after = std::fs::read_to_string(&file).unwrap();
        assert_eq!(after, "x = 100\ny = 1\n");
        assert_eq!(after.len(), before + "x = 100".len() - "x = 1".len());

        let msg = run(
            dir.path(),
            json!({"command": "str_replace", "path": "f.py", "old_str": "= 1", "new_str": "= 2"}),
        )
        .await
        .unwrap();
        assert!(msg.contains("first of 2 occurrences"));
        assert_eq!(
            std::fs::read_to_string(&file).unwrap(),
            "x = 200\ny = 1\n"
        );
    }

    #[tokio::test]
    async fn str_replace_without_match_leaves_file_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.txt");
        std::fs::write(&file, "alpha beta").unwrap();
        let err = run(
            dir.path(),
            json!({"command": "str_replace", "path": "f.txt", "old_str": "gamma", "new_str": "delta"}),
        )
        .await
        .unwrap_err();
        assert!(matches!(tool_error(&err), ToolError::PatternNotFound(_)));
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "alpha beta");
    }

    #[tokio::test]
    async fn str_replace_on_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(
            dir.path(),
            json!({"command": "str_replace", "path": "nope.txt", "old_str": "a", "new_str": "b"}),
        )
        .await
        .unwrap_err();
        assert!(matches!(tool_error(&err), ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn insert_adds_lines_at_index() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.txt");
        std::fs::write(&file, "a\nb\nc\n").unwrap();
        run(
            dir.path(),
            json!({"command": "insert", "path": "f.txt", "insert_line": 1, "new_str": "x\ny"}),
        )
        .await
        .unwrap();
        let content = std::fs::read_to_string(&file).unwrap();
        assert_eq!(content, "a\nx\ny\nb\nc\n");
        assert_eq!(content.lines().count(), 3 + 2);
        assert_eq!(content.lines().nth(1), Some("x"));
    }

    #[tokio::test]
    async fn insert_on_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(
            dir.path(),
            json!({"command": "insert", "path": "none.txt", "insert_line": 0, "new_str": "x"}),
        )
        .await
        .unwrap_err();
        assert!(matches!(tool_error(&err), ToolError::NotFound(_)));
    }

    #[test]
    fn insert_lines_handles_edges() {
        assert_eq!(insert_lines("", 0, "x").unwrap(), "x\n");
        assert_eq!(insert_lines("a", 1, "b").unwrap(), "a\nb\n");
        assert_eq!(insert_lines("a\n", 0, "z\n").unwrap(), "z\na\n");
        assert!(matches!(
            insert_lines("a\n", 5, "b"),
            Err(ToolError::InvalidRange(_))
        ));
    }

    #[tokio::test]
    async fn paths_escaping_workspace_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(
            dir.path(),
            json!({"command": "create", "path": "../escape.txt", "file_text": "x"}),
        )
        .await
        .unwrap_err();
        assert!(matches!(tool_error(&err), ToolError::OutsideWorkspace(_)));
        assert!(!dir.path().parent().unwrap().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn unknown_command_is_invalid_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(dir.path(), json!({"command": "undo_edit", "path": "f"}))
            .await
            .unwrap_err();
        assert!(matches!(tool_error(&err), ToolError::InvalidArguments(_)));
    }
}
