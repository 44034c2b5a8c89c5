//! Filesystem tool implementations
//!
//! Every path is resolved through the task's jail. Mutating tools declare
//! their path parameters so the dispatcher checks locks before they run:
//! - file_write, file_replace_lines, file_delete: `file_path`
//! - file_move: `src_path`, `dest_path`
//! - dir_create: `dir_path`
//! - file_upload: `target_path`

use crate::errors::{EngineError, Result};
use crate::tools::implementations::{optional_positive, optional_str, required_str, run_blocking};
use crate::tools::types::{ExecutionEnvelope, Tool, ToolContext, ToolDescriptor};
use async_trait::async_trait;
use base64::Engine as _;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FsOp {
    Read,
    Write,
    ReplaceLines,
    Delete,
    Move,
    DirCreate,
    DirList,
    Search,
    Upload,
}

/// A filesystem tool bound to one operation
pub struct FilesystemTool {
    descriptor: ToolDescriptor,
    op: FsOp,
}

#[async_trait]
impl Tool for FilesystemTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    /// Every operation touches the disk synchronously, so all of them run
    /// off the scheduler thread.
    async fn execute(&self, ctx: &ToolContext, params: Value) -> Result<ExecutionEnvelope> {
        let op = self.op;
        let ctx = ctx.clone();
        run_blocking(move || match op {
            FsOp::Read => file_read(&ctx, &params),
            FsOp::Write => file_write(&ctx, &params),
            FsOp::ReplaceLines => file_replace_lines(&ctx, &params),
            FsOp::Delete => file_delete(&ctx, &params),
            FsOp::Move => file_move(&ctx, &params),
            FsOp::DirCreate => dir_create(&ctx, &params),
            FsOp::DirList => dir_list(&ctx, &params),
            FsOp::Search => file_search(&ctx, &params),
            FsOp::Upload => file_upload(&ctx, &params),
        })
        .await
    }
}

fn tool(op: FsOp, descriptor: ToolDescriptor) -> Arc<dyn Tool> {
    Arc::new(FilesystemTool { descriptor, op })
}

/// All filesystem tools
pub fn filesystem_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        tool(
            FsOp::Read,
            ToolDescriptor::local(
                "file_read",
                "Read a text file, optionally a line range",
                json!({
                    "type": "object",
                    "properties": {
                        "file_path": { "type": "string" },
                        "start_line": { "type": "integer", "minimum": 1 },
                        "end_line": { "type": "integer", "minimum": 1 }
                    },
                    "required": ["file_path"]
                }),
            ),
        ),
        tool(
            FsOp::Write,
            ToolDescriptor::local(
                "file_write",
                "Write or append content to a file",
                json!({
                    "type": "object",
                    "properties": {
                        "file_path": { "type": "string" },
                        "content": { "type": "string" },
                        "mode": { "type": "string", "enum": ["overwrite", "append"], "default": "overwrite" },
                        "is_base64": { "type": "boolean", "default": false }
                    },
                    "required": ["file_path"]
                }),
            )
            .with_path_params(&["file_path"]),
        ),
        tool(
            FsOp::ReplaceLines,
            ToolDescriptor::local(
                "file_replace_lines",
                "Replace an inclusive line range of a file",
                json!({
                    "type": "object",
                    "properties": {
                        "file_path": { "type": "string" },
                        "start_line": { "type": "integer", "minimum": 1 },
                        "end_line": { "type": "integer", "minimum": 1 },
                        "new_content": { "type": "string" },
                        "is_base64": { "type": "boolean", "default": false }
                    },
                    "required": ["file_path", "start_line", "end_line"]
                }),
            )
            .with_path_params(&["file_path"]),
        ),
        tool(
            FsOp::Delete,
            ToolDescriptor::local(
                "file_delete",
                "Delete a file or directory",
                json!({
                    "type": "object",
                    "properties": { "file_path": { "type": "string" } },
                    "required": ["file_path"]
                }),
            )
            .with_path_params(&["file_path"]),
        ),
        tool(
            FsOp::Move,
            ToolDescriptor::local(
                "file_move",
                "Move or rename a file",
                json!({
                    "type": "object",
                    "properties": {
                        "src_path": { "type": "string" },
                        "dest_path": { "type": "string" }
                    },
                    "required": ["src_path", "dest_path"]
                }),
            )
            .with_path_params(&["src_path", "dest_path"]),
        ),
        tool(
            FsOp::DirCreate,
            ToolDescriptor::local(
                "dir_create",
                "Create a directory and any missing parents",
                json!({
                    "type": "object",
                    "properties": { "dir_path": { "type": "string" } },
                    "required": ["dir_path"]
                }),
            )
            .with_path_params(&["dir_path"]),
        ),
        tool(
            FsOp::DirList,
            ToolDescriptor::local(
                "dir_list",
                "List a directory as a tree",
                json!({
                    "type": "object",
                    "properties": {
                        "dir_path": { "type": "string", "default": "" },
                        "recursive": { "type": "boolean", "default": false }
                    }
                }),
            ),
        ),
        tool(
            FsOp::Search,
            ToolDescriptor::local(
                "file_search",
                "Find lines containing a string",
                json!({
                    "type": "object",
                    "properties": {
                        "file_path": { "type": "string" },
                        "search_text": { "type": "string" },
                        "case_sensitive": { "type": "boolean", "default": false }
                    },
                    "required": ["file_path", "search_text"]
                }),
            ),
        ),
        tool(
            FsOp::Upload,
            ToolDescriptor::local(
                "file_upload",
                "Store one or more files under a target directory",
                json!({
                    "type": "object",
                    "properties": {
                        "files": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "filename": { "type": "string" },
                                    "content": { "type": "string" },
                                    "is_base64": { "type": "boolean" }
                                }
                            }
                        },
                        "target_path": { "type": "string", "default": "upload" }
                    },
                    "required": ["files"]
                }),
            )
            .with_path_params(&["target_path"]),
        ),
    ]
}

/// Read a text file
pub fn file_read(ctx: &ToolContext, params: &Value) -> Result<ExecutionEnvelope> {
    let file_path = required_str(params, "file_path")?;
    let full_path = ctx.jail.resolve(file_path)?;

    if !full_path.exists() {
        return Ok(ExecutionEnvelope::failure(format!("File not found: {}", file_path)));
    }
    if !full_path.is_file() {
        return Ok(ExecutionEnvelope::failure(format!("Not a file: {}", file_path)));
    }

    let size = fs::metadata(&full_path)?.len();
    if size > ctx.max_output_size as u64 {
        return Ok(ExecutionEnvelope::failure(format!(
            "File too large: {} bytes (max: {})",
            size, ctx.max_output_size
        )));
    }

    let Ok(text) = fs::read_to_string(&full_path) else {
        return Ok(ExecutionEnvelope::failure(format!(
            "Cannot read file as text: {}",
            file_path
        )));
    };

    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let total_lines = lines.len();
    let start_line = optional_positive(params, "start_line")?;
    let end_line = optional_positive(params, "end_line")?;

    let (content, line_range) = if start_line.is_none() && end_line.is_none() {
        (text.clone(), format!("1-{}", total_lines))
    } else if total_lines == 0 {
        (String::new(), "0-0".to_string())
    } else {
        let start_idx = start_line
            .map(|s| s as usize - 1)
            .unwrap_or(0)
            .min(total_lines - 1);
        let end_idx = end_line
            .map(|e| e as usize)
            .unwrap_or(total_lines)
            .min(total_lines)
            .max(start_idx + 1);
        (
            lines[start_idx..end_idx].concat(),
            format!("{}-{}", start_idx + 1, end_idx),
        )
    };

    Ok(ExecutionEnvelope::success(json!({
        "content": content,
        "total_lines": total_lines,
        "line_range": line_range,
        "file_path": file_path,
    })))
}

/// Write or append to a file, creating parent directories
pub fn file_write(ctx: &ToolContext, params: &Value) -> Result<ExecutionEnvelope> {
    let file_path = required_str(params, "file_path")?;
    let mode = params["mode"].as_str().unwrap_or("overwrite");
    if mode != "overwrite" && mode != "append" {
        return Err(EngineError::Validation(format!(
            "mode must be 'overwrite' or 'append', got '{}'",
            mode
        )));
    }

    let bytes = match decode_content(params, "content") {
        Ok(bytes) => bytes,
        Err(message) => return Ok(ExecutionEnvelope::failure(message)),
    };

    let full_path = ctx.jail.resolve(file_path)?;
    if full_path.is_dir() {
        return Ok(ExecutionEnvelope::failure(format!("Path is a directory: {}", file_path)));
    }
    if let Some(parent) = full_path.parent() {
        fs::create_dir_all(parent)?;
    }

    if mode == "append" {
        use std::io::Write;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&full_path)?;
        file.write_all(&bytes)?;
    } else {
        fs::write(&full_path, &bytes)?;
    }

    let size = fs::metadata(&full_path)?.len();
    Ok(ExecutionEnvelope::success(json!({
        "file_path": file_path,
        "mode": mode,
        "bytes_written": bytes.len(),
        "size": size,
    })))
}

/// Replace lines `start_line..=end_line` with new content
pub fn file_replace_lines(ctx: &ToolContext, params: &Value) -> Result<ExecutionEnvelope> {
    let file_path = required_str(params, "file_path")?;
    let (Some(start_line), Some(end_line)) = (
        optional_positive(params, "start_line")?,
        optional_positive(params, "end_line")?,
    ) else {
        return Err(EngineError::Validation(
            "file_path, start_line, and end_line are required".to_string(),
        ));
    };

    let full_path = ctx.jail.resolve(file_path)?;
    if !full_path.is_file() {
        return Ok(ExecutionEnvelope::failure(format!("File not found: {}", file_path)));
    }

    let new_content = match decode_content(params, "new_content") {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(_) => return Ok(ExecutionEnvelope::failure("new_content is not valid UTF-8")),
        },
        Err(message) => return Ok(ExecutionEnvelope::failure(message)),
    };

    let text = fs::read_to_string(&full_path)?;
    let mut lines: Vec<String> = text.split_inclusive('\n').map(String::from).collect();
    let total_lines = lines.len();
    let start_idx = start_line as usize - 1;
    let end_idx = end_line as usize;

    if start_idx >= total_lines {
        return Ok(ExecutionEnvelope::failure(format!("Invalid start line: {}", start_line)));
    }
    if end_idx <= start_idx || end_idx > total_lines {
        return Ok(ExecutionEnvelope::failure(format!("Invalid end line: {}", end_line)));
    }

    let mut new_lines: Vec<String> = new_content.split_inclusive('\n').map(String::from).collect();
    if let Some(last) = new_lines.last_mut() {
        if !last.ends_with('\n') {
            last.push('\n');
        }
    }
    let new_line_count = new_lines.len();
    lines.splice(start_idx..end_idx, new_lines);
    fs::write(&full_path, lines.concat())?;

    Ok(ExecutionEnvelope::success(json!({
        "file_path": file_path,
        "replaced_lines": format!("{}-{}", start_line, end_line),
        "new_line_count": new_line_count,
        "total_lines": lines.len(),
    })))
}

/// Delete a file or a directory tree
pub fn file_delete(ctx: &ToolContext, params: &Value) -> Result<ExecutionEnvelope> {
    let file_path = required_str(params, "file_path")?;
    if ctx.jail.relative(file_path)?.as_os_str().is_empty() {
        return Err(EngineError::Validation(
            "Refusing to delete the task workspace root".to_string(),
        ));
    }

    let full_path = ctx.jail.resolve(file_path)?;
    let Ok(meta) = fs::symlink_metadata(&full_path) else {
        return Ok(ExecutionEnvelope::failure(format!("File not found: {}", file_path)));
    };

    let kind = if meta.is_dir() {
        fs::remove_dir_all(&full_path)?;
        "directory"
    } else {
        fs::remove_file(&full_path)?;
        "file"
    };

    Ok(ExecutionEnvelope::success(json!({
        "file_path": file_path,
        "deleted": true,
        "type": kind,
    })))
}

/// Move or rename within the task workspace
pub fn file_move(ctx: &ToolContext, params: &Value) -> Result<ExecutionEnvelope> {
    let src_path = required_str(params, "src_path")?;
    let dest_path = required_str(params, "dest_path")?;
    if ctx.jail.relative(src_path)?.as_os_str().is_empty()
        || ctx.jail.relative(dest_path)?.as_os_str().is_empty()
    {
        return Err(EngineError::Validation(
            "Cannot move the task workspace root".to_string(),
        ));
    }

    let src = ctx.jail.resolve(src_path)?;
    let dest = ctx.jail.resolve(dest_path)?;
    if !src.exists() {
        return Ok(ExecutionEnvelope::failure(format!("Source not found: {}", src_path)));
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(&src, &dest)?;

    Ok(ExecutionEnvelope::success(json!({
        "src_path": src_path,
        "dest_path": dest_path,
        "moved": true,
    })))
}

/// Create a directory (and parents)
pub fn dir_create(ctx: &ToolContext, params: &Value) -> Result<ExecutionEnvelope> {
    let dir_path = required_str(params, "dir_path")?;
    let full_path = ctx.jail.resolve(dir_path)?;
    let existed = full_path.is_dir();
    fs::create_dir_all(&full_path)?;

    Ok(ExecutionEnvelope::success(json!({
        "dir_path": dir_path,
        "created": !existed,
    })))
}

/// List a directory, one level or as a full tree
pub fn dir_list(ctx: &ToolContext, params: &Value) -> Result<ExecutionEnvelope> {
    let dir_path = params["dir_path"].as_str().unwrap_or("");
    let recursive = params["recursive"].as_bool().unwrap_or(false);
    let full_path = ctx.jail.resolve(if dir_path.is_empty() { "." } else { dir_path })?;

    if !full_path.exists() {
        return Ok(ExecutionEnvelope::failure(format!("Directory not found: {}", dir_path)));
    }
    if !full_path.is_dir() {
        return Ok(ExecutionEnvelope::failure(format!("Not a directory: {}", dir_path)));
    }

    let base = ctx.jail.jail_root();
    let tree = if recursive {
        build_tree(&full_path, base, true)?
    } else {
        let mut children = Vec::new();
        for entry in sorted_entries(&full_path)? {
            children.push(build_tree(&entry, base, false)?);
        }
        json!({
            "name": full_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
            "type": "directory",
            "path": if dir_path.is_empty() { "." } else { dir_path },
            "children": children,
        })
    };

    Ok(ExecutionEnvelope::success(json!({ "tree": tree })))
}

fn sorted_entries(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();
    Ok(entries)
}

fn build_tree(path: &Path, base: &Path, recursive: bool) -> Result<Value> {
    let relative = path.strip_prefix(base).unwrap_or(path);
    let mut node = json!({
        "name": path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
        "type": if path.is_dir() { "directory" } else { "file" },
        "path": crate::tools::security::slash_path(relative),
    });

    let meta = fs::symlink_metadata(path)?;
    if meta.is_file() {
        node["size"] = json!(meta.len());
    } else if meta.is_dir() && recursive {
        let mut children = Vec::new();
        for child in sorted_entries(path)? {
            children.push(build_tree(&child, base, true)?);
        }
        node["children"] = Value::Array(children);
    }

    Ok(node)
}

/// Search a text file line by line
pub fn file_search(ctx: &ToolContext, params: &Value) -> Result<ExecutionEnvelope> {
    let file_path = required_str(params, "file_path")?;
    let Some(search_text) = params["search_text"].as_str().filter(|s| !s.is_empty()) else {
        return Err(EngineError::Validation("search_text is required".to_string()));
    };
    let case_sensitive = params["case_sensitive"].as_bool().unwrap_or(false);

    let full_path = ctx.jail.resolve(file_path)?;
    if !full_path.is_file() {
        return Ok(ExecutionEnvelope::failure(format!("File not found: {}", file_path)));
    }
    let Ok(text) = fs::read_to_string(&full_path) else {
        return Ok(ExecutionEnvelope::failure(format!(
            "Cannot read file as text: {}",
            file_path
        )));
    };

    let needle = if case_sensitive {
        search_text.to_string()
    } else {
        search_text.to_lowercase()
    };

    let mut matches = Vec::new();
    let mut total_lines = 0;
    for (index, line) in text.lines().enumerate() {
        total_lines += 1;
        let haystack = if case_sensitive {
            line.to_string()
        } else {
            line.to_lowercase()
        };
        let positions: Vec<usize> = haystack.match_indices(&needle).map(|(i, _)| i).collect();
        if !positions.is_empty() {
            matches.push(json!({
                "line_number": index + 1,
                "line_content": line,
                "match_positions": positions,
            }));
        }
    }

    Ok(ExecutionEnvelope::success(json!({
        "file_path": file_path,
        "search_text": search_text,
        "case_sensitive": case_sensitive,
        "total_matches": matches.len(),
        "total_lines": total_lines,
        "matches": matches,
    })))
}

/// Store uploaded files under `target_path` (default `upload`)
pub fn file_upload(ctx: &ToolContext, params: &Value) -> Result<ExecutionEnvelope> {
    let target_path = optional_str(params, "target_path").unwrap_or("upload");
    let Some(files) = params["files"].as_array() else {
        return Err(EngineError::Validation("files must be an array".to_string()));
    };

    let upload_dir = ctx.jail.resolve(target_path)?;
    fs::create_dir_all(&upload_dir)?;

    let mut uploaded = Vec::new();
    for file in files {
        let (Some(filename), Some(_)) = (optional_str(file, "filename"), file.get("content")) else {
            continue;
        };
        let bytes = match decode_content(file, "content") {
            Ok(bytes) => bytes,
            Err(message) => {
                return Ok(ExecutionEnvelope::failure(format!("{}: {}", filename, message)))
            }
        };

        let full_path = ctx.jail.resolve(&format!("{}/{}", target_path, filename))?;
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&full_path, &bytes)?;

        let relative = full_path
            .strip_prefix(ctx.jail.jail_root())
            .map(crate::tools::security::slash_path)
            .unwrap_or_else(|_| filename.to_string());
        uploaded.push(json!({
            "filename": filename,
            "path": relative,
            "size": bytes.len(),
        }));
    }

    Ok(ExecutionEnvelope::success(json!({
        "uploaded_files": uploaded,
        "upload_dir": target_path,
    })))
}

/// Content of `key`, base64-decoded when `is_base64` is set
fn decode_content(params: &Value, key: &str) -> std::result::Result<Vec<u8>, String> {
    let content = params[key].as_str().unwrap_or("");
    if params["is_base64"].as_bool().unwrap_or(false) {
        base64::engine::general_purpose::STANDARD
            .decode(content)
            .map_err(|e| format!("Base64 decode error: {}", e))
    } else {
        Ok(content.as_bytes().to_vec())
    }
}
