//! Workspace file tools.

use std::fs;
use std::io::ErrorKind;

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tracing::debug;

use super::guard::{Access, WorkspaceGuard};
use super::{Tool, ToolDescriptor, str_arg, string_params};

macro_rules! resolve_or_deny {
    ($guard:expr, $path:expr, $access:expr) => {
        match $guard.resolve($path, $access) {
            Ok(resolved) => resolved,
            Err(err) => return Ok(err.to_string()),
        }
    };
}

fn not_found(path: &str) -> String {
    format!("Error: file not found: {path}")
}

pub struct ReadFile {
    descriptor: ToolDescriptor,
    guard: WorkspaceGuard,
}

impl ReadFile {
    pub fn new(guard: WorkspaceGuard) -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "read_file",
                "Read a text file from the workspace.",
                string_params(&[("filepath", "Workspace-relative path of the file to read.")]),
            ),
            guard,
        }
    }
}

impl Tool for ReadFile {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    fn invoke(&self, args: &Map<String, Value>) -> Result<String> {
        let requested = str_arg(args, "filepath")?;
        let path = resolve_or_deny!(self.guard, requested, Access::Read);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(contents),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(not_found(requested)),
            Err(err) => Err(err).with_context(|| format!("read {requested}")),
        }
    }
}

pub struct ListFiles {
    descriptor: ToolDescriptor,
    guard: WorkspaceGuard,
}

impl ListFiles {
    pub fn new(guard: WorkspaceGuard) -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "list_files",
                "List the entries of a workspace directory. Directories end with '/'.",
                string_params(&[("path", "Workspace-relative directory, '.' for the root.")]),
            ),
            guard,
        }
    }
}

impl Tool for ListFiles {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    fn invoke(&self, args: &Map<String, Value>) -> Result<String> {
        let requested = str_arg(args, "path")?;
        let dir = resolve_or_deny!(self.guard, requested, Access::Read);
        let read = match fs::read_dir(&dir) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Ok(format!("Error: directory not found: {requested}"));
            }
            Err(err) => return Err(err).with_context(|| format!("list {requested}")),
        };
        let mut entries = Vec::new();
        for entry in read {
            let entry = entry.with_context(|| format!("list {requested}"))?;
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().is_ok_and(|t| t.is_dir()) {
                name.push('/');
            }
            entries.push(name);
        }
        entries.sort();
        if entries.is_empty() {
            return Ok(format!("Directory '{requested}' is empty."));
        }
        Ok(entries.join("\n"))
    }
}

pub struct WriteFile {
    descriptor: ToolDescriptor,
    guard: WorkspaceGuard,
}

impl WriteFile {
    pub fn new(guard: WorkspaceGuard) -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "write_file",
                "Create or overwrite a workspace file with the given content.",
                string_params(&[
                    ("filepath", "Workspace-relative path of the file to write."),
                    ("content", "Full new content of the file."),
                ]),
            )
            .confirmed(),
            guard,
        }
    }
}

impl Tool for WriteFile {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    fn invoke(&self, args: &Map<String, Value>) -> Result<String> {
        let requested = str_arg(args, "filepath")?;
        let content = str_arg(args, "content")?;
        let path = resolve_or_deny!(self.guard, requested, Access::Write);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create parent of {requested}"))?;
        }
        fs::write(&path, content).with_context(|| format!("write {requested}"))?;
        debug!(path = %path.display(), bytes = content.len(), "file written");
        Ok("File written successfully.".to_string())
    }
}

pub struct CreateDirectory {
    descriptor: ToolDescriptor,
    guard: WorkspaceGuard,
}

impl CreateDirectory {
    pub fn new(guard: WorkspaceGuard) -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "create_directory",
                "Create a workspace directory, including missing parents.",
                string_params(&[("path", "Workspace-relative directory to create.")]),
            ),
            guard,
        }
    }
}

impl Tool for CreateDirectory {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    fn invoke(&self, args: &Map<String, Value>) -> Result<String> {
        let requested = str_arg(args, "path")?;
        let path = resolve_or_deny!(self.guard, requested, Access::Write);
        fs::create_dir_all(&path).with_context(|| format!("create directory {requested}"))?;
        Ok(format!("Directory '{requested}' created successfully."))
    }
}

pub struct DeleteFile {
    descriptor: ToolDescriptor,
    guard: WorkspaceGuard,
}

impl DeleteFile {
    pub fn new(guard: WorkspaceGuard) -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "delete_file",
                "Delete a single workspace file.",
                string_params(&[("filepath", "Workspace-relative path of the file to delete.")]),
            )
            .confirmed(),
            guard,
        }
    }
}

impl Tool for DeleteFile {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    fn invoke(&self, args: &Map<String, Value>) -> Result<String> {
        let requested = str_arg(args, "filepath")?;
        let path = resolve_or_deny!(self.guard, requested, Access::Write);
        if path.is_dir() {
            return Ok(format!("Error: '{requested}' is a directory."));
        }
        match fs::remove_file(&path) {
            Ok(()) => Ok(format!("File '{requested}' deleted successfully.")),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(not_found(requested)),
            Err(err) => Err(err).with_context(|| format!("delete {requested}")),
        }
    }
}

pub struct RenameFile {
    descriptor: ToolDescriptor,
    guard: WorkspaceGuard,
}

impl RenameFile {
    pub fn new(guard: WorkspaceGuard) -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "rename_file",
                "Rename or move a workspace file.",
                string_params(&[
                    ("old_path", "Current workspace-relative path."),
                    ("new_path", "New workspace-relative path."),
                ]),
            )
            .confirmed(),
            guard,
        }
    }
}

impl Tool for RenameFile {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    fn invoke(&self, args: &Map<String, Value>) -> Result<String> {
        let old = str_arg(args, "old_path")?;
        let new = str_arg(args, "new_path")?;
        let from = resolve_or_deny!(self.guard, old, Access::Write);
        let to = resolve_or_deny!(self.guard, new, Access::Write);
        if !from.exists() {
            return Ok(not_found(old));
        }
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create parent of {new}"))?;
        }
        fs::rename(&from, &to).with_context(|| format!("rename {old} to {new}"))?;
        Ok(format!("File '{old}' renamed to '{new}'."))
    }
}
