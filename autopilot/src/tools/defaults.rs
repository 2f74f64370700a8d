use std::path::Path;

use super::finish::FinishTask;
use super::fs::{CreateDirectory, DeleteFile, ListFiles, ReadFile, RenameFile, WriteFile};
use super::guard::WorkspaceGuard;
use super::knowledge::RecordLearning;
use super::sandbox::{ExecutePythonCode, RunTests, Sandbox};
use super::search::WebSearch;
use super::{RegistryError, ToolRegistry};
use crate::io::config::AgentConfig;
use crate::io::init::AgentPaths;

/// The full built-in tool set for a workspace.
pub fn default_registry(
    paths: &AgentPaths,
    config: &AgentConfig,
) -> Result<ToolRegistry, RegistryError> {
    let guard = WorkspaceGuard::new(&paths.root, &config.workspace.protected_paths);
    let sandbox = Sandbox::new(
        Path::new(&paths.root),
        &config.sandbox,
        config.tool_output_limit_bytes,
    );
    ToolRegistry::builder()
        .output_limit_bytes(config.tool_output_limit_bytes)
        .register(ReadFile::new(guard.clone()))
        .register(ListFiles::new(guard.clone()))
        .register(WriteFile::new(guard.clone()))
        .register(CreateDirectory::new(guard.clone()))
        .register(DeleteFile::new(guard.clone()))
        .register(RenameFile::new(guard))
        .register(ExecutePythonCode::new(sandbox.clone()))
        .register(RunTests::new(sandbox, config.sandbox.test_command.clone()))
        .register(WebSearch::new(config.search.clone()))
        .register(RecordLearning::new(&paths.knowledge_base_path))
        .register(FinishTask::new())
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::COMPLETION_TOOL;

    #[test]
    fn builds_every_builtin_tool() {
        let temp = tempfile::tempdir().expect("tempdir");
        let registry =
            default_registry(&AgentPaths::new(temp.path()), &AgentConfig::default())
                .expect("registry");
        assert_eq!(
            registry.names(),
            vec![
                "read_file",
                "list_files",
                "write_file",
                "create_directory",
                "delete_file",
                "rename_file",
                "execute_python_code",
                "run_tests",
                "web_search",
                "record_learning",
                COMPLETION_TOOL,
            ]
        );
        for name in ["write_file", "delete_file", "rename_file", "execute_python_code"] {
            assert!(registry.requires_confirmation(name), "{name}");
        }
        assert!(!registry.requires_confirmation("read_file"));
        assert!(!registry.requires_confirmation(COMPLETION_TOOL));
    }
}
