//! Tool registry: built-ins plus scanned custom tools.
//!
//! Built at startup; name collisions with built-ins or between custom
//! files are skipped with a diagnostic, never fatal.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use drost_domain::config::ToolsConfig;
use drost_domain::tool::ToolDefinition;

use crate::builtin;
use crate::custom::{CustomTool, CustomToolManifest};
use crate::runtime::{GatewayHandle, Tool};

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    // Registration order, for stable definition listings.
    order: Vec<String>,
    diagnostics: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a built-in. Built-in names are reserved; a duplicate here
    /// is a programming error and is skipped with a diagnostic.
    pub fn register_builtin(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name;
        if self.tools.contains_key(&name) {
            self.diagnostics
                .push(format!("duplicate built-in tool '{name}' skipped"));
            return;
        }
        self.order.push(name.clone());
        self.tools.insert(name, tool);
    }

    /// Register a custom tool; collisions with built-ins or earlier custom
    /// files are skipped with a diagnostic.
    pub fn register_custom(&mut self, tool: Arc<dyn Tool>, source: &str) {
        let name = tool.definition().name;
        if self.tools.contains_key(&name) {
            let diag =
                format!("custom tool '{name}' from {source} shadows an existing tool, skipped");
            tracing::warn!("{diag}");
            self.diagnostics.push(diag);
            return;
        }
        self.order.push(name.clone());
        self.tools.insert(name, tool);
    }

    /// Scan a directory for `*.tool.json` manifests.
    pub fn scan_custom_dir(&mut self, dir: &Path) {
        let entries = match std::fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) => {
                let diag = format!("custom tool dir '{}' unreadable: {e}", dir.display());
                tracing::warn!("{diag}");
                self.diagnostics.push(diag);
                return;
            }
        };

        let mut paths: Vec<_> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(".tool.json"))
            })
            .collect();
        paths.sort();

        for path in paths {
            match CustomToolManifest::load(&path) {
                Ok(manifest) => {
                    let source = path.display().to_string();
                    self.register_custom(Arc::new(CustomTool::new(manifest)), &source);
                }
                Err(e) => {
                    let diag = format!("custom tool '{}' skipped: {e}", path.display());
                    tracing::warn!("{diag}");
                    self.diagnostics.push(diag);
                }
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Definitions in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| t.definition())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }
}

/// Build the full registry: built-ins ∪ scanned custom tools.
///
/// `gateway` backs the `agent` tool; `None` (tests, offline tooling)
/// omits it.
pub fn build_registry(
    config: &ToolsConfig,
    gateway: Option<Arc<dyn GatewayHandle>>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register_builtin(Arc::new(builtin::file::FileTool));
    registry.register_builtin(Arc::new(builtin::shell::ShellTool::new(
        config.shell.clone(),
    )));
    registry.register_builtin(Arc::new(builtin::web::WebTool::new(config.web.clone())));
    for tool in builtin::code::code_tools() {
        registry.register_builtin(tool);
    }
    if let Some(handle) = gateway {
        registry.register_builtin(Arc::new(builtin::agent::AgentTool::new(handle)));
    }

    if let Some(dir) = &config.custom_dir {
        registry.scan_custom_dir(dir);
    }

    tracing::info!(
        tools = registry.len(),
        diagnostics = registry.diagnostics().len(),
        "tool registry built"
    );
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn builtins_present() {
        let registry = build_registry(&ToolsConfig::default(), None);
        for name in [
            "file",
            "shell",
            "web",
            "code.status",
            "code.diff",
            "code.patch",
            "code.search",
            "code.read_context",
        ] {
            assert!(registry.get(name).is_some(), "missing builtin {name}");
        }
        // No gateway handle, no agent tool.
        assert!(registry.get("agent").is_none());
    }

    #[test]
    fn custom_collision_skipped_with_diagnostic() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("shadow.tool.json"),
            r#"{"name": "file", "command": ["true"]}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("fresh.tool.json"),
            r#"{"name": "fresh", "command": ["true"]}"#,
        )
        .unwrap();

        let mut config = ToolsConfig::default();
        config.custom_dir = Some(dir.path().to_path_buf());
        let registry = build_registry(&config, None);

        assert!(registry.get("fresh").is_some());
        assert!(registry
            .diagnostics()
            .iter()
            .any(|d| d.contains("'file'") && d.contains("shadows")));
    }

    #[test]
    fn malformed_manifest_is_diagnostic_not_fatal() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("broken.tool.json"), "{oops").unwrap();

        let mut config = ToolsConfig::default();
        config.custom_dir = Some(dir.path().to_path_buf());
        let registry = build_registry(&config, None);

        assert!(!registry.is_empty());
        assert!(registry
            .diagnostics()
            .iter()
            .any(|d| d.contains("broken.tool.json")));
    }
}
