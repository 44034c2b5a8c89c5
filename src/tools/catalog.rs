//! Tool catalog
//!
//! Name-indexed registry of every dispatchable tool. Local tools are
//! registered once at startup; proxy tools are replaced wholesale on each
//! discovery. A proxy name never shadows a local one.

use crate::errors::{EngineError, Result};
use crate::proxy::{ProxyBridge, ProxyTool};
use crate::tools::types::{Tool, ToolDescriptor, ToolKind};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Summary returned by `GET /api/tools/info`
#[derive(Debug, Clone, Serialize)]
pub struct CatalogInfo {
    pub total_count: usize,
    pub local_count: usize,
    pub proxy_count: usize,
    pub tools: Vec<ToolDescriptor>,
}

/// Tool catalog
pub struct ToolCatalog {
    /// Map of tool name to implementation
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,

    /// Source of proxy tools, when a peer is configured
    bridge: Option<Arc<ProxyBridge>>,
}

impl ToolCatalog {
    pub fn new(bridge: Option<Arc<ProxyBridge>>) -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            bridge,
        }
    }

    /// Register a local tool; names must be unique
    pub async fn register_local(&self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.descriptor().name.clone();
        let mut tools = self.tools.write().await;
        if tools
            .get(&name)
            .is_some_and(|existing| existing.descriptor().kind == ToolKind::Local)
        {
            return Err(EngineError::Conflict(format!(
                "Tool already registered: {}",
                name
            )));
        }
        tools.insert(name, tool);
        Ok(())
    }

    /// Register several local tools
    pub async fn register_all(&self, tools: Vec<Arc<dyn Tool>>) -> Result<()> {
        for tool in tools {
            self.register_local(tool).await?;
        }
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.tools.read().await.contains_key(name)
    }

    /// All tool names, sorted
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// All descriptors, sorted by name
    pub async fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<ToolDescriptor> = self
            .tools
            .read()
            .await
            .values()
            .map(|tool| tool.descriptor().clone())
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub async fn info(&self) -> CatalogInfo {
        let tools = self.descriptors().await;
        let local_count = tools.iter().filter(|d| d.kind == ToolKind::Local).count();
        CatalogInfo {
            total_count: tools.len(),
            local_count,
            proxy_count: tools.len() - local_count,
            tools,
        }
    }

    pub async fn len(&self) -> usize {
        self.tools.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tools.read().await.is_empty()
    }

    /// Re-discover the peer's tools and replace every proxy entry.
    ///
    /// Returns the number of proxy tools now registered. On discovery failure
    /// the previous proxy entries are kept.
    pub async fn refresh_proxy_tools(&self) -> Result<usize> {
        let Some(bridge) = self.bridge.clone() else {
            return Err(EngineError::ConfigError(
                "No proxy service configured".to_string(),
            ));
        };

        let discovered = bridge.discover_tools().await?;
        Ok(self.install_proxy_tools(&bridge, discovered).await)
    }

    async fn install_proxy_tools(&self, bridge: &Arc<ProxyBridge>, names: Vec<String>) -> usize {
        let mut tools = self.tools.write().await;
        tools.retain(|_, tool| tool.descriptor().kind == ToolKind::Local);

        let mut added = 0;
        for name in names {
            if tools.contains_key(&name) {
                warn!(tool = %name, "proxy tool shadows a local tool, skipping");
                continue;
            }
            tools.insert(name.clone(), Arc::new(ProxyTool::new(name, bridge.clone())));
            added += 1;
        }

        info!(proxy_tools = added, total = tools.len(), "proxy tools refreshed");
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::types::{ExecutionEnvelope, ToolContext};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;

    struct Echo(ToolDescriptor);

    #[async_trait]
    impl Tool for Echo {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.0
        }

        async fn execute(&self, _ctx: &ToolContext, params: Value) -> Result<ExecutionEnvelope> {
            Ok(ExecutionEnvelope::success(params))
        }
    }

    fn echo(name: &str) -> Arc<dyn Tool> {
        Arc::new(Echo(ToolDescriptor::local(name, "echo", json!({}))))
    }

    fn bridge() -> Arc<ProxyBridge> {
        Arc::new(ProxyBridge::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap())
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let catalog = ToolCatalog::new(None);
        catalog.register_all(vec![echo("b_tool"), echo("a_tool")]).await.unwrap();

        assert!(catalog.contains("a_tool").await);
        assert!(catalog.get("missing").await.is_none());
        assert_eq!(catalog.names().await, vec!["a_tool", "b_tool"]);
    }

    #[tokio::test]
    async fn test_duplicate_local_rejected() {
        let catalog = ToolCatalog::new(None);
        catalog.register_local(echo("file_read")).await.unwrap();
        let err = catalog.register_local(echo("file_read")).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_proxy_names_never_shadow_local() {
        let bridge = bridge();
        let catalog = ToolCatalog::new(Some(bridge.clone()));
        catalog.register_local(echo("file_read")).await.unwrap();

        let added = catalog
            .install_proxy_tools(&bridge, vec!["file_read".into(), "render_pdf".into()])
            .await;
        assert_eq!(added, 1);

        let local = catalog.get("file_read").await.unwrap();
        assert_eq!(local.descriptor().kind, ToolKind::Local);

        let info = catalog.info().await;
        assert_eq!(info.total_count, 2);
        assert_eq!(info.local_count, 1);
        assert_eq!(info.proxy_count, 1);
    }

    #[tokio::test]
    async fn test_refresh_replaces_proxy_set() {
        let bridge = bridge();
        let catalog = ToolCatalog::new(Some(bridge.clone()));
        catalog
            .install_proxy_tools(&bridge, vec!["old_remote".into()])
            .await;
        catalog
            .install_proxy_tools(&bridge, vec!["new_remote".into()])
            .await;

        assert!(!catalog.contains("old_remote").await);
        assert!(catalog.contains("new_remote").await);
    }

    #[tokio::test]
    async fn test_refresh_without_bridge() {
        let catalog = ToolCatalog::new(None);
        assert!(catalog.refresh_proxy_tools().await.is_err());
    }
}
