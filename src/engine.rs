//! Engine coordinator
//!
//! Wires the shared components together from configuration:
//! lock table -> task registry -> process supervisor -> proxy bridge ->
//! tool catalog -> dispatcher.

use crate::cli::config::Config;
use crate::errors::Result;
use crate::locks::LockTable;
use crate::proxy::ProxyBridge;
use crate::task::TaskRegistry;
use crate::tools::catalog::ToolCatalog;
use crate::tools::dispatcher::Dispatcher;
use crate::tools::implementations::local_tools;
use crate::tools::retry::RetryManager;
use crate::tools::supervisor::ProcessSupervisor;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Delay before the first discovery retry
const DISCOVERY_BASE_DELAY_MS: u64 = 500;

/// Fully wired dispatch engine
pub struct Engine {
    tasks: Arc<TaskRegistry>,
    locks: Arc<LockTable>,
    catalog: Arc<ToolCatalog>,
    dispatcher: Arc<Dispatcher>,
    bridge: Option<Arc<ProxyBridge>>,
}

impl Engine {
    /// Build every component. Proxy discovery is left to the caller.
    pub async fn open(config: &Config) -> Result<Self> {
        let root = config.workspace_root();
        std::fs::create_dir_all(&root)?;

        let locks = Arc::new(LockTable::open(&root)?);
        let tasks = Arc::new(TaskRegistry::open(&root, locks.clone())?);
        let supervisor = Arc::new(ProcessSupervisor::new(
            config.tools.max_parallel_processes,
            config.tools.max_output_bytes,
        ));

        let bridge = if config.proxy.enabled {
            let bridge = ProxyBridge::new(
                &config.proxy.base_url,
                Duration::from_secs(config.proxy.timeout_secs),
            )?
            .with_retry(RetryManager::with_config(
                config.proxy.discovery_retries,
                DISCOVERY_BASE_DELAY_MS,
            ));
            Some(Arc::new(bridge))
        } else {
            None
        };

        let catalog = Arc::new(ToolCatalog::new(bridge.clone()));
        catalog
            .register_all(local_tools(locks.clone(), tasks.clone(), supervisor))
            .await?;

        let dispatcher = Arc::new(Dispatcher::new(
            tasks.clone(),
            locks.clone(),
            catalog.clone(),
            &config.tools,
        ));

        info!(
            root = %root.display(),
            local_tools = catalog.len().await,
            proxy = bridge.as_ref().map(|b| b.base_url()).unwrap_or("disabled"),
            "engine ready"
        );

        Ok(Self {
            tasks,
            locks,
            catalog,
            dispatcher,
            bridge,
        })
    }

    /// Register the peer's tools. Failures are logged and leave the catalog
    /// with local tools only.
    pub async fn discover_proxy_tools(&self) -> usize {
        if self.bridge.is_none() {
            return 0;
        }
        match self.catalog.refresh_proxy_tools().await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "proxy tool discovery failed; continuing with local tools");
                0
            }
        }
    }

    pub fn tasks(&self) -> &Arc<TaskRegistry> {
        &self.tasks
    }

    pub fn locks(&self) -> &Arc<LockTable> {
        &self.locks
    }

    pub fn catalog(&self) -> &Arc<ToolCatalog> {
        &self.catalog
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn bridge(&self) -> Option<&Arc<ProxyBridge>> {
        self.bridge.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config_for(root: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.workspace.root = root.to_string_lossy().into_owned();
        config.proxy.enabled = false;
        config
    }

    #[tokio::test]
    async fn test_open_registers_local_tools() {
        let temp = tempfile::tempdir().unwrap();
        let engine = Engine::open(&config_for(temp.path())).await.unwrap();

        let names = engine.catalog().names().await;
        for expected in ["file_read", "file_lock", "execute_shell", "workspace_copy"] {
            assert!(names.iter().any(|n| n == expected), "missing {}", expected);
        }
        assert_eq!(engine.discover_proxy_tools().await, 0);
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let temp = tempfile::tempdir().unwrap();
        let config = config_for(temp.path());

        let engine = Engine::open(&config).await.unwrap();
        engine.tasks().create("demo", "Demo", None).unwrap();
        let locked = engine
            .dispatcher()
            .execute("demo", "file_lock", json!({"file_path": "a.txt", "locker_name": "alice", "level": 2}))
            .await;
        assert!(locked.success);
        drop(engine);

        let reopened = Engine::open(&config).await.unwrap();
        assert!(reopened.tasks().exists("demo"));
        assert!(reopened.locks().get("tasks/demo/a.txt").unwrap().is_some());
    }
}
