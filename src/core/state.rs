// 全局应用状态：集中初始化存储与行为服务。

use crate::config::Config;
use crate::i18n;
use crate::services::behavior::BehaviorService;
use crate::storage::{build_storage, StorageBackend};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub storage: Arc<dyn StorageBackend>,
    pub behavior: BehaviorService,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self> {
        i18n::configure_i18n(
            Some(config.i18n.default_language.clone()),
            Some(config.i18n.supported_languages.clone()),
            Some(config.i18n.aliases.clone()),
        );
        let storage = build_storage(&config.storage).context("build storage backend")?;
        // 启动时尝试建表；失败不阻断启动，首次访问时会再次初始化。
        match storage.ensure_initialized() {
            Ok(()) => info!("storage backend ready: {}", storage.backend_name()),
            Err(err) => warn!(
                "storage backend {} not ready yet: {err:#}",
                storage.backend_name()
            ),
        }
        Ok(Self::with_storage(config, storage))
    }

    /// 使用已构建的存储后端组装状态，测试与嵌入场景使用。
    pub fn with_storage(config: Config, storage: Arc<dyn StorageBackend>) -> Self {
        let behavior = BehaviorService::new(storage.clone(), config.behavior.clone());
        Self {
            config,
            storage,
            behavior,
        }
    }
}
