//! 配置模块，负责加载JSON配置文件
//!
//! 配置包含数据库路径和注册表快照（驱动及其属性定义、诊断、策略与规则）。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

use crate::registry::InMemoryRegistry;

/// 配置加载错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("配置文件不存在: {0}")]
    NotFound(PathBuf),
    #[error("无法读取配置文件 {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("无法解析JSON配置文件 {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// SQLite 数据库文件，缺省时使用内存数据库
    #[serde(default)]
    pub database: Option<PathBuf>,
    #[serde(default)]
    pub registry: InMemoryRegistry,
}

impl AppConfig {
    /// 从JSON文件加载配置
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        serde_json::from_str(&content)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    /// 加载失败时记录原因并使用默认配置
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::from_json_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!("{}，使用默认配置", e);
                Self::default()
            }
        }
    }
}
