//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `VADER__*` 覆盖（双下划线表示嵌套，如 `VADER__CYCLE__MIN_INTERVAL_MS=50`）。

use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::SchedulerConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub cycle: CycleSection,
    pub commands: CommandsSection,
    pub memory: MemorySection,
    pub persistence: PersistenceSection,
    pub http: HttpSection,
}

/// [app] 段：名称、数据目录、日志级别
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    pub data_dir: PathBuf,
    /// 未设置 RUST_LOG 时使用的过滤级别
    pub log_level: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "vader".to_string(),
            data_dir: PathBuf::from("./data"),
            log_level: "info".to_string(),
        }
    }
}

/// [cycle] 段：主循环节拍与各步超时（毫秒）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleSection {
    pub min_interval_ms: u64,
    /// 环境采样超时
    pub observe_timeout_ms: u64,
    /// 单条输入处理超时
    pub input_timeout_ms: u64,
    /// 每 N 个周期持久化一次；0 表示只在停止时持久化
    pub persist_every_cycles: u64,
}

impl Default for CycleSection {
    fn default() -> Self {
        Self {
            min_interval_ms: 100,
            observe_timeout_ms: 2_000,
            input_timeout_ms: 5_000,
            persist_every_cycles: 50,
        }
    }
}

impl CycleSection {
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            min_interval: Duration::from_millis(self.min_interval_ms),
            input_timeout: Duration::from_millis(self.input_timeout_ms),
            persist_every: self.persist_every_cycles,
        }
    }

    pub fn observe_timeout(&self) -> Duration {
        Duration::from_millis(self.observe_timeout_ms)
    }
}

/// [commands] 段：单次命令执行超时
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandsSection {
    pub handler_timeout_ms: u64,
}

impl Default for CommandsSection {
    fn default() -> Self {
        Self {
            handler_timeout_ms: 30_000,
        }
    }
}

impl CommandsSection {
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }
}

/// [memory] 段：短期记忆容量与任务历史容量
///
/// short_term_capacity 超过 100 时按 100 处理。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    pub short_term_capacity: usize,
    pub task_history_capacity: usize,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            short_term_capacity: 100,
            task_history_capacity: 50,
        }
    }
}

/// [persistence] 段：上下文快照文件
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceSection {
    pub enabled: bool,
    /// 相对路径基于 app.data_dir
    pub context_file: PathBuf,
}

impl Default for PersistenceSection {
    fn default() -> Self {
        Self {
            enabled: true,
            context_file: PathBuf::from("context.json"),
        }
    }
}

/// [http] 段：vader-http 监听地址
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    pub bind: String,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

impl AppConfig {
    /// 上下文快照的完整路径
    pub fn context_path(&self) -> PathBuf {
        if self.persistence.context_file.is_absolute() {
            self.persistence.context_file.clone()
        } else {
            self.app.data_dir.join(&self.persistence.context_file)
        }
    }
}

/// 从 config 目录加载配置，环境变量 VADER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 VADER__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "Config file not found, ignored");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("VADER")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 加载失败时回退到默认配置
pub fn load_config_or_default(config_path: Option<PathBuf>) -> AppConfig {
    match load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load config, using defaults");
            AppConfig::default()
        }
    }
}

/// 运行期可查看 / 修改的配置树（config 命令使用）
///
/// 修改只影响这棵树本身，已构建的组件不会被重新配置。
#[derive(Debug)]
pub struct RuntimeConfig {
    tree: RwLock<Value>,
}

impl RuntimeConfig {
    pub fn new(config: &AppConfig) -> Self {
        let tree = serde_json::to_value(config).unwrap_or_else(|_| Value::Object(Default::default()));
        Self {
            tree: RwLock::new(tree),
        }
    }

    /// 按点分路径读取子树；空路径返回整棵树
    pub fn get(&self, path: &str) -> Option<Value> {
        let tree = self.tree.read().unwrap_or_else(PoisonError::into_inner);
        let mut node = &*tree;
        for key in split_path(path) {
            node = node.as_object()?.get(key)?;
        }
        Some(node.clone())
    }

    /// 按点分路径写入，途中缺失或非对象的节点会被替换为空对象
    pub fn set(&self, path: &str, value: Value) -> bool {
        let keys: Vec<&str> = split_path(path).collect();
        let Some((last, parents)) = keys.split_last() else {
            return false;
        };
        let mut tree = self.tree.write().unwrap_or_else(PoisonError::into_inner);
        let mut node = &mut *tree;
        for key in parents {
            if !node.is_object() {
                *node = Value::Object(Default::default());
            }
            node = match node {
                Value::Object(map) => map
                    .entry(key.to_string())
                    .or_insert_with(|| Value::Object(Default::default())),
                _ => return false,
            };
        }
        if !node.is_object() {
            *node = Value::Object(Default::default());
        }
        match node {
            Value::Object(map) => {
                map.insert(last.to_string(), value);
                true
            }
            _ => false,
        }
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('.').filter(|s| !s.is_empty())
}
