//! 统一配置中心
//!
//! 提供聊天组件消息引擎的配置管理，包括：
//! - 轮询节奏与退避参数
//! - 发送队列重试上限
//! - 同键请求的最小间隔
//! - HTTP 传输层地址与超时

use std::time::Duration;

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// 配置文件路径的环境变量
pub const CONFIG_FILE_ENV: &str = "CHAT_CONFIG_FILE";

/// 环境变量前缀，嵌套字段使用 `__` 分隔，例如 `CHAT_MESSAGING__BASE_INTERVAL_MS`
pub const ENV_PREFIX: &str = "CHAT_";

/// 全局应用配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// 消息引擎配置
    #[serde(default)]
    pub messaging: MessagingConfig,
    /// 传输层配置
    #[serde(default)]
    pub transport: TransportConfig,
}

/// 轮询、退避、重试与限流的可调参数（单位：毫秒）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// 健康状态下的轮询间隔
    pub base_interval_ms: u64,
    /// 退避上限
    pub max_interval_ms: u64,
    /// 每次连续失败后的间隔倍数
    pub backoff_factor: f64,
    /// 连续失败超过该次数后间隔不再增长
    pub error_threshold: u32,
    /// 出站消息丢弃前的最大重试次数
    pub max_retries: u32,
    /// 同一键两次传输调用之间的最小间隔
    pub min_spacing_ms: u64,
    /// 发送队列为空时的复查间隔
    pub idle_poll_ms: u64,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: 10_000,
            max_interval_ms: 600_000,
            backoff_factor: 1.5,
            error_threshold: 3,
            max_retries: 5,
            min_spacing_ms: 1_000,
            idle_poll_ms: 500,
        }
    }
}

impl MessagingConfig {
    pub fn base_interval(&self) -> Duration {
        Duration::from_millis(self.base_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    pub fn min_spacing(&self) -> Duration {
        Duration::from_millis(self.min_spacing_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_interval_ms == 0 {
            return Err(ConfigError::InvalidMessagingConfig(
                "base_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_interval_ms < self.base_interval_ms {
            return Err(ConfigError::InvalidMessagingConfig(
                "max_interval_ms must not be smaller than base_interval_ms".to_string(),
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ConfigError::InvalidMessagingConfig(
                "backoff_factor must be a finite number >= 1.0".to_string(),
            ));
        }
        if self.min_spacing_ms == 0 {
            return Err(ConfigError::InvalidMessagingConfig(
                "min_spacing_ms must be greater than 0".to_string(),
            ));
        }
        if self.idle_poll_ms == 0 {
            return Err(ConfigError::InvalidMessagingConfig(
                "idle_poll_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// HTTP 传输层配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// API 根地址，例如 `http://127.0.0.1:3000/api`
    pub base_url: String,
    /// 单次请求超时，超时按普通传输失败处理
    pub request_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000/api".to_string(),
            request_timeout_ms: 15_000,
        }
    }
}

impl TransportConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::InvalidTransportConfig(
                "base_url cannot be empty".to_string(),
            ));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidTransportConfig(format!(
                "base_url must be an http(s) url: {}",
                self.base_url
            )));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidTransportConfig(
                "request_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl AppConfig {
    /// 加载顺序：默认值 -> 可选配置文件（CHAT_CONFIG_FILE）-> 环境变量（CHAT_*）
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment())
    }

    /// 构造合并好各来源的 Figment，便于测试中替换来源
    pub fn figment() -> Figment {
        let mut fig = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            if path.ends_with(".yml") || path.ends_with(".yaml") {
                fig = fig.merge(Yaml::file(path));
            } else if path.ends_with(".json") {
                fig = fig.merge(Json::file(path));
            } else {
                fig = fig.merge(Toml::file(path));
            }
        }
        fig.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn from_figment(fig: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = fig
            .extract()
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.messaging.validate()?;
        self.transport.validate()
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(String),
    #[error("Invalid messaging configuration: {0}")]
    InvalidMessagingConfig(String),
    #[error("Invalid transport configuration: {0}")]
    InvalidTransportConfig(String),
}
