// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

/// API Key 环境变量（优先于配置文件）
pub const API_KEY_ENV: &str = "CLOUD_UPLOAD_API_KEY";

/// 默认上传服务地址
pub const DEFAULT_BASE_URL: &str = "https://upload.filestackapi.com";

/// 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// API Key
    #[serde(default)]
    pub api_key: String,
    /// 上传服务地址
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// 安全策略（预先签好的 policy + signature）
    #[serde(default)]
    pub security: Option<SecurityConfig>,
    /// 上传配置
    #[serde(default)]
    pub upload: UploadConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            security: None,
            upload: UploadConfig::default(),
            log: LogConfig::default(),
        }
    }
}

/// 安全策略
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// base64 编码的策略
    pub policy: String,
    /// 策略签名
    pub signature: String,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 单个日志文件最大大小（字节，默认 50MB）
    #[serde(default = "default_log_max_file_size")]
    pub max_file_size: u64,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_file_size() -> u64 {
    50 * 1024 * 1024 // 50MB
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
            max_file_size: default_log_max_file_size(),
        }
    }
}

/// 上传配置
///
/// 并发与退避参数都从这里显式传给上传引擎
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// 单个文件的并发分片数（固定大小的工作池）
    pub concurrency: usize,
    /// 普通模式分片大小（字节）
    pub regular_part_size: u64,
    /// 智能模式分片大小（字节）
    pub intelligent_part_size: u64,
    /// 智能模式拆分后的最小分片大小（字节）
    pub min_part_size: u64,
    /// 单个分片最多拆分代数
    pub max_split_generations: u32,
    /// 分片最大重试次数（总尝试次数 = max_retries + 1）
    pub max_retries: u32,
    /// complete 最大重试次数
    pub complete_max_retries: u32,
    /// 初始退避延迟（毫秒）
    pub initial_backoff_ms: u64,
    /// 最大退避延迟（毫秒）
    pub max_backoff_ms: u64,
    /// 限流时的最小等待时间（毫秒）
    pub rate_limit_backoff_ms: u64,
    /// 分片数据随 upload 请求发送，由服务端代理写入
    pub proxy_parts: bool,
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            regular_part_size: 5 * 1024 * 1024,
            intelligent_part_size: 4 * 1024 * 1024,
            min_part_size: 32 * 1024,
            max_split_generations: 2,
            max_retries: 3,
            complete_max_retries: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 5000,
            rate_limit_backoff_ms: 10000,
            proxy_parts: false,
            request_timeout_secs: 60,
        }
    }
}

impl UploadConfig {
    /// 校验配置
    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency == 0 {
            return Err("concurrency 必须大于 0".to_string());
        }
        if self.regular_part_size == 0 || self.intelligent_part_size == 0 {
            return Err("分片大小必须大于 0".to_string());
        }
        if self.min_part_size == 0 || self.min_part_size > self.intelligent_part_size {
            return Err(format!(
                "min_part_size ({}) 必须在 1 到 intelligent_part_size ({}) 之间",
                self.min_part_size, self.intelligent_part_size
            ));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err("initial_backoff_ms 不能大于 max_backoff_ms".to_string());
        }
        Ok(())
    }
}

impl ClientConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let mut config: ClientConfig =
            toml::from_str(&content).context("Failed to parse config file")?;
        config.apply_env();

        config
            .upload
            .validate()
            .map_err(|e| anyhow::anyhow!(e))
            .context("配置文件中的上传配置验证失败")?;

        Ok(config)
    }

    /// 加载或创建默认配置
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {:#}", e);
                let mut config = Self::default();
                config.apply_env();
                config
            }
        }
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = std::path::Path::new(path).parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {}", path);
        Ok(())
    }

    /// 环境变量覆盖
    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.is_empty() {
                self.api_key = key;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_upload_config() {
        let config = UploadConfig::default();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.regular_part_size, 5 * 1024 * 1024);
        assert_eq!(config.intelligent_part_size, 4 * 1024 * 1024);
        assert!(config.intelligent_part_size < config.regular_part_size);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = UploadConfig::default();
        config.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = UploadConfig::default();
        config.min_part_size = config.intelligent_part_size + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_partial_toml() {
        let content = r#"
            api_key = "abc"

            [security]
            policy = "eyJ"
            signature = "f00"

            [upload]
            concurrency = 8
            proxy_parts = true
        "#;
        let config: ClientConfig = toml::from_str(content).unwrap();
        assert_eq!(config.api_key, "abc");
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.upload.concurrency, 8);
        assert!(config.upload.proxy_parts);
        assert_eq!(config.upload.max_retries, 3);
        assert_eq!(config.security.unwrap().signature, "f00");
        assert_eq!(config.log.level, "info");
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/app.toml");
        let path = path.to_str().unwrap();

        let mut config = ClientConfig::default();
        config.api_key = "saved-key".to_string();
        config.upload.max_split_generations = 3;
        config.save_to_file(path).await.unwrap();

        let loaded = ClientConfig::load_from_file(path).await.unwrap();
        assert_eq!(loaded.upload.max_split_generations, 3);
        assert!(!loaded.api_key.is_empty());
    }

    #[tokio::test]
    async fn test_load_or_default_missing_file() {
        let config = ClientConfig::load_or_default("/nonexistent/app.toml").await;
        assert_eq!(config.upload.concurrency, 4);
    }
}
