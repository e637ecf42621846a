//! # SDK 配置
//!
//! 从 TOML 加载控制器连接参数，并转换为 [`SessionBuilder`]。
//!
//! ```toml
//! controller = "192.168.1.18:8080"
//! udp_bind = "0.0.0.0:8089"
//! thread_mode = "triple"
//!
//! [timeouts]
//! request_ms = 500
//!
//! [realtime_push]
//! cycle_ms = 10
//! enable = true
//! port = 8089
//! force_frame = "sensor"
//! ip = "192.168.1.100"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rm_driver::{PipelineConfig, SessionBuilder, ThreadMode};
use rm_protocol::RealtimePushConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::DEFAULT_LOG_FILTER;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// 超时设置（毫秒）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub connect_ms: u64,
    pub request_ms: u64,
    pub join_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            connect_ms: 3000,
            request_ms: 1000,
            join_ms: 2000,
        }
    }
}

/// 接收管线时序（毫秒）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub receive_timeout_ms: u64,
    pub link_timeout_ms: u64,
    pub monitor_interval_ms: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        let defaults = PipelineConfig::default();
        Self {
            receive_timeout_ms: defaults.receive_timeout_ms,
            link_timeout_ms: defaults.link_timeout_ms,
            monitor_interval_ms: defaults.monitor_interval_ms,
        }
    }
}

impl From<&PipelineSettings> for PipelineConfig {
    fn from(settings: &PipelineSettings) -> Self {
        PipelineConfig {
            receive_timeout_ms: settings.receive_timeout_ms,
            link_timeout_ms: settings.link_timeout_ms,
            monitor_interval_ms: settings.monitor_interval_ms,
        }
    }
}

/// SDK 配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkConfig {
    /// 控制器地址（`host[:port]`）
    pub controller: String,
    /// 本地 UDP 广播接收地址
    pub udp_bind: Option<String>,
    pub thread_mode: ThreadMode,
    pub timeouts: TimeoutSettings,
    pub pipeline: PipelineSettings,
    /// 连接后下发的实时推送配置
    pub realtime_push: Option<RealtimePushConfig>,
    /// 默认日志过滤规则（`RUST_LOG` 优先）
    pub log_filter: String,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            controller: "192.168.1.18".to_string(),
            udp_bind: None,
            thread_mode: ThreadMode::default(),
            timeouts: TimeoutSettings::default(),
            pipeline: PipelineSettings::default(),
            realtime_push: None,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl SdkConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: SdkConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载配置
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.controller.trim().is_empty() {
            return Err(ConfigError::Invalid("controller address is empty".into()));
        }
        if self.pipeline.receive_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.receive_timeout_ms must be > 0".into(),
            ));
        }
        if self.pipeline.monitor_interval_ms == 0
            || self.pipeline.monitor_interval_ms >= self.pipeline.link_timeout_ms
        {
            return Err(ConfigError::Invalid(format!(
                "pipeline.monitor_interval_ms must be in 1..{}",
                self.pipeline.link_timeout_ms
            )));
        }
        if let Some(push) = &self.realtime_push {
            push.validate()
                .map_err(|e| ConfigError::Invalid(format!("realtime_push: {}", e)))?;
        }
        Ok(())
    }

    /// 转换为 [`SessionBuilder`]
    pub fn session_builder(&self) -> SessionBuilder {
        let mut builder = SessionBuilder::new()
            .controller(self.controller.clone())
            .thread_mode(self.thread_mode)
            .connect_timeout(Duration::from_millis(self.timeouts.connect_ms))
            .request_timeout(Duration::from_millis(self.timeouts.request_ms))
            .join_timeout(Duration::from_millis(self.timeouts.join_ms))
            .pipeline_config(PipelineConfig::from(&self.pipeline));
        if let Some(bind) = &self.udp_bind {
            builder = builder.udp_bind(bind.clone());
        }
        if let Some(push) = &self.realtime_push {
            builder = builder.realtime_push(push.clone());
        }
        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rm_protocol::ForceFrame;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = SdkConfig::from_toml_str("").unwrap();
        assert_eq!(config, SdkConfig::default());

        let builder = config.session_builder();
        assert_eq!(builder.get_thread_mode(), ThreadMode::Dual);
        assert_eq!(
            builder.session_config(),
            &rm_driver::SessionConfig::default()
        );
    }

    #[test]
    fn test_full_document() {
        let config = SdkConfig::from_toml_str(
            r#"
controller = "10.0.0.5:8080"
udp_bind = "0.0.0.0:8089"
thread_mode = "triple"
log_filter = "rm_driver=debug"

[timeouts]
request_ms = 250

[pipeline]
link_timeout_ms = 2000

[realtime_push]
cycle_ms = 10
enable = true
port = 8089
force_frame = "work"
ip = "10.0.0.2"
"#,
        )
        .unwrap();

        assert_eq!(config.thread_mode, ThreadMode::Triple);
        assert_eq!(config.timeouts.request_ms, 250);
        assert_eq!(config.timeouts.join_ms, 2000);
        assert_eq!(config.pipeline.link_timeout_ms, 2000);
        assert_eq!(config.pipeline.receive_timeout_ms, 2);
        let push = config.realtime_push.as_ref().unwrap();
        assert_eq!(push.force_frame, ForceFrame::Work);

        let builder = config.session_builder();
        assert_eq!(
            builder.session_config().request_timeout,
            Duration::from_millis(250)
        );
        assert_eq!(builder.session_config().pipeline.link_timeout_ms, 2000);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            SdkConfig::from_toml_str("controller = \"\""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SdkConfig::from_toml_str("thread_mode = \"quad\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            SdkConfig::from_toml_str(
                "[realtime_push]\ncycle_ms = 7\nenable = true\nport = 1\nforce_frame = \"sensor\"\nip = \"1.2.3.4\""
            ),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SdkConfig::from_toml_str("[pipeline]\nmonitor_interval_ms = 600"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = SdkConfig::load("/nonexistent/rm-sdk.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
