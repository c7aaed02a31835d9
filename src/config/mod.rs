//! # 配置管理模块
//!
//! 处理配置加载、环境变量覆盖和验证。
//!
//! 查找顺序：`CHAT_INTERCEPT_CONFIG_PATH` 指定的文件，其次是
//! `config/config.{RUST_ENV}.toml`（`RUST_ENV` 缺省为 `dev`）。
//! 默认路径下没有文件时使用内置默认值。

mod app_config;

pub use app_config::{AppConfig, InterceptorConfig, LoggingConfig};

use std::env;
use std::path::{Path, PathBuf};

use crate::endpoint::EndpointPatternTable;
use crate::ensure_config;
use crate::error::{Context, InterceptError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::{linfo, lwarn};

/// 配置文件路径环境变量
pub const CONFIG_PATH_ENV: &str = "CHAT_INTERCEPT_CONFIG_PATH";
/// 空闲超时覆盖
pub const IDLE_TIMEOUT_ENV: &str = "CHAT_INTERCEPT_IDLE_TIMEOUT_SECS";
/// 日志级别覆盖
pub const LOG_LEVEL_ENV: &str = "CHAT_INTERCEPT_LOG_LEVEL";

/// 默认配置文件路径
#[must_use]
pub fn default_config_path() -> PathBuf {
    let env = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
    PathBuf::from(format!("config/config.{env}.toml"))
}

/// 加载配置
pub fn load_config() -> Result<AppConfig> {
    let mut config = match env::var(CONFIG_PATH_ENV) {
        Ok(path) => load_config_from(Path::new(&path))?,
        Err(_) => {
            let path = default_config_path();
            if path.exists() {
                load_config_from(&path)?
            } else {
                linfo!(
                    "system",
                    LogStage::Startup,
                    LogComponent::Config,
                    "default_config",
                    "未找到配置文件，使用默认配置",
                    path = %path.display()
                );
                AppConfig::default()
            }
        }
    };

    apply_env_overrides(&mut config, |key| env::var(key).ok())?;
    validate_config(&config)?;
    Ok(config)
}

/// 从指定文件加载（不做环境变量覆盖）
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Err(InterceptError::config(format!(
            "配置文件不存在: {}",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        InterceptError::config_with_source(format!("读取配置文件失败: {}", path.display()), e)
    })?;
    let config = parse_config(&content)
        .with_context(|| format!("配置文件无效: {}", path.display()))?;

    linfo!(
        "system",
        LogStage::Startup,
        LogComponent::Config,
        "config_loaded",
        "配置文件加载完成",
        path = %path.display()
    );
    Ok(config)
}

/// 解析 TOML 配置文本
pub fn parse_config(content: &str) -> Result<AppConfig> {
    let config: AppConfig = toml::from_str(content)?;
    Ok(config)
}

/// 应用环境变量覆盖；`lookup` 便于测试注入
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(IDLE_TIMEOUT_ENV) {
        config.interceptor.idle_timeout_secs = raw.trim().parse().map_err(|e| {
            InterceptError::config_with_source(format!("{IDLE_TIMEOUT_ENV} 不是合法整数: {raw}"), e)
        })?;
    }
    if let Some(level) = lookup(LOG_LEVEL_ENV)
        && !level.trim().is_empty()
    {
        config.logging.level = level.trim().to_string();
    }
    Ok(())
}

/// 验证配置有效性
pub fn validate_config(config: &AppConfig) -> Result<()> {
    ensure_config!(
        config.interceptor.idle_timeout_secs > 0,
        "空闲超时必须大于0"
    );
    ensure_config!(
        config.interceptor.max_capture_bytes > 0,
        "最大捕获字节数必须大于0"
    );
    if let Some(page_url) = &config.interceptor.page_url {
        url::Url::parse(page_url).map_err(|e| {
            InterceptError::config_with_source(format!("无效的页面地址: {page_url}"), e)
        })?;
    }
    if let Some(rules) = &config.patterns {
        ensure_config!(!rules.is_empty(), "自定义端点规则不能为空");
        EndpointPatternTable::from_rules(rules)?;
    }
    Ok(())
}

/// 根据配置构建端点模式表
pub fn build_pattern_table(config: &AppConfig) -> Result<EndpointPatternTable> {
    match &config.patterns {
        Some(rules) => EndpointPatternTable::from_rules(rules),
        None => Ok(EndpointPatternTable::builtin()),
    }
}

/// 校验配置文件并打印结果，供命令行使用
pub fn check_config_file(path: &Path) -> Result<AppConfig> {
    let config = load_config_from(path)?;
    if let Err(e) = validate_config(&config) {
        lwarn!(
            "system",
            LogStage::Startup,
            LogComponent::Config,
            "invalid_config",
            "配置校验失败",
            error = %e
        );
        return Err(e);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::EndpointKind;
    use crate::platform::Platform;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn empty_file_yields_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.interceptor.idle_timeout_secs, 120);
        assert_eq!(config.logging.level, "info");
        assert!(config.patterns.is_none());
        validate_config(&config).unwrap();
    }

    #[test]
    fn custom_patterns_keep_file_order() {
        let config = parse_config(
            r#"
[[patterns]]
platform = "chatgpt"
endpoint = "conversationList"
pattern = "/conversation"

[[patterns]]
platform = "chatgpt"
endpoint = "specificConversation"
pattern = "/conversation/"
"#,
        )
        .unwrap();
        validate_config(&config).unwrap();

        let table = build_pattern_table(&config).unwrap();
        assert_eq!(
            table.classify_endpoint("https://chatgpt.com/backend-api/conversation/abc", Platform::ChatGpt),
            Some(EndpointKind::ConversationList)
        );
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let mut config = AppConfig::default();
        let vars: HashMap<&str, &str> =
            HashMap::from([(IDLE_TIMEOUT_ENV, "30"), (LOG_LEVEL_ENV, "debug")]);
        apply_env_overrides(&mut config, |k| vars.get(k).map(ToString::to_string)).unwrap();

        assert_eq!(config.interceptor.idle_timeout_secs, 30);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn invalid_override_is_a_config_error() {
        let mut config = AppConfig::default();
        let err = apply_env_overrides(&mut config, |k| {
            (k == IDLE_TIMEOUT_ENV).then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, InterceptError::Config { .. }));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut config = AppConfig::default();
        config.interceptor.idle_timeout_secs = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn loads_from_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[interceptor]\npage_url = \"https://claude.ai/\"\nidle_timeout_secs = 5").unwrap();

        let config = check_config_file(file.path()).unwrap();
        assert_eq!(config.interceptor.idle_timeout_secs, 5);
        assert_eq!(config.interceptor.page_url.as_deref(), Some("https://claude.ai/"));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        assert!(load_config_from(Path::new("/nonexistent/config.toml")).is_err());
    }
}
