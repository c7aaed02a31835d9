//! # Chat Intercept 命令行
//!
//! - `classify`：对 URL 做端点分类
//! - `replay`：把抓取到的 SSE 响应体重放进流式处理器，输出重建的消息
//! - `fetch`：通过拦截器发起真实请求，输出产生的拦截事件

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use http::Method;

use chat_intercept::{
    InterceptError, InterceptEvent, InterceptSession, Result,
    config::{self, AppConfig},
    endpoint::conversation_id_from_url,
    handlers::Collaborators,
    interceptor::{Fetch, FetchRequest, ReqwestFetch},
    lerror, linfo,
    logging::{self, LogComponent, LogStage},
    monitor::ListenerFilter,
    platform::{Platform, detect_platform_str},
    streaming::{StreamDialect, StreamingDeltaProcessor},
};

#[derive(Parser)]
#[command(name = "chat-intercept")]
#[command(about = "AI chat network interception and streaming reconstruction")]
#[command(version)]
struct Cli {
    /// 配置文件路径（覆盖 CHAT_INTERCEPT_CONFIG_PATH）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 对 URL 做端点分类
    Classify {
        url: String,
        /// 平台；缺省时按 URL 判断
        #[arg(long)]
        platform: Option<String>,
    },
    /// 重放 SSE 响应体并输出重建的消息
    Replay {
        file: PathBuf,
        #[arg(long)]
        platform: String,
        /// 会话 ID（Claude 的流里不带）
        #[arg(long)]
        conversation_id: Option<String>,
        /// 请求 URL，用于提取会话 ID
        #[arg(long)]
        url: Option<String>,
    },
    /// 通过拦截器发起请求并输出拦截事件
    Fetch {
        url: String,
        #[arg(long, default_value = "GET")]
        method: String,
        /// JSON 请求体
        #[arg(long)]
        body: Option<String>,
    },
    /// 打印日志配置说明
    LoggingHelp,
}

fn load(cli_path: Option<&Path>) -> Result<AppConfig> {
    match cli_path {
        Some(path) => {
            let mut config = config::load_config_from(path)?;
            config::apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
            config::validate_config(&config)?;
            Ok(config)
        }
        None => config::load_config(),
    }
}

fn parse_platform(raw: &str) -> Result<Platform> {
    match Platform::from_name(raw) {
        Platform::Unknown => Err(InterceptError::config(format!("不支持的平台: {raw}"))),
        platform => Ok(platform),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn classify(config: &AppConfig, url: &str, platform: Option<&str>) -> Result<()> {
    let table = config::build_pattern_table(config)?;
    let platform = match platform {
        Some(raw) => parse_platform(raw)?,
        None => detect_platform_str(url),
    };
    let endpoint = table.classify_endpoint(url, platform);
    print_json(&serde_json::json!({
        "url": url,
        "platform": platform,
        "endpoint": endpoint,
        "conversationId": conversation_id_from_url(url, platform),
    }))
}

async fn replay(
    file: &Path,
    platform: &str,
    conversation_id: Option<String>,
    url: Option<&str>,
) -> Result<()> {
    let platform = parse_platform(platform)?;
    let dialect = StreamDialect::for_platform(platform)
        .ok_or_else(|| InterceptError::config(format!("平台没有流格式: {platform}")))?;
    let body = tokio::fs::read(file).await?;

    let hint = conversation_id.or_else(|| url.and_then(|u| conversation_id_from_url(u, platform)));
    let mut processor = StreamingDeltaProcessor::new(dialect)
        .with_conversation_hint(hint)
        .with_correlation_id("replay");
    processor.feed(&body);
    processor.finish();

    let stats = processor.stats();
    linfo!(
        "replay",
        LogStage::Streaming,
        LogComponent::Main,
        "replay_done",
        "重放完成",
        frames = stats.frames,
        applied = stats.applied,
        malformed = stats.malformed
    );
    print_json(&processor.take_messages())
}

async fn fetch(config: AppConfig, url: String, method: &str, body: Option<String>) -> Result<()> {
    let session = Arc::new(InterceptSession::new(config, &Collaborators::logging())?);
    session.monitor().add_listener(
        ListenerFilter::Any,
        Arc::new(|event: &InterceptEvent| {
            if let Ok(json) = serde_json::to_string_pretty(event) {
                println!("{json}");
            }
        }),
    );

    let running = Arc::clone(&session);
    let handle = tokio::spawn(async move { running.run().await });

    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|e| InterceptError::config_with_source(format!("无效的请求方法: {method}"), e))?;
    let mut request = FetchRequest::new(method, url);
    if let Some(body) = body {
        let value: serde_json::Value = serde_json::from_str(&body)?;
        request = FetchRequest {
            method: request.method,
            ..FetchRequest::post_json(request.url, &value)
        };
    }

    let fetcher = session.install(ReqwestFetch::default());
    let outcome = match fetcher.fetch(request).await {
        Ok(response) => {
            let status = response.status;
            response
                .body
                .bytes()
                .await
                .map(|bytes| (status, bytes.len()))
                .map_err(|e| InterceptError::network_with_source("读取响应体失败", e))
        }
        Err(e) => Err(InterceptError::network_with_source("请求失败", e)),
    };

    session.shutdown();
    handle
        .await
        .map_err(|e| InterceptError::internal_with_source("事件处理任务异常退出", e))??;

    let (status, size) = outcome?;
    linfo!(
        "cli",
        LogStage::Response,
        LogComponent::Fetch,
        "fetch_done",
        "请求完成",
        status = status,
        bytes = size
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match &cli.command {
        Commands::LoggingHelp => {
            logging::print_logging_help();
            return;
        }
        _ => load(cli.config.as_deref()),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            logging::init_optimized_logging(None);
            lerror!(
                "system",
                LogStage::Startup,
                LogComponent::Config,
                "config_failed",
                "配置加载失败",
                error = %e
            );
            std::process::exit(2);
        }
    };
    logging::init_optimized_logging(Some(&config.logging.level));

    let result = match cli.command {
        Commands::Classify { url, platform } => classify(&config, &url, platform.as_deref()),
        Commands::Replay {
            file,
            platform,
            conversation_id,
            url,
        } => replay(&file, &platform, conversation_id, url.as_deref()).await,
        Commands::Fetch { url, method, body } => fetch(config, url, &method, body).await,
        Commands::LoggingHelp => Ok(()),
    };

    if let Err(e) = result {
        lerror!(
            "system",
            LogStage::Error,
            LogComponent::Main,
            "command_failed",
            "命令执行失败",
            category = ?e.category(),
            error = %e
        );
        std::process::exit(1);
    }
}
