use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use pi_stats_monitor::config::{DEFAULT_SETTINGS_PATH, Settings};
use pi_stats_monitor::{StatusServer, SystemPlatform};
use std::path::PathBuf;

/// 主机指标采样与分级显示服务
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 设置文件路径
    #[arg(short, long, default_value = DEFAULT_SETTINGS_PATH)]
    config: PathBuf,

    /// 服务器绑定地址（覆盖设置文件中的 Server.host）
    #[arg(short, long)]
    address: Option<String>,

    /// 服务器端口（覆盖设置文件中的 Server.port）
    #[arg(short, long)]
    port: Option<u16>,

    /// 日志级别 (trace, debug, info, warn, error)，默认 info，Server.debug 为 true 时为 debug
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 先读设置，日志级别取决于 Server.debug
    let mut settings = Settings::load(&args.config)
        .with_context(|| format!("启动失败，请检查 {}", args.config.display()))?;

    let default_level = if settings.server.debug { "debug" } else { "info" };
    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| default_level.to_string());
    init_logger(&level);

    info!("主机状态服务启动中...");

    // 命令行参数优先
    if let Some(address) = args.address {
        settings.server.host = address;
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }

    let addr = settings.server.address()?;
    info!(
        "配置信息 - 设置文件: {}, 地址: {addr}, 外置磁盘: {}, 网络接口: {}, 命令超时: {} 毫秒",
        args.config.display(),
        settings.server.external_hdd_path,
        settings.server.network_interface,
        settings.server.command_timeout_ms
    );

    // 超时只在启动时确定
    let platform = SystemPlatform::new(settings.server.command_timeout());
    let server = StatusServer::new(platform, args.config);
    info!("服务器实例创建完成");

    server.run(addr).await?;

    info!("服务器正常关闭");

    Ok(())
}

/// 初始化日志系统
fn init_logger(level: &str) {
    match env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .try_init()
    {
        Ok(_) => info!("日志系统初始化成功，级别: {level}"),
        Err(e) => eprintln!("日志系统初始化失败: {e}"),
    }
}
