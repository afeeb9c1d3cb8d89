use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::info;

use pitwall::core::capture::GstFrameSource;
use pitwall::core::config::{Settings, DEFAULT_CONFIG_PATH};
use pitwall::core::store::SqliteStore;
use pitwall::runtime::{capture_once, normalize_pending, Pitwall};

#[derive(Parser)]
#[command(name = "pitwall", version, about = "Race timing screen capture and extraction pipeline")]
struct Cli {
    /// YAML 配置文件
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// 覆盖 logging.level
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// 启动采集、定时抓拍和推理监控，Ctrl-C 退出
    Run,
    /// 处理一遍 input 目录后退出
    ProcessOnce,
    /// 规范化所有未处理的入库记录
    Normalize,
    /// 抓一帧放进 input
    Capture,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;

    let level = cli.log_level.clone().unwrap_or_else(|| settings.log_level());
    pitwall::init_logging(&level);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&settings),
        Command::ProcessOnce => {
            let pitwall = Pitwall::from_settings(&settings)?;
            let report = pitwall.run_once()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Normalize => {
            let store = SqliteStore::open(&settings.database().path)?;
            let report = normalize_pending(&store)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Capture => {
            let camera = settings.camera()?;
            let capture = settings.capture()?;
            let source = GstFrameSource::new(camera.source.clone());
            let path = capture_once(&source, &camera.request(), &capture.dirs.input)?;
            println!("{}", path.display());
            Ok(())
        }
    }
}

fn run(settings: &Settings) -> anyhow::Result<()> {
    let pitwall = Pitwall::from_settings(settings)?;
    pitwall.start()?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;
    rt.block_on(tokio::signal::ctrl_c())
        .context("failed to listen for Ctrl-C")?;

    info!("Received Ctrl-C");
    pitwall.shutdown();
    Ok(())
}
