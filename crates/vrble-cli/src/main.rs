//! vrble CLI
//!
//! 通过 BLE 从 Quest 3 拉取文件

mod console;

use anyhow::Result;
use clap::builder::RangedU64ValueParser;
use clap::{Args, Parser, Subcommand};
use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use vrble_core::transfer::send_command;
use vrble_core::{
    BleClient, BleScanner, ControlCommand, FetchOptions, FetchOutcome, FetchSettings, Fetcher,
    GattLink, Monitor, MonitorOptions, Radio,
};

use console::ConsoleCallback;

#[derive(Parser)]
#[command(name = "vrble", version, about = "VR BLE 文件传输 - Quest 3 客户端")]
struct Cli {
    /// 配置文件路径 (默认: ~/.config/vrble/settings.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// 输出调试日志
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Default)]
struct TargetArgs {
    /// 设备名称片段
    #[arg(short, long)]
    name: Option<String>,
    /// 设备地址或外设标识
    #[arg(short, long)]
    address: Option<String>,
    /// 扫描超时时间 (秒)
    #[arg(short, long)]
    timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// 拉取一次文件
    Fetch {
        #[command(flatten)]
        target: TargetArgs,
        /// 保存目录
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// 持续监听，收到后继续等待下一次
    Watch {
        #[command(flatten)]
        target: TargetArgs,
        /// 保存目录
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// 两次拉取的间隔 (秒)
        #[arg(short, long)]
        interval: Option<u64>,
        /// 最多尝试次数
        #[arg(long, value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
        max_attempts: Option<usize>,
    },
    /// 扫描附近设备
    Scan {
        /// 扫描超时时间 (秒)
        #[arg(short, long, default_value = "5")]
        timeout: u64,
    },
    /// 让外设重置传输状态并卸载文件
    Reset {
        #[command(flatten)]
        target: TargetArgs,
    },
}

/// 进程退出码
mod exit {
    pub const FAILURE: u8 = 1;
    pub const NOT_FOUND: u8 = 2;
    pub const PARTIAL: u8 = 3;
    /// 128 + SIGINT
    pub const INTERRUPTED: u8 = 130;
}

/// 中断后等待连接释放的最长时间
const RELEASE_GRACE: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("❌ {:#}", e);
            ExitCode::from(exit::FAILURE)
        }
    }
}

fn init_logging(verbose: bool) {
    // 桥接 log crate（vrble-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    let default_filter = if verbose {
        "debug"
    } else {
        "info,vrble_core=info"
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .try_init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut settings = match &cli.config {
        Some(path) => FetchSettings::load_from(path),
        None => FetchSettings::load(),
    };

    match cli.command {
        Commands::Fetch { target, output } => {
            apply_overrides(&mut settings, &target, output);
            print_banner();

            let fetcher = Fetcher::new(radio(&settings).await?, FetchOptions::from(&settings));
            let fetch = fetcher.run_once(&ConsoleCallback);
            let Some(result) = until_interrupted(fetch, ctrl_c_or_never()).await else {
                println!("\n⏹️  已中断，正在断开连接...");
                fetcher.radio().wait_released(RELEASE_GRACE).await;
                return Ok(ExitCode::from(exit::INTERRUPTED));
            };
            match result {
                Ok(FetchOutcome::Received(report)) if report.is_complete() => Ok(ExitCode::SUCCESS),
                Ok(FetchOutcome::Received(_)) => Ok(ExitCode::from(exit::PARTIAL)),
                Ok(FetchOutcome::DeviceNotFound) => {
                    print_not_found_hint();
                    Ok(ExitCode::from(exit::NOT_FOUND))
                }
                // 错误已由回调输出
                Err(_) => Ok(ExitCode::from(exit::FAILURE)),
            }
        }
        Commands::Watch {
            target,
            output,
            interval,
            max_attempts,
        } => {
            apply_overrides(&mut settings, &target, output);
            if let Some(secs) = interval {
                settings.monitor_interval_secs = secs;
            }
            print_banner();

            let fetcher = Fetcher::new(radio(&settings).await?, FetchOptions::from(&settings));
            let monitor = Monitor::new(MonitorOptions {
                max_attempts,
                ..MonitorOptions::from(&settings)
            });

            let cancel = CancellationToken::new();
            // 第一次 Ctrl-C 等本次尝试结束，第二次立即放弃
            let interrupt = escalate(tokio::signal::ctrl_c, &cancel);
            let watch = monitor.run(&fetcher, &ConsoleCallback, cancel.clone());
            let Some(summary) = until_interrupted(watch, interrupt).await else {
                println!("\n⏹️  已放弃本次尝试，正在断开连接...");
                fetcher.radio().wait_released(RELEASE_GRACE).await;
                return Ok(ExitCode::from(exit::INTERRUPTED));
            };
            println!(
                "监听已停止: 尝试 {} 次，完整 {}，不完整 {}，未找到 {}，失败 {}",
                summary.attempts,
                summary.received,
                summary.partial,
                summary.not_found,
                summary.failures
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Scan { timeout } => {
            println!("🔍 扫描设备 ({}s)...", timeout);
            let scanner = BleScanner::new().await?;
            let devices = scanner.list(Duration::from_secs(timeout)).await?;
            if devices.is_empty() {
                println!("   未发现设备");
            } else {
                let filter = settings.device_filter();
                for (i, dev) in devices.iter().enumerate() {
                    let marker = if filter.matches(dev) { "★" } else { " " };
                    println!(
                        "   [{}]{} {} ({}) rssi={:?}",
                        i,
                        marker,
                        dev.display_name(),
                        dev.address,
                        dev.rssi
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Reset { target } => {
            apply_overrides(&mut settings, &target, None);

            let client = radio(&settings).await?;
            let Some(device) = client
                .discover(&settings.device_filter(), settings.scan_timeout())
                .await?
            else {
                print_not_found_hint();
                return Ok(ExitCode::from(exit::NOT_FOUND));
            };

            println!("🔗 连接到 {}...", device.address);
            let link = client.connect(&device).await?;
            let result = send_command(&link, ControlCommand::Reset).await;
            link.disconnect().await?;
            result?;

            println!("✅ 已发送 RESET");
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// 在 `interrupt` 先完成时丢弃 `work` 并返回 `None`
///
/// `work` 持有的 link 随之被丢弃，由其 `Drop` 补发断开。
async fn until_interrupted<F, I>(work: F, interrupt: I) -> Option<F::Output>
where
    F: Future,
    I: Future<Output = ()>,
{
    tokio::select! {
        output = work => Some(output),
        () = interrupt => None,
    }
}

async fn ctrl_c_or_never() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// 第一次信号取消 `cancel`，第二次信号时完成
///
/// 信号监听注册失败时永不完成。
async fn escalate<S, Fut>(mut next_signal: S, cancel: &CancellationToken)
where
    S: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if next_signal().await.is_err() {
        return std::future::pending().await;
    }
    println!("\n⏹️  将在本次尝试结束后停止监听 (再按一次 Ctrl-C 立即退出)");
    cancel.cancel();

    if next_signal().await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn radio(settings: &FetchSettings) -> Result<BleClient> {
    Ok(BleClient::new()
        .await?
        .with_io_timeout(settings.io_timeout()))
}

fn apply_overrides(settings: &mut FetchSettings, target: &TargetArgs, output: Option<PathBuf>) {
    // 命令行指定了任一条件时，只按命令行筛选
    if target.name.is_some() || target.address.is_some() {
        settings.device_name.clone_from(&target.name);
        settings.device_address.clone_from(&target.address);
    }
    if let Some(secs) = target.timeout {
        settings.scan_timeout_secs = secs;
    }
    if let Some(dir) = output {
        settings.output_dir = dir;
    }
}

fn print_banner() {
    println!("VR BLE File Transfer - Quest 3 Client");
    println!("{}", "=".repeat(50));
    println!("\n请确认 Quest 3 上的应用:");
    println!("  ✓ BLE Server 已启动");
    println!("  ✓ 文件已加载");
    println!("{}\n", "=".repeat(50));
}

fn print_not_found_hint() {
    println!("✗ 未找到 Quest 3 设备，请确认:");
    println!("  1. Quest 3 已通过 USB 和 ADB 连接");
    println!("  2. 应用中的 BLE Server 正在运行");
    println!("  3. 文件已加载");
}
