use anyhow::Result;
use clap::{Parser, Subcommand};
use xshell::{Shell, cmd};

#[derive(Parser)]
#[command(name = "xtask", about = "vrble 开发任务自动化")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 构建 CLI (release)
    Build,
    /// 以指定日志级别拉取一次文件 (开发模式)
    Fetch {
        /// 日志级别 (trace, debug, info, warn, error)
        #[arg(short, long, default_value = "debug")]
        log_level: String,
        /// 保存目录
        #[arg(short, long, default_value = ".")]
        output: String,
    },
    /// 安装到 /usr/local/bin
    Install,
    /// 从 /usr/local/bin 卸载
    Uninstall,
    /// 设置 capabilities (免 sudo 扫描 BLE)
    SetupCaps,
    /// 运行测试
    Test,
    /// 清理构建产物
    Clean,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;

    // 确保在项目根目录执行
    let project_root = std::env::var("CARGO_MANIFEST_DIR")
        .map(std::path::PathBuf::from)
        .ok()
        .and_then(|p| p.parent().map(std::path::Path::to_path_buf));
    if let Some(root) = project_root {
        sh.change_dir(root);
    }

    match cli.command {
        Commands::Build => build(&sh)?,
        Commands::Fetch { log_level, output } => fetch(&sh, &log_level, &output)?,
        Commands::Install => install(&sh)?,
        Commands::Uninstall => uninstall(&sh)?,
        Commands::SetupCaps => setup_caps(&sh)?,
        Commands::Test => test(&sh)?,
        Commands::Clean => clean(&sh)?,
    }

    Ok(())
}

fn build(sh: &Shell) -> Result<()> {
    println!("🔨 构建 vrble...");
    cmd!(sh, "cargo build --release -p vrble-cli").run()?;
    println!("✅ 构建完成");
    Ok(())
}

fn fetch(sh: &Shell, log_level: &str, output: &str) -> Result<()> {
    println!("📥 拉取文件 (日志级别: {})...", log_level);

    let rust_log = format!("{log_level},vrble_core={log_level},btleplug=info");
    let _env = sh.push_env("RUST_LOG", rust_log);
    cmd!(sh, "cargo run -p vrble-cli -- fetch --output {output}").run()?;
    Ok(())
}

fn install(sh: &Shell) -> Result<()> {
    println!("📦 安装 vrble...");

    build(sh)?;
    cmd!(sh, "sudo cp target/release/vrble /usr/local/bin/").run()?;

    println!("✅ 安装完成");
    println!("   使用 'vrble --help' 查看命令");
    Ok(())
}

fn uninstall(sh: &Shell) -> Result<()> {
    println!("🗑️  卸载 vrble...");
    let _ = cmd!(sh, "sudo rm /usr/local/bin/vrble").run();
    println!("✅ 卸载完成");
    Ok(())
}

fn setup_caps(sh: &Shell) -> Result<()> {
    println!("🔐 设置 capabilities...");

    build(sh)?;

    // CAP_NET_ADMIN + CAP_NET_RAW: BlueZ 扫描与连接
    cmd!(
        sh,
        "sudo setcap 'cap_net_admin,cap_net_raw+eip' target/release/vrble"
    )
    .run()?;

    println!("✅ Capabilities 设置完成");
    Ok(())
}

fn test(sh: &Shell) -> Result<()> {
    println!("🧪 运行测试...");
    cmd!(sh, "cargo test --workspace").run()?;
    println!("✅ 测试完成");
    Ok(())
}

fn clean(sh: &Shell) -> Result<()> {
    println!("🧹 清理构建产物...");
    cmd!(sh, "cargo clean").run()?;
    println!("✅ 清理完成");
    Ok(())
}
