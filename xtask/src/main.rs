use anyhow::Result;
use clap::{Parser, Subcommand};
use xshell::{Shell, cmd};

#[derive(Parser)]
#[command(name = "xtask", about = "NearDrop 开发任务自动化")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 构建所有组件 (release)
    Build,
    /// 运行守护进程 (开发模式)
    Dev {
        /// 日志级别 (trace, debug, info, warn, error)
        #[arg(short, long, default_value = "debug")]
        log_level: String,
    },
    /// 打包发布 (tar.gz)
    Dist,
    /// 运行测试
    Test,
    /// 运行测试并生成覆盖率报告
    Coverage,
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
        .and_then(|p| p.parent().map(|p| p.to_path_buf()));
    let project_root = match project_root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    sh.change_dir(&project_root);

    match cli.command {
        Commands::Build => build(&sh)?,
        Commands::Dev { log_level } => dev(&sh, &log_level)?,
        Commands::Dist => dist(&sh)?,
        Commands::Test => test(&sh)?,
        Commands::Coverage => coverage(&sh)?,
        Commands::Clean => clean(&sh)?,
    }

    Ok(())
}

fn build(sh: &Shell) -> Result<()> {
    println!("🔨 构建所有组件...");
    cmd!(sh, "cargo build --release -p neardrop-daemon -p neardrop-cli").run()?;
    println!("✅ 构建完成");
    Ok(())
}

fn dev(sh: &Shell, log_level: &str) -> Result<()> {
    println!("🚀 启动开发模式守护进程...");
    let rust_log = format!("{level},neardrop_core={level},mdns_sd=warn", level = log_level);
    let _env = sh.push_env("RUST_LOG", rust_log);
    cmd!(sh, "cargo run -p neardrop-daemon").run()?;
    Ok(())
}

fn dist(sh: &Shell) -> Result<()> {
    println!("📦 打包发布...");

    build(sh)?;

    let version = env!("CARGO_PKG_VERSION");
    let arch = std::env::consts::ARCH;
    let dist_name = format!("neardrop-{version}-linux-{arch}");

    cmd!(sh, "mkdir -p dist/{dist_name}").run()?;
    cmd!(sh, "cp target/release/neardrop-daemon dist/{dist_name}/").run()?;
    cmd!(sh, "cp target/release/neardrop dist/{dist_name}/").run()?;
    if sh.path_exists("README.md") {
        cmd!(sh, "cp README.md dist/{dist_name}/").run()?;
    }

    sh.change_dir("dist");
    cmd!(sh, "tar -czvf {dist_name}.tar.gz {dist_name}").run()?;

    println!("✅ 打包完成: dist/{}.tar.gz", dist_name);
    Ok(())
}

fn test(sh: &Shell) -> Result<()> {
    println!("🧪 运行测试...");
    cmd!(sh, "cargo test --workspace").run()?;
    println!("✅ 测试完成");
    Ok(())
}

fn coverage(sh: &Shell) -> Result<()> {
    println!("📊 运行测试覆盖率分析...");

    // 检查 cargo-tarpaulin 是否安装
    if cmd!(sh, "cargo tarpaulin --version").run().is_err() {
        println!("📦 安装 cargo-tarpaulin...");
        cmd!(sh, "cargo install cargo-tarpaulin").run()?;
    }

    println!("🔍 分析中...");
    cmd!(
        sh,
        "cargo tarpaulin --packages neardrop-core --out Html --output-dir target/coverage"
    )
    .run()?;

    println!("✅ 覆盖率报告已生成");
    println!("   HTML 报告: target/coverage/tarpaulin-report.html");
    Ok(())
}

fn clean(sh: &Shell) -> Result<()> {
    println!("🧹 清理构建产物...");
    cmd!(sh, "cargo clean").run()?;
    sh.remove_path("dist")?;
    println!("✅ 清理完成");
    Ok(())
}
