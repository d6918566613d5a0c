use anyhow::{Context, Result};
use essay_workflow::utils::logging;
use essay_workflow::{App, Config};
use std::path::PathBuf;

const DEFAULT_CONFIG_FILE: &str = "essay_workflow.toml";

/// 用法: essay-workflow [--config <file>] [topic ...]
#[tokio::main]
async fn main() -> Result<()> {
    let mut config_path: Option<PathBuf> = None;
    let mut topics = Vec::new();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" || arg == "-c" {
            let path = args.next().context("--config 需要一个文件路径")?;
            config_path = Some(PathBuf::from(path));
        } else {
            topics.push(arg);
        }
    }

    // 未指定配置文件时，当前目录下存在默认文件就读取
    if config_path.is_none() {
        let default = PathBuf::from(DEFAULT_CONFIG_FILE);
        if default.exists() {
            config_path = Some(default);
        }
    }

    // 加载配置
    let config = Config::load(config_path.as_deref()).context("加载配置失败")?;

    // 初始化日志
    logging::init(config.verbose_logging);

    if topics.is_empty() {
        topics = config.topics.clone();
    }

    // 初始化并运行应用
    let stats = App::initialize(config)?.run(topics).await?;

    if stats.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
