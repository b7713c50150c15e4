//! 可观测性：tracing 日志初始化
//!
//! stderr 输出一份；配置了日志目录时，另写一份无 ANSI 颜色的 `run_YYYYMMDD_HHMMSS.log`。

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 本次运行的日志文件路径
pub fn run_log_path(log_dir: &Path) -> PathBuf {
    log_dir.join(format!(
        "run_{}.log",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    ))
}

/// 初始化全局 subscriber；默认 info，可通过 RUST_LOG 覆盖。返回日志文件路径（如有）
pub fn init(log_dir: Option<&Path>) -> Option<PathBuf> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let mut opened = None;
    let file_layer = log_dir.and_then(|dir| {
        let path = run_log_path(dir);
        let file = std::fs::create_dir_all(dir).and_then(|_| File::create(&path));
        match file {
            Ok(file) => {
                opened = Some(path);
                Some(
                    fmt::layer()
                        .with_ansi(false)
                        .with_target(false)
                        .with_writer(Mutex::new(file)),
                )
            }
            Err(e) => {
                eprintln!("cannot create log file {}: {}", path.display(), e);
                None
            }
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    if let Some(path) = &opened {
        tracing::info!("logging to {}", path.display());
    }
    opened
}
