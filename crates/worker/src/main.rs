//! folio 渲染 worker
//!
//! 由宿主进程启动，stdin/stdout 承载帧协议，日志只写入 stderr。

use std::io::{self, BufReader, BufWriter};

use anyhow::{Context, Result};
use simplelog::{Config, LevelFilter, WriteLogger};

use folio_render::process::WORKER_ID_ENV;
use folio_render::{pdfium, worker, InProcessRenderer};

/// 日志级别的环境变量
const LOG_ENV: &str = "FOLIO_LOG";

fn main() -> Result<()> {
    let level = std::env::var(LOG_ENV)
        .ok()
        .and_then(|v| v.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);
    WriteLogger::init(level, Config::default(), io::stderr()).context("初始化日志失败")?;

    let id = std::env::var(WORKER_ID_ENV).unwrap_or_else(|_| "?".to_string());
    log::info!("[Worker] #{} 启动 (pid {})", id, std::process::id());

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut input = BufReader::new(stdin.lock());
    let mut output = BufWriter::new(stdout.lock());

    let handled = match pdfium::shared(None) {
        Ok(native) => {
            let renderer = InProcessRenderer::new(native);
            worker::serve(&renderer, &mut input, &mut output)
        }
        Err(err) => {
            log::error!("[Worker] #{} {}", id, err);
            worker::refuse(&err, &mut input, &mut output)
        }
    }
    .with_context(|| format!("worker #{} 通信失败", id))?;

    log::info!("[Worker] #{} 退出，共处理 {} 个任务", id, handled);
    Ok(())
}
