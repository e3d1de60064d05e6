//! folio 命令行
//!
//! `folio render` 把 PDF 的每一页导出为 PNG；`folio config` 显示或写出当前生效的配置。

mod config;
mod export;

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};

use folio_render::{select_renderer, BackendKind, RenderConfig, RenderError, RenderSize};

use crate::config::{config_path, load_config, save_config, AppConfig};

#[derive(Parser, Debug)]
#[command(name = "folio", version, about = "Render PDF pages to PNG images")]
struct Cli {
    /// 输出调试日志
    #[arg(short, long, global = true)]
    verbose: bool,

    /// 配置文件路径（默认 ./folio.json）
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 渲染 PDF 的所有页面
    Render {
        input: PathBuf,

        /// 输出目录
        #[arg(short, long, value_name = "DIR")]
        out: Option<PathBuf>,

        /// 目标分辨率
        #[arg(long, conflicts_with = "size")]
        dpi: Option<f32>,

        /// 目标像素尺寸，例如 1240x1754
        #[arg(long, value_name = "WxH")]
        size: Option<PixelSize>,

        /// 加密文档的密码（仅进程内后端支持）
        #[arg(long)]
        password: Option<String>,

        /// 渲染后端: in-process | workers | auto
        #[arg(long)]
        backend: Option<BackendKind>,
    },
    /// 显示当前生效的配置
    Config {
        /// 把生效的配置写回配置文件
        #[arg(long)]
        write: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PixelSize {
    width: u32,
    height: u32,
}

impl FromStr for PixelSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("尺寸格式应为 WxH: {}", s))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| format!("无效的像素值: {}", v))
        };
        Ok(PixelSize {
            width: parse(w)?,
            height: parse(h)?,
        })
    }
}

fn render_size(dpi: Option<f32>, size: Option<PixelSize>, config: &AppConfig) -> RenderSize {
    match (size, dpi.or(config.dpi)) {
        (Some(size), _) => RenderSize::pixels(size.width, size.height),
        (None, Some(dpi)) => RenderSize::dpi(dpi),
        (None, None) => RenderSize::default(),
    }
}

/// worker 后端不支持加密文档，带密码时改用进程内渲染
fn backend_for_password(config: &RenderConfig, has_password: bool) -> RenderConfig {
    if has_password && config.backend.resolve() == BackendKind::Workers {
        log::warn!("[Export] worker 后端不支持加密文档，改用进程内渲染");
        return RenderConfig {
            backend: BackendKind::InProcess,
            ..config.clone()
        };
    }
    config.clone()
}

/// 为常见错误补充操作提示
fn explain(err: RenderError) -> anyhow::Error {
    match err {
        RenderError::Password => anyhow!("{}，请使用 --password 提供密码", err),
        RenderError::Unsupported(_) => anyhow!("{}（可使用 --backend in-process）", err),
        err if err.is_retryable() => anyhow!("{}（渲染进程异常，可以重试）", err),
        err => err.into(),
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        std::env::var("FOLIO_LOG")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(LevelFilter::Info)
    };
    TermLogger::init(level, Config::default(), TerminalMode::Stderr, ColorChoice::Auto)
        .context("初始化日志失败")
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let path = config_path(cli.config.as_deref());
    let mut app_config =
        load_config(&path).with_context(|| format!("无法读取配置文件 {:?}", path))?;
    app_config.render = app_config.render.with_env_overrides();

    match cli.command {
        Command::Config { write } => {
            println!("{}", serde_json::to_string_pretty(&app_config)?);
            if write {
                save_config(&path, &app_config)
                    .with_context(|| format!("无法写入配置文件 {:?}", path))?;
                log::info!("[Config] 已写入 {:?}", path);
            }
        }
        Command::Render {
            input,
            out,
            dpi,
            size,
            password,
            backend,
        } => {
            if let Some(backend) = backend {
                app_config.render.backend = backend;
            }
            let size = render_size(dpi, size, &app_config);
            let out_dir = out
                .or_else(|| app_config.output_dir.clone())
                .unwrap_or_else(|| PathBuf::from("pages"));

            let render_config = backend_for_password(&app_config.render, password.is_some());
            let renderer = select_renderer(&render_config).map_err(explain)?;
            log::info!("[Export] {:?} -> {:?} ({})", input, out_dir, renderer.name());

            let pages = renderer
                .render_path(&input, size, password.as_deref())
                .map_err(explain)?;
            let summary = export::export_pages(pages, &out_dir).map_err(|err| {
                match err.downcast::<RenderError>() {
                    Ok(render_err) => explain(render_err),
                    Err(err) => err,
                }
            })?;
            log::info!("[Export] 完成，共 {} 页", summary.files.len());
        }
    }
    Ok(())
}
