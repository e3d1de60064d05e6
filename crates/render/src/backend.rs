//! 渲染后端选择
//!
//! 调用方只依赖 [`PdfRenderer`]，具体使用进程内渲染还是 worker 进程池由配置决定。

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::RenderConfig;
use crate::error::RenderResult;
use crate::in_process::InProcessRenderer;
use crate::native::{DocumentSource, NativeLibrary};
use crate::pdfium::{self, PDFIUM_PATH_ENV};
use crate::pool::WorkerPool;
use crate::process::ProcessSpawner;
use crate::remote::RemoteRenderer;
use crate::size::RenderSize;
use crate::types::RenderedPage;

/// 逐页产出的渲染结果
pub type PageStream<'a> = Box<dyn Iterator<Item = RenderResult<RenderedPage>> + 'a>;

pub trait PdfRenderer: Send + Sync {
    /// 后端名称，用于日志
    fn name(&self) -> &'static str;

    /// 渲染文档的所有页面
    ///
    /// 文档加载失败（包括密码错误）在返回之前报告；单页失败作为序列中的一个错误
    /// 产出，之后序列结束。
    fn render<'a>(
        &'a self,
        source: &DocumentSource,
        size: RenderSize,
        password: Option<&'a str>,
    ) -> RenderResult<PageStream<'a>>;

    fn render_path<'a>(
        &'a self,
        path: &Path,
        size: RenderSize,
        password: Option<&'a str>,
    ) -> RenderResult<PageStream<'a>> {
        self.render(&DocumentSource::from_path(path), size, password)
    }

    fn render_bytes<'a>(
        &'a self,
        data: Arc<[u8]>,
        size: RenderSize,
        password: Option<&'a str>,
    ) -> RenderResult<PageStream<'a>> {
        self.render(&DocumentSource::Bytes(data), size, password)
    }
}

impl<L: NativeLibrary + 'static> PdfRenderer for InProcessRenderer<L> {
    fn name(&self) -> &'static str {
        "in-process"
    }

    fn render<'a>(
        &'a self,
        source: &DocumentSource,
        size: RenderSize,
        password: Option<&'a str>,
    ) -> RenderResult<PageStream<'a>> {
        let pages = InProcessRenderer::render(self, source, size, password)?;
        Ok(Box::new(pages))
    }
}

impl PdfRenderer for RemoteRenderer {
    fn name(&self) -> &'static str {
        "workers"
    }

    fn render<'a>(
        &'a self,
        source: &DocumentSource,
        size: RenderSize,
        password: Option<&'a str>,
    ) -> RenderResult<PageStream<'a>> {
        let pages = RemoteRenderer::render(self, source, size, password)?;
        Ok(Box::new(pages))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BackendKind {
    /// 在当前进程内串行调用 pdfium
    InProcess,
    /// 在独立的 worker 进程中渲染
    Workers,
    /// 根据平台选择
    #[default]
    Auto,
}

impl BackendKind {
    /// 把 `Auto` 解析为具体后端：Windows 上使用 worker 进程隔离 pdfium 崩溃，
    /// 其它平台直接在进程内渲染
    pub fn resolve(self) -> BackendKind {
        match self {
            BackendKind::Auto if cfg!(windows) => BackendKind::Workers,
            BackendKind::Auto => BackendKind::InProcess,
            other => other,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendKind::InProcess => "in-process",
            BackendKind::Workers => "workers",
            BackendKind::Auto => "auto",
        })
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in-process" | "in_process" | "inprocess" | "local" => Ok(BackendKind::InProcess),
            "workers" | "worker" => Ok(BackendKind::Workers),
            "auto" | "" => Ok(BackendKind::Auto),
            other => Err(format!("未知的渲染后端: {}", other)),
        }
    }
}

fn process_spawner(config: &RenderConfig) -> ProcessSpawner {
    let mut spawner = ProcessSpawner::new(config.worker_path()).with_job_timeout(config.job_timeout());
    if let Some(path) = &config.pdfium_library_path {
        spawner = spawner.env(PDFIUM_PATH_ENV, path);
    }
    spawner
}

/// 根据配置创建渲染后端
///
/// worker 进程在第一次渲染时才启动；进程内后端会立即绑定 pdfium。
pub fn select_renderer(config: &RenderConfig) -> RenderResult<Arc<dyn PdfRenderer>> {
    let kind = config.backend.resolve();
    log::info!("[Backend] 使用渲染后端: {} (配置: {})", kind, config.backend);

    match kind {
        BackendKind::Workers => {
            let pool = WorkerPool::new(Box::new(process_spawner(config)), config.worker_count());
            Ok(Arc::new(RemoteRenderer::new(Arc::new(pool))))
        }
        _ => {
            let native = pdfium::shared(config.pdfium_library_path.as_deref())?;
            Ok(Arc::new(InProcessRenderer::new(native)))
        }
    }
}
