//! PDF 页面渲染
//!
//! 把 PDF 页面渲染为图片，供预览、扫描流程和导出使用。pdfium 不是线程安全的，
//! 因此提供两种后端：
//!
//! - [`InProcessRenderer`]：在当前进程内通过一把全局锁串行调用 pdfium；
//! - [`RemoteRenderer`]：把每一页交给独立的 worker 进程渲染，worker 崩溃不会影响宿主。
//!
//! 调用方通过 [`select_renderer`] 按配置取得 [`PdfRenderer`]。

pub mod backend;
pub mod config;
pub mod error;
pub mod in_process;
pub mod native;
pub mod pdfium;
pub mod pixel;
pub mod pool;
pub mod process;
pub mod protocol;
pub mod remote;
pub mod size;
pub mod types;
pub mod worker;

#[cfg(test)]
mod testing;

pub use backend::{select_renderer, BackendKind, PageStream, PdfRenderer};
pub use config::RenderConfig;
pub use error::{RenderError, RenderResult};
pub use in_process::{InProcessRenderer, RenderedPages};
pub use native::{DocumentSource, NativeHandle};
pub use pixel::{copy_into, PixelBuffer, PixelInfo, SubPixelType};
pub use pool::{PoolStats, WorkerPool};
pub use remote::{RemotePages, RemoteRenderer};
pub use size::{resolve, PageLayout, RenderSize};
pub use types::{PageOrigin, RenderedPage};
