//! 原生渲染库的边界
//!
//! pdfium 不是线程安全的：同一个库实例上的所有调用（加载、取页、光栅化、释放）
//! 都必须串行。这里用 [`NativeHandle`] 把库实例和一把互斥锁绑在一起，
//! 只能通过 [`NativeSession`] 访问库，会话存活期间持有锁。
//!
//! 文档和页面句柄都是 RAII 对象，drop 时释放原生资源。

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::DynamicImage;
use parking_lot::{Mutex, MutexGuard};

use crate::error::RenderResult;
use crate::pixel::PixelBuffer;

/// 文档来源：文件路径或内存缓冲区
#[derive(Clone)]
pub enum DocumentSource {
    Path(PathBuf),
    Bytes(Arc<[u8]>),
}

impl DocumentSource {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        Self::Path(path.as_ref().to_path_buf())
    }

    pub fn from_bytes(data: impl Into<Arc<[u8]>>) -> Self {
        Self::Bytes(data.into())
    }
}

impl fmt::Debug for DocumentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Bytes(data) => write!(f, "Bytes({} bytes)", data.len()),
        }
    }
}

/// 页面物理尺寸（point）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width_pt: f32,
    pub height_pt: f32,
}

/// 原生库实例
pub trait NativeLibrary: Send + Sync {
    /// 加载文档；从缓冲区加载时只在本次调用期间借用数据
    fn load<'a>(
        &'a self,
        source: &DocumentSource,
        password: Option<&'a str>,
    ) -> RenderResult<Box<dyn NativeDocument + 'a>>;
}

/// 已加载的文档句柄，drop 时关闭文档
pub trait NativeDocument {
    fn page_count(&self) -> usize;

    fn page(&self, index: usize) -> RenderResult<Box<dyn NativePage + '_>>;
}

/// 页面句柄，drop 时关闭页面
pub trait NativePage {
    fn size(&self) -> PageSize;

    /// 页面只包含一张铺满整页的图片时，直接返回该图片
    fn single_image(&self) -> RenderResult<Option<DynamicImage>>;

    /// 按缓冲区尺寸光栅化，缓冲区布局固定为 BGR
    fn rasterize(&self, target: &mut PixelBuffer) -> RenderResult<()>;
}

/// 库实例 + 串行化锁
pub struct NativeHandle<L> {
    library: L,
    lock: Mutex<()>,
}

impl<L: NativeLibrary> NativeHandle<L> {
    pub fn new(library: L) -> Self {
        Self {
            library,
            lock: Mutex::new(()),
        }
    }

    /// 获取独占会话，阻塞直到其它会话结束
    pub fn session(&self) -> NativeSession<'_, L> {
        NativeSession {
            library: &self.library,
            _guard: self.lock.lock(),
        }
    }
}

/// 持有库锁期间对库的访问
pub struct NativeSession<'a, L> {
    library: &'a L,
    _guard: MutexGuard<'a, ()>,
}

impl<'a, L: NativeLibrary> NativeSession<'a, L> {
    /// 返回的文档句柄必须先于会话 drop
    pub fn load(
        &self,
        source: &DocumentSource,
        password: Option<&'a str>,
    ) -> RenderResult<Box<dyn NativeDocument + 'a>> {
        self.library.load(source, password)
    }
}
