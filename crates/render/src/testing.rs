//! 测试替身
//!
//! 假原生库记录打开的文档/页面数量、光栅化次数，并检测是否有两个调用同时进入库；
//! 假 worker 按脚本回复请求，记录创建、调用和并发数量。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, RgbImage};

use parking_lot::Mutex;

use crate::error::{RenderError, RenderResult};
use crate::in_process::InProcessRenderer;
use crate::native::{
    DocumentSource, NativeDocument, NativeHandle, NativeLibrary, NativePage, PageSize,
};
use crate::pixel::PixelBuffer;
use crate::pool::{WorkerChannel, WorkerSpawner};
use crate::protocol::{WorkerReply, WorkerRequest};
use crate::worker;

#[derive(Default)]
pub struct FakeStats {
    pub loads: AtomicUsize,
    pub open_documents: AtomicUsize,
    pub open_pages: AtomicUsize,
    pub rasterized: AtomicUsize,
    in_native: AtomicBool,
    pub reentered: AtomicBool,
}

impl FakeStats {
    fn enter(&self) -> NativeCall<'_> {
        if self.in_native.swap(true, Ordering::SeqCst) {
            self.reentered.store(true, Ordering::SeqCst);
        }
        // 放大竞争窗口
        std::thread::sleep(Duration::from_micros(200));
        NativeCall { stats: self }
    }
}

struct NativeCall<'a> {
    stats: &'a FakeStats,
}

impl Drop for NativeCall<'_> {
    fn drop(&mut self) {
        self.stats.in_native.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct FakePage {
    pub size: PageSize,
    /// 光栅化时左半页填充的颜色（BGR）
    pub ink: [u8; 3],
    pub embedded: Option<DynamicImage>,
    pub fails: bool,
}

impl FakePage {
    pub fn letter(ink: [u8; 3]) -> Self {
        Self {
            size: PageSize {
                width_pt: 612.0,
                height_pt: 792.0,
            },
            ink,
            embedded: None,
            fails: false,
        }
    }

    pub fn photo(width: u32, height: u32) -> Self {
        let photo = RgbImage::from_fn(width, height, |x, y| image::Rgb([x as u8, y as u8, 7]));
        Self {
            embedded: Some(DynamicImage::ImageRgb8(photo)),
            ..Self::letter([0, 0, 0])
        }
    }

    pub fn broken() -> Self {
        Self {
            fails: true,
            ..Self::letter([0, 0, 0])
        }
    }
}

#[derive(Clone, Default)]
pub struct FakeDocument {
    pub pages: Vec<FakePage>,
    pub password: Option<String>,
}

impl FakeDocument {
    pub fn letter(pages: usize) -> Self {
        Self {
            pages: (0..pages)
                .map(|i| FakePage::letter([10 * i as u8, 100, 200]))
                .collect(),
            password: None,
        }
    }

    pub fn with_pages(pages: Vec<FakePage>) -> Self {
        Self {
            pages,
            password: None,
        }
    }

    pub fn encrypted(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }
}

#[derive(Default)]
pub struct FakeLibrary {
    documents: HashMap<String, FakeDocument>,
    stats: Arc<FakeStats>,
}

impl FakeLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以路径（或缓冲区内容的文本形式）为键注册文档
    pub fn with_document(mut self, key: &str, document: FakeDocument) -> Self {
        self.documents.insert(key.to_string(), document);
        self
    }

    pub fn stats(&self) -> Arc<FakeStats> {
        Arc::clone(&self.stats)
    }
}

impl NativeLibrary for FakeLibrary {
    fn load<'a>(
        &'a self,
        source: &DocumentSource,
        password: Option<&'a str>,
    ) -> RenderResult<Box<dyn NativeDocument + 'a>> {
        let _call = self.stats.enter();
        self.stats.loads.fetch_add(1, Ordering::SeqCst);

        let key = match source {
            DocumentSource::Path(path) => path.to_string_lossy().to_string(),
            DocumentSource::Bytes(data) => String::from_utf8_lossy(data).to_string(),
        };
        let document = self
            .documents
            .get(&key)
            .ok_or_else(|| RenderError::DocumentLoad(format!("无法解析文档: {key}")))?;

        if let Some(expected) = &document.password {
            if password != Some(expected.as_str()) {
                return Err(RenderError::Password);
            }
        }

        self.stats.open_documents.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeDocumentHandle {
            document,
            stats: &self.stats,
        }))
    }
}

struct FakeDocumentHandle<'a> {
    document: &'a FakeDocument,
    stats: &'a FakeStats,
}

impl NativeDocument for FakeDocumentHandle<'_> {
    fn page_count(&self) -> usize {
        let _call = self.stats.enter();
        self.document.pages.len()
    }

    fn page(&self, index: usize) -> RenderResult<Box<dyn NativePage + '_>> {
        let _call = self.stats.enter();
        let page = self
            .document
            .pages
            .get(index)
            .ok_or_else(|| RenderError::native(index, "页码越界"))?;
        self.stats.open_pages.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakePageHandle {
            index,
            page,
            stats: self.stats,
        }))
    }
}

impl Drop for FakeDocumentHandle<'_> {
    fn drop(&mut self) {
        let _call = self.stats.enter();
        self.stats.open_documents.fetch_sub(1, Ordering::SeqCst);
    }
}

struct FakePageHandle<'a> {
    index: usize,
    page: &'a FakePage,
    stats: &'a FakeStats,
}

impl NativePage for FakePageHandle<'_> {
    fn size(&self) -> PageSize {
        self.page.size
    }

    fn single_image(&self) -> RenderResult<Option<DynamicImage>> {
        let _call = self.stats.enter();
        Ok(self.page.embedded.clone())
    }

    fn rasterize(&self, target: &mut PixelBuffer) -> RenderResult<()> {
        let _call = self.stats.enter();
        if self.page.fails {
            return Err(RenderError::native(self.index, "光栅化失败"));
        }
        self.stats.rasterized.fetch_add(1, Ordering::SeqCst);

        let info = *target.info();
        let half = (info.width / 2) as usize;
        for y in 0..info.height {
            for px in target.row_mut(y).chunks_exact_mut(3).take(half) {
                px.copy_from_slice(&self.page.ink);
            }
        }
        Ok(())
    }
}

impl Drop for FakePageHandle<'_> {
    fn drop(&mut self) {
        let _call = self.stats.enter();
        self.stats.open_pages.fetch_sub(1, Ordering::SeqCst);
    }
}

type Responder = dyn Fn(usize, &WorkerRequest) -> RenderResult<WorkerReply> + Send + Sync;

#[derive(Default)]
pub struct WorkerStats {
    spawned: AtomicUsize,
    calls: AtomicUsize,
    shutdowns: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    alive: Mutex<HashMap<usize, Arc<AtomicBool>>>,
}

impl WorkerStats {
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// 模拟 worker 进程在空闲时退出
    pub fn kill(&self, id: usize) {
        if let Some(alive) = self.alive.lock().get(&id) {
            alive.store(false, Ordering::SeqCst);
        }
    }
}

/// 按脚本回复请求的 worker 工厂
pub struct FakeSpawner {
    responder: Arc<Responder>,
    stats: Arc<WorkerStats>,
    delay: Duration,
    spawn_error: Option<String>,
}

impl FakeSpawner {
    pub fn new(
        responder: impl Fn(usize, &WorkerRequest) -> RenderResult<WorkerReply> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Arc::new(responder),
            stats: Arc::default(),
            delay: Duration::ZERO,
            spawn_error: None,
        }
    }

    /// 用进程内渲染器服务请求，等同于真实 worker 进程的处理逻辑
    pub fn serving(library: FakeLibrary) -> Self {
        let renderer = InProcessRenderer::new(Arc::new(NativeHandle::new(library)));
        Self::new(move |_, request| match request {
            WorkerRequest::Render(job) => Ok(worker::handle(&renderer, job)),
            WorkerRequest::Shutdown => Ok(WorkerReply::NoPage { page_count: 0 }),
        })
    }

    /// 每次创建都失败
    pub fn failing(message: &str) -> Self {
        let mut spawner = Self::new(|_, _| Err(RenderError::transport("unreachable")));
        spawner.spawn_error = Some(message.to_string());
        spawner
    }

    /// 直接调用脚本，便于在另一个脚本中包装
    pub fn respond(&self, id: usize, request: &WorkerRequest) -> RenderResult<WorkerReply> {
        (self.responder)(id, request)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }
}

impl WorkerSpawner for FakeSpawner {
    fn spawn(&self, id: usize) -> RenderResult<Box<dyn WorkerChannel>> {
        if let Some(message) = &self.spawn_error {
            return Err(RenderError::transport(message.clone()));
        }
        self.stats.spawned.fetch_add(1, Ordering::SeqCst);
        let alive = Arc::new(AtomicBool::new(true));
        self.stats.alive.lock().insert(id, Arc::clone(&alive));

        Ok(Box::new(FakeChannel {
            id,
            responder: Arc::clone(&self.responder),
            stats: Arc::clone(&self.stats),
            alive,
            delay: self.delay,
        }))
    }
}

struct FakeChannel {
    id: usize,
    responder: Arc<Responder>,
    stats: Arc<WorkerStats>,
    alive: Arc<AtomicBool>,
    delay: Duration,
}

impl WorkerChannel for FakeChannel {
    fn call(&mut self, request: &WorkerRequest) -> RenderResult<WorkerReply> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(RenderError::transport("worker 已退出"));
        }

        let in_flight = self.stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.stats.calls.fetch_add(1, Ordering::SeqCst);
        let result = (self.responder)(self.id, request);
        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);

        if matches!(result, Err(RenderError::WorkerTransport(_))) {
            self.alive.store(false, Ordering::SeqCst);
        }
        result
    }

    fn is_alive(&mut self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn shutdown(&mut self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            self.stats.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }
}
