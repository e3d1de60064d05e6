//! 基于 worker 进程池的渲染
//!
//! 每一页都是一次独立的借用：取得 worker → 发送单页任务 → 解码 PNG → 归还。
//! 第一页在 [`RemoteRenderer::render`] 中立即获取，文档加载失败因此在返回迭代器
//! 之前报告；其余页面按需获取。

use std::iter::FusedIterator;
use std::sync::Arc;

use image::ImageFormat;

use crate::error::{RenderError, RenderResult};
use crate::native::DocumentSource;
use crate::pool::WorkerPool;
use crate::protocol::{PageReply, RenderJob, WorkerReply, WorkerRequest};
use crate::size::RenderSize;
use crate::types::RenderedPage;

pub struct RemoteRenderer {
    pool: Arc<WorkerPool>,
}

impl RemoteRenderer {
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// 渲染整个文档
    ///
    /// worker 后端不支持加密文档：提供密码时直接返回 [`RenderError::Unsupported`]，
    /// 不占用任何 worker。
    pub fn render(
        &self,
        source: &DocumentSource,
        size: RenderSize,
        password: Option<&str>,
    ) -> RenderResult<RemotePages<'_>> {
        if password.is_some() {
            return Err(RenderError::Unsupported(
                "worker 后端不支持加密文档，请使用进程内渲染".to_string(),
            ));
        }

        let (page_count, first) = self.fetch(source, 0, size)?;
        log::info!(
            "[Remote] 文档 {:?} 共 {} 页, 尺寸 {:?}",
            source,
            page_count,
            size
        );

        Ok(RemotePages {
            renderer: self,
            source: source.clone(),
            size,
            page_count,
            pending: first,
            next: 1,
            finished: false,
        })
    }

    fn fetch(
        &self,
        source: &DocumentSource,
        page_index: usize,
        size: RenderSize,
    ) -> RenderResult<(usize, Option<RenderedPage>)> {
        let request = WorkerRequest::Render(RenderJob {
            source: source.clone(),
            page_index,
            size,
        });

        self.pool.use_worker(|worker| {
            log::debug!("[Remote] worker #{} 渲染第 {} 页", worker.id(), page_index);
            match worker.call(&request)? {
                WorkerReply::Page(reply) => {
                    let page_count = reply.page_count;
                    decode(reply, page_index).map(|page| (page_count, Some(page)))
                }
                WorkerReply::NoPage { page_count } => Ok((page_count, None)),
                WorkerReply::Failed(failure) => Err(failure.into()),
            }
        })
    }
}

fn decode(reply: PageReply, expected_index: usize) -> RenderResult<RenderedPage> {
    if reply.page_index != expected_index {
        return Err(RenderError::transport(format!(
            "worker 返回了第 {} 页，期望第 {} 页",
            reply.page_index, expected_index
        )));
    }

    let image = image::load_from_memory_with_format(&reply.png, ImageFormat::Png)
        .map_err(|e| RenderError::transport(format!("无法解码 worker 返回的图片: {}", e)))?;

    Ok(RenderedPage {
        image,
        page_index: reply.page_index,
        x_dpi: reply.x_dpi,
        y_dpi: reply.y_dpi,
        origin: reply.origin,
    })
}

/// 惰性的单次页面序列，每次 `next` 借用一次 worker
pub struct RemotePages<'a> {
    renderer: &'a RemoteRenderer,
    source: DocumentSource,
    size: RenderSize,
    page_count: usize,
    pending: Option<RenderedPage>,
    next: usize,
    finished: bool,
}

impl RemotePages<'_> {
    pub fn page_count(&self) -> usize {
        self.page_count
    }
}

impl Iterator for RemotePages<'_> {
    type Item = RenderResult<RenderedPage>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if let Some(page) = self.pending.take() {
            return Some(Ok(page));
        }
        if self.next >= self.page_count {
            self.finished = true;
            return None;
        }

        match self.renderer.fetch(&self.source, self.next, self.size) {
            Ok((_, Some(page))) => {
                self.next += 1;
                Some(Ok(page))
            }
            Ok((page_count, None)) => {
                log::warn!(
                    "[Remote] 第 {} 页不存在（文档现有 {} 页），终止",
                    self.next,
                    page_count
                );
                self.finished = true;
                Some(Err(RenderError::DocumentLoad(format!(
                    "文档在渲染过程中发生变化: 原有 {} 页，现有 {} 页",
                    self.page_count, page_count
                ))))
            }
            Err(err) => {
                log::warn!("[Remote] 第 {} 页失败，终止: {}", self.next, err);
                self.finished = true;
                Some(Err(err))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.finished {
            return (0, Some(0));
        }
        let remaining = self.page_count.saturating_sub(self.next) + usize::from(self.pending.is_some());
        (0, Some(remaining))
    }
}

impl FusedIterator for RemotePages<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::testing::{FakeDocument, FakeLibrary, FakePage, FakeSpawner};
    use crate::types::PageOrigin;

    fn remote(spawner: FakeSpawner, capacity: usize) -> RemoteRenderer {
        RemoteRenderer::new(Arc::new(WorkerPool::new(Box::new(spawner), capacity)))
    }

    fn letters(pages: usize) -> FakeSpawner {
        FakeSpawner::serving(FakeLibrary::new().with_document("letter.pdf", FakeDocument::letter(pages)))
    }

    fn letter_doc() -> DocumentSource {
        DocumentSource::from_path("letter.pdf")
    }

    #[test]
    fn test_three_pages_at_150_dpi() {
        let renderer = remote(letters(3), 2);

        let pages: Vec<_> = renderer
            .render(&letter_doc(), RenderSize::dpi(150.0), None)
            .unwrap()
            .collect::<RenderResult<_>>()
            .unwrap();

        assert_eq!(pages.len(), 3);
        for (i, page) in pages.iter().enumerate() {
            assert_eq!(page.page_index, i);
            assert_eq!((page.width(), page.height()), (1275, 1650));
            assert_eq!((page.x_dpi, page.y_dpi), (150, 150));
            assert_eq!(page.origin, PageOrigin::Rasterized);
        }

        // 左半页的墨色经过 BGR → RGB 转换
        let rgb = pages[1].image.to_rgb8();
        assert_eq!(rgb.get_pixel(0, 0).0, [200, 100, 10]);
        assert_eq!(rgb.get_pixel(1274, 0).0, [255, 255, 255]);
    }

    #[test]
    fn test_password_is_rejected_without_dispatch() {
        let spawner = letters(1);
        let stats = spawner.stats();
        let renderer = remote(spawner, 1);

        let err = renderer
            .render(&letter_doc(), RenderSize::default(), Some("secret"))
            .err()
            .unwrap();
        assert!(matches!(err, RenderError::Unsupported(_)));
        assert_eq!(stats.spawned(), 0);
        assert_eq!(stats.calls(), 0);
    }

    #[test]
    fn test_load_failure_is_reported_before_iteration() {
        let renderer = remote(letters(1), 1);

        let err = renderer
            .render(&DocumentSource::from_path("missing.pdf"), RenderSize::default(), None)
            .err()
            .unwrap();
        assert!(matches!(err, RenderError::DocumentLoad(_)));
        assert_eq!(renderer.pool().stats().replaced, 0);
    }

    #[test]
    fn test_encrypted_document_reports_password() {
        let library = FakeLibrary::new()
            .with_document("letter.pdf", FakeDocument::letter(1).encrypted("secret"));
        let renderer = remote(FakeSpawner::serving(library), 1);

        let err = renderer
            .render(&letter_doc(), RenderSize::default(), None)
            .err()
            .unwrap();
        assert!(matches!(err, RenderError::Password));
    }

    #[test]
    fn test_pages_are_fetched_lazily() {
        let spawner = letters(5);
        let stats = spawner.stats();
        let renderer = remote(spawner, 1);

        let mut pages = renderer.render(&letter_doc(), RenderSize::dpi(10.0), None).unwrap();
        assert_eq!(pages.page_count(), 5);
        assert_eq!(stats.calls(), 1);

        pages.next().unwrap().unwrap();
        assert_eq!(stats.calls(), 1);
        pages.next().unwrap().unwrap();
        assert_eq!(stats.calls(), 2);

        drop(pages);
        assert_eq!(stats.calls(), 2);
        assert_eq!(renderer.pool().stats().idle, 1);
    }

    #[test]
    fn test_page_failure_ends_the_sequence_and_replaces_worker() {
        let library = FakeLibrary::new().with_document(
            "letter.pdf",
            FakeDocument::with_pages(vec![
                FakePage::letter([1, 2, 3]),
                FakePage::broken(),
                FakePage::letter([4, 5, 6]),
            ]),
        );
        let renderer = remote(FakeSpawner::serving(library), 1);

        let mut pages = renderer.render(&letter_doc(), RenderSize::dpi(10.0), None).unwrap();
        assert!(pages.next().unwrap().is_ok());
        match pages.next().unwrap() {
            Err(RenderError::NativeRender { page, .. }) => assert_eq!(page, 1),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(pages.next().is_none());

        let stats = renderer.pool().stats();
        assert_eq!(stats.replaced, 1);
        assert_eq!(stats.live, 1);
    }

    #[test]
    fn test_worker_crash_is_retryable_and_pool_recovers() {
        let inner = letters(3);
        let spawner = FakeSpawner::new(move |id, request| {
            if id == 0 {
                if let WorkerRequest::Render(job) = request {
                    if job.page_index == 1 {
                        return Err(RenderError::transport("worker 崩溃"));
                    }
                }
            }
            inner.respond(id, request)
        });
        let renderer = remote(spawner, 2);

        let results: Vec<_> = renderer
            .render(&letter_doc(), RenderSize::dpi(10.0), None)
            .unwrap()
            .collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].as_ref().unwrap_err().is_retryable());

        let stats = renderer.pool().stats();
        assert_eq!(stats.replaced, 1);

        // 同一请求重试成功
        let pages = renderer
            .render(&letter_doc(), RenderSize::dpi(10.0), None)
            .unwrap()
            .count();
        assert_eq!(pages, 3);
    }

    #[test]
    fn test_buffer_source_is_sent_inline() {
        let library = FakeLibrary::new().with_document("%PDF inline", FakeDocument::letter(2));
        let renderer = remote(FakeSpawner::serving(library), 1);

        let pages = renderer
            .render(
                &DocumentSource::from_bytes(b"%PDF inline".to_vec()),
                RenderSize::pixels(100, 100),
                None,
            )
            .unwrap()
            .collect::<RenderResult<Vec<_>>>()
            .unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!((pages[0].x_dpi, pages[0].y_dpi), (12, 9));
    }

    #[test]
    fn test_embedded_image_survives_the_round_trip() {
        let library = FakeLibrary::new().with_document(
            "scan.pdf",
            FakeDocument::with_pages(vec![FakePage::photo(850, 1100)]),
        );
        let renderer = remote(FakeSpawner::serving(library), 1);

        let page = renderer
            .render(&DocumentSource::from_path("scan.pdf"), RenderSize::default(), None)
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(page.origin, PageOrigin::EmbeddedImage);
        assert_eq!((page.x_dpi, page.y_dpi), (100, 100));
        assert_eq!(page.image.to_rgb8().get_pixel(3, 4).0, [3, 4, 7]);
    }

    #[test]
    fn test_malformed_image_retires_worker() {
        let spawner = FakeSpawner::new(|_, _| {
            Ok(WorkerReply::Page(PageReply {
                page_count: 1,
                page_index: 0,
                x_dpi: 72,
                y_dpi: 72,
                origin: PageOrigin::Rasterized,
                png: b"not a png".to_vec(),
            }))
        });
        let renderer = remote(spawner, 1);

        let err = renderer
            .render(&letter_doc(), RenderSize::default(), None)
            .err()
            .unwrap();
        assert!(err.is_retryable());
        assert_eq!(renderer.pool().stats().replaced, 1);
    }

    #[test]
    fn test_remote_io_failure_is_transport() {
        let spawner = FakeSpawner::new(|_, _| {
            Ok(WorkerReply::Failed(crate::error::RemoteFailure {
                kind: FailureKind::Other,
                page: None,
                message: "管道断开".to_string(),
            }))
        });
        let renderer = remote(spawner, 1);

        let err = renderer
            .render(&letter_doc(), RenderSize::default(), None)
            .err()
            .unwrap();
        assert!(matches!(err, RenderError::WorkerTransport(_)));
    }

    #[test]
    fn test_missing_library_keeps_the_worker() {
        let spawner = FakeSpawner::new(|_, _| {
            Ok(WorkerReply::Failed(crate::error::RemoteFailure::from(
                &RenderError::LibraryUnavailable("找不到 pdfium".to_string()),
            )))
        });
        let stats = spawner.stats();
        let renderer = remote(spawner, 1);

        for _ in 0..3 {
            let err = renderer
                .render(&letter_doc(), RenderSize::default(), None)
                .err()
                .unwrap();
            assert!(matches!(err, RenderError::LibraryUnavailable(_)));
            assert!(!err.is_retryable());
        }
        assert_eq!(stats.spawned(), 1);
        assert_eq!(renderer.pool().stats().replaced, 0);
    }

    #[test]
    fn test_shrinking_document_is_an_error() {
        let inner = letters(3);
        let spawner = FakeSpawner::new(move |id, request| match request {
            WorkerRequest::Render(job) if job.page_index == 2 => Ok(WorkerReply::NoPage { page_count: 2 }),
            _ => inner.respond(id, request),
        });
        let renderer = remote(spawner, 1);

        let results: Vec<_> = renderer
            .render(&letter_doc(), RenderSize::dpi(10.0), None)
            .unwrap()
            .collect();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok() && results[1].is_ok());
        match &results[2] {
            Err(RenderError::DocumentLoad(msg)) => assert!(msg.contains("现有 2 页")),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
