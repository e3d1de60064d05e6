//! 进程内渲染
//!
//! 在同一把库锁下完成 加载 → 逐页渲染 → 释放 的整个周期。页面按需惰性产出，
//! 迭代结束、提前丢弃或出错时立即释放文档句柄和锁。

use std::iter::FusedIterator;
use std::sync::Arc;

use image::{DynamicImage, RgbImage};

use crate::error::RenderResult;
use crate::native::{DocumentSource, NativeDocument, NativeHandle, NativeLibrary, NativeSession};
use crate::pixel::{self, PixelBuffer, SubPixelType};
use crate::size::{self, RenderSize, POINTS_PER_INCH};
use crate::types::{PageOrigin, RenderedPage};

/// 串行访问原生库的渲染器
pub struct InProcessRenderer<L> {
    native: Arc<NativeHandle<L>>,
    extract_images: bool,
}

impl<L: NativeLibrary> InProcessRenderer<L> {
    pub fn new(native: Arc<NativeHandle<L>>) -> Self {
        Self {
            native,
            extract_images: true,
        }
    }

    /// 关闭整页内嵌图片的直接提取，所有页面都走光栅化
    pub fn with_image_extraction(mut self, enabled: bool) -> Self {
        self.extract_images = enabled;
        self
    }

    /// 渲染整个文档
    ///
    /// 加载失败（包括密码错误）在返回迭代器之前报告。返回的迭代器持有库锁，
    /// 直到最后一页产出、出错或被 drop。
    pub fn render<'a>(
        &'a self,
        source: &DocumentSource,
        size: RenderSize,
        password: Option<&'a str>,
    ) -> RenderResult<RenderedPages<'a, L>> {
        let session = self.native.session();
        let document = session.load(source, password)?;
        let page_count = document.page_count();

        log::info!(
            "[InProcess] 文档已加载: {:?}, 共 {} 页, 尺寸 {:?}",
            source,
            page_count,
            size
        );

        Ok(RenderedPages {
            document: Some(document),
            session: Some(session),
            size,
            extract_images: self.extract_images,
            next: 0,
            page_count,
        })
    }

    /// 只渲染一页，同时返回文档总页数；页码越界时返回 `None`
    pub fn render_page<'a>(
        &'a self,
        source: &DocumentSource,
        page_index: usize,
        size: RenderSize,
        password: Option<&'a str>,
    ) -> RenderResult<(usize, Option<RenderedPage>)> {
        let session = self.native.session();
        let document = session.load(source, password)?;
        let page_count = document.page_count();
        if page_index >= page_count {
            return Ok((page_count, None));
        }
        let page = render_one(document.as_ref(), page_index, size, self.extract_images)?;
        Ok((page_count, Some(page)))
    }

    pub fn page_count<'a>(
        &'a self,
        source: &DocumentSource,
        password: Option<&'a str>,
    ) -> RenderResult<usize> {
        let session = self.native.session();
        let document = session.load(source, password)?;
        Ok(document.page_count())
    }
}

impl<L> Clone for InProcessRenderer<L> {
    fn clone(&self) -> Self {
        Self {
            native: Arc::clone(&self.native),
            extract_images: self.extract_images,
        }
    }
}

/// 惰性的单次页面序列
pub struct RenderedPages<'a, L> {
    // 文档句柄必须先于会话（锁）释放
    document: Option<Box<dyn NativeDocument + 'a>>,
    session: Option<NativeSession<'a, L>>,
    size: RenderSize,
    extract_images: bool,
    next: usize,
    page_count: usize,
}

impl<L> RenderedPages<'_, L> {
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    fn release(&mut self) {
        if self.session.is_some() {
            log::debug!("[InProcess] 释放文档，已产出 {} 页", self.next);
        }
        self.document = None;
        self.session = None;
    }
}

impl<L> Iterator for RenderedPages<'_, L> {
    type Item = RenderResult<RenderedPage>;

    fn next(&mut self) -> Option<Self::Item> {
        let result = {
            let document = self.document.as_deref()?;
            if self.next < self.page_count {
                Some(render_one(
                    document,
                    self.next,
                    self.size,
                    self.extract_images,
                ))
            } else {
                None
            }
        };

        match result {
            Some(Ok(page)) => {
                self.next += 1;
                if self.next >= self.page_count {
                    self.release();
                }
                Some(Ok(page))
            }
            Some(Err(err)) => {
                log::warn!("[InProcess] 第 {} 页渲染失败，终止: {}", self.next, err);
                self.release();
                Some(Err(err))
            }
            None => {
                self.release();
                None
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.document.is_none() {
            return (0, Some(0));
        }
        (0, Some(self.page_count - self.next))
    }
}

impl<L> FusedIterator for RenderedPages<'_, L> {}

impl<L> Drop for RenderedPages<'_, L> {
    fn drop(&mut self) {
        self.release();
    }
}

/// 渲染单页：优先提取整页内嵌图片，否则光栅化
fn render_one(
    document: &dyn NativeDocument,
    index: usize,
    size: RenderSize,
    extract_images: bool,
) -> RenderResult<RenderedPage> {
    let page = document.page(index)?;
    let page_size = page.size();

    if extract_images {
        match page.single_image() {
            Ok(Some(image)) => {
                let width_in = f64::from(page_size.width_pt) / POINTS_PER_INCH;
                let height_in = f64::from(page_size.height_pt) / POINTS_PER_INCH;
                log::debug!(
                    "[InProcess] 第 {} 页为整页图片 {}x{}，直接提取",
                    index,
                    image.width(),
                    image.height()
                );
                return Ok(RenderedPage {
                    x_dpi: size::dots_per_inch(image.width(), width_in),
                    y_dpi: size::dots_per_inch(image.height(), height_in),
                    image,
                    page_index: index,
                    origin: PageOrigin::EmbeddedImage,
                });
            }
            Ok(None) => {}
            Err(err) => {
                log::warn!("[InProcess] 第 {} 页内嵌图片提取失败，改为光栅化: {}", index, err);
            }
        }
    }

    let layout = size::resolve(page_size.width_pt, page_size.height_pt, size);
    log::debug!(
        "[InProcess] 第 {} 页: {}x{} pt -> {}x{} px ({}x{} DPI)",
        index,
        page_size.width_pt,
        page_size.height_pt,
        layout.width_px,
        layout.height_px,
        layout.x_dpi,
        layout.y_dpi
    );

    // pdfium 只支持 BGR，先渲染到中间缓冲区再转换为 RGB
    let mut buffer = PixelBuffer::white(layout.width_px, layout.height_px, SubPixelType::Bgr);
    page.rasterize(&mut buffer)?;

    let mut image = DynamicImage::ImageRgb8(RgbImage::new(layout.width_px, layout.height_px));
    pixel::copy_into(buffer.as_bytes(), buffer.info(), &mut image)?;

    Ok(RenderedPage {
        image,
        page_index: index,
        x_dpi: layout.x_dpi,
        y_dpi: layout.y_dpi,
        origin: PageOrigin::Rasterized,
    })
}
