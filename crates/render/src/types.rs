//! 渲染结果类型

use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// 页面图片的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PageOrigin {
    /// pdfium 光栅化得到
    Rasterized,
    /// 直接取自页面内嵌的整页图片
    EmbeddedImage,
}

/// 从 PDF 渲染得到的一页图片，返回后归调用方所有
#[derive(Clone)]
pub struct RenderedPage {
    pub image: DynamicImage,
    /// 页码，从 0 开始
    pub page_index: usize,
    pub x_dpi: u32,
    pub y_dpi: u32,
    pub origin: PageOrigin,
}

impl RenderedPage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

impl std::fmt::Debug for RenderedPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderedPage")
            .field("page_index", &self.page_index)
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .field("x_dpi", &self.x_dpi)
            .field("y_dpi", &self.y_dpi)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}
