//! 原始像素缓冲区与格式转换
//!
//! pdfium 只输出 BGR 顺序的位图，这里先渲染到固定布局的中间缓冲区，
//! 再通过一次拷贝转换为目标图片的像素格式。

use image::DynamicImage;

use crate::error::{RenderError, RenderResult};

/// 子像素排列
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubPixelType {
    Rgb,
    Bgr,
    Rgba,
    Bgra,
    Gray,
}

impl SubPixelType {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb | Self::Bgr => 3,
            Self::Rgba | Self::Bgra => 4,
            Self::Gray => 1,
        }
    }

    /// 读取一个像素，统一返回 RGBA
    #[inline]
    fn read(self, px: &[u8]) -> [u8; 4] {
        match self {
            Self::Rgb => [px[0], px[1], px[2], 255],
            Self::Bgr => [px[2], px[1], px[0], 255],
            Self::Rgba => [px[0], px[1], px[2], px[3]],
            Self::Bgra => [px[2], px[1], px[0], px[3]],
            Self::Gray => [px[0], px[0], px[0], 255],
        }
    }
}

/// 原始缓冲区的内存布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelInfo {
    pub width: u32,
    pub height: u32,
    pub layout: SubPixelType,
    /// 每行字节数，允许行尾填充
    pub stride: usize,
}

impl PixelInfo {
    /// 按 4 字节对齐行宽（与 pdfium 位图一致）
    pub fn new(width: u32, height: u32, layout: SubPixelType) -> Self {
        let row = width as usize * layout.bytes_per_pixel();
        Self {
            width,
            height,
            layout,
            stride: (row + 3) & !3,
        }
    }

    pub fn with_stride(width: u32, height: u32, layout: SubPixelType, stride: usize) -> Self {
        Self {
            width,
            height,
            layout,
            stride,
        }
    }

    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.layout.bytes_per_pixel()
    }

    pub fn len(&self) -> usize {
        self.stride * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn validate(&self, buffer_len: usize) -> RenderResult<()> {
        if self.stride < self.row_bytes() {
            return Err(RenderError::Conversion(format!(
                "行宽 {} 小于 {} 像素所需的 {} 字节",
                self.stride,
                self.width,
                self.row_bytes()
            )));
        }
        if buffer_len < self.len() {
            return Err(RenderError::Conversion(format!(
                "缓冲区只有 {} 字节，布局需要 {} 字节",
                buffer_len,
                self.len()
            )));
        }
        Ok(())
    }
}

/// 固定布局的原始像素缓冲区
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    info: PixelInfo,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// 分配缓冲区并整体填充为不透明白色
    pub fn white(width: u32, height: u32, layout: SubPixelType) -> Self {
        let info = PixelInfo::new(width, height, layout);
        Self {
            info,
            data: vec![0xFF; info.len()],
        }
    }

    pub fn info(&self) -> &PixelInfo {
        &self.info
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let start = y as usize * self.info.stride;
        let end = start + self.info.row_bytes();
        &mut self.data[start..end]
    }

    /// 从另一块相同子像素布局、但行宽可能不同的内存逐行写入
    ///
    /// 超出本缓冲区的行和列会被忽略。
    pub fn write_rows(&mut self, source: &[u8], source_info: &PixelInfo) -> RenderResult<()> {
        if source_info.layout != self.info.layout {
            return Err(RenderError::Conversion(format!(
                "子像素布局不一致: {:?} -> {:?}",
                source_info.layout, self.info.layout
            )));
        }
        source_info.validate(source.len())?;

        let rows = source_info.height.min(self.info.height);
        let row_len = source_info.row_bytes().min(self.info.row_bytes());
        for y in 0..rows {
            let src_start = y as usize * source_info.stride;
            let src = &source[src_start..src_start + row_len];
            self.row_mut(y)[..row_len].copy_from_slice(src);
        }
        Ok(())
    }
}

/// 将原始缓冲区一次性拷贝到目标图片，必要时交换通道顺序
///
/// 目标图片与缓冲区尺寸必须一致。支持 RGB8 / RGBA8 / Luma8 目标格式。
pub fn copy_into(source: &[u8], info: &PixelInfo, target: &mut DynamicImage) -> RenderResult<()> {
    info.validate(source.len())?;
    if (target.width(), target.height()) != (info.width, info.height) {
        return Err(RenderError::Conversion(format!(
            "尺寸不一致: 缓冲区 {}x{}，目标 {}x{}",
            info.width,
            info.height,
            target.width(),
            target.height()
        )));
    }
    if info.is_empty() {
        return Ok(());
    }

    let bpp = info.layout.bytes_per_pixel();
    let width = info.width as usize;
    let rows = source.chunks(info.stride).take(info.height as usize);

    match target {
        DynamicImage::ImageRgb8(img) => {
            for (src_row, dst_row) in rows.zip(img.chunks_exact_mut(width * 3)) {
                for (src, dst) in src_row.chunks_exact(bpp).zip(dst_row.chunks_exact_mut(3)) {
                    let [r, g, b, _] = info.layout.read(src);
                    dst.copy_from_slice(&[r, g, b]);
                }
            }
        }
        DynamicImage::ImageRgba8(img) => {
            for (src_row, dst_row) in rows.zip(img.chunks_exact_mut(width * 4)) {
                for (src, dst) in src_row.chunks_exact(bpp).zip(dst_row.chunks_exact_mut(4)) {
                    dst.copy_from_slice(&info.layout.read(src));
                }
            }
        }
        DynamicImage::ImageLuma8(img) => {
            for (src_row, dst_row) in rows.zip(img.chunks_exact_mut(width)) {
                for (src, dst) in src_row.chunks_exact(bpp).zip(dst_row.iter_mut()) {
                    let [r, g, b, _] = info.layout.read(src);
                    *dst = luma(r, g, b);
                }
            }
        }
        other => {
            return Err(RenderError::Conversion(format!(
                "不支持的目标像素格式: {:?}",
                other.color()
            )))
        }
    }
    Ok(())
}

/// Rec.601 灰度
#[inline]
fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((77 * u32::from(r) + 150 * u32::from(g) + 29 * u32::from(b)) >> 8) as u8
}
