//! 渲染尺寸计算
//!
//! 根据页面物理尺寸（point，72 point = 1 英寸）和请求的 DPI 或像素尺寸，
//! 计算目标像素宽高以及水平/垂直方向的实际 DPI。纯函数，不触碰 pdfium。

use serde::{Deserialize, Serialize};

/// PDF 默认 72 point 每英寸
pub const POINTS_PER_INCH: f64 = 72.0;

/// 单个方向的像素上限
pub const MAX_DIMENSION_PX: u32 = 10_000;

/// 未指定尺寸时使用的 DPI
pub const DEFAULT_DPI: f32 = 300.0;

/// 渲染尺寸请求：按 DPI 或按明确的像素尺寸，二者互斥
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RenderSize {
    Dpi(f32),
    Pixels { width: u32, height: u32 },
}

impl RenderSize {
    pub fn dpi(dpi: f32) -> Self {
        Self::Dpi(dpi)
    }

    pub fn pixels(width: u32, height: u32) -> Self {
        Self::Pixels { width, height }
    }
}

impl Default for RenderSize {
    fn default() -> Self {
        Self::Dpi(DEFAULT_DPI)
    }
}

/// 单页的目标像素布局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageLayout {
    pub width_px: u32,
    pub height_px: u32,
    pub x_dpi: u32,
    pub y_dpi: u32,
}

/// 计算页面的像素布局
///
/// 按 DPI 渲染时，DPI 只会向下收紧，保证两个方向都不超过 [`MAX_DIMENSION_PX`]；
/// 按像素渲染时直接使用请求尺寸，两个方向的 DPI 可以不同。
pub fn resolve(page_width_pt: f32, page_height_pt: f32, size: RenderSize) -> PageLayout {
    let width_in = f64::from(page_width_pt) / POINTS_PER_INCH;
    let height_in = f64::from(page_height_pt) / POINTS_PER_INCH;

    match size {
        RenderSize::Dpi(requested) => {
            let max = f64::from(MAX_DIMENSION_PX);
            let mut dpi = f64::from(requested);
            if height_in > 0.0 {
                dpi = dpi.min(max / height_in);
            }
            if width_in > 0.0 {
                dpi = dpi.min(max / width_in);
            }

            let rounded_dpi = round_to_u32(dpi);
            PageLayout {
                width_px: clamp_px(round_to_u32(width_in * dpi)),
                height_px: clamp_px(round_to_u32(height_in * dpi)),
                x_dpi: rounded_dpi,
                y_dpi: rounded_dpi,
            }
        }
        RenderSize::Pixels { width, height } => {
            let width_px = clamp_px(width);
            let height_px = clamp_px(height);
            PageLayout {
                width_px,
                height_px,
                x_dpi: dots_per_inch(width_px, width_in),
                y_dpi: dots_per_inch(height_px, height_in),
            }
        }
    }
}

/// 由像素数和英寸数反推 DPI
pub fn dots_per_inch(px: u32, inches: f64) -> u32 {
    if inches <= 0.0 {
        return 0;
    }
    round_to_u32(f64::from(px) / inches)
}

fn clamp_px(px: u32) -> u32 {
    px.clamp(1, MAX_DIMENSION_PX)
}

fn round_to_u32(value: f64) -> u32 {
    if !value.is_finite() || value <= 0.0 {
        return 0;
    }
    // `as` 在越界时饱和
    value.round() as u32
}
