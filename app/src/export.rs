//! 把渲染结果写成 PNG 文件

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::ImageFormat;

use folio_render::{RenderResult, RenderedPage};

#[derive(Debug, Default)]
pub struct ExportSummary {
    pub files: Vec<PathBuf>,
}

pub fn page_file_name(page_index: usize) -> String {
    format!("page-{:03}.png", page_index + 1)
}

/// 逐页写出，遇到第一个渲染错误时停止；之前已写出的文件保留
pub fn export_pages<I>(pages: I, out_dir: &Path) -> Result<ExportSummary>
where
    I: IntoIterator<Item = RenderResult<RenderedPage>>,
{
    fs::create_dir_all(out_dir).with_context(|| format!("无法创建输出目录 {:?}", out_dir))?;

    let mut summary = ExportSummary::default();
    for page in pages {
        let page = page.with_context(|| {
            format!("渲染中断，已导出 {} 页", summary.files.len())
        })?;

        let path = out_dir.join(page_file_name(page.page_index));
        page.image
            .save_with_format(&path, ImageFormat::Png)
            .with_context(|| format!("写入 {:?} 失败", path))?;
        log::info!(
            "[Export] 第 {} 页 -> {:?} ({}x{}, {}x{} DPI, {:?})",
            page.page_index + 1,
            path,
            page.width(),
            page.height(),
            page.x_dpi,
            page.y_dpi,
            page.origin
        );
        summary.files.push(path);
    }
    Ok(summary)
}
