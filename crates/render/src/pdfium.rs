//! pdfium-render 实现
//!
//! 负责查找并绑定 pdfium 动态库，以及把 pdfium 的文档/页面/位图包装为
//! [`NativeLibrary`] 系列 trait。整个进程只绑定一次，共享同一个 [`NativeHandle`]。

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use image::DynamicImage;
use pdfium_render::prelude::*;

use crate::error::{RenderError, RenderResult};
use crate::native::{
    DocumentSource, NativeDocument, NativeHandle, NativeLibrary, NativePage, PageSize,
};
use crate::pixel::{PixelBuffer, PixelInfo, SubPixelType};

/// 显式指定 pdfium 动态库路径的环境变量
pub const PDFIUM_PATH_ENV: &str = "PDFIUM_DYNAMIC_LIB_PATH";

/// 内嵌图片与页面尺寸的允许误差（point）
const FULL_PAGE_TOLERANCE_PT: f32 = 1.0;

static SHARED: OnceLock<Result<Arc<NativeHandle<PdfiumLibrary>>, String>> = OnceLock::new();

/// 获取 pdfium 库的搜索路径
fn get_pdfium_search_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. 配置中指定的目录
    if let Some(dir) = explicit {
        paths.push(dir.to_path_buf());
    }

    // 2. 环境变量
    if let Some(dir) = std::env::var_os(PDFIUM_PATH_ENV) {
        paths.push(PathBuf::from(dir));
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            // 3. 可执行文件同级的 libs 目录
            paths.push(exe_dir.join("libs"));

            // 4. 可执行文件同级目录
            paths.push(exe_dir.to_path_buf());

            // 5. macOS: app bundle 内的 Resources 目录
            #[cfg(target_os = "macos")]
            {
                if let Some(contents_dir) = exe_dir.parent() {
                    paths.push(contents_dir.join("Resources").join("libs"));
                    paths.push(contents_dir.join("Resources"));
                }
            }

            // 6. Linux AppImage
            #[cfg(target_os = "linux")]
            {
                if let Ok(appdir) = std::env::var("APPDIR") {
                    let appdir_path = PathBuf::from(appdir);
                    paths.push(appdir_path.join("usr").join("lib"));
                }
            }
        }
    }

    // 7. 本地开发目录
    paths.push(PathBuf::from("libs"));
    paths.push(PathBuf::from("./"));

    paths
}

/// 尝试绑定 pdfium 库
pub fn bind_pdfium(explicit: Option<&Path>) -> Result<Pdfium, String> {
    for path in get_pdfium_search_paths(explicit) {
        // 允许直接给出库文件路径
        let lib_path = if path.is_file() {
            path.clone()
        } else {
            Pdfium::pdfium_platform_library_name_at_path(&path)
        };
        log::debug!("[Pdfium] 尝试加载: {:?}", lib_path);

        if let Ok(bindings) = Pdfium::bind_to_library(&lib_path) {
            log::info!("[Pdfium] 成功从 {:?} 加载 pdfium", lib_path);
            return Ok(Pdfium::new(bindings));
        }
    }

    log::debug!("[Pdfium] 尝试加载系统 pdfium 库");
    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|e| format!("{}。请设置 {} 或将 pdfium 放到 libs 目录", e, PDFIUM_PATH_ENV))
}

/// 进程内共享的 pdfium 实例
///
/// 第一次调用时绑定；绑定失败的结果同样被缓存，后续调用直接返回同一错误。
pub fn shared(explicit: Option<&Path>) -> RenderResult<Arc<NativeHandle<PdfiumLibrary>>> {
    SHARED
        .get_or_init(|| {
            bind_pdfium(explicit).map(|pdfium| Arc::new(NativeHandle::new(PdfiumLibrary::new(pdfium))))
        })
        .clone()
        .map_err(RenderError::LibraryUnavailable)
}

/// 绑定好的 pdfium
pub struct PdfiumLibrary {
    pdfium: Pdfium,
}

impl PdfiumLibrary {
    pub fn new(pdfium: Pdfium) -> Self {
        Self { pdfium }
    }
}

fn map_load_error(err: PdfiumError) -> RenderError {
    match err {
        PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError) => {
            RenderError::Password
        }
        other => RenderError::DocumentLoad(other.to_string()),
    }
}

impl NativeLibrary for PdfiumLibrary {
    fn load<'a>(
        &'a self,
        source: &DocumentSource,
        password: Option<&'a str>,
    ) -> RenderResult<Box<dyn NativeDocument + 'a>> {
        let document = match source {
            DocumentSource::Path(path) => self.pdfium.load_pdf_from_file(path, password),
            // pdfium 需要在文档存活期间访问缓冲区，这里复制一份交给文档持有，
            // 调用方的缓冲区只在本次调用期间被借用
            DocumentSource::Bytes(data) => self.pdfium.load_pdf_from_byte_vec(data.to_vec(), password),
        }
        .map_err(map_load_error)?;

        Ok(Box::new(PdfiumDocument { document }))
    }
}

struct PdfiumDocument<'a> {
    document: PdfDocument<'a>,
}

impl NativeDocument for PdfiumDocument<'_> {
    fn page_count(&self) -> usize {
        self.document.pages().len() as usize
    }

    fn page(&self, index: usize) -> RenderResult<Box<dyn NativePage + '_>> {
        let page_index = PdfPageIndex::try_from(index)
            .map_err(|_| RenderError::native(index, "页码超出 pdfium 支持范围"))?;
        let page = self
            .document
            .pages()
            .get(page_index)
            .map_err(|e| RenderError::native(index, format!("获取页面失败: {}", e)))?;
        Ok(Box::new(PdfiumPage { page, index }))
    }
}

struct PdfiumPage<'a> {
    page: PdfPage<'a>,
    index: usize,
}

impl PdfiumPage<'_> {
    fn covers_page(&self, object: &PdfPageObject) -> bool {
        let (Ok(width), Ok(height)) = (object.width(), object.height()) else {
            return false;
        };
        (width.value - self.page.width().value).abs() <= FULL_PAGE_TOLERANCE_PT
            && (height.value - self.page.height().value).abs() <= FULL_PAGE_TOLERANCE_PT
    }
}

impl NativePage for PdfiumPage<'_> {
    fn size(&self) -> PageSize {
        PageSize {
            width_pt: self.page.width().value,
            height_pt: self.page.height().value,
        }
    }

    fn single_image(&self) -> RenderResult<Option<DynamicImage>> {
        let objects = self.page.objects();
        if objects.len() != 1 {
            return Ok(None);
        }

        let object = objects
            .get(0)
            .map_err(|e| RenderError::native(self.index, format!("读取页面对象失败: {}", e)))?;
        let Some(image_object) = object.as_image_object() else {
            return Ok(None);
        };
        if !self.covers_page(&object) {
            return Ok(None);
        }

        image_object
            .get_raw_image()
            .map(Some)
            .map_err(|e| RenderError::native(self.index, format!("读取内嵌图片失败: {}", e)))
    }

    /// pdfium-render 自行分配位图内存，渲染结果需要逐行写入调用方的缓冲区
    /// （行宽可能不同），之后由 `copy_into` 完成唯一一次格式转换。
    /// 位图比缓冲区小时，未覆盖的行和列保留缓冲区预先填充的白色。
    fn rasterize(&self, target: &mut PixelBuffer) -> RenderResult<()> {
        let info = *target.info();
        let config = PdfRenderConfig::new()
            .set_target_size(info.width as i32, info.height as i32)
            .set_format(PdfBitmapFormat::BGR)
            .set_clear_color(PdfColor::WHITE);

        let bitmap = self
            .page
            .render_with_config(&config)
            .map_err(|e| RenderError::native(self.index, format!("渲染页面失败: {}", e)))?;

        let raw = bitmap.as_raw_bytes();
        let width = bitmap.width() as u32;
        let height = bitmap.height() as u32;
        let stride = if height == 0 { 0 } else { raw.len() / height as usize };
        let source_info = PixelInfo::with_stride(width, height, SubPixelType::Bgr, stride);
        target.write_rows(&raw, &source_info)
    }
}
