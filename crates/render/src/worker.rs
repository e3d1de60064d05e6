//! worker 进程的服务循环
//!
//! 从输入读取请求，用进程内渲染器逐个处理，把结果编码为 PNG 写回输出。
//! 输入关闭或收到关闭请求时正常返回。

use std::io::{Cursor, Read, Write};

use image::ImageFormat;

use crate::error::{RemoteFailure, RenderError, RenderResult};
use crate::in_process::InProcessRenderer;
use crate::native::NativeLibrary;
use crate::protocol::{self, PageReply, RenderJob, WorkerReply, WorkerRequest};
use crate::types::RenderedPage;

/// 处理请求直到输入关闭，返回处理的任务数
pub fn serve<L, R, W>(renderer: &InProcessRenderer<L>, input: &mut R, output: &mut W) -> RenderResult<usize>
where
    L: NativeLibrary,
    R: Read,
    W: Write,
{
    let mut handled = 0;
    while let Some(request) = protocol::read_request(input)? {
        match request {
            WorkerRequest::Render(job) => {
                let reply = handle(renderer, &job);
                protocol::write_reply(output, &reply)?;
                handled += 1;
            }
            WorkerRequest::Shutdown => {
                log::info!("[Worker] 收到关闭请求");
                break;
            }
        }
    }
    log::debug!("[Worker] 共处理 {} 个任务", handled);
    Ok(handled)
}

/// 渲染库不可用时的服务循环：对每个任务回复同一个失败
pub fn refuse<R: Read, W: Write>(error: &RenderError, input: &mut R, output: &mut W) -> RenderResult<usize> {
    let reply = WorkerReply::Failed(RemoteFailure::from(error));
    let mut refused = 0;
    while let Some(request) = protocol::read_request(input)? {
        match request {
            WorkerRequest::Render(_) => {
                protocol::write_reply(output, &reply)?;
                refused += 1;
            }
            WorkerRequest::Shutdown => break,
        }
    }
    Ok(refused)
}

/// 处理单个渲染任务，错误转换为失败回复
pub fn handle<L: NativeLibrary>(renderer: &InProcessRenderer<L>, job: &RenderJob) -> WorkerReply {
    log::debug!(
        "[Worker] 渲染 {:?} 第 {} 页, 尺寸 {:?}",
        job.source,
        job.page_index,
        job.size
    );

    let result = renderer
        .render_page(&job.source, job.page_index, job.size, None)
        .and_then(|(page_count, page)| match page {
            Some(page) => encode(page_count, &page, protocol::MAX_FRAME_LEN).map(WorkerReply::Page),
            None => Ok(WorkerReply::NoPage { page_count }),
        });

    result.unwrap_or_else(|err| {
        log::warn!("[Worker] 第 {} 页失败: {}", job.page_index, err);
        WorkerReply::Failed(RemoteFailure::from(&err))
    })
}

fn encode(page_count: usize, page: &RenderedPage, max_len: usize) -> RenderResult<PageReply> {
    let mut png = Cursor::new(Vec::new());
    page.image
        .write_to(&mut png, ImageFormat::Png)
        .map_err(|e| RenderError::Conversion(format!("PNG 编码失败: {}", e)))?;
    // 超出帧上限的图像无法发送，作为失败回复而不是中断服务循环
    if png.get_ref().len() > max_len {
        return Err(RenderError::Unsupported(format!(
            "第 {} 页图像过大: PNG {} 字节，上限 {} 字节",
            page.page_index,
            png.get_ref().len(),
            max_len
        )));
    }

    Ok(PageReply {
        page_count,
        page_index: page.page_index,
        x_dpi: page.x_dpi,
        y_dpi: page.y_dpi,
        origin: page.origin,
        png: png.into_inner(),
    })
}
