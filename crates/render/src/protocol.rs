//! 宿主与 worker 进程之间的通信格式
//!
//! 每个帧为 `u32` 小端长度 + 数据。一条消息由两个帧组成：JSON 头部和消息体
//! （可以为空）。渲染请求的消息体是内联的 PDF 数据，页面回复的消息体是 PNG。

use std::io::{self, Read, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{FailureKind, RemoteFailure, RenderError, RenderResult};
use crate::native::DocumentSource;
use crate::size::RenderSize;
use crate::types::PageOrigin;

/// 单帧最大长度
pub const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

/// 一次单页渲染任务
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub source: DocumentSource,
    pub page_index: usize,
    pub size: RenderSize,
}

#[derive(Debug, Clone)]
pub enum WorkerRequest {
    Render(RenderJob),
    Shutdown,
}

/// 编码为 PNG 的页面
#[derive(Debug, Clone, PartialEq)]
pub struct PageReply {
    pub page_count: usize,
    pub page_index: usize,
    pub x_dpi: u32,
    pub y_dpi: u32,
    pub origin: PageOrigin,
    pub png: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerReply {
    Page(PageReply),
    /// 请求的页码不小于文档页数
    NoPage { page_count: usize },
    Failed(RemoteFailure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
enum SourceKind {
    Path,
    Inline,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum RequestHeader {
    #[serde(rename_all = "camelCase")]
    Render {
        source: SourceKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<PathBuf>,
        page_index: usize,
        size: RenderSize,
    },
    Shutdown,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ReplyHeader {
    #[serde(rename_all = "camelCase")]
    Page {
        page_count: usize,
        page_index: usize,
        x_dpi: u32,
        y_dpi: u32,
        origin: PageOrigin,
    },
    #[serde(rename_all = "camelCase")]
    NoPage { page_count: usize },
    #[serde(rename_all = "camelCase")]
    Failed {
        kind: FailureKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        page: Option<usize>,
        message: String,
    },
}

pub fn write_frame<W: Write>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    if data.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("帧过大: {} 字节", data.len()),
        ));
    }
    writer.write_all(&(data.len() as u32).to_le_bytes())?;
    writer.write_all(data)
}

/// 读取一帧；在帧边界遇到 EOF 时返回 `None`
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut len_bytes = [0u8; 4];
    let mut filled = 0;
    while filled < len_bytes.len() {
        match reader.read(&mut len_bytes[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("帧长度 {} 超出上限", len),
        ));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;
    Ok(Some(data))
}

/// 检查消息体能否装入一帧
fn check_body_len(len: usize) -> RenderResult<()> {
    if len > MAX_FRAME_LEN {
        return Err(RenderError::Unsupported(format!(
            "数据过大: {} 字节，上限 {} 字节",
            len, MAX_FRAME_LEN
        )));
    }
    Ok(())
}

/// 两个帧都通过长度检查后才开始写入，避免在管道上留下半条消息
fn write_message<W: Write, H: Serialize>(writer: &mut W, header: &H, body: &[u8]) -> RenderResult<()> {
    check_body_len(body.len())?;
    let header = serde_json::to_vec(header)
        .map_err(|e| RenderError::transport(format!("序列化消息头失败: {}", e)))?;
    check_body_len(header.len())?;
    write_frame(writer, &header)
        .and_then(|_| write_frame(writer, body))
        .and_then(|_| writer.flush())
        .map_err(|e| RenderError::transport(format!("写入消息失败: {}", e)))
}

fn read_message<R: Read, H: for<'de> Deserialize<'de>>(reader: &mut R) -> RenderResult<Option<(H, Vec<u8>)>> {
    let io_error = |e: io::Error| RenderError::transport(format!("读取消息失败: {}", e));

    let Some(header) = read_frame(reader).map_err(io_error)? else {
        return Ok(None);
    };
    let body = read_frame(reader)
        .map_err(io_error)?
        .ok_or_else(|| RenderError::transport("消息体缺失"))?;
    let header = serde_json::from_slice(&header)
        .map_err(|e| RenderError::transport(format!("无法解析消息头: {}", e)))?;
    Ok(Some((header, body)))
}

pub fn write_request<W: Write>(writer: &mut W, request: &WorkerRequest) -> RenderResult<()> {
    match request {
        WorkerRequest::Render(job) => {
            let (source, path, body) = match &job.source {
                DocumentSource::Path(path) => (SourceKind::Path, Some(path.clone()), &[][..]),
                DocumentSource::Bytes(data) => (SourceKind::Inline, None, &data[..]),
            };
            let header = RequestHeader::Render {
                source,
                path,
                page_index: job.page_index,
                size: job.size,
            };
            write_message(writer, &header, body)
        }
        WorkerRequest::Shutdown => write_message(writer, &RequestHeader::Shutdown, &[]),
    }
}

/// 读取下一条请求；输入关闭时返回 `None`
pub fn read_request<R: Read>(reader: &mut R) -> RenderResult<Option<WorkerRequest>> {
    let Some((header, body)) = read_message::<_, RequestHeader>(reader)? else {
        return Ok(None);
    };

    let request = match header {
        RequestHeader::Render {
            source,
            path,
            page_index,
            size,
        } => {
            let source = match (source, path) {
                (SourceKind::Path, Some(path)) => DocumentSource::Path(path),
                (SourceKind::Path, None) => {
                    return Err(RenderError::transport("路径请求缺少 path 字段"))
                }
                (SourceKind::Inline, _) => DocumentSource::from_bytes(body),
            };
            WorkerRequest::Render(RenderJob {
                source,
                page_index,
                size,
            })
        }
        RequestHeader::Shutdown => WorkerRequest::Shutdown,
    };
    Ok(Some(request))
}

pub fn write_reply<W: Write>(writer: &mut W, reply: &WorkerReply) -> RenderResult<()> {
    match reply {
        WorkerReply::Page(page) => {
            let header = ReplyHeader::Page {
                page_count: page.page_count,
                page_index: page.page_index,
                x_dpi: page.x_dpi,
                y_dpi: page.y_dpi,
                origin: page.origin,
            };
            write_message(writer, &header, &page.png)
        }
        WorkerReply::NoPage { page_count } => write_message(
            writer,
            &ReplyHeader::NoPage {
                page_count: *page_count,
            },
            &[],
        ),
        WorkerReply::Failed(failure) => {
            let header = ReplyHeader::Failed {
                kind: failure.kind,
                page: failure.page,
                message: failure.message.clone(),
            };
            write_message(writer, &header, &[])
        }
    }
}

/// 读取一条回复；worker 在回复前关闭输出视为传输失败
pub fn read_reply<R: Read>(reader: &mut R) -> RenderResult<WorkerReply> {
    let (header, body) = read_message::<_, ReplyHeader>(reader)?
        .ok_or_else(|| RenderError::transport("worker 在回复前关闭了输出"))?;

    Ok(match header {
        ReplyHeader::Page {
            page_count,
            page_index,
            x_dpi,
            y_dpi,
            origin,
        } => WorkerReply::Page(PageReply {
            page_count,
            page_index,
            x_dpi,
            y_dpi,
            origin,
            png: body,
        }),
        ReplyHeader::NoPage { page_count } => WorkerReply::NoPage { page_count },
        ReplyHeader::Failed {
            kind,
            page,
            message,
        } => WorkerReply::Failed(RemoteFailure {
            kind,
            page,
            message,
        }),
    })
}
