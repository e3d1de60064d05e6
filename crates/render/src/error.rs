//! 渲染错误类型

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("文档加载失败: {0}")]
    DocumentLoad(String),

    #[error("文档已加密，密码缺失或错误")]
    Password,

    #[error("不支持的操作: {0}")]
    Unsupported(String),

    #[error("第 {page} 页渲染失败: {reason}")]
    NativeRender { page: usize, reason: String },

    #[error("渲染进程通信失败: {0}")]
    WorkerTransport(String),

    #[error("Pdfium 库不可用: {0}")]
    LibraryUnavailable(String),

    #[error("像素格式转换失败: {0}")]
    Conversion(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

pub type RenderResult<T> = Result<T, RenderError>;

impl RenderError {
    pub fn native(page: usize, reason: impl Into<String>) -> Self {
        Self::NativeRender {
            page,
            reason: reason.into(),
        }
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::WorkerTransport(msg.into())
    }

    /// 调用方可以直接重新发起同一请求（由新的 worker 处理）
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::WorkerTransport(_))
    }

    /// 出现该错误后 worker 不可再复用，需要替换
    pub fn kills_worker(&self) -> bool {
        matches!(self, Self::WorkerTransport(_) | Self::NativeRender { .. })
    }
}

/// 跨进程传输的失败类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    DocumentLoad,
    Password,
    Unsupported,
    NativeRender,
    LibraryUnavailable,
    Conversion,
    Other,
}

/// worker 回传的错误描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFailure {
    pub kind: FailureKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
    pub message: String,
}

impl From<&RenderError> for RemoteFailure {
    fn from(err: &RenderError) -> Self {
        let (kind, page, message) = match err {
            RenderError::DocumentLoad(msg) => (FailureKind::DocumentLoad, None, msg.clone()),
            RenderError::Password => (FailureKind::Password, None, err.to_string()),
            RenderError::Unsupported(msg) => (FailureKind::Unsupported, None, msg.clone()),
            RenderError::NativeRender { page, reason } => {
                (FailureKind::NativeRender, Some(*page), reason.clone())
            }
            RenderError::LibraryUnavailable(msg) => (FailureKind::LibraryUnavailable, None, msg.clone()),
            RenderError::Conversion(msg) => (FailureKind::Conversion, None, msg.clone()),
            other => (FailureKind::Other, None, other.to_string()),
        };
        Self {
            kind,
            page,
            message,
        }
    }
}

impl From<RemoteFailure> for RenderError {
    fn from(failure: RemoteFailure) -> Self {
        match failure.kind {
            FailureKind::DocumentLoad => RenderError::DocumentLoad(failure.message),
            FailureKind::Password => RenderError::Password,
            FailureKind::Unsupported => RenderError::Unsupported(failure.message),
            FailureKind::NativeRender => RenderError::NativeRender {
                page: failure.page.unwrap_or_default(),
                reason: failure.message,
            },
            FailureKind::LibraryUnavailable => RenderError::LibraryUnavailable(failure.message),
            FailureKind::Conversion => RenderError::Conversion(failure.message),
            // worker 内部的 IO 错误对调用方而言等同于传输失败
            FailureKind::Other => RenderError::WorkerTransport(failure.message),
        }
    }
}
