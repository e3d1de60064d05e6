//! 渲染配置
//!
//! 配置文件中的值可以被环境变量覆盖，方便在部署时调整而不修改配置文件。

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;
use crate::process::DEFAULT_JOB_TIMEOUT;

const DEFAULT_MAX_WORKERS: usize = 4;

pub const BACKEND_ENV: &str = "FOLIO_RENDER_BACKEND";
pub const WORKERS_ENV: &str = "FOLIO_RENDER_WORKERS";
pub const WORKER_PATH_ENV: &str = "FOLIO_WORKER_PATH";
pub const JOB_TIMEOUT_ENV: &str = "FOLIO_JOB_TIMEOUT_MS";

/// worker 可执行文件名
#[cfg(windows)]
pub const WORKER_EXE: &str = "folio-worker.exe";
#[cfg(not(windows))]
pub const WORKER_EXE: &str = "folio-worker";

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RenderConfig {
    /// 渲染后端
    pub backend: BackendKind,
    /// worker 进程数量
    pub worker_count: Option<usize>,
    /// worker 可执行文件路径
    pub worker_path: Option<PathBuf>,
    /// 单页任务超时（毫秒）
    pub job_timeout_ms: Option<u64>,
    /// pdfium 动态库所在目录或文件
    pub pdfium_library_path: Option<PathBuf>,
}

fn default_worker_count() -> usize {
    let available = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(DEFAULT_MAX_WORKERS);
    available.min(DEFAULT_MAX_WORKERS).max(1)
}

fn parse_usize(value: Option<String>) -> Option<usize> {
    value?.trim().parse::<usize>().ok()
}

impl RenderConfig {
    pub fn worker_count(&self) -> usize {
        self.worker_count
            .filter(|n| *n > 0)
            .unwrap_or_else(default_worker_count)
    }

    pub fn job_timeout(&self) -> Duration {
        self.job_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_JOB_TIMEOUT)
    }

    /// worker 可执行文件，默认与当前程序放在同一目录
    pub fn worker_path(&self) -> PathBuf {
        if let Some(path) = &self.worker_path {
            return path.clone();
        }
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(WORKER_EXE)))
            .unwrap_or_else(|| PathBuf::from(WORKER_EXE))
    }

    /// 用 `lookup` 提供的值覆盖配置，无法解析的值被忽略
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(BACKEND_ENV) {
            match raw.parse::<BackendKind>() {
                Ok(kind) => self.backend = kind,
                Err(err) => log::warn!("[Config] 忽略 {}: {}", BACKEND_ENV, err),
            }
        }
        if let Some(count) = parse_usize(lookup(WORKERS_ENV)).filter(|n| *n > 0) {
            self.worker_count = Some(count);
        }
        if let Some(path) = lookup(WORKER_PATH_ENV).filter(|p| !p.trim().is_empty()) {
            self.worker_path = Some(PathBuf::from(path));
        }
        if let Some(ms) = parse_usize(lookup(JOB_TIMEOUT_ENV)).filter(|n| *n > 0) {
            self.job_timeout_ms = Some(ms as u64);
        }
    }

    /// 应用进程环境变量中的覆盖项
    pub fn with_env_overrides(mut self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RenderConfig::default();
        assert_eq!(config.backend, BackendKind::Auto);
        assert!((1..=DEFAULT_MAX_WORKERS).contains(&config.worker_count()));
        assert_eq!(config.job_timeout(), Duration::from_secs(60));
        assert!(config.worker_path().ends_with(WORKER_EXE));
    }

    #[test]
    fn test_camel_case_json() {
        let config: RenderConfig = serde_json::from_str(
            r#"{"backend":"workers","workerCount":3,"jobTimeoutMs":1500}"#,
        )
        .unwrap();
        assert_eq!(config.backend, BackendKind::Workers);
        assert_eq!(config.worker_count(), 3);
        assert_eq!(config.job_timeout(), Duration::from_millis(1500));
        assert_eq!(config.pdfium_library_path, None);
    }

    #[test]
    fn test_env_overrides_win() {
        let mut config = RenderConfig {
            backend: BackendKind::Workers,
            worker_count: Some(2),
            ..Default::default()
        };
        config.apply_overrides(lookup(&[
            (BACKEND_ENV, "in-process"),
            (WORKERS_ENV, "6"),
            (WORKER_PATH_ENV, "/opt/folio/folio-worker"),
            (JOB_TIMEOUT_ENV, "250"),
        ]));

        assert_eq!(config.backend, BackendKind::InProcess);
        assert_eq!(config.worker_count(), 6);
        assert_eq!(config.worker_path(), PathBuf::from("/opt/folio/folio-worker"));
        assert_eq!(config.job_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_overrides_are_ignored() {
        let mut config = RenderConfig {
            worker_count: Some(2),
            ..Default::default()
        };
        config.apply_overrides(lookup(&[
            (BACKEND_ENV, "gpu"),
            (WORKERS_ENV, "0"),
            (JOB_TIMEOUT_ENV, "soon"),
        ]));

        assert_eq!(config, RenderConfig {
            worker_count: Some(2),
            ..Default::default()
        });
    }
}
