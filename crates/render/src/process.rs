//! 基于子进程的 worker
//!
//! 每个 worker 是一个独立的 `folio-worker` 进程，通过 stdin/stdout 上的帧协议通信，
//! stderr 直接继承给宿主用于日志。回复由后台线程读取并通过 flume 通道转交，
//! 这样等待回复时可以设置超时，超时的 worker 被强制结束。

use std::ffi::OsString;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError};

use crate::error::{RenderError, RenderResult};
use crate::pool::{WorkerChannel, WorkerSpawner};
use crate::protocol::{self, WorkerReply, WorkerRequest};

/// 默认单个任务的超时时间
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(60);

/// 关闭时等待 worker 自行退出的时间
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// worker 进程的环境变量，值为 worker 编号
pub const WORKER_ID_ENV: &str = "FOLIO_WORKER_ID";

pub struct ProcessSpawner {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
    job_timeout: Duration,
}

impl ProcessSpawner {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            envs: Vec::new(),
            job_timeout: DEFAULT_JOB_TIMEOUT,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }
}

impl WorkerSpawner for ProcessSpawner {
    fn spawn(&self, id: usize) -> RenderResult<Box<dyn WorkerChannel>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .env(WORKER_ID_ENV, id.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                RenderError::transport(format!("无法启动 worker {:?}: {}", self.program, e))
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(RenderError::transport("worker 管道不可用"));
        };

        let (tx, replies) = flume::unbounded();
        let reader = std::thread::Builder::new()
            .name(format!("folio-worker-{}", id))
            .spawn(move || {
                let mut stdout = BufReader::new(stdout);
                loop {
                    let reply = protocol::read_reply(&mut stdout);
                    let failed = reply.is_err();
                    if tx.send(reply).is_err() || failed {
                        break;
                    }
                }
            });
        if let Err(e) = reader {
            let _ = child.kill();
            let _ = child.wait();
            return Err(RenderError::transport(format!("无法创建读取线程: {}", e)));
        }

        log::info!("[WorkerPool] 启动 worker #{} (pid {})", id, child.id());
        Ok(Box::new(ProcessChannel {
            id,
            child,
            stdin: Some(BufWriter::new(stdin)),
            replies,
            job_timeout: self.job_timeout,
        }))
    }
}

struct ProcessChannel {
    id: usize,
    child: Child,
    stdin: Option<BufWriter<ChildStdin>>,
    replies: Receiver<RenderResult<WorkerReply>>,
    job_timeout: Duration,
}

impl ProcessChannel {
    fn kill(&mut self) {
        self.stdin = None;
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl WorkerChannel for ProcessChannel {
    fn call(&mut self, request: &WorkerRequest) -> RenderResult<WorkerReply> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| RenderError::transport(format!("worker #{} 已关闭", self.id)))?;
        protocol::write_request(stdin, request)?;

        match self.replies.recv_timeout(self.job_timeout) {
            Ok(reply) => reply,
            Err(RecvTimeoutError::Timeout) => {
                log::error!(
                    "[WorkerPool] worker #{} 超过 {:?} 未回复，强制结束",
                    self.id,
                    self.job_timeout
                );
                self.kill();
                Err(RenderError::transport(format!(
                    "worker #{} 超时 ({:?})",
                    self.id, self.job_timeout
                )))
            }
            Err(RecvTimeoutError::Disconnected) => Err(RenderError::transport(format!(
                "worker #{} 已退出",
                self.id
            ))),
        }
    }

    fn is_alive(&mut self) -> bool {
        self.stdin.is_some() && matches!(self.child.try_wait(), Ok(None))
    }

    fn shutdown(&mut self) {
        let Some(mut stdin) = self.stdin.take() else {
            return;
        };
        // 写入失败说明进程已经退出，下面的 wait 会直接返回
        let _ = protocol::write_request(&mut stdin, &WorkerRequest::Shutdown);
        drop(stdin);

        let deadline = Instant::now() + SHUTDOWN_GRACE;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    log::debug!("[WorkerPool] worker #{} 已退出: {}", self.id, status);
                    return;
                }
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(10));
                }
                _ => {
                    log::warn!("[WorkerPool] worker #{} 未按时退出，强制结束", self.id);
                    self.kill();
                    return;
                }
            }
        }
    }
}

impl Drop for ProcessChannel {
    fn drop(&mut self) {
        self.shutdown();
    }
}
