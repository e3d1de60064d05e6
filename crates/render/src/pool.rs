//! worker 进程池
//!
//! 固定容量，按需创建 worker（或通过 [`WorkerPool::warm_up`] 预先创建）。
//! 每个 worker 同一时间只处理一个任务；所有 worker 都忙时 [`WorkerPool::acquire`]
//! 阻塞等待。失效的 worker 在归还时被丢弃并立即补充，池子始终回到满容量。
//!
//! ```text
//! acquire() → WorkerLease ──call()──→ drop()
//!    │                                  │
//!  [idle.pop / spawn]        [健康: 回到 idle | 失效: 关闭并补充]
//! ```

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::error::{RenderError, RenderResult};
use crate::protocol::{WorkerReply, WorkerRequest};

/// 与单个 worker 的双向通道
pub trait WorkerChannel: Send {
    /// 发送请求并等待回复
    fn call(&mut self, request: &WorkerRequest) -> RenderResult<WorkerReply>;

    /// worker 是否仍然存活（例如进程尚未退出）
    fn is_alive(&mut self) -> bool;

    /// 通知 worker 退出并回收资源，可重复调用
    fn shutdown(&mut self);
}

/// 创建 worker
pub trait WorkerSpawner: Send + Sync {
    fn spawn(&self, id: usize) -> RenderResult<Box<dyn WorkerChannel>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Busy,
    Dead,
}

pub struct Worker {
    id: usize,
    channel: Box<dyn WorkerChannel>,
    state: WorkerState,
}

impl Worker {
    fn new(id: usize, channel: Box<dyn WorkerChannel>) -> Self {
        Self {
            id,
            channel,
            state: WorkerState::Idle,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// 发送一个请求；传输失败时 worker 被标记为失效
    pub fn call(&mut self, request: &WorkerRequest) -> RenderResult<WorkerReply> {
        let result = self.channel.call(request);
        if let Err(err) = &result {
            if err.kills_worker() {
                self.state = WorkerState::Dead;
            }
        }
        result
    }

    pub fn mark_dead(&mut self) {
        self.state = WorkerState::Dead;
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish()
    }
}

/// 池统计
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    /// 存活的 worker（空闲 + 忙碌 + 正在创建）
    pub live: usize,
    pub idle: usize,
    pub busy: usize,
    /// 因失效而被替换的 worker 总数
    pub replaced: usize,
}

struct PoolState {
    idle: Vec<Worker>,
    live: usize,
    closed: bool,
}

pub struct WorkerPool {
    spawner: Box<dyn WorkerSpawner>,
    capacity: usize,
    state: Mutex<PoolState>,
    idle_ready: Condvar,
    next_id: AtomicUsize,
    replaced: AtomicUsize,
}

impl WorkerPool {
    pub fn new(spawner: Box<dyn WorkerSpawner>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            spawner,
            capacity,
            state: Mutex::new(PoolState {
                idle: Vec::with_capacity(capacity),
                live: 0,
                closed: false,
            }),
            idle_ready: Condvar::new(),
            next_id: AtomicUsize::new(0),
            replaced: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn spawn_worker(&self) -> RenderResult<Worker> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let channel = self.spawner.spawn(id)?;
        log::debug!("[WorkerPool] worker #{} 已启动", id);
        Ok(Worker::new(id, channel))
    }

    /// 预先创建全部 worker
    pub fn warm_up(&self) -> RenderResult<()> {
        loop {
            {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(RenderError::transport("worker 池已关闭"));
                }
                if state.live >= self.capacity {
                    return Ok(());
                }
                state.live += 1;
            }

            match self.spawn_worker() {
                Ok(worker) => self.put_idle(worker),
                Err(err) => {
                    self.forget_slot();
                    return Err(err);
                }
            }
        }
    }

    /// 取得一个空闲 worker，所有 worker 都忙时阻塞
    pub fn acquire(&self) -> RenderResult<WorkerLease<'_>> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(RenderError::transport("worker 池已关闭"));
            }

            if let Some(mut worker) = state.idle.pop() {
                drop(state);
                if worker.channel.is_alive() {
                    worker.state = WorkerState::Busy;
                    return Ok(WorkerLease::new(self, worker));
                }

                log::warn!("[WorkerPool] 空闲的 worker #{} 已退出，丢弃", worker.id);
                worker.channel.shutdown();
                self.replaced.fetch_add(1, Ordering::Relaxed);
                self.forget_slot();
                state = self.state.lock();
                continue;
            }

            if state.live < self.capacity {
                state.live += 1;
                drop(state);
                return match self.spawn_worker() {
                    Ok(mut worker) => {
                        worker.state = WorkerState::Busy;
                        Ok(WorkerLease::new(self, worker))
                    }
                    Err(err) => {
                        log::error!("[WorkerPool] 启动 worker 失败: {}", err);
                        self.forget_slot();
                        Err(err)
                    }
                };
            }

            self.idle_ready.wait(&mut state);
        }
    }

    /// 借出一个 worker 执行 `f`，无论结果如何都会归还
    ///
    /// `f` 返回的错误如果意味着 worker 已不可信（见 [`RenderError::kills_worker`]），
    /// 该 worker 被替换。
    pub fn use_worker<T, F>(&self, f: F) -> RenderResult<T>
    where
        F: FnOnce(&mut Worker) -> RenderResult<T>,
    {
        let mut lease = self.acquire()?;
        let result = f(&mut *lease);
        if let Err(err) = &result {
            if err.kills_worker() {
                lease.mark_dead();
            }
        }
        result
    }

    fn release(&self, mut worker: Worker) {
        let healthy = worker.state != WorkerState::Dead && worker.channel.is_alive();
        if healthy {
            worker.state = WorkerState::Idle;
            self.put_idle(worker);
            return;
        }

        log::warn!("[WorkerPool] worker #{} 已失效，替换", worker.id);
        worker.channel.shutdown();
        drop(worker);
        self.replaced.fetch_add(1, Ordering::Relaxed);

        if self.state.lock().closed {
            self.forget_slot();
            return;
        }
        match self.spawn_worker() {
            Ok(replacement) => self.put_idle(replacement),
            Err(err) => {
                // 下一次 acquire 会再次尝试创建
                log::error!("[WorkerPool] 补充 worker 失败: {}", err);
                self.forget_slot();
            }
        }
    }

    fn put_idle(&self, mut worker: Worker) {
        let mut state = self.state.lock();
        if state.closed {
            state.live -= 1;
            drop(state);
            worker.channel.shutdown();
            return;
        }
        state.idle.push(worker);
        drop(state);
        self.idle_ready.notify_one();
    }

    fn forget_slot(&self) {
        self.state.lock().live -= 1;
        self.idle_ready.notify_one();
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            capacity: self.capacity,
            live: state.live,
            idle: state.idle.len(),
            busy: state.live - state.idle.len(),
            replaced: self.replaced.load(Ordering::Relaxed),
        }
    }

    /// 关闭所有空闲 worker；借出中的 worker 在归还时关闭
    pub fn shutdown(&self) {
        let idle = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let idle = std::mem::take(&mut state.idle);
            state.live -= idle.len();
            idle
        };
        self.idle_ready.notify_all();

        log::info!("[WorkerPool] 关闭 {} 个空闲 worker", idle.len());
        for mut worker in idle {
            worker.channel.shutdown();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// 借出的 worker，drop 时归还
pub struct WorkerLease<'a> {
    pool: &'a WorkerPool,
    worker: Option<Worker>,
}

impl<'a> WorkerLease<'a> {
    fn new(pool: &'a WorkerPool, worker: Worker) -> Self {
        Self {
            pool,
            worker: Some(worker),
        }
    }
}

impl Deref for WorkerLease<'_> {
    type Target = Worker;

    fn deref(&self) -> &Worker {
        // worker 只在 drop 中被取出
        self.worker.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for WorkerLease<'_> {
    fn deref_mut(&mut self) -> &mut Worker {
        self.worker.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for WorkerLease<'_> {
    fn drop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            if std::thread::panicking() {
                worker.mark_dead();
            }
            self.pool.release(worker);
        }
    }
}
