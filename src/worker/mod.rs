//! 工作线程框架 (Worker supervision framework)
//!
//! 每个工作线程依次经历四个阶段:
//! 1. init:     构造函数, 只绑定队列与配置, 不接触硬件或IO
//! 2. startup:  获取稀缺资源 (摄像头、推理运行时、文件句柄), 失败即上报 HARD_SHUTDOWN
//! 3. step:     定时触发 ([`TickWorker`]) 或 阻塞弹出后处理 ([`QueueWorker`]), 循环直到停止
//! 4. shutdown: 释放资源、关闭队列端、向下游转发哨兵
//!
//! 单步内的瞬时错误与 panic 只记录日志, 不会终止线程.
pub mod message;
pub mod queue;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::error::WorkerError;
use message::{ControlMessage, MessageKind, Payload};
use queue::{PutPolicy, QueueReceiver, QueueSender};

/// 控制消息发送端
pub type EventSender = QueueSender<ControlMessage>;
/// 控制消息接收端
pub type EventReceiver = QueueReceiver<ControlMessage>;

/// 队列型工作线程的弹出等待上限, 保证及时响应停止信号
pub const POP_TIMEOUT: Duration = Duration::from_millis(200);
/// 定时型工作线程睡眠切片
const SLEEP_SLICE: Duration = Duration::from_millis(50);
/// 控制消息推送重试
const EVENT_PUT_POLICY: PutPolicy = PutPolicy::Retry {
    backoff: Duration::from_millis(20),
    max_attempts: Some(50),
};

/// 工作线程生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Created = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
    Stopped = 4,
    Failed = 5,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Created,
            1 => WorkerState::Starting,
            2 => WorkerState::Running,
            3 => WorkerState::Stopping,
            4 => WorkerState::Stopped,
            _ => WorkerState::Failed,
        }
    }

    /// 线程是否已经结束
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerState::Stopped | WorkerState::Failed)
    }
}

/// 单步执行结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Stop,
}

/// 传递给每个阶段的上下文
pub struct WorkerContext {
    name: String,
    events: EventSender,
    stop: Arc<AtomicBool>,
}

impl WorkerContext {
    pub fn new(name: impl Into<String>, events: EventSender) -> Self {
        Self {
            name: name.into(),
            events,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// 发送控制消息; 投递失败只记录日志 (至多一次)
    pub fn send(&self, msg: ControlMessage) -> bool {
        match self.events.safe_put(msg, EVENT_PUT_POLICY) {
            Ok(()) => true,
            Err(e) => {
                let reason = e.to_string();
                warn!("⚠️ [{}] 控制消息投递失败 ({}): {}", self.name, reason, e.into_inner());
                false
            }
        }
    }

    pub fn emit(&self, kind: MessageKind, payload: Payload) -> bool {
        self.send(ControlMessage::new(self.name.clone(), kind, payload))
    }
}

/// 生命周期契约
pub trait Worker: Send + 'static {
    /// 获取稀缺资源; 返回错误将上报 HARD_SHUTDOWN 并结束线程
    fn startup(&mut self, ctx: &WorkerContext) -> Result<(), WorkerError>;

    /// 释放资源; 无论正常结束还是失败都会调用
    fn shutdown(&mut self, ctx: &WorkerContext);
}

/// 定时触发的工作线程 (如 Collector)
pub trait TickWorker: Worker {
    /// 两次 tick 之间的目标间隔
    fn interval(&self) -> Duration;

    fn tick(&mut self, ctx: &WorkerContext) -> Result<Step, WorkerError>;
}

/// 队列驱动的工作线程 (如 Detector)
pub trait QueueWorker: Worker {
    type Item: Send + 'static;

    /// 工作线程拥有的输入队列接收端
    fn queue(&self) -> &QueueReceiver<Self::Item>;

    fn handle(&mut self, item: Self::Item, ctx: &WorkerContext) -> Result<Step, WorkerError>;
}

/// 工作线程句柄 (Manager 持有)
pub struct WorkerHandle {
    name: String,
    stop: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// 请求协作式停止 (幂等)
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// 短超时轮询等待线程结束; 已经结束或已 join 时立即返回 true
    pub fn join_timeout(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match self.thread.as_ref() {
                None => return true,
                Some(t) if t.is_finished() => {
                    if let Some(t) = self.thread.take() {
                        if t.join().is_err() {
                            error!("❌ [{}] 工作线程异常退出", self.name);
                            self.state.store(WorkerState::Failed as u8, Ordering::Release);
                        }
                    }
                    return true;
                }
                Some(_) => {
                    if Instant::now() >= deadline {
                        return false;
                    }
                    std::thread::sleep(SLEEP_SLICE.min(timeout));
                }
            }
        }
    }
}

/// 启动定时型工作线程
pub fn spawn_tick_worker<W: TickWorker>(worker: W, ctx: WorkerContext) -> std::io::Result<WorkerHandle> {
    spawn(worker, ctx, run_tick_loop::<W>)
}

/// 启动队列型工作线程
pub fn spawn_queue_worker<W: QueueWorker>(worker: W, ctx: WorkerContext) -> std::io::Result<WorkerHandle> {
    spawn(worker, ctx, run_queue_loop::<W>)
}

fn spawn<W: Worker>(
    worker: W,
    ctx: WorkerContext,
    body: fn(&mut W, &WorkerContext) -> bool,
) -> std::io::Result<WorkerHandle> {
    let state = Arc::new(AtomicU8::new(WorkerState::Created as u8));
    let handle_state = Arc::clone(&state);
    let stop = Arc::clone(&ctx.stop);
    let name = ctx.name.clone();

    let thread = std::thread::Builder::new()
        .name(name.to_lowercase())
        .spawn(move || {
            let mut worker = worker;
            drive(&mut worker, &ctx, &state, body);
        })?;

    Ok(WorkerHandle {
        name,
        stop,
        state: handle_state,
        thread: Some(thread),
    })
}

/// 完整生命周期: startup → 循环 → shutdown
///
/// body 返回 false 表示因致命错误退出
fn drive<W: Worker>(
    worker: &mut W,
    ctx: &WorkerContext,
    state: &AtomicU8,
    body: fn(&mut W, &WorkerContext) -> bool,
) {
    let set = |s: WorkerState| state.store(s as u8, Ordering::Release);

    set(WorkerState::Starting);
    info!("🚀 [{}] 启动中", ctx.name);
    let started = match catch_unwind(AssertUnwindSafe(|| worker.startup(ctx))) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            error!("❌ [{}] 启动失败: {}", ctx.name, e);
            ctx.emit(MessageKind::HardShutdown, Payload::Text(e.to_string()));
            false
        }
        Err(_) => {
            error!("❌ [{}] 启动时 panic", ctx.name);
            ctx.emit(MessageKind::HardShutdown, Payload::Text(String::from("startup panicked")));
            false
        }
    };

    let clean = if started {
        set(WorkerState::Running);
        info!("✅ [{}] 运行中", ctx.name);
        body(worker, ctx)
    } else {
        false
    };

    set(WorkerState::Stopping);
    if catch_unwind(AssertUnwindSafe(|| worker.shutdown(ctx))).is_err() {
        error!("❌ [{}] 关闭时 panic", ctx.name);
    }
    set(if clean { WorkerState::Stopped } else { WorkerState::Failed });
    info!("🛑 [{}] 已停止", ctx.name);
}

/// 处理单步结果; 返回 Some(clean) 表示退出循环
fn settle(ctx: &WorkerContext, outcome: std::thread::Result<Result<Step, WorkerError>>) -> Option<bool> {
    match outcome {
        Ok(Ok(Step::Continue)) => None,
        Ok(Ok(Step::Stop)) => Some(true),
        Ok(Err(WorkerError::Disconnected(what))) => {
            info!("🔌 [{}] 队列已关闭 ({}), 停止", ctx.name, what);
            Some(true)
        }
        Ok(Err(e)) if e.is_fatal() => {
            error!("❌ [{}] 致命错误: {}", ctx.name, e);
            ctx.emit(MessageKind::HardShutdown, Payload::Text(e.to_string()));
            Some(false)
        }
        Ok(Err(e)) => {
            warn!("⚠️ [{}] {} ({}), 继续", ctx.name, e, e.as_label());
            None
        }
        Err(_) => {
            error!("❌ [{}] 单步 panic, 继续", ctx.name);
            None
        }
    }
}

fn run_tick_loop<W: TickWorker>(worker: &mut W, ctx: &WorkerContext) -> bool {
    let interval = worker.interval();
    while !ctx.stop_requested() {
        let tick_start = Instant::now();
        if let Some(clean) = settle(ctx, catch_unwind(AssertUnwindSafe(|| worker.tick(ctx)))) {
            return clean;
        }
        // 按切片睡眠, 及时响应停止信号
        while let Some(remaining) = interval.checked_sub(tick_start.elapsed()) {
            if remaining.is_zero() || ctx.stop_requested() {
                break;
            }
            std::thread::sleep(remaining.min(SLEEP_SLICE));
        }
    }
    debug!("[{}] 收到停止信号", ctx.name);
    true
}

fn run_queue_loop<W: QueueWorker>(worker: &mut W, ctx: &WorkerContext) -> bool {
    while !ctx.stop_requested() {
        let item = match worker.queue().pop_timeout(POP_TIMEOUT) {
            Ok(Some(item)) => item,
            Ok(None) => continue,
            Err(_) => {
                info!("🔌 [{}] 输入队列已关闭, 停止", ctx.name);
                return true;
            }
        };
        if let Some(clean) = settle(ctx, catch_unwind(AssertUnwindSafe(|| worker.handle(item, ctx)))) {
            return clean;
        }
    }
    debug!("[{}] 收到停止信号", ctx.name);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ticker {
        ticks: u32,
        stop_after: u32,
        fail_startup: bool,
        panic_on: Option<u32>,
        shutdown_tx: queue::QueueSender<u32>,
    }

    impl Worker for Ticker {
        fn startup(&mut self, _ctx: &WorkerContext) -> Result<(), WorkerError> {
            if self.fail_startup {
                return Err(WorkerError::resource("no camera"));
            }
            Ok(())
        }

        fn shutdown(&mut self, _ctx: &WorkerContext) {
            let _ = self.shutdown_tx.safe_put(self.ticks, PutPolicy::Drop);
        }
    }

    impl TickWorker for Ticker {
        fn interval(&self) -> Duration {
            Duration::from_millis(1)
        }

        fn tick(&mut self, _ctx: &WorkerContext) -> Result<Step, WorkerError> {
            self.ticks += 1;
            if self.panic_on == Some(self.ticks) {
                panic!("boom");
            }
            if self.ticks == 2 {
                return Err(WorkerError::transient("bad frame"));
            }
            if self.ticks >= self.stop_after {
                return Ok(Step::Stop);
            }
            Ok(Step::Continue)
        }
    }

    fn ticker(stop_after: u32, fail_startup: bool, panic_on: Option<u32>) -> (Ticker, queue::QueueReceiver<u32>) {
        let (tx, rx) = queue::bounded(1);
        (
            Ticker {
                ticks: 0,
                stop_after,
                fail_startup,
                panic_on,
                shutdown_tx: tx,
            },
            rx,
        )
    }

    #[test]
    fn test_transient_errors_and_panics_do_not_stop_worker() {
        let (events_tx, events_rx) = queue::bounded(8);
        let (worker, done) = ticker(5, false, Some(3));
        let mut handle = spawn_tick_worker(worker, WorkerContext::new("TICKER", events_tx)).unwrap();

        assert!(handle.join_timeout(Duration::from_secs(5)));
        assert_eq!(handle.state(), WorkerState::Stopped);
        assert_eq!(done.pop_timeout(Duration::from_secs(1)).unwrap(), Some(5));
        // 线程结束后发送端已释放, 队列里不应有任何消息
        assert!(!matches!(events_rx.try_pop(), Ok(Some(_))));
    }

    #[test]
    fn test_startup_failure_reports_hard_shutdown() {
        let (events_tx, events_rx) = queue::bounded(8);
        let (worker, done) = ticker(5, true, None);
        let mut handle = spawn_tick_worker(worker, WorkerContext::new("TICKER", events_tx)).unwrap();

        assert!(handle.join_timeout(Duration::from_secs(5)));
        assert_eq!(handle.state(), WorkerState::Failed);
        let msg = events_rx.pop_timeout(Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(msg.kind(), MessageKind::HardShutdown);
        assert_eq!(msg.source(), "TICKER");
        // shutdown 仍然执行
        assert_eq!(done.pop_timeout(Duration::from_secs(1)).unwrap(), Some(0));
    }

    #[test]
    fn test_request_stop_is_observed() {
        let (events_tx, _events_rx) = queue::bounded(8);
        let (worker, _done) = ticker(u32::MAX, false, None);
        let mut handle = spawn_tick_worker(worker, WorkerContext::new("TICKER", events_tx)).unwrap();

        std::thread::sleep(Duration::from_millis(20));
        handle.request_stop();
        handle.request_stop();
        assert!(handle.join_timeout(Duration::from_secs(5)));
        assert!(handle.state().is_terminal());
        // 重复 join 是空操作
        assert!(handle.join_timeout(Duration::from_millis(1)));
    }

    struct Summer {
        rx: queue::QueueReceiver<u32>,
        total: u32,
        out: queue::QueueSender<u32>,
    }

    impl Worker for Summer {
        fn startup(&mut self, _ctx: &WorkerContext) -> Result<(), WorkerError> {
            Ok(())
        }

        fn shutdown(&mut self, _ctx: &WorkerContext) {
            let _ = self.out.safe_put(self.total, PutPolicy::Drop);
        }
    }

    impl QueueWorker for Summer {
        type Item = u32;

        fn queue(&self) -> &queue::QueueReceiver<u32> {
            &self.rx
        }

        fn handle(&mut self, item: u32, _ctx: &WorkerContext) -> Result<Step, WorkerError> {
            if item == 0 {
                return Ok(Step::Stop);
            }
            self.total += item;
            Ok(Step::Continue)
        }
    }

    #[test]
    fn test_queue_worker_consumes_until_sentinel() {
        let (events_tx, _events_rx) = queue::bounded(8);
        let (tx, rx) = queue::bounded(8);
        let (out_tx, out_rx) = queue::bounded(1);
        for i in [1, 2, 3, 0, 100] {
            tx.safe_put(i, PutPolicy::Drop).unwrap();
        }
        let worker = Summer { rx, total: 0, out: out_tx };
        let mut handle = spawn_queue_worker(worker, WorkerContext::new("SUMMER", events_tx)).unwrap();

        assert!(handle.join_timeout(Duration::from_secs(5)));
        assert_eq!(out_rx.pop_timeout(Duration::from_secs(1)).unwrap(), Some(6));
    }

    #[test]
    fn test_queue_worker_stops_when_producer_gone() {
        let (events_tx, _events_rx) = queue::bounded(8);
        let (tx, rx) = queue::bounded::<u32>(8);
        let (out_tx, _out_rx) = queue::bounded(1);
        let worker = Summer { rx, total: 0, out: out_tx };
        let mut handle = spawn_queue_worker(worker, WorkerContext::new("SUMMER", events_tx)).unwrap();

        drop(tx);
        assert!(handle.join_timeout(Duration::from_secs(5)));
        assert_eq!(handle.state(), WorkerState::Stopped);
    }
}
