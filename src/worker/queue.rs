//! 有界队列 (Bounded queue)
//!
//! 基于 crossbeam-channel, 同一队列内保持 FIFO.
//! 推送从不无限阻塞: 满队列时由调用方选择丢弃或退避重试.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use std::time::Duration;

/// 满队列时的推送策略
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PutPolicy {
    /// 尝试一次, 失败则交还元素 (允许过载时丢数据)
    Drop,
    /// 退避重试; max_attempts 为 None 时一直重试直到成功或接收端关闭
    Retry {
        backoff: Duration,
        max_attempts: Option<u32>,
    },
}

impl PutPolicy {
    pub fn retry_forever(backoff: Duration) -> Self {
        PutPolicy::Retry {
            backoff,
            max_attempts: None,
        }
    }

    pub fn retry(backoff: Duration, max_attempts: u32) -> Self {
        PutPolicy::Retry {
            backoff,
            max_attempts: Some(max_attempts),
        }
    }
}

/// 推送失败, 元素所有权交还调用方
#[derive(Debug, PartialEq)]
pub enum PutError<T> {
    Full(T),
    Disconnected(T),
}

impl<T> PutError<T> {
    pub fn into_inner(self) -> T {
        match self {
            PutError::Full(item) | PutError::Disconnected(item) => item,
        }
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, PutError::Disconnected(_))
    }
}

impl<T> std::fmt::Display for PutError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PutError::Full(_) => write!(f, "queue full"),
            PutError::Disconnected(_) => write!(f, "queue disconnected"),
        }
    }
}

/// 接收端已关闭
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnected;

/// 发送端
pub struct QueueSender<T> {
    tx: Sender<T>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

/// 接收端
pub struct QueueReceiver<T> {
    rx: Receiver<T>,
}

/// 创建容量为 capacity 的有界队列
pub fn bounded<T>(capacity: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    (QueueSender { tx }, QueueReceiver { rx })
}

impl<T> QueueSender<T> {
    /// 按策略推送
    pub fn safe_put(&self, item: T, policy: PutPolicy) -> Result<(), PutError<T>> {
        match policy {
            PutPolicy::Drop => self.try_put(item),
            PutPolicy::Retry {
                backoff,
                max_attempts,
            } => {
                let mut item = item;
                let mut attempts = 0u32;
                loop {
                    match self.try_put(item) {
                        Ok(()) => return Ok(()),
                        Err(PutError::Full(back)) => {
                            attempts += 1;
                            if max_attempts.is_some_and(|max| attempts >= max) {
                                return Err(PutError::Full(back));
                            }
                            item = back;
                            std::thread::sleep(backoff);
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    fn try_put(&self, item: T) -> Result<(), PutError<T>> {
        self.tx.try_send(item).map_err(|e| match e {
            TrySendError::Full(item) => PutError::Full(item),
            TrySendError::Disconnected(item) => PutError::Disconnected(item),
        })
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.tx.is_full()
    }
}

impl<T> QueueReceiver<T> {
    /// 有限等待弹出; 超时返回 Ok(None) 以便调用方检查停止信号
    pub fn pop_timeout(&self, timeout: Duration) -> Result<Option<T>, Disconnected> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Ok(Some(item)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Disconnected),
        }
    }

    /// 非阻塞弹出
    pub fn try_pop(&self) -> Result<Option<T>, Disconnected> {
        match self.rx.try_recv() {
            Ok(item) => Ok(Some(item)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Disconnected),
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_fifo_order() {
        let (tx, rx) = bounded(4);
        for i in 0..4 {
            tx.safe_put(i, PutPolicy::Drop).unwrap();
        }
        let popped: Vec<i32> = (0..4)
            .map(|_| rx.pop_timeout(Duration::from_millis(10)).unwrap().unwrap())
            .collect();
        assert_eq!(popped, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_drop_policy_returns_item_without_blocking() {
        let (tx, _rx) = bounded(1);
        tx.safe_put(1, PutPolicy::Drop).unwrap();

        let start = Instant::now();
        let err = tx.safe_put(2, PutPolicy::Drop).unwrap_err();
        assert!(start.elapsed() < Duration::from_millis(50));
        assert_eq!(err, PutError::Full(2));
    }

    #[test]
    fn test_retry_policy_succeeds_once_consumer_drains() {
        let (tx, rx) = bounded(1);
        tx.safe_put(1, PutPolicy::Drop).unwrap();

        let consumer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            let first = rx.pop_timeout(Duration::from_secs(1)).unwrap();
            let second = rx.pop_timeout(Duration::from_secs(1)).unwrap();
            (first, second)
        });

        tx.safe_put(2, PutPolicy::retry_forever(Duration::from_millis(5)))
            .unwrap();
        assert_eq!(consumer.join().unwrap(), (Some(1), Some(2)));
    }

    #[test]
    fn test_retry_policy_gives_up_after_max_attempts() {
        let (tx, _rx) = bounded(1);
        tx.safe_put(1, PutPolicy::Drop).unwrap();
        let err = tx
            .safe_put(2, PutPolicy::retry(Duration::from_millis(1), 3))
            .unwrap_err();
        assert_eq!(err.into_inner(), 2);
    }

    #[test]
    fn test_retry_stops_when_receiver_dropped() {
        let (tx, rx) = bounded(1);
        tx.safe_put(1, PutPolicy::Drop).unwrap();
        drop(rx);
        let err = tx
            .safe_put(2, PutPolicy::retry_forever(Duration::from_millis(1)))
            .unwrap_err();
        assert!(err.is_disconnected());
    }

    #[test]
    fn test_pop_timeout_on_empty_queue() {
        let (tx, rx) = bounded::<u8>(1);
        assert_eq!(rx.pop_timeout(Duration::from_millis(5)), Ok(None));
        drop(tx);
        assert_eq!(rx.pop_timeout(Duration::from_millis(5)), Err(Disconnected));
    }
}
