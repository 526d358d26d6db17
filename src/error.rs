//! 工作线程错误分类 (Worker error taxonomy)
//!
//! - [`WorkerError::Resource`]: 摄像头/推理运行时等稀缺资源不可用, 致命, 触发 HARD_SHUTDOWN
//! - [`WorkerError::Transient`]: 单帧损坏、定位失败等数据错误, 记录后继续下一步
//! - [`WorkerError::Disconnected`]: 队列对端已关闭, 工作线程正常结束

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    /// 资源获取失败 (致命)
    #[error("resource unavailable: {0}")]
    Resource(String),

    /// 瞬时错误, 跳过本次步骤
    #[error("transient failure: {0}")]
    Transient(String),

    /// 队列对端已关闭
    #[error("queue disconnected: {0}")]
    Disconnected(String),
}

impl WorkerError {
    pub fn resource(msg: impl std::fmt::Display) -> Self {
        WorkerError::Resource(msg.to_string())
    }

    pub fn transient(msg: impl std::fmt::Display) -> Self {
        WorkerError::Transient(msg.to_string())
    }

    /// 是否需要终止工作线程并上报 HARD_SHUTDOWN
    pub fn is_fatal(&self) -> bool {
        matches!(self, WorkerError::Resource(_))
    }

    /// 日志用的稳定标签
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerError::Resource(_) => "worker_resource",
            WorkerError::Transient(_) => "worker_transient",
            WorkerError::Disconnected(_) => "worker_disconnected",
        }
    }
}

impl From<anyhow::Error> for WorkerError {
    fn from(e: anyhow::Error) -> Self {
        WorkerError::Transient(format!("{e:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_resource_errors_are_fatal() {
        assert!(WorkerError::resource("camera busy").is_fatal());
        assert!(!WorkerError::transient("bad frame").is_fatal());
        assert!(!WorkerError::Disconnected("frames".into()).is_fatal());
    }

    #[test]
    fn anyhow_errors_become_transient() {
        let e: WorkerError = anyhow::anyhow!("decode failed").into();
        assert_eq!(e.as_label(), "worker_transient");
    }
}
