//! 控制消息出口 (Manager → 外部)
//!
//! 上报至多一次: 投递失败只记录日志, 不重试也不阻塞监控.

use std::io::Write;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::worker::message::{ControlMessage, MessageKind};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

pub trait EventSink: Send {
    fn deliver(&mut self, msg: &ControlMessage);
}

/// 只写日志
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn deliver(&mut self, msg: &ControlMessage) {
        match msg.kind() {
            MessageKind::HardShutdown => warn!("🛑 {}", msg),
            _ => info!("📨 {}", msg),
        }
    }
}

/// 每条消息一行JSON, 按需连接
pub struct TcpJsonSink {
    addr: SocketAddr,
    stream: Option<TcpStream>,
}

impl TcpJsonSink {
    pub fn new(addr: impl ToSocketAddrs) -> Result<Self> {
        let addr = addr
            .to_socket_addrs()
            .context("上报地址解析失败")?
            .next()
            .context("上报地址为空")?;
        Ok(Self { addr, stream: None })
    }

    fn connect(&mut self) -> Result<&mut TcpStream> {
        if self.stream.is_none() {
            let stream = TcpStream::connect_timeout(&self.addr, CONNECT_TIMEOUT)
                .with_context(|| format!("连接上报服务失败: {}", self.addr))?;
            stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
            self.stream = Some(stream);
        }
        self.stream.as_mut().context("上报连接未建立")
    }

    fn send_line(&mut self, line: &str) -> Result<()> {
        let stream = self.connect()?;
        stream.write_all(line.as_bytes())?;
        stream.write_all(b"\n")?;
        stream.flush()?;
        Ok(())
    }
}

impl EventSink for TcpJsonSink {
    fn deliver(&mut self, msg: &ControlMessage) {
        let line = match msg.to_json() {
            Ok(line) => line,
            Err(e) => {
                warn!("⚠️ 控制消息序列化失败: {}", e);
                return;
            }
        };
        if let Err(e) = self.send_line(&line) {
            // 断开, 下一条消息重新连接
            self.stream = None;
            warn!("⚠️ 上报失败, 消息已丢弃: {:#}", e);
        }
    }
}

/// 同时投递到多个出口
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl EventSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn deliver(&mut self, msg: &ControlMessage) {
        for sink in &mut self.sinks {
            sink.deliver(msg);
        }
    }
}

/// 收集到共享列表 (测试与嵌入式调用方使用)
#[derive(Clone, Default)]
pub struct CollectSink {
    messages: Arc<Mutex<Vec<ControlMessage>>>,
}

impl CollectSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<ControlMessage> {
        match self.messages.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl EventSink for CollectSink {
    fn deliver(&mut self, msg: &ControlMessage) {
        match self.messages.lock() {
            Ok(mut guard) => guard.push(msg.clone()),
            Err(poisoned) => poisoned.into_inner().push(msg.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;

    #[test]
    fn test_tcp_sink_writes_json_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let reader = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            BufReader::new(stream)
                .lines()
                .take(2)
                .map(|l| l.unwrap())
                .collect::<Vec<_>>()
        });

        let mut sink = TcpJsonSink::new(addr).unwrap();
        sink.deliver(&ControlMessage::notify("DETECTOR", "SPAWNING_EVENT", "event", "/tmp/a.gif"));
        sink.deliver(&ControlMessage::text("MANAGER", MessageKind::EnterPassiveMode, "done"));

        let lines = reader.join().unwrap();
        assert_eq!(lines.len(), 2);
        let first = ControlMessage::from_json(&lines[0]).unwrap();
        assert_eq!(first.artifact_path(), Some("/tmp/a.gif"));
        let second = ControlMessage::from_json(&lines[1]).unwrap();
        assert_eq!(second.kind(), MessageKind::EnterPassiveMode);
    }

    #[test]
    fn test_unreachable_endpoint_drops_message() {
        // 绑定后立即释放, 端口拒绝连接
        let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let mut sink = TcpJsonSink::new(addr).unwrap();
        sink.deliver(&ControlMessage::text("DETECTOR", MessageKind::End, "x"));
        assert!(sink.stream.is_none());
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let a = CollectSink::new();
        let b = CollectSink::new();
        let mut fanout = FanoutSink::new().with(a.clone()).with(b.clone()).with(LogSink);
        assert_eq!(fanout.len(), 3);
        fanout.deliver(&ControlMessage::text("COLLECTOR", MessageKind::End, "eof"));
        assert_eq!(a.messages().len(), 1);
        assert_eq!(b.messages().len(), 1);
    }
}
