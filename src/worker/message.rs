//! 控制消息 (工作线程 → Manager → 外部上报)
//!
//! 线上格式: 每条消息一个JSON对象
//! `{"source":"DETECTOR","kind":"NOTIFY","payload":["SPAWNING_EVENT","...","/path/clip.gif"]}`

use serde::{Deserialize, Serialize};

/// 消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Notify,
    EnterActiveMode,
    EnterPassiveMode,
    HardShutdown,
    End,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Notify => "NOTIFY",
            MessageKind::EnterActiveMode => "ENTER_ACTIVE_MODE",
            MessageKind::EnterPassiveMode => "ENTER_PASSIVE_MODE",
            MessageKind::HardShutdown => "HARD_SHUTDOWN",
            MessageKind::End => "END",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 消息载荷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    /// NOTIFY: [事件标签, 可读描述, 产物路径]
    Notify(String, String, String),
    Text(String),
    Empty,
}

/// 控制消息, 构造后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    source: String,
    kind: MessageKind,
    payload: Payload,
}

impl ControlMessage {
    pub fn new(source: impl Into<String>, kind: MessageKind, payload: Payload) -> Self {
        Self {
            source: source.into(),
            kind,
            payload,
        }
    }

    pub fn notify(
        source: impl Into<String>,
        event_tag: impl Into<String>,
        message: impl Into<String>,
        artifact_path: impl Into<String>,
    ) -> Self {
        Self::new(
            source,
            MessageKind::Notify,
            Payload::Notify(event_tag.into(), message.into(), artifact_path.into()),
        )
    }

    pub fn text(source: impl Into<String>, kind: MessageKind, text: impl Into<String>) -> Self {
        Self::new(source, kind, Payload::Text(text.into()))
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// NOTIFY 消息的产物路径
    pub fn artifact_path(&self) -> Option<&str> {
        match &self.payload {
            Payload::Notify(_, _, path) => Some(path),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

impl std::fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.payload {
            Payload::Notify(tag, msg, path) => {
                write!(f, "[{}] {} {}: {} ({})", self.source, self.kind, tag, msg, path)
            }
            Payload::Text(text) => write!(f, "[{}] {}: {}", self.source, self.kind, text),
            Payload::Empty => write!(f, "[{}] {}", self.source, self.kind),
        }
    }
}
