// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 推理模型接口 (Model oracle)
///
/// 检测线程只依赖 [`Model`] trait: 输入一帧图像, 输出检测结果列表.
/// 模型本身被视为不透明、可能出错的打分函数.
///
/// ## 实现
/// - **YOLOv8** (feature `onnx`): ONNX Runtime 推理, 文件 `yolov8.rs`
///
/// ## 使用示例
/// ```ignore
/// let factory = models::yolov8_factory("models/best.onnx", "models/labels.txt", 0.4, 0.5);
/// let mut model = factory()?;
/// let dets = model.detect(&frame)?;
/// ```
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use image::RgbImage;

use crate::detection::Detection;

#[cfg(feature = "onnx")]
pub mod yolov8; // YOLOv8 ONNX 模型

#[cfg(feature = "onnx")]
pub use yolov8::YOLOv8;

/// 模型统一接口
pub trait Model: Send {
    /// 对单帧推理, 坐标为输入图像像素坐标
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>>;

    /// 模型描述 (日志用)
    fn describe(&self) -> String {
        String::from("model")
    }
}

/// 模型构造器, 在检测线程 startup 阶段调用
///
/// 推理运行时属于稀缺资源, 只在工作线程内部创建
pub type ModelFactory = Arc<dyn Fn() -> Result<Box<dyn Model>> + Send + Sync>;

/// 读取标签文件
///
/// 支持两种格式: 每行 `index name`, 或每行一个类别名 (行号即索引)
pub fn load_labels(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("读取标签文件失败: {}", path.display()))?;
    Ok(parse_labels(&text))
}

pub fn parse_labels(text: &str) -> Vec<String> {
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

    let indexed: Option<BTreeMap<usize, String>> = lines
        .iter()
        .map(|line| {
            let (idx, name) = line.split_once(char::is_whitespace)?;
            Some((idx.parse::<usize>().ok()?, name.trim().to_string()))
        })
        .collect();

    match indexed {
        Some(map) if !map.is_empty() => {
            let len = map.keys().next_back().map_or(0, |k| k + 1);
            let mut names = vec![String::from("unknown"); len];
            for (idx, name) in map {
                names[idx] = name;
            }
            names
        }
        _ => lines.into_iter().map(String::from).collect(),
    }
}

/// 未编译推理后端时的模型构造器: 每次调用都返回错误
pub fn unavailable_factory(reason: impl Into<String>) -> ModelFactory {
    let reason = reason.into();
    Arc::new(move || Err(anyhow::anyhow!("模型不可用: {}", reason)))
}

/// YOLOv8 模型构造器
#[cfg(feature = "onnx")]
pub fn yolov8_factory(
    model_path: impl Into<std::path::PathBuf>,
    labels_path: impl Into<std::path::PathBuf>,
    conf_thresh: f32,
    iou_thresh: f32,
) -> ModelFactory {
    let model_path = model_path.into();
    let labels_path = labels_path.into();
    Arc::new(move || {
        let labels = load_labels(&labels_path)?;
        let model = YOLOv8::load(&model_path, labels, conf_thresh, iou_thresh)?;
        Ok(Box::new(model) as Box<dyn Model>)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_indexed_labels() {
        let names = parse_labels("0 fish\n1  pipe\n\n3 net\n");
        assert_eq!(names, vec!["fish", "pipe", "unknown", "net"]);
    }

    #[test]
    fn test_parse_plain_labels() {
        let names = parse_labels("fish\npipe\n");
        assert_eq!(names, vec!["fish", "pipe"]);
    }

    #[test]
    fn test_unavailable_factory_errors() {
        let factory = unavailable_factory("built without onnx");
        assert!(factory().is_err());
    }
}
