// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLOv8 检测模型 (ONNX Runtime)
// 包含: 模型加载、预处理、推理、后处理

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::{Array, ArrayViewD, Axis, Ix3, Ix4};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::ValueType;
use tracing::{debug, info};

use super::Model;
use crate::detection::{non_max_suppression, BBox, Detection};

/// 输出格式 [1, 4 + nc, N]: 每列 (cx, cy, w, h, cls0..clsN)
const CXYWH_OFFSET: usize = 4;
const DEFAULT_INPUT_SIZE: u32 = 640;

pub struct YOLOv8 {
    session: Session,
    input_name: String,
    output_name: String,
    width: u32,
    height: u32,
    names: Vec<String>,
    conf: f32,
    iou: f32,
}

impl YOLOv8 {
    /// 加载模型 (单线程推理, 适合边缘设备)
    pub fn load(path: &Path, names: Vec<String>, conf: f32, iou: f32) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(1)?
            .commit_from_file(path)
            .with_context(|| format!("加载模型失败: {}", path.display()))?;

        let input = session.inputs.first().context("模型没有输入")?;
        let (height, width) = match &input.input_type {
            ValueType::Tensor { dimensions, .. } if dimensions.len() == 4 => {
                (dim_or_default(dimensions[2]), dim_or_default(dimensions[3]))
            }
            _ => (DEFAULT_INPUT_SIZE, DEFAULT_INPUT_SIZE),
        };
        let input_name = input.name.clone();
        let output_name = session.outputs.first().context("模型没有输出")?.name.clone();

        info!(
            "✅ YOLOv8 模型已加载: {} (输入 {}x{}, {} 类)",
            path.display(),
            width,
            height,
            names.len()
        );

        Ok(Self {
            session,
            input_name,
            output_name,
            width,
            height,
            names,
            conf,
            iou,
        })
    }

    /// 直接缩放到模型输入尺寸 (不做 letterbox), NCHW, 归一化到 [0, 1]
    fn preprocess(&self, image: &RgbImage) -> Array<f32, Ix4> {
        let resized = image::imageops::resize(image, self.width, self.height, FilterType::Triangle);
        let mut ys = Array::zeros((1, 3, self.height as usize, self.width as usize));
        for (x, y, rgb) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            let [r, g, b] = rgb.0;
            ys[[0, 0, y, x]] = r as f32 / 255.0;
            ys[[0, 1, y, x]] = g as f32 / 255.0;
            ys[[0, 2, y, x]] = b as f32 / 255.0;
        }
        ys
    }

    fn postprocess(&self, preds: ArrayViewD<'_, f32>, width0: u32, height0: u32) -> Result<Vec<Detection>> {
        anyhow::ensure!(preds.ndim() == 3, "输出维度错误: {:?}", preds.shape());
        let preds = preds.into_dimensionality::<Ix3>()?;
        let nc = preds.shape()[1].saturating_sub(CXYWH_OFFSET);
        let sx = width0 as f32 / self.width as f32;
        let sy = height0 as f32 / self.height as f32;

        let mut data = Vec::new();
        let anchor = preds.index_axis(Axis(0), 0);
        for pred in anchor.axis_iter(Axis(1)) {
            let best = (0..nc)
                .map(|c| (c, pred[CXYWH_OFFSET + c]))
                .reduce(|max, x| if x.1 > max.1 { x } else { max });
            let Some((id, confidence)) = best else {
                continue;
            };
            if confidence < self.conf {
                continue;
            }

            let bbox = BBox::from_cxcywh(pred[0] * sx, pred[1] * sy, pred[2] * sx, pred[3] * sy)
                .clamp(width0 as f32, height0 as f32);
            let label = self.names.get(id).cloned().unwrap_or_else(|| id.to_string());
            data.push(Detection::new(label, confidence, bbox));
        }

        non_max_suppression(&mut data, self.iou);
        Ok(data)
    }
}

fn dim_or_default(d: i64) -> u32 {
    if d > 0 {
        d as u32
    } else {
        DEFAULT_INPUT_SIZE
    }
}

impl Model for YOLOv8 {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>> {
        let t_pre = Instant::now();
        let input = self.preprocess(image);

        let t_run = Instant::now();
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input.view()]?)?;
        let preds = outputs[self.output_name.as_str()].try_extract_tensor::<f32>()?;

        let t_post = Instant::now();
        let dets = self.postprocess(preds, image.width(), image.height())?;
        debug!(
            "[YOLOv8] 预处理 {:?} 推理 {:?} 后处理 {:?}",
            t_run - t_pre,
            t_post - t_run,
            t_post.elapsed()
        );
        Ok(dets)
    }

    fn describe(&self) -> String {
        format!("YOLOv8 {}x{} ({} classes)", self.width, self.height, self.names.len())
    }
}
