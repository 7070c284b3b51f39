// 该文件是 Qianli （千里眼） 项目的一部分。
// src/detector.rs - 检测流程：预处理、推理、解码
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use ndarray::{Array2, ArrayView2, Axis, Ix3};
use thiserror::Error;
use tracing::debug;

use crate::{
  frame::{ChannelOrder, ImageSource, InputTensor, ScaleRatios},
  model::{ConfigTensor, DetectBox, InferenceBackend, RawOutput},
  preprocess::{PreprocessError, Preprocessor},
};

/// 每行前 4 个值是 (cx, cy, w, h)
const BOX_FIELDS: usize = 4;

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("预处理错误: {0}")]
  Preprocess(#[from] PreprocessError),
  #[error("推理后端错误: {0}")]
  InferenceBackend(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("后处理输出无效: {0}")]
  InvalidOutput(String),
}

impl DetectError {
  fn backend<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
    DetectError::InferenceBackend(Box::new(err))
  }
}

/// 检测阈值
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectConfig {
  /// 每次推理最多保留的检测框数量
  pub topk: usize,
  /// NMS IOU 阈值
  pub iou_threshold: f32,
  /// 置信度阈值
  pub score_threshold: f32,
}

impl Default for DetectConfig {
  fn default() -> Self {
    Self {
      topk: 100,
      iou_threshold: 0.45,
      score_threshold: 0.25,
    }
  }
}

impl DetectConfig {
  pub fn config_tensor(&self) -> ConfigTensor {
    ConfigTensor::new(self.topk, self.iou_threshold, self.score_threshold)
  }
}

/// NMS 输出的检测行，形状 [N, row_width]
#[derive(Debug, Clone)]
pub struct DetectionRows {
  rows: Array2<f32>,
}

impl DetectionRows {
  fn new(selected: RawOutput) -> Result<Self, DetectError> {
    let dims = selected.shape().to_vec();
    let selected = selected
      .into_dimensionality::<Ix3>()
      .ok()
      .filter(|s| s.dim().0 == 1)
      .ok_or_else(|| {
        DetectError::InvalidOutput(format!("期望形状 [1, N, row_width], 实际为 {:?}", dims))
      })?;
    if dims[2] <= BOX_FIELDS {
      return Err(DetectError::InvalidOutput(format!(
        "检测行宽度 {} 不足以包含类别分数",
        dims[2]
      )));
    }
    Ok(Self {
      rows: selected.index_axis_move(Axis(0), 0),
    })
  }

  pub fn len(&self) -> usize {
    self.rows.nrows()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn row_width(&self) -> usize {
    self.rows.ncols()
  }

  pub fn rows(&self) -> ArrayView2<'_, f32> {
    self.rows.view()
  }
}

/// 依次调用前向推理与 NMS，返回检测行
///
/// NMS 只在前向推理返回后调用；行宽度从输出形状读取。
pub fn run_inference<B: InferenceBackend + ?Sized>(
  backend: &B,
  tensor: &InputTensor,
  topk: usize,
  iou_threshold: f32,
  score_threshold: f32,
) -> Result<DetectionRows, DetectError> {
  let config = ConfigTensor::new(topk, iou_threshold, score_threshold);

  let raw = backend.forward(tensor).map_err(DetectError::backend)?;
  debug!("前向推理输出形状: {:?}", raw.shape());

  let selected = backend.nms(&raw, &config).map_err(DetectError::backend)?;
  debug!("NMS 输出形状: {:?}", selected.shape());

  DetectionRows::new(selected)
}

/// 将检测行解码为原图坐标下的检测框
pub fn decode_rows(rows: &DetectionRows, ratios: ScaleRatios) -> Vec<DetectBox> {
  rows
    .rows()
    .outer_iter()
    .map(|row| {
      let (label, probability) = argmax(row.iter().skip(BOX_FIELDS).copied());
      let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
      DetectBox {
        label,
        probability,
        bounding: [
          (cx - 0.5 * w) * ratios.x,
          (cy - 0.5 * h) * ratios.y,
          w * ratios.x,
          h * ratios.y,
        ],
      }
    })
    .collect()
}

/// 最大值及其下标；相等时取最小下标。NaN 按 0 处理，全部无效时为 (0, 0.0)
fn argmax<I: Iterator<Item = f32>>(scores: I) -> (u32, f32) {
  let mut best = (0u32, 0.0f32);
  for (idx, score) in scores.enumerate() {
    if score > best.1 {
      best = (idx as u32, score);
    }
  }
  best
}

/// 静态图片 / 单帧检测器
pub struct Detector<B> {
  backend: B,
  preprocessor: Preprocessor,
  config: DetectConfig,
}

impl<B: InferenceBackend> Detector<B> {
  /// 按后端报告的输入形状创建预处理器
  pub fn new(backend: B, config: DetectConfig) -> Result<Self, DetectError> {
    let preprocessor = Preprocessor::for_shape(backend.input_shape())?;
    Ok(Self {
      backend,
      preprocessor,
      config,
    })
  }

  pub fn with_channel_order(mut self, channel_order: ChannelOrder) -> Self {
    self.preprocessor = self.preprocessor.channel_order(channel_order);
    self
  }

  pub fn config(&self) -> &DetectConfig {
    &self.config
  }

  pub fn backend(&self) -> &B {
    &self.backend
  }

  pub fn detect<S: ImageSource + ?Sized>(&self, source: &S) -> Result<Vec<DetectBox>, DetectError> {
    let (tensor, ratios) = self.preprocessor.preprocess(source)?;
    let rows = run_inference(
      &self.backend,
      &tensor,
      self.config.topk,
      self.config.iou_threshold,
      self.config.score_threshold,
    )?;
    drop(tensor);

    let mut boxes = decode_rows(&rows, ratios);
    if boxes.len() > self.config.topk {
      debug!(
        "后端返回 {} 行，超过 topk {}，截断",
        boxes.len(),
        self.config.topk
      );
      boxes.truncate(self.config.topk);
    }
    Ok(boxes)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::Array3;

  fn rows(data: Vec<f32>, n: usize, width: usize) -> DetectionRows {
    DetectionRows::new(Array3::from_shape_vec((1, n, width), data).unwrap().into_dyn()).unwrap()
  }

  #[test]
  fn decodes_center_box_with_ratios() {
    let rows = rows(vec![100.0, 50.0, 40.0, 20.0, 0.1, 0.9], 1, 6);
    let boxes = decode_rows(&rows, ScaleRatios { x: 2.0, y: 1.0 });

    assert_eq!(boxes.len(), 1);
    assert_eq!(boxes[0].bounding, [160.0, 40.0, 80.0, 20.0]);
    assert_eq!(boxes[0].label, 1);
    assert_eq!(boxes[0].probability, 0.9);
  }

  #[test]
  fn argmax_ties_pick_lowest_index() {
    let rows = rows(vec![10.0, 10.0, 2.0, 2.0, 0.5, 0.5], 1, 6);
    let boxes = decode_rows(&rows, ScaleRatios::default());
    assert_eq!(boxes[0].label, 0);
    assert_eq!(boxes[0].probability, 0.5);
  }

  #[test]
  fn nan_scores_decode_to_zero_probability() {
    let rows = rows(vec![1.0, 1.0, 1.0, 1.0, f32::NAN, f32::NAN], 1, 6);
    let boxes = decode_rows(&rows, ScaleRatios::default());
    assert_eq!((boxes[0].label, boxes[0].probability), (0, 0.0));

    let rows2 = super::tests::rows(vec![1.0, 1.0, 1.0, 1.0, f32::NAN, 0.4], 1, 6);
    let boxes = decode_rows(&rows2, ScaleRatios::default());
    assert_eq!((boxes[0].label, boxes[0].probability), (1, 0.4));
  }

  #[test]
  fn row_width_comes_from_shape() {
    let rows = rows(vec![0.0, 0.0, 1.0, 1.0, 0.1, 0.2, 0.7, 0.0], 1, 8);
    assert_eq!(rows.row_width(), 8);
    let boxes = decode_rows(&rows, ScaleRatios::default());
    assert_eq!(boxes[0].label, 2);
  }

  #[test]
  fn empty_selection_decodes_to_nothing() {
    let rows = rows(vec![], 0, 6);
    assert!(rows.is_empty());
    assert!(decode_rows(&rows, ScaleRatios::default()).is_empty());
  }

  #[test]
  fn malformed_selection_is_rejected() {
    let flat = ndarray::Array2::<f32>::zeros((3, 6)).into_dyn();
    assert!(matches!(
      DetectionRows::new(flat),
      Err(DetectError::InvalidOutput(_))
    ));
    let narrow = Array3::<f32>::zeros((1, 2, 4)).into_dyn();
    assert!(DetectionRows::new(narrow).is_err());
  }
}
