// 该文件是 Qianli （千里眼） 项目的一部分。
// src/model.rs - 模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use ndarray::{Array1, ArrayD};
use serde::Serialize;

use crate::frame::{InputShape, InputTensor};

/// 推理后端输出的原始张量，形状由模型决定
pub type RawOutput = ArrayD<f32>;

/// 推理后端
///
/// 两个相互独立的计算：网络前向推理，以及 NMS 后处理。
/// 检测管线只依赖这两个能力，测试时可以替换为返回固定张量的假后端。
pub trait InferenceBackend {
  type Error: std::error::Error + Send + Sync + 'static;

  /// 模型输入形状 [batch, channels, height, width]
  fn input_shape(&self) -> InputShape;

  /// 网络前向推理
  fn forward(&self, input: &InputTensor) -> Result<RawOutput, Self::Error>;

  /// NMS 后处理，返回形状为 [1, N, row_width] 的 `selected` 张量，N ≤ topk
  fn nms(&self, raw: &RawOutput, config: &ConfigTensor) -> Result<RawOutput, Self::Error>;
}

impl<B: InferenceBackend + ?Sized> InferenceBackend for &B {
  type Error = B::Error;

  fn input_shape(&self) -> InputShape {
    (**self).input_shape()
  }

  fn forward(&self, input: &InputTensor) -> Result<RawOutput, Self::Error> {
    (**self).forward(input)
  }

  fn nms(&self, raw: &RawOutput, config: &ConfigTensor) -> Result<RawOutput, Self::Error> {
    (**self).nms(raw, config)
  }
}

/// NMS 配置向量 (topk, iou_threshold, score_threshold)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfigTensor(pub [f32; 3]);

impl ConfigTensor {
  pub fn new(topk: usize, iou_threshold: f32, score_threshold: f32) -> Self {
    ConfigTensor([topk as f32, iou_threshold, score_threshold])
  }

  pub fn topk(&self) -> usize {
    self.0[0].max(0.0) as usize
  }

  pub fn iou_threshold(&self) -> f32 {
    self.0[1]
  }

  pub fn score_threshold(&self) -> f32 {
    self.0[2]
  }

  pub fn to_array(&self) -> RawOutput {
    Array1::from(self.0.to_vec()).into_dyn()
  }
}

/// 单个检测框
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectBox {
  /// 类别编号
  pub label: u32,
  /// 置信度
  pub probability: f32,
  /// [x, y, width, height]，原图像素坐标
  pub bounding: [f32; 4],
}

impl DetectBox {
  pub fn x(&self) -> f32 {
    self.bounding[0]
  }

  pub fn y(&self) -> f32 {
    self.bounding[1]
  }

  pub fn width(&self) -> f32 {
    self.bounding[2]
  }

  pub fn height(&self) -> f32 {
    self.bounding[3]
  }
}

pub mod cpu_nms;
pub use self::cpu_nms::CpuNms;

#[cfg(feature = "model_onnx")]
mod onnx;
#[cfg(feature = "model_onnx")]
pub use self::onnx::{OnnxBackend, OnnxBackendBuilder, OnnxBackendError};
