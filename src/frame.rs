// 该文件是 Qianli （千里眼） 项目的一部分。
// src/frame.rs - 图像源与输入张量定义
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use image::{DynamicImage, RgbImage, RgbaImage};
use ndarray::Array4;

const RGB_CHANNELS: usize = 3;

/// 只读的位图来源（静态图片或采集到的视频帧）
pub trait ImageSource {
  /// 原始尺寸 (宽, 高)
  fn dimensions(&self) -> (u32, u32);
  /// 转换为 3 通道 RGB 图像
  fn to_rgb_image(&self) -> RgbImage;
}

impl ImageSource for RgbImage {
  fn dimensions(&self) -> (u32, u32) {
    (self.width(), self.height())
  }

  fn to_rgb_image(&self) -> RgbImage {
    self.clone()
  }
}

impl ImageSource for RgbaImage {
  fn dimensions(&self) -> (u32, u32) {
    (self.width(), self.height())
  }

  fn to_rgb_image(&self) -> RgbImage {
    DynamicImage::ImageRgba8(self.clone()).to_rgb8()
  }
}

impl ImageSource for DynamicImage {
  fn dimensions(&self) -> (u32, u32) {
    (self.width(), self.height())
  }

  fn to_rgb_image(&self) -> RgbImage {
    self.to_rgb8()
  }
}

/// 张量通道顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelOrder {
  #[default]
  Rgb,
  Bgr,
}

impl ChannelOrder {
  /// 输出平面 `plane` 对应的源像素通道
  pub fn source_channel(&self, plane: usize) -> usize {
    match self {
      ChannelOrder::Rgb => plane,
      ChannelOrder::Bgr => RGB_CHANNELS - 1 - plane,
    }
  }
}

/// 模型输入形状 [batch, channels, height, width]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputShape(pub [usize; 4]);

impl InputShape {
  pub fn height(&self) -> usize {
    self.0[2]
  }

  pub fn width(&self) -> usize {
    self.0[3]
  }
}

impl Default for InputShape {
  fn default() -> Self {
    InputShape([1, RGB_CHANNELS, 640, 640])
  }
}

/// NCHW 浮点输入张量，数值范围 [0, 1]
#[derive(Debug, Clone)]
pub struct InputTensor {
  data: Array4<f32>,
}

impl InputTensor {
  pub(crate) fn from_array(data: Array4<f32>) -> Self {
    Self { data }
  }

  pub fn shape(&self) -> [usize; 4] {
    let dim = self.data.dim();
    [dim.0, dim.1, dim.2, dim.3]
  }

  pub fn height(&self) -> usize {
    self.data.dim().2
  }

  pub fn width(&self) -> usize {
    self.data.dim().3
  }

  pub fn channels(&self) -> usize {
    self.data.dim().1
  }

  pub fn as_array(&self) -> &Array4<f32> {
    &self.data
  }

  pub fn into_array(self) -> Array4<f32> {
    self.data
  }
}

/// 由模型空间映射回原图坐标的缩放比例
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleRatios {
  pub x: f32,
  pub y: f32,
}

impl Default for ScaleRatios {
  fn default() -> Self {
    Self { x: 1.0, y: 1.0 }
  }
}
