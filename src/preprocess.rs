// 该文件是 Qianli （千里眼） 项目的一部分。
// src/preprocess.rs - 图像预处理（补边、缩放、归一化）
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

use image::{RgbImage, imageops::FilterType};
use ndarray::Array4;
use thiserror::Error;
use tracing::debug;

use crate::frame::{ChannelOrder, ImageSource, InputShape, InputTensor, ScaleRatios};

#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("无效的图像源: {width}x{height}")]
  InvalidImageSource { width: u32, height: u32 },
  #[error("无效的模型输入尺寸: {width}x{height}")]
  InvalidTargetSize { width: u32, height: u32 },
}

/// 预处理器
///
/// 将任意尺寸的图像补边为正方形（只在右侧和下方补零），缩放到模型输入尺寸，
/// 再按 NCHW 排列并除以 255 归一化。
#[derive(Debug, Clone)]
pub struct Preprocessor {
  target_width: u32,
  target_height: u32,
  channel_order: ChannelOrder,
  filter: FilterType,
}

impl Preprocessor {
  pub fn new(target_width: u32, target_height: u32) -> Result<Self, PreprocessError> {
    if target_width == 0 || target_height == 0 {
      return Err(PreprocessError::InvalidTargetSize {
        width: target_width,
        height: target_height,
      });
    }
    Ok(Self {
      target_width,
      target_height,
      channel_order: ChannelOrder::default(),
      filter: FilterType::Triangle,
    })
  }

  /// 按模型输入形状创建，取形状的第 2、3 维作为高和宽
  pub fn for_shape(shape: InputShape) -> Result<Self, PreprocessError> {
    Self::new(shape.width() as u32, shape.height() as u32)
  }

  pub fn channel_order(mut self, channel_order: ChannelOrder) -> Self {
    self.channel_order = channel_order;
    self
  }

  pub fn filter(mut self, filter: FilterType) -> Self {
    self.filter = filter;
    self
  }

  pub fn target_size(&self) -> (u32, u32) {
    (self.target_width, self.target_height)
  }

  pub fn preprocess<S: ImageSource + ?Sized>(
    &self,
    source: &S,
  ) -> Result<(InputTensor, ScaleRatios), PreprocessError> {
    let (width, height) = source.dimensions();
    if width == 0 || height == 0 {
      return Err(PreprocessError::InvalidImageSource { width, height });
    }

    let max_size = width.max(height);
    let ratios = ScaleRatios {
      x: max_size as f32 / width as f32,
      y: max_size as f32 / height as f32,
    };

    let padded = pad_to_square(source.to_rgb_image(), max_size);
    let resized = if padded.dimensions() == (self.target_width, self.target_height) {
      padded
    } else {
      image::imageops::resize(&padded, self.target_width, self.target_height, self.filter)
    };

    debug!(
      "预处理: {}x{} -> 补边 {} -> {}x{}, 比例 ({:.4}, {:.4})",
      width, height, max_size, self.target_width, self.target_height, ratios.x, ratios.y
    );

    Ok((self.to_tensor(&resized), ratios))
  }

  fn to_tensor(&self, image: &RgbImage) -> InputTensor {
    let (width, height) = image.dimensions();
    let order = self.channel_order;
    let data = Array4::from_shape_fn(
      (1, 3, height as usize, width as usize),
      |(_, c, y, x)| {
        let pixel = image.get_pixel(x as u32, y as u32);
        pixel[order.source_channel(c)] as f32 / 255.0
      },
    );
    InputTensor::from_array(data)
  }
}

/// 在右侧和下方补零，使图像成为边长 `side` 的正方形，左上角原点保持不变
fn pad_to_square(image: RgbImage, side: u32) -> RgbImage {
  if image.dimensions() == (side, side) {
    return image;
  }
  let mut padded = RgbImage::new(side, side);
  image::imageops::replace(&mut padded, &image, 0, 0);
  padded
}
