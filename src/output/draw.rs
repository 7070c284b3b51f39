// 该文件是 Qianli （千里眼） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;
use tracing::info;

use crate::{labels::Labels, model::DetectBox};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_THICKNESS: u32 = 2;
const PALETTE_SIZE: usize = 80;

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("无法加载字体文件: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

/// 在图像上绘制检测框
///
/// 框坐标为原图像素坐标，绘制前裁剪到图像范围内。配置了字体时在框上方写出
/// `名称 置信度`。
pub struct Draw {
  font: Option<FontVec>,
  font_size: f32,
  labels: Labels,
  colors: Vec<Rgb<u8>>,
}

impl Default for Draw {
  fn default() -> Self {
    let colors = (0..PALETTE_SIZE)
      .map(|i| hsv_to_rgb((i as f32 / PALETTE_SIZE as f32) * 360.0, 0.8, 0.9))
      .collect();

    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      labels: Labels::default(),
      colors,
    }
  }
}

impl Draw {
  pub fn with_font_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, DrawError> {
    let data = std::fs::read(path.as_ref())?;
    self.font = Some(FontVec::try_from_vec(data)?);
    info!("加载标签字体: {}", path.as_ref().display());
    Ok(self)
  }

  pub fn with_font_size(mut self, font_size: f32) -> Self {
    self.font_size = font_size;
    self
  }

  pub fn with_labels(mut self, labels: Labels) -> Self {
    self.labels = labels;
    self
  }

  pub fn labels(&self) -> &Labels {
    &self.labels
  }

  pub fn color_of(&self, label: u32) -> Rgb<u8> {
    self.colors[label as usize % self.colors.len()]
  }

  pub fn draw_detections(&self, image: &mut RgbImage, boxes: &[DetectBox]) {
    for detect_box in boxes {
      let Some(rect) = clamp_to_image(detect_box, image.width(), image.height()) else {
        continue;
      };
      let color = self.color_of(detect_box.label);

      for t in 0..BOX_THICKNESS {
        let (w, h) = (rect.width(), rect.height());
        if w <= 2 * t || h <= 2 * t {
          break;
        }
        let inner = Rect::at(rect.left() + t as i32, rect.top() + t as i32).of_size(w - 2 * t, h - 2 * t);
        draw_hollow_rect_mut(image, inner, color);
      }

      if let Some(font) = &self.font {
        let caption = format!(
          "{} {:.2}",
          self.labels.name(detect_box.label),
          detect_box.probability
        );
        let scale = PxScale::from(self.font_size);
        let (text_width, text_height) = text_size(scale, font, &caption);
        let text_height = text_height as i32 + 2 * LABEL_TEXT_VERTICAL_PADDING;

        // 标签放在框上方，放不下时贴着图像顶部
        let label_x = rect.left();
        let label_y = (rect.top() - text_height).max(0);
        let label_width = text_width.min(image.width() - label_x as u32);
        if label_width == 0 {
          continue;
        }

        let background = Rect::at(label_x, label_y).of_size(label_width, text_height as u32);
        draw_filled_rect_mut(image, background, color);
        draw_text_mut(
          image,
          Rgb([255u8, 255u8, 255u8]),
          label_x,
          label_y + LABEL_TEXT_VERTICAL_PADDING,
          scale,
          font,
          &caption,
        );
      }
    }
  }

  pub fn draw_on_copy(&self, frame: &RgbImage, boxes: &[DetectBox]) -> RgbImage {
    let mut image = frame.clone();
    self.draw_detections(&mut image, boxes);
    image
  }
}

/// 把检测框裁剪到 `width x height` 图像范围内；完全在图像外或退化为空时返回 `None`
pub fn clamp_to_image(detect_box: &DetectBox, width: u32, height: u32) -> Option<Rect> {
  let [x, y, w, h] = detect_box.bounding;
  if ![x, y, w, h].iter().all(|v| v.is_finite()) {
    return None;
  }

  let x_min = x.floor().max(0.0);
  let y_min = y.floor().max(0.0);
  let x_max = (x + w).ceil().min(width as f32);
  let y_max = (y + h).ceil().min(height as f32);

  if x_max - x_min < 1.0 || y_max - y_min < 1.0 {
    return None;
  }

  Some(Rect::at(x_min as i32, y_min as i32).of_size((x_max - x_min) as u32, (y_max - y_min) as u32))
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

/// 检测结果的文本记录，每行 `名称或编号, 置信度, x, y, w, h`
pub struct Record {
  pub label_with_name: bool,
}

impl Record {
  pub fn record(
    &self,
    labels: &Labels,
    boxes: &[DetectBox],
    path: &Path,
  ) -> Result<(), std::io::Error> {
    let records = boxes
      .iter()
      .map(|b| {
        let name = if self.label_with_name {
          labels.name(b.label)
        } else {
          b.label.to_string()
        };
        format!(
          "{}, {:.4}, {:.2}, {:.2}, {:.2}, {:.2}",
          name,
          b.probability,
          b.x(),
          b.y(),
          b.width(),
          b.height()
        )
      })
      .collect::<Vec<_>>();
    std::fs::write(path.with_extension("txt"), records.join("\n"))
  }
}
