// 该文件是 Qianli （千里眼） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{
  path::{Path, PathBuf},
  sync::atomic::{AtomicU32, Ordering},
};

use chrono::{Datelike, Utc};
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  FromUrl, FromUrlWithScheme,
  model::DetectBox,
  output::{
    Render,
    draw::{Draw, Record},
  },
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 保存方式：绘制检测框，或保存原图并附带文本记录
enum RecordMode {
  Draw,
  Record(Record),
}

/// 把每帧结果写入按日期分层的目录
///
/// URL 形如 `folder:///records?always&record=name`：
/// - `always`：没有检测结果的帧也保存
/// - `record=name|id`：保存原图，检测结果写入同名 `.txt`
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: Draw,
  mode: RecordMode,
  frame_counter: AtomicU32,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let mode = uri
      .query_pairs()
      .find(|(k, _)| k == "record")
      .map(|(_, v)| {
        RecordMode::Record(Record {
          label_with_name: v != "id",
        })
      })
      .unwrap_or(RecordMode::Draw);
    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(uri.path()),
      draw: Draw::default(),
      mode,
      frame_counter: AtomicU32::new(0),
      always,
    })
  }
}

impl DirectoryRecordOutput {
  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  fn frame_id(&self) -> u32 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  fn frame_path(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:06X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }
}

impl Render for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &RgbImage, boxes: &[DetectBox]) -> Result<(), Self::Error> {
    if !self.always && boxes.is_empty() {
      debug!("本帧没有检测结果，跳过保存");
      return Ok(());
    }

    let path = self.frame_path()?;
    match &self.mode {
      RecordMode::Draw => {
        self.draw.draw_on_copy(frame, boxes).save(&path)?;
      }
      RecordMode::Record(record) => {
        frame.save(&path)?;
        record.record(self.draw.labels(), boxes, &path)?;
      }
    }
    debug!("保存帧记录: {}", path.display());
    Ok(())
  }

  fn clear(&self) -> Result<(), Self::Error> {
    info!(
      "视频结束，目录 {} 中共记录 {} 帧",
      self.directory.display(),
      self.frame_counter.load(Ordering::Relaxed)
    );
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn saved_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
      for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
          pending.push(path);
        } else {
          files.push(path);
        }
      }
    }
    files.sort();
    files
  }

  fn one_box() -> Vec<DetectBox> {
    vec![DetectBox {
      label: 1,
      probability: 0.7,
      bounding: [1.0, 1.0, 4.0, 4.0],
    }]
  }

  #[test]
  fn empty_frames_are_skipped_unless_always() {
    let dir = tempfile::tempdir().unwrap();
    let url = url::Url::parse(&format!("folder://{}", dir.path().display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();

    let frame = RgbImage::new(8, 8);
    output.render_result(&frame, &[]).unwrap();
    assert!(saved_files(dir.path()).is_empty());

    output.render_result(&frame, &one_box()).unwrap();
    output.clear().unwrap();
    assert_eq!(saved_files(dir.path()).len(), 1);

    let always_dir = tempfile::tempdir().unwrap();
    let url = url::Url::parse(&format!("folder://{}?always", always_dir.path().display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    output.render_result(&frame, &[]).unwrap();
    output.render_result(&frame, &[]).unwrap();
    assert_eq!(saved_files(always_dir.path()).len(), 2);
  }

  #[test]
  fn record_mode_writes_sidecar_text() {
    let dir = tempfile::tempdir().unwrap();
    let url = url::Url::parse(&format!("folder://{}?record=id", dir.path().display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();

    let frame = RgbImage::from_pixel(8, 8, image::Rgb([10, 20, 30]));
    output.render_result(&frame, &one_box()).unwrap();

    let files = saved_files(dir.path());
    assert_eq!(files.len(), 2);
    let text = files
      .iter()
      .find(|p| p.extension().is_some_and(|e| e == "txt"))
      .map(|p| std::fs::read_to_string(p).unwrap())
      .unwrap();
    assert_eq!(text, "1, 0.7000, 1.00, 1.00, 4.00, 4.00");

    // 记录模式保存原图，不画框
    let png = files
      .iter()
      .find(|p| p.extension().is_some_and(|e| e == "png"))
      .unwrap();
    assert_eq!(image::open(png).unwrap().to_rgb8(), frame);
  }

  #[test]
  fn record_name_mode_uses_label_names() {
    let dir = tempfile::tempdir().unwrap();
    let url = url::Url::parse(&format!("folder://{}?record=name", dir.path().display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();

    output.render_result(&RgbImage::new(8, 8), &one_box()).unwrap();

    let text = saved_files(dir.path())
      .iter()
      .find(|p| p.extension().is_some_and(|e| e == "txt"))
      .map(|p| std::fs::read_to_string(p).unwrap())
      .unwrap();
    assert!(text.starts_with("bicycle, 0.7000"));
  }
}
