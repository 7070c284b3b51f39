// 该文件是 Qianli （千里眼） 项目的一部分。
// src/input/folder_video.rs - 目录图像序列视频
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{
  collections::VecDeque,
  path::{Path, PathBuf},
};

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, input::VideoElement};

const FRAME_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "gif", "webp"];

#[derive(Error, Debug)]
pub enum FolderVideoError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("目录中没有图像帧: {0}")]
  Empty(String),
}

/// 把目录里的图片按文件名顺序当作视频播放
///
/// 每次取帧前进一帧；最后一帧被取走后宽度为 0，且没有实时流，视为播放结束。
/// 无法解码的文件会被跳过。
pub struct FolderVideo {
  frames: VecDeque<PathBuf>,
  pending: Option<RgbImage>,
}

impl FromUrlWithScheme for FolderVideo {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for FolderVideo {
  type Error = FolderVideoError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(FolderVideoError::SchemeMismatch);
    }
    Self::open(url.path())
  }
}

impl FolderVideo {
  pub fn open<P: AsRef<Path>>(directory: P) -> Result<Self, FolderVideoError> {
    let directory = directory.as_ref();
    let mut frames = std::fs::read_dir(directory)?
      .filter_map(|entry| entry.ok().map(|e| e.path()))
      .filter(|path| path.is_file() && is_frame_file(path))
      .collect::<Vec<_>>();
    frames.sort();

    if frames.is_empty() {
      return Err(FolderVideoError::Empty(directory.display().to_string()));
    }
    info!("目录 {} 中共有 {} 帧", directory.display(), frames.len());

    let mut video = FolderVideo {
      frames: frames.into(),
      pending: None,
    };
    video.advance();
    Ok(video)
  }

  /// 剩余帧数（含当前帧）
  pub fn remaining(&self) -> usize {
    self.frames.len() + usize::from(self.pending.is_some())
  }

  fn advance(&mut self) {
    self.pending = None;
    while let Some(path) = self.frames.pop_front() {
      match ImageReader::open(&path).and_then(|r| r.with_guessed_format()) {
        Ok(reader) => match reader.decode() {
          Ok(image) => {
            self.pending = Some(image.to_rgb8());
            return;
          }
          Err(e) => warn!("无法解码帧 {}: {}", path.display(), e),
        },
        Err(e) => warn!("无法打开帧 {}: {}", path.display(), e),
      }
    }
  }
}

fn is_frame_file(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| {
      let ext = ext.to_lowercase();
      FRAME_EXTENSIONS.contains(&ext.as_str())
    })
    .unwrap_or(false)
}

impl VideoElement for FolderVideo {
  fn video_width(&self) -> u32 {
    self.pending.as_ref().map(RgbImage::width).unwrap_or(0)
  }

  fn video_height(&self) -> u32 {
    self.pending.as_ref().map(RgbImage::height).unwrap_or(0)
  }

  fn has_stream(&self) -> bool {
    false
  }

  fn current_frame(&mut self) -> Option<RgbImage> {
    let frame = self.pending.take();
    self.advance();
    frame
  }
}
