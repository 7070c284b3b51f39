// 该文件是 Qianli （千里眼） 项目的一部分。
// src/input.rs - 视频/图像输入与帧采集
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
use thiserror::Error;

use crate::FromUrl;

/// 视频元素
///
/// 报告当前显示帧的原始尺寸、是否挂载了实时流，并能给出当前帧的快照。
pub trait VideoElement {
  /// 原始宽度；没有可用帧时为 0
  fn video_width(&self) -> u32;
  /// 原始高度；没有可用帧时为 0
  fn video_height(&self) -> u32;
  /// 是否挂载了实时流
  fn has_stream(&self) -> bool;
  /// 当前显示帧
  fn current_frame(&mut self) -> Option<RgbImage>;

  /// 已结束或未设置：宽度为 0 且没有实时流
  fn is_ended(&self) -> bool {
    self.video_width() == 0 && !self.has_stream()
  }
}

impl<V: VideoElement + ?Sized> VideoElement for Box<V> {
  fn video_width(&self) -> u32 {
    (**self).video_width()
  }

  fn video_height(&self) -> u32 {
    (**self).video_height()
  }

  fn has_stream(&self) -> bool {
    (**self).has_stream()
  }

  fn current_frame(&mut self) -> Option<RgbImage> {
    (**self).current_frame()
  }
}

#[derive(Error, Debug, PartialEq)]
pub enum CaptureError {
  #[error("无效的缩放系数: {0}")]
  InvalidScale(f32),
  #[error("采集尺寸为空: {width}x{height}")]
  EmptySurface { width: u32, height: u32 },
  #[error("视频没有可用帧")]
  NoFrame,
}

/// 采集视频当前显示的帧
///
/// 输出尺寸为 `(video_width * scale_factor, video_height * scale_factor)`，不做缓冲，也不限速。
pub fn capture<V: VideoElement + ?Sized>(
  video: &mut V,
  scale_factor: f32,
) -> Result<RgbImage, CaptureError> {
  if !scale_factor.is_finite() || scale_factor <= 0.0 {
    return Err(CaptureError::InvalidScale(scale_factor));
  }

  let width = (video.video_width() as f32 * scale_factor).round() as u32;
  let height = (video.video_height() as f32 * scale_factor).round() as u32;
  if width == 0 || height == 0 {
    return Err(CaptureError::EmptySurface { width, height });
  }

  let frame = video.current_frame().ok_or(CaptureError::NoFrame)?;
  if frame.dimensions() == (width, height) {
    Ok(frame)
  } else {
    Ok(image::imageops::resize(
      &frame,
      width,
      height,
      FilterType::Triangle,
    ))
  }
}

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

mod folder_video;
pub use self::folder_video::{FolderVideo, FolderVideoError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GStreamerInputError, GStreamerInputPipelineBuilder, GStreamerVideo};

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("Image file input error: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[error("Folder video error: {0}")]
  FolderVideoError(#[from] FolderVideoError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer input error: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("URI scheme mismatch")]
  SchemeMismatch,
}

pub enum InputWrapper {
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
  FolderVideo(FolderVideo),
  #[cfg(feature = "gstreamer_input")]
  GStreamerVideo(GStreamerVideo),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    use crate::FromUrlWithScheme;

    #[cfg(feature = "gstreamer_input")]
    {
      if url.scheme() == GStreamerInputPipelineBuilder::SCHEME {
        let input = GStreamerInputPipelineBuilder::from_url(url)?.build()?;
        return Ok(InputWrapper::GStreamerVideo(input));
      }
    }
    #[cfg(feature = "read_image_file")]
    {
      if url.scheme() == ImageFileInput::SCHEME {
        let input = ImageFileInput::from_url(url)?;
        return Ok(InputWrapper::ReadImageFile(input));
      }
    }
    if url.scheme() == FolderVideo::SCHEME {
      let input = FolderVideo::from_url(url)?;
      return Ok(InputWrapper::FolderVideo(input));
    }
    Err(InputError::SchemeMismatch)
  }
}

impl VideoElement for InputWrapper {
  fn video_width(&self) -> u32 {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.video_width(),
      InputWrapper::FolderVideo(input) => input.video_width(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerVideo(input) => input.video_width(),
    }
  }

  fn video_height(&self) -> u32 {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.video_height(),
      InputWrapper::FolderVideo(input) => input.video_height(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerVideo(input) => input.video_height(),
    }
  }

  fn has_stream(&self) -> bool {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.has_stream(),
      InputWrapper::FolderVideo(input) => input.has_stream(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerVideo(input) => input.has_stream(),
    }
  }

  fn current_frame(&mut self) -> Option<RgbImage> {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.current_frame(),
      InputWrapper::FolderVideo(input) => input.current_frame(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerVideo(input) => input.current_frame(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  struct StillVideo {
    frame: RgbImage,
  }

  impl VideoElement for StillVideo {
    fn video_width(&self) -> u32 {
      self.frame.width()
    }

    fn video_height(&self) -> u32 {
      self.frame.height()
    }

    fn has_stream(&self) -> bool {
      false
    }

    fn current_frame(&mut self) -> Option<RgbImage> {
      Some(self.frame.clone())
    }
  }

  #[test]
  fn capture_at_native_size() {
    let mut video = StillVideo {
      frame: RgbImage::from_pixel(40, 30, Rgb([1, 2, 3])),
    };
    let surface = capture(&mut video, 1.0).unwrap();
    assert_eq!(surface.dimensions(), (40, 30));
    assert_eq!(surface.get_pixel(0, 0).0, [1, 2, 3]);
  }

  #[test]
  fn capture_applies_scale_factor() {
    let mut video = StillVideo {
      frame: RgbImage::new(40, 30),
    };
    let surface = capture(&mut video, 0.5).unwrap();
    assert_eq!(surface.dimensions(), (20, 15));
  }

  #[test]
  fn capture_rejects_bad_scale() {
    let mut video = StillVideo {
      frame: RgbImage::new(40, 30),
    };
    assert_eq!(capture(&mut video, 0.0), Err(CaptureError::InvalidScale(0.0)));
    assert!(capture(&mut video, f32::NAN).is_err());
  }

  #[test]
  fn capture_of_empty_video_fails() {
    let mut video = StillVideo {
      frame: RgbImage::new(0, 0),
    };
    assert!(video.is_ended());
    assert_eq!(
      capture(&mut video, 1.0),
      Err(CaptureError::EmptySurface {
        width: 0,
        height: 0
      })
    );
  }
}
