// 该文件是 Qianli （千里眼） 项目的一部分。
// src/output.rs - 输出定义
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::RgbImage;
use thiserror::Error;
use url::Url;

use crate::FromUrl;
#[cfg(any(
  feature = "save_image_file",
  feature = "directory_record",
  feature = "json_output"
))]
use crate::FromUrlWithScheme;
use crate::model::DetectBox;

/// 渲染输出面
pub trait Render {
  type Error;

  /// 把一帧及其检测框画到输出面上
  fn render_result(&self, frame: &RgbImage, boxes: &[DetectBox]) -> Result<(), Self::Error>;

  /// 清空输出面（视频结束时调用）
  fn clear(&self) -> Result<(), Self::Error>;
}

impl<R: Render + ?Sized> Render for &R {
  type Error = R::Error;

  fn render_result(&self, frame: &RgbImage, boxes: &[DetectBox]) -> Result<(), Self::Error> {
    (**self).render_result(frame, boxes)
  }

  fn clear(&self) -> Result<(), Self::Error> {
    (**self).clear()
  }
}

#[cfg(feature = "save_image_file")]
pub mod draw;

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

#[cfg(feature = "json_output")]
mod json_lines;
#[cfg(feature = "json_output")]
pub use self::json_lines::{JsonLinesError, JsonLinesOutput};

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[cfg(feature = "json_output")]
  #[error("JSON Lines 输出错误: {0}")]
  JsonLinesError(#[from] JsonLinesError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum OutputWrapper {
  #[cfg(feature = "save_image_file")]
  SaveImageFile(SaveImageFileOutput),
  #[cfg(feature = "directory_record")]
  DirectoryRecord(DirectoryRecordOutput),
  #[cfg(feature = "json_output")]
  JsonLines(JsonLinesOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  #[cfg_attr(
    not(any(
      feature = "save_image_file",
      feature = "directory_record",
      feature = "json_output"
    )),
    allow(unused_variables)
  )]
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "save_image_file")]
    {
      if url.scheme() == SaveImageFileOutput::SCHEME {
        return Ok(OutputWrapper::SaveImageFile(SaveImageFileOutput::from_url(url)?));
      }
    }
    #[cfg(feature = "directory_record")]
    {
      if url.scheme() == DirectoryRecordOutput::SCHEME {
        return Ok(OutputWrapper::DirectoryRecord(DirectoryRecordOutput::from_url(url)?));
      }
    }
    #[cfg(feature = "json_output")]
    {
      if url.scheme() == JsonLinesOutput::SCHEME {
        return Ok(OutputWrapper::JsonLines(JsonLinesOutput::from_url(url)?));
      }
    }
    Err(OutputError::SchemeMismatch)
  }
}

#[cfg(feature = "save_image_file")]
impl OutputWrapper {
  /// 替换绘制样式；JSON 输出只取其中的类别标签
  pub fn with_draw(self, draw: draw::Draw) -> Self {
    match self {
      OutputWrapper::SaveImageFile(output) => OutputWrapper::SaveImageFile(output.with_draw(draw)),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecord(output) => {
        OutputWrapper::DirectoryRecord(output.with_draw(draw))
      }
      #[cfg(feature = "json_output")]
      OutputWrapper::JsonLines(output) => {
        OutputWrapper::JsonLines(output.with_labels(draw.labels().clone()))
      }
    }
  }
}

impl Render for OutputWrapper {
  type Error = OutputError;

  #[cfg_attr(
    not(any(
      feature = "save_image_file",
      feature = "directory_record",
      feature = "json_output"
    )),
    allow(unused_variables)
  )]
  fn render_result(&self, frame: &RgbImage, boxes: &[DetectBox]) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFile(output) => Ok(output.render_result(frame, boxes)?),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecord(output) => Ok(output.render_result(frame, boxes)?),
      #[cfg(feature = "json_output")]
      OutputWrapper::JsonLines(output) => Ok(output.render_result(frame, boxes)?),
      #[allow(unreachable_patterns)]
      _ => Err(OutputError::SchemeMismatch),
    }
  }

  fn clear(&self) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFile(output) => Ok(output.clear()?),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecord(output) => Ok(output.clear()?),
      #[cfg(feature = "json_output")]
      OutputWrapper::JsonLines(output) => Ok(output.clear()?),
      #[allow(unreachable_patterns)]
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("rtsp://localhost/stream").unwrap();
    assert!(matches!(
      OutputWrapper::from_url(&url),
      Err(OutputError::SchemeMismatch)
    ));
  }

  #[cfg(feature = "json_output")]
  #[test]
  fn dispatches_by_scheme() {
    let url = Url::parse("jsonl:-").unwrap();
    assert!(matches!(
      OutputWrapper::from_url(&url),
      Ok(OutputWrapper::JsonLines(_))
    ));
  }
}
