// 该文件是 Qianli （千里眼） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 视频输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # GStreamer 视频输入模块
//!
//! 把 GStreamer 管道包装成视频元素，支持：
//! - 视频文件读取
//! - 摄像头捕获（V4L2）
//!
//! ## 系统依赖
//!
//! 使用前需要安装 GStreamer 开发库：
//!
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! 并在 `Cargo.toml` 中启用 `gstreamer_input` 特性。
//!
//! ## URL 格式
//!
//! - `gst://file/path/to/video.mp4`
//! - `gst://camera/dev/video0?width=1280&height=720&fps=30&format=YUY2&rotate=90`
//!
//! ## 安全性注意
//!
//! 文件路径与设备路径直接拼接进管道描述。在生产环境中使用不可信输入时，
//! 应验证或限制这些参数。

use std::{cell::Cell, collections::HashMap};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, input::VideoElement};

/// 取帧时等待新样本的最长时间（毫秒）
const PULL_TIMEOUT_MS: u64 = 100;
/// 启动时等待第一帧的最长时间（毫秒），文件解码与摄像头协商都可能较慢
const FIRST_FRAME_TIMEOUT_MS: u64 = 5000;

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// URI scheme 不匹配（期望 "gst://"）
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsink 元素
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  /// 无法转换元素为 appsink
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  /// 无法从 caps 获取视频信息
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  /// 不支持的视频格式
  #[error("Unsupported video format")]
  UnsupportedFormat,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 缓冲区大小不匹配
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

enum GStreamerInputBuilderItem {
  FileSource(String),
  CameraSource {
    camera: String,
    io_mode: Option<u32>,
    format: String,
    width: u32,
    height: u32,
    fps: u32,
  },
  TargetFormat {
    format: String,
  },
  VideoFlip {
    method: u32,
    direction: u32,
  },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location={} ! decodebin", path)
      }
      GStreamerInputBuilderItem::CameraSource {
        camera,
        io_mode,
        format,
        width,
        height,
        fps,
      } => {
        let io_mode_str = if let Some(mode) = io_mode {
          format!(" io-mode={}", mode)
        } else {
          "".to_string()
        };
        format!(
          "v4l2src device={}{} ! video/x-raw,format={},width={},height={},framerate={}/1",
          camera, io_mode_str, format, width, height, fps
        )
      }
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
      GStreamerInputBuilderItem::VideoFlip { method, direction } => {
        format!("videoflip method={} video-direction={}", method, direction)
      }
    }
  }
}

/// GStreamer 输入管道构建器
pub struct GStreamerInputPipelineBuilder {
  items: Vec<GStreamerInputBuilderItem>,
  live: bool,
}

impl GStreamerInputPipelineBuilder {
  fn camera_pipeline(path: &str, query: &HashMap<String, String>) -> Self {
    let io_mode = query.get("io-mode").and_then(|v| v.parse::<u32>().ok());
    let format = query
      .get("format")
      .map(String::from)
      .unwrap_or(String::from("YUY2"));
    let parse = |key: &str, default: u32| {
      query
        .get(key)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
    };

    let mut items = vec![GStreamerInputBuilderItem::CameraSource {
      camera: path.to_string(),
      io_mode,
      format,
      width: parse("width", 640),
      height: parse("height", 480),
      fps: parse("fps", 30),
    }];
    items.extend(Self::video_flip(query.get("rotate").map(|s| s.as_ref())));

    GStreamerInputPipelineBuilder { items, live: true }
  }

  fn file_pipeline(path: &str, query: &HashMap<String, String>) -> Self {
    let mut items = vec![GStreamerInputBuilderItem::FileSource(path.to_string())];
    items.extend(Self::video_flip(query.get("rotate").map(|s| s.as_ref())));

    GStreamerInputPipelineBuilder { items, live: false }
  }

  fn video_flip(rotate: Option<&str>) -> Option<GStreamerInputBuilderItem> {
    let (method, direction) = match rotate? {
      "90" => (1, 1),
      "180" => (2, 2),
      "270" => (3, 3),
      _ => (0, 0),
    };
    Some(GStreamerInputBuilderItem::VideoFlip { method, direction })
  }

  pub fn build(self) -> Result<GStreamerVideo, GStreamerInputError> {
    gst::init()?;

    let basic_pipeline = self
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    let full_pipeline = format!(
      "{} ! appsink max-buffers=1 drop=true sync={} name=sink",
      basic_pipeline, !self.live
    );

    info!("GStreamer pipeline description: {}", full_pipeline);
    GStreamerVideo::launch(&full_pipeline, self.live)
  }
}

impl FromUrlWithScheme for GStreamerInputPipelineBuilder {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerInputPipelineBuilder {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerInputError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    let mut builder = match url.host_str() {
      Some("camera") => Self::camera_pipeline(url.path(), &query),
      Some("file") => Self::file_pipeline(url.path(), &query),
      _ => {
        return Err(GStreamerInputError::SchemeMismatch);
      }
    };

    builder.items.push(GStreamerInputBuilderItem::TargetFormat {
      format: "RGB".to_string(),
    });

    Ok(builder)
  }
}

/// GStreamer 视频元素
///
/// 管道未到达 EOS、总线上也没有错误时视为挂载了流；每次取帧拉取最新样本，
/// 没有新样本时返回最近一帧。总线上出现 ERROR 或 EOS 后视频即结束，不再恢复。
pub struct GStreamerVideo {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  live: bool,
  latest: Option<RgbImage>,
  ended: Cell<bool>,
}

impl Drop for GStreamerVideo {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

impl GStreamerVideo {
  /// 启动以名为 `sink` 的 appsink 结尾的管道，并预取第一帧以便报告视频尺寸
  fn launch(description: &str, live: bool) -> Result<Self, GStreamerInputError> {
    let pipeline = gst::parse::launch(description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    let mut video = GStreamerVideo {
      pipeline,
      appsink,
      live,
      latest: None,
      ended: Cell::new(false),
    };
    video.pull_latest(FIRST_FRAME_TIMEOUT_MS);
    if video.latest.is_none() && !video.is_ended() {
      warn!("{} 毫秒内没有收到第一帧", FIRST_FRAME_TIMEOUT_MS);
    }
    Ok(video)
  }

  pub fn is_live(&self) -> bool {
    self.live
  }

  /// 管道是否已因错误或 EOS 结束
  pub fn is_ended(&self) -> bool {
    self.poll_bus()
  }

  /// 取出总线上积压的 ERROR / EOS 消息，出现任意一条即标记结束
  fn poll_bus(&self) -> bool {
    if self.ended.get() {
      return true;
    }
    let Some(bus) = self.pipeline.bus() else {
      return false;
    };
    while let Some(message) = bus.pop_filtered(&[gst::MessageType::Error, gst::MessageType::Eos]) {
      match message.view() {
        gst::MessageView::Error(err) => error!(
          "GStreamer 管道错误 ({}): {} {:?}",
          message
            .src()
            .map(|s| s.path_string().to_string())
            .unwrap_or_default(),
          err.error(),
          err.debug()
        ),
        _ => info!("GStreamer 管道到达流末尾"),
      }
      self.ended.set(true);
    }
    self.ended.get()
  }

  fn pull_latest(&mut self, timeout_ms: u64) {
    if self.poll_bus() {
      self.latest = None;
      return;
    }
    let Some(sample) = self
      .appsink
      .try_pull_sample(gst::ClockTime::from_mseconds(timeout_ms))
    else {
      return;
    };
    match convert_sample_to_rgb(sample) {
      Ok(image) => self.latest = Some(image),
      Err(e) => error!("Failed to fetch sample: {}", e),
    }
  }

  fn latest_dimension(&self, dimension: fn(&RgbImage) -> u32) -> u32 {
    if self.poll_bus() || self.appsink.is_eos() {
      return 0;
    }
    self.latest.as_ref().map(dimension).unwrap_or(0)
  }
}

impl VideoElement for GStreamerVideo {
  fn video_width(&self) -> u32 {
    self.latest_dimension(RgbImage::width)
  }

  fn video_height(&self) -> u32 {
    self.latest_dimension(RgbImage::height)
  }

  fn has_stream(&self) -> bool {
    !self.poll_bus() && !self.appsink.is_eos()
  }

  fn current_frame(&mut self) -> Option<RgbImage> {
    self.pull_latest(PULL_TIMEOUT_MS);
    self.latest.clone()
  }
}

fn convert_sample_to_rgb(sample: gst::Sample) -> Result<RgbImage, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  let expected_size = stride * height;
  if data.len() < expected_size || stride < width * 3 {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected: expected_size,
      actual: data.len(),
    });
  }

  let mut pixels = Vec::with_capacity(width * height * 3);
  match video_info.format() {
    gst_video::VideoFormat::Rgb => {
      for row in data.chunks(stride).take(height) {
        pixels.extend_from_slice(&row[..width * 3]);
      }
    }
    gst_video::VideoFormat::Bgr => {
      for row in data.chunks(stride).take(height) {
        for px in row[..width * 3].chunks_exact(3) {
          pixels.extend_from_slice(&[px[2], px[1], px[0]]);
        }
      }
    }
    _ => return Err(GStreamerInputError::UnsupportedFormat),
  }

  RgbImage::from_raw(width as u32, height as u32, pixels).ok_or(
    GStreamerInputError::BufferSizeMismatch {
      expected: width * height * 3,
      actual: data.len(),
    },
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  fn test_source() -> GStreamerVideo {
    gst::init().unwrap();
    GStreamerVideo::launch(
      "videotestsrc is-live=true ! videoconvert ! video/x-raw,format=RGB,width=32,height=24 \
       ! appsink max-buffers=1 drop=true sync=false name=sink",
      true,
    )
    .unwrap()
  }

  #[test]
  fn bus_error_ends_the_stream() {
    let mut video = test_source();
    assert!(video.has_stream());
    assert_eq!((video.video_width(), video.video_height()), (32, 24));

    let message = gst::message::Error::builder(gst::CoreError::Failed, "设备已断开")
      .src(&video.appsink)
      .build();
    video.pipeline.bus().unwrap().post(message).unwrap();

    assert!(!video.has_stream());
    assert!(video.is_ended());
    assert_eq!(video.video_width(), 0);
    assert_eq!(video.current_frame(), None);
  }

  #[test]
  fn eos_message_ends_the_stream() {
    let video = test_source();
    video
      .pipeline
      .bus()
      .unwrap()
      .post(gst::message::Eos::new())
      .unwrap();

    assert!(!video.has_stream());
    assert_eq!(video.video_height(), 0);
  }
}
