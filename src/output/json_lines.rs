// 该文件是 Qianli （千里眼） 项目的一部分。
// src/output/json_lines.rs - JSON Lines 检测结果输出
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

use std::{
  fs::File,
  io::{BufWriter, Write},
  path::Path,
  sync::Mutex,
};

use chrono::{SecondsFormat, Utc};
use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, labels::Labels, model::DetectBox, output::Render};

#[derive(Error, Debug)]
pub enum JsonLinesError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("输出流锁已损坏")]
  SinkPoisoned,
}

#[derive(Serialize)]
struct BoxRecord<'a> {
  label: u32,
  name: String,
  probability: f32,
  bounding: &'a [f32; 4],
}

#[derive(Serialize)]
struct FrameRecord<'a> {
  timestamp: String,
  event: &'static str,
  width: u32,
  height: u32,
  boxes: Vec<BoxRecord<'a>>,
}

/// 每帧写一行 JSON
///
/// `jsonl:///path/to/result.jsonl` 写文件，`jsonl:-` 写标准输出。
/// 视频结束时写入 `"event": "cleared"` 的空记录。
pub struct JsonLinesOutput {
  sink: Mutex<Box<dyn Write + Send>>,
  labels: Labels,
}

impl FromUrlWithScheme for JsonLinesOutput {
  const SCHEME: &'static str = "jsonl";
}

impl FromUrl for JsonLinesOutput {
  type Error = JsonLinesError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(JsonLinesError::SchemeMismatch);
    }

    if uri.path() == "-" {
      info!("检测结果写入标准输出");
      return Ok(Self::from_writer(std::io::stdout()));
    }
    Self::create(uri.path())
  }
}

impl JsonLinesOutput {
  pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, JsonLinesError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    info!("检测结果写入文件: {}", path.display());
    Ok(Self::from_writer(BufWriter::new(file)))
  }

  pub fn from_writer<W: Write + Send + 'static>(writer: W) -> Self {
    JsonLinesOutput {
      sink: Mutex::new(Box::new(writer)),
      labels: Labels::default(),
    }
  }

  pub fn with_labels(mut self, labels: Labels) -> Self {
    self.labels = labels;
    self
  }

  fn write_record(&self, record: &FrameRecord<'_>) -> Result<(), JsonLinesError> {
    let mut sink = self.sink.lock().map_err(|_| JsonLinesError::SinkPoisoned)?;
    serde_json::to_writer(&mut *sink, record)?;
    writeln!(sink)?;
    sink.flush()?;
    Ok(())
  }

  fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
  }
}

impl Render for JsonLinesOutput {
  type Error = JsonLinesError;

  fn render_result(&self, frame: &RgbImage, boxes: &[DetectBox]) -> Result<(), Self::Error> {
    let record = FrameRecord {
      timestamp: Self::now(),
      event: "frame",
      width: frame.width(),
      height: frame.height(),
      boxes: boxes
        .iter()
        .map(|b| BoxRecord {
          label: b.label,
          name: self.labels.name(b.label),
          probability: b.probability,
          bounding: &b.bounding,
        })
        .collect(),
    };
    self.write_record(&record)
  }

  fn clear(&self) -> Result<(), Self::Error> {
    self.write_record(&FrameRecord {
      timestamp: Self::now(),
      event: "cleared",
      width: 0,
      height: 0,
      boxes: Vec::new(),
    })
  }
}
