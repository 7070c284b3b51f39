// 该文件是 Qianli （千里眼） 项目的一部分。
// src/bin/detect_image.rs - 单张图片检测
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use qianli::{
  FromUrl,
  detector::{DetectConfig, Detector},
  input::ImageFileInput,
  labels::Labels,
  model::OnnxBackendBuilder,
  output::{OutputWrapper, draw::Draw},
  task::{OneShotTask, Task},
};

/// Qianli 单张图片检测参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型，例如 onnx:///models/yolov8n.onnx?nms=/models/nms.onnx
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入图片，例如 image:///data/bus.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出，例如 image:///tmp/bus.png 或 jsonl:-
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  /// 每张图片最多保留的检测框数量
  #[arg(long, default_value_t = 100)]
  pub topk: usize,
  /// NMS IOU 阈值
  #[arg(long, default_value_t = 0.45)]
  pub iou: f32,
  /// 置信度阈值
  #[arg(long, default_value_t = 0.25)]
  pub score: f32,

  /// 类别名称 JSON 文件，缺省为 COCO 80 类
  #[arg(long, value_name = "LABELS")]
  pub labels: Option<PathBuf>,
  /// 标签字体文件（TTF/OTF），缺省时只画框
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let labels = match &args.labels {
    Some(path) => Labels::from_file(path)?,
    None => Labels::coco(),
  };
  let mut draw = Draw::default().with_labels(labels);
  if let Some(font) = &args.font {
    draw = draw.with_font_file(font)?;
  }

  let config = DetectConfig {
    topk: args.topk,
    iou_threshold: args.iou,
    score_threshold: args.score,
  };

  let input = ImageFileInput::from_url(&args.input)?;
  let backend = OnnxBackendBuilder::from_url(&args.model)?.build()?;
  let detector = Detector::new(backend, config)?;
  let output = OutputWrapper::from_url(&args.output)?.with_draw(draw);

  let boxes = OneShotTask.run_task(input, &detector, &output)?;
  info!("共检测到 {} 个目标", boxes.len());

  Ok(())
}
