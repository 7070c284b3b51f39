// 该文件是 Qianli （千里眼） 项目的一部分。
// src/bin/detect_video.rs - 视频流检测
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{path::PathBuf, thread, time::Duration};

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use qianli::{
  FromUrl,
  detector::{DetectConfig, Detector},
  input::InputWrapper,
  labels::Labels,
  model::OnnxBackendBuilder,
  output::{OutputWrapper, draw::Draw},
  scheduler::{CancelToken, FrameRateScheduler},
  task::VideoPump,
};

/// Qianli 视频检测参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型，例如 onnx:///models/yolov8n.onnx?threads=4
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 视频来源，例如 gst://camera/dev/video0 或 folder:///data/frames
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出，例如 folder:///records?always 或 jsonl:///tmp/result.jsonl
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  #[arg(long, default_value_t = 100)]
  pub topk: usize,
  #[arg(long, default_value_t = 0.45)]
  pub iou: f32,
  #[arg(long, default_value_t = 0.25)]
  pub score: f32,

  /// 采集缩放系数
  #[arg(long, default_value_t = 1.0)]
  pub scale: f32,
  /// 调度帧率，0 表示不限速
  #[arg(long, default_value_t = 30.0)]
  pub fps: f64,
  /// 处理指定帧数后退出
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub max_frames: Option<usize>,

  #[arg(long, value_name = "LABELS")]
  pub labels: Option<PathBuf>,
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

  let mut input = InputWrapper::from_url(&args.input)?;
  let backend = OnnxBackendBuilder::from_url(&args.model)?.build()?;
  let detector = Detector::new(backend, config)?;
  let output = OutputWrapper::from_url(&args.output)?.with_draw(draw);

  let cancel = CancelToken::new();
  let handler_token = cancel.clone();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    handler_token.cancel();
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;

  let report = VideoPump::new(FrameRateScheduler::new(args.fps))
    .with_cancel_token(cancel)
    .with_scale_factor(args.scale)
    .with_frame_number(args.max_frames)
    .run(&mut input, &detector, &output);

  info!(
    "任务完成: 渲染 {} 帧，跳过 {} 帧，停止原因 {:?}",
    report.rendered, report.skipped, report.stop_reason
  );

  Ok(())
}
