// 该文件是 Qianli （千里眼） 项目的一部分。
// tests/pipeline.rs - 检测管线集成测试
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{
  cell::{Cell, RefCell},
  convert::Infallible,
};

use image::{Rgb, RgbImage};
use ndarray::{Array2, Array3};
use thiserror::Error;

use qianli::{
  detector::{DetectConfig, Detector},
  frame::{InputShape, InputTensor},
  input::VideoElement,
  model::{
    ConfigTensor, CpuNms, DetectBox, InferenceBackend, RawOutput,
    cpu_nms::{CpuNmsError, RawLayout},
  },
  output::Render,
  preprocess::Preprocessor,
  scheduler::FrameScheduler,
  task::{PumpState, StopReason, VideoPump},
};

#[derive(Debug, Error)]
enum FakeError {
  #[error("后端拒绝")]
  Rejected,
  #[error(transparent)]
  Nms(#[from] CpuNmsError),
}

/// 返回固定张量的假后端，记录调用顺序与收到的 NMS 配置
struct FakeBackend {
  raw: RawOutput,
  cpu_nms: Option<CpuNms>,
  reject_calls: Vec<usize>,
  forward_calls: Cell<usize>,
  log: RefCell<Vec<&'static str>>,
  configs: RefCell<Vec<ConfigTensor>>,
}

impl FakeBackend {
  /// NMS 阶段原样返回 `selected`
  fn passthrough(selected: Array3<f32>) -> Self {
    Self {
      raw: selected.into_dyn(),
      cpu_nms: None,
      reject_calls: Vec::new(),
      forward_calls: Cell::new(0),
      log: RefCell::new(Vec::new()),
      configs: RefCell::new(Vec::new()),
    }
  }

  /// 前向输出 [1, 4 + C, anchors]，NMS 阶段交给 `CpuNms`
  fn with_cpu_nms(raw: Array3<f32>) -> Self {
    Self {
      cpu_nms: Some(CpuNms::new(RawLayout::FeaturesFirst)),
      ..Self::passthrough(raw)
    }
  }

  fn rejecting(mut self, calls: &[usize]) -> Self {
    self.reject_calls = calls.to_vec();
    self
  }
}

impl InferenceBackend for FakeBackend {
  type Error = FakeError;

  fn input_shape(&self) -> InputShape {
    InputShape([1, 3, 64, 64])
  }

  fn forward(&self, input: &InputTensor) -> Result<RawOutput, Self::Error> {
    assert_eq!(input.shape(), [1, 3, 64, 64]);
    self.log.borrow_mut().push("forward");

    let call = self.forward_calls.get() + 1;
    self.forward_calls.set(call);
    if self.reject_calls.contains(&call) {
      return Err(FakeError::Rejected);
    }
    Ok(self.raw.clone())
  }

  fn nms(&self, raw: &RawOutput, config: &ConfigTensor) -> Result<RawOutput, Self::Error> {
    self.log.borrow_mut().push("nms");
    self.configs.borrow_mut().push(*config);
    match &self.cpu_nms {
      Some(nms) => Ok(nms.run(raw, config)?),
      None => Ok(raw.clone()),
    }
  }
}

/// 按给定宽度序列播放的视频，宽度为 0 表示没有可用帧
struct ScriptedVideo {
  widths: Vec<u32>,
  stream: bool,
  cursor: usize,
}

impl ScriptedVideo {
  fn frames(count: usize) -> Self {
    Self {
      widths: vec![80; count],
      stream: false,
      cursor: 0,
    }
  }
}

impl VideoElement for ScriptedVideo {
  fn video_width(&self) -> u32 {
    self.widths.get(self.cursor).copied().unwrap_or(0)
  }

  fn video_height(&self) -> u32 {
    if self.video_width() > 0 { 40 } else { 0 }
  }

  fn has_stream(&self) -> bool {
    self.stream
  }

  fn current_frame(&mut self) -> Option<RgbImage> {
    let width = self.video_width();
    self.cursor += 1;
    (width > 0).then(|| RgbImage::from_pixel(width, 40, Rgb([120, 60, 30])))
  }
}

#[derive(Default)]
struct RecordingSurface {
  rendered: RefCell<Vec<Vec<DetectBox>>>,
  cleared: Cell<usize>,
}

impl Render for RecordingSurface {
  type Error = Infallible;

  fn render_result(&self, _frame: &RgbImage, boxes: &[DetectBox]) -> Result<(), Self::Error> {
    self.rendered.borrow_mut().push(boxes.to_vec());
    Ok(())
  }

  fn clear(&self) -> Result<(), Self::Error> {
    self.cleared.set(self.cleared.get() + 1);
    Ok(())
  }
}

#[derive(Default)]
struct CountingScheduler {
  ticks: usize,
}

impl FrameScheduler for CountingScheduler {
  fn next_tick(&mut self) {
    self.ticks += 1;
  }
}

fn selected_rows(rows: &[[f32; 6]]) -> Array3<f32> {
  let data = rows.iter().flatten().copied().collect::<Vec<_>>();
  Array3::from_shape_vec((1, rows.len(), 6), data).unwrap()
}

#[test]
fn non_square_ratios_share_padded_side() {
  let preprocessor = Preprocessor::new(64, 64).unwrap();
  for (w, h) in [(300, 200), (17, 90), (641, 640)] {
    let (_, ratios) = preprocessor.preprocess(&RgbImage::new(w, h)).unwrap();
    assert_ne!(ratios.x, ratios.y);
    let side = w.max(h) as f32;
    assert!((ratios.x * w as f32 - side).abs() < 1e-3);
    assert!((ratios.y * h as f32 - side).abs() < 1e-3);
  }

  let (_, ratios) = preprocessor.preprocess(&RgbImage::new(50, 50)).unwrap();
  assert_eq!((ratios.x, ratios.y), (1.0, 1.0));
}

#[test]
fn forward_runs_before_nms_with_configured_thresholds() {
  let backend = FakeBackend::passthrough(selected_rows(&[[40.0, 20.0, 10.0, 10.0, 0.8, 0.1]]));
  let config = DetectConfig {
    topk: 7,
    iou_threshold: 0.5,
    score_threshold: 0.3,
  };
  let detector = Detector::new(&backend, config).unwrap();

  let boxes = detector.detect(&RgbImage::new(80, 40)).unwrap();

  assert_eq!(*backend.log.borrow(), vec!["forward", "nms"]);
  assert_eq!(backend.configs.borrow()[0], ConfigTensor([7.0, 0.5, 0.3]));
  // 80x40 补到 80x80：x 比例 1，y 比例 2
  assert_eq!(boxes[0].bounding, [35.0, 30.0, 10.0, 20.0]);
}

#[test]
fn decoded_count_never_exceeds_topk() {
  let rows = (0..10)
    .map(|i| [i as f32 * 5.0, 10.0, 4.0, 4.0, 0.9, 0.0])
    .collect::<Vec<_>>();
  let backend = FakeBackend::passthrough(selected_rows(&rows));
  let detector = Detector::new(
    backend,
    DetectConfig {
      topk: 3,
      ..DetectConfig::default()
    },
  )
  .unwrap();

  let boxes = detector.detect(&RgbImage::new(64, 64)).unwrap();
  assert_eq!(boxes.len(), 3);
}

#[test]
fn cpu_nms_stage_suppresses_overlaps() {
  // 4 个候选框，每列一个 anchor：(cx, cy, w, h, 类别0, 类别1)
  let raw: Array2<f32> = ndarray::array![
    [10.0, 11.0, 40.0, 50.0],
    [10.0, 10.0, 40.0, 50.0],
    [8.0, 8.0, 8.0, 8.0],
    [8.0, 8.0, 8.0, 8.0],
    [0.9, 0.8, 0.1, 0.0],
    [0.0, 0.0, 0.7, 0.1],
  ];
  let raw = raw.insert_axis(ndarray::Axis(0));
  let detector = Detector::new(FakeBackend::with_cpu_nms(raw), DetectConfig::default()).unwrap();

  let boxes = detector.detect(&RgbImage::new(64, 64)).unwrap();

  // 第二个候选与第一个重叠被抑制，最后一个低于置信度阈值
  assert_eq!(boxes.len(), 2);
  assert_eq!((boxes[0].label, boxes[0].probability), (0, 0.9));
  assert_eq!((boxes[1].label, boxes[1].probability), (1, 0.7));
  assert_eq!(boxes[0].bounding, [6.0, 6.0, 8.0, 8.0]);
}

#[test]
fn ended_video_stops_pump_and_clears_surface() {
  let detector = Detector::new(
    FakeBackend::passthrough(selected_rows(&[])),
    DetectConfig::default(),
  )
  .unwrap();
  let surface = RecordingSurface::default();
  let mut video = ScriptedVideo::frames(0);
  let mut pump = VideoPump::new(CountingScheduler::default());

  let report = pump.run(&mut video, &detector, &surface);

  assert_eq!(report.state, PumpState::Stopped);
  assert_eq!(report.stop_reason, Some(StopReason::Ended));
  assert_eq!(report.ticks, 1);
  assert_eq!(pump.scheduler().ticks, 1);
  assert_eq!(surface.cleared.get(), 1);
  assert!(surface.rendered.borrow().is_empty());
  assert_eq!(detector.backend().forward_calls.get(), 0);
}

#[test]
fn live_stream_without_width_keeps_pumping() {
  let detector = Detector::new(
    FakeBackend::passthrough(selected_rows(&[])),
    DetectConfig::default(),
  )
  .unwrap();
  let surface = RecordingSurface::default();
  let mut video = ScriptedVideo {
    widths: vec![80],
    stream: true,
    cursor: 0,
  };

  let report = VideoPump::new(CountingScheduler::default())
    .with_frame_number(Some(3))
    .run(&mut video, &detector, &surface);

  // 第一帧之后宽度为 0，但流仍在：采集失败被跳过，视频泵不停止
  assert_eq!(report.rendered, 1);
  assert_eq!(report.skipped, 2);
  assert_eq!(surface.cleared.get(), 0);
  assert_eq!(report.stop_reason, Some(StopReason::FrameLimit));
}

#[test]
fn backend_rejection_does_not_stop_pump() {
  let backend = FakeBackend::passthrough(selected_rows(&[[40.0, 20.0, 10.0, 10.0, 0.8, 0.1]]))
    .rejecting(&[1]);
  let detector = Detector::new(backend, DetectConfig::default()).unwrap();
  let surface = RecordingSurface::default();
  let mut video = ScriptedVideo::frames(3);

  let report = VideoPump::new(CountingScheduler::default()).run(&mut video, &detector, &surface);

  assert_eq!(report.skipped, 1);
  assert_eq!(report.rendered, 2);
  // 三帧加上发现视频结束的一次
  assert_eq!(report.ticks, 4);
  assert_eq!(surface.cleared.get(), 1);
  assert_eq!(
    *detector.backend().log.borrow(),
    vec!["forward", "forward", "nms", "forward", "nms"]
  );
}
