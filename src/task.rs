// 该文件是 Qianli （千里眼） 项目的一部分。
// src/task.rs - 检测任务：单帧与视频泵
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

use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  detector::{DetectError, Detector},
  frame::ImageSource,
  input::{CaptureError, VideoElement, capture},
  model::{DetectBox, InferenceBackend},
  output::Render,
  scheduler::{CancelToken, FrameScheduler},
};

pub trait Task<I, B, O>: Sized {
  type Report;
  type Error;
  fn run_task(self, input: I, detector: &Detector<B>, output: O) -> Result<Self::Report, Self::Error>;
}

/// 取输入的第一帧，检测并渲染；任何错误直接返回
pub struct OneShotTask;

impl<F, I, B, O> Task<I, B, O> for OneShotTask
where
  F: ImageSource,
  I: IntoIterator<Item = F>,
  B: InferenceBackend,
  O: Render,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Report = Vec<DetectBox>;
  type Error = anyhow::Error;

  fn run_task(self, input: I, detector: &Detector<B>, output: O) -> Result<Self::Report, Self::Error> {
    info!("开始任务...");
    let frame = input
      .into_iter()
      .next()
      .ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");

    let now = Instant::now();
    let boxes = detector.detect(&frame)?;
    info!("推理完成，检测到 {} 个目标，耗时: {:.2?}", boxes.len(), now.elapsed());

    output.render_result(&frame.to_rgb_image(), &boxes)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());

    Ok(boxes)
  }
}

/// 视频泵状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
  Running,
  Stopped,
}

/// 视频泵停止的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
  /// 视频结束或未设置，输出面已清空
  Ended,
  /// 收到取消信号
  Cancelled,
  /// 达到指定帧数
  FrameLimit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpReport {
  /// 调度次数，包括发现视频结束的那一次
  pub ticks: usize,
  pub rendered: usize,
  pub skipped: usize,
  pub state: PumpState,
  pub stop_reason: Option<StopReason>,
}

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("帧采集错误: {0}")]
  Capture(#[from] CaptureError),
  #[error("检测错误: {0}")]
  Detect(#[from] DetectError),
  #[error("渲染错误: {0}")]
  Render(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// 视频泵
///
/// 每次调度依次执行 采集 → 检测 → 渲染，渲染返回后才请求下一次调度，
/// 所以同一时刻最多只有一次推理。单帧失败只记录警告并跳过，不会停止视频泵。
/// 视频宽度为 0 且没有实时流时清空输出面并停止。
pub struct VideoPump<S> {
  scheduler: S,
  cancel: CancelToken,
  scale_factor: f32,
  frame_number: Option<usize>,
  state: PumpState,
}

impl<S: FrameScheduler> VideoPump<S> {
  pub fn new(scheduler: S) -> Self {
    VideoPump {
      scheduler,
      cancel: CancelToken::default(),
      scale_factor: 1.0,
      frame_number: None,
      state: PumpState::Running,
    }
  }

  pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn with_scale_factor(mut self, scale_factor: f32) -> Self {
    self.scale_factor = scale_factor;
    self
  }

  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn state(&self) -> PumpState {
    self.state
  }

  pub fn scheduler(&self) -> &S {
    &self.scheduler
  }

  pub fn cancel_token(&self) -> CancelToken {
    self.cancel.clone()
  }

  /// 处理一帧
  pub fn process_frame<V, B, O>(
    &self,
    video: &mut V,
    detector: &Detector<B>,
    output: &O,
  ) -> Result<usize, FrameError>
  where
    V: VideoElement + ?Sized,
    B: InferenceBackend,
    O: Render + ?Sized,
    O::Error: std::error::Error + Send + Sync + 'static,
  {
    let surface = capture(video, self.scale_factor)?;
    let boxes = detector.detect(&surface)?;
    output
      .render_result(&surface, &boxes)
      .map_err(|e| FrameError::Render(Box::new(e)))?;
    Ok(boxes.len())
  }

  /// 运行直到视频结束、收到取消信号或达到指定帧数
  pub fn run<V, B, O>(&mut self, video: &mut V, detector: &Detector<B>, output: &O) -> PumpReport
  where
    V: VideoElement + ?Sized,
    B: InferenceBackend,
    O: Render + ?Sized,
    O::Error: std::error::Error + Send + Sync + 'static,
  {
    info!("视频泵启动");
    self.state = PumpState::Running;

    let mut report = PumpReport {
      ticks: 0,
      rendered: 0,
      skipped: 0,
      state: self.state,
      stop_reason: None,
    };

    while self.state == PumpState::Running {
      self.scheduler.next_tick();
      report.ticks += 1;

      if self.cancel.is_cancelled() {
        warn!("收到取消信号，退出视频泵");
        self.stop(&mut report, StopReason::Cancelled);
        break;
      }

      if video.is_ended() {
        info!("视频已结束，清空输出面");
        if let Err(e) = output.clear() {
          warn!("清空输出面失败: {}", e);
        }
        self.stop(&mut report, StopReason::Ended);
        break;
      }

      let now = Instant::now();
      match self.process_frame(video, detector, output) {
        Ok(count) => {
          report.rendered += 1;
          debug!(
            "第 {} 帧完成，{} 个目标，耗时: {:.2?}",
            report.rendered + report.skipped,
            count,
            now.elapsed()
          );
        }
        Err(e) => {
          report.skipped += 1;
          warn!("跳过第 {} 帧: {}", report.rendered + report.skipped, e);
        }
      }

      let frames = report.rendered + report.skipped;
      if self.frame_number.is_some_and(|n| frames >= n) {
        info!("达到指定帧数 {}, 退出视频泵", frames);
        self.stop(&mut report, StopReason::FrameLimit);
      }
    }

    info!(
      "视频泵停止: 调度 {} 次，渲染 {} 帧，跳过 {} 帧",
      report.ticks, report.rendered, report.skipped
    );
    report
  }

  fn stop(&mut self, report: &mut PumpReport, reason: StopReason) {
    self.state = PumpState::Stopped;
    report.state = self.state;
    report.stop_reason = Some(reason);
  }
}
