// 该文件是 Qianli （千里眼） 项目的一部分。
// src/scheduler.rs - 帧调度与取消信号
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::{Duration, Instant},
};

/// 帧调度器，相当于显示刷新回调
pub trait FrameScheduler {
  /// 阻塞直到下一帧
  fn next_tick(&mut self);
}

/// 不等待，立即进入下一帧
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateScheduler;

impl FrameScheduler for ImmediateScheduler {
  fn next_tick(&mut self) {}
}

/// 按固定帧率调度
///
/// 距上一帧不足一个周期时睡眠补齐；处理超时则立即返回，不追帧。
#[derive(Debug)]
pub struct FrameRateScheduler {
  period: Duration,
  last: Option<Instant>,
}

impl FrameRateScheduler {
  pub fn new(fps: f64) -> Self {
    let period = if fps.is_finite() && fps > 0.0 {
      Duration::from_secs_f64(1.0 / fps)
    } else {
      Duration::ZERO
    };
    Self { period, last: None }
  }

  pub fn period(&self) -> Duration {
    self.period
  }
}

impl FrameScheduler for FrameRateScheduler {
  fn next_tick(&mut self) {
    if let Some(last) = self.last {
      let elapsed = last.elapsed();
      if elapsed < self.period {
        thread::sleep(self.period - elapsed);
      }
    }
    self.last = Some(Instant::now());
  }
}

/// 取消信号，可跨线程共享
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
  cancelled: Arc<AtomicBool>,
}

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.cancelled.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancelled.load(Ordering::SeqCst)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cancel_is_shared_between_clones() {
    let token = CancelToken::new();
    let other = token.clone();
    assert!(!other.is_cancelled());
    token.cancel();
    assert!(other.is_cancelled());
  }

  #[test]
  fn frame_rate_holds_period() {
    let mut scheduler = FrameRateScheduler::new(50.0);
    assert_eq!(scheduler.period(), Duration::from_millis(20));

    let start = Instant::now();
    scheduler.next_tick();
    scheduler.next_tick();
    assert!(start.elapsed() >= Duration::from_millis(19));
  }

  #[test]
  fn invalid_fps_never_sleeps() {
    assert_eq!(FrameRateScheduler::new(0.0).period(), Duration::ZERO);
    assert_eq!(FrameRateScheduler::new(f64::NAN).period(), Duration::ZERO);
  }
}
