// 该文件是 Qianli （千里眼） 项目的一部分。
// src/model/cpu_nms.rs - CPU 上的非极大值抑制
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use ndarray::{Array3, ArrayView2, Axis, Ix3, s};
use thiserror::Error;
use tracing::debug;

use crate::model::{ConfigTensor, RawOutput};

/// 每行前 4 个值是 (cx, cy, w, h)
const BOX_FIELDS: usize = 4;

#[derive(Error, Debug)]
pub enum CpuNmsError {
  #[error("原始输出形状无效: {0:?}")]
  InvalidShape(Vec<usize>),
}

/// 原始输出的排列方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RawLayout {
  /// 较小的维度视为特征维
  #[default]
  Auto,
  /// [1, 4 + C, anchors]
  FeaturesFirst,
  /// [1, anchors, 4 + C]
  AnchorsFirst,
}

/// 不带独立 NMS 图的模型使用的后处理
///
/// 输出与外部 NMS 图一致：形状 [1, N, 4 + C]，按置信度降序排列。
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuNms {
  layout: RawLayout,
}

struct Candidate {
  anchor: usize,
  score: f32,
  corners: [f32; 4],
}

impl CpuNms {
  pub fn new(layout: RawLayout) -> Self {
    Self { layout }
  }

  pub fn run(&self, raw: &RawOutput, config: &ConfigTensor) -> Result<RawOutput, CpuNmsError> {
    let raw3 = raw
      .view()
      .into_dimensionality::<Ix3>()
      .map_err(|_| CpuNmsError::InvalidShape(raw.shape().to_vec()))?;
    let (batch, d1, d2) = raw3.dim();
    if batch != 1 {
      return Err(CpuNmsError::InvalidShape(raw.shape().to_vec()));
    }

    // rows: [anchors, features]
    let rows: ArrayView2<f32> = match self.layout {
      RawLayout::FeaturesFirst => raw3.index_axis_move(Axis(0), 0).reversed_axes(),
      RawLayout::AnchorsFirst => raw3.index_axis_move(Axis(0), 0),
      RawLayout::Auto if d1 <= d2 => raw3.index_axis_move(Axis(0), 0).reversed_axes(),
      RawLayout::Auto => raw3.index_axis_move(Axis(0), 0),
    };
    let features = rows.ncols();
    if features <= BOX_FIELDS {
      return Err(CpuNmsError::InvalidShape(raw.shape().to_vec()));
    }

    let mut candidates: Vec<Candidate> = rows
      .outer_iter()
      .enumerate()
      .filter_map(|(anchor, row)| {
        let score = row
          .iter()
          .skip(BOX_FIELDS)
          .copied()
          .fold(f32::NEG_INFINITY, f32::max);
        if score < config.score_threshold() {
          return None;
        }
        let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
        Some(Candidate {
          anchor,
          score,
          corners: [cx - 0.5 * w, cy - 0.5 * h, cx + 0.5 * w, cy + 0.5 * h],
        })
      })
      .collect();
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let topk = config.topk();
    let mut kept: Vec<Candidate> = Vec::with_capacity(topk.min(candidates.len()));
    for candidate in candidates {
      if kept.len() >= topk {
        break;
      }
      let overlaps = kept
        .iter()
        .any(|k| iou(&k.corners, &candidate.corners) > config.iou_threshold());
      if !overlaps {
        kept.push(candidate);
      }
    }

    debug!("CPU NMS: 保留 {} 个候选框", kept.len());

    let mut selected = Array3::<f32>::zeros((1, kept.len(), features));
    for (i, candidate) in kept.iter().enumerate() {
      selected
        .slice_mut(s![0, i, ..])
        .assign(&rows.row(candidate.anchor));
    }
    Ok(selected.into_dyn())
  }
}

/// 两个角点形式 [x1, y1, x2, y2] 矩形的交并比
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
  let h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
  let inter = w * h;
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  let union = area_a + area_b - inter;
  if union <= 0.0 { 0.0 } else { inter / union }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::{Array3, array};

  // [1, 6, 4]: 4 个候选框，两个类别
  fn features_first() -> RawOutput {
    let rows: ndarray::Array2<f32> = array![
      [100.0, 100.0, 40.0, 40.0, 0.9, 0.1],
      [102.0, 101.0, 40.0, 40.0, 0.8, 0.1],
      [300.0, 300.0, 20.0, 20.0, 0.1, 0.7],
      [500.0, 500.0, 10.0, 10.0, 0.05, 0.1],
    ];
    let t = rows.t().to_owned();
    t.insert_axis(Axis(0)).into_dyn()
  }

  #[test]
  fn suppresses_overlaps_and_filters_scores() {
    let nms = CpuNms::new(RawLayout::FeaturesFirst);
    let out = nms
      .run(&features_first(), &ConfigTensor::new(100, 0.45, 0.25))
      .unwrap();

    assert_eq!(out.shape(), &[1, 2, 6]);
    assert_eq!(out[[0, 0, 0]], 100.0);
    assert_eq!(out[[0, 0, 4]], 0.9);
    assert_eq!(out[[0, 1, 0]], 300.0);
    assert_eq!(out[[0, 1, 5]], 0.7);
  }

  #[test]
  fn topk_bounds_rows() {
    let nms = CpuNms::new(RawLayout::FeaturesFirst);
    let out = nms
      .run(&features_first(), &ConfigTensor::new(1, 0.45, 0.0))
      .unwrap();
    assert_eq!(out.shape(), &[1, 1, 6]);
  }

  #[test]
  fn anchors_first_layout_is_accepted() {
    let raw = Array3::from_shape_vec(
      (1, 2, 5),
      vec![10.0, 10.0, 4.0, 4.0, 0.6, 50.0, 50.0, 4.0, 4.0, 0.3],
    )
    .unwrap()
    .into_dyn();
    let out = CpuNms::new(RawLayout::AnchorsFirst)
      .run(&raw, &ConfigTensor::new(10, 0.5, 0.5))
      .unwrap();
    assert_eq!(out.shape(), &[1, 1, 5]);
    assert_eq!(out[[0, 0, 4]], 0.6);
  }

  #[test]
  fn rejects_non_3d_output() {
    let raw = ndarray::Array2::<f32>::zeros((6, 4)).into_dyn();
    assert!(CpuNms::default().run(&raw, &ConfigTensor::new(1, 0.5, 0.5)).is_err());
  }

  #[test]
  fn iou_of_disjoint_and_identical_boxes() {
    let a = [0.0, 0.0, 10.0, 10.0];
    assert_eq!(iou(&a, &a), 1.0);
    assert_eq!(iou(&a, &[20.0, 20.0, 30.0, 30.0]), 0.0);
  }
}
