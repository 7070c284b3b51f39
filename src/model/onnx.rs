// 该文件是 Qianli （千里眼） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理后端
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{
  path::{Path, PathBuf},
  sync::Mutex,
};

use ndarray::{ArrayD, IxDyn};
use ort::{
  session::{Session, SessionOutputs, builder::GraphOptimizationLevel},
  value::{Tensor, ValueType},
};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{InputShape, InputTensor},
  model::{
    ConfigTensor, InferenceBackend, RawOutput,
    cpu_nms::{CpuNms, CpuNmsError, RawLayout},
  },
};

const ONNX_NET_NUM_INPUTS: usize = 1;
const ONNX_NMS_NUM_INPUTS: usize = 2;
const ONNX_DEFAULT_INPUT_SIZE: usize = 640;

#[derive(Error, Debug)]
pub enum OnnxBackendError {
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("输出张量形状错误: {0}")]
  ShapeError(#[from] ndarray::ShapeError),
  #[error("CPU NMS 错误: {0}")]
  CpuNmsError(#[from] CpuNmsError),
  #[error("推理会话锁已损坏")]
  SessionPoisoned,
}

enum NmsStage {
  Graph(Mutex<Session>),
  Cpu(CpuNms),
}

/// ONNX Runtime 推理后端
///
/// 网络与 NMS 各自是独立的会话；没有提供 NMS 模型时使用 [`CpuNms`]。
/// `Session::run` 需要独占访问，会话放在 `Mutex` 中，共享同一后端的调用方因此串行执行。
pub struct OnnxBackend {
  net: Mutex<Session>,
  nms: NmsStage,
  input_shape: InputShape,
}

pub struct OnnxBackendBuilder {
  model_path: PathBuf,
  nms_path: Option<PathBuf>,
  threads: Option<usize>,
  /// 只用于模型中的动态轴（-1）；固定轴以模型为准
  input_width: Option<usize>,
  input_height: Option<usize>,
  layout: RawLayout,
}

impl FromUrlWithScheme for OnnxBackendBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxBackendBuilder {
  type Error = OnnxBackendError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OnnxBackendError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let mut builder = OnnxBackendBuilder::new(url.path());
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "nms" => builder.nms_path = Some(PathBuf::from(value.as_ref())),
        "threads" => builder.threads = Some(parse_query(&key, &value)?),
        "width" => builder.input_width = Some(parse_query(&key, &value)?),
        "height" => builder.input_height = Some(parse_query(&key, &value)?),
        "layout" => {
          builder.layout = match value.as_ref() {
            "features" => RawLayout::FeaturesFirst,
            "anchors" => RawLayout::AnchorsFirst,
            _ => RawLayout::Auto,
          }
        }
        other => debug!("忽略未知的模型参数: {}", other),
      }
    }
    Ok(builder)
  }
}

impl OnnxBackendBuilder {
  pub fn new<P: AsRef<Path>>(model_path: P) -> Self {
    Self {
      model_path: model_path.as_ref().to_path_buf(),
      nms_path: None,
      threads: None,
      input_width: None,
      input_height: None,
      layout: RawLayout::Auto,
    }
  }

  pub fn nms_model<P: AsRef<Path>>(mut self, path: P) -> Self {
    self.nms_path = Some(path.as_ref().to_path_buf());
    self
  }

  pub fn threads(mut self, threads: usize) -> Self {
    self.threads = Some(threads);
    self
  }

  /// 模型输入为动态尺寸时使用的宽高
  pub fn input_size(mut self, width: usize, height: usize) -> Self {
    self.input_width = Some(width);
    self.input_height = Some(height);
    self
  }

  pub fn build(self) -> Result<OnnxBackend, OnnxBackendError> {
    info!("加载模型文件: {}", self.model_path.display());
    let net = self.session(&self.model_path)?;
    check_num_inputs(&net, ONNX_NET_NUM_INPUTS)?;
    let input_shape =
      resolve_input_shape(&input_dims(&net)?, self.input_width, self.input_height)?;
    info!("模型输入形状: {:?}", input_shape.0);

    let nms = match &self.nms_path {
      Some(path) => {
        info!("加载 NMS 模型文件: {}", path.display());
        let session = self.session(path)?;
        check_num_inputs(&session, ONNX_NMS_NUM_INPUTS)?;
        NmsStage::Graph(Mutex::new(session))
      }
      None => {
        info!("未提供 NMS 模型，使用 CPU NMS");
        NmsStage::Cpu(CpuNms::new(self.layout))
      }
    };
    info!("模型加载完成");

    Ok(OnnxBackend {
      net: Mutex::new(net),
      nms,
      input_shape,
    })
  }

  fn session(&self, path: &Path) -> Result<Session, OnnxBackendError> {
    if !path.is_file() {
      return Err(OnnxBackendError::ModelPathError(format!(
        "模型文件不存在: {}",
        path.display()
      )));
    }
    let mut builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;
    if let Some(threads) = self.threads {
      builder = builder.with_intra_threads(threads)?;
    }
    Ok(builder.commit_from_file(path)?)
  }
}

fn parse_query(key: &str, value: &str) -> Result<usize, OnnxBackendError> {
  match value.parse::<usize>() {
    Ok(parsed) if parsed > 0 => Ok(parsed),
    _ => Err(OnnxBackendError::ModelInvalid(format!(
      "模型参数 {} 的值无效: {}",
      key, value
    ))),
  }
}

/// 第一个输入张量的维度，动态轴为 -1
fn input_dims(session: &Session) -> Result<Vec<i64>, OnnxBackendError> {
  let input = session
    .inputs
    .first()
    .ok_or_else(|| OnnxBackendError::ModelInvalid("模型没有输入".to_string()))?;
  match &input.input_type {
    ValueType::Tensor { shape, .. } => Ok(shape.iter().copied().collect()),
    other => Err(OnnxBackendError::ModelInvalid(format!(
      "模型输入 {} 不是张量: {:?}",
      input.name, other
    ))),
  }
}

/// 由模型声明的 NCHW 维度得到输入形状
///
/// 固定轴直接采用；动态轴依次取 URL 给定的宽高，再退回默认的 640。
fn resolve_input_shape(
  dims: &[i64],
  width: Option<usize>,
  height: Option<usize>,
) -> Result<InputShape, OnnxBackendError> {
  let [_, channels, h, w] = dims else {
    return Err(OnnxBackendError::ModelInvalid(format!(
      "模型输入应为 4 维 NCHW，实际为 {:?}",
      dims
    )));
  };
  if *channels > 0 && *channels != 3 {
    return Err(OnnxBackendError::ModelInvalid(format!(
      "模型输入通道数应为 3，实际为 {}",
      channels
    )));
  }

  let axis = |name: &str, dim: i64, requested: Option<usize>| -> usize {
    if dim > 0 {
      let dim = dim as usize;
      if let Some(requested) = requested
        && requested != dim
      {
        warn!("模型{}固定为 {}，忽略参数值 {}", name, dim, requested);
      }
      dim
    } else {
      requested.unwrap_or(ONNX_DEFAULT_INPUT_SIZE)
    }
  };

  Ok(InputShape([
    1,
    3,
    axis("高度", *h, height),
    axis("宽度", *w, width),
  ]))
}

fn check_num_inputs(session: &Session, expected: usize) -> Result<(), OnnxBackendError> {
  let actual = session.inputs.len();
  debug!("模型输入数量: {}, 输出数量: {}", actual, session.outputs.len());
  if actual != expected {
    return Err(OnnxBackendError::ModelInvalid(format!(
      "预期模型输入数量为 {}, 实际为 {}",
      expected, actual
    )));
  }
  Ok(())
}

fn first_output(outputs: &SessionOutputs<'_>) -> Result<RawOutput, OnnxBackendError> {
  let (_, value) = outputs
    .iter()
    .next()
    .ok_or_else(|| OnnxBackendError::ModelInvalid("模型没有输出".to_string()))?;
  let (shape, data) = value.try_extract_tensor::<f32>()?;
  let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
  Ok(ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec())?)
}

impl InferenceBackend for OnnxBackend {
  type Error = OnnxBackendError;

  fn input_shape(&self) -> InputShape {
    self.input_shape
  }

  fn forward(&self, input: &InputTensor) -> Result<RawOutput, Self::Error> {
    debug!("执行模型推理");
    let tensor = Tensor::from_array(input.as_array().clone())?;
    let mut session = self
      .net
      .lock()
      .map_err(|_| OnnxBackendError::SessionPoisoned)?;
    let outputs = session.run(ort::inputs![tensor])?;
    first_output(&outputs)
  }

  fn nms(&self, raw: &RawOutput, config: &ConfigTensor) -> Result<RawOutput, Self::Error> {
    debug!("执行 NMS 后处理: {:?}", config);
    match &self.nms {
      NmsStage::Cpu(nms) => Ok(nms.run(raw, config)?),
      NmsStage::Graph(session) => {
        let detection = Tensor::from_array(raw.clone())?;
        let config = Tensor::from_array(config.to_array())?;
        let mut session = session
          .lock()
          .map_err(|_| OnnxBackendError::SessionPoisoned)?;
        let outputs = session.run(ort::inputs![detection, config])?;
        first_output(&outputs)
      }
    }
  }
}
