// 该文件是 Huoyan （火眼） 项目的一部分。
// src/model.rs - 模型
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

use std::sync::{Arc, Mutex, PoisonError, TryLockError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{BoxError, detection::Mask, frame::InputTensor};

/// 检测模型的执行能力，模型内部对本库不透明
pub trait DetectionModel: Send + Sync {
  fn execute(&self, input: &InputTensor) -> Result<RawOutput, BoxError>;
}

/// 模型原始输出：按索引对齐的 (boxes, scores, class_ids) 元组
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawOutput {
  pub boxes: Vec<[f32; 4]>,
  pub scores: Vec<f32>,
  pub class_ids: Vec<f32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub masks: Option<Vec<Mask>>,
}

/// 原始输出中边界框的坐标排列
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxLayout {
  /// 归一化 [y_min, x_min, y_max, x_max]
  NormalizedYxyx,
  /// 归一化 [cx, cy, w, h]
  NormalizedCxcywh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
  EfficientDet,
  Yolo,
  Ssd,
  MaskRcnn,
}

impl ModelFamily {
  pub fn box_layout(&self) -> BoxLayout {
    match self {
      ModelFamily::Yolo => BoxLayout::NormalizedCxcywh,
      ModelFamily::EfficientDet | ModelFamily::Ssd | ModelFamily::MaskRcnn => {
        BoxLayout::NormalizedYxyx
      }
    }
  }

  pub fn produces_masks(&self) -> bool {
    matches!(self, ModelFamily::MaskRcnn)
  }

  /// 输入是否为通道优先 (NCHW) 排列
  pub fn channels_first(&self) -> bool {
    matches!(self, ModelFamily::Yolo)
  }
}

/// 像素归一化参数: value = (pixel - mean) * scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
  pub scale: f32,
  #[serde(default)]
  pub mean: Option<[f32; 3]>,
}

impl Normalization {
  pub fn unit_range() -> Self {
    Self {
      scale: 1.0 / 255.0,
      mean: None,
    }
  }

  pub fn apply(&self, pixel: u8, channel: usize) -> f32 {
    let mean = self.mean.map(|m| m[channel]).unwrap_or(0.0);
    (pixel as f32 - mean) * self.scale
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
  pub id: String,
  pub source_locator: String,
  pub family: ModelFamily,
  /// (width, height)
  pub input_size: (u32, u32),
  pub normalization: Normalization,
}

impl ModelDescriptor {
  /// 检查描述是否可用于推理
  pub fn validate(&self) -> Result<(), ModelError> {
    let reason = if self.id.is_empty() {
      "模型 id 为空"
    } else if self.input_size.0 == 0 || self.input_size.1 == 0 {
      "输入尺寸不能为 0"
    } else if !self.normalization.scale.is_finite() || self.normalization.scale == 0.0 {
      "归一化比例必须为非零有限值"
    } else {
      return Ok(());
    };
    Err(ModelError::InvalidDescriptor {
      id: self.id.clone(),
      reason: reason.to_string(),
    })
  }
}

#[derive(Error, Debug, Clone)]
pub enum ModelError {
  #[error("未知模型: {0}")]
  UnknownModel(String),
  #[error("尚未选择模型")]
  NoModelSelected,
  #[error("模型描述 {id} 无效: {reason}")]
  InvalidDescriptor { id: String, reason: String },
  #[error("模型 {id} 加载失败: {cause}")]
  ModelLoadFailed {
    id: String,
    #[source]
    cause: Arc<dyn std::error::Error + Send + Sync>,
  },
}

impl ModelError {
  pub fn load_failed(id: &str, cause: BoxError) -> Self {
    ModelError::ModelLoadFailed {
      id: id.to_string(),
      cause: Arc::from(cause),
    }
  }
}

/// 已加载的模型实例，由 [`ModelRegistry`] 持有
pub struct LoadedModel {
  descriptor: ModelDescriptor,
  model: Box<dyn DetectionModel>,
  execution: Mutex<()>,
}

impl LoadedModel {
  pub fn new(descriptor: ModelDescriptor, model: Box<dyn DetectionModel>) -> Self {
    Self {
      descriptor,
      model,
      execution: Mutex::new(()),
    }
  }

  pub fn id(&self) -> &str {
    &self.descriptor.id
  }

  pub fn descriptor(&self) -> &ModelDescriptor {
    &self.descriptor
  }

  /// 是否有推理正在执行
  pub fn is_busy(&self) -> bool {
    matches!(self.execution.try_lock(), Err(TryLockError::WouldBlock))
  }

  /// 执行推理，同一实例上的调用按顺序排队
  pub fn execute(&self, input: &InputTensor) -> Result<RawOutput, BoxError> {
    let _guard = self
      .execution
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    self.model.execute(input)
  }
}

impl std::fmt::Debug for LoadedModel {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("LoadedModel")
      .field("descriptor", &self.descriptor)
      .field("busy", &self.is_busy())
      .finish()
  }
}

pub mod catalog;
pub use self::catalog::ModelCatalog;

mod loader;
pub use self::loader::{LoaderSet, ModelLoader};
#[cfg(feature = "replay_model")]
pub use self::loader::{ReplayLoader, ReplayModel};

#[cfg(feature = "onnx_model")]
mod onnx;
#[cfg(feature = "onnx_model")]
pub use self::onnx::{ONNX_SCHEMES, OnnxError, OnnxLoader, OnnxModel};

mod registry;
pub use self::registry::{Eviction, ModelRegistry};

pub mod tensors;
