// 该文件是 Huoyan （火眼） 项目的一部分。
// src/inference.rs - 推理流水线
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
use tracing::{debug, error};

use crate::{
  BoxError,
  config::InferenceConfig,
  detection::{Detection, Mask, Segmentation},
  frame::Frame,
  model::{LoadedModel, ModelRegistry},
};

pub mod decode;
pub mod preprocess;
pub mod scheduler;

pub use self::decode::DecodeError;
pub use self::preprocess::Letterbox;
pub use self::scheduler::{InferenceOutcome, InferenceScheduler};

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("模型尚未就绪")]
  ModelNotReady,
  #[error("推理执行失败: {0}")]
  InferenceExecutionFailed(#[source] BoxError),
  #[error("模型 {0} 不输出掩码")]
  MasksUnavailable(String),
}

impl From<DecodeError> for InferenceError {
  fn from(err: DecodeError) -> Self {
    InferenceError::InferenceExecutionFailed(Box::new(err))
  }
}

/// 帧 -> 预处理 -> 模型执行 -> 解码
#[derive(Debug, Clone, Default)]
pub struct InferencePipeline {
  config: InferenceConfig,
}

impl InferencePipeline {
  pub fn new(config: InferenceConfig) -> Self {
    Self { config }
  }

  pub fn infer(&self, frame: &Frame, model: &LoadedModel) -> Result<Vec<Detection>, InferenceError> {
    let items = self.run(frame, model, false)?;
    Ok(items.into_iter().map(|(detection, _)| detection).collect())
  }

  /// 使用注册表中的当前模型推理
  pub fn infer_active(
    &self,
    frame: &Frame,
    registry: &ModelRegistry,
  ) -> Result<Vec<Detection>, InferenceError> {
    let model = registry
      .active_model()
      .map_err(|_| InferenceError::ModelNotReady)?;
    self.infer(frame, &model)
  }

  /// 实例分割，仅适用于输出掩码的模型
  pub fn segment(
    &self,
    frame: &Frame,
    model: &LoadedModel,
  ) -> Result<Vec<Segmentation>, InferenceError> {
    if !model.descriptor().family.produces_masks() {
      return Err(InferenceError::MasksUnavailable(model.id().to_string()));
    }
    let items = self.run(frame, model, true)?;
    Ok(
      items
        .into_iter()
        .filter_map(|(detection, mask)| mask.map(|mask| Segmentation { detection, mask }))
        .collect(),
    )
  }

  fn run(
    &self,
    frame: &Frame,
    model: &LoadedModel,
    with_masks: bool,
  ) -> Result<Vec<(Detection, Option<Mask>)>, InferenceError> {
    if frame.width() == 0 || frame.height() == 0 {
      return Err(DecodeError::EmptyFrame.into());
    }

    let descriptor = model.descriptor();
    descriptor
      .validate()
      .map_err(|e| InferenceError::InferenceExecutionFailed(Box::new(e)))?;
    let now = Instant::now();
    let (tensor, letterbox) = preprocess::letterbox(
      &frame.image,
      descriptor.input_size,
      &descriptor.normalization,
    );
    let preprocessed = now.elapsed();

    let raw = model.execute(&tensor).map_err(|e| {
      error!("模型 {} 执行第 {} 帧失败: {}", model.id(), frame.index, e);
      InferenceError::InferenceExecutionFailed(e)
    })?;
    let executed = now.elapsed();

    let items = decode::decode(
      &raw,
      descriptor.family.box_layout(),
      &letterbox,
      self.config.confidence_threshold,
      with_masks,
    )?;
    debug!(
      "第 {} 帧推理完成 ({}): 预处理 {:.2?} / 执行 {:.2?} / 总计 {:.2?}",
      frame.index,
      model.id(),
      preprocessed,
      executed,
      now.elapsed()
    );
    Ok(items)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    model::{
      DetectionModel, ModelCatalog, ModelDescriptor, RawOutput,
      catalog::{EFFICIENTDET, MASK_RCNN, YOLOV5},
    },
    testing::{self, ScriptedLoader, StaticModel},
  };

  struct BrokenModel;

  impl DetectionModel for BrokenModel {
    fn execute(&self, _input: &crate::frame::InputTensor) -> Result<RawOutput, BoxError> {
      Err("资源耗尽".into())
    }
  }

  fn descriptor(id: &str) -> ModelDescriptor {
    ModelCatalog::builtin().get(id).unwrap().clone()
  }

  fn raw() -> RawOutput {
    RawOutput {
      boxes: vec![[0.0, 0.0, 0.5, 0.5], [0.5, 0.5, 1.0, 1.0]],
      scores: vec![0.9, 0.4],
      class_ids: vec![1.0, 2.0],
      masks: None,
    }
  }

  #[test]
  fn infer_returns_detections_in_frame_space() {
    let model = LoadedModel::new(descriptor(EFFICIENTDET), Box::new(StaticModel::new(raw())));
    let frame = testing::frame(1, 640, 480);
    let detections = InferencePipeline::default().infer(&frame, &model).unwrap();

    assert_eq!(detections.len(), 1);
    let bbox = detections[0].bbox;
    assert!(bbox.x.abs() < 1e-2 && bbox.y.abs() < 1e-2);
    // 448 输入下的 [0, 0.5] 区间对应帧中的 224 / 0.7 = 320 像素
    assert!((bbox.width - 320.0).abs() < 1.0);
    assert!(bbox.height > 0.0 && bbox.y_max() <= 480.0);
  }

  #[test]
  fn threshold_is_configurable() {
    let model = LoadedModel::new(descriptor(EFFICIENTDET), Box::new(StaticModel::new(raw())));
    let pipeline = InferencePipeline::new(InferenceConfig {
      confidence_threshold: 0.3,
    });
    let detections = pipeline.infer(&testing::frame(1, 64, 64), &model).unwrap();
    assert_eq!(detections.len(), 2);
  }

  #[test]
  fn infer_active_without_model_is_not_ready() {
    let registry = ModelRegistry::new(ModelCatalog::builtin(), ScriptedLoader::default());
    let err = InferencePipeline::default()
      .infer_active(&testing::frame(1, 64, 64), &registry)
      .unwrap_err();
    assert!(matches!(err, InferenceError::ModelNotReady));
  }

  #[test]
  fn infer_active_uses_selected_model() {
    let loader = ScriptedLoader::default().with_output(YOLOV5, raw());
    let registry = ModelRegistry::new(ModelCatalog::builtin(), loader);
    registry.select_model(YOLOV5).unwrap();
    let detections = InferencePipeline::default()
      .infer_active(&testing::frame(1, 64, 64), &registry)
      .unwrap();
    assert_eq!(detections.len(), 1);
  }

  #[test]
  fn execution_failure_is_reported() {
    let model = LoadedModel::new(descriptor(EFFICIENTDET), Box::new(BrokenModel));
    let err = InferencePipeline::default()
      .infer(&testing::frame(1, 64, 64), &model)
      .unwrap_err();
    assert!(matches!(err, InferenceError::InferenceExecutionFailed(_)));
  }

  #[test]
  fn empty_frame_is_rejected() {
    let model = LoadedModel::new(descriptor(EFFICIENTDET), Box::new(StaticModel::new(raw())));
    let err = InferencePipeline::default()
      .infer(&testing::frame(1, 0, 0), &model)
      .unwrap_err();
    assert!(matches!(err, InferenceError::InferenceExecutionFailed(_)));
  }

  #[test]
  fn zero_input_size_is_an_error_not_a_panic() {
    let mut broken = descriptor(EFFICIENTDET);
    broken.input_size = (0, 448);
    let model = LoadedModel::new(broken, Box::new(StaticModel::new(raw())));
    let err = InferencePipeline::default()
      .infer(&testing::frame(1, 64, 64), &model)
      .unwrap_err();
    assert!(err.to_string().contains("输入尺寸"));
  }

  #[test]
  fn segmentation_requires_mask_model() {
    let model = LoadedModel::new(descriptor(EFFICIENTDET), Box::new(StaticModel::new(raw())));
    let err = InferencePipeline::default()
      .segment(&testing::frame(1, 64, 64), &model)
      .unwrap_err();
    assert!(matches!(err, InferenceError::MasksUnavailable(id) if id == EFFICIENTDET));

    let mut output = raw();
    output.masks = Some(vec![
      Mask {
        width: 2,
        height: 1,
        data: vec![0.2, 0.9],
      };
      2
    ]);
    let model = LoadedModel::new(descriptor(MASK_RCNN), Box::new(StaticModel::new(output)));
    let segments = InferencePipeline::default()
      .segment(&testing::frame(1, 64, 64), &model)
      .unwrap();
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].mask.get(1, 0), Some(0.9));
    assert_eq!(segments[0].detection.class_id, 1);
  }
}
