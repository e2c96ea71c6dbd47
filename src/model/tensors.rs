// 该文件是 Huoyan （火眼） 项目的一部分。
// src/model/tensors.rs - 模型图输出张量到原始输出的转换
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

use thiserror::Error;
use tracing::debug;

use crate::{
  detection::{BBox, Mask},
  model::{ModelFamily, RawOutput},
};

/// YOLO 候选框的最低得分，低于该值的行不参与 NMS
pub const YOLO_CANDIDATE_SCORE: f32 = 0.1;
/// 同类候选框 IoU 超过该值时保留得分较高者
pub const YOLO_NMS_IOU: f32 = 0.45;
/// NMS 后最多保留的检测数
pub const YOLO_MAX_DETECTIONS: usize = 100;

#[derive(Error, Debug)]
pub enum TensorLayoutError {
  #[error("缺少输出张量: {0}")]
  MissingOutput(&'static str),
  #[error("输出张量 {name} 的形状 {shape:?} 不符合预期")]
  UnexpectedShape { name: String, shape: Vec<usize> },
}

/// 运行时返回的一个 f32 输出张量
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTensor {
  pub name: String,
  pub shape: Vec<usize>,
  pub data: Vec<f32>,
}

impl OutputTensor {
  pub fn new(name: impl Into<String>, shape: Vec<usize>, data: Vec<f32>) -> Self {
    Self {
      name: name.into(),
      shape,
      data,
    }
  }

  fn unexpected(&self) -> TensorLayoutError {
    TensorLayoutError::UnexpectedShape {
      name: self.name.clone(),
      shape: self.shape.clone(),
    }
  }

  /// 去掉批次维后的末维长度
  fn last_dim(&self) -> Option<usize> {
    self.shape.last().copied().filter(|&d| d > 0)
  }
}

fn find<'a>(outputs: &'a [OutputTensor], key: &'static str) -> Option<&'a OutputTensor> {
  // 优先 `detection_<key>`，避免命中 `raw_detection_scores` 之类的中间输出
  let exact = format!("detection_{}", key);
  outputs
    .iter()
    .find(|t| t.name.trim_end_matches(":0") == exact)
    .or_else(|| outputs.iter().find(|t| t.name.contains(key)))
}

fn require<'a>(
  outputs: &'a [OutputTensor],
  key: &'static str,
) -> Result<&'a OutputTensor, TensorLayoutError> {
  find(outputs, key).ok_or(TensorLayoutError::MissingOutput(key))
}

/// 按模型族把图输出整理为按索引对齐的原始输出
///
/// - EfficientDet / SSD / Mask R-CNN: 目标检测 API 的后处理输出
///   (`detection_boxes`, `detection_scores`, `detection_classes`，
///   可选 `num_detections` 与 `detection_masks`)，框为归一化 yxyx
/// - YOLO: 单个 `[1, N, 5 + nc]` 张量，框为输入像素下的 cxcywh，
///   此处做归一化、得分合成与同类 NMS
pub fn raw_output(
  family: ModelFamily,
  input_size: (u32, u32),
  outputs: &[OutputTensor],
) -> Result<RawOutput, TensorLayoutError> {
  match family {
    ModelFamily::Yolo => yolo_output(input_size, outputs),
    ModelFamily::EfficientDet | ModelFamily::Ssd | ModelFamily::MaskRcnn => {
      detection_api_output(family.produces_masks(), outputs)
    }
  }
}

fn detection_api_output(
  with_masks: bool,
  outputs: &[OutputTensor],
) -> Result<RawOutput, TensorLayoutError> {
  let boxes = require(outputs, "boxes")?;
  let scores = require(outputs, "scores")?;
  let classes = require(outputs, "classes")?;
  if boxes.last_dim() != Some(4) || boxes.data.len() % 4 != 0 {
    return Err(boxes.unexpected());
  }

  let mut count = boxes.data.len() / 4;
  if let Some(valid) = find(outputs, "num_detections").and_then(|t| t.data.first()) {
    count = count.min(valid.max(0.0) as usize);
  }

  let masks = if with_masks {
    let masks = require(outputs, "masks")?;
    Some(split_masks(masks, count)?)
  } else {
    None
  };

  Ok(RawOutput {
    boxes: boxes
      .data
      .chunks_exact(4)
      .take(count)
      .map(|b| [b[0], b[1], b[2], b[3]])
      .collect(),
    scores: scores.data.iter().take(count).copied().collect(),
    class_ids: classes.data.iter().take(count).copied().collect(),
    masks,
  })
}

fn split_masks(tensor: &OutputTensor, count: usize) -> Result<Vec<Mask>, TensorLayoutError> {
  let &[.., height, width] = tensor.shape.as_slice() else {
    return Err(tensor.unexpected());
  };
  let size = height * width;
  if size == 0 || tensor.data.len() % size != 0 {
    return Err(tensor.unexpected());
  }
  Ok(
    tensor
      .data
      .chunks_exact(size)
      .take(count)
      .map(|data| Mask {
        width: width as u32,
        height: height as u32,
        data: data.to_vec(),
      })
      .collect(),
  )
}

struct Candidate {
  bbox: BBox,
  score: f32,
  class_id: usize,
}

fn yolo_output(
  input_size: (u32, u32),
  outputs: &[OutputTensor],
) -> Result<RawOutput, TensorLayoutError> {
  let tensor = outputs.first().ok_or(TensorLayoutError::MissingOutput("output0"))?;
  let stride = tensor.last_dim().ok_or_else(|| tensor.unexpected())?;
  if stride < 6 || tensor.data.len() % stride != 0 {
    return Err(tensor.unexpected());
  }

  let (width, height) = (input_size.0 as f32, input_size.1 as f32);
  let mut candidates: Vec<Candidate> = tensor
    .data
    .chunks_exact(stride)
    .filter_map(|row| {
      let (class_id, class_score) = row[5..]
        .iter()
        .enumerate()
        .fold((0, f32::MIN), |best, (i, &s)| if s > best.1 { (i, s) } else { best });
      let score = row[4] * class_score;
      (score >= YOLO_CANDIDATE_SCORE).then(|| Candidate {
        bbox: BBox::new(
          row[0] / width - row[2] / width / 2.0,
          row[1] / height - row[3] / height / 2.0,
          row[2] / width,
          row[3] / height,
        ),
        score,
        class_id,
      })
    })
    .collect();
  let total = candidates.len();
  non_max_suppression(&mut candidates);
  debug!("YOLO 输出: {} 个候选, NMS 后 {} 个", total, candidates.len());

  let mut raw = RawOutput::default();
  for c in candidates {
    let b = &c.bbox;
    raw
      .boxes
      .push([b.x + b.width / 2.0, b.y + b.height / 2.0, b.width, b.height]);
    raw.scores.push(c.score);
    raw.class_ids.push(c.class_id as f32);
  }
  Ok(raw)
}

/// 同类候选之间的贪心 NMS，结果按得分降序
fn non_max_suppression(candidates: &mut Vec<Candidate>) {
  candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut kept = 0;
  for index in 0..candidates.len() {
    if kept == YOLO_MAX_DETECTIONS {
      break;
    }
    let suppressed = candidates[..kept].iter().any(|prev| {
      prev.class_id == candidates[index].class_id
        && prev.bbox.iou(&candidates[index].bbox) > YOLO_NMS_IOU
    });
    if !suppressed {
      candidates.swap(kept, index);
      kept += 1;
    }
  }
  candidates.truncate(kept);
}
