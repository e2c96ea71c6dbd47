// 该文件是 Huoyan （火眼） 项目的一部分。
// src/inference/decode.rs - 原始输出解码
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
use tracing::{debug, warn};

use crate::{
  detection::{BBox, Detection, MalformedDetection, Mask},
  inference::preprocess::Letterbox,
  model::{BoxLayout, RawOutput},
};

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("输入帧为空")]
  EmptyFrame,
  #[error("输出未对齐: boxes={boxes}, scores={scores}, class_ids={class_ids}")]
  Misaligned {
    boxes: usize,
    scores: usize,
    class_ids: usize,
  },
  #[error("掩码数量 {masks} 与检测数量 {expected} 不一致")]
  MaskCount { masks: usize, expected: usize },
}

/// 归一化坐标 -> 模型输入像素坐标下的 [x_min, y_min, x_max, y_max]
fn to_input_corners(raw: &[f32; 4], layout: BoxLayout, letterbox: &Letterbox) -> [f32; 4] {
  let w = letterbox.input_width as f32;
  let h = letterbox.input_height as f32;
  match layout {
    BoxLayout::NormalizedYxyx => [raw[1] * w, raw[0] * h, raw[3] * w, raw[2] * h],
    BoxLayout::NormalizedCxcywh => {
      let (cx, cy, bw, bh) = (raw[0] * w, raw[1] * h, raw[2] * w, raw[3] * h);
      [cx - bw / 2.0, cy - bh / 2.0, cx + bw / 2.0, cy + bh / 2.0]
    }
  }
}

fn to_frame_box(corners: [f32; 4], letterbox: &Letterbox) -> BBox {
  let (x_min, y_min) = letterbox.to_frame(corners[0], corners[1]);
  let (x_max, y_max) = letterbox.to_frame(corners[2], corners[3]);
  let fw = letterbox.frame_width as f32;
  let fh = letterbox.frame_height as f32;
  BBox::from_corners(
    x_min.clamp(0.0, fw),
    y_min.clamp(0.0, fh),
    x_max.clamp(0.0, fw),
    y_max.clamp(0.0, fh),
  )
}

fn class_id(raw: f32) -> Result<u32, MalformedDetection> {
  if raw.is_finite() && raw >= 0.0 {
    Ok(raw.round() as u32)
  } else {
    Err(MalformedDetection::InvalidClass(raw))
  }
}

/// 解码原始输出，丢弃低于阈值与无效的记录；`with_masks` 时同时取出掩码
pub fn decode(
  raw: &RawOutput,
  layout: BoxLayout,
  letterbox: &Letterbox,
  threshold: f32,
  with_masks: bool,
) -> Result<Vec<(Detection, Option<Mask>)>, DecodeError> {
  let count = raw.boxes.len();
  if raw.scores.len() != count || raw.class_ids.len() != count {
    return Err(DecodeError::Misaligned {
      boxes: count,
      scores: raw.scores.len(),
      class_ids: raw.class_ids.len(),
    });
  }

  let masks = match (&raw.masks, with_masks) {
    (Some(masks), true) if masks.len() == count => Some(masks),
    (masks, true) => {
      return Err(DecodeError::MaskCount {
        masks: masks.as_ref().map(Vec::len).unwrap_or(0),
        expected: count,
      });
    }
    (_, false) => None,
  };

  let mut items = Vec::with_capacity(count);
  for (index, raw_box) in raw.boxes.iter().enumerate() {
    let score = raw.scores[index];
    if score < threshold {
      continue;
    }

    let detection = class_id(raw.class_ids[index]).and_then(|class_id| {
      let corners = to_input_corners(raw_box, layout, letterbox);
      Detection::new(to_frame_box(corners, letterbox), class_id, score)
    });

    match detection {
      Ok(detection) => {
        let mask = masks.map(|masks| masks[index].clone());
        items.push((detection, mask));
      }
      Err(e) => warn!("丢弃第 {} 个无效检测: {}", index, e),
    }
  }

  debug!("解码得到 {} / {} 个检测", items.len(), count);
  Ok(items)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn letterbox() -> Letterbox {
    // 200x100 的帧缩放到 100x100，上下各填充 25
    Letterbox::new((200, 100), (100, 100))
  }

  fn output(boxes: Vec<[f32; 4]>, scores: Vec<f32>, class_ids: Vec<f32>) -> RawOutput {
    RawOutput {
      boxes,
      scores,
      class_ids,
      masks: None,
    }
  }

  fn approx(a: &BBox, b: &BBox) -> bool {
    (a.x - b.x).abs() < 1e-3
      && (a.y - b.y).abs() < 1e-3
      && (a.width - b.width).abs() < 1e-3
      && (a.height - b.height).abs() < 1e-3
  }

  #[test]
  fn yxyx_boxes_map_back_to_frame_pixels() {
    let raw = output(vec![[0.25, 0.0, 0.75, 0.5]], vec![0.9], vec![3.0]);
    let items = decode(&raw, BoxLayout::NormalizedYxyx, &letterbox(), 0.5, false).unwrap();
    assert_eq!(items.len(), 1);
    let (detection, mask) = &items[0];
    assert!(approx(&detection.bbox, &BBox::new(0.0, 0.0, 100.0, 100.0)));
    assert_eq!(detection.class_id, 3);
    assert!(mask.is_none());
  }

  #[test]
  fn cxcywh_boxes_map_back_to_frame_pixels() {
    let raw = output(vec![[0.5, 0.5, 0.2, 0.2]], vec![0.8], vec![0.0]);
    let items = decode(&raw, BoxLayout::NormalizedCxcywh, &letterbox(), 0.5, false).unwrap();
    // 输入空间 (40, 40)-(60, 60) -> 帧空间 (80, 30)-(120, 70)
    assert!(approx(&items[0].0.bbox, &BBox::new(80.0, 30.0, 40.0, 40.0)));
  }

  #[test]
  fn boxes_are_clipped_to_frame() {
    let raw = output(vec![[0.0, -0.5, 1.0, 0.5]], vec![0.9], vec![1.0]);
    let items = decode(&raw, BoxLayout::NormalizedYxyx, &letterbox(), 0.5, false).unwrap();
    let bbox = items[0].0.bbox;
    assert_eq!((bbox.x, bbox.y), (0.0, 0.0));
    assert!((bbox.x_max() - 100.0).abs() < 1e-3);
    assert!((bbox.y_max() - 100.0).abs() < 1e-3);
  }

  #[test]
  fn low_scores_and_malformed_records_are_dropped() {
    let raw = output(
      vec![
        [0.1, 0.1, 0.5, 0.5],
        [0.1, 0.1, 0.5, 0.5],
        [0.5, 0.5, 0.5, 0.5],
        [0.1, 0.1, 0.5, 0.5],
        [0.1, 0.1, 0.5, 0.5],
      ],
      vec![0.3, 1.5, 0.9, 0.9, 0.7],
      vec![1.0, 1.0, 1.0, -1.0, 2.0],
    );
    let items = decode(&raw, BoxLayout::NormalizedYxyx, &letterbox(), 0.5, false).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].0.class_id, 2);
    assert_eq!(items[0].0.confidence, 0.7);
  }

  #[test]
  fn misaligned_output_is_an_error() {
    let raw = output(vec![[0.1, 0.1, 0.5, 0.5]], vec![0.9, 0.8], vec![1.0]);
    assert!(matches!(
      decode(&raw, BoxLayout::NormalizedYxyx, &letterbox(), 0.5, false),
      Err(DecodeError::Misaligned { scores: 2, .. })
    ));
  }

  #[test]
  fn masks_follow_their_detections() {
    let mut raw = output(
      vec![[0.25, 0.0, 0.75, 0.5], [0.25, 0.5, 0.75, 1.0]],
      vec![0.2, 0.9],
      vec![1.0, 2.0],
    );
    raw.masks = Some(vec![
      Mask {
        width: 1,
        height: 1,
        data: vec![0.1],
      },
      Mask {
        width: 1,
        height: 1,
        data: vec![0.8],
      },
    ]);
    let items = decode(&raw, BoxLayout::NormalizedYxyx, &letterbox(), 0.5, true).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].1.as_ref().unwrap().data, vec![0.8]);

    raw.masks = None;
    assert!(matches!(
      decode(&raw, BoxLayout::NormalizedYxyx, &letterbox(), 0.5, true),
      Err(DecodeError::MaskCount { masks: 0, expected: 2 })
    ));
  }
}
