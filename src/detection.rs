// 该文件是 Huoyan （火眼） 项目的一部分。
// src/detection.rs - 检测结果定义
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

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 像素空间中的边界框，(x, y) 为左上角
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

impl BBox {
  pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }

  /// 由 [x_min, y_min, x_max, y_max] 构造
  pub fn from_corners(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
    Self::new(x_min, y_min, x_max - x_min, y_max - y_min)
  }

  pub fn x_max(&self) -> f32 {
    self.x + self.width
  }

  pub fn y_max(&self) -> f32 {
    self.y + self.height
  }

  pub fn area(&self) -> f32 {
    self.width * self.height
  }

  pub fn is_well_formed(&self) -> bool {
    self.x.is_finite()
      && self.y.is_finite()
      && self.width.is_finite()
      && self.height.is_finite()
      && self.width > 0.0
      && self.height > 0.0
  }

  /// 计算两个边界框的 IoU
  pub fn iou(&self, other: &BBox) -> f32 {
    let x1 = self.x.max(other.x);
    let y1 = self.y.max(other.y);
    let x2 = self.x_max().min(other.x_max());
    let y2 = self.y_max().min(other.y_max());

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = self.area() + other.area() - intersection;

    if union > 0.0 {
      intersection / union
    } else {
      0.0
    }
  }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MalformedDetection {
  #[error("边界框无效: {0:?}")]
  InvalidBox(BBox),
  #[error("置信度超出 [0, 1] 范围: {0}")]
  InvalidConfidence(f32),
  #[error("类别编号无效: {0}")]
  InvalidClass(f32),
}

/// 单帧的一个检测结果，帧之间没有身份关联
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
  pub bbox: BBox,
  pub class_id: u32,
  pub confidence: f32,
}

impl Detection {
  /// 构造并校验检测结果
  pub fn new(bbox: BBox, class_id: u32, confidence: f32) -> Result<Self, MalformedDetection> {
    if !bbox.is_well_formed() {
      return Err(MalformedDetection::InvalidBox(bbox));
    }
    if !(0.0..=1.0).contains(&confidence) {
      return Err(MalformedDetection::InvalidConfidence(confidence));
    }
    Ok(Self {
      bbox,
      class_id,
      confidence,
    })
  }
}

/// 相对于边界框的掩码，行优先存储概率值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mask {
  pub width: u32,
  pub height: u32,
  pub data: Vec<f32>,
}

impl Mask {
  pub fn get(&self, x: u32, y: u32) -> Option<f32> {
    if x >= self.width || y >= self.height {
      return None;
    }
    self.data.get((y * self.width + x) as usize).copied()
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segmentation {
  pub detection: Detection,
  pub mask: Mask,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn iou_of_identical_boxes_is_one() {
    let a = BBox::new(10.0, 10.0, 50.0, 50.0);
    assert!((a.iou(&a) - 1.0).abs() < 1e-6);
  }

  #[test]
  fn iou_of_disjoint_boxes_is_zero() {
    let a = BBox::new(0.0, 0.0, 10.0, 10.0);
    let b = BBox::new(20.0, 20.0, 10.0, 10.0);
    assert_eq!(a.iou(&b), 0.0);
  }

  #[test]
  fn iou_of_half_overlap() {
    let a = BBox::new(0.0, 0.0, 10.0, 10.0);
    let b = BBox::new(5.0, 0.0, 10.0, 10.0);
    // 交集 50，并集 150
    assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
  }

  #[test]
  fn detection_rejects_degenerate_box() {
    let err = Detection::new(BBox::new(0.0, 0.0, 0.0, 5.0), 1, 0.9).unwrap_err();
    assert!(matches!(err, MalformedDetection::InvalidBox(_)));
  }

  #[test]
  fn detection_rejects_confidence_out_of_range() {
    let err = Detection::new(BBox::new(0.0, 0.0, 5.0, 5.0), 1, 1.5).unwrap_err();
    assert_eq!(err, MalformedDetection::InvalidConfidence(1.5));
    assert!(Detection::new(BBox::new(0.0, 0.0, 5.0, 5.0), 1, f32::NAN).is_err());
  }

  #[test]
  fn mask_lookup_is_bounded() {
    let mask = Mask {
      width: 2,
      height: 2,
      data: vec![0.1, 0.2, 0.3, 0.4],
    };
    assert_eq!(mask.get(1, 1), Some(0.4));
    assert_eq!(mask.get(2, 0), None);
  }
}
