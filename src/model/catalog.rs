// 该文件是 Huoyan （火眼） 项目的一部分。
// src/model/catalog.rs - 静态模型目录
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

use tracing::debug;

use crate::model::{ModelDescriptor, ModelError, ModelFamily, Normalization};

pub const EFFICIENTDET: &str = "efficientdet";
pub const YOLOV5: &str = "yolov5";
pub const SSD_MOBILENET: &str = "ssd_mobilenet";
pub const MASK_RCNN: &str = "mask_rcnn";

#[derive(Debug, Clone)]
pub struct ModelCatalog {
  descriptors: Vec<ModelDescriptor>,
}

impl ModelCatalog {
  /// 由自定义描述构建目录，拒绝无效描述与重复 id
  pub fn new(descriptors: Vec<ModelDescriptor>) -> Result<Self, ModelError> {
    for (index, descriptor) in descriptors.iter().enumerate() {
      descriptor.validate()?;
      if descriptors[..index].iter().any(|d| d.id == descriptor.id) {
        return Err(ModelError::InvalidDescriptor {
          id: descriptor.id.clone(),
          reason: "模型 id 重复".to_string(),
        });
      }
    }
    Ok(Self { descriptors })
  }

  /// 内置模型目录
  pub fn builtin() -> Self {
    let entry = |id: &str, locator: &str, family, size: u32| ModelDescriptor {
      id: id.to_string(),
      source_locator: locator.to_string(),
      family,
      input_size: (size, size),
      normalization: Normalization::unit_range(),
    };

    let descriptors = vec![
      entry(
        EFFICIENTDET,
        "https://tfhub.dev/tensorflow/efficientdet/lite2/detection/1",
        ModelFamily::EfficientDet,
        448,
      ),
      entry(
        YOLOV5,
        "https://tfhub.dev/ultralytics/yolov5/1",
        ModelFamily::Yolo,
        640,
      ),
      entry(
        SSD_MOBILENET,
        "https://tfhub.dev/tensorflow/ssd_mobilenet_v2/2",
        ModelFamily::Ssd,
        300,
      ),
      entry(
        MASK_RCNN,
        "https://tfhub.dev/tensorflow/tfjs-model/mask_rcnn/1",
        ModelFamily::MaskRcnn,
        1024,
      ),
    ];
    Self { descriptors }
  }

  pub fn get(&self, id: &str) -> Option<&ModelDescriptor> {
    self.descriptors.iter().find(|d| d.id == id)
  }

  pub fn contains(&self, id: &str) -> bool {
    self.get(id).is_some()
  }

  pub fn ids(&self) -> impl Iterator<Item = &str> {
    self.descriptors.iter().map(|d| d.id.as_str())
  }

  /// 替换某个模型的来源定位符，只能在进程启动时使用
  pub fn with_locator(mut self, id: &str, locator: &str) -> Result<Self, ModelError> {
    let descriptor = self
      .descriptors
      .iter_mut()
      .find(|d| d.id == id)
      .ok_or_else(|| ModelError::UnknownModel(id.to_string()))?;
    debug!("模型 {} 的来源替换为 {}", id, locator);
    descriptor.source_locator = locator.to_string();
    Ok(self)
  }
}

impl Default for ModelCatalog {
  fn default() -> Self {
    Self::builtin()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builtin_catalog_lists_known_models() {
    let catalog = ModelCatalog::builtin();
    let ids: Vec<_> = catalog.ids().collect();
    assert_eq!(ids, vec![EFFICIENTDET, YOLOV5, SSD_MOBILENET, MASK_RCNN]);
    assert_eq!(catalog.get(YOLOV5).unwrap().family, ModelFamily::Yolo);
    assert!(!catalog.contains("resnet"));
  }

  #[test]
  fn locator_override_rejects_unknown_id() {
    let err = ModelCatalog::builtin()
      .with_locator("resnet", "replay:///tmp/x.json")
      .unwrap_err();
    assert!(matches!(err, ModelError::UnknownModel(id) if id == "resnet"));

    let catalog = ModelCatalog::builtin()
      .with_locator(EFFICIENTDET, "replay:///tmp/x.json")
      .unwrap();
    assert_eq!(
      catalog.get(EFFICIENTDET).unwrap().source_locator,
      "replay:///tmp/x.json"
    );
  }

  fn custom(id: &str, input_size: (u32, u32)) -> ModelDescriptor {
    ModelDescriptor {
      id: id.to_string(),
      source_locator: "replay:///tmp/x.json".to_string(),
      family: ModelFamily::Ssd,
      input_size,
      normalization: Normalization::unit_range(),
    }
  }

  #[test]
  fn builtin_descriptors_are_valid() {
    let catalog = ModelCatalog::builtin();
    for id in catalog.ids() {
      catalog.get(id).unwrap().validate().unwrap();
    }
  }

  #[test]
  fn custom_catalog_rejects_zero_input_size() {
    for size in [(0, 300), (300, 0), (0, 0)] {
      let err = ModelCatalog::new(vec![custom("ssd", size)]).unwrap_err();
      assert!(matches!(err, ModelError::InvalidDescriptor { ref id, .. } if id == "ssd"));
    }

    let catalog = ModelCatalog::new(vec![custom("ssd", (300, 300))]).unwrap();
    assert!(catalog.contains("ssd"));
  }

  #[test]
  fn custom_catalog_rejects_duplicate_ids() {
    let err = ModelCatalog::new(vec![custom("ssd", (300, 300)), custom("ssd", (320, 320))])
      .unwrap_err();
    assert!(matches!(err, ModelError::InvalidDescriptor { .. }));
  }
}
