// 该文件是 Huoyan （火眼） 项目的一部分。
// src/config.rs - 流水线配置
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

use std::{collections::HashMap, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("配置文件格式错误: {0}")]
  FormatError(#[from] serde_json::Error),
  #[error("配置项 {name} 超出范围: {value}")]
  OutOfRange { name: &'static str, value: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
  /// 置信度阈值 (0.0 - 1.0)，低于该值的检测被丢弃
  pub confidence_threshold: f32,
}

impl Default for InferenceConfig {
  fn default() -> Self {
    Self {
      confidence_threshold: 0.5,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
  /// 参与匹配的最小 IoU
  pub match_threshold: f32,
  /// 连续匹配多少帧后确认轨迹
  pub confirm_after: u32,
  /// 已确认轨迹允许连续丢失的帧数
  pub max_missed: u32,
}

impl Default for TrackerConfig {
  fn default() -> Self {
    Self {
      match_threshold: 0.3,
      confirm_after: 2,
      max_missed: 5,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
  /// 历史记录上限，None 表示不限制
  pub max_history: Option<usize>,
  /// 持久化使用的键
  pub history_key: String,
}

impl Default for RecorderConfig {
  fn default() -> Self {
    Self {
      max_history: None,
      history_key: "detectionResults".to_string(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  /// 启动时选择的模型
  pub default_model: Option<String>,
  /// 按模型 id 替换来源定位符
  pub locators: HashMap<String, String>,
  pub inference: InferenceConfig,
  pub tracker: TrackerConfig,
  pub recorder: RecorderConfig,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      default_model: Some("efficientdet".to_string()),
      locators: HashMap::new(),
      inference: InferenceConfig::default(),
      tracker: TrackerConfig::default(),
      recorder: RecorderConfig::default(),
    }
  }
}

impl PipelineConfig {
  /// 从 JSON 文件读取配置，缺省项使用默认值
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    info!("读取配置文件: {}", path.display());
    let data = std::fs::read(path)?;
    let config: Self = serde_json::from_slice(&data)?;
    config.validate()?;
    Ok(config)
  }

  /// 读取配置文件，未指定时使用默认配置
  pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
    match path {
      Some(path) => Self::from_file(path),
      None => Ok(Self::default()),
    }
  }

  /// 应用命令行覆盖并重新校验
  pub fn with_overrides(
    mut self,
    default_model: Option<String>,
    locators: Vec<(String, String)>,
    confidence_threshold: Option<f32>,
  ) -> Result<Self, ConfigError> {
    if default_model.is_some() {
      self.default_model = default_model;
    }
    self.locators.extend(locators);
    if let Some(threshold) = confidence_threshold {
      self.inference.confidence_threshold = threshold;
    }
    self.validate()?;
    Ok(self)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    let unit = |name: &'static str, value: f32| {
      if (0.0..=1.0).contains(&value) {
        Ok(())
      } else {
        Err(ConfigError::OutOfRange {
          name,
          value: value as f64,
        })
      }
    };
    unit(
      "inference.confidence_threshold",
      self.inference.confidence_threshold,
    )?;
    unit("tracker.match_threshold", self.tracker.match_threshold)?;
    if self.tracker.confirm_after == 0 {
      return Err(ConfigError::OutOfRange {
        name: "tracker.confirm_after",
        value: 0.0,
      });
    }
    if self.recorder.max_history == Some(0) {
      return Err(ConfigError::OutOfRange {
        name: "recorder.max_history",
        value: 0.0,
      });
    }
    Ok(())
  }
}

/// 解析命令行中 `id=url` 形式的模型来源覆盖
pub fn parse_locator(value: &str) -> Result<(String, String), String> {
  match value.split_once('=') {
    Some((id, locator)) if !id.is_empty() && !locator.is_empty() => {
      Ok((id.to_string(), locator.to_string()))
    }
    _ => Err(format!("期望 id=url 形式, 实际为 '{}'", value)),
  }
}
