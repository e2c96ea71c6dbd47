// 该文件是 Huoyan （火眼） 项目的一部分。
// src/model/loader.rs - 模型加载器
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

use std::{collections::HashMap, sync::Arc};

use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{
  BoxError,
  model::{DetectionModel, ModelDescriptor},
};

/// 根据模型描述获取模型制品并创建可执行实例
pub trait ModelLoader: Send + Sync {
  fn load(&self, descriptor: &ModelDescriptor) -> Result<Box<dyn DetectionModel>, BoxError>;
}

#[derive(Error, Debug)]
pub enum LoaderError {
  #[error("模型定位符无效: {0}")]
  InvalidLocator(#[from] url::ParseError),
  #[error("不支持的定位符方案: {0}")]
  UnsupportedScheme(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("回放文件格式错误: {0}")]
  ReplayFormat(#[from] serde_json::Error),
  #[error("回放文件不包含任何输出")]
  EmptyReplay,
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("路径不是合法的 UTF-8: {0}")]
  InvalidPath(#[from] std::string::FromUtf8Error),
}

/// 按定位符 URL 方案分派的加载器集合
#[derive(Default, Clone)]
pub struct LoaderSet {
  loaders: HashMap<String, Arc<dyn ModelLoader>>,
}

impl LoaderSet {
  pub fn new() -> Self {
    Self::default()
  }

  /// 包含本库自带加载器的集合
  pub fn with_builtin() -> Self {
    let set = Self::new();
    #[cfg(feature = "replay_model")]
    let set = {
      use crate::FromUrlWithScheme;
      set.register(ReplayModel::SCHEME, ReplayLoader)
    };
    #[cfg(feature = "onnx_model")]
    let set = crate::model::ONNX_SCHEMES
      .iter()
      .fold(set, |set, scheme| set.register(scheme, crate::model::OnnxLoader));
    set
  }

  pub fn register(mut self, scheme: &str, loader: impl ModelLoader + 'static) -> Self {
    self.loaders.insert(scheme.to_string(), Arc::new(loader));
    self
  }

  /// 定位符是否有对应方案的加载器
  pub fn supports(&self, locator: &str) -> bool {
    Url::parse(locator).is_ok_and(|url| self.loaders.contains_key(url.scheme()))
  }
}

impl ModelLoader for LoaderSet {
  fn load(&self, descriptor: &ModelDescriptor) -> Result<Box<dyn DetectionModel>, BoxError> {
    let url = Url::parse(&descriptor.source_locator).map_err(LoaderError::from)?;
    match self.loaders.get(url.scheme()) {
      Some(loader) => {
        debug!("使用 {} 加载器加载模型 {}", url.scheme(), descriptor.id);
        loader.load(descriptor)
      }
      None => {
        error!("模型 {} 的定位符方案 {} 没有对应的加载器", descriptor.id, url.scheme());
        Err(LoaderError::UnsupportedScheme(url.scheme().to_string()).into())
      }
    }
  }
}

#[cfg(feature = "replay_model")]
pub use self::replay::{ReplayLoader, ReplayModel};

#[cfg(feature = "replay_model")]
mod replay {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use tracing::{debug, info};
  use url::Url;

  use super::LoaderError;
  use crate::{
    BoxError, FromUrl, FromUrlWithScheme,
    frame::InputTensor,
    model::{DetectionModel, ModelDescriptor, RawOutput},
    url_to_path,
  };

  /// 回放预先录制的原始输出，用于没有推理运行时的环境
  #[derive(Debug)]
  pub struct ReplayModel {
    outputs: Vec<RawOutput>,
    cursor: AtomicUsize,
  }

  impl ReplayModel {
    pub fn new(outputs: Vec<RawOutput>) -> Result<Self, LoaderError> {
      if outputs.is_empty() {
        return Err(LoaderError::EmptyReplay);
      }
      Ok(Self {
        outputs,
        cursor: AtomicUsize::new(0),
      })
    }
  }

  impl FromUrlWithScheme for ReplayModel {
    const SCHEME: &'static str = "replay";
  }

  impl FromUrl for ReplayModel {
    type Error = LoaderError;

    fn from_url(url: &Url) -> Result<Self, Self::Error> {
      if url.scheme() != Self::SCHEME {
        return Err(LoaderError::SchemeMismatch);
      }

      let path = url_to_path(url)?;
      let data = std::fs::read(&path)?;
      debug!(
        "回放文件大小: {:.2} KB",
        data.len() as f64 / 1024.0
      );
      let outputs: Vec<RawOutput> = serde_json::from_slice(&data)?;
      info!("回放文件 {} 包含 {} 组输出", path.display(), outputs.len());
      Self::new(outputs)
    }
  }

  impl DetectionModel for ReplayModel {
    fn execute(&self, _input: &InputTensor) -> Result<RawOutput, BoxError> {
      let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.outputs.len();
      Ok(self.outputs[index].clone())
    }
  }

  pub struct ReplayLoader;

  impl super::ModelLoader for ReplayLoader {
    fn load(&self, descriptor: &ModelDescriptor) -> Result<Box<dyn DetectionModel>, BoxError> {
      let url = Url::parse(&descriptor.source_locator).map_err(LoaderError::from)?;
      let model = ReplayModel::from_url(&url)?;
      Ok(Box::new(model))
    }
  }
}
