// 该文件是 Huoyan （火眼） 项目的一部分。
// src/recorder/store.rs - 键值存储
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

use std::{
  collections::HashMap,
  sync::{Arc, Mutex, PoisonError},
};

use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("非法的键: {0}")]
  InvalidKey(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 格式错误: {0}")]
  FormatError(#[from] serde_json::Error),
  #[error("路径不是合法的 UTF-8: {0}")]
  InvalidPath(#[from] std::string::FromUtf8Error),
}

/// 以 JSON 值为内容的键值存储
pub trait KeyValueStore: Send + Sync {
  fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
  fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
}

/// 内存存储，克隆后共享同一份数据
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
  entries: Arc<Mutex<HashMap<String, Value>>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl KeyValueStore for MemoryStore {
  fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
    let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
    Ok(entries.get(key).cloned())
  }

  fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
    let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
    entries.insert(key.to_string(), value);
    Ok(())
  }
}

#[cfg(feature = "directory_record")]
mod json_file {
  use std::path::{Path, PathBuf};

  use serde_json::Value;
  use tracing::debug;

  use super::{KeyValueStore, StoreError};
  use crate::{FromUrl, FromUrlWithScheme};

  /// 目录存储，每个键对应目录下的 `<key>.json`
  #[derive(Debug, Clone)]
  pub struct JsonFileStore {
    directory: PathBuf,
  }

  impl JsonFileStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
      Self {
        directory: directory.into(),
      }
    }

    pub fn directory(&self) -> &Path {
      &self.directory
    }

    fn path_of(&self, key: &str) -> Result<PathBuf, StoreError> {
      let valid = !key.is_empty()
        && key
          .chars()
          .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && !key.starts_with('.');
      if !valid {
        return Err(StoreError::InvalidKey(key.to_string()));
      }
      Ok(self.directory.join(format!("{key}.json")))
    }
  }

  impl FromUrlWithScheme for JsonFileStore {
    const SCHEME: &'static str = "folder";
  }

  impl FromUrl for JsonFileStore {
    type Error = StoreError;

    fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
      if uri.scheme() != Self::SCHEME {
        return Err(StoreError::SchemeMismatch);
      }
      Ok(Self::new(crate::url_to_path(uri)?))
    }
  }

  impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
      let path = self.path_of(key)?;
      if !path.exists() {
        return Ok(None);
      }
      let data = std::fs::read(&path)?;
      Ok(Some(serde_json::from_slice(&data)?))
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
      let path = self.path_of(key)?;
      if !self.directory.exists() {
        std::fs::create_dir_all(&self.directory)?;
      }
      // 先写临时文件再改名，读者不会看到写了一半的文件
      let staging = path.with_extension("json.tmp");
      std::fs::write(&staging, serde_json::to_vec_pretty(&value)?)?;
      std::fs::rename(&staging, &path)?;
      debug!("已写入 {}", path.display());
      Ok(())
    }
  }
}

#[cfg(feature = "directory_record")]
pub use self::json_file::JsonFileStore;
