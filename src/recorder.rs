// 该文件是 Huoyan （火眼） 项目的一部分。
// src/recorder.rs - 会话记录
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

use std::collections::{VecDeque, vec_deque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{config::RecorderConfig, detection::Detection, tracker::Track};

mod store;

#[cfg(feature = "directory_record")]
pub use self::store::JsonFileStore;
pub use self::store::{KeyValueStore, MemoryStore, StoreError};

#[derive(Error, Debug)]
pub enum RecorderError {
  #[error("保存历史记录失败: {0}")]
  PersistFailed(#[source] StoreError),
  #[error("读取历史记录失败: {0}")]
  RestoreFailed(#[source] StoreError),
  #[error("历史记录格式错误: {0}")]
  FormatError(#[from] serde_json::Error),
}

/// 某一时刻的检测与跟踪结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
  #[serde(rename = "detectionResults")]
  pub detections: Vec<Detection>,
  #[serde(rename = "trackedObjects")]
  pub tracks: Vec<Track>,
  pub timestamp: DateTime<Utc>,
}

impl Snapshot {
  pub fn new(timestamp: DateTime<Utc>, detections: Vec<Detection>, tracks: Vec<Track>) -> Self {
    Self {
      detections,
      tracks,
      timestamp,
    }
  }
}

/// 只追加的有界历史记录，可选持久化
pub struct SessionRecorder {
  config: RecorderConfig,
  history: VecDeque<Snapshot>,
  store: Option<Box<dyn KeyValueStore>>,
}

impl SessionRecorder {
  pub fn new(config: RecorderConfig) -> Self {
    Self {
      config,
      history: VecDeque::new(),
      store: None,
    }
  }

  pub fn with_store(mut self, store: impl KeyValueStore + 'static) -> Self {
    self.store = Some(Box::new(store));
    self
  }

  /// 从存储中读取已保存的历史记录，之后的记录继续写入该存储
  pub fn restore(
    config: RecorderConfig,
    store: impl KeyValueStore + 'static,
  ) -> Result<Self, RecorderError> {
    let saved = store
      .get(&config.history_key)
      .map_err(RecorderError::RestoreFailed)?;
    let snapshots: Vec<Snapshot> = match saved {
      Some(value) => serde_json::from_value(value)?,
      None => Vec::new(),
    };
    info!(
      "从 {} 恢复 {} 条历史记录",
      config.history_key,
      snapshots.len()
    );

    let mut recorder = Self::new(config).with_store(store);
    recorder.history.extend(snapshots);
    recorder.truncate();
    Ok(recorder)
  }

  /// 追加一条记录
  ///
  /// 内存中的追加总会生效；持久化失败时返回错误。
  pub fn record(&mut self, snapshot: Snapshot) -> Result<(), RecorderError> {
    debug!(
      "记录 {}: {} 个检测, {} 条轨迹",
      snapshot.timestamp,
      snapshot.detections.len(),
      snapshot.tracks.len()
    );
    self.history.push_back(snapshot);
    self.truncate();
    self.persist()
  }

  /// 按时间顺序遍历历史记录
  pub fn history(&self) -> vec_deque::Iter<'_, Snapshot> {
    self.history.iter()
  }

  pub fn latest(&self) -> Option<&Snapshot> {
    self.history.back()
  }

  pub fn len(&self) -> usize {
    self.history.len()
  }

  pub fn is_empty(&self) -> bool {
    self.history.is_empty()
  }

  pub fn config(&self) -> &RecorderConfig {
    &self.config
  }

  fn truncate(&mut self) {
    let Some(max) = self.config.max_history else {
      return;
    };
    while self.history.len() > max {
      if let Some(evicted) = self.history.pop_front() {
        debug!("历史记录已满, 淘汰 {}", evicted.timestamp);
      }
    }
  }

  fn persist(&self) -> Result<(), RecorderError> {
    let Some(store) = &self.store else {
      return Ok(());
    };
    let value = serde_json::to_value(&self.history)?;
    store.set(&self.config.history_key, value).map_err(|e| {
      warn!("保存历史记录失败: {}", e);
      RecorderError::PersistFailed(e)
    })
  }
}

impl Default for SessionRecorder {
  fn default() -> Self {
    Self::new(RecorderConfig::default())
  }
}
