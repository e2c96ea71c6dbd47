// 该文件是 Huoyan （火眼） 项目的一部分。
// src/tracker/track.rs - 轨迹与生命周期状态
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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::detection::{BBox, Detection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackState {
  /// 新建轨迹，尚未确认
  Tentative,
  /// 已确认轨迹
  Confirmed,
  /// 丢失，当帧即被移除
  Lost,
}

/// 跟踪对象
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
  /// 唯一跟踪 ID，不会复用
  pub id: u64,
  pub bbox: BBox,
  pub class_id: u32,
  pub confidence: f32,
  pub state: TrackState,
  /// 轨迹存在的总帧数
  pub age: u32,
  /// 连续匹配帧数
  pub hits: u32,
  /// 连续丢失帧数
  pub missed_frames: u32,
  pub last_seen: DateTime<Utc>,
}

impl Track {
  pub(crate) fn new(
    id: u64,
    detection: &Detection,
    timestamp: DateTime<Utc>,
    confirm_after: u32,
  ) -> Self {
    let state = if confirm_after <= 1 {
      TrackState::Confirmed
    } else {
      TrackState::Tentative
    };
    Self {
      id,
      bbox: detection.bbox,
      class_id: detection.class_id,
      confidence: detection.confidence,
      state,
      age: 1,
      hits: 1,
      missed_frames: 0,
      last_seen: timestamp,
    }
  }

  pub(crate) fn mark_matched(
    &mut self,
    detection: &Detection,
    timestamp: DateTime<Utc>,
    confirm_after: u32,
  ) {
    self.bbox = detection.bbox;
    self.confidence = detection.confidence;
    self.last_seen = timestamp;
    self.missed_frames = 0;
    self.hits += 1;
    self.age += 1;

    if self.state == TrackState::Tentative && self.hits >= confirm_after {
      self.state = TrackState::Confirmed;
    }
  }

  pub(crate) fn mark_missed(&mut self, max_missed: u32) {
    self.missed_frames += 1;
    self.hits = 0;
    self.age += 1;

    self.state = match self.state {
      TrackState::Tentative => TrackState::Lost,
      TrackState::Confirmed if self.missed_frames > max_missed => TrackState::Lost,
      state => state,
    };
  }

  pub fn is_confirmed(&self) -> bool {
    self.state == TrackState::Confirmed
  }

  pub fn is_lost(&self) -> bool {
    self.state == TrackState::Lost
  }
}
