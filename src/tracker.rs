// 该文件是 Huoyan （火眼） 项目的一部分。
// src/tracker.rs - 多目标跟踪
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
use tracing::{debug, info};

use crate::{config::TrackerConfig, detection::Detection};

pub mod association;
mod track;

pub use self::association::{Assignment, Match, greedy_match};
pub use self::track::{Track, TrackState};

/// 基于 IoU 贪心匹配的多目标跟踪器
///
/// 轨迹生命周期：
/// - 新检测生成 Tentative 轨迹，创建帧计为第一次命中
/// - 连续命中 `confirm_after` 帧后转为 Confirmed
/// - Tentative 轨迹一旦丢失即移除
/// - Confirmed 轨迹连续丢失超过 `max_missed` 帧后移除
///
/// 轨迹 ID 单调递增，从不复用。
#[derive(Debug)]
pub struct ObjectTracker {
  config: TrackerConfig,
  tracks: Vec<Track>,
  next_id: u64,
  removed: Vec<u64>,
}

impl ObjectTracker {
  pub fn new(config: TrackerConfig) -> Self {
    Self {
      config,
      tracks: Vec::new(),
      next_id: 1,
      removed: Vec::new(),
    }
  }

  pub fn config(&self) -> &TrackerConfig {
    &self.config
  }

  /// 用一帧检测结果更新跟踪状态，返回当前存活的轨迹
  pub fn update(&mut self, detections: &[Detection], timestamp: DateTime<Utc>) -> &[Track] {
    let Assignment {
      matches,
      unmatched_tracks,
      unmatched_detections,
    } = greedy_match(&self.tracks, detections, self.config.match_threshold);

    for m in &matches {
      let track = &mut self.tracks[m.track];
      let was_confirmed = track.is_confirmed();
      track.mark_matched(&detections[m.detection], timestamp, self.config.confirm_after);
      if !was_confirmed && track.is_confirmed() {
        debug!("轨迹 {} 已确认", track.id);
      }
    }
    for &i in &unmatched_tracks {
      self.tracks[i].mark_missed(self.config.max_missed);
    }
    self.purge_lost();

    for &i in &unmatched_detections {
      let track = Track::new(
        self.next_id,
        &detections[i],
        timestamp,
        self.config.confirm_after,
      );
      debug!("新建轨迹 {} (类别 {})", track.id, track.class_id);
      self.next_id += 1;
      self.tracks.push(track);
    }

    debug!(
      "跟踪更新: {} 个检测, {} 个匹配, {} 条新轨迹, {} 条存活",
      detections.len(),
      matches.len(),
      unmatched_detections.len(),
      self.tracks.len()
    );
    &self.tracks
  }

  /// 当前帧没有可用检测（例如推理失败）时，所有轨迹记一次丢失
  pub fn mark_missed(&mut self, timestamp: DateTime<Utc>) -> &[Track] {
    for track in &mut self.tracks {
      track.mark_missed(self.config.max_missed);
    }
    self.purge_lost();
    debug!("{} 无可用检测, 剩余 {} 条轨迹", timestamp, self.tracks.len());
    &self.tracks
  }

  pub fn tracks(&self) -> &[Track] {
    &self.tracks
  }

  /// 最近一次更新中被移除的轨迹 ID
  pub fn removed(&self) -> &[u64] {
    &self.removed
  }

  /// 下一条新轨迹将使用的 ID
  pub fn next_id(&self) -> u64 {
    self.next_id
  }

  /// 清空所有轨迹，ID 计数不回退
  pub fn reset(&mut self) {
    info!("跟踪器重置, 清除 {} 条轨迹", self.tracks.len());
    self.tracks.clear();
    self.removed.clear();
  }

  fn purge_lost(&mut self) {
    self.removed.clear();
    let removed = &mut self.removed;
    self.tracks.retain(|track| {
      if track.is_lost() {
        debug!("轨迹 {} 丢失 {} 帧, 移除", track.id, track.missed_frames);
        removed.push(track.id);
        false
      } else {
        true
      }
    });
  }
}

impl Default for ObjectTracker {
  fn default() -> Self {
    Self::new(TrackerConfig::default())
  }
}
