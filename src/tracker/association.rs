// 该文件是 Huoyan （火眼） 项目的一部分。
// src/tracker/association.rs - IoU 贪心匹配
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

use crate::{detection::Detection, tracker::Track};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
  pub track: usize,
  pub detection: usize,
  pub iou: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assignment {
  pub matches: Vec<Match>,
  pub unmatched_tracks: Vec<usize>,
  pub unmatched_detections: Vec<usize>,
}

/// 按 IoU 降序贪心匹配轨迹与检测
///
/// 只有类别相同且 IoU 不低于阈值的组合参与匹配。IoU 相同时依次比较
/// 轨迹的连续丢失帧数、轨迹 ID、检测序号，结果可复现。
pub fn greedy_match(tracks: &[Track], detections: &[Detection], threshold: f32) -> Assignment {
  let mut candidates = Vec::new();
  for (ti, track) in tracks.iter().enumerate() {
    for (di, detection) in detections.iter().enumerate() {
      if track.class_id != detection.class_id {
        continue;
      }
      let iou = track.bbox.iou(&detection.bbox);
      if iou >= threshold {
        candidates.push(Match {
          track: ti,
          detection: di,
          iou,
        });
      }
    }
  }

  candidates.sort_by(|a, b| {
    let (ta, tb) = (&tracks[a.track], &tracks[b.track]);
    b.iou
      .total_cmp(&a.iou)
      .then(ta.missed_frames.cmp(&tb.missed_frames))
      .then(ta.id.cmp(&tb.id))
      .then(a.detection.cmp(&b.detection))
  });

  let mut used_track = vec![false; tracks.len()];
  let mut used_det = vec![false; detections.len()];
  let mut matches = Vec::new();

  for candidate in candidates {
    if !used_track[candidate.track] && !used_det[candidate.detection] {
      used_track[candidate.track] = true;
      used_det[candidate.detection] = true;
      matches.push(candidate);
    }
  }

  Assignment {
    matches,
    unmatched_tracks: (0..tracks.len()).filter(|&i| !used_track[i]).collect(),
    unmatched_detections: (0..detections.len()).filter(|&i| !used_det[i]).collect(),
  }
}
