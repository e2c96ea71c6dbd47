// 该文件是 Huoyan （火眼） 项目的一部分。
// src/task/session.rs - 检测会话：推理结果 -> 跟踪 -> 记录
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
  sync::Arc,
  time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  config::PipelineConfig,
  detection::Detection,
  frame::Frame,
  inference::{InferenceError, InferenceOutcome, InferencePipeline, InferenceScheduler},
  model::{ModelError, ModelRegistry},
  recorder::{RecorderError, SessionRecorder, Snapshot},
  tracker::{ObjectTracker, Track},
};

#[derive(Error, Debug)]
pub enum SessionError {
  #[error("无法启动推理线程: {0}")]
  SpawnFailed(#[from] std::io::Error),
  #[error("模型错误: {0}")]
  ModelError(#[from] ModelError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
  /// 已应用过更新的帧
  Stale,
  /// 推理期间当前模型已切换
  ModelSwitched,
}

#[derive(Debug)]
pub enum FrameOutcome {
  Tracked {
    detections: Vec<Detection>,
    tracks: Vec<Track>,
  },
  /// 推理失败，跟踪器按丢失处理
  Failed(InferenceError),
  Discarded(DiscardReason),
}

/// 一帧推理结果被会话处理后的报告
#[derive(Debug)]
pub struct FrameReport {
  pub frame_index: u64,
  pub timestamp: DateTime<Utc>,
  pub model_id: Option<String>,
  pub outcome: FrameOutcome,
}

impl FrameReport {
  pub fn is_tracked(&self) -> bool {
    matches!(self.outcome, FrameOutcome::Tracked { .. })
  }
}

/// 检测会话
///
/// 帧提交给推理调度器，结果按到达顺序应用到跟踪器。
/// 帧序号不新于上次应用的结果被丢弃；推理期间模型被切换的结果也被丢弃。
pub struct DetectionSession {
  registry: Arc<ModelRegistry>,
  scheduler: InferenceScheduler,
  tracker: ObjectTracker,
  recorder: SessionRecorder,
  last_applied: Option<u64>,
  latest: Option<Snapshot>,
}

impl DetectionSession {
  /// 创建会话并选择配置中的默认模型
  ///
  /// 默认模型加载失败不会阻止会话启动，之后的帧会报告模型未就绪。
  pub fn new(config: &PipelineConfig, registry: Arc<ModelRegistry>) -> Result<Self, SessionError> {
    if let Some(id) = &config.default_model
      && let Err(e) = registry.select_model(id)
    {
      error!("默认模型 {} 选择失败: {}", id, e);
    }

    let pipeline = InferencePipeline::new(config.inference);
    let scheduler = InferenceScheduler::spawn(Arc::clone(&registry), pipeline)?;
    info!("检测会话已启动, 当前模型: {:?}", registry.active_id());

    Ok(Self {
      registry,
      scheduler,
      tracker: ObjectTracker::new(config.tracker),
      recorder: SessionRecorder::new(config.recorder.clone()),
      last_applied: None,
      latest: None,
    })
  }

  pub fn with_recorder(mut self, recorder: SessionRecorder) -> Self {
    self.recorder = recorder;
    self
  }

  pub fn registry(&self) -> &Arc<ModelRegistry> {
    &self.registry
  }

  /// 切换当前模型；切换前已在途的推理结果会被丢弃
  pub fn select_model(&self, id: &str) -> Result<(), SessionError> {
    self.registry.select_model(id)?;
    Ok(())
  }

  /// 提交一帧，不等待推理
  pub fn submit(&self, frame: Frame) -> bool {
    self.scheduler.submit(frame)
  }

  /// 应用所有已到达的推理结果，不阻塞
  pub fn drain(&mut self) -> Vec<FrameReport> {
    let mut reports = Vec::new();
    while let Some(outcome) = self.scheduler.try_recv() {
      reports.push(self.apply(outcome));
    }
    reports
  }

  /// 等待下一个推理结果并应用
  pub fn wait_next(&mut self, timeout: Duration) -> Option<FrameReport> {
    self
      .scheduler
      .recv_timeout(timeout)
      .map(|outcome| self.apply(outcome))
  }

  /// 等待所有已提交的帧处理完毕
  pub fn wait_idle(&mut self, timeout: Duration) -> Vec<FrameReport> {
    const POLL: Duration = Duration::from_millis(10);

    let deadline = Instant::now() + timeout;
    let mut reports = Vec::new();
    loop {
      // 工作线程先发送结果再清除在途标记
      let idle = self.scheduler.is_idle();
      reports.extend(self.drain());
      if idle {
        break;
      }
      let now = Instant::now();
      if now >= deadline {
        warn!("等待推理完成超时");
        break;
      }
      if let Some(report) = self.wait_next(POLL.min(deadline - now)) {
        reports.push(report);
      }
    }
    reports
  }

  /// 当前存活的轨迹
  pub fn tracks(&self) -> &[Track] {
    self.tracker.tracks()
  }

  pub fn tracker(&self) -> &ObjectTracker {
    &self.tracker
  }

  /// 最近一次成功应用的结果
  pub fn latest(&self) -> Option<&Snapshot> {
    self.latest.as_ref()
  }

  pub fn last_applied(&self) -> Option<u64> {
    self.last_applied
  }

  pub fn recorder(&self) -> &SessionRecorder {
    &self.recorder
  }

  pub fn dropped_frames(&self) -> u64 {
    self.scheduler.dropped_frames()
  }

  /// 记录最近一次结果，没有结果时返回 false
  pub fn record(&mut self) -> Result<bool, RecorderError> {
    let Some(snapshot) = self.latest.clone() else {
      return Ok(false);
    };
    self.recorder.record(snapshot)?;
    Ok(true)
  }

  /// 停止会话：待处理帧被丢弃，在途推理完成后结果被丢弃
  pub fn stop(self) -> SessionRecorder {
    self.scheduler.stop();
    info!("检测会话已停止");
    self.recorder
  }

  fn apply(&mut self, outcome: InferenceOutcome) -> FrameReport {
    let InferenceOutcome {
      frame_index,
      timestamp,
      generation,
      model_id,
      result,
    } = outcome;
    let report = |outcome| FrameReport {
      frame_index,
      timestamp,
      model_id: model_id.clone(),
      outcome,
    };

    if self.last_applied.is_some_and(|last| frame_index <= last) {
      debug!("第 {} 帧结果过期, 丢弃", frame_index);
      return report(FrameOutcome::Discarded(DiscardReason::Stale));
    }
    if let Some(generation) = generation
      && generation != self.registry.generation()
    {
      info!(
        "第 {} 帧由已替换的模型 {:?} 推理, 丢弃结果",
        frame_index, model_id
      );
      return report(FrameOutcome::Discarded(DiscardReason::ModelSwitched));
    }

    self.last_applied = Some(frame_index);
    match result {
      Ok(detections) => {
        let tracks = self.tracker.update(&detections, timestamp).to_vec();
        self.latest = Some(Snapshot::new(timestamp, detections.clone(), tracks.clone()));
        report(FrameOutcome::Tracked { detections, tracks })
      }
      Err(e) => {
        warn!("第 {} 帧推理失败: {}", frame_index, e);
        self.tracker.mark_missed(timestamp);
        report(FrameOutcome::Failed(e))
      }
    }
  }
}
