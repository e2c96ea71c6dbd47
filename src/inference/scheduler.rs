// 该文件是 Huoyan （火眼） 项目的一部分。
// src/inference/scheduler.rs - 单推理在途 + 最新待处理帧调度
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
  sync::{
    Arc, Condvar, Mutex, MutexGuard, PoisonError,
    mpsc::{self, Receiver, RecvTimeoutError, Sender},
  },
  thread::{self, JoinHandle},
  time::Duration,
};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use crate::{
  detection::Detection,
  frame::Frame,
  inference::{InferenceError, InferencePipeline},
  model::ModelRegistry,
};

/// 一次推理的结果，附带发起时的模型代次
#[derive(Debug)]
pub struct InferenceOutcome {
  pub frame_index: u64,
  pub timestamp: DateTime<Utc>,
  /// 发起推理时注册表的代次，没有当前模型时为 None
  pub generation: Option<u64>,
  pub model_id: Option<String>,
  pub result: Result<Vec<Detection>, InferenceError>,
}

#[derive(Default)]
struct SchedulerState {
  pending: Option<Frame>,
  in_flight: Option<u64>,
  closed: bool,
  dropped: u64,
}

#[derive(Default)]
struct Shared {
  state: Mutex<SchedulerState>,
  wakeup: Condvar,
}

impl Shared {
  fn lock(&self) -> MutexGuard<'_, SchedulerState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// 推理调度器
///
/// 同一时刻最多一个推理在途，最多保留一个待处理帧；
/// 新帧到达时替换尚未开始的旧帧，从不取消正在执行的推理。
pub struct InferenceScheduler {
  shared: Arc<Shared>,
  results: Receiver<InferenceOutcome>,
  worker: Option<JoinHandle<()>>,
}

impl InferenceScheduler {
  pub fn spawn(
    registry: Arc<ModelRegistry>,
    pipeline: InferencePipeline,
  ) -> std::io::Result<Self> {
    let shared = Arc::new(Shared::default());
    let (tx, rx) = mpsc::channel();

    let worker = {
      let shared = Arc::clone(&shared);
      thread::Builder::new()
        .name("huoyan-inference".to_string())
        .spawn(move || worker_loop(shared, registry, pipeline, tx))?
    };
    info!("推理线程已启动");

    Ok(Self {
      shared,
      results: rx,
      worker: Some(worker),
    })
  }

  /// 提交一帧，不阻塞；调度器关闭后返回 false
  pub fn submit(&self, frame: Frame) -> bool {
    let mut state = self.shared.lock();
    if state.closed {
      return false;
    }
    if let Some(older) = state.pending.replace(frame) {
      state.dropped += 1;
      debug!("第 {} 帧尚未开始推理，被新帧替换", older.index);
    }
    self.shared.wakeup.notify_all();
    true
  }

  pub fn try_recv(&self) -> Option<InferenceOutcome> {
    self.results.try_recv().ok()
  }

  pub fn recv_timeout(&self, timeout: Duration) -> Option<InferenceOutcome> {
    match self.results.recv_timeout(timeout) {
      Ok(outcome) => Some(outcome),
      Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
    }
  }

  /// 没有待处理帧也没有在途推理
  pub fn is_idle(&self) -> bool {
    let state = self.shared.lock();
    state.pending.is_none() && state.in_flight.is_none()
  }

  pub fn in_flight(&self) -> Option<u64> {
    self.shared.lock().in_flight
  }

  /// 被替换而未推理的帧数
  pub fn dropped_frames(&self) -> u64 {
    self.shared.lock().dropped
  }

  /// 停止接收新帧并丢弃待处理帧，在途推理继续执行
  pub fn close(&self) {
    let mut state = self.shared.lock();
    state.closed = true;
    if let Some(frame) = state.pending.take() {
      debug!("调度器关闭，丢弃待处理的第 {} 帧", frame.index);
    }
    self.shared.wakeup.notify_all();
  }

  /// 关闭调度器，等待在途推理完成并静默丢弃其结果
  pub fn stop(mut self) {
    self.shutdown();
  }

  fn shutdown(&mut self) {
    self.close();
    if let Some(worker) = self.worker.take() {
      if worker.join().is_err() {
        error!("推理线程异常退出");
      }
      for outcome in self.results.try_iter() {
        debug!("调度器已停止，丢弃第 {} 帧的推理结果", outcome.frame_index);
      }
      info!("推理线程已停止");
    }
  }
}

impl Drop for InferenceScheduler {
  fn drop(&mut self) {
    self.shutdown();
  }
}

fn worker_loop(
  shared: Arc<Shared>,
  registry: Arc<ModelRegistry>,
  pipeline: InferencePipeline,
  tx: Sender<InferenceOutcome>,
) {
  loop {
    let frame = {
      let mut state = shared.lock();
      while state.pending.is_none() && !state.closed {
        state = shared
          .wakeup
          .wait(state)
          .unwrap_or_else(PoisonError::into_inner);
      }
      if state.closed {
        break;
      }
      let Some(frame) = state.pending.take() else {
        continue;
      };
      state.in_flight = Some(frame.index);
      frame
    };

    let outcome = match registry.active_with_generation() {
      Ok((model, generation)) => InferenceOutcome {
        frame_index: frame.index,
        timestamp: frame.timestamp,
        generation: Some(generation),
        model_id: Some(model.id().to_string()),
        result: pipeline.infer(&frame, &model),
      },
      Err(_) => InferenceOutcome {
        frame_index: frame.index,
        timestamp: frame.timestamp,
        generation: None,
        model_id: None,
        result: Err(InferenceError::ModelNotReady),
      },
    };

    let sent = tx.send(outcome).is_ok();
    {
      let mut state = shared.lock();
      state.in_flight = None;
      shared.wakeup.notify_all();
    }
    if !sent {
      break;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    model::{ModelCatalog, catalog::EFFICIENTDET},
    testing::{self, GateModel, ScriptedLoader},
  };

  const TIMEOUT: Duration = Duration::from_secs(5);

  fn gated() -> (InferenceScheduler, testing::Gate) {
    let (model, gate) = GateModel::new();
    let loader = ScriptedLoader::default().with_model(EFFICIENTDET, model);
    let registry = Arc::new(ModelRegistry::new(ModelCatalog::builtin(), loader));
    registry.select_model(EFFICIENTDET).unwrap();
    let scheduler = InferenceScheduler::spawn(registry, InferencePipeline::default()).unwrap();
    (scheduler, gate)
  }

  #[test]
  fn only_latest_pending_frame_is_kept() {
    let (scheduler, gate) = gated();
    assert!(scheduler.submit(testing::frame(1, 32, 32)));
    gate.wait_started();
    assert_eq!(scheduler.in_flight(), Some(1));

    scheduler.submit(testing::frame(2, 32, 32));
    scheduler.submit(testing::frame(3, 32, 32));
    assert_eq!(scheduler.dropped_frames(), 1);

    gate.release();
    gate.release();
    let first = scheduler.recv_timeout(TIMEOUT).unwrap();
    let second = scheduler.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(first.frame_index, 1);
    assert_eq!(second.frame_index, 3);
    assert_eq!(second.model_id.as_deref(), Some(EFFICIENTDET));
    assert!(second.result.is_ok());
    scheduler.stop();
  }

  #[test]
  fn missing_model_reports_not_ready() {
    let registry = Arc::new(ModelRegistry::new(
      ModelCatalog::builtin(),
      ScriptedLoader::default(),
    ));
    let scheduler = InferenceScheduler::spawn(registry, InferencePipeline::default()).unwrap();
    scheduler.submit(testing::frame(7, 32, 32));
    let outcome = scheduler.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(outcome.frame_index, 7);
    assert_eq!(outcome.generation, None);
    assert!(matches!(outcome.result, Err(InferenceError::ModelNotReady)));
  }

  #[test]
  fn stop_lets_in_flight_work_finish_and_drops_pending() {
    let (scheduler, gate) = gated();
    scheduler.submit(testing::frame(1, 32, 32));
    gate.wait_started();
    scheduler.submit(testing::frame(2, 32, 32));

    scheduler.close();
    assert!(!scheduler.submit(testing::frame(3, 32, 32)));
    gate.release();
    scheduler.stop();

    // 第 2 帧从未开始执行
    assert!(!gate.started_again());
  }
}
