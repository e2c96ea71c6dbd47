// 该文件是 Huoyan （火眼） 项目的一部分。
// src/task.rs - 任务循环
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
  sync::mpsc::{self, Receiver},
  thread,
  time::Duration,
};

use anyhow::Context;
use tracing::{info, warn};

use crate::frame::Frame;

mod session;

pub use self::session::{
  DetectionSession, DiscardReason, FrameOutcome, FrameReport, SessionError,
};

pub trait Task<I>: Sized {
  type Error;
  fn run_task(self, input: I, session: &mut DetectionSession) -> Result<(), Self::Error>;
}

/// 推理单帧，输出跟踪结果
#[derive(Debug)]
pub struct OneShotTask {
  timeout: Duration,
}

impl Default for OneShotTask {
  fn default() -> Self {
    Self {
      timeout: Duration::from_secs(60),
    }
  }
}

impl OneShotTask {
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }
}

impl<I: Iterator<Item = Frame>> Task<I> for OneShotTask {
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, session: &mut DetectionSession) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    let index = frame.index;
    info!("输入帧获取成功，开始推理...");

    let now = std::time::Instant::now();
    session.submit(frame);
    let report = session
      .wait_next(self.timeout)
      .ok_or_else(|| anyhow::anyhow!("第 {} 帧推理超时", index))?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());

    match report.outcome {
      FrameOutcome::Tracked { .. } => {
        session.record()?;
        if let Some(snapshot) = session.latest() {
          println!("{}", serde_json::to_string_pretty(snapshot)?);
        }
        Ok(())
      }
      FrameOutcome::Failed(e) => Err(e).context(format!("第 {} 帧推理失败", index)),
      FrameOutcome::Discarded(reason) => Err(anyhow::anyhow!(
        "第 {} 帧结果被丢弃: {:?}",
        index,
        reason
      )),
    }
  }
}

/// 连续处理帧流，直到输入耗尽、达到帧数或收到中断信号
#[derive(Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  record_every: Option<usize>,
  lockstep: bool,
  drain_timeout: Duration,
}

impl Default for ContinuousTask {
  fn default() -> Self {
    Self {
      frame_number: None,
      record_every: None,
      lockstep: false,
      drain_timeout: Duration::from_secs(60),
    }
  }
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 每成功跟踪 N 帧记录一次
  pub fn with_record_every(mut self, record_every: Option<usize>) -> Self {
    self.record_every = record_every.filter(|&n| n > 0);
    self
  }

  /// 每帧等待推理完成后再读取下一帧，用于离线输入
  pub fn with_lockstep(mut self, lockstep: bool) -> Self {
    self.lockstep = lockstep;
    self
  }

  fn install_interrupt() -> anyhow::Result<Receiver<()>> {
    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })
    .context("无法设置 Ctrl-C 处理函数")?;
    Ok(rx)
  }

  fn handle(
    &self,
    reports: Vec<FrameReport>,
    session: &mut DetectionSession,
    tracked: &mut usize,
  ) {
    for report in reports {
      match &report.outcome {
        FrameOutcome::Tracked { detections, tracks } => {
          *tracked += 1;
          info!(
            "第 {} 帧: {} 个检测, {} 条轨迹",
            report.frame_index,
            detections.len(),
            tracks.len()
          );
          if self.record_every.is_some_and(|n| *tracked % n == 0)
            && let Err(e) = session.record()
          {
            warn!("记录第 {} 帧失败: {}", report.frame_index, e);
          }
        }
        FrameOutcome::Failed(e) => warn!("第 {} 帧跳过: {}", report.frame_index, e),
        FrameOutcome::Discarded(reason) => {
          info!("第 {} 帧结果被丢弃: {:?}", report.frame_index, reason)
        }
      }
    }
  }
}

impl<I: Iterator<Item = Frame>> Task<I> for ContinuousTask {
  type Error = anyhow::Error;

  fn run_task(self, input: I, session: &mut DetectionSession) -> Result<(), Self::Error> {
    info!("开始任务...");
    let interrupt = Self::install_interrupt()?;

    let mut submitted = 0;
    let mut tracked = 0;
    let mut interrupted = false;
    for frame in input {
      submitted += 1;
      session.submit(frame);
      let reports = if self.lockstep {
        session.wait_idle(self.drain_timeout)
      } else {
        session.drain()
      };
      self.handle(reports, session, &mut tracked);

      if self.frame_number.is_some_and(|n| submitted >= n) {
        info!("达到指定帧数 {}, 退出任务循环", submitted);
        break;
      }
      if interrupt.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        interrupted = true;
        break;
      }
    }

    if !interrupted {
      let reports = session.wait_idle(self.drain_timeout);
      self.handle(reports, session, &mut tracked);
    }
    info!(
      "任务完成，共提交 {} 帧, 跟踪 {} 帧, 丢弃 {} 帧",
      submitted,
      tracked,
      session.dropped_frames()
    );
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::{
    config::PipelineConfig,
    model::{ModelCatalog, ModelRegistry, RawOutput, catalog::EFFICIENTDET},
    testing::{self, ScriptedLoader},
  };

  fn session(loader: ScriptedLoader) -> DetectionSession {
    let registry = Arc::new(ModelRegistry::new(ModelCatalog::builtin(), loader));
    DetectionSession::new(&PipelineConfig::default(), registry).unwrap()
  }

  #[test]
  fn one_shot_records_single_frame() {
    let output = RawOutput {
      boxes: vec![[0.2, 0.2, 0.6, 0.6]],
      scores: vec![0.8],
      class_ids: vec![3.0],
      masks: None,
    };
    let mut session = session(ScriptedLoader::default().with_output(EFFICIENTDET, output));
    let frames = vec![testing::frame(0, 64, 64), testing::frame(1, 64, 64)];
    OneShotTask::default()
      .run_task(frames.into_iter(), &mut session)
      .unwrap();

    assert_eq!(session.recorder().len(), 1);
    assert_eq!(session.tracks().len(), 1);
    assert_eq!(session.tracks()[0].class_id, 3);
  }

  #[test]
  fn one_shot_without_frames_fails() {
    let mut session = session(ScriptedLoader::default());
    let result = OneShotTask::default().run_task(std::iter::empty::<Frame>(), &mut session);
    assert!(result.is_err());
  }

  #[test]
  fn one_shot_reports_inference_failure() {
    let mut session = session(ScriptedLoader::default().failing(EFFICIENTDET, 1));
    let frames = vec![testing::frame(0, 64, 64)];
    let result = OneShotTask::default().run_task(frames.into_iter(), &mut session);
    assert!(result.is_err());
    assert!(session.recorder().is_empty());
  }
}
