// 该文件是 Huoyan （火眼） 项目的一部分。
// src/testing.rs - 单元测试共用的模型与加载器
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
  sync::{
    Arc, Mutex,
    mpsc::{self, Receiver, Sender},
  },
  thread,
  time::Duration,
};

use chrono::{DateTime, TimeZone, Utc};
use image::RgbImage;

use crate::{
  BoxError,
  detection::{BBox, Detection},
  frame::{Frame, InputTensor},
  model::{DetectionModel, ModelDescriptor, ModelLoader, RawOutput},
};

pub fn timestamp(second: i64) -> DateTime<Utc> {
  Utc.timestamp_opt(1_700_000_000 + second, 0).unwrap()
}

pub fn frame(index: u64, width: u32, height: u32) -> Frame {
  Frame::with_timestamp(RgbImage::new(width, height), index, timestamp(index as i64))
}

pub fn detection(x: f32, y: f32, w: f32, h: f32, class_id: u32) -> Detection {
  Detection::new(BBox::new(x, y, w, h), class_id, 0.9).unwrap()
}

/// 始终返回同一组输出的模型
pub struct StaticModel {
  output: RawOutput,
}

impl StaticModel {
  pub fn new(output: RawOutput) -> Self {
    Self { output }
  }
}

impl DetectionModel for StaticModel {
  fn execute(&self, _input: &InputTensor) -> Result<RawOutput, BoxError> {
    Ok(self.output.clone())
  }
}

/// 在执行中阻塞，直到测试放行
pub struct GateModel {
  started: Mutex<Sender<()>>,
  release: Mutex<Receiver<()>>,
  output: RawOutput,
}

pub struct Gate {
  started: Receiver<()>,
  release: Sender<()>,
}

impl GateModel {
  pub fn new() -> (Self, Gate) {
    Self::with_output(RawOutput::default())
  }

  pub fn with_output(output: RawOutput) -> (Self, Gate) {
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    (
      Self {
        started: Mutex::new(started_tx),
        release: Mutex::new(release_rx),
        output,
      },
      Gate {
        started: started_rx,
        release: release_tx,
      },
    )
  }
}

impl DetectionModel for GateModel {
  fn execute(&self, _input: &InputTensor) -> Result<RawOutput, BoxError> {
    let _ = self.started.lock().unwrap().send(());
    let _ = self.release.lock().unwrap().recv();
    Ok(self.output.clone())
  }
}

impl Gate {
  pub fn wait_started(&self) {
    self
      .started
      .recv_timeout(Duration::from_secs(5))
      .expect("模型未开始执行");
  }

  pub fn release(&self) {
    let _ = self.release.send(());
  }

  /// 上次 `wait_started` 之后是否又开始过执行
  pub fn started_again(&self) -> bool {
    self.started.try_recv().is_ok()
  }
}

#[derive(Default)]
struct LoaderScript {
  loads: HashMap<String, usize>,
  failures: HashMap<String, usize>,
  panics: HashMap<String, usize>,
  models: HashMap<String, Box<dyn DetectionModel>>,
  outputs: HashMap<String, RawOutput>,
}

/// 记录加载次数、可注入失败的加载器
#[derive(Clone, Default)]
pub struct ScriptedLoader {
  script: Arc<Mutex<LoaderScript>>,
  delay: Option<Duration>,
}

impl ScriptedLoader {
  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }

  /// 接下来 `times` 次加载 `id` 时失败
  pub fn failing(self, id: &str, times: usize) -> Self {
    self
      .script
      .lock()
      .unwrap()
      .failures
      .insert(id.to_string(), times);
    self
  }

  /// 接下来 `times` 次加载 `id` 时 panic
  pub fn panicking(self, id: &str, times: usize) -> Self {
    self
      .script
      .lock()
      .unwrap()
      .panics
      .insert(id.to_string(), times);
    self
  }

  /// 下一次加载 `id` 时交付该模型实例
  pub fn with_model(self, id: &str, model: impl DetectionModel + 'static) -> Self {
    self
      .script
      .lock()
      .unwrap()
      .models
      .insert(id.to_string(), Box::new(model));
    self
  }

  pub fn with_output(self, id: &str, output: RawOutput) -> Self {
    self
      .script
      .lock()
      .unwrap()
      .outputs
      .insert(id.to_string(), output);
    self
  }

  pub fn loads(&self, id: &str) -> usize {
    self
      .script
      .lock()
      .unwrap()
      .loads
      .get(id)
      .copied()
      .unwrap_or(0)
  }
}

impl ModelLoader for ScriptedLoader {
  fn load(&self, descriptor: &ModelDescriptor) -> Result<Box<dyn DetectionModel>, BoxError> {
    if let Some(delay) = self.delay {
      thread::sleep(delay);
    }
    let mut script = self.script.lock().unwrap();
    *script.loads.entry(descriptor.id.clone()).or_default() += 1;

    if let Some(remaining) = script.panics.get_mut(&descriptor.id)
      && *remaining > 0
    {
      *remaining -= 1;
      drop(script);
      panic!("运行时崩溃: {}", descriptor.id);
    }

    if let Some(remaining) = script.failures.get_mut(&descriptor.id)
      && *remaining > 0
    {
      *remaining -= 1;
      return Err(format!("无法获取 {}", descriptor.source_locator).into());
    }

    if let Some(model) = script.models.remove(&descriptor.id) {
      return Ok(model);
    }
    let output = script
      .outputs
      .get(&descriptor.id)
      .cloned()
      .unwrap_or_default();
    Ok(Box::new(StaticModel::new(output)))
  }
}
