// 该文件是 Huoyan （火眼） 项目的一部分。
// src/model/registry.rs - 模型注册表
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
  any::Any,
  collections::HashMap,
  panic::{self, AssertUnwindSafe},
  sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
  time::Instant,
};

use tracing::{debug, error, info, warn};

use crate::{
  config::PipelineConfig,
  model::{LoadedModel, LoaderSet, ModelCatalog, ModelDescriptor, ModelError, ModelLoader},
};

type LoadResult = Result<Arc<LoadedModel>, ModelError>;

fn panic_message(payload: &(dyn Any + Send)) -> String {
  let detail = payload
    .downcast_ref::<&str>()
    .map(|s| s.to_string())
    .or_else(|| payload.downcast_ref::<String>().cloned())
    .unwrap_or_default();
  format!("加载器 panic: {}", detail)
}

/// 正在进行的加载，同一模型的并发选择共享同一次加载
struct PendingLoad {
  result: Mutex<Option<LoadResult>>,
  ready: Condvar,
}

impl PendingLoad {
  fn new() -> Self {
    Self {
      result: Mutex::new(None),
      ready: Condvar::new(),
    }
  }

  fn complete(&self, result: LoadResult) {
    let mut guard = self.result.lock().unwrap_or_else(PoisonError::into_inner);
    *guard = Some(result);
    self.ready.notify_all();
  }

  fn wait(&self) -> LoadResult {
    let mut guard = self.result.lock().unwrap_or_else(PoisonError::into_inner);
    loop {
      if let Some(result) = guard.as_ref() {
        return result.clone();
      }
      guard = self
        .ready
        .wait(guard)
        .unwrap_or_else(PoisonError::into_inner);
    }
  }
}

enum Slot {
  Loading(Arc<PendingLoad>),
  Ready(Arc<LoadedModel>),
}

#[derive(Default)]
struct RegistryState {
  slots: HashMap<String, Slot>,
  active: Option<String>,
  generation: u64,
}

impl RegistryState {
  fn activate(&mut self, id: &str) {
    if self.active.as_deref() != Some(id) {
      self.active = Some(id.to_string());
      self.generation += 1;
      info!("当前模型切换为 {} (代次 {})", id, self.generation);
    }
  }

  fn active_model(&self) -> Result<Arc<LoadedModel>, ModelError> {
    let id = self.active.as_deref().ok_or(ModelError::NoModelSelected)?;
    match self.slots.get(id) {
      Some(Slot::Ready(model)) => Ok(Arc::clone(model)),
      _ => Err(ModelError::NoModelSelected),
    }
  }
}

/// 驱逐操作的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eviction {
  /// 模型已从缓存中移除
  Released,
  /// 该模型是当前模型且推理正在进行，未做任何改动
  Deferred,
  /// 模型未缓存（包括仍在加载中）
  NotCached,
}

enum SelectAction {
  Wait(Arc<PendingLoad>),
  Load(Arc<PendingLoad>),
}

/// 模型注册表：按模型 id 缓存已加载的实例并维护当前模型
///
/// 加载开始、加载完成、选择与驱逐在同一把锁下互斥；
/// 实际的加载与推理都在锁外进行。
pub struct ModelRegistry {
  catalog: ModelCatalog,
  loader: Arc<dyn ModelLoader>,
  state: Mutex<RegistryState>,
}

impl ModelRegistry {
  pub fn new(catalog: ModelCatalog, loader: impl ModelLoader + 'static) -> Self {
    Self {
      catalog,
      loader: Arc::new(loader),
      state: Mutex::new(RegistryState::default()),
    }
  }

  /// 内置目录加上配置中的来源覆盖，使用内置加载器
  pub fn from_config(config: &PipelineConfig) -> Result<Self, ModelError> {
    let mut catalog = ModelCatalog::builtin();
    let mut overrides: Vec<_> = config.locators.iter().collect();
    overrides.sort();
    for (id, locator) in overrides {
      catalog = catalog.with_locator(id, locator)?;
    }
    let loaders = LoaderSet::with_builtin();
    for descriptor in catalog.ids().filter_map(|id| catalog.get(id)) {
      if !loaders.supports(&descriptor.source_locator) {
        warn!(
          "模型 {} 的定位符 {} 没有可用的加载器，选择时将失败",
          descriptor.id, descriptor.source_locator
        );
      }
    }
    Ok(Self::new(catalog, loaders))
  }

  pub fn catalog(&self) -> &ModelCatalog {
    &self.catalog
  }

  fn lock_state(&self) -> MutexGuard<'_, RegistryState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// 选择模型，必要时加载；加载失败不改变注册表状态
  pub fn select_model(&self, id: &str) -> Result<(), ModelError> {
    let descriptor = self
      .catalog
      .get(id)
      .ok_or_else(|| ModelError::UnknownModel(id.to_string()))?;

    loop {
      let action = {
        let mut state = self.lock_state();
        match state.slots.get(id) {
          Some(Slot::Ready(_)) => {
            state.activate(id);
            return Ok(());
          }
          Some(Slot::Loading(pending)) => SelectAction::Wait(Arc::clone(pending)),
          None => {
            let pending = Arc::new(PendingLoad::new());
            state
              .slots
              .insert(id.to_string(), Slot::Loading(Arc::clone(&pending)));
            SelectAction::Load(pending)
          }
        }
      };

      match action {
        SelectAction::Wait(pending) => {
          debug!("模型 {} 正在加载，等待加载完成", id);
          pending.wait()?;
        }
        SelectAction::Load(pending) => {
          let result = self.load(descriptor);
          {
            let mut state = self.lock_state();
            match &result {
              Ok(model) => {
                state
                  .slots
                  .insert(id.to_string(), Slot::Ready(Arc::clone(model)));
                state.activate(id);
              }
              Err(_) => {
                state.slots.remove(id);
              }
            }
          }
          pending.complete(result.clone());
          return result.map(|_| ());
        }
      }
    }
  }

  fn load(&self, descriptor: &ModelDescriptor) -> LoadResult {
    info!("加载模型 {}: {}", descriptor.id, descriptor.source_locator);
    let now = Instant::now();
    // 加载器 panic 时同样要移除加载槽并唤醒等待者
    let loaded = panic::catch_unwind(AssertUnwindSafe(|| self.loader.load(descriptor)))
      .unwrap_or_else(|payload| Err(panic_message(payload.as_ref()).into()));
    match loaded {
      Ok(model) => {
        info!("模型 {} 加载完成，耗时: {:.2?}", descriptor.id, now.elapsed());
        Ok(Arc::new(LoadedModel::new(descriptor.clone(), model)))
      }
      Err(e) => {
        error!("模型 {} 加载失败: {}", descriptor.id, e);
        Err(ModelError::load_failed(&descriptor.id, e))
      }
    }
  }

  pub fn active_model(&self) -> Result<Arc<LoadedModel>, ModelError> {
    self.lock_state().active_model()
  }

  /// 当前模型及其代次；代次在每次切换当前模型时递增
  pub fn active_with_generation(&self) -> Result<(Arc<LoadedModel>, u64), ModelError> {
    let state = self.lock_state();
    let model = state.active_model()?;
    Ok((model, state.generation))
  }

  pub fn active_id(&self) -> Option<String> {
    self.lock_state().active.clone()
  }

  pub fn generation(&self) -> u64 {
    self.lock_state().generation
  }

  pub fn is_loaded(&self, id: &str) -> bool {
    matches!(self.lock_state().slots.get(id), Some(Slot::Ready(_)))
  }

  pub fn loaded_ids(&self) -> Vec<String> {
    let state = self.lock_state();
    let mut ids: Vec<_> = state
      .slots
      .iter()
      .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
      .map(|(id, _)| id.clone())
      .collect();
    ids.sort();
    ids
  }

  /// 释放已缓存的模型
  pub fn evict(&self, id: &str) -> Eviction {
    let mut state = self.lock_state();
    let model = match state.slots.get(id) {
      Some(Slot::Ready(model)) => Arc::clone(model),
      Some(Slot::Loading(_)) => {
        warn!("模型 {} 仍在加载中，忽略驱逐请求", id);
        return Eviction::NotCached;
      }
      None => return Eviction::NotCached,
    };

    let is_active = state.active.as_deref() == Some(id);
    if is_active && model.is_busy() {
      warn!("模型 {} 正在推理，推迟驱逐", id);
      return Eviction::Deferred;
    }

    state.slots.remove(id);
    if is_active {
      state.active = None;
      state.generation += 1;
    }
    info!("模型 {} 已释放", id);
    Eviction::Released
  }
}
