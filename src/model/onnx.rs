// 该文件是 Huoyan （火眼） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 模型后端
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
  io::Read,
  sync::{Mutex, PoisonError},
};

use ort::{
  session::{Session, builder::GraphOptimizationLevel},
  value::Tensor,
};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  BoxError,
  frame::InputTensor,
  model::{
    DetectionModel, ModelDescriptor, ModelFamily, ModelLoader, RawOutput,
    loader::LoaderError,
    tensors::{self, OutputTensor},
  },
  url_to_path,
};

/// 可由 [`OnnxLoader`] 获取模型文件的定位符方案
pub const ONNX_SCHEMES: [&str; 3] = ["file", "http", "https"];

#[derive(Error, Debug)]
pub enum OnnxError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型下载失败: {0}")]
  Download(String),
  #[error("ONNX Runtime 错误: {0}")]
  Runtime(String),
  #[error("模型没有输入")]
  NoInput,
  #[error("路径不是合法的 UTF-8: {0}")]
  InvalidPath(#[from] std::string::FromUtf8Error),
  #[error("不支持的定位符方案: {0}")]
  UnsupportedScheme(String),
}

fn runtime(err: impl std::fmt::Display) -> OnnxError {
  OnnxError::Runtime(err.to_string())
}

/// ONNX 格式的检测模型
///
/// YOLO 以 NCHW 输入，其余模型族以 NHWC 输入；输出按模型族整理为 [`RawOutput`]。
pub struct OnnxModel {
  session: Mutex<Session>,
  input_name: String,
  output_names: Vec<String>,
  family: ModelFamily,
  input_size: (u32, u32),
}

impl OnnxModel {
  pub fn from_bytes(descriptor: &ModelDescriptor, model_data: &[u8]) -> Result<Self, OnnxError> {
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );
    info!("创建 ONNX Runtime 会话: {}", descriptor.id);
    let session = Session::builder()
      .map_err(runtime)?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(runtime)?
      .commit_from_memory(model_data)
      .map_err(runtime)?;

    let input_name = session
      .inputs
      .first()
      .map(|input| input.name.clone())
      .ok_or(OnnxError::NoInput)?;
    let output_names: Vec<String> = session
      .outputs
      .iter()
      .map(|output| output.name.clone())
      .collect();
    info!("模型输入: {}, 输出: {:?}", input_name, output_names);

    Ok(Self {
      session: Mutex::new(session),
      input_name,
      output_names,
      family: descriptor.family,
      input_size: descriptor.input_size,
    })
  }
}

impl DetectionModel for OnnxModel {
  fn execute(&self, input: &InputTensor) -> Result<RawOutput, BoxError> {
    let [n, h, w, c] = input.shape();
    let (shape, data) = if self.family.channels_first() {
      ([n, c, h, w], input.to_nchw())
    } else {
      ([n, h, w, c], input.as_nhwc().to_vec())
    };
    let shape: Vec<i64> = shape.iter().map(|&d| d as i64).collect();
    let tensor = Tensor::from_array((shape, data)).map_err(runtime)?;

    let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
    let outputs = session
      .run(ort::inputs![self.input_name.as_str() => tensor])
      .map_err(runtime)?;

    let mut collected = Vec::with_capacity(self.output_names.len());
    for name in &self.output_names {
      let Some(value) = outputs.get(name.as_str()) else {
        continue;
      };
      match value.try_extract_tensor::<f32>() {
        Ok((shape, data)) => collected.push(OutputTensor::new(
          name.as_str(),
          shape.iter().map(|&d| d.max(0) as usize).collect(),
          data.to_vec(),
        )),
        Err(e) => debug!("忽略非 f32 输出 {}: {}", name, e),
      }
    }
    drop(outputs);

    Ok(tensors::raw_output(self.family, self.input_size, &collected)?)
  }
}

/// 从本地文件或 HTTP(S) 获取 `.onnx` 模型并创建会话
#[derive(Debug, Default, Clone, Copy)]
pub struct OnnxLoader;

impl OnnxLoader {
  pub fn fetch(url: &Url) -> Result<Vec<u8>, OnnxError> {
    match url.scheme() {
      "file" => {
        let path = url_to_path(url)?;
        info!("加载模型文件: {}", path.display());
        Ok(std::fs::read(path)?)
      }
      "http" | "https" => {
        info!("下载模型: {}", url);
        let response = ureq::get(url.as_str())
          .call()
          .map_err(|e| OnnxError::Download(e.to_string()))?;
        let mut model_data = Vec::new();
        response.into_reader().read_to_end(&mut model_data)?;
        Ok(model_data)
      }
      other => Err(OnnxError::UnsupportedScheme(other.to_string())),
    }
  }
}

impl ModelLoader for OnnxLoader {
  fn load(&self, descriptor: &ModelDescriptor) -> Result<Box<dyn DetectionModel>, BoxError> {
    let url = Url::parse(&descriptor.source_locator).map_err(LoaderError::from)?;
    let model_data = Self::fetch(&url)?;
    Ok(Box::new(OnnxModel::from_bytes(descriptor, &model_data)?))
  }
}
