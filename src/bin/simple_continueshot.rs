// 该文件是 Huoyan （火眼） 项目的一部分。
// src/bin/simple_continueshot.rs - 连续检测与跟踪
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

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use url::Url;

use huoyan::{
  FromUrl,
  config::{PipelineConfig, parse_locator},
  input::InputWrapper,
  model::ModelRegistry,
  recorder::{JsonFileStore, SessionRecorder},
  task::{ContinuousTask, DetectionSession, Task},
};
use tracing::info;

/// Huoyan 连续检测参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 配置文件 (JSON)
  #[arg(long, value_name = "CONFIG")]
  pub config: Option<PathBuf>,
  /// 使用的模型 id
  #[arg(long, value_name = "MODEL")]
  pub model: Option<String>,
  /// 替换模型来源，格式为 id=url，可重复；
  /// 支持 replay://，启用 onnx_model 特性后支持 file:// 与 http(s):// 的 .onnx 文件
  #[arg(long = "locator", value_name = "ID=URL", value_parser = parse_locator)]
  pub locators: Vec<(String, String)>,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 历史记录目录
  #[arg(long, value_name = "HISTORY")]
  pub history: Option<Url>,
  /// 置信度阈值
  #[arg(long, value_name = "THRESHOLD")]
  pub confidence_threshold: Option<f32>,

  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
  /// 每跟踪 N 帧记录一次
  #[arg(long, value_name = "N")]
  pub record_every: Option<usize>,
  /// 每帧等待推理完成，不丢帧
  #[arg(long)]
  pub lockstep: bool,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("输入来源: {}", args.input);
  let config = PipelineConfig::load(args.config.as_deref())?.with_overrides(
    args.model,
    args.locators,
    args.confidence_threshold,
  )?;

  let input = InputWrapper::from_url(&args.input)?;
  let registry = Arc::new(ModelRegistry::from_config(&config)?);
  let mut session = DetectionSession::new(&config, registry)?;
  if let Some(history) = &args.history {
    info!("历史记录目录: {}", history);
    let store = JsonFileStore::from_url(history)?;
    session = session.with_recorder(SessionRecorder::restore(config.recorder.clone(), store)?);
  }

  ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .with_record_every(args.record_every)
    .with_lockstep(args.lockstep)
    .run_task(input, &mut session)?;

  let recorder = session.stop();
  info!("共记录 {} 条历史", recorder.len());

  Ok(())
}
