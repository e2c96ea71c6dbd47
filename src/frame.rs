// 该文件是 Huoyan （火眼） 项目的一部分。
// src/frame.rs - 视频帧与 NHWC 输入张量定义
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
use image::RgbImage;

const RGB_CHANNELS: usize = 3;

/// 帧数据
#[derive(Debug, Clone)]
pub struct Frame {
  /// RGB 图像数据
  pub image: RgbImage,
  /// 帧索引（到达顺序）
  pub index: u64,
  /// 采集时间
  pub timestamp: DateTime<Utc>,
}

impl Frame {
  pub fn new(image: RgbImage, index: u64) -> Self {
    Self::with_timestamp(image, index, Utc::now())
  }

  pub fn with_timestamp(image: RgbImage, index: u64, timestamp: DateTime<Utc>) -> Self {
    Self {
      image,
      index,
      timestamp,
    }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }
}

/// 模型输入张量，NHWC 排列（N = 1）的 RGB 浮点数据
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
  width: u32,
  height: u32,
  data: Box<[f32]>,
}

impl InputTensor {
  pub fn zeros(width: u32, height: u32) -> Self {
    let size = RGB_CHANNELS * (width as usize) * (height as usize);
    Self {
      width,
      height,
      data: vec![0f32; size].into_boxed_slice(),
    }
  }

  pub fn width(&self) -> usize {
    self.width as usize
  }

  pub fn height(&self) -> usize {
    self.height as usize
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  /// 张量形状 [N, H, W, C]
  pub fn shape(&self) -> [usize; 4] {
    [1, self.height(), self.width(), self.channels()]
  }

  pub fn as_nhwc(&self) -> &[f32] {
    &self.data
  }

  /// 按 [N, C, H, W] 排列复制数据，供通道优先的模型使用
  pub fn to_nchw(&self) -> Vec<f32> {
    let plane = self.width() * self.height();
    let mut data = vec![0f32; plane * RGB_CHANNELS];
    for (pixel, values) in self.data.chunks_exact(RGB_CHANNELS).enumerate() {
      for (c, &value) in values.iter().enumerate() {
        data[c * plane + pixel] = value;
      }
    }
    data
  }

  pub fn get(&self, x: u32, y: u32, c: usize) -> Option<f32> {
    if x >= self.width || y >= self.height || c >= RGB_CHANNELS {
      return None;
    }
    let index = (y as usize) * self.width() * RGB_CHANNELS + (x as usize) * RGB_CHANNELS + c;
    self.data.get(index).copied()
  }
}

impl AsMut<[f32]> for InputTensor {
  fn as_mut(&mut self) -> &mut [f32] {
    &mut self.data
  }
}
