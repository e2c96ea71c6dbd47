// 该文件是 Huoyan （火眼） 项目的一部分。
// src/inference/preprocess.rs - 等比缩放与归一化预处理
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

use image::{RgbImage, imageops::FilterType};

use crate::{frame::InputTensor, model::Normalization};

/// 等比缩放并居中填充的几何参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
  pub scale: f32,
  pub pad_x: u32,
  pub pad_y: u32,
  pub resized_width: u32,
  pub resized_height: u32,
  pub input_width: u32,
  pub input_height: u32,
  pub frame_width: u32,
  pub frame_height: u32,
}

impl Letterbox {
  pub fn new(frame_size: (u32, u32), input_size: (u32, u32)) -> Self {
    let (frame_width, frame_height) = frame_size;
    let (input_width, input_height) = input_size;
    let scale = (input_width as f32 / frame_width as f32)
      .min(input_height as f32 / frame_height as f32);

    let resized_width = ((frame_width as f32 * scale).round() as u32).clamp(1, input_width);
    let resized_height = ((frame_height as f32 * scale).round() as u32).clamp(1, input_height);

    Self {
      scale,
      pad_x: (input_width - resized_width) / 2,
      pad_y: (input_height - resized_height) / 2,
      resized_width,
      resized_height,
      input_width,
      input_height,
      frame_width,
      frame_height,
    }
  }

  /// 模型输入像素坐标映射回原始帧像素坐标
  pub fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
    (
      (x - self.pad_x as f32) / self.scale,
      (y - self.pad_y as f32) / self.scale,
    )
  }
}

/// 缩放到模型输入尺寸并归一化为 NHWC 张量
pub fn letterbox(
  image: &RgbImage,
  input_size: (u32, u32),
  normalization: &Normalization,
) -> (InputTensor, Letterbox) {
  let geometry = Letterbox::new(image.dimensions(), input_size);
  let resized = image::imageops::resize(
    image,
    geometry.resized_width,
    geometry.resized_height,
    FilterType::Triangle,
  );

  let mut tensor = InputTensor::zeros(geometry.input_width, geometry.input_height);
  let width = tensor.width();
  let channels = tensor.channels();
  let slice = tensor.as_mut();

  for (x, y, pixel) in resized.enumerate_pixels() {
    let row = (y + geometry.pad_y) as usize;
    let col = (x + geometry.pad_x) as usize;
    let base = (row * width + col) * channels;
    for c in 0..channels {
      slice[base + c] = normalization.apply(pixel[c], c);
    }
  }

  (tensor, geometry)
}
