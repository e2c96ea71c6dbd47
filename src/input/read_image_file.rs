// 该文件是 Huoyan （火眼） 项目的一部分。
// src/input/read_image_file.rs - 从图像文件读取帧
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
  collections::VecDeque,
  path::{Path, PathBuf},
};

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame, url_to_path};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("目录中没有图像文件: {0}")]
  EmptyFolder(PathBuf),
  #[error("路径不是合法的 UTF-8: {0}")]
  InvalidPath(#[from] std::string::FromUtf8Error),
}

const FOLDER_SCHEME: &str = "folder";
const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// 图像文件帧来源
///
/// - `image://<path>` 读取单张图像
/// - `folder://<dir>` 按文件名顺序读取目录中的所有图像
///
/// 无法解码的文件会被跳过。
pub struct ImageFileInput {
  paths: VecDeque<PathBuf>,
  next_index: u64,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let path = url_to_path(url)?;
    if url.scheme() == Self::SCHEME {
      std::fs::metadata(&path)?;
      return Ok(Self::with_paths(vec![path]));
    }
    if url.scheme() == FOLDER_SCHEME {
      return Self::from_folder(&path);
    }

    error!(
      "URI 方案不匹配: 期望 '{}' 或 '{}', 实际为 '{}'",
      Self::SCHEME,
      FOLDER_SCHEME,
      url.scheme()
    );
    Err(ImageFileInputError::SchemeMismatch)
  }
}

impl ImageFileInput {
  pub fn accepts(scheme: &str) -> bool {
    scheme == Self::SCHEME || scheme == FOLDER_SCHEME
  }

  pub fn with_paths(paths: Vec<PathBuf>) -> Self {
    Self {
      paths: paths.into(),
      next_index: 0,
    }
  }

  pub fn from_folder(directory: &Path) -> Result<Self, ImageFileInputError> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(directory)? {
      let path = entry?.path();
      let is_image = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
      if path.is_file() && is_image {
        paths.push(path);
      }
    }
    if paths.is_empty() {
      return Err(ImageFileInputError::EmptyFolder(directory.to_path_buf()));
    }
    paths.sort();
    info!("{} 中有 {} 张图像", directory.display(), paths.len());
    Ok(Self::with_paths(paths))
  }

  /// 尚未读取的文件数
  pub fn remaining(&self) -> usize {
    self.paths.len()
  }

  fn read(path: &Path) -> Result<RgbImage, ImageFileInputError> {
    let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    Ok(image.into_rgb8())
  }
}

impl Iterator for ImageFileInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    while let Some(path) = self.paths.pop_front() {
      match Self::read(&path) {
        Ok(image) => {
          let frame = Frame::new(image, self.next_index);
          self.next_index += 1;
          return Some(frame);
        }
        Err(e) => warn!("跳过 {}: {}", path.display(), e),
      }
    }
    None
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    (0, Some(self.paths.len()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn write_image(path: &Path, width: u32, height: u32) {
    RgbImage::from_pixel(width, height, image::Rgb([10, 20, 30]))
      .save(path)
      .unwrap();
  }

  fn url(scheme: &str, path: &Path) -> Url {
    Url::parse(&format!("{}://{}", scheme, path.display())).unwrap()
  }

  #[test]
  fn single_image_yields_one_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.png");
    write_image(&path, 8, 6);

    let mut input = ImageFileInput::from_url(&url("image", &path)).unwrap();
    let frame = input.next().unwrap();
    assert_eq!((frame.width(), frame.height()), (8, 6));
    assert_eq!(frame.index, 0);
    assert!(input.next().is_none());
  }

  #[test]
  fn missing_image_fails_early() {
    let dir = tempfile::tempdir().unwrap();
    let result = ImageFileInput::from_url(&url("image", &dir.path().join("none.png")));
    assert!(matches!(result, Err(ImageFileInputError::IoError(_))));
  }

  #[test]
  fn folder_is_read_in_name_order_skipping_bad_files() {
    let dir = tempfile::tempdir().unwrap();
    write_image(&dir.path().join("b.png"), 4, 4);
    write_image(&dir.path().join("a.png"), 2, 2);
    std::fs::write(dir.path().join("c.png"), b"not an image").unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

    let input = ImageFileInput::from_url(&url("folder", dir.path())).unwrap();
    assert_eq!(input.remaining(), 3);
    let frames: Vec<_> = input.collect();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].width(), 2);
    assert_eq!(frames[1].width(), 4);
    assert_eq!(frames[1].index, 1);
  }

  #[test]
  fn paths_with_spaces_and_non_ascii_names_are_decoded() {
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("相机 1");
    std::fs::create_dir(&folder).unwrap();
    write_image(&folder.join("第 1 帧.png"), 3, 5);

    let single = Url::from_file_path(folder.join("第 1 帧.png")).unwrap();
    let single = Url::parse(&single.as_str().replacen("file", "image", 1)).unwrap();
    assert!(single.path().contains("%20"));
    let frame = ImageFileInput::from_url(&single).unwrap().next().unwrap();
    assert_eq!((frame.width(), frame.height()), (3, 5));

    let listed = Url::from_directory_path(&folder).unwrap();
    let listed = Url::parse(&listed.as_str().replacen("file", "folder", 1)).unwrap();
    assert_eq!(ImageFileInput::from_url(&listed).unwrap().remaining(), 1);
  }

  #[test]
  fn empty_folder_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url("folder", dir.path())),
      Err(ImageFileInputError::EmptyFolder(_))
    ));
  }
}
