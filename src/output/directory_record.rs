// 该文件是 Jianying （剪影） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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
  path::{Path, PathBuf},
  sync::atomic::{AtomicU16, Ordering},
};

use chrono::{Datelike, Utc};
use image::DynamicImage;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{
    Render,
    draw::{Draw, Record},
  },
  overlay::{OverlayError, OverlayScene},
  raster::{MaskFile, RasterError},
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("掩码编码错误: {0}")]
  RasterError(#[from] RasterError),
  #[error("绘制配置错误: {0}")]
  OverlayError(#[from] OverlayError),
}

/// 按日期分目录保存预览图
///
/// `folder://<dir>?masks&record&always`：`masks` 同时保存每个对象的对齐掩码，
/// `record` 写出对象记录，`always` 在没有对象时也保存。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: Draw,
  record: Option<Record>,
  masks: bool,
  always: bool,
  frame_counter: AtomicU16,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let has_flag = |flag: &str| uri.query_pairs().any(|(k, _)| k == flag);

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(uri.path()),
      draw: Draw::from_query(uri)?,
      record: has_flag("record").then_some(Record),
      masks: has_flag("masks"),
      always: has_flag("always"),
      frame_counter: AtomicU16::new(0),
    })
  }
}

impl DirectoryRecordOutput {
  fn frame_id(&self) -> u16 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  fn frame_path(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    if !directory.exists() {
      std::fs::create_dir_all(&directory)?;
    }

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }

  fn save_masks(&self, path: &Path, scene: &OverlayScene<'_>) -> Result<(), DirectoryRecordOutputError> {
    let stem = path
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_default();
    for object in scene.objects {
      let Some(mask) = object.mask.aligned() else {
        warn!("对象 {} 尚未对齐，跳过掩码保存", object.id);
        continue;
      };
      let file = MaskFile::from_raster(mask)?;
      std::fs::write(path.with_file_name(format!("{}-{}.png", stem, object.id)), file.bytes())?;
    }
    Ok(())
  }
}

impl<'s> Render<DynamicImage, OverlayScene<'s>> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, image: &DynamicImage, scene: &OverlayScene<'s>) -> Result<(), Self::Error> {
    if !self.always && scene.objects.is_empty() {
      return Ok(());
    }

    let path = self.frame_path()?;
    self.draw.draw_scene(image, scene).save(&path)?;
    if self.masks {
      self.save_masks(&path, scene)?;
    }
    if let Some(record) = &self.record {
      record.record(scene.objects, &path)?;
    }
    info!("记录 {} 个对象到 {}", scene.objects.len(), path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use image::RgbImage;
  use url::Url;

  use super::*;
  use crate::{
    align::align_masks_to,
    object::{objects_from_detections, tests::white_mask_url},
    parser::Detection,
    selection::SelectionState,
  };

  fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
      for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
          stack.push(path);
        } else {
          found.push(path);
        }
      }
    }
    found.sort();
    found
  }

  #[test]
  fn writes_overlay_masks_and_record() {
    let dir = tempfile::tempdir().unwrap();
    let url = Url::parse(&format!("folder://{}?masks&record", dir.path().display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();

    let detections = vec![Detection {
      box_2d: [0.0, 0.0, 500.0, 500.0],
      mask: white_mask_url(4, 4),
      label: Some("cup".into()),
    }];
    let objects = align_masks_to(objects_from_detections(detections), 8, 8).unwrap();
    let selection = SelectionState::default();
    let scene = OverlayScene {
      objects: &objects,
      selection: &selection,
      active: true,
      image_size: (8, 8),
      revision: 1,
    };
    let image = DynamicImage::ImageRgb8(RgbImage::new(8, 8));
    output.render_result(&image, &scene).unwrap();

    let files = files_under(dir.path());
    assert_eq!(files.len(), 3);
    let record = files.iter().find(|p| p.extension().is_some_and(|e| e == "txt")).unwrap();
    assert_eq!(
      std::fs::read_to_string(record).unwrap(),
      "obj_0, cup, 0.0, 0.0, 500.0, 500.0"
    );
    assert!(files.iter().any(|p| p.to_string_lossy().ends_with("-obj_0.png")));
  }

  #[test]
  fn empty_scenes_are_skipped_unless_always() {
    let dir = tempfile::tempdir().unwrap();
    let selection = SelectionState::default();
    let scene = OverlayScene {
      objects: &[],
      selection: &selection,
      active: true,
      image_size: (2, 2),
      revision: 0,
    };
    let image = DynamicImage::ImageRgb8(RgbImage::new(2, 2));

    let url = Url::parse(&format!("folder://{}", dir.path().display())).unwrap();
    DirectoryRecordOutput::from_url(&url)
      .unwrap()
      .render_result(&image, &scene)
      .unwrap();
    assert!(files_under(dir.path()).is_empty());

    let url = Url::parse(&format!("folder://{}?always", dir.path().display())).unwrap();
    DirectoryRecordOutput::from_url(&url)
      .unwrap()
      .render_result(&image, &scene)
      .unwrap();
    assert_eq!(files_under(dir.path()).len(), 1);
  }
}
