// 该文件是 Jianying （剪影） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use std::path::Path;

use image::{DynamicImage, RgbaImage};
use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{Render, draw::Draw},
  overlay::{OverlayError, OverlayScene},
  raster::MaskFile,
};

pub struct SaveImageFileOutput {
  path: String,
  draw: Draw,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("绘制配置错误: {0}")]
  OverlayError(#[from] OverlayError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(SaveImageFileOutput {
      path: uri.path().to_string(),
      draw: Draw::from_query(uri)?,
    })
  }
}

impl SaveImageFileOutput {
  pub fn path(&self) -> &Path {
    Path::new(&self.path)
  }

  fn ensure_parent(&self) -> Result<(), SaveImageFileError> {
    if let Some(parent) = self.path().parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    Ok(())
  }

  fn save_image(&self, image: RgbaImage) -> Result<(), SaveImageFileError> {
    self.ensure_parent()?;
    image.save(&self.path)?;
    warn!("保存图像到文件: {}", self.path);
    Ok(())
  }

  /// 在目标文件旁边保存编辑掩码，文件名为 `<stem>-mask.png`
  pub fn save_mask(&self, mask: &MaskFile) -> Result<(), SaveImageFileError> {
    self.ensure_parent()?;
    let stem = self
      .path()
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_else(|| "output".to_string());
    let path = self.path().with_file_name(format!("{}-mask.png", stem));
    std::fs::write(&path, mask.bytes())?;
    warn!("保存掩码到文件: {}", path.display());
    Ok(())
  }
}

impl<'s> Render<DynamicImage, OverlayScene<'s>> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, image: &DynamicImage, scene: &OverlayScene<'s>) -> Result<(), Self::Error> {
    let image = self.draw.draw_scene(image, scene);
    self.save_image(image)
  }
}

#[cfg(test)]
mod tests {
  use image::RgbImage;

  use super::*;
  use crate::selection::SelectionState;

  #[test]
  fn saves_plain_image_and_mask_next_to_each_other() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("nested").join("out.png");
    let url = Url::parse(&format!("image://{}", target.display())).unwrap();
    let output = SaveImageFileOutput::from_url(&url).unwrap();

    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(6, 4, image::Rgb([10, 20, 30])));
    let selection = SelectionState::default();
    let scene = OverlayScene {
      objects: &[],
      selection: &selection,
      active: true,
      image_size: (6, 4),
      revision: 0,
    };
    output.render_result(&image, &scene).unwrap();

    let saved = image::open(&target).unwrap().to_rgb8();
    assert_eq!(saved.dimensions(), (6, 4));
    assert_eq!(saved.get_pixel(0, 0).0, [10, 20, 30]);

    let mask = crate::composite::whole_image_mask(6, 4).unwrap();
    output.save_mask(&mask).unwrap();
    assert!(dir.path().join("nested").join("out-mask.png").exists());
  }

  #[test]
  fn rejects_other_schemes() {
    let url = Url::parse("folder:///tmp/out").unwrap();
    assert!(matches!(
      SaveImageFileOutput::from_url(&url),
      Err(SaveImageFileError::SchemeMismatch(_))
    ));
  }
}
