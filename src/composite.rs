// 该文件是 Jianying （剪影） 项目的一部分。
// src/composite.rs - 编辑掩码合成
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

use image::{GrayImage, Luma};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  object::{ObjectId, SegmentObject},
  raster::{MASK_ON, MaskFile, Raster, RasterError},
};

#[derive(Error, Debug)]
pub enum CompositeError {
  #[error("没有可合成的掩码")]
  Empty,
  #[error("第 {index} 个掩码无法读取: {source}")]
  Unreadable { index: usize, source: RasterError },
  #[error("掩码尺寸不一致: 期望 {expected:?}, 第 {index} 个为 {actual:?}")]
  DimensionMismatch {
    index: usize,
    expected: (u32, u32),
    actual: (u32, u32),
  },
  #[error("对象 {0} 的掩码尚未对齐")]
  NotAligned(ObjectId),
  #[error("画布错误: {0}")]
  Canvas(#[from] RasterError),
}

/// 编辑范围：选中的对象，或者整张图
#[derive(Debug, Clone, Copy)]
pub enum EditTarget<'a> {
  Objects(&'a [&'a SegmentObject]),
  WholeImage,
}

/// 多个二值掩码取并集
///
/// 只有一个输入时原样返回，不重新编码。
pub fn composite_masks(masks: &[MaskFile]) -> Result<MaskFile, CompositeError> {
  match masks {
    [] => Err(CompositeError::Empty),
    [single] => Ok(single.clone()),
    _ => {
      let decoded = masks
        .iter()
        .enumerate()
        .map(|(index, file)| {
          file
            .decode_gray()
            .map_err(|source| CompositeError::Unreadable { index, source })
        })
        .collect::<Result<Vec<_>, _>>()?;

      let expected = decoded[0].dimensions();
      let mut canvas = GrayImage::allocate(expected.0, expected.1)?;
      for (index, mask) in decoded.iter().enumerate() {
        if mask.dimensions() != expected {
          return Err(CompositeError::DimensionMismatch {
            index,
            expected,
            actual: mask.dimensions(),
          });
        }
        canvas.blend_max(mask)?;
      }

      debug!("合成 {} 个掩码，尺寸 {:?}", masks.len(), canvas.dimensions());
      Ok(MaskFile::from_raster(&canvas)?)
    }
  }
}

/// 整图编辑用的全白掩码
pub fn whole_image_mask(width: u32, height: u32) -> Result<MaskFile, CompositeError> {
  let mut canvas = GrayImage::allocate(width, height)?;
  canvas.fill_solid(Luma([MASK_ON]));
  Ok(MaskFile::from_raster(&canvas)?)
}

/// 为一次编辑请求构造最终掩码
pub fn build_edit_mask(
  target: EditTarget<'_>,
  width: u32,
  height: u32,
) -> Result<MaskFile, CompositeError> {
  match target {
    EditTarget::WholeImage => {
      info!("整图编辑模式，生成 {}x{} 全白掩码", width, height);
      whole_image_mask(width, height)
    }
    EditTarget::Objects(objects) => {
      info!("对象编辑模式，合成 {} 个对象的掩码", objects.len());
      let mut files = Vec::with_capacity(objects.len());
      for (index, object) in objects.iter().enumerate() {
        let Some(mask) = object.mask.aligned() else {
          return Err(CompositeError::NotAligned(object.id.clone()));
        };
        if mask.dimensions() != (width, height) {
          return Err(CompositeError::DimensionMismatch {
            index,
            expected: (width, height),
            actual: mask.dimensions(),
          });
        }
        files.push(object.mask_file.clone());
      }
      composite_masks(&files)
    }
  }
}
