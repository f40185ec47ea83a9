// 该文件是 Jianying （剪影） 项目的一部分。
// src/align.rs - 掩码对齐到原图像素网格
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

use image::{DynamicImage, GrayImage, imageops::FilterType};
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
  geometry::PixelRect,
  object::{ObjectId, ObjectMask, SegmentObject},
  raster::{MASK_THRESHOLD, MaskFile, Raster, RasterError, binarize_source},
};

#[derive(Error, Debug)]
pub enum AlignError {
  #[error("无法获取原图尺寸: {0}x{1}")]
  DimensionUnavailable(u32, u32),
  #[error("对象 {id} 对齐失败: {reason}")]
  ObjectFailed { id: ObjectId, reason: String },
}

impl AlignError {
  fn object(id: &ObjectId, reason: impl Into<String>) -> Self {
    AlignError::ObjectFailed {
      id: id.clone(),
      reason: reason.into(),
    }
  }
}

/// 把每个对象的边界框局部掩码对齐到原图尺寸
///
/// 所有对象并行处理，任意一个失败整批失败；边界框坐标保持不变。
pub fn align_masks(
  objects: Vec<SegmentObject>,
  original: &DynamicImage,
) -> Result<Vec<SegmentObject>, AlignError> {
  align_masks_to(objects, original.width(), original.height())
}

pub fn align_masks_to(
  objects: Vec<SegmentObject>,
  width: u32,
  height: u32,
) -> Result<Vec<SegmentObject>, AlignError> {
  if width == 0 || height == 0 {
    error!("原图尺寸不可用: {}x{}", width, height);
    return Err(AlignError::DimensionUnavailable(width, height));
  }

  info!("对齐 {} 个对象的掩码到 {}x{}", objects.len(), width, height);
  objects
    .into_par_iter()
    .map(|object| align_one(object, width, height))
    .collect()
}

fn align_one(mut object: SegmentObject, width: u32, height: u32) -> Result<SegmentObject, AlignError> {
  let rect = object.bbox.to_pixels(width, height);
  if !rect.fits_within(width, height) {
    return Err(AlignError::object(
      &object.id,
      format!("边界框 {:?} 超出画布 {}x{}", rect, width, height),
    ));
  }

  let canvas = match &object.mask {
    ObjectMask::BoxLocal(image) => {
      let source = binarize_source(image);
      if source.width() == 0 || source.height() == 0 {
        return Err(AlignError::object(&object.id, "掩码为空"));
      }
      render_onto_canvas(&source, rect, width, height)
    }
    // 已对齐的掩码覆盖整张图，只需要整体缩放到新尺寸
    ObjectMask::Aligned(mask) if mask.dimensions() == (width, height) => Ok(mask.clone()),
    ObjectMask::Aligned(mask) => rescale_canvas(mask, width, height),
  }
  .map_err(|e| AlignError::object(&object.id, e.to_string()))?;

  let mask_file =
    MaskFile::from_raster(&canvas).map_err(|e| AlignError::object(&object.id, e.to_string()))?;

  debug!("对象 {} 对齐到 {:?}", object.id, rect);
  object.mask = ObjectMask::Aligned(canvas);
  object.mask_file = mask_file;
  Ok(object)
}

/// 先在框内缓冲区里缩放并二值化，再无插值地贴到黑色全尺寸画布上
fn render_onto_canvas(
  source: &GrayImage,
  rect: PixelRect,
  width: u32,
  height: u32,
) -> Result<GrayImage, RasterError> {
  let mut local = GrayImage::allocate(rect.width, rect.height)?;
  local.draw_scaled(
    source,
    PixelRect {
      x: 0,
      y: 0,
      width: rect.width,
      height: rect.height,
    },
    FilterType::Triangle,
  );
  local.threshold_to_binary(MASK_THRESHOLD);

  let mut canvas = GrayImage::allocate(width, height)?;
  canvas.draw_scaled(&local, rect, FilterType::Nearest);
  Ok(canvas)
}

fn rescale_canvas(mask: &GrayImage, width: u32, height: u32) -> Result<GrayImage, RasterError> {
  let mut canvas = GrayImage::allocate(width, height)?;
  canvas.draw_scaled(
    mask,
    PixelRect {
      x: 0,
      y: 0,
      width,
      height,
    },
    FilterType::Nearest,
  );
  canvas.threshold_to_binary(MASK_THRESHOLD);
  Ok(canvas)
}
