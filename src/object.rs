// 该文件是 Jianying （剪影） 项目的一部分。
// src/object.rs - 分割对象定义
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

use std::fmt;

use image::{DynamicImage, GrayImage};
use tracing::{debug, warn};

use crate::{
  geometry::NormalizedBox,
  parser::Detection,
  raster::{MaskFile, decode_data_url, decode_image},
};

/// 对象标识，同一次分割内唯一，形如 `obj_<n>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(String);

impl ObjectId {
  pub fn from_ordinal(ordinal: usize) -> Self {
    ObjectId(format!("obj_{}", ordinal))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for ObjectId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for ObjectId {
  fn from(value: &str) -> Self {
    ObjectId(value.to_string())
  }
}

/// 掩码栅格：对齐前只覆盖边界框，且分辨率是压缩后的输入图；对齐后覆盖整张原图
#[derive(Debug, Clone)]
pub enum ObjectMask {
  BoxLocal(DynamicImage),
  Aligned(GrayImage),
}

impl ObjectMask {
  pub fn dimensions(&self) -> (u32, u32) {
    match self {
      ObjectMask::BoxLocal(image) => (image.width(), image.height()),
      ObjectMask::Aligned(mask) => mask.dimensions(),
    }
  }

  pub fn aligned(&self) -> Option<&GrayImage> {
    match self {
      ObjectMask::Aligned(mask) => Some(mask),
      ObjectMask::BoxLocal(_) => None,
    }
  }
}

/// 经过校验的分割对象，是选择与编辑的基本单位
#[derive(Debug, Clone)]
pub struct SegmentObject {
  pub id: ObjectId,
  pub ordinal: usize,
  pub bbox: NormalizedBox,
  pub mask: ObjectMask,
  pub mask_file: MaskFile,
  pub label: Option<String>,
}

impl SegmentObject {
  /// 面向用户的编号，从 1 开始
  pub fn display_number(&self) -> usize {
    self.ordinal + 1
  }

  pub fn is_aligned(&self) -> bool {
    matches!(self.mask, ObjectMask::Aligned(_))
  }

  /// 标签文本，没有标签时退回到编号
  pub fn display_label(&self) -> String {
    match &self.label {
      Some(label) if !label.trim().is_empty() => label.clone(),
      _ => format!("对象 {}", self.display_number()),
    }
  }
}

/// 把解析得到的候选项转换为分割对象
///
/// 边界框不合法或掩码无法解码的条目会被跳过，编号只分配给保留下来的条目。
pub fn objects_from_detections(detections: Vec<Detection>) -> Vec<SegmentObject> {
  let mut objects = Vec::with_capacity(detections.len());

  for (index, detection) in detections.into_iter().enumerate() {
    let Some(bbox) = NormalizedBox::validate(detection.box_2d) else {
      warn!("第 {} 个候选项边界框无效: {:?}", index, detection.box_2d);
      continue;
    };

    let bytes = match decode_data_url(&detection.mask) {
      Ok(bytes) => bytes,
      Err(e) => {
        warn!("第 {} 个候选项掩码无法解码: {}", index, e);
        continue;
      }
    };

    let image = match decode_image(&bytes) {
      Ok(image) => image,
      Err(e) => {
        warn!("第 {} 个候选项掩码不是有效图像: {}", index, e);
        continue;
      }
    };

    let ordinal = objects.len();
    objects.push(SegmentObject {
      id: ObjectId::from_ordinal(ordinal),
      ordinal,
      bbox,
      mask: ObjectMask::BoxLocal(image),
      mask_file: MaskFile::from_bytes(bytes),
      label: detection.label,
    });
  }

  debug!("校验后保留 {} 个对象", objects.len());
  objects
}
