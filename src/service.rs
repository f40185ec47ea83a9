// 该文件是 Jianying （剪影） 项目的一部分。
// src/service.rs - 远程分割 / 编辑服务接口
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

use std::{fmt, io::Cursor};

use image::{DynamicImage, ImageFormat, codecs::jpeg::JpegEncoder, imageops::FilterType};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  object::{SegmentObject, objects_from_detections},
  parser::parse_response,
  raster::{MaskFile, RasterError, decode_image},
};

#[cfg(feature = "gemini_service")]
mod gemini;
#[cfg(feature = "gemini_service")]
pub use self::gemini::{GeminiService, GeminiServiceError};

/// 发给分割服务的图像最长边上限
pub const SEGMENTATION_MAX_EDGE: u32 = 1000;
/// 压缩输入图使用的 JPEG 质量
pub const SEGMENTATION_JPEG_QUALITY: u8 = 85;

/// 分割服务的固定提示词
pub const SEGMENTATION_PROMPT: &str = "Give the segmentation masks for the distinct, editable objects in this image. \
Output a JSON list of segmentation masks where each entry contains the 2D bounding box in the key \"box_2d\" \
as [ymin, xmin, ymax, xmax] normalized to 0-1000, the segmentation mask inside the bounding box as a base64 \
encoded png in the key \"mask\", and a short text label in the key \"label\". Use descriptive labels.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
  Segmentation,
  Edit,
}

impl fmt::Display for ServiceKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ServiceKind::Segmentation => f.write_str("分割服务"),
      ServiceKind::Edit => f.write_str("编辑服务"),
    }
  }
}

#[derive(Error, Debug)]
pub enum ServiceError {
  #[error("{kind}请求失败: {message}")]
  Transport { kind: ServiceKind, message: String },
  #[error("{kind}返回了无法理解的响应: {message}")]
  InvalidResponse { kind: ServiceKind, message: String },
}

impl ServiceError {
  pub fn kind(&self) -> ServiceKind {
    match self {
      ServiceError::Transport { kind, .. } | ServiceError::InvalidResponse { kind, .. } => *kind,
    }
  }
}

/// 分割请求：压缩后的图像 + 固定提示词
#[derive(Debug, Clone)]
pub struct SegmentRequest {
  pub image_jpeg: Vec<u8>,
  pub width: u32,
  pub height: u32,
  pub prompt: &'static str,
}

/// 编辑请求：原图、二值掩码（白色可编辑）以及自然语言指令
#[derive(Debug, Clone)]
pub struct EditRequest {
  pub image_png: Vec<u8>,
  pub mask: MaskFile,
  pub instruction: String,
}

/// 编辑服务的回复
#[derive(Debug, Clone, PartialEq)]
pub enum EditReply {
  /// 生成的图像字节
  Image(Vec<u8>),
  /// 模型只返回了文本（通常是拒绝或解释）
  Refused { text: String },
  /// 被安全策略拦截，或者以非正常原因结束
  Blocked { reason: String },
}

pub trait SegmentationService {
  fn segment(&self, request: &SegmentRequest) -> Result<String, ServiceError>;
}

pub trait EditService {
  fn edit(&self, request: &EditRequest) -> Result<EditReply, ServiceError>;
}

impl<S: SegmentationService + ?Sized> SegmentationService for &S {
  fn segment(&self, request: &SegmentRequest) -> Result<String, ServiceError> {
    (**self).segment(request)
  }
}

impl<S: EditService + ?Sized> EditService for &S {
  fn edit(&self, request: &EditRequest) -> Result<EditReply, ServiceError> {
    (**self).edit(request)
  }
}

#[derive(Error, Debug)]
pub enum SegmentError {
  #[error("没有检测到任何对象")]
  NoObjectsDetected,
  #[error("图像预处理失败: {0}")]
  Prepare(#[from] RasterError),
  #[error(transparent)]
  Service(#[from] ServiceError),
}

#[derive(Error, Debug)]
pub enum EditError {
  #[error("编辑被拒绝: {text}")]
  Refused { text: String },
  #[error("编辑被拦截: {reason}")]
  Blocked { reason: String },
  #[error("图像编解码失败: {0}")]
  Image(#[from] RasterError),
  #[error(transparent)]
  Service(#[from] ServiceError),
}

/// 压缩分割输入：最长边不超过 1000 像素，不放大，编码为 JPEG
pub fn prepare_segmentation_image(image: &DynamicImage) -> Result<SegmentRequest, RasterError> {
  let (width, height) = (image.width(), image.height());
  let resized = if width.max(height) > SEGMENTATION_MAX_EDGE {
    image.resize(SEGMENTATION_MAX_EDGE, SEGMENTATION_MAX_EDGE, FilterType::Triangle)
  } else {
    image.clone()
  };

  let rgb = resized.to_rgb8();
  let mut image_jpeg = Vec::new();
  JpegEncoder::new_with_quality(&mut image_jpeg, SEGMENTATION_JPEG_QUALITY).encode_image(&rgb)?;

  Ok(SegmentRequest {
    image_jpeg,
    width: rgb.width(),
    height: rgb.height(),
    prompt: SEGMENTATION_PROMPT,
  })
}

/// 调用分割服务并得到校验后的对象（掩码尚未对齐）
pub fn segment<S: SegmentationService>(
  service: &S,
  image: &DynamicImage,
) -> Result<Vec<SegmentObject>, SegmentError> {
  let request = prepare_segmentation_image(image)?;
  info!(
    "发送分割请求: {}x{}, {} 字节",
    request.width,
    request.height,
    request.image_jpeg.len()
  );

  let raw = service.segment(&request)?;
  let objects = objects_from_detections(parse_response(&raw));
  if objects.is_empty() {
    warn!("分割服务没有返回可用对象");
    return Err(SegmentError::NoObjectsDetected);
  }

  info!("分割得到 {} 个对象", objects.len());
  Ok(objects)
}

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, RasterError> {
  let mut bytes = Vec::new();
  image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
  Ok(bytes)
}

/// 请求编辑服务，成功时返回新图像
pub fn request_edit<S: EditService>(
  service: &S,
  image: &DynamicImage,
  mask: MaskFile,
  instruction: &str,
) -> Result<DynamicImage, EditError> {
  let request = EditRequest {
    image_png: encode_png(image)?,
    mask,
    instruction: instruction.to_string(),
  };
  info!("发送编辑请求: {}", instruction);

  match service.edit(&request)? {
    EditReply::Image(bytes) => Ok(decode_image(&bytes)?),
    EditReply::Refused { text } => {
      warn!("编辑服务只返回了文本: {}", text);
      Err(EditError::Refused { text })
    }
    EditReply::Blocked { reason } => {
      warn!("编辑请求被拦截: {}", reason);
      Err(EditError::Blocked { reason })
    }
  }
}
