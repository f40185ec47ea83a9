// 该文件是 Jianying （剪影） 项目的一部分。
// src/raster.rs - 栅格缓冲区能力抽象与编解码
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

use std::io::Cursor;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::{
  DynamicImage, GrayImage, ImageBuffer, ImageFormat, Luma, Pixel, PixelWithColorType, Rgba,
  RgbaImage,
  imageops::{self, FilterType},
};
use thiserror::Error;

use crate::geometry::PixelRect;

/// 二值化阈值（0 - 255）
pub const MASK_THRESHOLD: u8 = 127;
/// 可编辑像素
pub const MASK_ON: u8 = 255;
/// 不可编辑像素
pub const MASK_OFF: u8 = 0;

#[derive(Error, Debug)]
pub enum RasterError {
  #[error("图像编解码错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Base64 解码错误: {0}")]
  Base64Error(#[from] base64::DecodeError),
  #[error("尺寸不一致: 期望 {expected:?}, 实际 {actual:?}")]
  DimensionMismatch {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  #[error("无效的画布尺寸: {0}x{1}")]
  InvalidSize(u32, u32),
}

/// 栅格缓冲区需要支持的最小操作集合
pub trait Raster: Sized {
  type Pixel: Copy;

  fn allocate(width: u32, height: u32) -> Result<Self, RasterError>;
  fn fill_solid(&mut self, pixel: Self::Pixel);
  /// 把 `src` 缩放到 `dest` 的尺寸后写到 `dest` 的位置，超出画布的部分被裁掉
  fn draw_scaled(&mut self, src: &Self, dest: PixelRect, filter: FilterType);
  fn threshold_to_binary(&mut self, threshold: u8);
  /// 逐像素取最大值（“变亮”混合）
  fn blend_max(&mut self, other: &Self) -> Result<(), RasterError>;
  /// 编码为 PNG
  fn encode(&self) -> Result<Vec<u8>, RasterError>;
}

fn check_size(width: u32, height: u32) -> Result<(), RasterError> {
  if width == 0 || height == 0 {
    return Err(RasterError::InvalidSize(width, height));
  }
  Ok(())
}

fn draw_scaled_buffer<P>(
  canvas: &mut ImageBuffer<P, Vec<u8>>,
  src: &ImageBuffer<P, Vec<u8>>,
  dest: PixelRect,
  filter: FilterType,
) where
  P: Pixel<Subpixel = u8> + 'static,
{
  if src.dimensions() == (dest.width, dest.height) {
    imageops::replace(canvas, src, dest.x, dest.y);
  } else {
    let scaled = imageops::resize(src, dest.width, dest.height, filter);
    imageops::replace(canvas, &scaled, dest.x, dest.y);
  }
}

fn blend_max_buffer<P>(
  canvas: &mut ImageBuffer<P, Vec<u8>>,
  other: &ImageBuffer<P, Vec<u8>>,
) -> Result<(), RasterError>
where
  P: Pixel<Subpixel = u8>,
{
  if canvas.dimensions() != other.dimensions() {
    return Err(RasterError::DimensionMismatch {
      expected: canvas.dimensions(),
      actual: other.dimensions(),
    });
  }
  for (dst, src) in canvas.iter_mut().zip(other.iter()) {
    *dst = (*dst).max(*src);
  }
  Ok(())
}

fn encode_buffer<P>(buffer: &ImageBuffer<P, Vec<u8>>) -> Result<Vec<u8>, RasterError>
where
  P: Pixel<Subpixel = u8> + PixelWithColorType,
{
  let mut bytes = Vec::new();
  buffer.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
  Ok(bytes)
}

impl Raster for GrayImage {
  type Pixel = Luma<u8>;

  fn allocate(width: u32, height: u32) -> Result<Self, RasterError> {
    check_size(width, height)?;
    Ok(GrayImage::from_pixel(width, height, Luma([MASK_OFF])))
  }

  fn fill_solid(&mut self, pixel: Self::Pixel) {
    self.pixels_mut().for_each(|p| *p = pixel);
  }

  fn draw_scaled(&mut self, src: &Self, dest: PixelRect, filter: FilterType) {
    draw_scaled_buffer(self, src, dest, filter);
  }

  fn threshold_to_binary(&mut self, threshold: u8) {
    for p in self.pixels_mut() {
      p.0[0] = if p.0[0] > threshold { MASK_ON } else { MASK_OFF };
    }
  }

  fn blend_max(&mut self, other: &Self) -> Result<(), RasterError> {
    blend_max_buffer(self, other)
  }

  fn encode(&self) -> Result<Vec<u8>, RasterError> {
    encode_buffer(self)
  }
}

impl Raster for RgbaImage {
  type Pixel = Rgba<u8>;

  fn allocate(width: u32, height: u32) -> Result<Self, RasterError> {
    check_size(width, height)?;
    Ok(RgbaImage::new(width, height))
  }

  fn fill_solid(&mut self, pixel: Self::Pixel) {
    self.pixels_mut().for_each(|p| *p = pixel);
  }

  fn draw_scaled(&mut self, src: &Self, dest: PixelRect, filter: FilterType) {
    draw_scaled_buffer(self, src, dest, filter);
  }

  /// RGB 平均值与阈值比较，结果是全不透明白色或全透明
  fn threshold_to_binary(&mut self, threshold: u8) {
    for p in self.pixels_mut() {
      *p = if is_covered(p, threshold) {
        Rgba([255, 255, 255, 255])
      } else {
        Rgba([0, 0, 0, 0])
      };
    }
  }

  fn blend_max(&mut self, other: &Self) -> Result<(), RasterError> {
    blend_max_buffer(self, other)
  }

  fn encode(&self) -> Result<Vec<u8>, RasterError> {
    encode_buffer(self)
  }
}

/// RGB 三通道平均值乘以透明度后是否高于阈值，整数比较不做截断
fn is_covered(p: &Rgba<u8>, threshold: u8) -> bool {
  let [r, g, b, a] = p.0;
  (r as u32 + g as u32 + b as u32) * a as u32 > threshold as u32 * 3 * 255
}

/// 把模型给出的掩码图（可能是概率图、带抗锯齿）转换为二值灰度掩码
pub fn binarize_source(source: &DynamicImage) -> GrayImage {
  let rgba = source.to_rgba8();
  GrayImage::from_fn(rgba.width(), rgba.height(), |x, y| {
    if is_covered(rgba.get_pixel(x, y), MASK_THRESHOLD) {
      Luma([MASK_ON])
    } else {
      Luma([MASK_OFF])
    }
  })
}

pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, RasterError> {
  Ok(image::load_from_memory(bytes)?)
}

/// 解码 `data:<mime>;base64,<payload>` 或者裸 base64
pub fn decode_data_url(data: &str) -> Result<Vec<u8>, RasterError> {
  let payload = match data.split_once(";base64,") {
    Some((_, payload)) => payload,
    None => data,
  };
  let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
  Ok(STANDARD.decode(cleaned)?)
}

pub fn encode_data_url(mime: &str, bytes: &[u8]) -> String {
  format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// 编码后的掩码文件（PNG），作为编辑服务的传输载荷
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskFile {
  bytes: Vec<u8>,
}

impl MaskFile {
  pub const MIME: &'static str = "image/png";

  pub fn from_bytes(bytes: Vec<u8>) -> Self {
    Self { bytes }
  }

  pub fn from_raster<R: Raster>(raster: &R) -> Result<Self, RasterError> {
    Ok(Self {
      bytes: raster.encode()?,
    })
  }

  pub fn bytes(&self) -> &[u8] {
    &self.bytes
  }

  pub fn into_bytes(self) -> Vec<u8> {
    self.bytes
  }

  pub fn decode(&self) -> Result<DynamicImage, RasterError> {
    decode_image(&self.bytes)
  }

  /// 解码为二值灰度掩码
  pub fn decode_gray(&self) -> Result<GrayImage, RasterError> {
    Ok(self.decode()?.to_luma8())
  }

  /// 只读取 PNG 头部得到尺寸，不解码像素
  pub fn dimensions(&self) -> Result<(u32, u32), RasterError> {
    let reader = image::ImageReader::new(Cursor::new(&self.bytes)).with_guessed_format()?;
    Ok(reader.into_dimensions()?)
  }

  pub fn to_data_url(&self) -> String {
    encode_data_url(Self::MIME, &self.bytes)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn gray_threshold_snaps_to_binary() {
    let mut mask = GrayImage::from_raw(4, 1, vec![0, 127, 128, 255]).unwrap();
    mask.threshold_to_binary(MASK_THRESHOLD);
    assert_eq!(mask.into_raw(), vec![0, 0, 255, 255]);
  }

  #[test]
  fn rgba_threshold_averages_channels_and_respects_alpha() {
    let mut image = RgbaImage::new(3, 1);
    image.put_pixel(0, 0, Rgba([255, 255, 0, 255])); // 平均 170
    image.put_pixel(1, 0, Rgba([255, 0, 0, 255])); // 平均 85
    image.put_pixel(2, 0, Rgba([255, 255, 255, 0])); // 完全透明
    image.threshold_to_binary(MASK_THRESHOLD);
    assert_eq!(image.get_pixel(0, 0), &Rgba([255, 255, 255, 255]));
    assert_eq!(image.get_pixel(1, 0), &Rgba([0, 0, 0, 0]));
    assert_eq!(image.get_pixel(2, 0), &Rgba([0, 0, 0, 0]));
  }

  #[test]
  fn channel_mean_is_not_truncated_at_threshold() {
    let mut image = RgbaImage::new(2, 1);
    image.put_pixel(0, 0, Rgba([128, 128, 127, 255])); // 平均 127.67
    image.put_pixel(1, 0, Rgba([127, 127, 127, 255])); // 平均 127
    let source = DynamicImage::ImageRgba8(image.clone());

    image.threshold_to_binary(MASK_THRESHOLD);
    assert_eq!(image.get_pixel(0, 0), &Rgba([255, 255, 255, 255]));
    assert_eq!(image.get_pixel(1, 0), &Rgba([0, 0, 0, 0]));

    let binary = binarize_source(&source);
    assert_eq!(binary.into_raw(), vec![MASK_ON, MASK_OFF]);
  }

  #[test]
  fn blend_max_is_pixelwise_union() {
    let mut a = GrayImage::from_raw(3, 1, vec![255, 0, 0]).unwrap();
    let b = GrayImage::from_raw(3, 1, vec![0, 0, 255]).unwrap();
    a.blend_max(&b).unwrap();
    assert_eq!(a.into_raw(), vec![255, 0, 255]);
  }

  #[test]
  fn blend_max_rejects_mismatched_sizes() {
    let mut a = GrayImage::allocate(2, 2).unwrap();
    let b = GrayImage::allocate(3, 2).unwrap();
    assert!(matches!(
      a.blend_max(&b),
      Err(RasterError::DimensionMismatch { .. })
    ));
  }

  #[test]
  fn draw_scaled_places_source_at_offset_and_clips() {
    let mut canvas = GrayImage::allocate(6, 4).unwrap();
    let mut src = GrayImage::allocate(1, 1).unwrap();
    src.fill_solid(Luma([MASK_ON]));
    canvas.draw_scaled(
      &src,
      PixelRect {
        x: 4,
        y: 2,
        width: 3,
        height: 3,
      },
      FilterType::Nearest,
    );
    let on: Vec<(u32, u32)> = canvas
      .enumerate_pixels()
      .filter(|(_, _, p)| p.0[0] == MASK_ON)
      .map(|(x, y, _)| (x, y))
      .collect();
    assert_eq!(on, vec![(4, 2), (5, 2), (4, 3), (5, 3)]);
  }

  #[test]
  fn allocate_rejects_empty_canvas() {
    assert!(matches!(
      GrayImage::allocate(0, 5),
      Err(RasterError::InvalidSize(0, 5))
    ));
  }

  #[test]
  fn data_url_round_trip_and_dimensions() {
    let mut mask = GrayImage::allocate(7, 3).unwrap();
    mask.fill_solid(Luma([MASK_ON]));
    let file = MaskFile::from_raster(&mask).unwrap();
    assert_eq!(file.dimensions().unwrap(), (7, 3));

    let url = file.to_data_url();
    assert!(url.starts_with("data:image/png;base64,"));
    let bytes = decode_data_url(&url).unwrap();
    assert_eq!(bytes, file.bytes());
    assert_eq!(decode_image(&bytes).unwrap().to_luma8(), mask);
  }

  #[test]
  fn binarize_source_handles_soft_edges() {
    let mut soft = RgbaImage::new(2, 1);
    soft.put_pixel(0, 0, Rgba([200, 200, 200, 255]));
    soft.put_pixel(1, 0, Rgba([100, 100, 100, 255]));
    let binary = binarize_source(&DynamicImage::ImageRgba8(soft));
    assert_eq!(binary.into_raw(), vec![MASK_ON, MASK_OFF]);
  }
}
