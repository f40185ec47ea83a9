// 该文件是 Jianying （剪影） 项目的一部分。
// src/overlay.rs - 交互覆盖层绘制
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
  collections::hash_map::DefaultHasher,
  hash::{Hash, Hasher},
  path::Path,
};

use ab_glyph::{FontArc, InvalidFont, PxScale};
use image::{GrayImage, Pixel, Rgb, Rgba, RgbaImage, imageops};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_circle_mut, draw_text_mut, text_size};
use thiserror::Error;
use tracing::{debug, trace};

use crate::{
  geometry::{NORMALIZED_SCALE, PixelRect},
  object::SegmentObject,
  raster::{MASK_ON, Raster},
  selection::SelectionState,
};

// 默认样式常量
const SELECTED_COLOR: [u8; 3] = [37, 99, 235]; // 蓝色
const HOVERED_COLOR: [u8; 3] = [245, 158, 11]; // 琥珀色
const IDLE_COLOR: [u8; 3] = [255, 255, 255]; // 白色
const SELECTED_FILL_ALPHA: u8 = 115;
const HOVERED_FILL_ALPHA: u8 = 64;
const IDLE_OUTLINE_ALPHA: u8 = 110;
const SELECTED_BORDER: u32 = 3;
const HOVERED_BORDER: u32 = 2;
const IDLE_BORDER: u32 = 1;
const DASH_LENGTH: u32 = 6;
const BADGE_RADIUS: i32 = 11;
const BADGE_FONT_SIZE: f32 = 14.0;

#[derive(Error, Debug)]
pub enum OverlayError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体无效: {0}")]
  InvalidFont(#[from] InvalidFont),
}

/// 对象的显示状态，优先级：选中 > 悬停 > 空闲
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ObjectVisual {
  Idle,
  Hovered,
  Selected,
}

impl ObjectVisual {
  pub fn of(object: &SegmentObject, selection: &SelectionState) -> Self {
    if selection.is_selected(&object.id) {
      ObjectVisual::Selected
    } else if selection.is_hovered(&object.id) {
      ObjectVisual::Hovered
    } else {
      ObjectVisual::Idle
    }
  }
}

#[derive(Debug, Clone)]
pub struct OverlayStyle {
  pub selected_color: Rgb<u8>,
  pub hovered_color: Rgb<u8>,
  pub idle_color: Rgb<u8>,
  pub selected_fill_alpha: u8,
  pub hovered_fill_alpha: u8,
  pub idle_outline_alpha: u8,
  pub selected_border: u32,
  pub hovered_border: u32,
  pub idle_border: u32,
  pub dash_length: u32,
  /// 空闲对象是否绘制淡色轮廓
  pub idle_outline: bool,
  pub badge_radius: i32,
  pub badge_font_size: f32,
}

impl Default for OverlayStyle {
  fn default() -> Self {
    Self {
      selected_color: Rgb(SELECTED_COLOR),
      hovered_color: Rgb(HOVERED_COLOR),
      idle_color: Rgb(IDLE_COLOR),
      selected_fill_alpha: SELECTED_FILL_ALPHA,
      hovered_fill_alpha: HOVERED_FILL_ALPHA,
      idle_outline_alpha: IDLE_OUTLINE_ALPHA,
      selected_border: SELECTED_BORDER,
      hovered_border: HOVERED_BORDER,
      idle_border: IDLE_BORDER,
      dash_length: DASH_LENGTH,
      idle_outline: true,
      badge_radius: BADGE_RADIUS,
      badge_font_size: BADGE_FONT_SIZE,
    }
  }
}

impl OverlayStyle {
  fn color(&self, visual: ObjectVisual) -> Rgb<u8> {
    match visual {
      ObjectVisual::Selected => self.selected_color,
      ObjectVisual::Hovered => self.hovered_color,
      ObjectVisual::Idle => self.idle_color,
    }
  }
}

/// 一次绘制所需的全部输入
#[derive(Debug, Clone, Copy)]
pub struct OverlayScene<'a> {
  pub objects: &'a [SegmentObject],
  pub selection: &'a SelectionState,
  pub active: bool,
  /// 图像原始像素尺寸
  pub image_size: (u32, u32),
  /// 图像或对象列表的版本号，换图、重新分割时变化
  pub revision: u64,
}

impl OverlayScene<'_> {
  /// 任何一个触发重绘的输入变化都会改变指纹
  pub fn fingerprint(&self) -> u64 {
    let mut hasher = DefaultHasher::new();
    self.active.hash(&mut hasher);
    self.image_size.hash(&mut hasher);
    self.revision.hash(&mut hasher);
    for object in self.objects {
      object.id.hash(&mut hasher);
      for v in object.bbox.as_array() {
        v.to_bits().hash(&mut hasher);
      }
      object.is_aligned().hash(&mut hasher);
    }
    self.selection.selected().hash(&mut hasher);
    self.selection.hovered().hash(&mut hasher);
    hasher.finish()
  }
}

/// 覆盖层绘制器，画布与图像原始像素一一对应
pub struct OverlayRenderer {
  style: OverlayStyle,
  font: Option<FontArc>,
  canvas: RgbaImage,
  last_fingerprint: Option<u64>,
}

impl Default for OverlayRenderer {
  fn default() -> Self {
    Self::new(OverlayStyle::default())
  }
}

impl OverlayRenderer {
  pub fn new(style: OverlayStyle) -> Self {
    Self {
      style,
      font: None,
      canvas: RgbaImage::new(0, 0),
      last_fingerprint: None,
    }
  }

  /// 设置编号徽章使用的字体，没有字体时徽章只画圆点
  pub fn with_font(mut self, font: FontArc) -> Self {
    self.font = Some(font);
    self
  }

  pub fn with_font_file(self, path: impl AsRef<Path>) -> Result<Self, OverlayError> {
    let data = std::fs::read(path.as_ref())?;
    let font = FontArc::try_from_vec(data)?;
    Ok(self.with_font(font))
  }

  pub fn style(&self) -> &OverlayStyle {
    &self.style
  }

  pub fn canvas(&self) -> &RgbaImage {
    &self.canvas
  }

  /// 输入有变化时才重绘，返回是否重绘
  pub fn update(&mut self, scene: &OverlayScene<'_>) -> bool {
    let fingerprint = scene.fingerprint();
    if self.last_fingerprint == Some(fingerprint) {
      trace!("覆盖层输入未变化，跳过重绘");
      return false;
    }
    self.render(scene);
    true
  }

  /// 完整清空后重绘
  pub fn render(&mut self, scene: &OverlayScene<'_>) -> &RgbaImage {
    let (width, height) = scene.image_size;
    if self.canvas.dimensions() != (width, height) {
      self.canvas = RgbaImage::new(width, height);
    } else {
      self.canvas.fill_solid(Rgba([0, 0, 0, 0]));
    }
    self.last_fingerprint = Some(scene.fingerprint());

    if !scene.active || width == 0 || height == 0 {
      return &self.canvas;
    }

    // 按状态分层绘制，选中的对象在最上层
    let mut layered: Vec<(ObjectVisual, &SegmentObject)> = scene
      .objects
      .iter()
      .map(|object| (ObjectVisual::of(object, scene.selection), object))
      .collect();
    layered.sort_by_key(|(visual, _)| *visual);

    for (visual, object) in &layered {
      self.draw_object(object, *visual);
    }
    for (visual, object) in &layered {
      self.draw_badge(object, *visual);
    }

    debug!("覆盖层重绘完成: {} 个对象", layered.len());
    &self.canvas
  }

  /// 把覆盖层叠加到图像副本上，用于导出预览
  pub fn composite_onto(&self, base: &RgbaImage) -> RgbaImage {
    let mut out = base.clone();
    imageops::overlay(&mut out, &self.canvas, 0, 0);
    out
  }

  fn draw_object(&mut self, object: &SegmentObject, visual: ObjectVisual) {
    let (width, height) = self.canvas.dimensions();
    let rect = object.bbox.to_pixels(width, height);
    let color = self.style.color(visual);

    match visual {
      ObjectVisual::Idle => {
        if self.style.idle_outline {
          let outline = with_alpha(color, self.style.idle_outline_alpha);
          stroke_rect(&mut self.canvas, rect, outline, self.style.idle_border, None);
        }
      }
      ObjectVisual::Hovered => {
        self.fill_object(object, rect, with_alpha(color, self.style.hovered_fill_alpha));
        stroke_rect(
          &mut self.canvas,
          rect,
          with_alpha(color, 255),
          self.style.hovered_border,
          Some(self.style.dash_length),
        );
      }
      ObjectVisual::Selected => {
        self.fill_object(object, rect, with_alpha(color, self.style.selected_fill_alpha));
        stroke_rect(
          &mut self.canvas,
          rect,
          with_alpha(color, 255),
          self.style.selected_border,
          None,
        );
      }
    }
  }

  /// 有对齐掩码时按轮廓填充，否则退回到边界框填充
  fn fill_object(&mut self, object: &SegmentObject, rect: PixelRect, color: Rgba<u8>) {
    match object.mask.aligned() {
      Some(mask) if mask.dimensions() == self.canvas.dimensions() => {
        let layer = masked_layer(mask, color);
        imageops::overlay(&mut self.canvas, &layer, 0, 0);
      }
      _ => fill_rect(&mut self.canvas, rect, color),
    }
  }

  fn draw_badge(&mut self, object: &SegmentObject, visual: ObjectVisual) {
    let (width, height) = self.canvas.dimensions();
    let radius = self.style.badge_radius;
    let center = badge_center(object, width, height, radius);
    let color = with_alpha(self.style.color(visual), 255);

    draw_filled_circle_mut(&mut self.canvas, center, radius, color);
    let ring = match visual {
      ObjectVisual::Idle => Rgba([40, 40, 40, 255]),
      _ => Rgba([255, 255, 255, 255]),
    };
    draw_hollow_circle_mut(&mut self.canvas, center, radius, ring);

    if let Some(font) = &self.font {
      let text = object.display_number().to_string();
      let scale = PxScale::from(self.style.badge_font_size);
      let (text_w, text_h) = text_size(scale, font, &text);
      let text_color = match visual {
        ObjectVisual::Idle => Rgba([20, 20, 20, 255]),
        _ => Rgba([255, 255, 255, 255]),
      };
      draw_text_mut(
        &mut self.canvas,
        text_color,
        center.0 - text_w as i32 / 2,
        center.1 - text_h as i32 / 2,
        scale,
        font,
        &text,
      );
    }
  }
}

fn with_alpha(color: Rgb<u8>, alpha: u8) -> Rgba<u8> {
  let [r, g, b] = color.0;
  Rgba([r, g, b, alpha])
}

/// 徽章中心：边界框中心点，夹在画布范围内
pub fn badge_center(object: &SegmentObject, width: u32, height: u32, radius: i32) -> (i32, i32) {
  let (cx, cy) = object.bbox.center();
  let clamp = |v: f64, dim: u32| {
    let px = (v / NORMALIZED_SCALE * dim as f64).round() as i32;
    let lo = radius + 1;
    let hi = dim as i32 - radius - 1;
    if lo > hi { dim as i32 / 2 } else { px.clamp(lo, hi) }
  };
  (clamp(cx, width), clamp(cy, height))
}

/// 铺满画布的纯色层，只保留掩码不透明的部分
fn masked_layer(mask: &GrayImage, color: Rgba<u8>) -> RgbaImage {
  let (width, height) = mask.dimensions();
  let mut layer = RgbaImage::new(width, height);
  layer.fill_solid(color);
  for (p, m) in layer.pixels_mut().zip(mask.pixels()) {
    if m.0[0] != MASK_ON {
      *p = Rgba([0, 0, 0, 0]);
    }
  }
  layer
}

fn fill_rect(canvas: &mut RgbaImage, rect: PixelRect, color: Rgba<u8>) {
  let (width, height) = canvas.dimensions();
  let x0 = rect.x.max(0);
  let y0 = rect.y.max(0);
  let x1 = rect.right().min(width as i64);
  let y1 = rect.bottom().min(height as i64);
  for y in y0..y1 {
    for x in x0..x1 {
      canvas.get_pixel_mut(x as u32, y as u32).blend(&color);
    }
  }
}

/// 向内描边，`dash` 为虚线段长度
fn stroke_rect(
  canvas: &mut RgbaImage,
  rect: PixelRect,
  color: Rgba<u8>,
  thickness: u32,
  dash: Option<u32>,
) {
  let (width, height) = canvas.dimensions();
  let mut plot = |x: i64, y: i64, step: i64| {
    if let Some(dash) = dash
      && dash > 0
      && (step / dash as i64) % 2 == 1
    {
      return;
    }
    if x >= 0 && y >= 0 && x < width as i64 && y < height as i64 {
      canvas.get_pixel_mut(x as u32, y as u32).blend(&color);
    }
  };

  for t in 0..thickness as i64 {
    let x0 = rect.x + t;
    let y0 = rect.y + t;
    let x1 = rect.right() - 1 - t;
    let y1 = rect.bottom() - 1 - t;
    if x0 > x1 || y0 > y1 {
      break;
    }

    for x in x0..=x1 {
      plot(x, y0, x - x0);
      if y1 != y0 {
        plot(x, y1, x - x0);
      }
    }
    for y in (y0 + 1)..y1 {
      plot(x0, y, y - y0);
      if x1 != x0 {
        plot(x1, y, y - y0);
      }
    }
  }
}
