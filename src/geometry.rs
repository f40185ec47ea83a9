// 该文件是 Jianying （剪影） 项目的一部分。
// src/geometry.rs - 归一化坐标与像素坐标换算
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

/// 分割模型使用的归一化坐标上限（两个轴均为 0 - 1000）
pub const NORMALIZED_SCALE: f64 = 1000.0;

/// 归一化边界框，顺序与模型输出一致：[ymin, xmin, ymax, xmax]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedBox {
  ymin: f64,
  xmin: f64,
  ymax: f64,
  xmax: f64,
}

impl NormalizedBox {
  /// 校验候选边界框，只有合法的框才能构造出 `NormalizedBox`
  ///
  /// 四个值必须是有限数且位于 [0, 1000]，同时 ymin < ymax、xmin < xmax。
  /// 零面积或者倒置的框直接拒绝。
  pub fn validate(candidate: [f64; 4]) -> Option<Self> {
    let in_range = |v: f64| v.is_finite() && (0.0..=NORMALIZED_SCALE).contains(&v);
    if !candidate.iter().all(|&v| in_range(v)) {
      return None;
    }

    let [ymin, xmin, ymax, xmax] = candidate;
    if ymin >= ymax || xmin >= xmax {
      return None;
    }

    Some(Self {
      ymin,
      xmin,
      ymax,
      xmax,
    })
  }

  pub fn ymin(&self) -> f64 {
    self.ymin
  }

  pub fn xmin(&self) -> f64 {
    self.xmin
  }

  pub fn ymax(&self) -> f64 {
    self.ymax
  }

  pub fn xmax(&self) -> f64 {
    self.xmax
  }

  pub fn as_array(&self) -> [f64; 4] {
    [self.ymin, self.xmin, self.ymax, self.xmax]
  }

  /// 归一化空间中的面积，用于命中测试时的“最小优先”
  pub fn area(&self) -> f64 {
    (self.ymax - self.ymin) * (self.xmax - self.xmin)
  }

  /// 中心点 (x, y)，归一化坐标
  pub fn center(&self) -> (f64, f64) {
    (
      (self.xmin + self.xmax) / 2.0,
      (self.ymin + self.ymax) / 2.0,
    )
  }

  /// 换算到给定尺寸的像素网格
  ///
  /// 每条边按 `round(v / 1000 * dim)` 取整，宽高最少 1 像素。
  pub fn to_pixels(&self, width: u32, height: u32) -> PixelRect {
    let to_px = |v: f64, dim: u32| (v / NORMALIZED_SCALE * dim as f64).round() as i64;

    let x0 = to_px(self.xmin, width);
    let y0 = to_px(self.ymin, height);
    let x1 = to_px(self.xmax, width);
    let y1 = to_px(self.ymax, height);

    PixelRect {
      x: x0,
      y: y0,
      width: (x1 - x0).max(1) as u32,
      height: (y1 - y0).max(1) as u32,
    }
  }
}

/// 像素坐标下的矩形，左上角 + 宽高
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
  pub x: i64,
  pub y: i64,
  pub width: u32,
  pub height: u32,
}

impl PixelRect {
  pub fn right(&self) -> i64 {
    self.x + self.width as i64
  }

  pub fn bottom(&self) -> i64 {
    self.y + self.height as i64
  }

  /// 点是否落在矩形内，左右上下边界都算命中
  pub fn contains(&self, px: f64, py: f64) -> bool {
    px >= self.x as f64 && px <= self.right() as f64 && py >= self.y as f64 && py <= self.bottom() as f64
  }

  /// 矩形是否完整位于 width x height 的画布内
  pub fn fits_within(&self, width: u32, height: u32) -> bool {
    self.x >= 0 && self.y >= 0 && self.right() <= width as i64 && self.bottom() <= height as i64
  }
}

/// 屏幕显示尺寸与图像原始尺寸之间的映射
///
/// 覆盖层按原始像素绘制，指针坐标需要先经过这里换算才能做命中测试。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
  pub displayed_width: f64,
  pub displayed_height: f64,
  pub natural_width: u32,
  pub natural_height: u32,
}

impl Viewport {
  pub fn new(displayed: (f64, f64), natural: (u32, u32)) -> Self {
    Self {
      displayed_width: displayed.0,
      displayed_height: displayed.1,
      natural_width: natural.0,
      natural_height: natural.1,
    }
  }

  /// 屏幕坐标（相对图像左上角）换算到原始像素坐标
  pub fn screen_to_canvas(&self, sx: f64, sy: f64) -> Option<(f64, f64)> {
    if self.displayed_width <= 0.0 || self.displayed_height <= 0.0 {
      return None;
    }
    let scale_x = self.natural_width as f64 / self.displayed_width;
    let scale_y = self.natural_height as f64 / self.displayed_height;
    Some((sx * scale_x, sy * scale_y))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn validator_accepts_well_formed_boxes() {
    let bbox = NormalizedBox::validate([100.0, 200.0, 300.0, 400.0]).unwrap();
    assert_eq!(bbox.as_array(), [100.0, 200.0, 300.0, 400.0]);
    assert!(NormalizedBox::validate([0.0, 0.0, 1000.0, 1000.0]).is_some());
  }

  #[test]
  fn validator_rejects_degenerate_and_inverted_boxes() {
    assert!(NormalizedBox::validate([0.0, 0.0, 0.0, 0.0]).is_none());
    assert!(NormalizedBox::validate([500.0, 500.0, 400.0, 400.0]).is_none());
    assert!(NormalizedBox::validate([100.0, 100.0, 100.0, 200.0]).is_none());
  }

  #[test]
  fn validator_rejects_out_of_range_and_non_finite() {
    assert!(NormalizedBox::validate([-1.0, 0.0, 10.0, 10.0]).is_none());
    assert!(NormalizedBox::validate([0.0, 0.0, 10.0, 1000.5]).is_none());
    assert!(NormalizedBox::validate([0.0, f64::NAN, 10.0, 10.0]).is_none());
    assert!(NormalizedBox::validate([0.0, 0.0, f64::INFINITY, 10.0]).is_none());
  }

  #[test]
  fn to_pixels_rounds_each_edge() {
    let bbox = NormalizedBox::validate([100.0, 100.0, 500.0, 500.0]).unwrap();
    let rect = bbox.to_pixels(800, 600);
    assert_eq!(
      rect,
      PixelRect {
        x: 80,
        y: 60,
        width: 320,
        height: 240
      }
    );
    assert!(rect.fits_within(800, 600));
  }

  #[test]
  fn to_pixels_floors_extent_at_one_pixel() {
    let bbox = NormalizedBox::validate([10.0, 10.0, 10.4, 10.4]).unwrap();
    let rect = bbox.to_pixels(100, 100);
    assert_eq!(rect.width, 1);
    assert_eq!(rect.height, 1);
  }

  #[test]
  fn area_is_in_normalized_units() {
    let bbox = NormalizedBox::validate([0.0, 0.0, 100.0, 200.0]).unwrap();
    assert_eq!(bbox.area(), 20_000.0);
    assert_eq!(bbox.center(), (100.0, 50.0));
  }

  #[test]
  fn viewport_maps_screen_corners_to_natural_corners() {
    let viewport = Viewport::new((400.0, 300.0), (800, 600));
    assert_eq!(viewport.screen_to_canvas(0.0, 0.0), Some((0.0, 0.0)));
    assert_eq!(viewport.screen_to_canvas(400.0, 300.0), Some((800.0, 600.0)));
    assert_eq!(viewport.screen_to_canvas(100.0, 150.0), Some((200.0, 300.0)));

    let hidden = Viewport::new((0.0, 300.0), (800, 600));
    assert_eq!(hidden.screen_to_canvas(1.0, 1.0), None);
  }
}
