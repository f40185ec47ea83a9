// 该文件是 Jianying （剪影） 项目的一部分。
// src/output/draw.rs - 把覆盖层叠加到图像上 / 对象记录
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

use ab_glyph::FontArc;
use image::{DynamicImage, RgbaImage};
use url::Url;

use crate::{
  object::SegmentObject,
  overlay::{OverlayError, OverlayRenderer, OverlayScene, OverlayStyle},
};

/// 输出端使用的绘制配置
///
/// URL 查询参数：`font=<ttf 路径>` 给徽章加编号，`outline=off` 关闭空闲对象轮廓。
#[derive(Clone, Default)]
pub struct Draw {
  style: OverlayStyle,
  font: Option<FontArc>,
}

impl Draw {
  pub fn from_query(url: &Url) -> Result<Self, OverlayError> {
    let mut draw = Draw::default();
    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "font" => {
          let data = std::fs::read(v.as_ref())?;
          draw.font = Some(FontArc::try_from_vec(data)?);
        }
        "outline" => draw.style.idle_outline = v != "off",
        _ => {}
      }
    }
    Ok(draw)
  }

  fn renderer(&self) -> OverlayRenderer {
    let renderer = OverlayRenderer::new(self.style.clone());
    match &self.font {
      Some(font) => renderer.with_font(font.clone()),
      None => renderer,
    }
  }

  /// 绘制覆盖层并叠加到图像副本上
  pub fn draw_scene(&self, image: &DynamicImage, scene: &OverlayScene<'_>) -> RgbaImage {
    let mut renderer = self.renderer();
    renderer.render(scene);
    renderer.composite_onto(&image.to_rgba8())
  }
}

/// 对象记录，每行 `id, label, ymin, xmin, ymax, xmax`
pub struct Record;

impl Record {
  pub fn record(&self, objects: &[SegmentObject], path: &Path) -> Result<(), std::io::Error> {
    let mut records = Vec::new();
    for object in objects {
      let [ymin, xmin, ymax, xmax] = object.bbox.as_array();
      let record = format!(
        "{}, {}, {:.1}, {:.1}, {:.1}, {:.1}",
        object.id,
        object.display_label(),
        ymin,
        xmin,
        ymax,
        xmax
      );
      records.push(record);
    }
    std::fs::write(path.with_extension("txt"), records.join("\n"))?;
    Ok(())
  }
}
