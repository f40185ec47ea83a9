// 该文件是 Jianying （剪影） 项目的一部分。
// src/bin/replay_response.rs - 离线重放分割服务的原始回复
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

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use url::Url;

use jianying::{
  FromUrl, ObjectId,
  align::align_masks,
  geometry::NORMALIZED_SCALE,
  input::ImageFileInput,
  object::objects_from_detections,
  output::{OutputWrapper, Render},
  parser::parse_response,
  session::EditSession,
};
use tracing::info;

/// 用保存下来的回复文本调试解析、对齐与覆盖层
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 分割服务的原始回复文本
  #[arg(long, value_name = "FILE")]
  pub response: PathBuf,
  /// 输入图像
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 选中的对象编号（从 1 开始）
  #[arg(long, value_name = "N", value_delimiter = ',')]
  pub select: Vec<usize>,
  /// 把指针放在该编号对象的中心
  #[arg(long, value_name = "N")]
  pub hover: Option<usize>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("回复文件: {}", args.response.display());
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let raw = std::fs::read_to_string(&args.response)?;
  let image = ImageFileInput::from_url(&args.input)?.into_image();
  let output = OutputWrapper::from_url(&args.output)?;

  let detections = parse_response(&raw);
  info!("解析得到 {} 个候选项", detections.len());
  let objects = objects_from_detections(detections);
  if objects.is_empty() {
    bail!("回复中没有可用对象");
  }
  let objects = align_masks(objects, &image)?;

  let mut session = EditSession::new(image);
  let ticket = session.begin_segmentation();
  session.finish_segmentation(ticket, objects);

  for number in args.select.iter().filter(|n| **n > 0) {
    session.toggle_selection(&ObjectId::from_ordinal(number - 1));
  }

  if let Some(number) = args.hover
    && let Some(object) = session.objects().iter().find(|o| o.display_number() == number)
  {
    let (width, height) = session.dimensions();
    let (cx, cy) = object.bbox.center();
    let point = (
      cx / NORMALIZED_SCALE * width as f64,
      cy / NORMALIZED_SCALE * height as f64,
    );
    session.pointer_move(point);
    info!(
      "指针 ({:.0}, {:.0}) 命中 {:?}",
      point.0,
      point.1,
      session.selection().hovered().map(ObjectId::as_str)
    );
  }

  output.render_result(session.image(), &session.overlay_scene())?;
  Ok(())
}
