// 该文件是 Jianying （剪影） 项目的一部分。
// src/bin/simple_edit.rs - 按选中对象或整图编辑
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

use std::sync::Arc;

use anyhow::{Result, bail};
use clap::Parser;
use url::Url;

use jianying::{
  FromUrl, ObjectId,
  input::ImageFileInput,
  output::{Render, SaveImageFileOutput},
  service::GeminiService,
  session::EditSession,
  task::{spawn_edit, spawn_segmentation},
};
use tracing::info;

/// 按选中对象（或整图）编辑图像
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 分割服务，整图编辑时不需要
  #[arg(long, value_name = "SERVICE")]
  pub service: Option<Url>,
  /// 编辑服务，例如 gemini:///gemini-2.5-flash-image
  #[arg(long, value_name = "SERVICE")]
  pub edit_service: Url,
  /// 输入图像
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出图像，例如 image:///tmp/edited.png
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 编辑指令
  #[arg(long)]
  pub instruction: String,
  /// 选中的对象编号（从 1 开始）
  #[arg(long, value_name = "N", value_delimiter = ',')]
  pub select: Vec<usize>,
  /// 编辑整张图，忽略选择
  #[arg(long)]
  pub whole_image: bool,
  /// 同时保存编辑掩码
  #[arg(long)]
  pub save_mask: bool,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("编辑服务: {}", args.edit_service);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let image = ImageFileInput::from_url(&args.input)?.into_image();
  let editor = Arc::new(GeminiService::from_url(&args.edit_service)?);
  let output = SaveImageFileOutput::from_url(&args.output)?;

  let mut session = EditSession::new(image);

  if !args.whole_image {
    let Some(service) = &args.service else {
      bail!("对象编辑需要 --service 指定分割服务");
    };
    let segmenter = Arc::new(GeminiService::from_url(service)?);
    let ticket = session.begin_segmentation();
    spawn_segmentation(segmenter, session.image().clone(), ticket).wait(&mut session)?;

    for number in args.select.iter().filter(|n| **n > 0) {
      session.toggle_selection(&ObjectId::from_ordinal(number - 1));
    }
    for object in session.selected_objects() {
      info!("编辑对象 #{} {}", object.display_number(), object.display_label());
    }
  }

  let mask = session.build_edit_mask(args.whole_image)?;
  let ticket = session.begin_edit();
  let pending = spawn_edit(
    editor,
    session.image().clone(),
    mask.clone(),
    args.instruction.clone(),
    ticket,
  );
  pending.wait(&mut session)?;

  output.render_result(session.image(), &session.overlay_scene())?;
  if args.save_mask {
    output.save_mask(&mask)?;
  }

  Ok(())
}
