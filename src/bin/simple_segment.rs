// 该文件是 Jianying （剪影） 项目的一部分。
// src/bin/simple_segment.rs - 分割并输出覆盖层预览
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use jianying::{
  FromUrl, ObjectId,
  input::ImageFileInput,
  output::{OutputWrapper, Render},
  service::GeminiService,
  session::EditSession,
  task::spawn_segmentation,
};
use tracing::{info, warn};

/// 分割图像并保存覆盖层预览
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 分割服务，例如 gemini:///gemini-2.5-flash
  #[arg(long, value_name = "SERVICE")]
  pub service: Url,
  /// 输入图像
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 选中的对象编号（从 1 开始）
  #[arg(long, value_name = "N", value_delimiter = ',')]
  pub select: Vec<usize>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("分割服务: {}", args.service);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let image = ImageFileInput::from_url(&args.input)?.into_image();
  let service = Arc::new(GeminiService::from_url(&args.service)?);
  let output = OutputWrapper::from_url(&args.output)?;

  let mut session = EditSession::new(image);
  let ticket = session.begin_segmentation();
  let pending = spawn_segmentation(service, session.image().clone(), ticket);
  pending.wait(&mut session)?;

  for object in session.objects() {
    info!(
      "#{} {}: {:?}",
      object.display_number(),
      object.display_label(),
      object.bbox.as_array()
    );
  }

  for number in &args.select {
    let Some(ordinal) = number.checked_sub(1) else {
      warn!("对象编号从 1 开始，忽略 0");
      continue;
    };
    session.toggle_selection(&ObjectId::from_ordinal(ordinal));
  }

  output.render_result(session.image(), &session.overlay_scene())?;
  Ok(())
}
