// 该文件是 Jianying （剪影） 项目的一部分。
// src/task.rs - 后台分割 / 编辑任务
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
  sync::{
    Arc,
    mpsc::{self, Receiver, TryRecvError},
  },
  thread,
  time::Instant,
};

use image::DynamicImage;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  align::{AlignError, align_masks},
  object::SegmentObject,
  raster::MaskFile,
  service::{EditError, EditService, SegmentError, SegmentationService, request_edit, segment},
  session::{ApplyOutcome, EditSession, Ticket},
};

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("分割失败: {0}")]
  Segment(#[from] SegmentError),
  #[error("掩码对齐失败: {0}")]
  Align(#[from] AlignError),
  #[error("编辑失败: {0}")]
  Edit(#[from] EditError),
  #[error("后台线程意外退出")]
  WorkerLost,
}

/// 后台任务的产出如何回到会话
pub trait TaskOutput: Send + 'static {
  fn apply(self, session: &mut EditSession, ticket: Ticket) -> ApplyOutcome;
  fn fail(session: &mut EditSession, ticket: Ticket) -> ApplyOutcome;
}

impl TaskOutput for Vec<SegmentObject> {
  fn apply(self, session: &mut EditSession, ticket: Ticket) -> ApplyOutcome {
    session.finish_segmentation(ticket, self)
  }

  fn fail(session: &mut EditSession, ticket: Ticket) -> ApplyOutcome {
    session.fail_segmentation(ticket)
  }
}

impl TaskOutput for DynamicImage {
  fn apply(self, session: &mut EditSession, ticket: Ticket) -> ApplyOutcome {
    session.finish_edit(ticket, self)
  }

  fn fail(session: &mut EditSession, ticket: Ticket) -> ApplyOutcome {
    session.fail_edit(ticket)
  }
}

/// 正在后台执行的任务
///
/// 结果只通过会话的代号检查生效；过期任务的成功与失败都不会改动会话。
pub struct Pending<T> {
  ticket: Ticket,
  receiver: Receiver<Result<T, TaskError>>,
}

pub type PendingSegmentation = Pending<Vec<SegmentObject>>;
pub type PendingEdit = Pending<DynamicImage>;

impl<T: TaskOutput> Pending<T> {
  pub fn ticket(&self) -> Ticket {
    self.ticket
  }

  /// 不阻塞地检查结果，任务仍在运行时返回 `None`
  pub fn try_finish(&self, session: &mut EditSession) -> Option<Result<ApplyOutcome, TaskError>> {
    match self.receiver.try_recv() {
      Ok(result) => Some(self.settle(session, result)),
      Err(TryRecvError::Empty) => None,
      Err(TryRecvError::Disconnected) => Some(self.settle(session, Err(TaskError::WorkerLost))),
    }
  }

  /// 阻塞等待任务结束
  pub fn wait(self, session: &mut EditSession) -> Result<ApplyOutcome, TaskError> {
    let result = self
      .receiver
      .recv()
      .unwrap_or(Err(TaskError::WorkerLost));
    self.settle(session, result)
  }

  fn settle(
    &self,
    session: &mut EditSession,
    result: Result<T, TaskError>,
  ) -> Result<ApplyOutcome, TaskError> {
    match result {
      Ok(output) => Ok(output.apply(session, self.ticket)),
      Err(e) => match T::fail(session, self.ticket) {
        ApplyOutcome::Applied => Err(e),
        ApplyOutcome::Stale => {
          warn!("忽略过期任务的错误: {}", e);
          Ok(ApplyOutcome::Stale)
        }
      },
    }
  }
}

fn spawn<T, F>(ticket: Ticket, job: F) -> Pending<T>
where
  T: TaskOutput,
  F: FnOnce() -> Result<T, TaskError> + Send + 'static,
{
  let (tx, rx) = mpsc::channel();
  thread::spawn(move || {
    // 接收端可能已经被丢弃
    let _ = tx.send(job());
  });
  Pending {
    ticket,
    receiver: rx,
  }
}

/// 在后台线程中完成分割与掩码对齐
pub fn spawn_segmentation<S>(
  service: Arc<S>,
  image: DynamicImage,
  ticket: Ticket,
) -> PendingSegmentation
where
  S: SegmentationService + Send + Sync + 'static,
{
  spawn(ticket, move || {
    info!("开始分割任务, 代号 {}", ticket.generation());
    let now = Instant::now();
    let objects = segment(service.as_ref(), &image)?;
    let elapsed = now.elapsed();
    let objects = align_masks(objects, &image)?;
    info!(
      "分割任务完成，耗时: {:.2?} / {:.2?}",
      elapsed,
      now.elapsed()
    );
    Ok(objects)
  })
}

/// 在后台线程中请求编辑
pub fn spawn_edit<S>(
  service: Arc<S>,
  image: DynamicImage,
  mask: MaskFile,
  instruction: String,
  ticket: Ticket,
) -> PendingEdit
where
  S: EditService + Send + Sync + 'static,
{
  spawn(ticket, move || {
    info!("开始编辑任务, 代号 {}", ticket.generation());
    let now = Instant::now();
    let edited = request_edit(service.as_ref(), &image, mask, &instruction)?;
    info!("编辑任务完成，耗时: {:.2?}", now.elapsed());
    Ok(edited)
  })
}

#[cfg(test)]
mod tests {
  use image::RgbImage;

  use super::*;
  use crate::{
    object::tests::white_mask_url,
    service::{EditReply, EditRequest, ServiceError, encode_png},
    session::SessionPhase,
  };

  struct Fixed(String);

  impl SegmentationService for Fixed {
    fn segment(&self, _request: &crate::service::SegmentRequest) -> Result<String, ServiceError> {
      Ok(self.0.clone())
    }
  }

  struct Repaint;

  impl EditService for Repaint {
    fn edit(&self, _request: &EditRequest) -> Result<EditReply, ServiceError> {
      let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(20, 10, image::Rgb([9, 9, 9])));
      let bytes = encode_png(&image).map_err(|e| ServiceError::InvalidResponse {
        kind: crate::service::ServiceKind::Edit,
        message: e.to_string(),
      })?;
      Ok(EditReply::Image(bytes))
    }
  }

  fn reply(boxes: &[[u32; 4]]) -> Arc<Fixed> {
    let entries: Vec<String> = boxes
      .iter()
      .map(|b| {
        format!(
          r#"{{"box_2d": [{}, {}, {}, {}], "mask": "{}"}}"#,
          b[0],
          b[1],
          b[2],
          b[3],
          white_mask_url(4, 4)
        )
      })
      .collect();
    Arc::new(Fixed(format!("[{}]", entries.join(","))))
  }

  fn image() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::new(20, 10))
  }

  #[test]
  fn segmentation_result_is_aligned_and_applied() {
    let mut session = EditSession::new(image());
    let ticket = session.begin_segmentation();
    let pending = spawn_segmentation(reply(&[[0, 0, 500, 500]]), session.image().clone(), ticket);
    assert_eq!(pending.wait(&mut session).unwrap(), ApplyOutcome::Applied);
    assert_eq!(session.phase(), SessionPhase::Idle);
    assert_eq!(session.objects().len(), 1);
    assert_eq!(session.objects()[0].mask.dimensions(), (20, 10));
  }

  #[test]
  fn superseded_segmentation_is_discarded() {
    let mut session = EditSession::new(image());
    let first = session.begin_segmentation();
    let old = spawn_segmentation(reply(&[[0, 0, 500, 500], [500, 500, 1000, 1000]]), image(), first);
    let second = session.begin_segmentation();
    let new = spawn_segmentation(reply(&[[0, 0, 1000, 1000]]), image(), second);

    assert_eq!(new.wait(&mut session).unwrap(), ApplyOutcome::Applied);
    assert_eq!(old.wait(&mut session).unwrap(), ApplyOutcome::Stale);
    assert_eq!(session.objects().len(), 1);
  }

  #[test]
  fn failures_return_session_to_idle() {
    let mut session = EditSession::new(image());
    let ticket = session.begin_segmentation();
    let pending = spawn_segmentation(Arc::new(Fixed("[]".into())), image(), ticket);
    assert!(matches!(
      pending.wait(&mut session),
      Err(TaskError::Segment(SegmentError::NoObjectsDetected))
    ));
    assert!(session.is_active());
  }

  #[test]
  fn edit_result_enters_history() {
    let mut session = EditSession::new(image());
    let mask = session.build_edit_mask(true).unwrap();
    let ticket = session.begin_edit();
    let pending = spawn_edit(Arc::new(Repaint), session.image().clone(), mask, "变暗".into(), ticket);
    assert_eq!(pending.wait(&mut session).unwrap(), ApplyOutcome::Applied);
    assert_eq!(session.history().len(), 2);
    assert!(session.history().can_undo());
  }
}
