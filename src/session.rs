// 该文件是 Jianying （剪影） 项目的一部分。
// src/session.rs - 编辑会话状态
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

use image::DynamicImage;
use tracing::{debug, info, warn};

use crate::{
  composite::{CompositeError, EditTarget, build_edit_mask},
  geometry::Viewport,
  object::{ObjectId, SegmentObject},
  overlay::OverlayScene,
  raster::MaskFile,
  selection::SelectionState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
  #[default]
  Idle,
  Segmenting,
  Editing,
}

/// 一次异步请求的代号，只有与会话当前代号一致时结果才会被采用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

impl Ticket {
  pub fn generation(&self) -> u64 {
    self.0
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
  Applied,
  /// 结果已经过期，被丢弃
  Stale,
}

/// 线性编辑历史
#[derive(Debug, Clone)]
pub struct EditHistory {
  images: Vec<DynamicImage>,
  index: usize,
}

impl EditHistory {
  pub fn new(image: DynamicImage) -> Self {
    Self {
      images: vec![image],
      index: 0,
    }
  }

  pub fn current(&self) -> &DynamicImage {
    &self.images[self.index]
  }

  pub fn index(&self) -> usize {
    self.index
  }

  pub fn len(&self) -> usize {
    self.images.len()
  }

  pub fn is_empty(&self) -> bool {
    self.images.is_empty()
  }

  /// 追加新图像，丢弃当前位置之后的重做分支
  pub fn push(&mut self, image: DynamicImage) {
    self.images.truncate(self.index + 1);
    self.images.push(image);
    self.index = self.images.len() - 1;
  }

  pub fn can_undo(&self) -> bool {
    self.index > 0
  }

  pub fn can_redo(&self) -> bool {
    self.index + 1 < self.images.len()
  }

  pub fn undo(&mut self) -> bool {
    if !self.can_undo() {
      return false;
    }
    self.index -= 1;
    true
  }

  pub fn redo(&mut self) -> bool {
    if !self.can_redo() {
      return false;
    }
    self.index += 1;
    true
  }
}

/// 会话控制器：持有当前图像、对象列表与选择状态
///
/// 所有状态修改都在调用方线程上同步进行。耗时的服务调用在后台执行，
/// 结果通过 [`Ticket`] 回到这里，过期的结果不会覆盖较新的状态。
#[derive(Debug, Clone)]
pub struct EditSession {
  history: EditHistory,
  objects: Vec<SegmentObject>,
  selection: SelectionState,
  phase: SessionPhase,
  generation: u64,
  revision: u64,
}

impl EditSession {
  pub fn new(image: DynamicImage) -> Self {
    Self {
      history: EditHistory::new(image),
      objects: Vec::new(),
      selection: SelectionState::default(),
      phase: SessionPhase::Idle,
      generation: 0,
      revision: 0,
    }
  }

  pub fn image(&self) -> &DynamicImage {
    self.history.current()
  }

  pub fn dimensions(&self) -> (u32, u32) {
    let image = self.image();
    (image.width(), image.height())
  }

  pub fn history(&self) -> &EditHistory {
    &self.history
  }

  pub fn objects(&self) -> &[SegmentObject] {
    &self.objects
  }

  pub fn selection(&self) -> &SelectionState {
    &self.selection
  }

  pub fn phase(&self) -> SessionPhase {
    self.phase
  }

  pub fn generation(&self) -> u64 {
    self.generation
  }

  /// 只有空闲时才允许命中测试与选择
  pub fn is_active(&self) -> bool {
    self.phase == SessionPhase::Idle
  }

  fn is_current(&self, ticket: Ticket) -> bool {
    ticket.0 == self.generation
  }

  fn next_ticket(&mut self) -> Ticket {
    self.generation += 1;
    Ticket(self.generation)
  }

  /// 图像变化后，旧的对象与选择全部作废
  fn invalidate(&mut self) {
    self.generation += 1;
    self.revision += 1;
    self.objects.clear();
    self.selection.reset();
    self.phase = SessionPhase::Idle;
  }

  /// 换一张新图，历史重新开始
  pub fn load_image(&mut self, image: DynamicImage) {
    info!("载入新图像: {}x{}", image.width(), image.height());
    self.history = EditHistory::new(image);
    self.invalidate();
  }

  pub fn begin_segmentation(&mut self) -> Ticket {
    let ticket = self.next_ticket();
    self.phase = SessionPhase::Segmenting;
    self.selection.set_hover(None);
    debug!("开始分割, 代号 {}", ticket.0);
    ticket
  }

  /// 用新的对象列表整体替换旧列表
  pub fn finish_segmentation(
    &mut self,
    ticket: Ticket,
    objects: Vec<SegmentObject>,
  ) -> ApplyOutcome {
    if !self.is_current(ticket) {
      warn!(
        "丢弃过期的分割结果: 代号 {}, 当前 {}",
        ticket.0, self.generation
      );
      return ApplyOutcome::Stale;
    }

    info!("采用分割结果: {} 个对象", objects.len());
    self.objects = objects;
    self.selection.reset();
    self.revision += 1;
    self.phase = SessionPhase::Idle;
    ApplyOutcome::Applied
  }

  pub fn fail_segmentation(&mut self, ticket: Ticket) -> ApplyOutcome {
    if !self.is_current(ticket) {
      return ApplyOutcome::Stale;
    }
    self.phase = SessionPhase::Idle;
    ApplyOutcome::Applied
  }

  pub fn begin_edit(&mut self) -> Ticket {
    let ticket = self.next_ticket();
    self.phase = SessionPhase::Editing;
    self.selection.set_hover(None);
    debug!("开始编辑, 代号 {}", ticket.0);
    ticket
  }

  /// 编辑成功：新图像进入历史，旧对象作废
  pub fn finish_edit(&mut self, ticket: Ticket, image: DynamicImage) -> ApplyOutcome {
    if !self.is_current(ticket) {
      warn!(
        "丢弃过期的编辑结果: 代号 {}, 当前 {}",
        ticket.0, self.generation
      );
      return ApplyOutcome::Stale;
    }

    info!("采用编辑结果: {}x{}", image.width(), image.height());
    self.history.push(image);
    self.invalidate();
    ApplyOutcome::Applied
  }

  pub fn fail_edit(&mut self, ticket: Ticket) -> ApplyOutcome {
    self.fail_segmentation(ticket)
  }

  pub fn undo(&mut self) -> bool {
    if !self.history.undo() {
      return false;
    }
    debug!("撤销到第 {} 步", self.history.index());
    self.invalidate();
    true
  }

  pub fn redo(&mut self) -> bool {
    if !self.history.redo() {
      return false;
    }
    debug!("重做到第 {} 步", self.history.index());
    self.invalidate();
    true
  }

  /// 把显示坐标换算为图像像素坐标
  pub fn screen_to_canvas(&self, displayed: (f64, f64), sx: f64, sy: f64) -> Option<(f64, f64)> {
    Viewport::new(displayed, self.dimensions()).screen_to_canvas(sx, sy)
  }

  /// `point` 为图像像素坐标，返回悬停是否变化
  pub fn pointer_move(&mut self, point: (f64, f64)) -> bool {
    let canvas = self.dimensions();
    let active = self.is_active();
    self
      .selection
      .pointer_move(&self.objects, point, canvas, active)
  }

  pub fn click(&mut self, point: (f64, f64)) -> Option<ObjectId> {
    let canvas = self.dimensions();
    let active = self.is_active();
    self
      .selection
      .pointer_click(&self.objects, point, canvas, active)
  }

  /// 切换某个对象的选择状态，忙碌时或对象未知时不做任何事
  pub fn toggle_selection(&mut self, id: &ObjectId) -> bool {
    if !self.is_active() {
      debug!("会话忙碌，忽略对 {} 的选择", id);
      return false;
    }
    if !self.objects.iter().any(|object| &object.id == id) {
      warn!("忽略未知对象 {}", id);
      return false;
    }
    self.selection.toggle(id);
    true
  }

  pub fn clear_selection(&mut self) {
    self.selection.clear();
  }

  pub fn remove_from_selection(&mut self, id: &ObjectId) {
    self.selection.remove(id);
  }

  pub fn selected_objects(&self) -> Vec<&SegmentObject> {
    self.selection.selected_objects(&self.objects)
  }

  /// 根据当前选择构造编辑掩码；`whole_image` 为真时忽略选择
  pub fn build_edit_mask(&self, whole_image: bool) -> Result<MaskFile, CompositeError> {
    let (width, height) = self.dimensions();
    if whole_image {
      return build_edit_mask(EditTarget::WholeImage, width, height);
    }
    let selected = self.selected_objects();
    build_edit_mask(EditTarget::Objects(&selected), width, height)
  }

  pub fn overlay_scene(&self) -> OverlayScene<'_> {
    OverlayScene {
      objects: &self.objects,
      selection: &self.selection,
      active: self.is_active(),
      image_size: self.dimensions(),
      revision: self.revision,
    }
  }
}

#[cfg(test)]
mod tests {
  use image::{GrayImage, RgbImage};

  use super::*;
  use crate::{
    align::align_masks_to,
    object::{objects_from_detections, tests::white_mask_url},
    parser::Detection,
  };

  fn image(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::new(width, height))
  }

  fn aligned_objects(boxes: &[[f64; 4]], width: u32, height: u32) -> Vec<SegmentObject> {
    let detections = boxes
      .iter()
      .map(|&box_2d| Detection {
        box_2d,
        mask: white_mask_url(8, 8),
        label: None,
      })
      .collect();
    align_masks_to(objects_from_detections(detections), width, height).unwrap()
  }

  fn segmented_session() -> EditSession {
    let mut session = EditSession::new(image(100, 100));
    let ticket = session.begin_segmentation();
    let objects = aligned_objects(&[[0.0, 0.0, 500.0, 500.0], [500.0, 500.0, 1000.0, 1000.0]], 100, 100);
    assert_eq!(session.finish_segmentation(ticket, objects), ApplyOutcome::Applied);
    session
  }

  #[test]
  fn history_push_truncates_redo_branch() {
    let mut history = EditHistory::new(image(1, 1));
    history.push(image(2, 2));
    history.push(image(3, 3));
    assert!(history.undo());
    assert!(history.undo());
    assert!(!history.undo());
    history.push(image(4, 4));
    assert_eq!(history.len(), 2);
    assert_eq!(history.current().width(), 4);
    assert!(!history.redo());
  }

  #[test]
  fn stale_segmentation_never_overwrites_newer_one() {
    let mut session = EditSession::new(image(100, 100));
    let first = session.begin_segmentation();
    let second = session.begin_segmentation();

    let newer = aligned_objects(&[[0.0, 0.0, 1000.0, 1000.0]], 100, 100);
    assert_eq!(session.finish_segmentation(second, newer), ApplyOutcome::Applied);

    let older = aligned_objects(&[[0.0, 0.0, 100.0, 100.0], [200.0, 200.0, 300.0, 300.0]], 100, 100);
    assert_eq!(session.finish_segmentation(first, older), ApplyOutcome::Stale);
    assert_eq!(session.objects().len(), 1);
    assert!(session.is_active());
  }

  #[test]
  fn undo_during_segmentation_discards_result() {
    let mut session = EditSession::new(image(100, 100));
    let edit = session.begin_edit();
    assert_eq!(session.finish_edit(edit, image(100, 100)), ApplyOutcome::Applied);

    let ticket = session.begin_segmentation();
    assert!(session.undo());
    let objects = aligned_objects(&[[0.0, 0.0, 1000.0, 1000.0]], 100, 100);
    assert_eq!(session.finish_segmentation(ticket, objects), ApplyOutcome::Stale);
    assert!(session.objects().is_empty());
  }

  #[test]
  fn interaction_is_gated_while_busy() {
    let mut session = segmented_session();
    session.begin_segmentation();
    assert!(!session.is_active());
    assert_eq!(session.click((10.0, 10.0)), None);
    assert!(!session.pointer_move((10.0, 10.0)));
    assert!(!session.overlay_scene().active);
  }

  #[test]
  fn toggle_is_ignored_while_busy() {
    let mut session = segmented_session();
    session.begin_segmentation();
    assert!(!session.toggle_selection(&ObjectId::from_ordinal(0)));
    assert!(session.selection().is_empty());

    let mut session = segmented_session();
    session.begin_edit();
    assert!(!session.toggle_selection(&ObjectId::from_ordinal(1)));
    assert!(session.selection().is_empty());
  }

  #[test]
  fn click_and_hover_go_through_viewport() {
    let mut session = segmented_session();
    // 显示为 50x50，坐标放大两倍
    let point = session.screen_to_canvas((50.0, 50.0), 40.0, 40.0).unwrap();
    assert_eq!(point, (80.0, 80.0));
    assert!(session.pointer_move(point));
    assert_eq!(session.click(point), Some(ObjectId::from_ordinal(1)));
    assert!(session.selection().is_selected(&ObjectId::from_ordinal(1)));
  }

  #[test]
  fn undo_redo_clear_selection_and_objects() {
    let mut session = EditSession::new(image(100, 100));
    let edit = session.begin_edit();
    session.finish_edit(edit, image(100, 100));

    let ticket = session.begin_segmentation();
    let objects = aligned_objects(&[[0.0, 0.0, 1000.0, 1000.0]], 100, 100);
    session.finish_segmentation(ticket, objects);
    assert!(session.toggle_selection(&ObjectId::from_ordinal(0)));

    assert!(session.undo());
    assert!(session.selection().is_empty());
    assert!(session.objects().is_empty());
    assert!(session.redo());
    assert!(!session.redo());
  }

  #[test]
  fn edit_mask_follows_selection() {
    let mut session = segmented_session();
    assert!(matches!(session.build_edit_mask(false), Err(CompositeError::Empty)));

    session.toggle_selection(&ObjectId::from_ordinal(0));
    let mask: GrayImage = session.build_edit_mask(false).unwrap().decode_gray().unwrap();
    assert_eq!(mask.dimensions(), (100, 100));
    assert_eq!(mask.get_pixel(10, 10).0[0], 255);
    assert_eq!(mask.get_pixel(90, 90).0[0], 0);

    let whole = session.build_edit_mask(true).unwrap().decode_gray().unwrap();
    assert!(whole.pixels().all(|p| p.0[0] == 255));
  }

  #[test]
  fn unknown_ids_are_ignored() {
    let mut session = segmented_session();
    assert!(!session.toggle_selection(&ObjectId::from("obj_9")));
    session.toggle_selection(&ObjectId::from_ordinal(0));
    session.remove_from_selection(&ObjectId::from_ordinal(0));
    assert!(session.selection().is_empty());
  }
}
