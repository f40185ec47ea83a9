// 该文件是 Jianying （剪影） 项目的一部分。
// src/selection.rs - 选择状态与命中测试
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

use tracing::debug;

use crate::object::{ObjectId, SegmentObject};

/// 命中测试：返回包含指针的对象中归一化面积最小的那个
///
/// `point` 是画布像素坐标，`canvas` 是画布像素尺寸。面积相同时取列表中靠前的对象。
pub fn hit_test<'a>(
  objects: &'a [SegmentObject],
  point: (f64, f64),
  canvas: (u32, u32),
) -> Option<&'a SegmentObject> {
  let (px, py) = point;
  objects
    .iter()
    .filter(|object| object.bbox.to_pixels(canvas.0, canvas.1).contains(px, py))
    .fold(None, |best: Option<&SegmentObject>, object| match best {
      Some(best) if best.bbox.area() <= object.bbox.area() => Some(best),
      _ => Some(object),
    })
}

/// 悬停与多选状态，由会话持有并显式传入各个函数
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionState {
  hovered: Option<ObjectId>,
  selected: Vec<ObjectId>,
}

impl SelectionState {
  pub fn hovered(&self) -> Option<&ObjectId> {
    self.hovered.as_ref()
  }

  /// 按加入顺序排列的选中对象
  pub fn selected(&self) -> &[ObjectId] {
    &self.selected
  }

  pub fn is_selected(&self, id: &ObjectId) -> bool {
    self.selected.contains(id)
  }

  pub fn is_hovered(&self, id: &ObjectId) -> bool {
    self.hovered.as_ref() == Some(id)
  }

  pub fn is_empty(&self) -> bool {
    self.selected.is_empty()
  }

  /// 未选中则加入，已选中则移除
  pub fn toggle(&mut self, id: &ObjectId) {
    if let Some(pos) = self.selected.iter().position(|s| s == id) {
      self.selected.remove(pos);
      debug!("取消选择 {}", id);
    } else {
      self.selected.push(id.clone());
      debug!("选择 {}", id);
    }
  }

  pub fn remove(&mut self, id: &ObjectId) {
    self.selected.retain(|s| s != id);
  }

  pub fn clear(&mut self) {
    self.selected.clear();
  }

  pub fn set_hover(&mut self, id: Option<ObjectId>) {
    self.hovered = id;
  }

  /// 清空选择与悬停，切换图像或重新分割时使用
  pub fn reset(&mut self) {
    self.hovered = None;
    self.selected.clear();
  }

  /// 按选择顺序解析出对象引用，已经不存在的对象被忽略
  pub fn selected_objects<'a>(&self, objects: &'a [SegmentObject]) -> Vec<&'a SegmentObject> {
    self
      .selected
      .iter()
      .filter_map(|id| objects.iter().find(|object| &object.id == id))
      .collect()
  }

  /// 去掉对象列表里已经没有的 id
  pub fn retain_existing(&mut self, objects: &[SegmentObject]) {
    self
      .selected
      .retain(|id| objects.iter().any(|object| &object.id == id));
    if let Some(hovered) = &self.hovered
      && !objects.iter().any(|object| &object.id == hovered)
    {
      self.hovered = None;
    }
  }

  /// 指针移动：每次都重新做命中测试，只更新悬停状态
  ///
  /// 返回悬停是否发生了变化。`active` 为 false 时不做任何事。
  pub fn pointer_move(
    &mut self,
    objects: &[SegmentObject],
    point: (f64, f64),
    canvas: (u32, u32),
    active: bool,
  ) -> bool {
    if !active {
      return false;
    }
    let hit = hit_test(objects, point, canvas).map(|object| object.id.clone());
    if hit == self.hovered {
      return false;
    }
    self.hovered = hit;
    true
  }

  /// 指针点击：命中对象时切换其选择状态
  pub fn pointer_click(
    &mut self,
    objects: &[SegmentObject],
    point: (f64, f64),
    canvas: (u32, u32),
    active: bool,
  ) -> Option<ObjectId> {
    if !active {
      return None;
    }
    let id = hit_test(objects, point, canvas)?.id.clone();
    self.toggle(&id);
    Some(id)
  }
}
