// 该文件是 Jianying （剪影） 项目的一部分。
// src/parser.rs - 分割模型文本响应解析
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

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

/// 标签搜索窗口（字节），从 mask 匹配结束处开始
const LABEL_WINDOW: usize = 200;

static JSON_FENCE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"```json\s*([\s\S]*?)```").expect("JSON 代码块正则无效"));

static ANY_FENCE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"```[^\n`]*\n?([\s\S]*?)```").expect("代码块正则无效"));

static BOX_MASK_PAIR: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(concat!(
    r#""box_2d"\s*:\s*\[\s*(-?[\d.]+)\s*,\s*(-?[\d.]+)\s*,\s*(-?[\d.]+)\s*,\s*(-?[\d.]+)\s*\]"#,
    r#"[\s\S]*?"mask"\s*:\s*"(data:image/[A-Za-z0-9.+-]+;base64,[A-Za-z0-9+/=\s]+)""#,
  ))
  .expect("box/mask 正则无效")
});

static LABEL_FIELD: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r#""label"\s*:\s*"([^"]*)""#).expect("label 正则无效"));

/// 未经校验的检测候选项，坐标仍在 0 - 1000 归一化空间
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub box_2d: [f64; 4],
  pub mask: String,
  pub label: Option<String>,
}

/// 解析分割服务返回的原始文本
///
/// 优先按 JSON 严格解析；只有严格解析报错时才退回正则扫描。
/// 严格解析成功但没有合法条目时直接返回空列表，不会触发回退。
pub fn parse_response(raw: &str) -> Vec<Detection> {
  let payload = strip_fence(raw);

  match serde_json::from_str::<Value>(payload) {
    Ok(value) => {
      let detections = detections_from_value(&value);
      debug!("JSON 解析得到 {} 个候选对象", detections.len());
      detections
    }
    Err(e) => {
      debug!("JSON 解析失败（{}），改用正则扫描", e);
      let detections = scan_with_regex(raw);
      if detections.is_empty() {
        warn!("正则扫描也没有找到任何对象");
      } else {
        debug!("正则扫描找回 {} 个候选对象", detections.len());
      }
      detections
    }
  }
}

/// 取出代码块内部内容，优先 ```json 代码块
fn strip_fence(raw: &str) -> &str {
  let captured = JSON_FENCE
    .captures(raw)
    .or_else(|| ANY_FENCE.captures(raw))
    .and_then(|caps| caps.get(1));

  match captured {
    Some(inner) => inner.as_str().trim(),
    None => raw.trim(),
  }
}

fn detections_from_value(value: &Value) -> Vec<Detection> {
  let entries: Vec<&Value> = match value {
    Value::Array(items) => items.iter().collect(),
    Value::Object(_) => vec![value],
    _ => Vec::new(),
  };

  let total = entries.len();
  let detections: Vec<Detection> = entries.into_iter().filter_map(detection_from_entry).collect();
  if detections.len() < total {
    warn!("丢弃了 {} 个格式不正确的条目", total - detections.len());
  }
  detections
}

fn detection_from_entry(entry: &Value) -> Option<Detection> {
  let coords = entry.get("box_2d")?.as_array()?;
  if coords.len() != 4 {
    return None;
  }

  let mut box_2d = [0.0; 4];
  for (slot, value) in box_2d.iter_mut().zip(coords) {
    *slot = value.as_f64()?;
  }

  let mask = entry.get("mask")?.as_str()?;
  if mask.trim().is_empty() {
    return None;
  }

  let label = entry.get("label").and_then(Value::as_str).map(str::to_string);

  Some(Detection {
    box_2d,
    mask: mask.to_string(),
    label,
  })
}

fn scan_with_regex(raw: &str) -> Vec<Detection> {
  let mut detections = Vec::new();

  for caps in BOX_MASK_PAIR.captures_iter(raw) {
    let mut box_2d = [0.0; 4];
    let parsed = (1..=4).all(|i| match caps[i].parse::<f64>() {
      Ok(v) => {
        box_2d[i - 1] = v;
        true
      }
      Err(_) => false,
    });
    if !parsed {
      continue;
    }

    let mask: String = caps[5].chars().filter(|c| !c.is_whitespace()).collect();
    let end = caps.get(0).map(|m| m.end()).unwrap_or(raw.len());

    detections.push(Detection {
      box_2d,
      mask,
      label: trailing_label(raw, end),
    });
  }

  detections
}

/// 在 mask 之后的有限窗口里查找同一条目的 label
fn trailing_label(raw: &str, from: usize) -> Option<String> {
  let mut end = (from + LABEL_WINDOW).min(raw.len());
  while !raw.is_char_boundary(end) {
    end -= 1;
  }

  let mut window = &raw[from..end];
  // 不要越过下一个条目
  if let Some(next) = window.find("\"box_2d\"") {
    window = &window[..next];
  }

  LABEL_FIELD
    .captures(window)
    .and_then(|caps| caps.get(1))
    .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
  use super::*;

  const MASK_A: &str = "data:image/png;base64,iVBORw0KGgoAAAA";
  const MASK_B: &str = "data:image/png;base64,AAAABBBBCCCC";
  const MASK_C: &str = "data:image/png;base64,ZZZZ+/==";

  fn three_entries() -> String {
    format!(
      r#"[
  {{"box_2d": [10, 20, 300, 400], "mask": "{MASK_A}", "label": "cat"}},
  {{"box_2d": [0, 0, 1000, 1000], "mask": "{MASK_B}", "label": "sofa"}},
  {{"box_2d": [500, 500, 600, 650], "mask": "{MASK_C}"}}
]"#
    )
  }

  #[test]
  fn parses_well_formed_array() {
    let detections = parse_response(&three_entries());
    assert_eq!(detections.len(), 3);
    assert_eq!(detections[0].box_2d, [10.0, 20.0, 300.0, 400.0]);
    assert_eq!(detections[0].mask, MASK_A);
    assert_eq!(detections[0].label.as_deref(), Some("cat"));
    assert_eq!(detections[1].label.as_deref(), Some("sofa"));
    assert_eq!(detections[2].label, None);
  }

  #[test]
  fn fenced_payload_matches_bare_payload() {
    let bare = parse_response(&three_entries());
    let fenced = parse_response(&format!(
      "Here are the objects:\n```json\n{}\n```\nLet me know!",
      three_entries()
    ));
    assert_eq!(bare, fenced);

    let untagged = parse_response(&format!("```\n{}\n```", three_entries()));
    assert_eq!(bare, untagged);
  }

  #[test]
  fn json_fence_wins_over_earlier_fences() {
    let bare = parse_response(&three_entries());
    let raw = format!(
      "I looked at the image:\n```\nthree objects, all furniture\n```\n\
       ```python\nprint(masks)\n```\n```json\n{}\n```",
      three_entries()
    );
    assert_eq!(parse_response(&raw), bare);
  }

  #[test]
  fn single_object_is_one_entry() {
    let raw = format!(r#"{{"box_2d": [1, 2, 3, 4], "mask": "{MASK_A}"}}"#);
    let detections = parse_response(&raw);
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].box_2d, [1.0, 2.0, 3.0, 4.0]);
  }

  #[test]
  fn malformed_entries_are_dropped() {
    let raw = format!(
      r#"[
  {{"box_2d": [1, 2, 3], "mask": "{MASK_A}"}},
  {{"box_2d": [1, 2, 3, 4], "mask": ""}},
  {{"box_2d": [1, 2, 3, 4]}},
  {{"box_2d": [1, "x", 3, 4], "mask": "{MASK_A}"}},
  {{"box_2d": [5, 6, 7, 8], "mask": "{MASK_B}", "label": 42}}
]"#
    );
    let detections = parse_response(&raw);
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].box_2d, [5.0, 6.0, 7.0, 8.0]);
    assert_eq!(detections[0].label, None);
  }

  #[test]
  fn falls_back_to_regex_when_json_is_broken() {
    let raw = format!(
      r#"[{{"box_2d": [100, 150, 400, 450], "confidence": 0.9, "mask": "{MASK_A}", "label": "lamp"}}]
Note: the lamp is partially occluded."#
    );
    let detections = parse_response(&raw);
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].box_2d, [100.0, 150.0, 400.0, 450.0]);
    assert_eq!(detections[0].mask, MASK_A);
    assert_eq!(detections[0].label.as_deref(), Some("lamp"));
  }

  #[test]
  fn regex_label_does_not_leak_from_next_entry() {
    let raw = format!(
      r#"[{{"box_2d": [1, 2, 3, 4], "mask": "{MASK_A}"}}, {{"box_2d": [5, 6, 7, 8], "mask": "{MASK_B}", "label": "second"}}, oops"#
    );
    let detections = parse_response(&raw);
    assert_eq!(detections.len(), 2);
    assert_eq!(detections[0].label, None);
    assert_eq!(detections[1].label.as_deref(), Some("second"));
  }

  #[test]
  fn empty_or_irrelevant_text_yields_nothing() {
    assert!(parse_response("").is_empty());
    assert!(parse_response("I could not find any objects in this image.").is_empty());
    assert!(parse_response("[]").is_empty());
    assert!(parse_response("42").is_empty());
  }

  #[test]
  fn structured_parse_with_no_valid_entries_does_not_fall_back() {
    // JSON 合法但条目无效：不应该再去正则扫描字符串里的内容
    let raw = format!(r#"{{"note": "\"box_2d\": [1, 2, 3, 4], \"mask\": \"{MASK_A}\""}}"#);
    assert!(parse_response(&raw).is_empty());
  }
}
