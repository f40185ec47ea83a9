// 该文件是 Jianying （剪影） 项目的一部分。
// src/service/gemini.rs - Gemini generateContent 服务客户端
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

use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  raster::{MaskFile, decode_data_url},
  service::{
    EditReply, EditRequest, EditService, SegmentRequest, SegmentationService, ServiceError,
    ServiceKind,
  },
};

const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_KEY_ENV: &str = "GEMINI_API_KEY";
const FINISH_STOP: &str = "STOP";

#[derive(Error, Debug)]
pub enum GeminiServiceError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch { expected: &'static str, actual: String },
  #[error("URI 中缺少模型名称")]
  MissingModel,
  #[error("环境变量 {0} 中没有 API 密钥")]
  MissingKey(String),
  #[error("参数 {0} 无效: {1}")]
  InvalidParameter(String, String),
}

/// Gemini 服务客户端
///
/// 通过 `gemini:///<model>?key_env=<ENV>&endpoint=<url>&timeout_secs=<n>&temperature=<t>` 配置。
pub struct GeminiService {
  agent: ureq::Agent,
  endpoint: String,
  model: String,
  api_key: String,
  temperature: Option<f32>,
}

impl FromUrlWithScheme for GeminiService {
  const SCHEME: &'static str = "gemini";
}

impl FromUrl for GeminiService {
  type Error = GeminiServiceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GeminiServiceError::SchemeMismatch {
        expected: Self::SCHEME,
        actual: url.scheme().to_string(),
      });
    }

    let model = url.path().trim_matches('/').to_string();
    if model.is_empty() {
      return Err(GeminiServiceError::MissingModel);
    }

    let query_pairs: HashMap<_, _> = url.query_pairs().collect();
    let key_env = query_pairs
      .get("key_env")
      .map(|v| v.to_string())
      .unwrap_or_else(|| DEFAULT_KEY_ENV.to_string());
    let api_key =
      std::env::var(&key_env).map_err(|_| GeminiServiceError::MissingKey(key_env.clone()))?;
    let endpoint = query_pairs
      .get("endpoint")
      .map(|v| v.trim_end_matches('/').to_string())
      .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());

    let temperature = match query_pairs.get("temperature") {
      Some(v) => Some(v.parse::<f32>().map_err(|e| {
        GeminiServiceError::InvalidParameter("temperature".into(), e.to_string())
      })?),
      None => None,
    };

    let mut builder = ureq::AgentBuilder::new();
    if let Some(v) = query_pairs.get("timeout_secs") {
      let secs = v.parse::<u64>().map_err(|e| {
        GeminiServiceError::InvalidParameter("timeout_secs".into(), e.to_string())
      })?;
      builder = builder.timeout(Duration::from_secs(secs));
    }

    info!("Gemini 服务: 模型 {}, 端点 {}", model, endpoint);
    Ok(GeminiService {
      agent: builder.build(),
      endpoint,
      model,
      api_key,
      temperature,
    })
  }
}

impl GeminiService {
  fn generate(&self, kind: ServiceKind, body: &GenerateRequest) -> Result<GenerateResponse, ServiceError> {
    let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
    debug!("POST {}", url);

    let response = self
      .agent
      .post(&url)
      .set("x-goog-api-key", &self.api_key)
      .send_json(body)
      .map_err(|e| transport_error(kind, e))?;

    response
      .into_json::<GenerateResponse>()
      .map_err(|e| ServiceError::InvalidResponse {
        kind,
        message: e.to_string(),
      })
  }
}

fn transport_error(kind: ServiceKind, err: ureq::Error) -> ServiceError {
  let message = match err {
    ureq::Error::Status(code, response) => {
      let body = response.into_string().unwrap_or_default();
      format!("HTTP {}: {}", code, body.trim())
    }
    ureq::Error::Transport(transport) => transport.to_string(),
  };
  error!("{}请求失败: {}", kind, message);
  ServiceError::Transport { kind, message }
}

impl SegmentationService for GeminiService {
  fn segment(&self, request: &SegmentRequest) -> Result<String, ServiceError> {
    let body = GenerateRequest {
      contents: vec![Content::user(vec![
        Part::inline("image/jpeg", &request.image_jpeg),
        Part::text(request.prompt),
      ])],
      generation_config: GenerationConfig {
        temperature: self.temperature,
        response_modalities: None,
      },
    };

    let response = self.generate(ServiceKind::Segmentation, &body)?;
    segmentation_text(response)
  }
}

impl EditService for GeminiService {
  fn edit(&self, request: &EditRequest) -> Result<EditReply, ServiceError> {
    let instruction = format!(
      "Edit the first image. The second image is a mask: only change the white region, \
       keep every black pixel identical. Instruction: {}",
      request.instruction
    );
    let body = GenerateRequest {
      contents: vec![Content::user(vec![
        Part::inline("image/png", &request.image_png),
        Part::inline(MaskFile::MIME, request.mask.bytes()),
        Part::text(&instruction),
      ])],
      generation_config: GenerationConfig {
        temperature: self.temperature,
        response_modalities: Some(vec!["TEXT".into(), "IMAGE".into()]),
      },
    };

    let response = self.generate(ServiceKind::Edit, &body)?;
    classify_edit_reply(response)
  }
}

/// 拼接分割回复中的文本
fn segmentation_text(response: GenerateResponse) -> Result<String, ServiceError> {
  if let Some(reason) = response.block_reason() {
    return Err(ServiceError::InvalidResponse {
      kind: ServiceKind::Segmentation,
      message: format!("请求被拦截: {}", reason),
    });
  }

  let text: String = response
    .candidates
    .into_iter()
    .next()
    .and_then(|c| c.content)
    .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
    .unwrap_or_default();
  Ok(text)
}

/// 区分生成图像、文本拒绝与拦截
fn classify_edit_reply(response: GenerateResponse) -> Result<EditReply, ServiceError> {
  if let Some(reason) = response.block_reason() {
    return Ok(EditReply::Blocked { reason });
  }

  let Some(candidate) = response.candidates.into_iter().next() else {
    return Err(ServiceError::InvalidResponse {
      kind: ServiceKind::Edit,
      message: "回复中没有候选结果".into(),
    });
  };

  let parts = candidate.content.map(|c| c.parts).unwrap_or_default();
  let mut texts = Vec::new();
  for part in parts {
    if let Some(data) = part.inline_data {
      let bytes = decode_data_url(&data.data).map_err(|e| ServiceError::InvalidResponse {
        kind: ServiceKind::Edit,
        message: e.to_string(),
      })?;
      return Ok(EditReply::Image(bytes));
    }
    if let Some(text) = part.text {
      texts.push(text);
    }
  }

  match candidate.finish_reason {
    Some(reason) if reason != FINISH_STOP => Ok(EditReply::Blocked { reason }),
    _ => {
      let text = texts.join("\n").trim().to_string();
      Ok(EditReply::Refused {
        text: if text.is_empty() {
          "模型没有返回图像".to_string()
        } else {
          text
        },
      })
    }
  }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
  contents: Vec<Content>,
  generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
  #[serde(skip_serializing_if = "Option::is_none")]
  temperature: Option<f32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_modalities: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Content {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  role: Option<String>,
  #[serde(default)]
  parts: Vec<Part>,
}

impl Content {
  fn user(parts: Vec<Part>) -> Self {
    Content {
      role: Some("user".into()),
      parts,
    }
  }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  text: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  inline_data: Option<InlineData>,
}

impl Part {
  fn text(text: &str) -> Self {
    Part {
      text: Some(text.to_string()),
      inline_data: None,
    }
  }

  fn inline(mime_type: &str, bytes: &[u8]) -> Self {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    Part {
      text: None,
      inline_data: Some(InlineData {
        mime_type: mime_type.to_string(),
        data: STANDARD.encode(bytes),
      }),
    }
  }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
  mime_type: String,
  data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
  #[serde(default)]
  candidates: Vec<Candidate>,
  #[serde(default)]
  prompt_feedback: Option<PromptFeedback>,
}

impl GenerateResponse {
  fn block_reason(&self) -> Option<String> {
    self
      .prompt_feedback
      .as_ref()
      .and_then(|feedback| feedback.block_reason.clone())
  }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
  #[serde(default)]
  content: Option<Content>,
  #[serde(default)]
  finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
  #[serde(default)]
  block_reason: Option<String>,
}
