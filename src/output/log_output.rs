// 该文件是 Qianli （千里眼） 项目的一部分。
// src/output/log_output.rs - 日志输出
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

use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{ClassifyItem, DecodeResult},
  output::Render,
  pipeline::FrameResult,
  query_map,
};

/// 分类结果只有置信度高于该值时才播报
pub const DEFAULT_DISPLAY_THRESHOLD: f32 = 0.9;

#[derive(Error, Debug)]
pub enum LogOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 把结果写入日志
///
/// ```text
/// log://?display=0.9
/// ```
#[derive(Debug, Clone, Copy)]
pub struct LogOutput {
  display_threshold: f32,
}

impl Default for LogOutput {
  fn default() -> Self {
    Self {
      display_threshold: DEFAULT_DISPLAY_THRESHOLD,
    }
  }
}

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogOutput {
  type Error = LogOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(LogOutputError::SchemeMismatch);
    }

    let display_threshold = query_map(url)
      .get("display")
      .and_then(|v| v.parse::<f32>().ok())
      .unwrap_or(DEFAULT_DISPLAY_THRESHOLD);
    Ok(Self { display_threshold })
  }
}

impl LogOutput {
  pub fn with_display_threshold(mut self, threshold: f32) -> Self {
    self.display_threshold = threshold;
    self
  }

  pub fn display_threshold(&self) -> f32 {
    self.display_threshold
  }

  /// 需要播报的分类结果，严格大于阈值
  pub fn announced<'a>(&self, items: &'a [ClassifyItem]) -> Vec<&'a ClassifyItem> {
    items
      .iter()
      .filter(|item| item.score > self.display_threshold)
      .collect()
  }
}

impl Render for LogOutput {
  type Error = LogOutputError;

  fn render_result(&self, result: &FrameResult) -> Result<(), Self::Error> {
    let (width, height) = result.image_size;
    match &result.result {
      DecodeResult::Classification(items) => {
        for item in self.announced(items) {
          info!(
            "第 {} 帧识别为 {} ({:.1}%)",
            result.index,
            item.label,
            item.score * 100.0
          );
        }
        for item in items.iter() {
          debug!("  {}: {:.4}", item.label, item.score);
        }
      }
      DecodeResult::Detection(items) => {
        info!(
          "第 {} 帧 ({}x{}) 检测到 {} 个目标",
          result.index,
          width,
          height,
          items.len()
        );
        for item in items.iter() {
          info!(
            "  {} ({:.1}%) [{:.1}, {:.1}, {:.1}, {:.1}] 颜色 {:?}",
            item.label,
            item.score * 100.0,
            item.rect.x,
            item.rect.y,
            item.rect.width,
            item.rect.height,
            item.color.0
          );
        }
      }
    }
    debug!(
      "第 {} 帧推理耗时 {:.2?}, 总耗时 {:.2?}",
      result.index, result.inference_time, result.total_time
    );
    Ok(())
  }
}
