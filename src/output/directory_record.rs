// 该文件是 Qianli （千里眼） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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
  path::{Path, PathBuf},
  sync::atomic::{AtomicU16, Ordering},
};

use chrono::{DateTime, Datelike, Utc};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::DecodeResult,
  output::Render,
  pipeline::FrameResult,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 把每帧结果写成 JSON 文件，按日期分目录
///
/// ```text
/// folder:///path/to/dir?always
/// ```
///
/// 文件路径为 `<dir>/YYYY/MM/DD/HH-MM-SS-XXXX.json`，`XXXX` 为十六进制帧计数。
/// 默认跳过空结果，带上 `always` 时全部记录。
#[derive(Debug)]
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  frame_counter: AtomicU16,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");
    Ok(Self::new(uri.path()).with_always(always))
  }
}

impl DirectoryRecordOutput {
  pub fn new<P: AsRef<Path>>(directory: P) -> Self {
    Self {
      directory: directory.as_ref().to_path_buf(),
      frame_counter: AtomicU16::new(0),
      always: false,
    }
  }

  pub fn with_always(mut self, always: bool) -> Self {
    self.always = always;
    self
  }

  fn frame_id(&self) -> u16 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  fn frame_path(&self, now: DateTime<Utc>) -> Result<PathBuf, DirectoryRecordOutputError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.json",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }
}

fn to_record(result: &FrameResult) -> Value {
  let (width, height) = result.image_size;
  let (kind, items) = match &result.result {
    DecodeResult::Classification(items) => (
      "classification",
      items
        .iter()
        .map(|item| json!({ "label": item.label, "score": item.score }))
        .collect::<Vec<_>>(),
    ),
    DecodeResult::Detection(items) => (
      "detection",
      items
        .iter()
        .map(|item| {
          json!({
            "class_id": item.class_id,
            "label": item.label,
            "score": item.score,
            "rect": [item.rect.x, item.rect.y, item.rect.width, item.rect.height],
            "color": item.color.0,
          })
        })
        .collect::<Vec<_>>(),
    ),
  };

  json!({
    "index": result.index,
    "width": width,
    "height": height,
    "inference_ms": result.inference_time.as_secs_f64() * 1000.0,
    "total_ms": result.total_time.as_secs_f64() * 1000.0,
    "kind": kind,
    "items": items,
  })
}

impl Render for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, result: &FrameResult) -> Result<(), Self::Error> {
    if !self.always && result.result.is_empty() {
      return Ok(());
    }

    let path = self.frame_path(Utc::now())?;
    let file = std::fs::File::create(&path)?;
    serde_json::to_writer_pretty(file, &to_record(result))?;
    debug!("结果已记录到 {}", path.display());
    Ok(())
  }
}
