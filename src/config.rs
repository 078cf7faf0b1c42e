// 该文件是 Qianli （千里眼） 项目的一部分。
// src/config.rs - 模型配置
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

//! 模型地址：
//!
//! ```text
//! model:///path/model.onnx?mode=detection&labels=/path/labelmap.txt&width=300&height=300&type=u8
//! ```
//!
//! | 参数 | 含义 | 默认值 |
//! |---|---|---|
//! | `mode` | `classification` / `detection` | `detection` |
//! | `labels` | 标签文件 | 模型路径改扩展名为 `.txt` |
//! | `width`, `height` | 模型输入尺寸 | 300 |
//! | `batch` | 批大小 | 1 |
//! | `type` | `u8` / `f32` | `u8` |
//! | `mean`, `std` | 浮点模型归一化参数 | 127.5 |
//! | `threshold` | 检测分数阈值 | 0.5 |
//! | `top` | 分类保留条数 | 3 |
//! | `interval` | 最小处理间隔（毫秒） | 200 |

use std::{collections::HashMap, path::PathBuf, str::FromStr, time::Duration};

use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{DecodeError, DecodeMode, LabelError, Labels},
  pipeline::PipelineConfig,
  tensor::{ElementType, ModelInputSpec, Normalization, TensorError},
  query_map,
};

const DEFAULT_INPUT_SIZE: usize = 300;

#[derive(Error, Debug)]
pub enum ModelConfigError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("参数 {key} 的值 '{value}' 无效")]
  InvalidParam { key: &'static str, value: String },
  #[error("解码模式错误: {0}")]
  Mode(#[from] DecodeError),
  #[error("输入规格错误: {0}")]
  Spec(#[from] TensorError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
  pub path: PathBuf,
  pub labels: PathBuf,
  pub spec: ModelInputSpec,
  pub pipeline: PipelineConfig,
}

impl FromUrlWithScheme for ModelConfig {
  const SCHEME: &'static str = "model";
}

fn param<T: FromStr>(
  query: &HashMap<String, String>,
  key: &'static str,
  default: T,
) -> Result<T, ModelConfigError> {
  match query.get(key) {
    None => Ok(default),
    Some(value) => value.parse::<T>().map_err(|_| {
      error!("模型参数 {} 无效: {}", key, value);
      ModelConfigError::InvalidParam {
        key,
        value: value.clone(),
      }
    }),
  }
}

impl FromUrl for ModelConfig {
  type Error = ModelConfigError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelConfigError::SchemeMismatch);
    }

    let query = query_map(url);
    let path = PathBuf::from(url.path());
    let labels = query
      .get("labels")
      .map(PathBuf::from)
      .unwrap_or_else(|| path.with_extension("txt"));

    let mode = match query.get("mode") {
      Some(mode) => mode.parse::<DecodeMode>()?,
      None => DecodeMode::detection(),
    };
    let mode = match mode {
      DecodeMode::Classification { top_n } => DecodeMode::Classification {
        top_n: param(&query, "top", top_n)?,
      },
      DecodeMode::Detection { threshold } => DecodeMode::Detection {
        threshold: param(&query, "threshold", threshold)?,
      },
    };

    let width = param(&query, "width", DEFAULT_INPUT_SIZE)?;
    let height = param(&query, "height", DEFAULT_INPUT_SIZE)?;
    let batch = param(&query, "batch", 1usize)?;
    let element_type = match query.get("type") {
      Some(kind) => kind.parse::<ElementType>()?,
      None => ElementType::UInt8,
    };
    let defaults = Normalization::default();
    let normalization = Normalization {
      mean: param(&query, "mean", defaults.mean)?,
      std: param(&query, "std", defaults.std)?,
    };

    let spec = match element_type {
      ElementType::UInt8 => ModelInputSpec::quantized(width, height),
      ElementType::Float32 => ModelInputSpec::float(width, height, normalization),
    }
    .with_batch(batch);
    spec.validate()?;

    let interval = param(&query, "interval", 200u64)?;
    let pipeline = PipelineConfig::default()
      .with_mode(mode)
      .with_min_interval(Duration::from_millis(interval));

    debug!("模型配置: {:?}, {:?}", spec, pipeline);
    Ok(ModelConfig {
      path,
      labels,
      spec,
      pipeline,
    })
  }
}

impl ModelConfig {
  pub fn load_labels(&self) -> Result<Labels, LabelError> {
    Labels::from_path(&self.labels)
  }
}
