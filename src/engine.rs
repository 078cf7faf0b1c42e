// 该文件是 Qianli （千里眼） 项目的一部分。
// src/engine.rs - 推理引擎接口
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

use crate::tensor::{InputTensor, ModelInputSpec, RawOutput};

/// 不透明的同步推理引擎
///
/// 引擎在创建时按 [`ModelInputSpec`] 分配好输入，之后每帧依次调用
/// `set_input`、`invoke`、`output`。
pub trait InferenceEngine {
  type Error: std::error::Error + Send + Sync + 'static;

  fn input_spec(&self) -> &ModelInputSpec;
  fn num_outputs(&self) -> usize;
  fn set_input(&mut self, input: &InputTensor) -> Result<(), Self::Error>;
  fn invoke(&mut self) -> Result<(), Self::Error>;
  fn output(&self, index: usize) -> Result<RawOutput<'_>, Self::Error>;
}

#[cfg(feature = "engine_tract")]
mod tract;
#[cfg(feature = "engine_tract")]
pub use self::tract::{TractEngine, TractEngineError};
