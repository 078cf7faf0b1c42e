// 该文件是 Qianli （千里眼） 项目的一部分。
// src/engine/tract.rs - 基于 tract 的 ONNX 推理引擎
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

use std::{borrow::Cow, path::Path};

use thiserror::Error;
use tracing::{debug, info};
use tract_onnx::prelude::*;

use crate::{
  engine::InferenceEngine,
  tensor::{ElementType, InputTensor, ModelInputSpec, QuantizationParams, RawOutput},
};

#[derive(Error, Debug)]
pub enum TractEngineError {
  #[error("tract 错误: {0}")]
  Tract(TractError),
  #[error("尚未设置输入或尚未执行推理")]
  NotInvoked,
  #[error("输入长度不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  InputSize { expected: usize, actual: usize },
  #[error("输出索引 {index} 超出范围 (共 {count} 个)")]
  OutputIndex { index: usize, count: usize },
  #[error("不支持的输出类型: {0:?}")]
  UnsupportedOutput(DatumType),
}

impl From<TractError> for TractEngineError {
  fn from(err: TractError) -> Self {
    TractEngineError::Tract(err)
  }
}

pub struct TractEngine {
  plan: TypedRunnableModel<TypedModel>,
  spec: ModelInputSpec,
  num_outputs: usize,
  /// 待推理的输入张量，`invoke` 时移交给推理计划
  input: Option<Tensor>,
  outputs: Option<TVec<Tensor>>,
}

impl TractEngine {
  /// 加载模型并按输入规格固定输入形状 `[batch, height, width, channels]`
  pub fn allocate<P: AsRef<Path>>(path: P, spec: ModelInputSpec) -> Result<Self, TractEngineError> {
    let path = path.as_ref();
    info!("加载模型文件: {}", path.display());

    let model = tract_onnx::onnx()
      .model_for_path(path)?
      .with_input_fact(0, InferenceFact::dt_shape(datum_of(&spec), shape_of(&spec)))?
      .into_optimized()?;
    Self::from_model(model, spec)
  }

  pub fn from_model(model: TypedModel, spec: ModelInputSpec) -> Result<Self, TractEngineError> {
    let num_outputs = model.outputs.len();
    debug!("模型输出数量: {}", num_outputs);
    let plan = model.into_runnable()?;
    info!("模型加载完成");

    Ok(Self {
      plan,
      spec,
      num_outputs,
      input: None,
      outputs: None,
    })
  }
}

fn datum_of(spec: &ModelInputSpec) -> DatumType {
  match spec.element_type {
    ElementType::UInt8 => u8::datum_type(),
    ElementType::Float32 => f32::datum_type(),
  }
}

fn shape_of(spec: &ModelInputSpec) -> TVec<usize> {
  tvec!(spec.batch, spec.height, spec.width, spec.channels)
}

impl InferenceEngine for TractEngine {
  type Error = TractEngineError;

  fn input_spec(&self) -> &ModelInputSpec {
    &self.spec
  }

  fn num_outputs(&self) -> usize {
    self.num_outputs
  }

  fn set_input(&mut self, input: &InputTensor) -> Result<(), Self::Error> {
    let bytes = input.as_bytes();
    if bytes.len() != self.spec.byte_len() {
      return Err(TractEngineError::InputSize {
        expected: self.spec.byte_len(),
        actual: bytes.len(),
      });
    }

    let mut tensor = match self.input.take() {
      Some(tensor) => tensor,
      None => Tensor::zero_dt(datum_of(&self.spec), &shape_of(&self.spec))?,
    };
    match self.spec.element_type {
      ElementType::UInt8 => tensor.as_slice_mut::<u8>()?.copy_from_slice(bytes),
      ElementType::Float32 => {
        let values = tensor.as_slice_mut::<f32>()?;
        for (value, c) in values.iter_mut().zip(bytes.chunks_exact(4)) {
          *value = f32::from_ne_bytes([c[0], c[1], c[2], c[3]]);
        }
      }
    }
    self.input = Some(tensor);
    Ok(())
  }

  fn invoke(&mut self) -> Result<(), Self::Error> {
    let input = self.input.take().ok_or(TractEngineError::NotInvoked)?;
    let outputs = self.plan.run(tvec!(input.into_tvalue()))?;
    self.outputs = Some(outputs.into_iter().map(|v| v.into_tensor()).collect());
    Ok(())
  }

  fn output(&self, index: usize) -> Result<RawOutput<'_>, Self::Error> {
    let outputs = self.outputs.as_ref().ok_or(TractEngineError::NotInvoked)?;
    let tensor = outputs.get(index).ok_or(TractEngineError::OutputIndex {
      index,
      count: outputs.len(),
    })?;

    let datum = tensor.datum_type();
    if datum == f32::datum_type() {
      let values = tensor.as_slice::<f32>()?;
      let bytes = values.iter().flat_map(|v| v.to_ne_bytes()).collect::<Vec<u8>>();
      Ok(RawOutput::new(bytes, ElementType::Float32, None))
    } else if datum.unquantized() == u8::datum_type() {
      // 非量化的 u8 输出按 scale=1, zero_point=0 处理
      let (zero_point, scale) = datum.zp_scale();
      let bytes = tensor.as_slice::<u8>()?;
      Ok(RawOutput::new(
        Cow::Borrowed(bytes),
        ElementType::UInt8,
        Some(QuantizationParams { scale, zero_point }),
      ))
    } else {
      Err(TractEngineError::UnsupportedOutput(datum))
    }
  }
}
