// 该文件是 Qianli （千里眼） 项目的一部分。
// tests/common/mod.rs - 测试用推理引擎与输出
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

#![allow(dead_code)]

use std::{
  io,
  sync::{Arc, Mutex},
  thread,
  time::Duration,
};

use image::{Rgba, RgbaImage};
use qianli::{
  engine::InferenceEngine,
  frame::{CapturedFrame, PixelFormat},
  output::Render,
  pipeline::FrameResult,
  tensor::{ElementType, InputTensor, ModelInputSpec, QuantizationParams, RawOutput},
};

#[derive(Debug, Clone)]
pub enum MockOutput {
  Float(Vec<f32>),
  Quantized(Vec<u8>, QuantizationParams),
  Bytes(Vec<u8>),
}

/// 按脚本返回固定输出的引擎
pub struct MockEngine {
  spec: ModelInputSpec,
  outputs: Vec<MockOutput>,
  fail_on: Vec<usize>,
  latency: Duration,
  invocations: usize,
  pub last_input: Arc<Mutex<Vec<u8>>>,
}

impl MockEngine {
  pub fn new(spec: ModelInputSpec, outputs: Vec<MockOutput>) -> Self {
    Self {
      spec,
      outputs,
      fail_on: Vec::new(),
      latency: Duration::ZERO,
      invocations: 0,
      last_input: Arc::new(Mutex::new(Vec::new())),
    }
  }

  pub fn detection(spec: ModelInputSpec, boxes: &[f32], classes: &[f32], scores: &[f32]) -> Self {
    Self::new(
      spec,
      vec![
        MockOutput::Float(boxes.to_vec()),
        MockOutput::Float(classes.to_vec()),
        MockOutput::Float(scores.to_vec()),
        MockOutput::Float(vec![scores.len() as f32]),
      ],
    )
  }

  /// 第 `n` 次调用 `invoke` 时失败，从 0 开始计数
  pub fn failing_on(mut self, invocations: &[usize]) -> Self {
    self.fail_on = invocations.to_vec();
    self
  }

  /// 每次 `invoke` 阻塞的时长
  pub fn with_latency(mut self, latency: Duration) -> Self {
    self.latency = latency;
    self
  }

  pub fn invocations(&self) -> usize {
    self.invocations
  }
}

impl InferenceEngine for MockEngine {
  type Error = io::Error;

  fn input_spec(&self) -> &ModelInputSpec {
    &self.spec
  }

  fn num_outputs(&self) -> usize {
    self.outputs.len()
  }

  fn set_input(&mut self, input: &InputTensor) -> Result<(), Self::Error> {
    let mut last = self.last_input.lock().unwrap();
    last.clear();
    last.extend_from_slice(input.as_bytes());
    Ok(())
  }

  fn invoke(&mut self) -> Result<(), Self::Error> {
    let current = self.invocations;
    self.invocations += 1;
    if !self.latency.is_zero() {
      thread::sleep(self.latency);
    }
    if self.fail_on.contains(&current) {
      return Err(io::Error::other("模拟推理失败"));
    }
    Ok(())
  }

  fn output(&self, index: usize) -> Result<RawOutput<'_>, Self::Error> {
    match self.outputs.get(index) {
      Some(MockOutput::Float(values)) => Ok(RawOutput::from_f32(values)),
      Some(MockOutput::Quantized(bytes, params)) => Ok(RawOutput::new(
        bytes.as_slice(),
        ElementType::UInt8,
        Some(*params),
      )),
      Some(MockOutput::Bytes(bytes)) => Ok(RawOutput::new(
        bytes.as_slice(),
        ElementType::Float32,
        None,
      )),
      None => Err(io::Error::new(io::ErrorKind::NotFound, "输出索引越界")),
    }
  }
}

/// 收集全部结果的输出
#[derive(Clone, Default)]
pub struct CollectingRender {
  pub results: Arc<Mutex<Vec<FrameResult>>>,
  pub fail: bool,
}

impl CollectingRender {
  pub fn failing() -> Self {
    Self {
      fail: true,
      ..Self::default()
    }
  }

  pub fn collected(&self) -> Vec<FrameResult> {
    self.results.lock().unwrap().clone()
  }
}

impl Render for CollectingRender {
  type Error = io::Error;

  fn render_result(&self, result: &FrameResult) -> Result<(), Self::Error> {
    self.results.lock().unwrap().push(result.clone());
    if self.fail {
      return Err(io::Error::other("模拟渲染失败"));
    }
    Ok(())
  }
}

pub fn solid_frame(width: u32, height: u32, rgba: [u8; 4], format: PixelFormat) -> CapturedFrame {
  let image = RgbaImage::from_pixel(width, height, Rgba(rgba));
  CapturedFrame::pack(&image, format, 0).unwrap()
}
