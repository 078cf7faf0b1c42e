// 该文件是 Qianli （千里眼） 项目的一部分。
// src/color.rs - 类别显示颜色
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

use image::Rgb;

/// 调色板步长，同时也是百分比偏移的倍率
pub const COLOR_STRIDE: i64 = 10;

/// 十种基础颜色，分量范围 [0, 1]
pub const PALETTE: [[f32; 3]; 10] = [
  [1.0, 0.0, 0.0],                              // 红
  [90.0 / 255.0, 200.0 / 255.0, 250.0 / 255.0], // 天蓝
  [0.0, 1.0, 0.0],                              // 绿
  [1.0, 0.5, 0.0],                              // 橙
  [0.0, 0.0, 1.0],                              // 蓝
  [0.5, 0.0, 0.5],                              // 紫
  [1.0, 0.0, 1.0],                              // 品红
  [1.0, 1.0, 0.0],                              // 黄
  [0.0, 1.0, 1.0],                              // 青
  [0.6, 0.4, 0.2],                              // 棕
];

pub fn base_color(class_index: usize) -> [f32; 3] {
  PALETTE[class_index % PALETTE.len()]
}

/// 第 `class_index` 类相对基础颜色的百分比偏移
///
/// 调色板每绕一圈，偏移减少一个步长，从而区分共用同一基础颜色的类别。
pub fn shift_percentage(class_index: usize) -> i64 {
  let wraps = (class_index / PALETTE.len()) as i64;
  (COLOR_STRIDE / 2 - wraps) * COLOR_STRIDE
}

/// 类别索引到显示颜色的映射，无状态且结果确定
pub fn color_for(class_index: usize) -> Rgb<u8> {
  let shift = shift_percentage(class_index) as f32 / 100.0;
  let base = base_color(class_index);
  Rgb(base.map(|c| ((c + shift).clamp(0.0, 1.0) * 255.0).round() as u8))
}
