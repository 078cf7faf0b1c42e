// 该文件是 Qianli （千里眼） 项目的一部分。
// src/model/detection.rs - 检测结果解码
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

use tracing::{debug, error};

use crate::{
  color::color_for,
  model::{DecodeError, DetectItem, Labels, Rect},
};

const BOX_SIZE: usize = 4;

/// SSD 风格后处理输出的解码
///
/// 模型给出四路平行输出：`[ymin, xmin, ymax, xmax]` 归一化坐标、类别索引、分数、有效数量。
/// 类别索引加 1 后查标签表，第 0 项为背景。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionDecoder {
  threshold: f32,
}

impl DetectionDecoder {
  pub const OUTPUT_COUNT: usize = 4;

  pub fn new(threshold: f32) -> Self {
    Self { threshold }
  }

  pub fn threshold(&self) -> f32 {
    self.threshold
  }

  fn check_len(name: &'static str, data: &[f32], expected: usize) -> Result<(), DecodeError> {
    if data.len() < expected {
      return Err(DecodeError::OutputTooShort {
        name,
        expected,
        actual: data.len(),
      });
    }
    Ok(())
  }

  /// `count` 为模型输出的浮点数量，负数与 NaN 视为 0
  pub fn decode(
    &self,
    boxes: &[f32],
    classes: &[f32],
    scores: &[f32],
    count: f32,
    source_size: (u32, u32),
    labels: &Labels,
  ) -> Result<Box<[DetectItem]>, DecodeError> {
    let count = count as usize;
    if count == 0 {
      return Ok(Box::default());
    }

    let box_len = count
      .checked_mul(BOX_SIZE)
      .ok_or(DecodeError::OutputTooShort {
        name: "boxes",
        expected: usize::MAX,
        actual: boxes.len(),
      })?;
    Self::check_len("boxes", boxes, box_len)?;
    Self::check_len("classes", classes, count)?;
    Self::check_len("scores", scores, count)?;

    let (source_w, source_h) = (source_size.0 as f32, source_size.1 as f32);
    let mut items = Vec::new();

    for index in 0..count {
      let score = scores[index];
      // NaN 不通过阈值
      if !(score >= self.threshold) {
        continue;
      }

      let raw_class = classes[index];
      let class_id = if raw_class >= 0.0 {
        (raw_class as usize).saturating_add(1)
      } else {
        usize::MAX
      };
      let Some(label) = labels.get(class_id) else {
        error!(
          "类别索引 {} 超出标签表范围 ({} 项), 标签文件与模型不匹配",
          raw_class,
          labels.len()
        );
        return Err(DecodeError::LabelOutOfRange {
          class_index: raw_class,
          labels: labels.len(),
        });
      };

      let [ymin, xmin, ymax, xmax] = [
        boxes[index * BOX_SIZE],
        boxes[index * BOX_SIZE + 1],
        boxes[index * BOX_SIZE + 2],
        boxes[index * BOX_SIZE + 3],
      ];
      let rect = Rect {
        x: xmin * source_w,
        y: ymin * source_h,
        width: (xmax - xmin) * source_w,
        height: (ymax - ymin) * source_h,
      };

      items.push(DetectItem {
        class_id,
        label: label.to_string(),
        score,
        rect,
        color: color_for(class_id),
      });
    }

    // 稳定排序，同分时保留检测顺序
    items.sort_by(|a, b| b.score.total_cmp(&a.score));
    debug!("检测解码完成, {} 个候选中保留 {} 个", count, items.len());
    Ok(items.into_boxed_slice())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use anyhow::Result;
  use image::Rgb;

  fn coco_like() -> Labels {
    Labels::from_names(["???", "person", "bicycle", "car"]).unwrap()
  }

  #[test]
  fn threshold_keeps_first_of_two() -> Result<()> {
    let boxes = [0.1, 0.2, 0.5, 0.6, 0.0, 0.0, 1.0, 1.0];
    let items = DetectionDecoder::new(0.5).decode(
      &boxes,
      &[0.0, 2.0],
      &[0.9, 0.3],
      2.0,
      (640, 480),
      &coco_like(),
    )?;
    assert_eq!(items.len(), 1);

    let item = &items[0];
    assert_eq!(item.label, "person");
    assert_eq!(item.class_id, 1);
    assert_eq!(item.score, 0.9);
    assert!((item.rect.x - 0.2 * 640.0).abs() < 1e-3);
    assert!((item.rect.y - 0.1 * 480.0).abs() < 1e-3);
    assert!((item.rect.width - 0.4 * 640.0).abs() < 1e-3);
    assert!((item.rect.height - 0.4 * 480.0).abs() < 1e-3);
    assert_eq!(item.color, color_for(1));
    Ok(())
  }

  #[test]
  fn zero_count_is_empty() -> Result<()> {
    let items = DetectionDecoder::new(0.5).decode(&[], &[], &[], 0.0, (1, 1), &coco_like())?;
    assert!(items.is_empty());
    let items =
      DetectionDecoder::new(0.5).decode(&[], &[], &[], f32::NAN, (1, 1), &coco_like())?;
    assert!(items.is_empty());
    let items = DetectionDecoder::new(0.5).decode(&[], &[], &[], -3.0, (1, 1), &coco_like())?;
    assert!(items.is_empty());
    Ok(())
  }

  #[test]
  fn reads_only_count_entries() -> Result<()> {
    // 第三项分数很高但超出 count
    let boxes = [0.0; 12];
    let items = DetectionDecoder::new(0.5).decode(
      &boxes,
      &[0.0, 1.0, 2.0],
      &[0.6, 0.7, 0.99],
      2.0,
      (10, 10),
      &coco_like(),
    )?;
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|i| i.score < 0.9));
    Ok(())
  }

  #[test]
  fn sorted_by_score_with_stable_ties() -> Result<()> {
    let boxes = [0.0; 16];
    let items = DetectionDecoder::new(0.5).decode(
      &boxes,
      &[0.0, 1.0, 2.0, 0.0],
      &[0.6, 0.8, 0.6, 0.95],
      4.0,
      (10, 10),
      &coco_like(),
    )?;
    let order = items
      .iter()
      .map(|i| (i.label.as_str(), i.score))
      .collect::<Vec<_>>();
    assert_eq!(
      order,
      vec![
        ("person", 0.95),
        ("bicycle", 0.8),
        ("person", 0.6),
        ("car", 0.6)
      ]
    );
    Ok(())
  }

  #[test]
  fn emits_exactly_entries_at_or_above_threshold() -> Result<()> {
    let scores = [0.49, 0.5, 0.51, f32::NAN, 0.0, 1.0];
    let classes = [0.0; 6];
    let boxes = [0.0; 24];
    for count in 0..=scores.len() {
      let items = DetectionDecoder::new(0.5).decode(
        &boxes,
        &classes,
        &scores,
        count as f32,
        (10, 10),
        &coco_like(),
      )?;
      let expected = scores[..count].iter().filter(|&&s| s >= 0.5).count();
      assert!(items.len() <= count);
      assert_eq!(items.len(), expected);
    }
    Ok(())
  }

  #[test]
  fn out_of_range_class_is_fatal() {
    let err = DetectionDecoder::new(0.5)
      .decode(&[0.0; 4], &[3.0], &[0.9], 1.0, (10, 10), &coco_like())
      .unwrap_err();
    assert_eq!(
      err,
      DecodeError::LabelOutOfRange {
        class_index: 3.0,
        labels: 4
      }
    );
    assert!(err.is_fatal());

    let err = DetectionDecoder::new(0.5)
      .decode(&[0.0; 4], &[-1.0], &[0.9], 1.0, (10, 10), &coco_like())
      .unwrap_err();
    assert!(matches!(err, DecodeError::LabelOutOfRange { .. }));
  }

  #[test]
  fn low_score_entries_skip_label_lookup() -> Result<()> {
    let items = DetectionDecoder::new(0.5).decode(
      &[0.0; 4],
      &[99.0],
      &[0.1],
      1.0,
      (10, 10),
      &coco_like(),
    )?;
    assert!(items.is_empty());
    Ok(())
  }

  #[test]
  fn short_outputs_are_recoverable() {
    let err = DetectionDecoder::new(0.5)
      .decode(&[0.0; 4], &[0.0, 0.0], &[0.9, 0.9], 2.0, (10, 10), &coco_like())
      .unwrap_err();
    assert_eq!(
      err,
      DecodeError::OutputTooShort {
        name: "boxes",
        expected: 8,
        actual: 4
      }
    );
    assert!(!err.is_fatal());
  }

  #[test]
  fn huge_count_is_recoverable() {
    let err = DetectionDecoder::new(0.5)
      .decode(&[0.0; 4], &[0.0], &[0.9], 1e19, (10, 10), &coco_like())
      .unwrap_err();
    assert!(matches!(
      err,
      DecodeError::OutputTooShort {
        name: "boxes",
        actual: 4,
        ..
      }
    ));
    assert!(!err.is_fatal());

    let err = DetectionDecoder::new(0.5)
      .decode(&[0.0; 4], &[0.0], &[0.9], f32::INFINITY, (10, 10), &coco_like())
      .unwrap_err();
    assert!(!err.is_fatal());
  }

  #[test]
  fn color_follows_offset_class() -> Result<()> {
    let items = DetectionDecoder::new(0.0).decode(
      &[0.0; 4],
      &[2.0],
      &[0.7],
      1.0,
      (10, 10),
      &coco_like(),
    )?;
    assert_eq!(items[0].class_id, 3);
    assert_eq!(items[0].color, color_for(3));
    assert_ne!(items[0].color, Rgb([0, 0, 0]));
    Ok(())
  }
}
