// 该文件是 Qianli （千里眼） 项目的一部分。
// src/model/classification.rs - 分类结果解码
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

use tracing::debug;

use crate::model::{ClassifyItem, DecodeError, Labels};

/// Top-N 分类解码
///
/// 不做置信度过滤，是否展示由调用方决定。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassificationDecoder {
  top_n: usize,
}

impl ClassificationDecoder {
  pub fn new(top_n: usize) -> Self {
    Self { top_n }
  }

  pub fn top_n(&self) -> usize {
    self.top_n
  }

  pub fn decode(&self, scores: &[f32], labels: &Labels) -> Result<Box<[ClassifyItem]>, DecodeError> {
    if scores.len() != labels.len() {
      return Err(DecodeError::LabelCountMismatch {
        labels: labels.len(),
        scores: scores.len(),
      });
    }

    let mut ranked = scores.iter().copied().enumerate().collect::<Vec<_>>();
    // 稳定排序，同分时保留原始索引顺序
    ranked.sort_by(|(_, a), (_, b)| b.total_cmp(a));
    ranked.truncate(self.top_n);

    let items = ranked
      .into_iter()
      .filter_map(|(index, score)| {
        labels.get(index).map(|label| ClassifyItem {
          label: label.to_string(),
          score,
        })
      })
      .collect::<Box<[_]>>();

    debug!("分类解码完成, 保留 {} / {} 项", items.len(), scores.len());
    Ok(items)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use anyhow::Result;

  fn pairs(items: &[ClassifyItem]) -> Vec<(&str, f32)> {
    items.iter().map(|i| (i.label.as_str(), i.score)).collect()
  }

  #[test]
  fn top_two_of_three() -> Result<()> {
    let labels = Labels::from_names(["cat", "dog", "bird"])?;
    let items = ClassificationDecoder::new(2).decode(&[0.1, 0.7, 0.2], &labels)?;
    assert_eq!(pairs(&items), vec![("dog", 0.7), ("bird", 0.2)]);
    Ok(())
  }

  #[test]
  fn ties_keep_original_order() -> Result<()> {
    let labels = Labels::from_names(["a", "b", "c", "d"])?;
    let items = ClassificationDecoder::new(4).decode(&[0.25, 0.5, 0.25, 0.5], &labels)?;
    assert_eq!(
      pairs(&items),
      vec![("b", 0.5), ("d", 0.5), ("a", 0.25), ("c", 0.25)]
    );
    Ok(())
  }

  #[test]
  fn length_is_min_of_top_n_and_scores() -> Result<()> {
    let labels = Labels::from_names(["a", "b"])?;
    let items = ClassificationDecoder::new(5).decode(&[0.4, 0.6], &labels)?;
    assert_eq!(items.len(), 2);
    let items = ClassificationDecoder::new(0).decode(&[0.4, 0.6], &labels)?;
    assert!(items.is_empty());
    Ok(())
  }

  #[test]
  fn output_is_sorted_non_increasing() -> Result<()> {
    let scores = (0..50)
      .map(|i| ((i * 37) % 50) as f32 / 50.0)
      .collect::<Vec<_>>();
    let labels = Labels::from_names((0..50).map(|i| format!("c{}", i)))?;
    let items = ClassificationDecoder::new(10).decode(&scores, &labels)?;
    assert_eq!(items.len(), 10);
    assert!(items.windows(2).all(|w| w[0].score >= w[1].score));
    assert_eq!(items[0].score, 49.0 / 50.0);
    Ok(())
  }

  #[test]
  fn no_confidence_filter() -> Result<()> {
    let labels = Labels::from_names(["a", "b", "c"])?;
    let items = ClassificationDecoder::new(3).decode(&[0.01, 0.02, 0.03], &labels)?;
    assert_eq!(items.len(), 3);
    Ok(())
  }

  #[test]
  fn label_mismatch_is_fatal() -> Result<()> {
    let labels = Labels::from_names(["a", "b"])?;
    let err = ClassificationDecoder::new(3)
      .decode(&[0.1, 0.2, 0.7], &labels)
      .unwrap_err();
    assert_eq!(err, DecodeError::LabelCountMismatch { labels: 2, scores: 3 });
    assert!(err.is_fatal());
    Ok(())
  }
}
