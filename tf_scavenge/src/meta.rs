//! Stream metadata carried by `$metadata` events / 元数据事件中的流元数据

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamMetadata {
  /// Seconds / 秒
  #[serde(rename = "$maxAge", default, skip_serializing_if = "Option::is_none")]
  pub max_age: Option<i64>,
  #[serde(rename = "$maxCount", default, skip_serializing_if = "Option::is_none")]
  pub max_count: Option<i64>,
  #[serde(rename = "$tb", default, skip_serializing_if = "Option::is_none")]
  pub truncate_before: Option<i64>,
}

impl StreamMetadata {
  /// Unparseable metadata clears every rule / 无法解析的元数据清空所有规则
  pub fn parse(json: &[u8]) -> Self {
    serde_json::from_slice(json).unwrap_or_default()
  }

  pub fn to_json(&self) -> Vec<u8> {
    serde_json::to_vec(self).unwrap_or_default()
  }

  pub fn is_empty(&self) -> bool {
    self.max_age.is_none() && self.max_count.is_none() && self.truncate_before.is_none()
  }

  /// Max age in milliseconds / 毫秒
  pub fn max_age_ms(&self) -> Option<i64> {
    self.max_age.map(|s| s.saturating_mul(1000))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_rules() {
    let m = StreamMetadata::parse(br#"{"$maxCount":3,"$tb":7,"other":1}"#);
    assert_eq!(m.max_count, Some(3));
    assert_eq!(m.truncate_before, Some(7));
    assert_eq!(m.max_age, None);
    assert!(StreamMetadata::parse(b"not json").is_empty());
    let m = StreamMetadata {
      max_age: Some(2),
      ..Default::default()
    };
    assert_eq!(StreamMetadata::parse(&m.to_json()), m);
    assert_eq!(m.max_age_ms(), Some(2000));
  }
}
