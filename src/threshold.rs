//! 阈值分级
//!
//! 每个指标对应一组按顺序排列的 `(value, color)` 区间，`value` 是区间上界。
//! 调用方需要按升序声明区间，并让最后一个区间的上界覆盖实际最大值（例如百分比用 100）。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 默认区间的颜色
pub const DEFAULT_COLOR: &str = "#4CAF50";

/// 单个分级区间
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub value: f64,
    pub color: String,
}

impl Band {
    #[inline]
    pub fn new(value: f64, color: &str) -> Self {
        Self {
            value,
            color: color.to_string(),
        }
    }
}

impl Default for Band {
    #[inline]
    fn default() -> Self {
        Self::new(0.0, DEFAULT_COLOR)
    }
}

/// 列表内占位符，只接受字面量 `"default"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DefaultMarker {
    #[serde(rename = "default")]
    Default,
}

/// 区间列表中的条目：真实区间，或者写在列表里的 `"default"` 占位
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BandEntry {
    Band(Band),
    Marker(DefaultMarker),
}

impl BandEntry {
    #[inline]
    fn band(&self) -> Option<&Band> {
        match self {
            BandEntry::Band(band) => Some(band),
            BandEntry::Marker(_) => None,
        }
    }
}

impl From<Band> for BandEntry {
    #[inline]
    fn from(band: Band) -> Self {
        BandEntry::Band(band)
    }
}

/// 分级结果
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub color: String,
    pub ceiling: f64,
}

/// 指标名到区间列表的映射，外加一个默认区间
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdTable {
    #[serde(default)]
    pub default: Band,
    #[serde(flatten)]
    pub metrics: HashMap<String, Vec<BandEntry>>,
}

impl ThresholdTable {
    #[inline]
    pub fn new(default: Band) -> Self {
        Self {
            default,
            metrics: HashMap::new(),
        }
    }

    /// 追加（或替换）一个指标的区间列表
    pub fn with_metric(mut self, name: &str, bands: Vec<Band>) -> Self {
        self.metrics
            .insert(name.to_string(), bands.into_iter().map(Into::into).collect());
        self
    }

    /// 对一个读数分级，返回颜色和该指标刻度的上限
    ///
    /// 指标不在表中时直接返回默认区间。否则按声明顺序返回第一个上界 `>= value` 的区间颜色；
    /// 读数超出所有上界时返回最后一个区间的颜色。上限总是最后一个区间的上界。
    pub fn classify(&self, value: f64, metric: &str) -> Classification {
        // 跳过列表内的占位符，只看真实区间
        let mut bands = match self.metrics.get(metric) {
            Some(entries) => entries.iter().filter_map(BandEntry::band).peekable(),
            None => return self.fallback(),
        };

        let mut last = match bands.peek() {
            Some(first) => *first,
            None => return self.fallback(),
        };
        let mut matched = None;

        // 找到第一个匹配后继续走完，记下最后一个区间作为上限
        for band in bands {
            if matched.is_none() && value <= band.value {
                matched = Some(band);
            }
            last = band;
        }

        Classification {
            color: matched.unwrap_or(last).color.clone(),
            ceiling: last.value,
        }
    }

    #[inline]
    fn fallback(&self) -> Classification {
        Classification {
            color: self.default.color.clone(),
            ceiling: self.default.value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu_table() -> ThresholdTable {
        ThresholdTable::new(Band::new(10.0, "grey")).with_metric(
            "cpu",
            vec![
                Band::new(50.0, "green"),
                Band::new(80.0, "yellow"),
                Band::new(100.0, "red"),
            ],
        )
    }

    #[test]
    fn test_classify_first_matching_band() {
        let table = cpu_table();
        assert_eq!(
            table.classify(45.0, "cpu"),
            Classification {
                color: "green".to_string(),
                ceiling: 100.0
            }
        );
        assert_eq!(table.classify(90.0, "cpu").color, "red");
        assert_eq!(table.classify(90.0, "cpu").ceiling, 100.0);
    }

    #[test]
    fn test_classify_bound_is_inclusive() {
        let table = cpu_table();
        assert_eq!(table.classify(50.0, "cpu").color, "green");
        assert_eq!(table.classify(50.1, "cpu").color, "yellow");
        assert_eq!(table.classify(80.0, "cpu").color, "yellow");
    }

    #[test]
    fn test_classify_above_every_bound_uses_last_band() {
        let table = cpu_table();
        let result = table.classify(250.0, "cpu");
        assert_eq!(result.color, "red");
        assert_eq!(result.ceiling, 100.0);
    }

    #[test]
    fn test_classify_absent_metric_uses_default() {
        let table = cpu_table();
        let result = table.classify(45.0, "ram");
        assert_eq!(result.color, "grey");
        assert_eq!(result.ceiling, 10.0);
    }

    #[test]
    fn test_classify_empty_band_list_uses_default() {
        let table = ThresholdTable::new(Band::new(3.0, "grey")).with_metric("load", vec![]);
        let result = table.classify(1.0, "load");
        assert_eq!(result.color, "grey");
        assert_eq!(result.ceiling, 3.0);
    }

    #[test]
    fn test_classify_skips_inline_default_marker() {
        let json = r##"{
            "default": {"value": 0, "color": "#000"},
            "temperature": [
                {"value": 60, "color": "green"},
                "default",
                {"value": 85, "color": "red"},
                "default"
            ]
        }"##;
        let table: ThresholdTable = serde_json::from_str(json).unwrap();

        assert_eq!(table.classify(70.0, "temperature").color, "red");
        assert_eq!(table.classify(70.0, "temperature").ceiling, 85.0);
        assert_eq!(table.classify(10.0, "temperature").color, "green");
    }

    #[test]
    fn test_deserialize_rejects_misspelled_marker() {
        let json = r#"{"cpu": [{"value": 100, "color": "red"}, "dfault"]}"#;
        assert!(serde_json::from_str::<ThresholdTable>(json).is_err());

        let json = r#"{"cpu": [{"value": 100, "color": "red"}, "default"]}"#;
        let table: ThresholdTable = serde_json::from_str(json).unwrap();
        assert_eq!(
            table.metrics["cpu"][1],
            BandEntry::Marker(DefaultMarker::Default)
        );
    }

    #[test]
    fn test_deserialize_without_default_entry() {
        let json = r#"{"cpu": [{"value": 100, "color": "red"}]}"#;
        let table: ThresholdTable = serde_json::from_str(json).unwrap();
        assert_eq!(table.default, Band::default());
        assert_eq!(table.classify(5.0, "hdd").color, DEFAULT_COLOR);
        assert_eq!(table.classify(5.0, "cpu").color, "red");
    }

    #[test]
    fn test_zero_reading_is_classified() {
        let table = ThresholdTable::default().with_metric(
            "overheating",
            vec![Band::new(0.0, "green"), Band::new(3.0, "red")],
        );
        let result = table.classify(0.0, "overheating");
        assert_eq!(result.color, "green");
        assert_eq!(result.ceiling, 3.0);
    }
}
