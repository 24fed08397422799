//! Metric domain types shared by every storage backend.

use crate::core::{MetricsError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The two metric kinds the store understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Last-write-wins floating point value.
    Gauge,
    /// Accumulating signed integer.
    Counter,
}

impl MetricKind {
    /// Wire name, `"gauge"` or `"counter"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = MetricsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            other => Err(MetricsError::validation(format!("unknown metric type '{}'", other))),
        }
    }
}

/// A stored metric value.
///
/// Values are kept in their native representation and rendered at the
/// boundary: `render` is the storage form returned by `get_metric`,
/// `render_plain` is the short form used by human-readable listings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    /// Current gauge value.
    Gauge(f64),
    /// Accumulated counter total.
    Counter(i64),
}

impl MetricValue {
    /// Kind of the stored value.
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Counter(_) => MetricKind::Counter,
        }
    }

    /// Storage rendering: six fractional digits for gauges (`10.500000`).
    pub fn render(&self) -> String {
        match self {
            MetricValue::Gauge(value) => format!("{:.6}", value),
            MetricValue::Counter(value) => value.to_string(),
        }
    }

    /// Plain rendering: shortest round-trip decimal for gauges (`10.5`, `3.0`).
    pub fn render_plain(&self) -> String {
        match self {
            MetricValue::Gauge(value) => format!("{:?}", value),
            MetricValue::Counter(value) => value.to_string(),
        }
    }

    /// Listing entry in the `"kind: value"` form.
    pub fn listing(&self) -> String {
        format!("{}: {}", self.kind(), self.render())
    }
}

/// A validated batch entry.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchItem {
    /// Replace the gauge `name` with `value`.
    Gauge {
        /// Metric name
        name: String,
        /// New value
        value: f64,
    },
    /// Add `delta` to the counter `name`.
    Counter {
        /// Metric name
        name: String,
        /// Signed increment
        delta: i64,
    },
}

impl BatchItem {
    /// Metric name the item targets.
    pub fn name(&self) -> &str {
        match self {
            BatchItem::Gauge { name, .. } | BatchItem::Counter { name, .. } => name,
        }
    }

    /// Kind of metric the item updates.
    pub fn kind(&self) -> MetricKind {
        match self {
            BatchItem::Gauge { .. } => MetricKind::Gauge,
            BatchItem::Counter { .. } => MetricKind::Counter,
        }
    }
}

/// Metric update as submitted by reporting agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricUpdate {
    /// Metric name
    pub id: String,
    /// `"gauge"` or `"counter"`
    #[serde(rename = "type")]
    pub mtype: String,
    /// Counter increment, required for counters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    /// Gauge value, required for gauges
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl MetricUpdate {
    /// Gauge update setting `id` to `value`.
    pub fn gauge<S: Into<String>>(id: S, value: f64) -> Self {
        Self {
            id: id.into(),
            mtype: MetricKind::Gauge.as_str().to_string(),
            delta: None,
            value: Some(value),
        }
    }

    /// Counter update adding `delta` to `id`.
    pub fn counter<S: Into<String>>(id: S, delta: i64) -> Self {
        Self {
            id: id.into(),
            mtype: MetricKind::Counter.as_str().to_string(),
            delta: Some(delta),
            value: None,
        }
    }

    /// Check the update carries the field its kind requires.
    pub fn validate(&self) -> Result<BatchItem> {
        if self.id.is_empty() {
            return Err(MetricsError::validation("metric id must not be empty"));
        }

        match self.mtype.parse::<MetricKind>()? {
            MetricKind::Gauge => match self.value {
                Some(value) => Ok(BatchItem::Gauge {
                    name: self.id.clone(),
                    value,
                }),
                None => Err(MetricsError::validation(format!(
                    "gauge '{}' has no value",
                    self.id
                ))),
            },
            MetricKind::Counter => match self.delta {
                Some(delta) => Ok(BatchItem::Counter {
                    name: self.id.clone(),
                    delta,
                }),
                None => Err(MetricsError::validation(format!(
                    "counter '{}' has no delta",
                    self.id
                ))),
            },
        }
    }

    /// Like `validate`, naming the update's position within its batch.
    pub fn validate_at(&self, index: usize) -> Result<BatchItem> {
        self.validate().map_err(|e| match e {
            MetricsError::Validation(msg) => {
                MetricsError::validation(format!("item {}: {}", index, msg))
            },
            other => other,
        })
    }
}

/// Validate a whole batch, failing on the first invalid entry.
pub fn validate_batch(updates: &[MetricUpdate]) -> Result<Vec<BatchItem>> {
    updates
        .iter()
        .enumerate()
        .map(|(index, update)| update.validate_at(index))
        .collect()
}
