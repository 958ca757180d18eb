//! Sample buffers flowing through node ports.
//!
//! A [`FrameworkData`] is the unit of data owned by one port of one node: an
//! append-only, channel-indexed time series bound to an optional sampling
//! frequency. Crossing an edge copies samples into the child's own buffer via
//! [`FrameworkData::extend`], so parent and child buffers never alias.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PipelineError, PipelineResult};

/// Channel used when a port carries a single unnamed stream.
pub const DEFAULT_CHANNEL: &str = "main";

/// A single scalar sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Sample {
    Int(i64),
    Float(f64),
    /// Opaque value carried through unchanged, e.g. a raw timestamp column.
    Text(String),
}

impl Sample {
    /// Numeric view of the sample; `None` for text.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Sample::Int(v) => Some(*v as f64),
            Sample::Float(v) => Some(*v),
            Sample::Text(_) => None,
        }
    }

    /// Converts a JSON scalar into a sample.
    pub fn from_json(value: &Value) -> PipelineResult<Self> {
        match value {
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(Sample::Int(i)),
                None => n.as_f64().map(Sample::Float).ok_or_else(|| {
                    PipelineError::invalid_value("sample", format!("unrepresentable number {n}"))
                }),
            },
            Value::String(s) => Ok(Sample::Text(s.clone())),
            other => Err(PipelineError::invalid_value(
                "sample",
                format!("expected a scalar, got {other}"),
            )),
        }
    }
}

impl From<f64> for Sample {
    fn from(value: f64) -> Self {
        Sample::Float(value)
    }
}

impl From<i64> for Sample {
    fn from(value: i64) -> Self {
        Sample::Int(value)
    }
}

impl From<usize> for Sample {
    fn from(value: usize) -> Self {
        Sample::Int(value as i64)
    }
}

impl From<&str> for Sample {
    fn from(value: &str) -> Self {
        Sample::Text(value.to_string())
    }
}

impl From<String> for Sample {
    fn from(value: String) -> Self {
        Sample::Text(value)
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sample::Int(v) => write!(f, "{v}"),
            Sample::Float(v) => write!(f, "{v}"),
            Sample::Text(v) => f.write_str(v),
        }
    }
}

/// Multi-channel sample buffer for one port.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrameworkData {
    sampling_frequency: Option<f64>,
    /// Channel names in first-seen order.
    channels: Vec<String>,
    data: HashMap<String, Vec<Sample>>,
}

impl FrameworkData {
    /// Creates an empty buffer with no sampling frequency.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty buffer bound to a sampling frequency.
    pub fn with_sampling_frequency(sampling_frequency: f64) -> PipelineResult<Self> {
        Self::with_channels(Some(sampling_frequency), std::iter::empty::<String>())
    }

    /// Creates an empty buffer with its channel set declared up front.
    ///
    /// A sampling frequency, when given, must be finite and greater than zero.
    pub fn with_channels<I, S>(sampling_frequency: Option<f64>, channels: I) -> PipelineResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Some(hz) = sampling_frequency {
            if !(hz.is_finite() && hz > 0.0) {
                return Err(PipelineError::invalid_value(
                    "sampling frequency",
                    format!("{hz} is not a positive number"),
                ));
            }
        }
        let mut buffer = Self {
            sampling_frequency,
            ..Self::default()
        };
        for channel in channels {
            buffer.ensure_channel(&channel.into());
        }
        Ok(buffer)
    }

    pub fn sampling_frequency(&self) -> Option<f64> {
        self.sampling_frequency
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Samples on `channel`, if the channel exists.
    pub fn channel(&self, channel: &str) -> Option<&[Sample]> {
        self.data.get(channel).map(Vec::as_slice)
    }

    /// Numeric samples on `channel`; text samples are skipped.
    pub fn channel_f64(&self, channel: &str) -> Option<Vec<f64>> {
        self.data
            .get(channel)
            .map(|samples| samples.iter().filter_map(Sample::as_f64).collect())
    }

    /// Appends samples to `channel`, or to [`DEFAULT_CHANNEL`] when `None`.
    pub fn append<I, T>(&mut self, channel: Option<&str>, samples: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<Sample>,
    {
        let name = channel.unwrap_or(DEFAULT_CHANNEL);
        self.ensure_channel(name)
            .extend(samples.into_iter().map(Into::into));
    }

    /// Appends JSON scalars to a channel. Nothing is appended if any value
    /// is not a scalar.
    pub fn append_json(&mut self, channel: Option<&str>, values: &[Value]) -> PipelineResult<()> {
        let samples = values
            .iter()
            .map(Sample::from_json)
            .collect::<PipelineResult<Vec<_>>>()?;
        self.append(channel, samples);
        Ok(())
    }

    /// Channel-wise concatenation of `other` onto `self`.
    pub fn extend(&mut self, other: &FrameworkData) {
        if self.sampling_frequency.is_none() {
            self.sampling_frequency = other.sampling_frequency;
        }
        for name in &other.channels {
            let samples = other.data.get(name).map(Vec::as_slice).unwrap_or_default();
            self.ensure_channel(name).extend_from_slice(samples);
        }
    }

    /// True iff at least one channel holds a sample.
    pub fn has_data(&self) -> bool {
        self.data.values().any(|samples| !samples.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        !self.has_data()
    }

    /// Length of the longest channel.
    pub fn sample_count(&self) -> usize {
        self.data.values().map(Vec::len).max().unwrap_or(0)
    }

    fn ensure_channel(&mut self, name: &str) -> &mut Vec<Sample> {
        if !self.data.contains_key(name) {
            self.channels.push(name.to_string());
        }
        self.data.entry(name.to_string()).or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn floats(samples: &[Sample]) -> Vec<f64> {
        samples.iter().filter_map(Sample::as_f64).collect()
    }

    #[test]
    fn test_extend_merges_channel_wise() {
        let mut a = FrameworkData::new();
        a.append(Some("x"), [1.0, 2.0]);
        a.append(Some("y"), [5.0]);
        let mut b = FrameworkData::new();
        b.append(Some("x"), [3.0]);
        b.append(Some("z"), [9.0]);

        a.extend(&b);

        assert_eq!(a.channels(), ["x", "y", "z"]);
        assert_eq!(floats(a.channel("x").unwrap()), vec![1.0, 2.0, 3.0]);
        assert_eq!(floats(a.channel("y").unwrap()), vec![5.0]);
        assert_eq!(floats(a.channel("z").unwrap()), vec![9.0]);
        // the source is untouched
        assert_eq!(floats(b.channel("x").unwrap()), vec![3.0]);
    }

    #[test]
    fn test_has_data() {
        let mut buffer = FrameworkData::with_sampling_frequency(250.0).unwrap();
        assert!(!buffer.has_data());

        buffer.append(None, Vec::<f64>::new());
        assert!(!buffer.has_data());

        buffer.append(None, [0.5]);
        assert!(buffer.has_data());
        assert_eq!(buffer.channels(), [DEFAULT_CHANNEL]);
    }

    #[test]
    fn test_declared_channels_are_empty_until_appended() {
        let buffer = FrameworkData::with_channels(Some(100.0), ["a", "b"]).unwrap();
        assert_eq!(buffer.channels(), ["a", "b"]);
        assert!(!buffer.has_data());
        assert_eq!(buffer.channel("a").unwrap().len(), 0);
    }

    #[test]
    fn test_extend_adopts_sampling_frequency() {
        let mut target = FrameworkData::new();
        target.extend(&FrameworkData::with_sampling_frequency(250.0).unwrap());
        assert_eq!(target.sampling_frequency(), Some(250.0));

        let mut fixed = FrameworkData::with_sampling_frequency(500.0).unwrap();
        fixed.extend(&FrameworkData::with_sampling_frequency(250.0).unwrap());
        assert_eq!(fixed.sampling_frequency(), Some(500.0));
    }

    #[test]
    fn test_sampling_frequency_must_be_positive() {
        for hz in [0.0, -250.0, f64::NAN, f64::INFINITY] {
            let err = FrameworkData::with_sampling_frequency(hz).unwrap_err();
            assert!(matches!(err, PipelineError::InvalidValue { .. }), "{hz}");
            assert!(FrameworkData::with_channels(Some(hz), ["a"]).is_err(), "{hz}");
        }
        assert!(FrameworkData::with_channels(None, ["a"]).is_ok());
    }

    #[test]
    fn test_append_json_rejects_non_scalars() {
        let mut buffer = FrameworkData::new();
        buffer
            .append_json(Some("ts"), &[json!(1), json!(2.5), json!("12:00")])
            .unwrap();
        assert_eq!(
            buffer.channel("ts").unwrap(),
            [Sample::Int(1), Sample::Float(2.5), Sample::Text("12:00".into())]
        );

        let err = buffer
            .append_json(Some("ts"), &[json!(3), json!([1, 2])])
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidValue { .. }));
        assert_eq!(buffer.channel("ts").unwrap().len(), 3);
    }

    proptest! {
        #[test]
        fn prop_extend_is_concatenation(
            left in proptest::collection::vec(-1e6f64..1e6, 0..32),
            right in proptest::collection::vec(-1e6f64..1e6, 0..32),
        ) {
            let mut a = FrameworkData::new();
            a.append(Some("c"), left.clone());
            let mut b = FrameworkData::new();
            b.append(Some("c"), right.clone());

            a.extend(&b);

            let expected: Vec<f64> = left.iter().chain(right.iter()).copied().collect();
            prop_assert_eq!(a.channel_f64("c").unwrap(), expected);
        }
    }
}
