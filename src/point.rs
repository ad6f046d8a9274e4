use std::{collections::BTreeMap, time::Duration};

use crate::{Error, Time};

/// Reserved label carrying the metric name on the wire.
pub const METRIC_NAME_LABEL: &str = "__name__";

/// One sample of one series.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    pub metric: String,
    pub tags: BTreeMap<String, String>,
    pub time: Time,
    pub value: f64,
}
impl MetricPoint {
    pub fn new(metric: impl Into<String>, time: Time, value: f64) -> Self {
        Self {
            metric: metric.into(),
            tags: BTreeMap::new(),
            time,
            value,
        }
    }

    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(name.into(), value.into());
        self
    }

    /// `index` is the position of the point in its batch and is echoed back in errors.
    pub fn validate(&self, index: usize, policy: &ValidationPolicy, now: Time) -> Result<(), Error> {
        if !is_metric_name(&self.metric) {
            return Err(Error::InvalidMetricName {
                index,
                name: self.metric.clone(),
            });
        }
        for (name, value) in &self.tags {
            let reason = if name.is_empty() {
                Some("empty label name")
            } else if value.is_empty() {
                Some("empty label value")
            } else if name == METRIC_NAME_LABEL {
                Some("reserved label name")
            } else if !is_printable(name) || !is_printable(value) {
                Some("non-printable character")
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(Error::InvalidLabel {
                    index,
                    name: name.clone(),
                    value: value.clone(),
                    reason,
                });
            }
        }
        if !self.value.is_finite() && policy.non_finite == NonFinitePolicy::Reject {
            return Err(Error::InvalidValue {
                index,
                value: self.value,
            });
        }
        let invalid_time = |reason| Error::InvalidTimestamp {
            index,
            time: self.time,
            reason,
        };
        if self.time < 0 {
            return Err(invalid_time("negative"));
        }
        if self.time.checked_mul(1000).is_none() {
            return Err(invalid_time("out of range"));
        }
        if let Some(skew) = policy.max_future_skew {
            let skew = Time::try_from(skew.as_secs()).unwrap_or(Time::MAX);
            if self.time > now.saturating_add(skew) {
                return Err(invalid_time("too far in the future"));
            }
        }
        Ok(())
    }

    /// Timestamp in milliseconds, as the wire format expects.
    pub fn time_ms(&self) -> i64 {
        self.time.saturating_mul(1000)
    }
}

fn is_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_printable(s: &str) -> bool {
    !s.chars().any(char::is_control)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NonFinitePolicy {
    /// NaN and infinities fail validation.
    #[default]
    Reject,
    /// NaN and infinities are sent as-is. Prometheus uses NaN as a staleness marker.
    Accept,
}

#[derive(Debug, Clone)]
pub struct ValidationPolicy {
    pub non_finite: NonFinitePolicy,
    /// `None` disables the future timestamp check.
    pub max_future_skew: Option<Duration>,
}
impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            non_finite: NonFinitePolicy::Reject,
            max_future_skew: Some(Duration::from_secs(60 * 60)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: Time = 1_700_000_000;

    fn check(point: &MetricPoint) -> Result<(), Error> {
        point.validate(0, &ValidationPolicy::default(), NOW)
    }

    #[test]
    fn test_valid_point() {
        let point = MetricPoint::new("http_requests_total", NOW - 60, 2.0)
            .with_tag("env", "test_env1")
            .with_tag("job", "test_job1");
        assert!(check(&point).is_ok());
        assert!(check(&MetricPoint::new("_up", NOW, -1.5)).is_ok());
    }

    #[test]
    fn test_metric_name_grammar() {
        for name in ["", "1abc", "a-b", "a b", "a:b", "métric"] {
            let err = check(&MetricPoint::new(name, NOW, 1.0)).unwrap_err();
            assert!(
                matches!(err, Error::InvalidMetricName { index: 0, .. }),
                "{name:?}: {err}"
            );
        }
    }

    #[test]
    fn test_labels() {
        let cases = [
            ("", "v", "empty label name"),
            ("k", "", "empty label value"),
            ("__name__", "other", "reserved label name"),
            ("k", "a\nb", "non-printable character"),
        ];
        for (name, value, expected) in cases {
            let point = MetricPoint::new("m", NOW, 1.0).with_tag(name, value);
            match point.validate(7, &ValidationPolicy::default(), NOW) {
                Err(Error::InvalidLabel { index, reason, .. }) => {
                    assert_eq!(index, 7);
                    assert_eq!(reason, expected);
                }
                other => panic!("{name:?}={value:?}: {other:?}"),
            }
        }
    }

    #[test]
    fn test_non_finite_policy() {
        let nan = MetricPoint::new("m", NOW, f64::NAN);
        let inf = MetricPoint::new("m", NOW, f64::NEG_INFINITY);
        assert!(matches!(check(&nan), Err(Error::InvalidValue { .. })));
        assert!(matches!(check(&inf), Err(Error::InvalidValue { .. })));

        let policy = ValidationPolicy {
            non_finite: NonFinitePolicy::Accept,
            ..Default::default()
        };
        assert!(nan.validate(0, &policy, NOW).is_ok());
        assert!(inf.validate(0, &policy, NOW).is_ok());
    }

    #[test]
    fn test_timestamps() {
        let negative = MetricPoint::new("m", -1, 1.0);
        assert!(matches!(
            check(&negative),
            Err(Error::InvalidTimestamp { reason: "negative", .. })
        ));

        let overflow = MetricPoint::new("m", Time::MAX, 1.0);
        let policy = ValidationPolicy {
            max_future_skew: None,
            ..Default::default()
        };
        assert!(matches!(
            overflow.validate(0, &policy, NOW),
            Err(Error::InvalidTimestamp { reason: "out of range", .. })
        ));

        let future = MetricPoint::new("m", NOW + 2 * 60 * 60, 1.0);
        assert!(matches!(
            check(&future),
            Err(Error::InvalidTimestamp { .. })
        ));
        assert!(future.validate(0, &policy, NOW).is_ok());
        assert!(check(&MetricPoint::new("m", NOW + 30 * 60, 1.0)).is_ok());
    }
}
