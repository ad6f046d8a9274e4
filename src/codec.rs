use std::collections::BTreeMap;

use log::debug;
use prost::Message;

use crate::{
    point::METRIC_NAME_LABEL,
    proto::{Label, Sample, TimeSeries, WriteRequest},
    Error, MetricPoint,
};

/// Serialized and compressed batch, ready to be sent.
#[derive(Debug, Clone)]
pub struct EncodedBatch {
    pub payload: Vec<u8>,
    pub uncompressed_len: usize,
    pub compressed_len: usize,
    pub series: usize,
    pub samples: usize,
}

/// Block compressor applied to the serialized request.
pub trait Compression: core::fmt::Debug + Send + Sync {
    /// Value of the `Content-Encoding` header.
    fn name(&self) -> &'static str;
    fn compress(&self, raw: &[u8]) -> Result<Vec<u8>, Error>;
    fn decompress(&self, payload: &[u8]) -> Result<Vec<u8>, Error>;
}

/// Snappy block format, the encoding remote write servers require.
#[derive(Debug, Clone, Copy, Default)]
pub struct Snappy;
impl Compression for Snappy {
    fn name(&self) -> &'static str {
        "snappy"
    }
    fn compress(&self, raw: &[u8]) -> Result<Vec<u8>, Error> {
        snap::raw::Encoder::new()
            .compress_vec(raw)
            .map_err(|e| Error::Compression {
                codec: self.name(),
                message: e.to_string(),
            })
    }
    fn decompress(&self, payload: &[u8]) -> Result<Vec<u8>, Error> {
        snap::raw::Decoder::new()
            .decompress_vec(payload)
            .map_err(|e| Error::Decode(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;
impl Compression for Identity {
    fn name(&self) -> &'static str {
        "identity"
    }
    fn compress(&self, raw: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(raw.to_vec())
    }
    fn decompress(&self, payload: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(payload.to_vec())
    }
}

/// Groups points into one series per metric name and label set.
///
/// Series come out in label order and samples in timestamp order, so the
/// request does not depend on the order of `points`. Samples sharing a
/// timestamp keep their input order.
pub fn build_write_request(points: &[MetricPoint]) -> WriteRequest {
    let mut groups: BTreeMap<(&str, &BTreeMap<String, String>), Vec<Sample>> = BTreeMap::new();
    for point in points {
        let sample = Sample {
            value: point.value,
            timestamp: point.time_ms(),
        };
        groups
            .entry((point.metric.as_str(), &point.tags))
            .or_default()
            .push(sample);
    }
    let timeseries = groups
        .into_iter()
        .map(|((metric, tags), mut samples)| {
            samples.sort_by_key(|sample| sample.timestamp);
            if samples.windows(2).any(|w| w[0].timestamp == w[1].timestamp) {
                debug!("series {metric}{tags:?} has duplicate timestamps");
            }
            let mut labels = Vec::with_capacity(tags.len() + 1);
            labels.push(Label {
                name: METRIC_NAME_LABEL.to_string(),
                value: metric.to_string(),
            });
            labels.extend(tags.iter().map(|(name, value)| Label {
                name: name.clone(),
                value: value.clone(),
            }));
            // `__name__` does not sort first against upper-case label names
            labels.sort_by(|a, b| a.name.cmp(&b.name));
            TimeSeries { labels, samples }
        })
        .collect();
    WriteRequest { timeseries }
}

pub fn encode(points: &[MetricPoint], compression: &dyn Compression) -> Result<EncodedBatch, Error> {
    let request = build_write_request(points);
    if request.timeseries.is_empty() {
        return Err(Error::EmptyBatch);
    }
    let raw = request.encode_to_vec();
    let payload = compression.compress(&raw)?;
    let batch = EncodedBatch {
        uncompressed_len: raw.len(),
        compressed_len: payload.len(),
        payload,
        series: request.timeseries.len(),
        samples: points.len(),
    };
    debug!(
        "encoded {} samples in {} series: {} bytes, {} bytes {}",
        batch.samples,
        batch.series,
        batch.uncompressed_len,
        batch.compressed_len,
        compression.name()
    );
    Ok(batch)
}

/// Inverse of [`encode`], as performed by the receiving server.
pub fn decode(payload: &[u8], compression: &dyn Compression) -> Result<WriteRequest, Error> {
    let raw = compression.decompress(payload)?;
    WriteRequest::decode(raw.as_slice()).map_err(|e| Error::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points() -> Vec<MetricPoint> {
        vec![
            MetricPoint::new("test1", 300, 2.0)
                .with_tag("env", "test_env1")
                .with_tag("job", "test_job1"),
            MetricPoint::new("test2", 200, 3.0)
                .with_tag("env", "test_env2")
                .with_tag("job", "test_job2"),
            MetricPoint::new("test1", 100, 4.0)
                .with_tag("env", "test_env3")
                .with_tag("job", "test_job3"),
            MetricPoint::new("test1", 100, 5.0)
                .with_tag("env", "test_env1")
                .with_tag("job", "test_job1"),
        ]
    }

    fn label_pairs(series: &TimeSeries) -> Vec<(&str, &str)> {
        series
            .labels
            .iter()
            .map(|l| (l.name.as_str(), l.value.as_str()))
            .collect()
    }

    #[test]
    fn test_group_by_series() {
        let request = build_write_request(&points());
        assert_eq!(request.timeseries.len(), 3);

        let first = &request.timeseries[0];
        assert_eq!(
            label_pairs(first),
            [("__name__", "test1"), ("env", "test_env1"), ("job", "test_job1")]
        );
        let samples: Vec<_> = first.samples.iter().map(|s| (s.timestamp, s.value)).collect();
        assert_eq!(samples, [(100_000, 5.0), (300_000, 2.0)]);

        assert_eq!(label_pairs(&request.timeseries[1])[1], ("env", "test_env3"));
        assert_eq!(label_pairs(&request.timeseries[2])[0], ("__name__", "test2"));
    }

    #[test]
    fn test_order_invariant() {
        let mut points = points();
        let expected = build_write_request(&points);
        points.reverse();
        assert_eq!(build_write_request(&points), expected);
        points.rotate_left(1);
        assert_eq!(build_write_request(&points), expected);
    }

    #[test]
    fn test_labels_sorted_by_name() {
        let point = MetricPoint::new("m", 1, 1.0)
            .with_tag("Zone", "a")
            .with_tag("alpha", "b");
        let request = build_write_request(&[point]);
        assert_eq!(
            label_pairs(&request.timeseries[0]),
            [("Zone", "a"), ("__name__", "m"), ("alpha", "b")]
        );
    }

    #[test]
    fn test_equal_timestamps_keep_input_order() {
        let points: Vec<_> = [(5, 1.0), (3, 2.0), (5, 3.0), (3, 4.0)]
            .into_iter()
            .map(|(time, value)| MetricPoint::new("m", time, value))
            .collect();
        let request = build_write_request(&points);
        let values: Vec<_> = request.timeseries[0].samples.iter().map(|s| s.value).collect();
        assert_eq!(values, [2.0, 4.0, 1.0, 3.0]);
    }

    #[test]
    fn test_encode_decode() {
        let points = points();
        let batch = encode(&points, &Snappy).unwrap();
        assert_eq!(batch.series, 3);
        assert_eq!(batch.samples, 4);
        assert_eq!(batch.compressed_len, batch.payload.len());
        assert_eq!(decode(&batch.payload, &Snappy).unwrap(), build_write_request(&points));

        let batch = encode(&points, &Identity).unwrap();
        assert_eq!(batch.uncompressed_len, batch.compressed_len);
        assert_eq!(decode(&batch.payload, &Identity).unwrap(), build_write_request(&points));
    }

    #[test]
    fn test_empty_batch() {
        assert!(matches!(encode(&[], &Snappy), Err(Error::EmptyBatch)));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(decode(&[0xff; 16], &Snappy), Err(Error::Decode(_))));
    }
}
