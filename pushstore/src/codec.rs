//! Record format for persisted metric families.
//!
//! A persistence file is a flat concatenation of records, one per stored
//! family:
//!
//! ```text
//! ┌──────────┬─────────────────────┬──────────┬─────────────────────┐
//! │ varint n │ MetricFamily (n B)  │ varint m │ Timestamp (m B)     │  record 0
//! ├──────────┼─────────────────────┼──────────┼─────────────────────┤
//! │ varint n │ MetricFamily (n B)  │ varint m │ Timestamp (m B)     │  record 1
//! └──────────┴─────────────────────┴──────────┴─────────────────────┘
//! ```
//!
//! Both fields are independently length-delimited protobuf messages. The
//! family bytes are the family's own protobuf encoding, so the record layer
//! never looks inside them. Job and instance are not stored; they are
//! recovered from the family's sample labels on restore (see
//! [`family_identity`]).

use std::io::Write;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use prost::Message;

use crate::error::CodecError;
use crate::family::{TimestampedFamily, family_identity, mismatched_identity};
use crate::index::Index;
use crate::proto::{MetricFamily, Timestamp};

const NANOS_PER_SECOND: i32 = 1_000_000_000;

/// Streams records into any [`Write`] implementation.
///
/// Families without samples are skipped, so they never reach the output.
#[derive(Debug)]
pub struct RecordWriter<W: Write> {
    inner: W,
    buf: Vec<u8>,
    written: usize,
}

impl<W: Write> RecordWriter<W> {
    /// Wraps a writer.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            written: 0,
        }
    }

    /// Encodes one record. Returns `false` if the family was skipped.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if encoding fails or the underlying writer
    /// returns an error.
    pub fn write(&mut self, record: &TimestampedFamily) -> Result<bool, CodecError> {
        if record.family.is_empty() {
            return Ok(false);
        }

        self.buf.clear();
        encode_record(record, &mut self.buf)?;
        self.inner
            .write_all(&self.buf)
            .map_err(|source| CodecError::Io { source })?;
        self.written += 1;
        Ok(true)
    }

    /// Number of records written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Returns the wrapped writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Appends the encoding of one record to `buf`.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if a field cannot be encoded.
pub fn encode_record(record: &TimestampedFamily, buf: &mut Vec<u8>) -> Result<(), CodecError> {
    let encode_err = |source: prost::EncodeError| CodecError::Encode {
        family: record.family.name.clone(),
        source,
    };

    record
        .family
        .encode_length_delimited(buf)
        .map_err(encode_err)?;
    to_proto_timestamp(record.timestamp)
        .encode_length_delimited(buf)
        .map_err(encode_err)?;
    Ok(())
}

/// Encodes every record into a freshly allocated buffer.
///
/// # Errors
///
/// Returns [`CodecError`] if any record fails to encode.
pub fn encode_records<'a, I>(records: I) -> Result<Vec<u8>, CodecError>
where
    I: IntoIterator<Item = &'a TimestampedFamily>,
{
    let mut writer = RecordWriter::new(Vec::new());
    for record in records {
        writer.write(record)?;
    }
    Ok(writer.into_inner())
}

/// Decodes every record in `bytes`.
///
/// Empty input yields no records. Any malformed or truncated record fails the
/// whole decode.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] or [`CodecError::InvalidTimestamp`] for the
/// first record that cannot be decoded.
pub fn decode_records(bytes: &[u8]) -> Result<Vec<TimestampedFamily>, CodecError> {
    let mut buf = bytes;
    let mut records = Vec::new();

    while !buf.is_empty() {
        let record = records.len();
        let decode_err = |offset: usize| {
            move |source: prost::DecodeError| CodecError::Decode {
                record,
                offset,
                source,
            }
        };

        let offset = bytes.len() - buf.len();
        let family = MetricFamily::decode_length_delimited(&mut buf).map_err(decode_err(offset))?;

        let offset = bytes.len() - buf.len();
        let timestamp = Timestamp::decode_length_delimited(&mut buf).map_err(decode_err(offset))?;

        records.push(TimestampedFamily::new(
            family,
            from_proto_timestamp(timestamp, record)?,
        ));
    }

    Ok(records)
}

/// Builds an index from decoded records.
///
/// Families without samples are dropped. Job and instance come from the
/// `job` and `instance` labels of each family's first sample; a warning is
/// logged when a later sample disagrees, and the first sample wins.
pub fn restore_index(records: Vec<TimestampedFamily>) -> Index {
    let mut index = Index::new();

    for record in records {
        let Some(identity) = family_identity(&record.family) else {
            continue;
        };

        if let Some(sample) = mismatched_identity(&record.family, &identity) {
            tracing::warn!(
                "family '{}' sample {sample} has job/instance labels differing from \
                 the first sample, keeping it under job '{}' instance '{}'",
                record.family.name,
                identity.job,
                identity.instance
            );
        }

        let name = record.family.name.clone();
        index.insert(&identity.job, &identity.instance, name, record);
    }

    index
}

/// Converts a wall-clock instant into its protobuf form.
pub fn to_proto_timestamp(time: SystemTime) -> Timestamp {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => Timestamp {
            seconds: i64::try_from(since.as_secs()).unwrap_or(i64::MAX),
            nanos: i32::try_from(since.subsec_nanos()).unwrap_or(0),
        },
        Err(before) => {
            let before = before.duration();
            let mut seconds = -i64::try_from(before.as_secs()).unwrap_or(i64::MAX);
            let mut nanos = i32::try_from(before.subsec_nanos()).unwrap_or(0);
            if nanos > 0 {
                seconds -= 1;
                nanos = NANOS_PER_SECOND - nanos;
            }
            Timestamp { seconds, nanos }
        }
    }
}

/// Converts a protobuf timestamp back into a wall-clock instant.
///
/// # Errors
///
/// Returns [`CodecError::InvalidTimestamp`] if the nanoseconds are out of
/// range or the instant cannot be represented.
pub fn from_proto_timestamp(ts: Timestamp, record: usize) -> Result<SystemTime, CodecError> {
    let invalid = || CodecError::InvalidTimestamp {
        record,
        seconds: ts.seconds,
        nanos: ts.nanos,
    };

    if !(0..NANOS_PER_SECOND).contains(&ts.nanos) {
        return Err(invalid());
    }
    let nanos = Duration::from_nanos(u64::try_from(ts.nanos).map_err(|_| invalid())?);

    let base = if ts.seconds >= 0 {
        let secs = u64::try_from(ts.seconds).map_err(|_| invalid())?;
        UNIX_EPOCH.checked_add(Duration::from_secs(secs))
    } else {
        UNIX_EPOCH.checked_sub(Duration::from_secs(ts.seconds.unsigned_abs()))
    };

    base.and_then(|t| t.checked_add(nanos)).ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{LabelPair, Metric, MetricType};

    fn sample_family(name: &str, job: &str, instance: &str) -> MetricFamily {
        MetricFamily::new(
            name,
            MetricType::Counter,
            vec![Metric::counter(
                vec![LabelPair::new("instance", instance), LabelPair::new("job", job)],
                42.0,
            )],
        )
    }

    fn at(secs: u64, nanos: u32) -> SystemTime {
        UNIX_EPOCH + Duration::new(secs, nanos)
    }

    #[test]
    fn test_empty_input_decodes_to_nothing() {
        let records = decode_records(&[]).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_records_survive_encoding() {
        let records = vec![
            TimestampedFamily::new(sample_family("a", "j1", "i1"), at(1_700_000_000, 123)),
            TimestampedFamily::new(sample_family("b", "j2", ""), at(1_700_000_001, 0)),
        ];

        let bytes = encode_records(&records).unwrap();
        let decoded = decode_records(&bytes).unwrap();

        assert_eq!(decoded, records);
    }

    #[test]
    fn test_empty_family_is_not_written() {
        let empty = TimestampedFamily::new(
            MetricFamily::new("nothing", MetricType::Gauge, vec![]),
            at(5, 0),
        );
        let full = TimestampedFamily::new(sample_family("a", "j", "i"), at(5, 0));

        let mut writer = RecordWriter::new(Vec::new());
        assert!(!writer.write(&empty).unwrap());
        assert!(writer.write(&full).unwrap());
        assert_eq!(writer.written(), 1);

        let decoded = decode_records(&writer.into_inner()).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].name(), "a");
    }

    #[test]
    fn test_truncated_record_fails() {
        let records = vec![
            TimestampedFamily::new(sample_family("a", "j", "i"), at(10, 0)),
            TimestampedFamily::new(sample_family("b", "j", "i"), at(10, 0)),
        ];
        let bytes = encode_records(&records).unwrap();

        let err = decode_records(&bytes[..bytes.len() - 3]).unwrap_err();
        match err {
            CodecError::Decode { record, .. } => assert_eq!(record, 1),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_timestamp_fails() {
        let mut bytes = Vec::new();
        sample_family("a", "j", "i")
            .encode_length_delimited(&mut bytes)
            .unwrap();

        let err = decode_records(&bytes).unwrap_err();
        assert!(matches!(err, CodecError::Decode { record: 0, .. }));
    }

    #[test]
    fn test_invalid_nanos_rejected() {
        let ts = Timestamp {
            seconds: 1,
            nanos: NANOS_PER_SECOND,
        };
        assert!(matches!(
            from_proto_timestamp(ts, 7),
            Err(CodecError::InvalidTimestamp { record: 7, .. })
        ));
    }

    #[test]
    fn test_pre_epoch_timestamp() {
        let time = UNIX_EPOCH - Duration::new(3, 250_000_000);
        let ts = to_proto_timestamp(time);

        assert_eq!(ts.seconds, -4);
        assert_eq!(ts.nanos, 750_000_000);
        assert_eq!(from_proto_timestamp(ts, 0).unwrap(), time);
    }

    #[test]
    fn test_restore_places_families_by_labels() {
        let records = vec![
            TimestampedFamily::new(sample_family("a", "j1", "i1"), at(1, 0)),
            TimestampedFamily::new(sample_family("b", "j1", "i1"), at(2, 0)),
            TimestampedFamily::new(sample_family("a", "j2", ""), at(3, 0)),
            TimestampedFamily::new(MetricFamily::new("empty", MetricType::Gauge, vec![]), at(4, 0)),
        ];

        let index = restore_index(records);

        assert_eq!(index.len(), 3);
        assert_eq!(index.get("j1", "i1", "b").unwrap().timestamp, at(2, 0));
        assert_eq!(index.get("j2", "", "a").unwrap().timestamp, at(3, 0));
        assert!(index.iter().all(|(_, _, f)| f.name() != "empty"));
    }

    #[test]
    fn test_restore_without_identity_labels_uses_empty_keys() {
        let family = MetricFamily::new(
            "bare",
            MetricType::Untyped,
            vec![Metric::untyped(vec![LabelPair::new("zone", "a")], 1.0)],
        );

        let index = restore_index(vec![TimestampedFamily::new(family, at(1, 0))]);

        assert!(index.get("", "", "bare").is_some());
    }
}
