//! Trace files: one whitespace-separated record per line,
//! `time bandwidth loss latency delay`, no header.
//!
//! Bandwidth arrives in bits/second and is stored in Mbps, halved by default
//! because the captured traces measure both directions of a duplex link.

use crate::error::{ReplayError, TraceFormatError, TraceFormatErrorKind};
use linkreplay_abstract::Sample;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Duration;

const FIELD_COUNT: usize = 5;

/// Largest accepted timestamp in seconds (a little under 32 years). Keeps every
/// due time representable as a `Duration` and as a wall-clock deadline.
pub const MAX_TIMESTAMP_SECS: f64 = 1e9;

fn timestamp_in_range(t: f64) -> bool {
    t.is_finite() && (0.0..=MAX_TIMESTAMP_SECS).contains(&t)
}

/// Ordered, immutable sequence of samples for one endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trace {
    samples: Vec<Sample>,
}

impl Trace {
    /// Build a trace from already-normalized samples. Timestamps must be
    /// non-decreasing; the offending position is reported 1-based.
    pub fn from_samples(samples: Vec<Sample>) -> Result<Self, TraceFormatError> {
        if let Some(idx) = samples
            .iter()
            .position(|s| !timestamp_in_range(s.timestamp))
        {
            return Err(TraceFormatError {
                line: idx + 1,
                kind: TraceFormatErrorKind::OutOfRange {
                    column: 1,
                    value: samples[idx].timestamp,
                },
            });
        }
        for (idx, pair) in samples.windows(2).enumerate() {
            if pair[1].timestamp < pair[0].timestamp {
                return Err(TraceFormatError {
                    line: idx + 2,
                    kind: TraceFormatErrorKind::TimeWentBackwards {
                        previous: pair[0].timestamp,
                        current: pair[1].timestamp,
                    },
                });
            }
        }
        Ok(Self { samples })
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn get(&self, index: usize) -> Option<&Sample> {
        self.samples.get(index)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Trace time of the last sample.
    pub fn duration(&self) -> Duration {
        self.samples
            .last()
            .map(|s| Duration::from_secs_f64(s.timestamp))
            .unwrap_or_default()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }
}

impl<'a> IntoIterator for &'a Trace {
    type Item = &'a Sample;
    type IntoIter = std::slice::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

/// Parses trace sources into [`Trace`]s.
#[derive(Debug, Clone)]
pub struct TraceReader {
    bandwidth_divisor: f64,
    duplex_halving: bool,
}

impl Default for TraceReader {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceReader {
    pub fn new() -> Self {
        Self {
            bandwidth_divisor: 1_000_000.0,
            duplex_halving: true,
        }
    }

    /// Divide raw bandwidth by this to get Mbps (default 1e6, input in bit/s).
    pub fn bandwidth_divisor(mut self, divisor: f64) -> Self {
        self.bandwidth_divisor = divisor;
        self
    }

    /// Halve bandwidth to account for duplex measurement (default on).
    pub fn duplex_halving(mut self, enabled: bool) -> Self {
        self.duplex_halving = enabled;
        self
    }

    pub fn read(&self, source: impl BufRead) -> Result<Trace, TraceFormatError> {
        let mut samples = Vec::new();
        let mut previous: Option<f64> = None;

        for (idx, line) in source.lines().enumerate() {
            let line_no = idx + 1;
            let line = line.map_err(|e| TraceFormatError {
                line: line_no,
                kind: TraceFormatErrorKind::Read(e.to_string()),
            })?;
            if line.trim().is_empty() {
                continue;
            }

            let sample = self
                .parse_line(&line)
                .map_err(|kind| TraceFormatError {
                    line: line_no,
                    kind,
                })?;

            if let Some(prev) = previous
                && sample.timestamp < prev
            {
                return Err(TraceFormatError {
                    line: line_no,
                    kind: TraceFormatErrorKind::TimeWentBackwards {
                        previous: prev,
                        current: sample.timestamp,
                    },
                });
            }
            previous = Some(sample.timestamp);
            samples.push(sample);
        }

        Ok(Trace { samples })
    }

    pub fn read_str(&self, text: &str) -> Result<Trace, TraceFormatError> {
        self.read(text.as_bytes())
    }

    pub fn read_file(&self, path: impl AsRef<Path>) -> Result<Trace, ReplayError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ReplayError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(self.read(BufReader::new(file))?)
    }

    fn parse_line(&self, line: &str) -> Result<Sample, TraceFormatErrorKind> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != FIELD_COUNT {
            return Err(TraceFormatErrorKind::FieldCount(fields.len()));
        }

        let mut values = [0.0f64; FIELD_COUNT];
        for (column, (field, slot)) in fields.iter().zip(values.iter_mut()).enumerate() {
            let value: f64 = field
                .parse()
                .map_err(|_| TraceFormatErrorKind::NotANumber {
                    column: column + 1,
                    value: field.to_string(),
                })?;
            if !value.is_finite() || value < 0.0 {
                return Err(TraceFormatErrorKind::OutOfRange {
                    column: column + 1,
                    value,
                });
            }
            *slot = value;
        }

        let [time, bits_per_sec, loss, latency, delay] = values;
        if !timestamp_in_range(time) {
            return Err(TraceFormatErrorKind::OutOfRange {
                column: 1,
                value: time,
            });
        }
        if loss > 100.0 {
            return Err(TraceFormatErrorKind::Loss(loss));
        }

        let mut bandwidth = bits_per_sec / self.bandwidth_divisor;
        if self.duplex_halving {
            bandwidth /= 2.0;
        }

        Ok(Sample::new(time, bandwidth, loss, latency, delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_documented_record() {
        let trace = TraceReader::new().read_str("0.0 2000000 0.5 10 5\n").unwrap();
        assert_eq!(trace.len(), 1);
        let s = trace.samples()[0];
        assert_eq!(s.timestamp, 0.0);
        assert_eq!(s.bandwidth, 1.0);
        assert_eq!(s.loss, 0.5);
        assert_eq!(s.latency, 10.0);
        assert_eq!(s.delay, 5.0);
    }

    #[test]
    fn keeps_every_line_and_non_bandwidth_fields_verbatim() {
        let text = "0 1000000 0 1 2\n0.5 3000000 1.25 3 4\n0.5 4000000 2 5 6\n7.125 0 100 7 8\n\n\n";
        let trace = TraceReader::new().read_str(text).unwrap();
        let got: Vec<_> = trace
            .iter()
            .map(|s| (s.timestamp, s.bandwidth, s.loss, s.latency, s.delay))
            .collect();
        assert_eq!(
            got,
            vec![
                (0.0, 0.5, 0.0, 1.0, 2.0),
                (0.5, 1.5, 1.25, 3.0, 4.0),
                (0.5, 2.0, 2.0, 5.0, 6.0),
                (7.125, 0.0, 100.0, 7.0, 8.0),
            ]
        );
        assert_eq!(trace.duration(), Duration::from_secs_f64(7.125));
    }

    #[test]
    fn halving_and_divisor_are_configurable() {
        let trace = TraceReader::new()
            .duplex_halving(false)
            .bandwidth_divisor(1000.0)
            .read_str("1 2000 0 0 0")
            .unwrap();
        assert_eq!(trace.samples()[0].bandwidth, 2.0);
    }

    #[test]
    fn empty_input_is_an_empty_trace() {
        let trace = TraceReader::new().read_str("").unwrap();
        assert!(trace.is_empty());
        assert_eq!(trace.duration(), Duration::ZERO);
    }

    #[test]
    fn reports_line_of_wrong_field_count() {
        let err = TraceReader::new()
            .read_str("0 1 0 0 0\n1 1 0 0\n")
            .unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.kind, TraceFormatErrorKind::FieldCount(4));
    }

    #[test]
    fn reports_line_of_non_numeric_field() {
        let err = TraceReader::new()
            .read_str("0 1 0 0 0\n\n2 1 x 0 0\n3 1 0 0 0\n")
            .unwrap_err();
        assert_eq!(err.line, 3);
        assert_eq!(
            err.kind,
            TraceFormatErrorKind::NotANumber {
                column: 3,
                value: "x".into()
            }
        );
    }

    #[test]
    fn rejects_out_of_range_values() {
        let err = TraceReader::new().read_str("0 1 150 0 0").unwrap_err();
        assert_eq!(err.kind, TraceFormatErrorKind::Loss(150.0));

        let err = TraceReader::new().read_str("0 -1 0 0 0").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(matches!(err.kind, TraceFormatErrorKind::OutOfRange { column: 2, .. }));

        let err = TraceReader::new().read_str("NaN 1 0 0 0").unwrap_err();
        assert!(matches!(err.kind, TraceFormatErrorKind::OutOfRange { column: 1, .. }));
    }

    #[test]
    fn rejects_timestamps_too_large_to_schedule() {
        let err = TraceReader::new()
            .read_str("0 1 0 0 0\n1e20 1 0 0 0\n")
            .unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(
            err.kind,
            TraceFormatErrorKind::OutOfRange {
                column: 1,
                value: 1e20
            }
        );

        let edge = TraceReader::new()
            .read_str(&format!("{MAX_TIMESTAMP_SECS} 1 0 0 0"))
            .unwrap();
        assert_eq!(edge.duration(), Duration::from_secs(1_000_000_000));

        let err = Trace::from_samples(vec![
            Sample::new(0.0, 1.0, 0.0, 0.0, 0.0),
            Sample::new(f64::MAX, 1.0, 0.0, 0.0, 0.0),
        ])
        .unwrap_err();
        assert_eq!(err.line, 2);
        assert!(matches!(err.kind, TraceFormatErrorKind::OutOfRange { column: 1, .. }));
    }

    #[test]
    fn rejects_timestamps_going_backwards() {
        let err = TraceReader::new()
            .read_str("0 1 0 0 0\n2 1 0 0 0\n1 1 0 0 0\n")
            .unwrap_err();
        assert_eq!(err.line, 3);
        assert!(matches!(
            err.kind,
            TraceFormatErrorKind::TimeWentBackwards { .. }
        ));
    }

    #[test]
    fn reads_files_and_reports_missing_ones() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0.0 2000000 0.5 10 5").unwrap();
        writeln!(file, "1.0 4000000 1 20 6").unwrap();
        let trace = TraceReader::new().read_file(file.path()).unwrap();
        assert_eq!(trace.len(), 2);

        let err = TraceReader::new()
            .read_file(file.path().with_extension("missing"))
            .unwrap_err();
        assert!(matches!(err, ReplayError::Io { .. }));
    }

    #[test]
    fn from_samples_checks_order() {
        let err = Trace::from_samples(vec![
            Sample::new(1.0, 1.0, 0.0, 0.0, 0.0),
            Sample::new(0.5, 1.0, 0.0, 0.0, 0.0),
        ])
        .unwrap_err();
        assert_eq!(err.line, 2);
    }
}
