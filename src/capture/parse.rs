//! Raw capture parsing.
//!
//! Turns the producer's line stream into a [`Capture`]. Line 1 is a header
//! (`"<format-marker>","<metric-1>",...`), every following line is one
//! sampling tick (`"<timestamp>","<value-1>",...`). Any structural problem
//! rejects the whole capture; the only tolerated defect is a truncated final
//! row of a cancelled run, which is dropped in its entirety.

use std::collections::HashSet;

use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::{debug, warn};

use super::record::{split_record, RecordError};
use super::sample::{Sample, SampleValue};
use super::{Capture, MetricSeries};

/// Default timestamp layout of data rows.
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Timestamp layout written by typeperf, e.g. `01/02/2024 10:00:00.123`.
pub const TYPEPERF_TIMESTAMP_FORMAT: &str = "%m/%d/%Y %H:%M:%S%.f";

/// Errors that reject a raw capture.
///
/// Line numbers are 1-based positions in the raw stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed header on line {line}: {reason}")]
    MalformedHeader { line: usize, reason: String },

    #[error("line {line}: expected {expected} columns, found {found}")]
    ColumnCountMismatch {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("line {line}: unterminated quoted field")]
    UnterminatedQuote { line: usize },

    #[error("line {line}: invalid timestamp {value:?} (expected format {format:?})")]
    Timestamp {
        line: usize,
        value: String,
        format: String,
    },

    #[error("line {line}, column {column}: invalid value {value:?}")]
    InvalidValue {
        line: usize,
        column: usize,
        value: String,
    },

    #[error("line {line}: timestamp {timestamp} is earlier than the previous row")]
    OutOfOrder { line: usize, timestamp: NaiveDateTime },
}

/// Parser settings.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// chrono format string for the timestamp column.
    pub timestamp_format: String,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
        }
    }
}

/// Why a capture produced nothing to export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyReason {
    /// The raw stream had no non-blank lines.
    NoLines,
    /// The header declared no metrics.
    NoMetrics,
    /// No complete data row survived.
    NoRows,
}

impl EmptyReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoLines => "no lines",
            Self::NoMetrics => "no metrics",
            Self::NoRows => "no complete rows",
        }
    }
}

/// Result of parsing a raw capture.
#[derive(Debug, Clone)]
pub enum ParsedCapture {
    Capture(Capture),
    Empty(EmptyReason),
}

impl ParsedCapture {
    /// Returns the capture, or `None` when there is nothing to export.
    pub fn into_capture(self) -> Option<Capture> {
        match self {
            Self::Capture(c) => Some(c),
            Self::Empty(_) => None,
        }
    }
}

/// Parse a whole raw capture held in memory.
pub fn parse_text(
    text: &str,
    was_cancelled: bool,
    options: &ParseOptions,
) -> Result<ParsedCapture, ParseError> {
    let lines: Vec<&str> = text.lines().collect();

    // A killed producer can stop mid-value with the field count still intact.
    let trailing = &text[text.trim_end().len()..];
    let final_unterminated = !text.trim().is_empty() && !trailing.contains('\n');

    parse_lines(&lines, was_cancelled, final_unterminated, options)
}

/// Parse an ordered sequence of raw lines.
pub fn parse<L: AsRef<str>>(
    lines: &[L],
    was_cancelled: bool,
    options: &ParseOptions,
) -> Result<ParsedCapture, ParseError> {
    parse_lines(lines, was_cancelled, false, options)
}

fn parse_lines<L: AsRef<str>>(
    lines: &[L],
    was_cancelled: bool,
    final_unterminated: bool,
    options: &ParseOptions,
) -> Result<ParsedCapture, ParseError> {
    let mut numbered = lines
        .iter()
        .enumerate()
        .map(|(i, l)| (i + 1, l.as_ref()))
        .filter(|(_, l)| !l.trim().is_empty());

    let Some((header_line, header)) = numbered.next() else {
        debug!("raw capture has no lines");
        return Ok(ParsedCapture::Empty(EmptyReason::NoLines));
    };

    let names = parse_header(header_line, header)?;
    if names.is_empty() {
        return Ok(ParsedCapture::Empty(EmptyReason::NoMetrics));
    }

    let rows: Vec<(usize, &str)> = numbered.collect();
    let expected = names.len() + 1;

    let mut series: Vec<MetricSeries> = names
        .into_iter()
        .map(|name| MetricSeries::with_capacity(name, rows.len()))
        .collect();

    let mut dropped_partial_row = false;
    let mut previous: Option<NaiveDateTime> = None;
    let last_index = rows.len().saturating_sub(1);

    for (i, &(line, raw)) in rows.iter().enumerate() {
        let is_final = i == last_index;

        if was_cancelled && is_final && final_unterminated {
            warn!(line, "dropping unterminated final row of cancelled capture");
            dropped_partial_row = true;
            break;
        }

        let fields = match split_record(raw) {
            Ok(fields) => fields,
            Err(RecordError::UnterminatedQuote) if was_cancelled && is_final => {
                warn!(line, "dropping truncated final row of cancelled capture");
                dropped_partial_row = true;
                break;
            }
            Err(RecordError::UnterminatedQuote) => {
                return Err(ParseError::UnterminatedQuote { line });
            }
        };

        if fields.len() != expected {
            if was_cancelled && is_final {
                warn!(
                    line,
                    expected,
                    found = fields.len(),
                    "dropping partial final row of cancelled capture",
                );
                dropped_partial_row = true;
                break;
            }
            return Err(ParseError::ColumnCountMismatch {
                line,
                expected,
                found: fields.len(),
            });
        }

        let (timestamp_field, value_fields) = fields.split_at(1);
        let timestamp = parse_timestamp(line, &timestamp_field[0], &options.timestamp_format)?;

        if previous.is_some_and(|p| timestamp < p) {
            return Err(ParseError::OutOfOrder { line, timestamp });
        }
        previous = Some(timestamp);

        // Validate the whole row before appending so no series grows alone.
        let values = value_fields
            .iter()
            .enumerate()
            .map(|(col, raw)| {
                SampleValue::from_field(raw).ok_or_else(|| ParseError::InvalidValue {
                    line,
                    column: col + 2,
                    value: raw.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        for (s, value) in series.iter_mut().zip(values) {
            s.push(Sample::new(timestamp, value));
        }
    }

    let capture = Capture::new(series, was_cancelled, dropped_partial_row);
    if capture.row_count() == 0 {
        return Ok(ParsedCapture::Empty(EmptyReason::NoRows));
    }

    debug!(
        metrics = capture.len(),
        rows = capture.row_count(),
        dropped_partial_row,
        "parsed raw capture",
    );

    Ok(ParsedCapture::Capture(capture))
}

/// Split and validate the header, returning metric names in order.
fn parse_header(line: usize, raw: &str) -> Result<Vec<String>, ParseError> {
    let malformed = |reason: String| ParseError::MalformedHeader { line, reason };

    let mut fields = split_record(raw).map_err(|e| malformed(e.to_string()))?;

    if fields.first().map_or(true, |marker| marker.trim().is_empty()) {
        return Err(malformed("missing format marker".to_string()));
    }

    let names = fields.split_off(1);
    let mut seen = HashSet::with_capacity(names.len());

    for (i, name) in names.iter().enumerate() {
        if name.trim().is_empty() {
            return Err(malformed(format!("empty metric name in column {}", i + 2)));
        }
        if !seen.insert(name.as_str()) {
            return Err(malformed(format!("duplicate metric name {name:?}")));
        }
    }

    Ok(names)
}

fn parse_timestamp(line: usize, raw: &str, format: &str) -> Result<NaiveDateTime, ParseError> {
    NaiveDateTime::parse_from_str(raw.trim(), format).map_err(|_| ParseError::Timestamp {
        line,
        value: raw.to_string(),
        format: format.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    const HEADER: &str = r#""(FMT)","\M\CounterA","\M\CounterB""#;

    fn ts(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(h, m, s))
            .expect("valid timestamp")
    }

    fn parse_ok(lines: &[&str], was_cancelled: bool) -> Capture {
        match parse(lines, was_cancelled, &ParseOptions::default()).expect("parse should succeed")
        {
            ParsedCapture::Capture(c) => c,
            ParsedCapture::Empty(reason) => panic!("unexpected empty capture: {reason:?}"),
        }
    }

    #[test]
    fn test_well_formed_capture() {
        let capture = parse_ok(
            &[
                HEADER,
                r#""2024-01-01 00:00:00","1.5","2.0""#,
                r#""2024-01-01 00:00:02","3.25","n/a""#,
            ],
            false,
        );

        let names: Vec<&str> = capture.names().collect();
        assert_eq!(names, vec![r"\M\CounterA", r"\M\CounterB"]);
        assert_eq!(capture.row_count(), 2);
        assert!(!capture.was_cancelled());
        assert!(!capture.dropped_partial_row());

        let a = capture.series(r"\M\CounterA").expect("series a");
        assert_eq!(a.samples()[0], Sample::new(ts(0, 0, 0), SampleValue::Number(1.5)));
        assert_eq!(a.samples()[1], Sample::new(ts(0, 0, 2), SampleValue::Number(3.25)));

        let b = capture.series(r"\M\CounterB").expect("series b");
        assert_eq!(b.samples()[0].value(), SampleValue::Number(2.0));
        assert_eq!(b.samples()[1].value(), SampleValue::NoData);
    }

    #[test]
    fn test_cancelled_drops_short_final_row() {
        let capture = parse_ok(
            &[
                HEADER,
                r#""2024-01-01 00:00:00","1.5","2.0""#,
                r#""2024-01-01 00:00:02","3.25","n/a""#,
                r#""2024-01-01 00:00:04","5.0""#,
            ],
            true,
        );

        assert_eq!(capture.row_count(), 2);
        for s in capture.iter() {
            assert_eq!(s.len(), 2);
        }
        assert!(capture.was_cancelled());
        assert!(capture.dropped_partial_row());
    }

    #[test]
    fn test_cancelled_drops_final_row_cut_inside_quotes() {
        let capture = parse_ok(
            &[
                HEADER,
                r#""2024-01-01 00:00:00","1.5","2.0""#,
                r#""2024-01-01 00:00:02","3.25","4."#,
            ],
            true,
        );
        assert_eq!(capture.row_count(), 1);
        assert!(capture.dropped_partial_row());
    }

    #[test]
    fn test_cancelled_keeps_complete_final_row() {
        let capture = parse_ok(
            &[
                HEADER,
                r#""2024-01-01 00:00:00","1.5","2.0""#,
                r#""2024-01-01 00:00:02","3.25","4""#,
            ],
            true,
        );
        assert_eq!(capture.row_count(), 2);
        assert!(!capture.dropped_partial_row());
    }

    #[test]
    fn test_not_cancelled_short_row_is_error() {
        let err = parse(
            &[
                HEADER,
                r#""2024-01-01 00:00:00","1.5","2.0""#,
                r#""2024-01-01 00:00:04","5.0""#,
            ],
            false,
            &ParseOptions::default(),
        )
        .unwrap_err();

        assert_eq!(
            err,
            ParseError::ColumnCountMismatch {
                line: 3,
                expected: 3,
                found: 2
            }
        );
    }

    #[test]
    fn test_cancelled_short_row_in_middle_is_error() {
        let err = parse(
            &[
                HEADER,
                r#""2024-01-01 00:00:00","1.5""#,
                r#""2024-01-01 00:00:02","3.25","4""#,
            ],
            true,
            &ParseOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ParseError::ColumnCountMismatch { line: 2, .. }));
    }

    #[test]
    fn test_extra_column_is_error() {
        let err = parse(
            &[HEADER, r#""2024-01-01 00:00:00","1","2","3""#],
            false,
            &ParseOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ParseError::ColumnCountMismatch {
                expected: 3,
                found: 4,
                ..
            }
        ));
    }

    #[test]
    fn test_unterminated_quote_not_cancelled_is_error() {
        let err = parse(
            &[HEADER, r#""2024-01-01 00:00:00","1","2"#],
            false,
            &ParseOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err, ParseError::UnterminatedQuote { line: 2 });
    }

    #[test]
    fn test_metric_names_with_delimiter() {
        let capture = parse_ok(
            &[
                r#""(PDH-CSV 4.0)","\\h\Process(a,b)\IO Bytes","\\h\Memory\Pages/sec""#,
                r#""2024-01-01 00:00:00","10","20""#,
            ],
            false,
        );
        let names: Vec<&str> = capture.names().collect();
        assert_eq!(names, vec![r"\\h\Process(a,b)\IO Bytes", r"\\h\Memory\Pages/sec"]);
    }

    #[test]
    fn test_malformed_header() {
        let opts = ParseOptions::default();

        let err = parse(&[r#""","\M\A""#], false, &opts).unwrap_err();
        assert!(matches!(err, ParseError::MalformedHeader { line: 1, .. }));
        assert!(err.to_string().contains("format marker"));

        let err = parse(&[r#""(FMT)","\M\A"#], false, &opts).unwrap_err();
        assert!(matches!(err, ParseError::MalformedHeader { .. }));

        let err = parse(&[r#""(FMT)","\M\A","\M\A""#], false, &opts).unwrap_err();
        assert!(err.to_string().contains("duplicate"));

        let err = parse(&[r#""(FMT)","","\M\A""#], false, &opts).unwrap_err();
        assert!(err.to_string().contains("empty metric name"));
    }

    #[test]
    fn test_bad_timestamp_is_error() {
        let err = parse(
            &[HEADER, r#""not a time","1","2""#],
            false,
            &ParseOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ParseError::Timestamp { line: 2, .. }));
    }

    #[test]
    fn test_custom_timestamp_format() {
        let opts = ParseOptions {
            timestamp_format: "%m/%d/%Y %H:%M:%S%.f".to_string(),
        };
        let parsed = parse(
            &[HEADER, r#""01/01/2024 00:00:01.250","1","2""#],
            false,
            &opts,
        )
        .expect("parse");
        let capture = parsed.into_capture().expect("non-empty");
        let sample = capture.series(r"\M\CounterA").expect("series").samples()[0];
        assert_eq!(
            sample.timestamp(),
            ts(0, 0, 1) + chrono::Duration::milliseconds(250)
        );
    }

    #[test]
    fn test_invalid_value_is_error() {
        let err = parse(
            &[HEADER, r#""2024-01-01 00:00:00","1","oops""#],
            false,
            &ParseOptions::default(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidValue {
                line: 2,
                column: 3,
                value: "oops".to_string()
            }
        );
    }

    #[test]
    fn test_out_of_order_timestamps() {
        let err = parse(
            &[
                HEADER,
                r#""2024-01-01 00:00:02","1","2""#,
                r#""2024-01-01 00:00:01","1","2""#,
            ],
            false,
            &ParseOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ParseError::OutOfOrder { line: 3, .. }));
    }

    #[test]
    fn test_equal_timestamps_allowed() {
        let capture = parse_ok(
            &[
                HEADER,
                r#""2024-01-01 00:00:02","1","2""#,
                r#""2024-01-01 00:00:02","3","4""#,
            ],
            false,
        );
        assert_eq!(capture.row_count(), 2);
    }

    #[test]
    fn test_empty_inputs() {
        let opts = ParseOptions::default();
        let empty: [&str; 0] = [];

        assert!(matches!(
            parse(&empty, false, &opts),
            Ok(ParsedCapture::Empty(EmptyReason::NoLines))
        ));
        assert!(matches!(
            parse(&["", "   "], true, &opts),
            Ok(ParsedCapture::Empty(EmptyReason::NoLines))
        ));
        assert!(matches!(
            parse(&[r#""(FMT)""#], false, &opts),
            Ok(ParsedCapture::Empty(EmptyReason::NoMetrics))
        ));
        assert!(matches!(
            parse(&[HEADER], false, &opts),
            Ok(ParsedCapture::Empty(EmptyReason::NoRows))
        ));
        // Only a partial row after the header.
        assert!(matches!(
            parse(&[HEADER, r#""2024-01-01 00:00:00","1""#], true, &opts),
            Ok(ParsedCapture::Empty(EmptyReason::NoRows))
        ));
    }

    #[test]
    fn test_parse_text_skips_blank_lines() {
        let text = "\r\n\"(FMT)\",\"\\M\\CounterA\",\"\\M\\CounterB\"\r\n\
                    \"2024-01-01 00:00:00\",\"1\",\"2\"\r\n\r\n";
        let parsed = parse_text(text, false, &ParseOptions::default()).expect("parse");
        let capture = parsed.into_capture().expect("non-empty");
        assert_eq!(capture.len(), 2);
        assert_eq!(capture.row_count(), 1);
    }

    #[test]
    fn test_parse_text_cancelled_drops_unterminated_final_row() {
        // Field count is intact but the last value was cut short.
        let text = format!(
            "{HEADER}\n\"2024-01-01 00:00:00\",\"1\",\"2\"\n\"2024-01-01 00:00:02\",\"3\",4"
        );

        let capture = parse_text(&text, true, &ParseOptions::default())
            .expect("parse")
            .into_capture()
            .expect("non-empty");
        assert_eq!(capture.row_count(), 1);
        assert!(capture.dropped_partial_row());

        // Without cancellation the row is taken as written.
        let capture = parse_text(&text, false, &ParseOptions::default())
            .expect("parse")
            .into_capture()
            .expect("non-empty");
        assert_eq!(capture.row_count(), 2);
        assert!(!capture.dropped_partial_row());
    }

    #[test]
    fn test_parse_text_cancelled_keeps_terminated_final_row() {
        let text = format!("{HEADER}\r\n\"2024-01-01 00:00:00\",\"1\",\"2\"\r\n  ");

        let capture = parse_text(&text, true, &ParseOptions::default())
            .expect("parse")
            .into_capture()
            .expect("non-empty");
        assert_eq!(capture.row_count(), 1);
        assert!(!capture.dropped_partial_row());
    }

    #[test]
    fn test_parse_error_display() {
        let e = ParseError::ColumnCountMismatch {
            line: 4,
            expected: 3,
            found: 2,
        };
        assert_eq!(e.to_string(), "line 4: expected 3 columns, found 2");

        let e = ParseError::UnterminatedQuote { line: 9 };
        assert_eq!(e.to_string(), "line 9: unterminated quoted field");
    }
}
