//! The point model and its canonical line-format encoding.
//!
//! A point is an immutable record of measurement name, tag set, field set and
//! nanosecond timestamp. Points travel between nodes encoded one-per-frame in
//! the established line format:
//!
//! ```text
//! measurement[,tag=value...] field=value[,field=value...] timestamp
//! ```
//!
//! Tags are kept sorted, so the encoding is canonical: encoding a decoded
//! point reproduces the input bytes.

use std::collections::BTreeMap;
use std::fmt::Write;

use thiserror::Error;
use twox_hash::XxHash64;

/// Fixed seed for the series-key hash so shard placement is stable across
/// nodes and restarts.
const SERIES_HASH_SEED: u64 = 0;

/// Characters escaped in measurement names.
const MEASUREMENT_SPECIALS: &[u8] = &[b',', b' '];

/// Characters escaped in tag keys, tag values and field keys.
const TAG_SPECIALS: &[u8] = &[b',', b'=', b' '];

/// Errors building or parsing a [`Point`].
#[derive(Debug, Error)]
pub enum PointError {
    #[error("point is missing a measurement")]
    EmptyMeasurement,

    #[error("point has no fields")]
    NoFields,

    #[error("field {field} is not a finite number")]
    NonFiniteFloat { field: String },

    #[error("malformed tag set")]
    MalformedTag,

    #[error("missing fields")]
    MissingFields,

    #[error("malformed field set")]
    MalformedField,

    #[error("unterminated string field value")]
    UnterminatedString,

    #[error("invalid field value: {value}")]
    InvalidFieldValue { value: String },

    #[error("missing timestamp")]
    MissingTimestamp,

    #[error("invalid timestamp: {value}")]
    InvalidTimestamp { value: String },

    #[error("point payload is not valid utf-8")]
    InvalidUtf8,
}

/// The value of a single field of a [`Point`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    Unsigned(u64),
    Boolean(bool),
    String(String),
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        Self::Unsigned(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// An immutable measurement sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    measurement: String,
    tags: BTreeMap<String, String>,
    fields: BTreeMap<String, FieldValue>,
    time: i64,
}

impl Point {
    /// Build a point, validating that it carries a measurement, at least one
    /// field, and only finite float values.
    pub fn new<M, TK, TV, FK, FV>(
        measurement: M,
        tags: impl IntoIterator<Item = (TK, TV)>,
        fields: impl IntoIterator<Item = (FK, FV)>,
        time: i64,
    ) -> Result<Self, PointError>
    where
        M: Into<String>,
        TK: Into<String>,
        TV: Into<String>,
        FK: Into<String>,
        FV: Into<FieldValue>,
    {
        let measurement = measurement.into();
        if measurement.is_empty() {
            return Err(PointError::EmptyMeasurement);
        }

        let tags: BTreeMap<String, String> =
            tags.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        let fields: BTreeMap<String, FieldValue> = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        if fields.is_empty() {
            return Err(PointError::NoFields);
        }
        for (k, v) in &fields {
            if let FieldValue::Float(f) = v {
                if !f.is_finite() {
                    return Err(PointError::NonFiniteFloat { field: k.clone() });
                }
            }
        }

        Ok(Self {
            measurement,
            tags,
            fields,
            time,
        })
    }

    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    /// The point's timestamp in nanoseconds since the Unix epoch.
    pub fn time(&self) -> i64 {
        self.time
    }

    /// The series key: the escaped measurement followed by the sorted,
    /// escaped tag pairs. Two points of the same series always produce the
    /// same key regardless of their fields or timestamps.
    pub fn series_key(&self) -> String {
        let mut key = escape(self.measurement.as_bytes(), MEASUREMENT_SPECIALS);
        for (k, v) in &self.tags {
            key.push(',');
            key.push_str(&escape(k.as_bytes(), TAG_SPECIALS));
            key.push('=');
            key.push_str(&escape(v.as_bytes(), TAG_SPECIALS));
        }
        key
    }

    /// A stable 64-bit hash over the series key, used to place the series on
    /// a shard within a shard group.
    pub fn hash_id(&self) -> u64 {
        XxHash64::oneshot(SERIES_HASH_SEED, self.series_key().as_bytes())
    }

    /// Encode the point in the canonical line format.
    pub fn to_line_protocol(&self) -> String {
        let mut out = self.series_key();
        out.push(' ');

        for (i, (k, v)) in self.fields.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&escape(k.as_bytes(), TAG_SPECIALS));
            out.push('=');
            match v {
                FieldValue::Float(f) => write!(out, "{f}").expect("writing to a String"),
                FieldValue::Integer(i) => write!(out, "{i}i").expect("writing to a String"),
                FieldValue::Unsigned(u) => write!(out, "{u}u").expect("writing to a String"),
                FieldValue::Boolean(true) => out.push_str("true"),
                FieldValue::Boolean(false) => out.push_str("false"),
                FieldValue::String(s) => {
                    out.push('"');
                    for c in s.chars() {
                        if c == '"' || c == '\\' {
                            out.push('\\');
                        }
                        out.push(c);
                    }
                    out.push('"');
                }
            }
        }

        out.push(' ');
        write!(out, "{}", self.time).expect("writing to a String");
        out
    }

    /// Parse one line-format encoded point.
    pub fn parse_line(line: &str) -> Result<Self, PointError> {
        let buf = line.trim_end_matches(['\r', '\n']).as_bytes();

        // Measurement, up to the first unescaped ',' or ' '.
        let m_end = scan_until(buf, 0, MEASUREMENT_SPECIALS);
        if m_end == 0 {
            return Err(PointError::EmptyMeasurement);
        }
        let measurement = unescape(&buf[..m_end], MEASUREMENT_SPECIALS);
        let mut i = m_end;

        // Tag pairs while the separator is a comma.
        let mut tags = Vec::new();
        while i < buf.len() && buf[i] == b',' {
            i += 1;
            let k_end = scan_until(buf, i, TAG_SPECIALS);
            if k_end == i || k_end >= buf.len() || buf[k_end] != b'=' {
                return Err(PointError::MalformedTag);
            }
            let key = unescape(&buf[i..k_end], TAG_SPECIALS);

            let v_start = k_end + 1;
            let v_end = scan_until(buf, v_start, TAG_SPECIALS);
            if v_end == v_start || (v_end < buf.len() && buf[v_end] == b'=') {
                return Err(PointError::MalformedTag);
            }
            let value = unescape(&buf[v_start..v_end], TAG_SPECIALS);

            tags.push((key, value));
            i = v_end;
        }

        if i >= buf.len() || buf[i] != b' ' {
            return Err(PointError::MissingFields);
        }
        while i < buf.len() && buf[i] == b' ' {
            i += 1;
        }
        if i >= buf.len() {
            return Err(PointError::MissingFields);
        }

        // Field pairs.
        let mut fields = Vec::new();
        loop {
            let k_end = scan_until(buf, i, TAG_SPECIALS);
            if k_end == i || k_end >= buf.len() || buf[k_end] != b'=' {
                return Err(PointError::MalformedField);
            }
            let key = unescape(&buf[i..k_end], TAG_SPECIALS);
            i = k_end + 1;

            let value = if i < buf.len() && buf[i] == b'"' {
                let (s, next) = scan_string_value(buf, i + 1)?;
                i = next;
                FieldValue::String(s)
            } else {
                let v_end = scan_until(buf, i, &[b',', b' ']);
                let raw = std::str::from_utf8(&buf[i..v_end]).map_err(|_| PointError::InvalidUtf8)?;
                i = v_end;
                parse_field_value(raw)?
            };
            fields.push((key, value));

            if i < buf.len() && buf[i] == b',' {
                i += 1;
                continue;
            }
            break;
        }

        // Timestamp.
        if i >= buf.len() || buf[i] != b' ' {
            return Err(PointError::MissingTimestamp);
        }
        while i < buf.len() && buf[i] == b' ' {
            i += 1;
        }
        let ts_raw = std::str::from_utf8(&buf[i..]).map_err(|_| PointError::InvalidUtf8)?;
        if ts_raw.is_empty() {
            return Err(PointError::MissingTimestamp);
        }
        let time: i64 = ts_raw.parse().map_err(|_| PointError::InvalidTimestamp {
            value: ts_raw.to_string(),
        })?;

        Self::new(measurement, tags, fields, time)
    }
}

/// Advance from `i` to the next unescaped occurrence of any byte in `stops`,
/// or the end of the buffer.
fn scan_until(buf: &[u8], mut i: usize, stops: &[u8]) -> usize {
    while i < buf.len() {
        if buf[i] == b'\\' && i + 1 < buf.len() {
            i += 2;
            continue;
        }
        if stops.contains(&buf[i]) {
            return i;
        }
        i += 1;
    }
    i
}

/// Backslash-escape every occurrence of a byte in `specials`.
fn escape(raw: &[u8], specials: &[u8]) -> String {
    let mut out = Vec::with_capacity(raw.len());
    for &b in raw {
        if specials.contains(&b) {
            out.push(b'\\');
        }
        out.push(b);
    }
    // Only ASCII escapes were inserted into valid UTF-8.
    String::from_utf8_lossy(&out).into_owned()
}

/// Strip a backslash preceding any byte in `specials`; other backslashes are
/// data and kept verbatim.
fn unescape(raw: &[u8], specials: &[u8]) -> String {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'\\' && i + 1 < raw.len() && specials.contains(&raw[i + 1]) {
            out.push(raw[i + 1]);
            i += 2;
            continue;
        }
        out.push(raw[i]);
        i += 1;
    }
    // Only ASCII escapes were removed from valid UTF-8.
    String::from_utf8_lossy(&out).into_owned()
}

/// Scan a double-quoted string field value starting just past the opening
/// quote. Returns the unescaped value and the index just past the closing
/// quote.
fn scan_string_value(buf: &[u8], mut i: usize) -> Result<(String, usize), PointError> {
    let mut out = Vec::new();
    while i < buf.len() {
        match buf[i] {
            b'\\' if i + 1 < buf.len() && (buf[i + 1] == b'"' || buf[i + 1] == b'\\') => {
                out.push(buf[i + 1]);
                i += 2;
            }
            b'"' => {
                let s = String::from_utf8(out).map_err(|_| PointError::InvalidUtf8)?;
                return Ok((s, i + 1));
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    Err(PointError::UnterminatedString)
}

/// Classify an unquoted field value: `i`-suffixed integers, `u`-suffixed
/// unsigned integers, booleans, and bare floats.
fn parse_field_value(raw: &str) -> Result<FieldValue, PointError> {
    let invalid = || PointError::InvalidFieldValue {
        value: raw.to_string(),
    };

    match raw {
        "" => return Err(invalid()),
        "t" | "T" | "true" | "True" | "TRUE" => return Ok(FieldValue::Boolean(true)),
        "f" | "F" | "false" | "False" | "FALSE" => return Ok(FieldValue::Boolean(false)),
        _ => {}
    }

    if let Some(digits) = raw.strip_suffix('i') {
        return digits
            .parse::<i64>()
            .map(FieldValue::Integer)
            .map_err(|_| invalid());
    }
    if let Some(digits) = raw.strip_suffix('u') {
        return digits
            .parse::<u64>()
            .map(FieldValue::Unsigned)
            .map_err(|_| invalid());
    }

    let f: f64 = raw.parse().map_err(|_| invalid())?;
    if !f.is_finite() {
        return Err(invalid());
    }
    Ok(FieldValue::Float(f))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn round_trip(p: &Point) {
        let line = p.to_line_protocol();
        let got = Point::parse_line(&line).expect("parse of encoded point");
        assert_eq!(&got, p, "line: {line}");
        // The encoding is canonical, so a second encode is bit-identical.
        assert_eq!(got.to_line_protocol(), line);
    }

    #[test]
    fn test_encode_simple() {
        let p = Point::new(
            "cpu",
            [("host", "serverA"), ("region", "us-west")],
            [("value", 0.64)],
            1000,
        )
        .unwrap();

        assert_eq!(
            p.to_line_protocol(),
            "cpu,host=serverA,region=us-west value=0.64 1000"
        );
        round_trip(&p);
    }

    #[test]
    fn test_encode_field_types() {
        let p = Point::new(
            "m",
            [] as [(&str, &str); 0],
            [
                ("b", FieldValue::Boolean(true)),
                ("f", FieldValue::Float(1.0)),
                ("i", FieldValue::Integer(-42)),
                ("s", FieldValue::String("hello".to_string())),
                ("u", FieldValue::Unsigned(7)),
            ],
            -5,
        )
        .unwrap();

        assert_eq!(p.to_line_protocol(), r#"m b=true,f=1,i=-42i,s="hello",u=7u -5"#);
        round_trip(&p);
    }

    #[test]
    fn test_escaping_round_trips() {
        let p = Point::new(
            "disk used,free",
            [("path", "/mnt/a b"), ("k=v", "x,y")],
            [
                ("free bytes", FieldValue::Integer(100)),
                ("msg", FieldValue::String(r#"say "hi" \now"#.to_string())),
            ],
            42,
        )
        .unwrap();
        round_trip(&p);

        let line = p.to_line_protocol();
        assert!(line.starts_with(r"disk\ used\,free,k\=v=x\,y,path=/mnt/a\ b "));
    }

    #[test]
    fn test_tags_sorted_in_encoding() {
        let p = Point::new("m", [("z", "1"), ("a", "2")], [("v", 1i64)], 0).unwrap();
        assert_eq!(p.to_line_protocol(), "m,a=2,z=1 v=1i 0");
    }

    #[test]
    fn test_parse_multiple_spaces() {
        let got = Point::parse_line("cpu  value=1i  7").unwrap();
        assert_eq!(got.measurement(), "cpu");
        assert_eq!(got.time(), 7);
    }

    #[test]
    fn test_parse_errors() {
        assert_matches!(
            Point::parse_line(""),
            Err(PointError::EmptyMeasurement)
        );
        assert_matches!(
            Point::parse_line("cpu"),
            Err(PointError::MissingFields)
        );
        assert_matches!(
            Point::parse_line("cpu,host= value=1 0"),
            Err(PointError::MalformedTag)
        );
        assert_matches!(
            Point::parse_line("cpu value 0"),
            Err(PointError::MalformedField)
        );
        assert_matches!(
            Point::parse_line(r#"cpu s="unterminated 0"#),
            Err(PointError::UnterminatedString)
        );
        assert_matches!(
            Point::parse_line("cpu value=1"),
            Err(PointError::MissingTimestamp)
        );
        assert_matches!(
            Point::parse_line("cpu value=1 banana"),
            Err(PointError::InvalidTimestamp { .. })
        );
        assert_matches!(
            Point::parse_line("cpu value=1x2 0"),
            Err(PointError::InvalidFieldValue { .. })
        );
        // NaN parses as a float but is rejected as a value.
        assert_matches!(
            Point::parse_line("cpu value=NaN 0"),
            Err(PointError::InvalidFieldValue { .. })
        );
    }

    #[test]
    fn test_new_validation() {
        assert_matches!(
            Point::new("", [] as [(&str, &str); 0], [("v", 1i64)], 0),
            Err(PointError::EmptyMeasurement)
        );
        assert_matches!(
            Point::new("m", [] as [(&str, &str); 0], [] as [(&str, i64); 0], 0),
            Err(PointError::NoFields)
        );
        assert_matches!(
            Point::new("m", [] as [(&str, &str); 0], [("v", f64::INFINITY)], 0),
            Err(PointError::NonFiniteFloat { .. })
        );
    }

    #[test]
    fn test_series_key_ignores_fields_and_time() {
        let a = Point::new("cpu", [("host", "a")], [("v", 1i64)], 0).unwrap();
        let b = Point::new("cpu", [("host", "a")], [("other", 2.5)], 99).unwrap();
        assert_eq!(a.series_key(), b.series_key());
        assert_eq!(a.hash_id(), b.hash_id());
    }

    #[test]
    fn test_hash_differs_across_series() {
        let a = Point::new("cpu", [("host", "a")], [("v", 1i64)], 0).unwrap();
        let b = Point::new("cpu", [("host", "b")], [("v", 1i64)], 0).unwrap();
        let c = Point::new("mem", [("host", "a")], [("v", 1i64)], 0).unwrap();
        assert_ne!(a.hash_id(), b.hash_id());
        assert_ne!(a.hash_id(), c.hash_id());
    }
}
