//! Dynamic SQL values.
//!
//! SQLite stores every cell in one of five storage classes. `Value` mirrors
//! them exactly, and the `to_*` coercions follow the engine's own conversion
//! rules rather than failing on a type mismatch: `NULL` reads as `0`, `0.0`,
//! an empty string or an empty blob; text is parsed for its longest numeric
//! prefix; reals are rendered with 15 significant digits.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A dynamically-typed SQLite value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,

    /// 64-bit signed integer
    Integer(i64),

    /// 64-bit IEEE floating point
    Float(f64),

    /// UTF-8 text
    Text(String),

    /// Binary data
    Blob(Vec<u8>),
}

/// The fundamental storage class of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Integer,
    Float,
    Text,
    Blob,
    Null,
}

impl Value {
    /// Check if this value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get the storage class of this value.
    pub const fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Integer(_) => ValueType::Integer,
            Value::Float(_) => ValueType::Float,
            Value::Text(_) => ValueType::Text,
            Value::Blob(_) => ValueType::Blob,
        }
    }

    /// Size in bytes, as `sqlite3_value_bytes` would report it.
    ///
    /// Numbers report the length of their text rendering.
    pub fn byte_len(&self) -> usize {
        match self {
            Value::Null => 0,
            Value::Text(s) => s.len(),
            Value::Blob(b) => b.len(),
            Value::Integer(_) | Value::Float(_) => self.to_text().len(),
        }
    }

    /// Coerce to an integer.
    ///
    /// Reals truncate toward zero and saturate; text and blobs use their
    /// leading integer prefix (`"42abc"` is 42, `"abc"` is 0).
    pub fn to_i64(&self) -> i64 {
        match self {
            Value::Null => 0,
            Value::Integer(v) => *v,
            // `as` saturates and maps NaN to 0, which is what the engine does
            #[allow(clippy::cast_possible_truncation)]
            Value::Float(v) => *v as i64,
            Value::Text(s) => parse_int_prefix(s.as_bytes()),
            Value::Blob(b) => parse_int_prefix(b),
        }
    }

    /// Coerce to a 32-bit integer, wrapping like a C cast.
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_i32(&self) -> i32 {
        self.to_i64() as i32
    }

    /// Coerce to a real.
    pub fn to_f64(&self) -> f64 {
        match self {
            Value::Null => 0.0,
            Value::Integer(v) => *v as f64,
            Value::Float(v) => *v,
            Value::Text(s) => parse_real_prefix(s.as_bytes()),
            Value::Blob(b) => parse_real_prefix(b),
        }
    }

    /// Coerce to a 32-bit real.
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_f32(&self) -> f32 {
        self.to_f64() as f32
    }

    /// Truthiness as the engine evaluates it in a boolean context.
    #[allow(clippy::float_cmp)]
    pub fn to_bool(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Integer(v) => *v != 0,
            other => other.to_f64() != 0.0,
        }
    }

    /// Coerce to text.
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Integer(v) => v.to_string(),
            Value::Float(v) => format_real(*v),
            Value::Text(s) => s.clone(),
            Value::Blob(b) => String::from_utf8_lossy(b).into_owned(),
        }
    }

    /// Coerce to a blob.
    pub fn to_blob(&self) -> Vec<u8> {
        match self {
            Value::Null => Vec::new(),
            Value::Blob(b) => b.clone(),
            Value::Text(s) => s.as_bytes().to_vec(),
            Value::Integer(_) | Value::Float(_) => self.to_text().into_bytes(),
        }
    }

    /// Coerce to a timestamp.
    ///
    /// Integers are Unix seconds, reals are Julian day numbers, and text is
    /// parsed as an ISO-8601 date or date-time. Anything else is the epoch.
    pub fn to_datetime(&self) -> NaiveDateTime {
        match self {
            Value::Null | Value::Blob(_) => NaiveDateTime::default(),
            Value::Integer(secs) => DateTime::from_timestamp(*secs, 0)
                .map(|dt| dt.naive_utc())
                .unwrap_or_default(),
            Value::Float(jd) => julian_day_to_datetime(*jd),
            Value::Text(s) => parse_datetime(s.trim()),
        }
    }

    /// Canonical decimal rendering, never in exponent notation.
    pub fn to_decimal_string(&self) -> String {
        match self {
            Value::Null => "0".to_string(),
            Value::Integer(v) => v.to_string(),
            Value::Float(v) => format!("{}", v),
            Value::Text(s) => s.trim().to_string(),
            Value::Blob(b) => String::from_utf8_lossy(b).trim().to_string(),
        }
    }

    /// Interpret the value as a number of milliseconds.
    pub fn to_duration(&self) -> Duration {
        Duration::from_millis(u64::try_from(self.to_i64()).unwrap_or(0))
    }

    /// Borrow the text payload without coercion.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the blob payload without coercion.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(b) => Some(b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            other => write!(f, "{}", other.to_text()),
        }
    }
}

/// Leading-integer parse with the engine's rules: optional whitespace and
/// sign, then digits; stops at the first other byte and clamps on overflow.
fn parse_int_prefix(bytes: &[u8]) -> i64 {
    let mut i = skip_whitespace(bytes);
    let negative = match bytes.get(i) {
        Some(b'-') => {
            i += 1;
            true
        }
        Some(b'+') => {
            i += 1;
            false
        }
        _ => false,
    };

    let mut acc: i64 = 0;
    while let Some(d) = bytes.get(i).filter(|b| b.is_ascii_digit()) {
        let digit = i64::from(d - b'0');
        acc = match acc
            .checked_mul(10)
            .and_then(|v| if negative { v.checked_sub(digit) } else { v.checked_add(digit) })
        {
            Some(v) => v,
            None => return if negative { i64::MIN } else { i64::MAX },
        };
        i += 1;
    }
    acc
}

/// Longest real-number prefix: `[ws][sign]digits[.digits][e[sign]digits]`.
fn parse_real_prefix(bytes: &[u8]) -> f64 {
    let start = skip_whitespace(bytes);
    let mut i = start;
    if matches!(bytes.get(i), Some(b'-' | b'+')) {
        i += 1;
    }

    let int_digits = count_digits(&bytes[i..]);
    i += int_digits;
    let mut frac_digits = 0;
    if bytes.get(i) == Some(&b'.') {
        frac_digits = count_digits(&bytes[i + 1..]);
        if int_digits > 0 || frac_digits > 0 {
            i += 1 + frac_digits;
        }
    }
    if int_digits == 0 && frac_digits == 0 {
        return 0.0;
    }

    if matches!(bytes.get(i), Some(b'e' | b'E')) {
        let mut j = i + 1;
        if matches!(bytes.get(j), Some(b'-' | b'+')) {
            j += 1;
        }
        let exp_digits = count_digits(&bytes[j.min(bytes.len())..]);
        if exp_digits > 0 {
            i = j + exp_digits;
        }
    }

    std::str::from_utf8(&bytes[start..i])
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0)
}

fn skip_whitespace(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|b| b.is_ascii_whitespace()).count()
}

fn count_digits(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|b| b.is_ascii_digit()).count()
}

/// Render a real the way SQLite's `%!.15g` does: 15 significant digits,
/// always a decimal point, exponent form outside `1e-4 ..= 1e15`.
pub(crate) fn format_real(v: f64) -> String {
    if v.is_nan() {
        return "NaN".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "Inf" } else { "-Inf" }.to_string();
    }
    if v == 0.0 {
        return "0.0".to_string();
    }

    let sci = format!("{:.14e}", v.abs());
    let (mantissa, exp) = sci.split_once('e').unwrap_or((&sci, "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();
    let digits = digits.trim_end_matches('0');
    let digits = if digits.is_empty() { "0" } else { digits };

    let mut out = String::new();
    if v < 0.0 {
        out.push('-');
    }

    if !(-4..15).contains(&exp) {
        out.push_str(&digits[..1]);
        out.push('.');
        if digits.len() > 1 {
            out.push_str(&digits[1..]);
        } else {
            out.push('0');
        }
        out.push('e');
        out.push(if exp < 0 { '-' } else { '+' });
        out.push_str(&format!("{:02}", exp.abs()));
    } else if exp >= 0 {
        let int_len = exp as usize + 1;
        if digits.len() > int_len {
            out.push_str(&digits[..int_len]);
            out.push('.');
            out.push_str(&digits[int_len..]);
        } else {
            out.push_str(digits);
            out.push_str(&"0".repeat(int_len - digits.len()));
            out.push_str(".0");
        }
    } else {
        out.push_str("0.");
        out.push_str(&"0".repeat((-exp - 1) as usize));
        out.push_str(digits);
    }
    out
}

const UNIX_EPOCH_JULIAN_DAY: f64 = 2_440_587.5;

#[allow(clippy::cast_possible_truncation)]
fn julian_day_to_datetime(jd: f64) -> NaiveDateTime {
    let millis = ((jd - UNIX_EPOCH_JULIAN_DAY) * 86_400_000.0).round();
    if !millis.is_finite() {
        return NaiveDateTime::default();
    }
    DateTime::from_timestamp_millis(millis as i64)
        .map(|dt| dt.naive_utc())
        .unwrap_or_default()
}

fn parse_datetime(text: &str) -> NaiveDateTime {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    for format in FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return dt;
        }
    }
    if let Some(dt) = NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return dt;
    }
    match text.parse::<f64>() {
        Ok(jd) => julian_day_to_datetime(jd),
        Err(_) => NaiveDateTime::default(),
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Integer(i64::from(v))
    }
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::Integer(i64::from(v))
                }
            }
        )*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl TryFrom<u64> for Value {
    type Error = crate::Error;

    fn try_from(v: u64) -> Result<Self, Self::Error> {
        i64::try_from(v).map(Value::Integer).map_err(|_| {
            crate::Error::Contract(crate::ContractError::InvalidArgument(format!(
                "u64 value {} exceeds i64::MAX",
                v
            )))
        })
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Blob(v.to_vec())
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Text(v.format("%Y-%m-%d %H:%M:%S%.f").to_string())
    }
}

impl From<Duration> for Value {
    fn from(v: Duration) -> Self {
        Value::Integer(i64::try_from(v.as_millis()).unwrap_or_else(|_| {
            tracing::warn!(
                millis = %v.as_millis(),
                "duration exceeds i64::MAX milliseconds; clamping"
            );
            i64::MAX
        }))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_coercions_never_fail() {
        let null = Value::Null;
        assert_eq!(null.to_i64(), 0);
        assert_eq!(null.to_f64(), 0.0);
        assert!(null.to_blob().is_empty());
        assert_eq!(null.to_text(), "");
        assert!(!null.to_bool());
        assert_eq!(null.byte_len(), 0);
        assert_eq!(null.to_datetime(), NaiveDateTime::default());
    }

    #[test]
    fn text_numeric_prefix() {
        assert_eq!(Value::from("42abc").to_i64(), 42);
        assert_eq!(Value::from("  -17").to_i64(), -17);
        assert_eq!(Value::from("3.9").to_i64(), 3);
        assert_eq!(Value::from("abc").to_i64(), 0);
        assert_eq!(Value::from("99999999999999999999").to_i64(), i64::MAX);

        assert_eq!(Value::from("2.5e2xyz").to_f64(), 250.0);
        assert_eq!(Value::from(".5").to_f64(), 0.5);
        assert_eq!(Value::from("1e").to_f64(), 1.0);
        assert_eq!(Value::from("-").to_f64(), 0.0);
    }

    #[test]
    fn real_to_integer_truncates_and_saturates() {
        assert_eq!(Value::Float(3.99).to_i64(), 3);
        assert_eq!(Value::Float(-3.99).to_i64(), -3);
        assert_eq!(Value::Float(1e300).to_i64(), i64::MAX);
        assert_eq!(Value::Float(f64::NAN).to_i64(), 0);
    }

    #[test]
    fn real_rendering_matches_engine() {
        assert_eq!(Value::Float(1.0).to_text(), "1.0");
        assert_eq!(Value::Float(0.1).to_text(), "0.1");
        assert_eq!(Value::Float(0.1 + 0.2).to_text(), "0.3");
        assert_eq!(Value::Float(123.456).to_text(), "123.456");
        assert_eq!(Value::Float(-2.5).to_text(), "-2.5");
        assert_eq!(Value::Float(1e20).to_text(), "1.0e+20");
        assert_eq!(Value::Float(1.5e-7).to_text(), "1.5e-07");
        assert_eq!(Value::Float(0.0001).to_text(), "0.0001");
        assert_eq!(Value::Float(100.0).to_text(), "100.0");
    }

    #[test]
    fn blob_and_text_conversions() {
        let blob = Value::Blob(b"12ab".to_vec());
        assert_eq!(blob.to_i64(), 12);
        assert_eq!(blob.to_text(), "12ab");
        assert_eq!(Value::Integer(7).to_blob(), b"7".to_vec());
        assert_eq!(Value::from("hé").byte_len(), 3);
        assert_eq!(Value::Integer(-10).byte_len(), 3);
    }

    #[test]
    fn booleans() {
        assert!(Value::from(true).to_bool());
        assert!(Value::from("0.5").to_bool());
        assert!(!Value::from("abc").to_bool());
        assert_eq!(Value::from(false), Value::Integer(0));
    }

    #[test]
    fn datetimes() {
        let dt = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_opt(13, 45, 10)
            .unwrap();
        assert_eq!(Value::from(dt).to_datetime(), dt);
        assert_eq!(Value::from("2024-02-29T13:45:10").to_datetime(), dt);
        assert_eq!(Value::Integer(dt.and_utc().timestamp()).to_datetime(), dt);
        assert_eq!(
            Value::from("2024-02-29").to_datetime(),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap().and_hms_opt(0, 0, 0).unwrap()
        );
        // Julian day 2440587.5 is the Unix epoch
        assert_eq!(Value::Float(2_440_587.5).to_datetime(), NaiveDateTime::default());
    }

    #[test]
    fn decimal_and_duration() {
        assert_eq!(Value::Float(1e20).to_decimal_string(), "100000000000000000000");
        assert_eq!(Value::from(" 12.50 ").to_decimal_string(), "12.50");
        assert_eq!(Value::Integer(1500).to_duration(), Duration::from_millis(1500));
        assert_eq!(Value::Integer(-5).to_duration(), Duration::ZERO);
        assert_eq!(Value::from(Duration::from_secs(2)), Value::Integer(2000));
    }

    #[test]
    fn conversions_in() {
        assert_eq!(Value::from(Some(5_i32)), Value::Integer(5));
        assert_eq!(Value::from(None::<String>), Value::Null);
        assert!(Value::try_from(u64::MAX).is_err());
        assert_eq!(Value::try_from(7_u64).unwrap(), Value::Integer(7));
        assert_eq!(Value::from(&b"\x00\x01"[..]).value_type(), ValueType::Blob);
    }

    #[test]
    fn serde_round_trip() {
        let values = vec![
            Value::Null,
            Value::Integer(i64::MIN),
            Value::Float(2.5),
            Value::Text("x".into()),
            Value::Blob(vec![0, 255]),
        ];
        let json = serde_json::to_string(&values).unwrap();
        let back: Vec<Value> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, values);
    }

    #[test]
    fn display() {
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::Integer(3).to_string(), "3");
        assert_eq!(Value::Float(3.0).to_string(), "3.0");
    }
}
