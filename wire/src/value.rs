//! The per-OID type codec: [`PgValue`] plus text/binary encode and decode.
//!
//! Grounded on the teacher's `FromPg`/`ToPg` split (binary uses big-endian
//! bytes, text uses the same strings `psql` prints) but collapsed into one
//! tagged enum per §9's decision — a small, closed OID set doesn't earn a
//! trait-object registry.

use crate::error::WireError;
use crate::oid;
use bytes::{BufMut, BytesMut};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// A decoded parameter or column value, tagged by the OID it was read as.
#[derive(Debug, Clone, PartialEq)]
pub enum PgValue {
    Null(u32),
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    /// Kept as the canonical decimal string; this proxy never does numeric
    /// arithmetic, only transport, so there's no reason to parse further.
    Numeric(String),
    Bytea(Vec<u8>),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
}

fn pg_epoch_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).expect("valid date")
}

fn pg_epoch_datetime() -> NaiveDateTime {
    pg_epoch_date().and_hms_opt(0, 0, 0).expect("valid time")
}

impl PgValue {
    pub fn oid(&self) -> u32 {
        match self {
            PgValue::Null(oid) => *oid,
            PgValue::Bool(_) => oid::BOOL,
            PgValue::Int2(_) => oid::INT2,
            PgValue::Int4(_) => oid::INT4,
            PgValue::Int8(_) => oid::INT8,
            PgValue::Float4(_) => oid::FLOAT4,
            PgValue::Float8(_) => oid::FLOAT8,
            PgValue::Numeric(_) => oid::NUMERIC,
            PgValue::Bytea(_) => oid::BYTEA,
            PgValue::Text(_) => oid::TEXT,
            PgValue::Date(_) => oid::DATE,
            PgValue::Timestamp(_) => oid::TIMESTAMP,
            PgValue::TimestampTz(_) => oid::TIMESTAMPTZ,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, PgValue::Null(_))
    }

    /// Text-format wire representation, or `None` for SQL NULL.
    pub fn encode_text(&self) -> Option<Vec<u8>> {
        let s = match self {
            PgValue::Null(_) => return None,
            PgValue::Bool(b) => if *b { "t".to_string() } else { "f".to_string() },
            PgValue::Int2(v) => v.to_string(),
            PgValue::Int4(v) => v.to_string(),
            PgValue::Int8(v) => v.to_string(),
            PgValue::Float4(v) => v.to_string(),
            PgValue::Float8(v) => v.to_string(),
            PgValue::Numeric(s) => s.clone(),
            PgValue::Bytea(bytes) => encode_bytea_hex(bytes),
            PgValue::Text(s) => s.clone(),
            PgValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            PgValue::Timestamp(dt) => dt.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
            PgValue::TimestampTz(dt) => dt.format("%Y-%m-%d %H:%M:%S%.f+00").to_string(),
        };
        Some(s.into_bytes())
    }

    /// Binary-format wire representation, or `None` for SQL NULL.
    pub fn encode_binary(&self) -> Option<Vec<u8>> {
        let mut buf = BytesMut::new();
        match self {
            PgValue::Null(_) => return None,
            PgValue::Bool(b) => buf.put_u8(if *b { 1 } else { 0 }),
            PgValue::Int2(v) => buf.put_i16(*v),
            PgValue::Int4(v) => buf.put_i32(*v),
            PgValue::Int8(v) => buf.put_i64(*v),
            PgValue::Float4(v) => buf.put_f32(*v),
            PgValue::Float8(v) => buf.put_f64(*v),
            PgValue::Numeric(s) => buf.put_slice(&encode_numeric_binary(s).ok()?),
            PgValue::Bytea(bytes) => buf.put_slice(bytes),
            PgValue::Text(s) => buf.put_slice(s.as_bytes()),
            PgValue::Date(d) => buf.put_i32((*d - pg_epoch_date()).num_days() as i32),
            PgValue::Timestamp(dt) => buf.put_i64(micros_since_epoch(*dt)),
            PgValue::TimestampTz(dt) => buf.put_i64(micros_since_epoch(dt.naive_utc())),
        }
        Some(buf.to_vec())
    }

    pub fn decode_text(oid: u32, bytes: &[u8]) -> Result<PgValue, WireError> {
        let s = std::str::from_utf8(bytes)?;
        Ok(match oid {
            o if o == oid::BOOL => PgValue::Bool(s == "t" || s == "true" || s == "1"),
            o if o == oid::INT2 => PgValue::Int2(parse(s, "int2")?),
            o if o == oid::INT4 => PgValue::Int4(parse(s, "int4")?),
            o if o == oid::INT8 => PgValue::Int8(parse(s, "int8")?),
            o if o == oid::FLOAT4 => PgValue::Float4(parse(s, "float4")?),
            o if o == oid::FLOAT8 => PgValue::Float8(parse(s, "float8")?),
            o if o == oid::NUMERIC => PgValue::Numeric(s.to_string()),
            o if o == oid::BYTEA => PgValue::Bytea(decode_bytea_hex(s)?),
            o if o == oid::TEXT || o == oid::VARCHAR || o == oid::UNKNOWN => {
                PgValue::Text(s.to_string())
            }
            o if o == oid::DATE => PgValue::Date(
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .map_err(|e| bad_value("date", e.to_string()))?,
            ),
            o if o == oid::TIMESTAMP => PgValue::Timestamp(parse_timestamp_text(s)?),
            o if o == oid::TIMESTAMPTZ => {
                let naive = parse_timestamp_text(s.trim_end_matches("+00"))?;
                PgValue::TimestampTz(DateTime::from_naive_utc_and_offset(naive, Utc))
            }
            other => {
                return Err(WireError::BadValue {
                    oid_name: "unrecognized",
                    detail: format!("no text decoder for OID {other}"),
                })
            }
        })
    }

    pub fn decode_binary(oid: u32, bytes: &[u8]) -> Result<PgValue, WireError> {
        Ok(match oid {
            o if o == oid::BOOL => PgValue::Bool(need(bytes, 1, "bool")?[0] != 0),
            o if o == oid::INT2 => PgValue::Int2(i16::from_be_bytes(arr(bytes, "int2")?)),
            o if o == oid::INT4 => PgValue::Int4(i32::from_be_bytes(arr(bytes, "int4")?)),
            o if o == oid::INT8 => PgValue::Int8(i64::from_be_bytes(arr(bytes, "int8")?)),
            o if o == oid::FLOAT4 => PgValue::Float4(f32::from_be_bytes(arr(bytes, "float4")?)),
            o if o == oid::FLOAT8 => PgValue::Float8(f64::from_be_bytes(arr(bytes, "float8")?)),
            o if o == oid::NUMERIC => PgValue::Numeric(decode_numeric_binary(bytes)?),
            o if o == oid::BYTEA => PgValue::Bytea(bytes.to_vec()),
            o if o == oid::TEXT || o == oid::VARCHAR || o == oid::UNKNOWN => {
                PgValue::Text(std::str::from_utf8(bytes)?.to_string())
            }
            o if o == oid::DATE => {
                let days = i32::from_be_bytes(arr(bytes, "date")?);
                PgValue::Date(pg_epoch_date() + chrono::Duration::days(days as i64))
            }
            o if o == oid::TIMESTAMP => {
                let micros = i64::from_be_bytes(arr(bytes, "timestamp")?);
                PgValue::Timestamp(datetime_from_micros(micros))
            }
            o if o == oid::TIMESTAMPTZ => {
                let micros = i64::from_be_bytes(arr(bytes, "timestamptz")?);
                PgValue::TimestampTz(DateTime::from_naive_utc_and_offset(
                    datetime_from_micros(micros),
                    Utc,
                ))
            }
            other => {
                return Err(WireError::BadValue {
                    oid_name: "unrecognized",
                    detail: format!("no binary decoder for OID {other}"),
                })
            }
        })
    }
}

fn bad_value(oid_name: &'static str, detail: String) -> WireError {
    WireError::BadValue { oid_name, detail }
}

fn parse<T: std::str::FromStr>(s: &str, oid_name: &'static str) -> Result<T, WireError> {
    s.parse()
        .map_err(|_| bad_value(oid_name, format!("{s:?} is not valid")))
}

fn need<'a>(bytes: &'a [u8], n: usize, oid_name: &'static str) -> Result<&'a [u8], WireError> {
    if bytes.len() < n {
        return Err(bad_value(oid_name, format!("expected {n} bytes, got {}", bytes.len())));
    }
    Ok(&bytes[..n])
}

fn arr<const N: usize>(bytes: &[u8], oid_name: &'static str) -> Result<[u8; N], WireError> {
    need(bytes, N, oid_name)?
        .try_into()
        .map_err(|_| bad_value(oid_name, "slice conversion failed".to_string()))
}

fn micros_since_epoch(dt: NaiveDateTime) -> i64 {
    let delta = dt - pg_epoch_datetime();
    delta.num_seconds() * 1_000_000 + (delta.subsec_nanos() as i64) / 1_000
}

fn datetime_from_micros(micros: i64) -> NaiveDateTime {
    pg_epoch_datetime()
        + chrono::Duration::microseconds(micros)
}

fn parse_timestamp_text(s: &str) -> Result<NaiveDateTime, WireError> {
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt);
        }
    }
    Err(bad_value("timestamp", format!("{s:?} is not a recognized timestamp")))
}

fn encode_bytea_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(2 + bytes.len() * 2);
    s.push_str("\\x");
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

fn decode_bytea_hex(s: &str) -> Result<Vec<u8>, WireError> {
    let hex = s
        .strip_prefix("\\x")
        .ok_or_else(|| bad_value("bytea", format!("{s:?} missing \\x prefix")))?;
    if hex.len() % 2 != 0 {
        return Err(bad_value("bytea", "odd number of hex digits".to_string()));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| bad_value("bytea", format!("invalid hex byte {:?}", &hex[i..i + 2])))
        })
        .collect()
}

/// Decodes PostgreSQL's binary NUMERIC wire format into a decimal string.
///
/// Layout: `ndigits(i16) weight(i16) sign(u16) dscale(u16) digits(i16 * ndigits)`,
/// where each digit is a base-10000 group and `weight` is the exponent
/// (in groups) of the first stored digit.
pub fn decode_numeric_binary(buf: &[u8]) -> Result<String, WireError> {
    if buf.len() < 8 {
        return Err(bad_value("numeric", "buffer shorter than the 8-byte header".to_string()));
    }
    let ndigits = i16::from_be_bytes([buf[0], buf[1]]) as usize;
    let weight = i16::from_be_bytes([buf[2], buf[3]]) as i32;
    let sign = u16::from_be_bytes([buf[4], buf[5]]);
    let dscale = u16::from_be_bytes([buf[6], buf[7]]) as i32;
    if sign == 0xC000 {
        return Ok("NaN".to_string());
    }
    if buf.len() < 8 + ndigits * 2 {
        return Err(bad_value("numeric", "truncated digit array".to_string()));
    }
    let mut digits = Vec::with_capacity(ndigits);
    for i in 0..ndigits {
        let off = 8 + i * 2;
        digits.push(i16::from_be_bytes([buf[off], buf[off + 1]]));
    }

    let digit_at = |exp: i32| -> i16 {
        let idx = weight - exp;
        if idx >= 0 && (idx as usize) < ndigits {
            digits[idx as usize]
        } else {
            0
        }
    };

    let max_exp = weight.max(0);
    let min_exp = (weight - ndigits as i32 + 1).min(-((dscale + 3) / 4));

    let mut out = String::new();
    if sign == 0x4000 {
        out.push('-');
    }
    let mut first = true;
    for exp in (0..=max_exp).rev() {
        let d = digit_at(exp);
        if first {
            out.push_str(&d.to_string());
            first = false;
        } else {
            out.push_str(&format!("{d:04}"));
        }
    }
    if first {
        out.push('0');
    }
    if dscale > 0 {
        out.push('.');
        let frac_start_len = out.len();
        for exp in (min_exp..0).rev() {
            out.push_str(&format!("{:04}", digit_at(exp)));
        }
        let produced = out.len() - frac_start_len;
        let keep = dscale as usize;
        if produced > keep {
            out.truncate(out.len() - (produced - keep));
        }
    }
    Ok(out)
}

/// Encodes a decimal string into PostgreSQL's binary NUMERIC wire format.
/// The inverse of [`decode_numeric_binary`].
pub fn encode_numeric_binary(s: &str) -> Result<Vec<u8>, WireError> {
    let trimmed = s.trim();
    if trimmed.eq_ignore_ascii_case("nan") {
        let mut buf = BytesMut::new();
        buf.put_i16(0);
        buf.put_i16(0);
        buf.put_u16(0xC000);
        buf.put_u16(0);
        return Ok(buf.to_vec());
    }
    let negative = trimmed.starts_with('-');
    let unsigned = trimmed.trim_start_matches(['+', '-']);
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, f),
        None => (unsigned, ""),
    };
    if !int_part.chars().all(|c| c.is_ascii_digit()) && !int_part.is_empty() {
        return Err(bad_value("numeric", format!("{s:?} is not a decimal number")));
    }
    let int_part = if int_part.is_empty() { "0" } else { int_part };
    let dscale = frac_part.len() as u16;

    let int_pad = (4 - int_part.len() % 4) % 4;
    let padded_int = format!("{}{}", "0".repeat(int_pad), int_part);
    let frac_pad = (4 - frac_part.len() % 4) % 4;
    let padded_frac = format!("{}{}", frac_part, "0".repeat(frac_pad));

    let parse_group = |chunk: &[u8]| -> Result<i16, WireError> {
        std::str::from_utf8(chunk)
            .ok()
            .and_then(|s| s.parse::<i16>().ok())
            .ok_or_else(|| bad_value("numeric", format!("{s:?} is not a decimal number")))
    };

    let int_groups = padded_int
        .as_bytes()
        .chunks(4)
        .map(parse_group)
        .collect::<Result<Vec<_>, _>>()?;
    let frac_groups = if padded_frac.is_empty() {
        Vec::new()
    } else {
        padded_frac
            .as_bytes()
            .chunks(4)
            .map(parse_group)
            .collect::<Result<Vec<_>, _>>()?
    };

    let mut weight = int_groups.len() as i32 - 1;
    let mut digits: Vec<i16> = int_groups.into_iter().chain(frac_groups).collect();

    let mut start = 0;
    while start + 1 < digits.len() && digits[start] == 0 && (start as i32) < weight + 1 {
        start += 1;
        weight -= 1;
    }
    let mut end = digits.len();
    while end > start + 1 && digits[end - 1] == 0 {
        end -= 1;
    }
    digits.truncate(end);
    digits.drain(0..start);

    let mut buf = BytesMut::new();
    buf.put_i16(digits.len() as i16);
    buf.put_i16(weight as i16);
    buf.put_u16(if negative { 0x4000 } else { 0x0000 });
    buf.put_u16(dscale);
    for d in digits {
        buf.put_i16(d);
    }
    Ok(buf.to_vec())
}
