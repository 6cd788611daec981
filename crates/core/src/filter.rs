//! The on-disk filter artifact: a tagged union of `BloomFilter` and
//! `RangeFilter`. Serialization is a stable, implementation-independent
//! binary layout: magic bytes, version, tag, fields, trailing CRC32 checksum.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{BloomdexError, Result};
use crate::hash::{double_hash, nth_index};

const MAGIC: &[u8; 4] = b"BDXF";
const FORMAT_VERSION: u8 = 1;

const TAG_BLOOM: u8 = 0;
const TAG_RANGE: u8 = 1;

/// Declared column dtype, used to select construction policy and to parse
/// candidate values at query time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DType {
    Integer,
    Floating,
    Timestamp,
    Text,
}

impl DType {
    fn to_tag(self) -> u8 {
        match self {
            DType::Integer => 0,
            DType::Floating => 1,
            DType::Timestamp => 2,
            DType::Text => 3,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(DType::Integer),
            1 => Some(DType::Floating),
            2 => Some(DType::Timestamp),
            3 => Some(DType::Text),
            _ => None,
        }
    }

    /// True for dtypes eligible for range-filter construction: integer,
    /// floating, and timestamp columns.
    pub fn is_range_eligible(self) -> bool {
        matches!(self, DType::Integer | DType::Floating | DType::Timestamp)
    }
}

/// A parsed numeric/temporal value, comparable within a `RangeFilter`.
/// Timestamps are stored as i64 (milliseconds since epoch, ISO-8601 on the wire).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
enum Scalar {
    I(i64),
    F(f64),
}

impl Scalar {
    fn parse(dtype: DType, v: &str) -> Option<Self> {
        match dtype {
            DType::Integer => v.parse::<i64>().ok().map(Scalar::I),
            DType::Floating => v.parse::<f64>().ok().map(Scalar::F),
            DType::Timestamp => parse_timestamp_millis(v).map(Scalar::I),
            DType::Text => None,
        }
    }
}

/// Parses an ISO-8601 timestamp into milliseconds since the Unix epoch.
/// Accepts `YYYY-MM-DDTHH:MM:SS(.sss)?Z?` without pulling in a full datetime
/// crate; this is the canonical form the indexer writes.
fn parse_timestamp_millis(s: &str) -> Option<i64> {
    let s = s.trim_end_matches('Z');
    let (date, time) = s.split_once('T')?;
    let mut date_parts = date.split('-');
    let year: i64 = date_parts.next()?.parse().ok()?;
    let month: i64 = date_parts.next()?.parse().ok()?;
    let day: i64 = date_parts.next()?.parse().ok()?;

    let (time, frac_millis) = match time.split_once('.') {
        Some((t, frac)) => {
            let frac = format!("{frac:0<3}");
            (t, frac[..3].parse::<i64>().ok()?)
        }
        None => (time, 0),
    };
    let mut time_parts = time.split(':');
    let hour: i64 = time_parts.next()?.parse().ok()?;
    let min: i64 = time_parts.next()?.parse().ok()?;
    let sec: i64 = time_parts.next()?.parse().ok()?;

    if !(1..=9999).contains(&year) || !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }

    let days = days_since_epoch(year, month, day);
    let secs = days * 86_400 + hour * 3600 + min * 60 + sec;
    Some(secs * 1000 + frac_millis)
}

fn is_leap_year(y: i64) -> bool {
    (y % 4 == 0 && y % 100 != 0) || y % 400 == 0
}

fn days_since_epoch(year: i64, month: i64, day: i64) -> i64 {
    const CUM_DAYS: [i64; 12] = [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334];
    let mut days: i64 = 0;
    if year >= 1970 {
        for y in 1970..year {
            days += if is_leap_year(y) { 366 } else { 365 };
        }
    } else {
        for y in year..1970 {
            days -= if is_leap_year(y) { 366 } else { 365 };
        }
    }
    days += CUM_DAYS[(month - 1) as usize];
    if month > 2 && is_leap_year(year) {
        days += 1;
    }
    days + (day - 1)
}

/// Formats milliseconds since the epoch back into an ISO-8601 string, the
/// canonical string form used for hashing/comparison.
pub fn format_timestamp_millis(ms: i64) -> String {
    let mut days = ms.div_euclid(86_400_000);
    let mut rem = ms.rem_euclid(86_400_000);
    let hour = rem / 3_600_000;
    rem %= 3_600_000;
    let min = rem / 60_000;
    rem %= 60_000;
    let sec = rem / 1000;
    let milli = rem % 1000;

    let mut year = 1970i64;
    loop {
        let year_len = if is_leap_year(year) { 366 } else { 365 };
        if days >= year_len {
            days -= year_len;
            year += 1;
        } else if days < 0 {
            year -= 1;
            days += if is_leap_year(year) { 366 } else { 365 };
        } else {
            break;
        }
    }
    const MONTH_LENS: [i64; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    let mut month = 0usize;
    for (i, &len) in MONTH_LENS.iter().enumerate() {
        let len = if i == 1 && is_leap_year(year) { 29 } else { len };
        if days >= len {
            days -= len;
            month = i + 1;
        } else {
            month = i + 1;
            break;
        }
    }
    let day = days + 1;
    format!("{year:04}-{month:02}-{day:02}T{hour:02}:{min:02}:{sec:02}.{milli:03}Z")
}

/// Parses `raw` into a numeric value suitable for min/max tracking during
/// indexing. Timestamps parse to milliseconds.
pub fn numeric_value(dtype: DType, raw: &str) -> Option<f64> {
    match dtype {
        DType::Integer => raw.trim().parse::<i64>().ok().map(|v| v as f64),
        DType::Floating => raw.trim().parse::<f64>().ok(),
        DType::Timestamp => parse_timestamp_millis(raw).map(|v| v as f64),
        DType::Text => None,
    }
}

/// Canonicalizes a raw column value into its string form for hashing/probing:
/// canonical decimal representation for numerics, ISO-8601 for timestamps,
/// and the raw string for textual columns.
pub fn canonicalize(dtype: DType, raw: &str) -> Option<String> {
    match dtype {
        DType::Integer => raw.trim().parse::<i64>().ok().map(|v| v.to_string()),
        DType::Floating => raw.trim().parse::<f64>().ok().map(|v| v.to_string()),
        DType::Timestamp => parse_timestamp_millis(raw).map(format_timestamp_millis),
        DType::Text => Some(raw.to_string()),
    }
}

/// A Bloom filter over the canonical string form of column values. Retains
/// `dtype` so that probing at query time can canonicalize exactly the way
/// the indexer canonicalizes on insert — otherwise a raw, uncanonicalized
/// probe value (e.g. a timestamp missing its millisecond suffix) would miss
/// a value that was genuinely indexed, a false negative.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u8>,
    num_bits: u64,
    num_hashes: u32,
    capacity: u64,
    error_rate: f64,
    dtype: DType,
}

impl BloomFilter {
    /// Builds an empty filter sized for `capacity` insertions at `error_rate`
    /// false-positive probability, using the standard `m`/`k` sizing formulas.
    pub fn new(capacity: u64, error_rate: f64, dtype: DType) -> Self {
        let n = capacity.max(1) as f64;
        let p = error_rate.clamp(1e-6, 0.9);
        let m = (-(n * p.ln()) / (std::f64::consts::LN_2.powi(2))).ceil().max(8.0) as u64;
        let k = ((m as f64 / n) * std::f64::consts::LN_2).round().max(1.0) as u32;
        Self {
            bits: vec![0u8; ((m + 7) / 8) as usize],
            num_bits: m,
            num_hashes: k,
            capacity,
            error_rate,
            dtype,
        }
    }

    /// Inserts `value`, canonicalizing it first the same way the indexer
    /// canonicalizes column values before hashing.
    pub fn insert(&mut self, value: &str) {
        let Some(canon) = canonicalize(self.dtype, value) else {
            return;
        };
        let (h1, h2) = double_hash(canon.as_bytes());
        for i in 0..self.num_hashes as u64 {
            let idx = nth_index(h1, h2, i, self.num_bits);
            self.set_bit(idx);
        }
    }

    /// Canonicalizes `value` the same way before probing; a value that
    /// doesn't canonicalize under this column's dtype was never indexable
    /// in the first place and so cannot match.
    pub fn contains(&self, value: &str) -> bool {
        let Some(canon) = canonicalize(self.dtype, value) else {
            return false;
        };
        let (h1, h2) = double_hash(canon.as_bytes());
        (0..self.num_hashes as u64).all(|i| self.get_bit(nth_index(h1, h2, i, self.num_bits)))
    }

    fn set_bit(&mut self, idx: u64) {
        let byte = (idx / 8) as usize;
        let bit = (idx % 8) as u8;
        self.bits[byte] |= 1 << bit;
    }

    fn get_bit(&self, idx: u64) -> bool {
        let byte = (idx / 8) as usize;
        let bit = (idx % 8) as u8;
        (self.bits[byte] & (1 << bit)) != 0
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    fn write(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_u64::<LittleEndian>(self.num_bits)?;
        w.write_u32::<LittleEndian>(self.num_hashes)?;
        w.write_u64::<LittleEndian>(self.capacity)?;
        w.write_f64::<LittleEndian>(self.error_rate)?;
        w.write_u8(self.dtype.to_tag())?;
        w.write_u64::<LittleEndian>(self.bits.len() as u64)?;
        w.write_all(&self.bits)
    }

    fn read(r: &mut impl Read) -> io::Result<Self> {
        let num_bits = r.read_u64::<LittleEndian>()?;
        let num_hashes = r.read_u32::<LittleEndian>()?;
        let capacity = r.read_u64::<LittleEndian>()?;
        let error_rate = r.read_f64::<LittleEndian>()?;
        let dtype = DType::from_tag(r.read_u8()?)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "unknown bloom dtype tag"))?;
        let byte_len = r.read_u64::<LittleEndian>()? as usize;
        let mut bits = vec![0u8; byte_len];
        r.read_exact(&mut bits)?;
        Ok(Self { bits, num_bits, num_hashes, capacity, error_rate, dtype })
    }
}

/// A `[min, max]` range filter over one numeric/temporal column.
#[derive(Debug, Clone)]
pub struct RangeFilter {
    min: Scalar,
    max: Scalar,
    dtype: DType,
    /// True if every value in the column was null; such a filter matches nothing.
    empty: bool,
}

impl RangeFilter {
    pub fn new(min: f64, max: f64, dtype: DType) -> Self {
        let (min, max) = match dtype {
            DType::Integer | DType::Timestamp => (Scalar::I(min as i64), Scalar::I(max as i64)),
            _ => (Scalar::F(min), Scalar::F(max)),
        };
        Self { min, max, dtype, empty: false }
    }

    pub fn empty(dtype: DType) -> Self {
        Self { min: Scalar::I(0), max: Scalar::I(0), dtype, empty: true }
    }

    /// Parses `v` in this filter's dtype; parse failure means the value
    /// cannot match this column.
    pub fn contains(&self, v: &str) -> bool {
        if self.empty {
            return false;
        }
        match Scalar::parse(self.dtype, v) {
            Some(s) => self.min <= s && s <= self.max,
            None => false,
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    fn write(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_u8(self.dtype.to_tag())?;
        w.write_u8(self.empty as u8)?;
        match self.min {
            Scalar::I(v) => {
                w.write_u8(0)?;
                w.write_i64::<LittleEndian>(v)?;
            }
            Scalar::F(v) => {
                w.write_u8(1)?;
                w.write_f64::<LittleEndian>(v)?;
            }
        }
        match self.max {
            Scalar::I(v) => {
                w.write_u8(0)?;
                w.write_i64::<LittleEndian>(v)
            }
            Scalar::F(v) => {
                w.write_u8(1)?;
                w.write_f64::<LittleEndian>(v)
            }
        }
    }

    fn read(r: &mut impl Read) -> io::Result<Self> {
        let dtype = DType::from_tag(r.read_u8()?)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "bad dtype tag"))?;
        let empty = r.read_u8()? != 0;
        let min = match r.read_u8()? {
            0 => Scalar::I(r.read_i64::<LittleEndian>()?),
            _ => Scalar::F(r.read_f64::<LittleEndian>()?),
        };
        let max = match r.read_u8()? {
            0 => Scalar::I(r.read_i64::<LittleEndian>()?),
            _ => Scalar::F(r.read_f64::<LittleEndian>()?),
        };
        Ok(Self { min, max, dtype, empty })
    }
}

/// The tagged union written to disk for one (shard, column).
#[derive(Debug, Clone)]
pub enum Filter {
    Bloom(BloomFilter),
    Range(RangeFilter),
}

impl Filter {
    /// Tests whether `value` (the caller's raw probe string) might be
    /// present. Both variants canonicalize or parse `value` internally
    /// before comparing, the same way they canonicalize or parse a value on
    /// insert, so callers never need to normalize it themselves. False
    /// means definitely absent — no false negatives.
    pub fn contains(&self, value: &str) -> bool {
        match self {
            Filter::Bloom(b) => b.contains(value),
            Filter::Range(r) => r.contains(value),
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut body = Vec::new();
        match self {
            Filter::Bloom(b) => {
                body.push(TAG_BLOOM);
                b.write(&mut body).expect("writing to Vec never fails");
            }
            Filter::Range(r) => {
                body.push(TAG_RANGE);
                r.write(&mut body).expect("writing to Vec never fails");
            }
        }
        let checksum = crc32fast::hash(&body);
        let mut out = Vec::with_capacity(body.len() + 9);
        out.extend_from_slice(MAGIC);
        out.push(FORMAT_VERSION);
        out.extend_from_slice(&body);
        out.extend_from_slice(&checksum.to_le_bytes());
        out
    }

    pub fn deserialize(bytes: &[u8], path_for_errors: &std::path::Path) -> Result<Self> {
        let bad = |reason: &str| BloomdexError::CorruptArtifact {
            path: path_for_errors.to_path_buf(),
            reason: reason.to_string(),
        };
        if bytes.len() < 4 + 1 + 4 {
            return Err(bad("truncated artifact"));
        }
        let (header, rest) = bytes.split_at(4);
        if header != MAGIC {
            return Err(bad("bad magic bytes"));
        }
        let (version, rest) = rest.split_at(1);
        if version[0] != FORMAT_VERSION {
            return Err(bad("unsupported format version"));
        }
        let (body, checksum_bytes) = rest.split_at(rest.len() - 4);
        let expected = u32::from_le_bytes(checksum_bytes.try_into().unwrap());
        let actual = crc32fast::hash(body);
        if expected != actual {
            return Err(bad("checksum mismatch"));
        }
        let mut cursor = io::Cursor::new(body);
        let tag = cursor.read_u8().map_err(|e| bad(&e.to_string()))?;
        match tag {
            TAG_BLOOM => {
                let b = BloomFilter::read(&mut cursor).map_err(|e| bad(&e.to_string()))?;
                Ok(Filter::Bloom(b))
            }
            TAG_RANGE => {
                let r = RangeFilter::read(&mut cursor).map_err(|e| bad(&e.to_string()))?;
                Ok(Filter::Range(r))
            }
            _ => Err(bad("unknown filter tag")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bloom_round_trip() {
        let mut b = BloomFilter::new(100, 0.01, DType::Text);
        b.insert("Active");
        b.insert("Inactive");
        assert!(b.contains("Active"));
        assert!(b.contains("Inactive"));

        let f = Filter::Bloom(b);
        let bytes = f.serialize();
        let back = Filter::deserialize(&bytes, std::path::Path::new("x")).unwrap();
        assert!(back.contains("Active"));
    }

    #[test]
    fn range_contains_bounds_inclusive() {
        let r = RangeFilter::new(0.0, 1000.0, DType::Integer);
        assert!(r.contains("0"));
        assert!(r.contains("1000"));
        assert!(!r.contains("1001"));
        assert!(!r.contains("not-a-number"));
    }

    #[test]
    fn range_round_trip() {
        let f = Filter::Range(RangeFilter::new(10.5, 99.25, DType::Floating));
        let bytes = f.serialize();
        let back = Filter::deserialize(&bytes, std::path::Path::new("x")).unwrap();
        assert!(back.contains("50.0"));
        assert!(!back.contains("5.0"));
    }

    #[test]
    fn empty_range_matches_nothing() {
        let f = Filter::Range(RangeFilter::empty(DType::Integer));
        assert!(!f.contains("0"));
    }

    #[test]
    fn corrupt_magic_is_rejected() {
        let mut bytes = Filter::Bloom(BloomFilter::new(10, 0.1, DType::Text)).serialize();
        bytes[0] = b'X';
        let err = Filter::deserialize(&bytes, std::path::Path::new("x")).unwrap_err();
        assert!(matches!(err, BloomdexError::CorruptArtifact { .. }));
    }

    #[test]
    fn corrupt_checksum_is_rejected() {
        let mut bytes = Filter::Bloom(BloomFilter::new(10, 0.1, DType::Text)).serialize();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let err = Filter::deserialize(&bytes, std::path::Path::new("x")).unwrap_err();
        assert!(matches!(err, BloomdexError::CorruptArtifact { .. }));
    }

    #[test]
    fn timestamp_round_trips_through_canonicalize() {
        let s = canonicalize(DType::Timestamp, "2024-03-05T12:30:00Z").unwrap();
        assert_eq!(s, "2024-03-05T12:30:00.000Z");
    }

    #[test]
    fn bloom_probe_matches_differently_formatted_timestamp() {
        // Indexed with the millisecond suffix already present...
        let mut b = BloomFilter::new(10, 0.1, DType::Timestamp);
        b.insert("2024-03-05T12:30:00.000Z");
        // ...but a later probe with the exact same instant in a shorter form
        // must still hit, since both canonicalize to the same string.
        assert!(b.contains("2024-03-05T12:30:00Z"));
        assert!(!b.contains("2024-03-05T12:31:00Z"));
    }

    #[test]
    fn bloom_fpr_bound_moderate_n() {
        let n = 10_000u64;
        let p = 0.1;
        let mut b = BloomFilter::new(n, p, DType::Text);
        for i in 0..n {
            b.insert(&format!("member-{i}"));
        }
        let mut false_positives = 0u64;
        let trials = 10_000u64;
        for i in 0..trials {
            if b.contains(&format!("absent-{i}")) {
                false_positives += 1;
            }
        }
        let empirical = false_positives as f64 / trials as f64;
        assert!(empirical <= p * 1.5, "empirical fpr {empirical} exceeds bound");
    }
}
