use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use csv::{ByteRecord, ByteRecordsIntoIter, ReaderBuilder, Trim};
use flate2::read::GzDecoder;
use time::{Date, Month, PrimitiveDateTime, Time, UtcOffset};

use super::RawFrame;
use crate::catalog::{EXTENDED_MASK, PAYLOAD_LEN};
use crate::{Error, Result};

pub const REQUIRED_COLUMNS: [&str; 9] =
    ["year", "month", "day", "hour", "min", "sec", "ms", "id", "data"];

#[derive(Debug, Clone, Copy)]
struct ColumnIndices {
    year: usize,
    month: usize,
    day: usize,
    hour: usize,
    min: usize,
    sec: usize,
    ms: usize,
    id: usize,
    data: usize,
}

impl ColumnIndices {
    fn from_headers(headers: &ByteRecord) -> Result<Self> {
        let lookup = |name: &str| -> Result<usize> {
            headers
                .iter()
                .position(|h| h == name.as_bytes())
                .ok_or_else(|| Error::Format(format!("missing log column: {name}")))
        };
        Ok(Self {
            year: lookup("year")?,
            month: lookup("month")?,
            day: lookup("day")?,
            hour: lookup("hour")?,
            min: lookup("min")?,
            sec: lookup("sec")?,
            ms: lookup("ms")?,
            id: lookup("id")?,
            data: lookup("data")?,
        })
    }
}

/// A tabular frame log as written by the on-car logger.
///
/// Opening validates the header; a log without the required columns is a
/// fatal format error. Row-level problems end the stream instead. Only the
/// required fields must be UTF-8; other columns are never decoded.
pub struct FrameLog {
    records: ByteRecordsIntoIter<Box<dyn Read>>,
    indices: ColumnIndices,
    offset: UtcOffset,
}

impl FrameLog {
    /// Open a `.csv` or `.csv.gz` log. `offset` is the logger clock's fixed
    /// offset from UTC.
    pub fn open(path: impl AsRef<Path>, offset: UtcOffset) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let gzipped = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("gz"))
            .unwrap_or(false);
        let reader: Box<dyn Read> = if gzipped {
            Box::new(GzDecoder::new(BufReader::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        Self::from_reader(reader, offset)
    }

    pub fn from_reader(reader: Box<dyn Read>, offset: UtcOffset) -> Result<Self> {
        let mut csv = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .from_reader(reader);
        let headers = csv
            .byte_headers()
            .map_err(|e| Error::Format(format!("unreadable log header: {e}")))?
            .clone();
        let indices = ColumnIndices::from_headers(&headers)?;
        Ok(Self {
            records: csv.into_byte_records(),
            indices,
            offset,
        })
    }

    pub fn frames(self) -> Frames {
        Frames {
            records: self.records,
            indices: self.indices,
            offset: self.offset,
            rows: 0,
            done: false,
        }
    }
}

/// Frames of a log in file order. Stops at the first malformed row.
pub struct Frames {
    records: ByteRecordsIntoIter<Box<dyn Read>>,
    indices: ColumnIndices,
    offset: UtcOffset,
    rows: u64,
    done: bool,
}

impl Frames {
    /// Rows turned into frames so far.
    pub fn rows(&self) -> u64 {
        self.rows
    }
}

impl Iterator for Frames {
    type Item = RawFrame;

    fn next(&mut self) -> Option<RawFrame> {
        if self.done {
            return None;
        }
        let parsed = match self.records.next() {
            None => None,
            Some(Ok(record)) => parse_row(&record, &self.indices, self.offset),
            Some(Err(err)) => {
                log::debug!("log row {} unreadable: {err}", self.rows + 1);
                None
            }
        };
        match parsed {
            Some(frame) => {
                self.rows += 1;
                Some(frame)
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

fn parse_row(record: &ByteRecord, indices: &ColumnIndices, offset: UtcOffset) -> Option<RawFrame> {
    let field = |idx: usize| -> Option<&str> { std::str::from_utf8(record.get(idx)?).ok() };
    let int = |idx: usize| -> Option<i64> { field(idx)?.parse().ok() };

    let year = i32::try_from(int(indices.year)?).ok()?;
    let month = Month::try_from(u8::try_from(int(indices.month)?).ok()?).ok()?;
    let day = u8::try_from(int(indices.day)?).ok()?;
    let date = Date::from_calendar_date(year, month, day).ok()?;
    let time = Time::from_hms_milli(
        u8::try_from(int(indices.hour)?).ok()?,
        u8::try_from(int(indices.min)?).ok()?,
        u8::try_from(int(indices.sec)?).ok()?,
        u16::try_from(int(indices.ms)?).ok()?,
    )
    .ok()?;
    let at = PrimitiveDateTime::new(date, time).assume_offset(offset);
    let timestamp = i64::try_from(at.unix_timestamp_nanos() / 1_000_000).ok()?;

    let id_text = field(indices.id)?;
    let id_text = id_text
        .strip_prefix("0x")
        .or_else(|| id_text.strip_prefix("0X"))
        .unwrap_or(id_text);
    let id = (u64::from_str_radix(id_text, 16).ok()? & u64::from(EXTENDED_MASK)) as u32;

    let data = decode_hex(field(indices.data)?)?;
    if data.len() < PAYLOAD_LEN {
        return None;
    }
    let mut payload = [0u8; PAYLOAD_LEN];
    payload.copy_from_slice(&data[..PAYLOAD_LEN]);

    Some(RawFrame {
        timestamp,
        id,
        payload,
    })
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    let digits: Vec<u8> = text
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    if digits.len() % 2 != 0 {
        return None;
    }
    digits
        .chunks_exact(2)
        .map(|pair| {
            let hi = (pair[0] as char).to_digit(16)?;
            let lo = (pair[1] as char).to_digit(16)?;
            Some((hi * 16 + lo) as u8)
        })
        .collect()
}
