use std::io::Write;

use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::catalog::VariableRef;
use crate::query::PointRecord;
use crate::Result;

const HTTP_DATE: &[FormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

/// `Last-Modified` rendering, e.g. `Sat, 01 May 2021 12:00:00 GMT`.
pub fn http_date(at: OffsetDateTime) -> String {
    at.to_offset(time::UtcOffset::UTC)
        .format(HTTP_DATE)
        .unwrap_or_default()
}

/// Parse an `If-Modified-Since` value. Anything unparseable is `None`.
pub fn parse_http_date(value: &str) -> Option<OffsetDateTime> {
    PrimitiveDateTime::parse(value.trim(), HTTP_DATE)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

/// Stream records as a JSON array, one object per record. Returns the number
/// of records written. Output is flushed incrementally; an error mid-stream
/// leaves a truncated body.
pub fn write_json<W, I>(mut out: W, records: I) -> Result<u64>
where
    W: Write,
    I: IntoIterator<Item = Result<PointRecord>>,
{
    out.write_all(b"[")?;
    let mut count = 0u64;
    for record in records {
        let record = record?;
        if count > 0 {
            out.write_all(b",")?;
        }
        serde_json::to_writer(&mut out, &record)?;
        count += 1;
    }
    out.write_all(b"]")?;
    out.flush()?;
    Ok(count)
}

/// Stream records as CSV with a `time,<names...>` header. Missing values are
/// empty cells.
pub fn write_csv<W, I>(out: W, variables: &[VariableRef], records: I) -> Result<u64>
where
    W: Write,
    I: IntoIterator<Item = Result<PointRecord>>,
{
    let mut writer = csv::Writer::from_writer(out);
    let mut header = vec!["time"];
    header.extend(variables.iter().map(|v| v.name.as_str()));
    writer.write_record(&header)?;

    let mut count = 0u64;
    for record in records {
        let record = record?;
        let mut row = Vec::with_capacity(variables.len() + 1);
        row.push(record.time_string());
        for variable in variables {
            row.push(
                record
                    .get(&variable.name)
                    .map(|value| value.to_string())
                    .unwrap_or_default(),
            );
        }
        writer.write_record(&row)?;
        count += 1;
    }
    writer.flush()?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn record(timestamp: i64, fields: &[(&str, f64)]) -> Result<PointRecord> {
        Ok(PointRecord {
            timestamp,
            fields: fields.iter().map(|(n, v)| (n.to_string(), *v)).collect(),
        })
    }

    #[test]
    fn http_date_round_trip() {
        let at = datetime!(2021-05-01 12:00:00 UTC);
        let text = http_date(at);
        assert_eq!(text, "Sat, 01 May 2021 12:00:00 GMT");
        assert_eq!(parse_http_date(&text), Some(at));
        assert_eq!(parse_http_date("yesterday"), None);
    }

    #[test]
    fn json_array_is_comma_separated() {
        let mut out = Vec::new();
        let count = write_json(&mut out, vec![record(0, &[("x", 1.0)]), record(1000, &[("y", 2.5)])])
            .unwrap();
        assert_eq!(count, 2);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            r#"[{"time":"1970-01-01T00:00:00+00:00","x":1.0},{"time":"1970-01-01T00:00:01+00:00","y":2.5}]"#
        );

        let mut empty = Vec::new();
        write_json(&mut empty, Vec::new()).unwrap();
        assert_eq!(empty, b"[]");
    }

    #[test]
    fn csv_leaves_missing_cells_blank() {
        let variables = vec![VariableRef::new(1, "x"), VariableRef::new(2, "y")];
        let mut out = Vec::new();
        write_csv(&mut out, &variables, vec![record(0, &[("y", 3.0)])]).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "time,x,y\n1970-01-01T00:00:00+00:00,,3\n");
    }
}
