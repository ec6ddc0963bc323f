use std::collections::VecDeque;
use std::sync::Arc;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::catalog::VariableRef;
use crate::container::{epoch_ms_to_datetime, ContainerReader, DenseMatrix, ProjectedChunks};
use crate::query::RunSpan;
use crate::storage::ContainerStore;
use crate::Result;

// ISO 8601 as existing clients parse it: microseconds only when non-zero,
// offset as `+00:00`.
const ISO_SECONDS: &[FormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second][offset_hour sign:mandatory]:[offset_minute]"
);
const ISO_MICROS: &[FormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6][offset_hour sign:mandatory]:[offset_minute]"
);

/// One output row: a timestamp and the requested variables that have a value
/// at it, in request order.
#[derive(Debug, Clone, PartialEq)]
pub struct PointRecord {
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub fields: Vec<(String, f64)>,
}

impl PointRecord {
    pub fn time(&self) -> OffsetDateTime {
        epoch_ms_to_datetime(self.timestamp)
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| *value)
    }

    /// `2021-05-01T12:00:00.250000+00:00`, or without the fraction on a
    /// whole second.
    pub fn time_string(&self) -> String {
        let at = self.time();
        let format = if at.nanosecond() == 0 {
            ISO_SECONDS
        } else {
            ISO_MICROS
        };
        at.format(format)
            .unwrap_or_else(|_| self.timestamp.to_string())
    }
}

/// `{"time": "<iso 8601>", "<name>": value, ...}`
impl Serialize for PointRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 1))?;
        map.serialize_entry("time", &self.time_string())?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Lazy records across matched runs.
///
/// Runs are visited in list order and each one's rows in its own timestamp
/// order; streams are concatenated, not merged by time. Only one container
/// is open at a time, opened when the previous one is exhausted. Rows with
/// no non-NaN requested value are skipped. After an error the stream ends.
pub struct RecordStream<'a> {
    store: &'a ContainerStore,
    pending: VecDeque<RunSpan>,
    ids: Vec<i32>,
    names: Vec<String>,
    chunks: Option<ProjectedChunks<Arc<ContainerReader>>>,
    block: Option<DenseMatrix>,
    block_base: usize,
    block_row: usize,
}

impl<'a> RecordStream<'a> {
    pub(crate) fn new(
        store: &'a ContainerStore,
        runs: Vec<RunSpan>,
        variables: Vec<VariableRef>,
    ) -> Self {
        let (ids, names) = variables.into_iter().map(|v| (v.id, v.name)).unzip();
        Self {
            store,
            pending: runs.into(),
            ids,
            names,
            chunks: None,
            block: None,
            block_base: 0,
            block_row: 0,
        }
    }

    /// Names of the projected variables, in output order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    fn next_in_block(&mut self) -> Option<PointRecord> {
        let block = self.block.as_ref()?;
        let chunks = self.chunks.as_ref()?;
        while self.block_row < block.rows() {
            let row = self.block_row;
            self.block_row += 1;
            let fields: Vec<(String, f64)> = self
                .names
                .iter()
                .zip(block.row(row))
                .filter(|(_, value)| !value.is_nan())
                .map(|(name, value)| (name.clone(), *value))
                .collect();
            if fields.is_empty() {
                continue;
            }
            let timestamp = chunks.reader().timestamps()[self.block_base + row];
            return Some(PointRecord { timestamp, fields });
        }
        None
    }

    fn stop(&mut self) {
        self.pending.clear();
        self.chunks = None;
        self.block = None;
    }
}

impl Iterator for RecordStream<'_> {
    type Item = Result<PointRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.next_in_block() {
                return Some(Ok(record));
            }
            self.block = None;

            if let Some(chunks) = self.chunks.as_mut() {
                let base = chunks.next_row();
                match chunks.next() {
                    Some(Ok(block)) => {
                        self.block = Some(block);
                        self.block_base = base;
                        self.block_row = 0;
                        continue;
                    }
                    Some(Err(err)) => {
                        self.stop();
                        return Some(Err(err));
                    }
                    None => self.chunks = None,
                }
            }

            let span = self.pending.pop_front()?;
            match self.store.open(span.run_id) {
                Ok(reader) => {
                    log::debug!("streaming run {} ({} rows)", span.run_id, reader.row_count());
                    self.chunks = Some(ProjectedChunks::new(Arc::new(reader), &self.ids));
                }
                Err(err) => {
                    self.stop();
                    return Some(Err(err));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_time_first() {
        let record = PointRecord {
            timestamp: 1_619_870_400_250,
            fields: vec![("rpm".to_string(), 812.5), ("coolant".to_string(), 90.0)],
        };
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"time":"2021-05-01T12:00:00.250000+00:00","rpm":812.5,"coolant":90.0}"#
        );
        assert_eq!(record.get("coolant"), Some(90.0));
        assert_eq!(record.get("speed"), None);
    }

    #[test]
    fn whole_seconds_drop_the_fraction() {
        let at = |timestamp| PointRecord {
            timestamp,
            fields: Vec::new(),
        };
        assert_eq!(at(1_619_870_400_000).time_string(), "2021-05-01T12:00:00+00:00");
        assert_eq!(at(1_619_870_400_001).time_string(), "2021-05-01T12:00:00.001000+00:00");
        assert_eq!(at(-1).time_string(), "1969-12-31T23:59:59.999000+00:00");
    }
}
