//! Range queries across runs.
//!
//! [`RangeMerger::plan`] picks the runs whose span overlaps the query and
//! computes their combined modification watermark. [`QueryPlan::respond`]
//! either short-circuits on a matching `If-Modified-Since` or hands back a
//! lazy [`RecordStream`] over the matched runs, in run-list order.

mod encode;
mod stream;

pub use encode::{http_date, parse_http_date, write_csv, write_json};
pub use stream::{PointRecord, RecordStream};

use time::OffsetDateTime;

use crate::catalog::VariableRef;
use crate::container::ContainerReader;
use crate::storage::ContainerStore;
use crate::Result;

/// Time span covered by one run's container, epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSpan {
    pub run_id: u64,
    pub start: i64,
    pub end: i64,
}

impl RunSpan {
    pub fn new(run_id: u64, start: i64, end: i64) -> Self {
        Self { run_id, start, end }
    }

    pub fn from_reader(run_id: u64, reader: &ContainerReader) -> Self {
        Self::new(run_id, reader.start(), reader.end())
    }

    /// Open-interval intersection: spans that only touch the query at an
    /// endpoint do not overlap.
    pub fn overlaps(&self, start: i64, end: i64) -> bool {
        self.start < end && start < self.end
    }
}

/// `[start, end)` in epoch milliseconds plus the variables to project.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeQuery {
    pub start: i64,
    pub end: i64,
    pub variables: Vec<VariableRef>,
}

pub struct RangeMerger<'a> {
    store: &'a ContainerStore,
}

impl<'a> RangeMerger<'a> {
    pub fn new(store: &'a ContainerStore) -> Self {
        Self { store }
    }

    pub fn plan(&self, runs: &[RunSpan], query: RangeQuery) -> Result<QueryPlan<'a>> {
        let matched: Vec<RunSpan> = runs
            .iter()
            .filter(|span| span.overlaps(query.start, query.end))
            .copied()
            .collect();

        let mut watermark = OffsetDateTime::UNIX_EPOCH;
        for span in &matched {
            watermark = watermark.max(self.store.last_modified(span.run_id)?);
        }
        let watermark = truncate_to_seconds(watermark);
        log::debug!(
            "range [{}, {}) matched {} of {} runs, watermark {}",
            query.start,
            query.end,
            matched.len(),
            runs.len(),
            http_date(watermark)
        );

        Ok(QueryPlan {
            store: self.store,
            runs: matched,
            variables: query.variables,
            watermark,
        })
    }

    /// Union of stored variable ids across runs overlapping `[start, end)`,
    /// in first-seen order.
    pub fn variables_in_range(&self, runs: &[RunSpan], start: i64, end: i64) -> Result<Vec<i32>> {
        let mut ids = Vec::new();
        for span in runs.iter().filter(|span| span.overlaps(start, end)) {
            for id in self.store.included_variables(span.run_id)? {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }
}

pub struct QueryPlan<'a> {
    store: &'a ContainerStore,
    runs: Vec<RunSpan>,
    variables: Vec<VariableRef>,
    watermark: OffsetDateTime,
}

pub enum QueryOutcome<'a> {
    NotModified {
        last_modified: OffsetDateTime,
    },
    Records {
        last_modified: OffsetDateTime,
        stream: RecordStream<'a>,
    },
}

impl<'a> QueryPlan<'a> {
    pub fn runs(&self) -> &[RunSpan] {
        &self.runs
    }

    pub fn variables(&self) -> &[VariableRef] {
        &self.variables
    }

    /// Latest modification time of the matched containers, whole seconds.
    /// The epoch when nothing matched.
    pub fn watermark(&self) -> OffsetDateTime {
        self.watermark
    }

    /// An `If-Modified-Since` value that parses and equals the watermark
    /// exactly yields [`QueryOutcome::NotModified`]; anything else streams.
    pub fn respond(self, if_modified_since: Option<&str>) -> QueryOutcome<'a> {
        let last_modified = self.watermark;
        if if_modified_since.and_then(parse_http_date) == Some(last_modified) {
            return QueryOutcome::NotModified { last_modified };
        }
        QueryOutcome::Records {
            last_modified,
            stream: RecordStream::new(self.store, self.runs, self.variables),
        }
    }
}

fn truncate_to_seconds(at: OffsetDateTime) -> OffsetDateTime {
    at.replace_nanosecond(0).unwrap_or(at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn overlap_excludes_boundary_touch() {
        let span = RunSpan::new(1, 100, 200);
        assert!(!span.overlaps(50, 100));
        assert!(!span.overlaps(200, 300));
        assert!(span.overlaps(50, 101));
        assert!(span.overlaps(90, 260));
        assert!(span.overlaps(120, 150));
    }

    #[test]
    fn watermark_drops_subsecond_part() {
        let at = datetime!(2021-05-01 12:00:00.750 UTC);
        assert_eq!(truncate_to_seconds(at), datetime!(2021-05-01 12:00:00 UTC));
    }
}
