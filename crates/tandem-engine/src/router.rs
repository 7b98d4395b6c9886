//! Query routing.
//!
//! The router looks only at a query's shape and its staleness tolerance.
//! Narrow key lookups go to the row store. Aggregates and wide scans that
//! tolerate staleness go to the columnar store at a time bound derived from
//! the tolerance. Fresh wide scans are answered by a row store range scan,
//! and fresh aggregates are refused: columnar results never merge in rows
//! the synchronizer has not published yet.

use std::fmt;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU64, Ordering};

use tandem_column::Aggregate;
use tandem_common::config::RouterConfig;
use tandem_common::types::{Predicate, RowId, SeqNo, TableId};
use tandem_common::{TandemError, TandemResult};

/// What a query reads.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryTarget {
    /// One row by key.
    Point(RowId),
    /// A set of keys.
    Keys(Vec<RowId>),
    /// An inclusive key range.
    Range(RangeInclusive<RowId>),
    /// Every row that matches the predicate.
    Scan,
    /// An aggregate over the rows that match the predicate.
    Aggregate(Aggregate),
}

/// How stale a result may be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Staleness {
    /// Must reflect every committed change.
    Fresh,
    /// May trail the last committed sequence number by this many entries.
    MaxLag(u64),
    /// Must reflect everything up to this sequence number.
    AtLeast(SeqNo),
    /// Any published state will do.
    #[default]
    Any,
}

/// A read request.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Table to read.
    pub table_id: TableId,
    /// Shape of the read.
    pub target: QueryTarget,
    /// Projected columns; empty means all columns.
    pub columns: Vec<String>,
    /// Row filter.
    pub predicate: Predicate,
    /// Staleness tolerance.
    pub staleness: Staleness,
}

impl Query {
    /// Creates a query of any shape.
    #[must_use]
    pub fn new(table_id: TableId, target: QueryTarget) -> Self {
        Self {
            table_id,
            target,
            columns: Vec::new(),
            predicate: Predicate::True,
            staleness: Staleness::default(),
        }
    }

    /// Point lookup.
    #[must_use]
    pub fn point(table_id: TableId, row_id: RowId) -> Self {
        Self::new(table_id, QueryTarget::Point(row_id))
    }

    /// Key-set lookup.
    #[must_use]
    pub fn keys(table_id: TableId, keys: Vec<RowId>) -> Self {
        Self::new(table_id, QueryTarget::Keys(keys))
    }

    /// Inclusive key range.
    #[must_use]
    pub fn range(table_id: TableId, range: RangeInclusive<RowId>) -> Self {
        Self::new(table_id, QueryTarget::Range(range))
    }

    /// Full scan.
    #[must_use]
    pub fn scan(table_id: TableId) -> Self {
        Self::new(table_id, QueryTarget::Scan)
    }

    /// Aggregate.
    #[must_use]
    pub fn aggregate(table_id: TableId, aggregate: Aggregate) -> Self {
        Self::new(table_id, QueryTarget::Aggregate(aggregate))
    }

    /// Sets the projection.
    #[must_use]
    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the filter.
    #[must_use]
    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }

    /// Sets the staleness tolerance.
    #[must_use]
    pub fn with_staleness(mut self, staleness: Staleness) -> Self {
        self.staleness = staleness;
        self
    }

    /// Number of keys a key-addressed query touches.
    #[must_use]
    pub fn key_count(&self) -> Option<u64> {
        match &self.target {
            QueryTarget::Point(_) => Some(1),
            QueryTarget::Keys(keys) => Some(keys.len() as u64),
            QueryTarget::Range(range) => {
                let (start, end) = (range.start().as_u64(), range.end().as_u64());
                Some(if start > end { 0 } else { (end - start).saturating_add(1) })
            }
            QueryTarget::Scan | QueryTarget::Aggregate(_) => None,
        }
    }
}

/// Where a query runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Row store, always current.
    RowStore,
    /// Columnar store at the given time bound.
    ColumnStore {
        /// Lowest watermark the result may be computed against.
        time_bound: SeqNo,
    },
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::RowStore => write!(f, "row"),
            Route::ColumnStore { time_bound } => write!(f, "column@{}", time_bound),
        }
    }
}

/// Routing counters.
#[derive(Debug, Default)]
pub struct RouterStats {
    /// Queries sent to the row store.
    pub row_routes: AtomicU64,
    /// Queries sent to the columnar store.
    pub column_routes: AtomicU64,
    /// Queries refused.
    pub rejected: AtomicU64,
}

/// Snapshot of [`RouterStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RouterStatsSnapshot {
    /// Queries sent to the row store.
    pub row_routes: u64,
    /// Queries sent to the columnar store.
    pub column_routes: u64,
    /// Queries refused.
    pub rejected: u64,
}

/// Dispatches queries by shape.
#[derive(Debug, Default)]
pub struct QueryRouter {
    config: RouterConfig,
    stats: RouterStats,
}

impl QueryRouter {
    /// Creates a router.
    #[must_use]
    pub fn new(config: RouterConfig) -> Self {
        Self {
            config,
            stats: RouterStats::default(),
        }
    }

    /// Picks the store for `query` given the last committed sequence number.
    pub fn route(&self, query: &Query, latest: SeqNo) -> TandemResult<Route> {
        let route = self.decide(query, latest);
        let counter = match &route {
            Ok(Route::RowStore) => &self.stats.row_routes,
            Ok(Route::ColumnStore { .. }) => &self.stats.column_routes,
            Err(_) => &self.stats.rejected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        route
    }

    fn decide(&self, query: &Query, latest: SeqNo) -> TandemResult<Route> {
        let narrow = query
            .key_count()
            .map_or(false, |n| n <= self.config.point_lookup_max_rows as u64);
        if narrow {
            return Ok(Route::RowStore);
        }

        let time_bound = match query.staleness {
            Staleness::Fresh => None,
            Staleness::MaxLag(lag) => Some(SeqNo::new(latest.as_u64().saturating_sub(lag))),
            Staleness::AtLeast(seq) => Some(seq),
            Staleness::Any => Some(SeqNo::ZERO),
        };
        match (time_bound, &query.target) {
            (Some(time_bound), _) => Ok(Route::ColumnStore { time_bound }),
            (None, QueryTarget::Aggregate(_)) => Err(TandemError::unsupported(
                "fresh aggregates are not supported; allow staleness or sync first",
            )),
            (None, _) => Ok(Route::RowStore),
        }
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> RouterStatsSnapshot {
        RouterStatsSnapshot {
            row_routes: self.stats.row_routes.load(Ordering::Relaxed),
            column_routes: self.stats.column_routes.load(Ordering::Relaxed),
            rejected: self.stats.rejected.load(Ordering::Relaxed),
        }
    }
}
