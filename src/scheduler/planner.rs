use std::cmp::Reverse;
use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::models::{QueueRecord, RecordStatus};

/// How far ahead overflow may look for a free day.
pub const MAX_HORIZON_DAYS: u32 = 3660;

/// Whether a record may be worked on in a pass running on `today`.
pub fn is_due(record: &QueueRecord, today: NaiveDate) -> bool {
    matches!(record.status, RecordStatus::Pending | RecordStatus::Scheduled)
        && record.scheduled_for.is_none_or(|d| d <= today)
}

/// Due records in processing order: explicit priority first (highest wins),
/// then submission order.
pub fn order_candidates(records: Vec<QueueRecord>, today: NaiveDate) -> Vec<QueueRecord> {
    let mut due: Vec<QueueRecord> = records.into_iter().filter(|r| is_due(r, today)).collect();
    due.sort_by_key(|r| (r.priority.is_none(), Reverse(r.priority.unwrap_or(0)), r.seq));
    due
}

/// Records that occupy a slot on the day they are scheduled for.
pub fn occupies_schedule(record: &QueueRecord) -> bool {
    matches!(record.status, RecordStatus::Scheduled | RecordStatus::Uploading)
}

/// Per-day committed counts, filled lazily from the store during a pass and
/// bumped as overflow assigns new dates.
#[derive(Debug)]
pub struct CapacityLedger {
    limit: usize,
    counts: BTreeMap<NaiveDate, usize>,
}

impl CapacityLedger {
    pub fn new(limit: u32) -> Self {
        Self {
            limit: limit as usize,
            counts: BTreeMap::new(),
        }
    }

    pub fn is_known(&self, day: NaiveDate) -> bool {
        self.counts.contains_key(&day)
    }

    pub fn load(&mut self, day: NaiveDate, committed: usize) {
        self.counts.insert(day, committed);
    }

    pub fn has_room(&self, day: NaiveDate) -> bool {
        self.counts.get(&day).copied().unwrap_or(0) < self.limit
    }

    pub fn claim(&mut self, day: NaiveDate) {
        *self.counts.entry(day).or_insert(0) += 1;
    }

    /// Earliest known day after `today` with room, scanning only days
    /// already loaded. Returns the first unknown day when it gets there.
    pub fn scan_from(&self, today: NaiveDate) -> Scan {
        if self.limit == 0 {
            return Scan::Exhausted;
        }
        let mut day = today;
        for _ in 0..MAX_HORIZON_DAYS {
            day = match day.succ_opt() {
                Some(next) => next,
                None => return Scan::Exhausted,
            };
            if !self.is_known(day) {
                return Scan::NeedsLoad(day);
            }
            if self.has_room(day) {
                return Scan::Found(day);
            }
        }
        Scan::Exhausted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan {
    Found(NaiveDate),
    NeedsLoad(NaiveDate),
    Exhausted,
}
