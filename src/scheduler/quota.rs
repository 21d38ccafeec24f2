use std::sync::Mutex;

use chrono::NaiveDate;

/// Publishes used and in flight for one calendar day.
///
/// Owned by a single scheduler. Every publish attempt must hold a
/// [`QuotaSlot`] so concurrent attempts can never overshoot the daily cap.
pub struct QuotaCounter {
    limit: u32,
    state: Mutex<QuotaState>,
}

#[derive(Debug, Default)]
struct QuotaState {
    day: Option<NaiveDate>,
    used: u32,
    reserved: u32,
}

impl QuotaState {
    fn roll_to(&mut self, day: NaiveDate) {
        if self.day != Some(day) {
            self.day = Some(day);
            self.used = 0;
            self.reserved = 0;
        }
    }
}

impl QuotaCounter {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            state: Mutex::new(QuotaState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QuotaState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fold in the committed count read from the store. The in-memory count
    /// never goes down within a day: a publish whose store write failed still
    /// used a slot on the platform.
    pub fn sync(&self, day: NaiveDate, committed: usize) {
        let mut state = self.lock();
        state.roll_to(day);
        let committed = u32::try_from(committed).unwrap_or(u32::MAX);
        state.used = state.used.max(committed);
    }

    pub fn used(&self, day: NaiveDate) -> u32 {
        let mut state = self.lock();
        state.roll_to(day);
        state.used
    }

    pub fn remaining(&self, day: NaiveDate) -> u32 {
        let mut state = self.lock();
        state.roll_to(day);
        self.limit.saturating_sub(state.used + state.reserved)
    }

    /// Reserve one publish for `day`, or `None` when the day is full.
    pub fn try_reserve(&self, day: NaiveDate) -> Option<QuotaSlot<'_>> {
        let mut state = self.lock();
        state.roll_to(day);
        if state.used + state.reserved >= self.limit {
            return None;
        }
        state.reserved += 1;
        Some(QuotaSlot {
            counter: self,
            day,
            settled: false,
        })
    }
}

/// A reserved publish. Dropping it without [`QuotaSlot::commit`] gives the
/// slot back.
pub struct QuotaSlot<'a> {
    counter: &'a QuotaCounter,
    day: NaiveDate,
    settled: bool,
}

impl QuotaSlot<'_> {
    pub fn commit(mut self) {
        let mut state = self.counter.lock();
        if state.day == Some(self.day) {
            state.reserved = state.reserved.saturating_sub(1);
            state.used += 1;
        }
        self.settled = true;
    }
}

impl Drop for QuotaSlot<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = self.counter.lock();
        if state.day == Some(self.day) {
            state.reserved = state.reserved.saturating_sub(1);
        }
    }
}
