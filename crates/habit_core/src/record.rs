use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::date;

/// Completion history for a single habit.
///
/// Dates are kept in a sorted set, so duplicates collapse and insertion
/// order never matters. Streaks are recomputed on every query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HabitRecord {
    pub habit_name: String,
    #[serde(default)]
    pub dates: BTreeSet<NaiveDate>,
}

impl HabitRecord {
    pub fn new(habit_name: impl Into<String>) -> Self {
        Self {
            habit_name: habit_name.into(),
            dates: BTreeSet::new(),
        }
    }

    pub fn habit_name(&self) -> &str {
        &self.habit_name
    }

    /// Completion dates in ascending order.
    pub fn dates(&self) -> impl DoubleEndedIterator<Item = NaiveDate> + '_ {
        self.dates.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Marks the habit complete on `date`. Returns `false` when the date was
    /// already recorded.
    pub fn add_record(&mut self, date: NaiveDate) -> bool {
        self.dates.insert(date)
    }

    pub fn remove_record(&mut self, date: NaiveDate) -> bool {
        self.dates.remove(&date)
    }

    pub fn is_completed_on(&self, date: NaiveDate) -> bool {
        self.dates.contains(&date)
    }

    pub fn last_completed(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    /// Length of the longest run of consecutive calendar days.
    pub fn longest_streak(&self) -> u32 {
        let mut best_run = 0;
        let mut current_run = 0;
        let mut previous: Option<NaiveDate> = None;

        for date in self.dates() {
            current_run = match previous {
                Some(prev) if is_next_day(prev, date) => current_run + 1,
                _ => 1,
            };
            best_run = best_run.max(current_run);
            previous = Some(date);
        }

        best_run
    }

    /// Length of the run ending today, or 0 when today has no completion.
    pub fn current_streak(&self) -> u32 {
        self.current_streak_on(date::today())
    }

    /// Same as [`current_streak`](Self::current_streak) with "today" pinned
    /// to `today`.
    pub fn current_streak_on(&self, today: NaiveDate) -> u32 {
        if self.last_completed() != Some(today) {
            return 0;
        }

        let mut streak = 0;
        let mut expected = Some(today);
        for date in self.dates().rev() {
            if Some(date) != expected {
                break;
            }
            streak += 1;
            expected = date.pred_opt();
        }
        streak
    }
}

fn is_next_day(previous: NaiveDate, date: NaiveDate) -> bool {
    previous.succ_opt() == Some(date)
}
