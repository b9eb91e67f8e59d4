use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::date;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A wall-clock trigger for one habit.
///
/// Equality ignores the poll interval, which is a runtime setting and is not
/// persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub habit_name: String,
    pub remind_at: NaiveDateTime,
    #[serde(skip, default = "default_poll_interval")]
    poll_interval: Duration,
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

impl PartialEq for Reminder {
    fn eq(&self, other: &Self) -> bool {
        self.habit_name == other.habit_name && self.remind_at == other.remind_at
    }
}

impl Eq for Reminder {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderOutcome {
    Fired,
    Cancelled,
}

/// Shared flag used to abandon a pending reminder from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Delivery channel for due reminders. Platform adapters implement this.
pub trait ReminderSink: Send + Sync {
    fn remind(&self, reminder: &Reminder) -> anyhow::Result<()>;
}

/// Sink that reports due reminders through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl ReminderSink for LogSink {
    fn remind(&self, reminder: &Reminder) -> anyhow::Result<()> {
        tracing::info!(habit = %reminder.habit_name, "{}", reminder.message());
        Ok(())
    }
}

impl Reminder {
    pub fn new(habit_name: impl Into<String>, remind_at: NaiveDateTime) -> Self {
        Self {
            habit_name: habit_name.into(),
            remind_at,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        now >= self.remind_at
    }

    pub fn message(&self) -> String {
        format!("Reminder: time to do your '{}' habit!", self.habit_name)
    }

    /// Blocks until the reminder is due, then hands it to `sink` once.
    pub fn wait(&self, token: &CancellationToken, sink: &dyn ReminderSink) -> ReminderOutcome {
        self.wait_with_clock(token, sink, date::now)
    }

    /// [`wait`](Self::wait) with an explicit clock.
    ///
    /// Cancellation is checked before every clock read. A sink that fails or
    /// panics is logged and reported as [`ReminderOutcome::Cancelled`].
    pub fn wait_with_clock(
        &self,
        token: &CancellationToken,
        sink: &dyn ReminderSink,
        mut clock: impl FnMut() -> NaiveDateTime,
    ) -> ReminderOutcome {
        loop {
            if token.is_cancelled() {
                tracing::info!(habit = %self.habit_name, "reminder cancelled");
                return ReminderOutcome::Cancelled;
            }
            if self.is_due(clock()) {
                break;
            }
            thread::sleep(self.poll_interval);
        }

        match panic::catch_unwind(AssertUnwindSafe(|| sink.remind(self))) {
            Ok(Ok(())) => ReminderOutcome::Fired,
            Ok(Err(err)) => {
                tracing::warn!(habit = %self.habit_name, error = %err, "reminder delivery failed");
                ReminderOutcome::Cancelled
            }
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|msg| msg.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                tracing::warn!(habit = %self.habit_name, %message, "reminder sink panicked");
                ReminderOutcome::Cancelled
            }
        }
    }

    /// Runs [`wait`](Self::wait) on a background thread.
    pub fn spawn(
        self,
        token: CancellationToken,
        sink: Arc<dyn ReminderSink>,
    ) -> JoinHandle<ReminderOutcome> {
        thread::spawn(move || self.wait(&token, sink.as_ref()))
    }
}
