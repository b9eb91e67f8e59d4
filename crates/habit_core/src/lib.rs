pub mod date;
pub mod error;
pub mod habit;
pub mod record;
pub mod reminder;
pub mod service;
pub mod store;
pub mod user;

pub use crate::error::{HabitError, StoreError};
pub use crate::habit::{Habit, HabitEdit, Periodicity};
pub use crate::record::HabitRecord;
pub use crate::reminder::{CancellationToken, LogSink, Reminder, ReminderOutcome, ReminderSink};
pub use crate::service::{HabitService, HabitServiceBuilder, HabitStats};
pub use crate::store::{JsonFileStore, MemoryStore, Store};
pub use crate::user::User;
