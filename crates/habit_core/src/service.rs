use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    error::{HabitError, Result},
    habit::{Habit, HabitEdit},
    record::HabitRecord,
    reminder::Reminder,
    store::{owned_id, Fields, Owned, Store},
    user::User,
};

/// Streak figures for one habit as of a given day.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HabitStats {
    pub longest: u32,
    pub current: u32,
    pub total: usize,
}

impl HabitStats {
    pub fn from_record(record: &HabitRecord, today: NaiveDate) -> Self {
        Self {
            longest: record.longest_streak(),
            current: record.current_streak_on(today),
            total: record.len(),
        }
    }
}

/// Keeps users, habits, completion records and reminders consistent in a
/// caller-owned store.
pub struct HabitService<S: Store> {
    store: S,
}

pub struct HabitServiceBuilder<S: Store> {
    store: Option<S>,
}

impl<S: Store> Default for HabitServiceBuilder<S> {
    fn default() -> Self {
        Self { store: None }
    }
}

impl<S: Store> HabitServiceBuilder<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(mut self, store: S) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> anyhow::Result<HabitService<S>> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("habit service requires a store"))?;
        Ok(HabitService::new(store))
    }
}

impl<S: Store> HabitService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn builder() -> HabitServiceBuilder<S> {
        HabitServiceBuilder::new()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    #[instrument(skip(self, password))]
    pub fn register_user(&self, email: &str, password: &str) -> Result<User> {
        if self.store.load_entity::<User>(email)?.is_some() {
            return Err(HabitError::DuplicateUser(email.to_string()));
        }
        let user = User::new(email, password)?;
        self.store.create_entity(&user)?;
        tracing::info!(email, "registered user");
        Ok(user)
    }

    pub fn user(&self, email: &str) -> Result<Option<User>> {
        Ok(self.store.load_entity::<User>(email)?)
    }

    pub fn users(&self) -> Result<Vec<User>> {
        Ok(self.store.load_all::<User>()?)
    }

    /// Returns the user when `password` matches. Unknown emails and wrong
    /// passwords are indistinguishable to the caller.
    #[instrument(skip(self, password))]
    pub fn authenticate(&self, email: &str, password: &str) -> Result<Option<User>> {
        let user = self
            .user(email)?
            .filter(|user| user.check_password(password));
        if user.is_none() {
            tracing::debug!(email, "authentication rejected");
        }
        Ok(user)
    }

    /// Adds a habit to the user. When the updated user cannot be persisted
    /// the habit entity written by [`User::add_habit`] is removed again.
    #[instrument(skip(self, habit), fields(habit = %habit.name))]
    pub fn add_habit(&self, email: &str, habit: Habit) -> Result<()> {
        let mut user = self.require_user(email)?;
        let id = owned_id(email, &habit.name);
        user.add_habit(habit, &self.store)?;
        if let Err(err) = self.store.replace_entity(&user) {
            tracing::warn!(error = %err, "unable to persist user; rolling back habit");
            if let Err(rollback) = self.store.delete_entity::<Owned<Habit>>(&id) {
                tracing::warn!(error = %rollback, "habit rollback failed");
            }
            return Err(err.into());
        }
        Ok(())
    }

    /// Removes the habit together with its completion record and reminder.
    #[instrument(skip(self))]
    pub fn remove_habit(&self, email: &str, name: &str) -> Result<bool> {
        let mut user = self.require_user(email)?;
        if user.remove_habit(name).is_none() {
            return Ok(false);
        }
        self.store.replace_entity(&user)?;

        let id = owned_id(email, name);
        self.store.delete_entity::<Owned<Habit>>(&id)?;
        if self.store.delete_entity::<Owned<HabitRecord>>(&id)? {
            tracing::debug!(habit = name, "discarded completion record");
        }
        self.store.delete_entity::<Owned<Reminder>>(&id)?;
        tracing::info!(email, habit = name, "removed habit");
        Ok(true)
    }

    #[instrument(skip(self, edit))]
    pub fn edit_habit(&self, email: &str, name: &str, edit: HabitEdit) -> Result<bool> {
        let mut user = self.require_user(email)?;
        if edit.is_empty() || !user.edit_habit(name, edit) {
            return Ok(false);
        }
        if let Some(habit) = user.habit(name) {
            self.store
                .upsert_entity(&Owned::new(email, habit.clone()))?;
        }
        self.store.replace_entity(&user)?;
        Ok(true)
    }

    /// Validates loosely typed `fields` before editing.
    pub fn edit_habit_fields(&self, email: &str, name: &str, fields: &Fields) -> Result<bool> {
        let edit = HabitEdit::from_fields(fields)?;
        self.edit_habit(email, name, edit)
    }

    pub fn habit(&self, email: &str, name: &str) -> Result<Option<Habit>> {
        Ok(self
            .user(email)?
            .and_then(|user| user.habit(name).cloned()))
    }

    /// Records a completion, creating the habit's record on first use.
    #[instrument(skip(self))]
    pub fn mark_complete(&self, email: &str, name: &str, date: NaiveDate) -> Result<HabitRecord> {
        let user = self.require_user(email)?;
        if user.habit(name).is_none() {
            return Err(HabitError::HabitNotFound(name.to_string()));
        }

        let id = owned_id(email, name);
        let mut record = match self.store.load_entity::<Owned<HabitRecord>>(&id)? {
            Some(existing) => existing,
            None => Owned::new(email, HabitRecord::new(name)),
        };
        if !record.value.add_record(date) {
            tracing::debug!(%date, "completion already recorded");
            return Ok(record.into_inner());
        }
        self.store.upsert_entity(&record)?;
        Ok(record.into_inner())
    }

    pub fn record(&self, email: &str, name: &str) -> Result<Option<HabitRecord>> {
        Ok(self
            .store
            .load_entity::<Owned<HabitRecord>>(&owned_id(email, name))?
            .map(Owned::into_inner))
    }

    /// Streak figures for the habit; a habit never completed reports zeros.
    pub fn stats(&self, email: &str, name: &str, today: NaiveDate) -> Result<HabitStats> {
        let user = self.require_user(email)?;
        if user.habit(name).is_none() {
            return Err(HabitError::HabitNotFound(name.to_string()));
        }
        let record = self
            .record(email, name)?
            .unwrap_or_else(|| HabitRecord::new(name));
        Ok(HabitStats::from_record(&record, today))
    }

    /// Schedules a reminder, replacing any earlier one for the same habit.
    #[instrument(skip(self))]
    pub fn set_reminder(
        &self,
        email: &str,
        name: &str,
        remind_at: NaiveDateTime,
    ) -> Result<Reminder> {
        let user = self.require_user(email)?;
        if user.habit(name).is_none() {
            return Err(HabitError::HabitNotFound(name.to_string()));
        }
        let reminder = Reminder::new(name, remind_at);
        self.store
            .upsert_entity(&Owned::new(email, reminder.clone()))?;
        Ok(reminder)
    }

    pub fn reminders(&self, email: &str) -> Result<Vec<Reminder>> {
        Ok(self
            .store
            .load_all::<Owned<Reminder>>()?
            .into_iter()
            .filter(|owned| owned.owner == email)
            .map(Owned::into_inner)
            .collect())
    }
}

impl<S: Store> HabitService<S> {
    fn require_user(&self, email: &str) -> Result<User> {
        self.user(email)?
            .ok_or_else(|| HabitError::UserNotFound(email.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::{EntityKind, MemoryStore};
    use chrono::Duration;
    use std::cell::Cell;

    /// Memory store whose next `update` can be made to fail.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_next_update: Cell<bool>,
    }

    impl Store for FlakyStore {
        fn create(&self, kind: EntityKind, fields: Fields) -> Result<(), StoreError> {
            self.inner.create(kind, fields)
        }

        fn read_all(&self, kind: EntityKind) -> Result<Vec<Fields>, StoreError> {
            self.inner.read_all(kind)
        }

        fn read(&self, kind: EntityKind, id: &str) -> Result<Option<Fields>, StoreError> {
            self.inner.read(kind, id)
        }

        fn update(&self, kind: EntityKind, id: &str, fields: Fields) -> Result<bool, StoreError> {
            if self.fail_next_update.replace(false) {
                return Err(StoreError::Layout("disk full".into()));
            }
            self.inner.update(kind, id, fields)
        }

        fn delete(&self, kind: EntityKind, id: &str) -> Result<bool, StoreError> {
            self.inner.delete(kind, id)
        }
    }

    const EMAIL: &str = "test@example.com";

    fn service_with_habit() -> HabitService<MemoryStore> {
        let service = HabitService::builder()
            .with_store(MemoryStore::new())
            .build()
            .expect("build service");
        service
            .register_user(EMAIL, "securepassword")
            .expect("register");
        service
            .add_habit(EMAIL, Habit::daily("Exercise", "Daily workouts"))
            .expect("add habit");
        service
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn builder_requires_store() {
        assert!(HabitServiceBuilder::<MemoryStore>::new().build().is_err());
    }

    #[test]
    fn failed_user_write_rolls_back_habit_entity() {
        let service = HabitService::new(FlakyStore::default());
        service.register_user(EMAIL, "securepassword").unwrap();

        service.store().fail_next_update.set(true);
        let err = service
            .add_habit(EMAIL, Habit::daily("Exercise", "Daily workouts"))
            .unwrap_err();
        assert!(matches!(err, HabitError::Store(StoreError::Layout(_))));
        assert!(service
            .store()
            .read_all(EntityKind::Habits)
            .unwrap()
            .is_empty());
        assert!(service.habit(EMAIL, "Exercise").unwrap().is_none());

        service
            .add_habit(EMAIL, Habit::daily("Exercise", "Daily workouts"))
            .expect("retry succeeds");
        assert_eq!(
            service
                .store()
                .read_all(EntityKind::Habits)
                .unwrap()
                .len(),
            1
        );
        assert!(service.remove_habit(EMAIL, "Exercise").unwrap());
        assert!(service
            .store()
            .read_all(EntityKind::Habits)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn users_with_separator_names_keep_separate_records() {
        let service = HabitService::new(MemoryStore::new());
        service.register_user("a", "pw").unwrap();
        service.register_user("a/b", "pw").unwrap();
        service.add_habit("a", Habit::daily("b/run", "")).unwrap();
        service.add_habit("a/b", Habit::daily("run", "")).unwrap();
        let today = day(2025, 1, 1);

        service.mark_complete("a", "b/run", today).unwrap();
        assert_eq!(service.stats("a/b", "run", today).unwrap().total, 0);
        assert_eq!(service.stats("a", "b/run", today).unwrap().total, 1);

        assert!(service.remove_habit("a/b", "run").unwrap());
        let kept = service.record("a", "b/run").unwrap().expect("record kept");
        assert!(kept.is_completed_on(today));
        assert!(service.habit("a", "b/run").unwrap().is_some());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let service = service_with_habit();
        assert!(matches!(
            service.register_user(EMAIL, "other"),
            Err(HabitError::DuplicateUser(_))
        ));
    }

    #[test]
    fn authenticate_checks_password() {
        let service = service_with_habit();
        let user = service
            .authenticate(EMAIL, "securepassword")
            .unwrap()
            .expect("authenticated");
        assert_eq!(user.habits().len(), 1);
        assert!(service.authenticate(EMAIL, "nope").unwrap().is_none());
        assert!(service
            .authenticate("ghost@example.com", "securepassword")
            .unwrap()
            .is_none());
    }

    #[test]
    fn habit_mutations_require_known_user() {
        let service = service_with_habit();
        assert!(matches!(
            service.add_habit("ghost@example.com", Habit::daily("Read", "")),
            Err(HabitError::UserNotFound(_))
        ));
        assert!(matches!(
            service.mark_complete(EMAIL, "Read", day(2025, 1, 1)),
            Err(HabitError::HabitNotFound(_))
        ));
    }

    #[test]
    fn edit_persists_to_user_and_habit_entity() {
        let service = service_with_habit();
        assert!(service
            .edit_habit(EMAIL, "Exercise", HabitEdit::new().description("Morning workouts"))
            .unwrap());

        let habit = service.habit(EMAIL, "Exercise").unwrap().expect("habit");
        assert_eq!(habit.description, "Morning workouts");

        let stored = service
            .store()
            .load_entity::<Owned<Habit>>(&owned_id(EMAIL, "Exercise"))
            .unwrap()
            .expect("stored habit");
        assert_eq!(stored.value, habit);

        assert!(!service
            .edit_habit(EMAIL, "Missing", HabitEdit::new().description("x"))
            .unwrap());
        assert!(!service.edit_habit(EMAIL, "Exercise", HabitEdit::new()).unwrap());
    }

    #[test]
    fn edit_fields_rejects_unknown_keys() {
        let service = service_with_habit();
        let mut fields = Fields::new();
        fields.insert("name".into(), "Renamed".into());
        assert!(matches!(
            service.edit_habit_fields(EMAIL, "Exercise", &fields),
            Err(HabitError::UnknownField(_))
        ));
    }

    #[test]
    fn mark_complete_creates_then_updates_record() {
        let service = service_with_habit();
        let today = day(2025, 3, 10);
        service
            .mark_complete(EMAIL, "Exercise", today - Duration::days(1))
            .unwrap();
        let record = service.mark_complete(EMAIL, "Exercise", today).unwrap();
        assert_eq!(record.len(), 2);

        service.mark_complete(EMAIL, "Exercise", today).unwrap();
        assert_eq!(
            service
                .store()
                .read_all(EntityKind::HabitRecords)
                .unwrap()
                .len(),
            1
        );

        let stats = service.stats(EMAIL, "Exercise", today).unwrap();
        assert_eq!(
            stats,
            HabitStats {
                longest: 2,
                current: 2,
                total: 2
            }
        );
    }

    #[test]
    fn stats_for_untouched_habit_are_zero() {
        let service = service_with_habit();
        let stats = service.stats(EMAIL, "Exercise", day(2025, 1, 1)).unwrap();
        assert_eq!(stats.longest, 0);
        assert_eq!(stats.current, 0);
        assert_eq!(stats.total, 0);
    }

    #[test]
    fn remove_discards_record_and_reminder() {
        let service = service_with_habit();
        service
            .mark_complete(EMAIL, "Exercise", day(2025, 1, 1))
            .unwrap();
        let at = day(2025, 1, 2).and_hms_opt(9, 0, 0).unwrap();
        service.set_reminder(EMAIL, "Exercise", at).unwrap();
        assert_eq!(service.reminders(EMAIL).unwrap().len(), 1);

        assert!(service.remove_habit(EMAIL, "Exercise").unwrap());
        assert!(service.record(EMAIL, "Exercise").unwrap().is_none());
        assert!(service.reminders(EMAIL).unwrap().is_empty());
        assert!(service.habit(EMAIL, "Exercise").unwrap().is_none());
        assert!(service
            .store()
            .read_all(EntityKind::Habits)
            .unwrap()
            .is_empty());

        assert!(!service.remove_habit(EMAIL, "Exercise").unwrap());
    }

    #[test]
    fn set_reminder_replaces_previous_one() {
        let service = service_with_habit();
        let first = day(2025, 1, 2).and_hms_opt(9, 0, 0).unwrap();
        let second = day(2025, 1, 2).and_hms_opt(18, 30, 0).unwrap();
        service.set_reminder(EMAIL, "Exercise", first).unwrap();
        service.set_reminder(EMAIL, "Exercise", second).unwrap();

        let reminders = service.reminders(EMAIL).unwrap();
        assert_eq!(reminders.len(), 1);
        assert_eq!(reminders[0].remind_at, second);
    }
}
