use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use habit_core::{
    date, CancellationToken, HabitService, JsonFileStore, LogSink, Reminder, ReminderOutcome,
    ReminderSink, Store, User,
};
use tracing::{debug, info, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    pub(crate) store_path: PathBuf,
    pub(crate) user: Option<String>,
    pub(crate) poll_interval: Duration,
    pub(crate) wait_reminders: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source. Values
    /// that fail to parse fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(path) = lookup("HABIT_STORE_PATH") {
            if !path.trim().is_empty() {
                config.store_path = PathBuf::from(path.trim());
            }
        }
        if let Some(user) = lookup("HABIT_USER") {
            let user = user.trim();
            if !user.is_empty() {
                config.user = Some(user.to_string());
            }
        }
        if let Some(interval) = lookup("HABIT_POLL_INTERVAL_MS") {
            match interval.trim().parse::<u64>() {
                Ok(value) if value > 0 => config.poll_interval = Duration::from_millis(value),
                _ => warn!(value = %interval, "ignoring invalid HABIT_POLL_INTERVAL_MS"),
            }
        }
        if let Some(flag) = lookup("HABIT_WAIT_REMINDERS") {
            config.wait_reminders = !matches!(
                flag.trim().to_ascii_lowercase().as_str(),
                "0" | "false" | "no" | "off"
            );
        }
        Ok(config)
    }

    pub fn store_path(&self) -> &PathBuf {
        &self.store_path
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("habits.json"),
            user: None,
            poll_interval: Duration::from_secs(1),
            wait_reminders: true,
        }
    }
}

/// One line of the streak report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportLine {
    pub email: String,
    pub habit: String,
    pub longest: u32,
    pub current: u32,
    pub total: usize,
}

impl std::fmt::Display for ReportLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} / {}: current {} day(s), longest {} day(s), {} completion(s)",
            self.email, self.habit, self.current, self.longest, self.total
        )
    }
}

pub fn run(config: AppConfig) -> Result<()> {
    let store = JsonFileStore::open(&config.store_path)
        .with_context(|| format!("opening store at {}", config.store_path.display()))?;
    info!(path = %store.path().display(), "habit store ready");
    let service = HabitService::new(store);

    let today = date::today();
    for line in build_report(&service, &config, today)? {
        info!(email = %line.email, habit = %line.habit, "{line}");
        println!("{line}");
    }

    if !config.wait_reminders {
        return Ok(());
    }
    let pending = pending_reminders(&service, &config, date::now())?;
    if pending.is_empty() {
        debug!("no pending reminders");
        return Ok(());
    }

    let token = CancellationToken::new();
    watch_stdin(token.clone());
    println!(
        "Waiting on {} reminder(s); press Enter to cancel.",
        pending.len()
    );
    let outcomes = wait_all(pending, &token, Arc::new(LogSink));
    let fired = outcomes
        .iter()
        .filter(|outcome| **outcome == ReminderOutcome::Fired)
        .count();
    info!(fired, cancelled = outcomes.len() - fired, "reminders finished");
    Ok(())
}

pub fn build_report<S: Store>(
    service: &HabitService<S>,
    config: &AppConfig,
    today: NaiveDate,
) -> Result<Vec<ReportLine>> {
    let mut lines = Vec::new();
    for user in selected_users(service, config)? {
        for habit in user.habits() {
            let stats = service.stats(user.email(), &habit.name, today)?;
            lines.push(ReportLine {
                email: user.email().to_string(),
                habit: habit.name.clone(),
                longest: stats.longest,
                current: stats.current,
                total: stats.total,
            });
        }
    }
    Ok(lines)
}

/// Reminders that have not yet passed, tuned to the configured poll
/// interval.
pub fn pending_reminders<S: Store>(
    service: &HabitService<S>,
    config: &AppConfig,
    now: NaiveDateTime,
) -> Result<Vec<Reminder>> {
    let mut pending = Vec::new();
    for user in selected_users(service, config)? {
        for reminder in service.reminders(user.email())? {
            if reminder.remind_at < now {
                debug!(habit = %reminder.habit_name, at = %reminder.remind_at, "skipping stale reminder");
                continue;
            }
            pending.push(reminder.with_poll_interval(config.poll_interval));
        }
    }
    pending.sort_by_key(|reminder| reminder.remind_at);
    Ok(pending)
}

pub fn wait_all(
    reminders: Vec<Reminder>,
    token: &CancellationToken,
    sink: Arc<dyn ReminderSink>,
) -> Vec<ReminderOutcome> {
    let handles: Vec<_> = reminders
        .into_iter()
        .map(|reminder| reminder.spawn(token.clone(), Arc::clone(&sink)))
        .collect();
    handles
        .into_iter()
        .map(|handle| match handle.join() {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("reminder thread panicked");
                ReminderOutcome::Cancelled
            }
        })
        .collect()
}

fn selected_users<S: Store>(
    service: &HabitService<S>,
    config: &AppConfig,
) -> Result<Vec<User>> {
    let users: Vec<User> = match &config.user {
        Some(email) => service.user(email)?.into_iter().collect(),
        None => service.users()?,
    };
    Ok(users)
}

fn watch_stdin(token: CancellationToken) {
    thread::spawn(move || {
        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(0) => debug!("stdin closed; reminders can only finish by firing"),
            Ok(_) => token.cancel(),
            Err(err) => warn!(%err, "unable to read stdin"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use habit_core::{Habit, MemoryStore};
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    fn seeded_service() -> HabitService<MemoryStore> {
        let service = HabitService::new(MemoryStore::new());
        for email in ["a@example.com", "b@example.com"] {
            service.register_user(email, "pw").unwrap();
            service
                .add_habit(email, Habit::daily("Exercise", "Daily workouts"))
                .unwrap();
        }
        service
    }

    #[test]
    fn config_defaults_without_env() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.store_path(), &PathBuf::from("habits.json"));
    }

    #[test]
    fn config_reads_overrides_and_ignores_garbage() {
        let config = AppConfig::from_lookup(lookup(&[
            ("HABIT_STORE_PATH", "/tmp/h.json"),
            ("HABIT_USER", " a@example.com "),
            ("HABIT_POLL_INTERVAL_MS", "250"),
            ("HABIT_WAIT_REMINDERS", "off"),
        ]))
        .unwrap();
        assert_eq!(config.store_path, PathBuf::from("/tmp/h.json"));
        assert_eq!(config.user.as_deref(), Some("a@example.com"));
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert!(!config.wait_reminders);

        let fallback =
            AppConfig::from_lookup(lookup(&[("HABIT_POLL_INTERVAL_MS", "0")])).unwrap();
        assert_eq!(fallback.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn report_covers_selected_users() {
        let service = seeded_service();
        let today = date::ymd(2025, 5, 2).unwrap();
        service
            .mark_complete("a@example.com", "Exercise", today)
            .unwrap();

        let all = build_report(&service, &AppConfig::default(), today).unwrap();
        assert_eq!(all.len(), 2);

        let config = AppConfig {
            user: Some("a@example.com".into()),
            ..AppConfig::default()
        };
        let only_a = build_report(&service, &config, today).unwrap();
        assert_eq!(
            only_a,
            vec![ReportLine {
                email: "a@example.com".into(),
                habit: "Exercise".into(),
                longest: 1,
                current: 1,
                total: 1,
            }]
        );
        assert!(only_a[0].to_string().contains("current 1 day(s)"));
    }

    #[test]
    fn pending_reminders_skip_stale_entries() {
        let service = seeded_service();
        let now = date::parse_date_time("2025-05-02 12:00").unwrap();
        service
            .set_reminder(
                "a@example.com",
                "Exercise",
                date::parse_date_time("2025-05-02 09:00").unwrap(),
            )
            .unwrap();
        service
            .set_reminder(
                "b@example.com",
                "Exercise",
                date::parse_date_time("2025-05-02 18:00").unwrap(),
            )
            .unwrap();

        let config = AppConfig {
            poll_interval: Duration::from_millis(5),
            ..AppConfig::default()
        };
        let pending = pending_reminders(&service, &config, now).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].poll_interval(), Duration::from_millis(5));
    }

    #[test]
    fn wait_all_fires_due_reminders() {
        let due = Reminder::new("Exercise", date::now() - chrono::Duration::minutes(1));
        let outcomes = wait_all(vec![due], &CancellationToken::new(), Arc::new(LogSink));
        assert_eq!(outcomes, vec![ReminderOutcome::Fired]);
    }
}
