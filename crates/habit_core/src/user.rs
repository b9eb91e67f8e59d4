use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use serde::{Deserialize, Serialize};

use crate::error::{HabitError, Result};
use crate::habit::{Habit, HabitEdit};
use crate::store::{Owned, Store};

/// An account and the habits it tracks.
///
/// The password is only ever held as an argon2 PHC string.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub(crate) email: String,
    password_hash: String,
    #[serde(default)]
    habits: Vec<Habit>,
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("email", &self.email)
            .field("habits", &self.habits)
            .finish_non_exhaustive()
    }
}

impl User {
    pub fn new(email: impl Into<String>, password: &str) -> Result<Self> {
        Ok(Self {
            email: email.into(),
            password_hash: hash_password(password)?,
            habits: Vec::new(),
        })
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn habits(&self) -> &[Habit] {
        &self.habits
    }

    pub fn habit(&self, name: &str) -> Option<&Habit> {
        self.habits.iter().find(|habit| habit.name == name)
    }

    /// Verifies `candidate` against the stored hash. A malformed hash simply
    /// fails verification.
    pub fn check_password(&self, candidate: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(&self.password_hash) else {
            tracing::warn!(email = %self.email, "stored password hash is malformed");
            return false;
        };
        Argon2::default()
            .verify_password(candidate.as_bytes(), &parsed)
            .is_ok()
    }

    pub fn set_password(&mut self, password: &str) -> Result<()> {
        self.password_hash = hash_password(password)?;
        Ok(())
    }

    /// Adds `habit` and persists it as a new entity in `store`.
    pub fn add_habit(&mut self, habit: Habit, store: &impl Store) -> Result<()> {
        if self.habit(&habit.name).is_some() {
            return Err(HabitError::DuplicateHabit(habit.name));
        }
        store.create_entity(&Owned::new(self.email.clone(), habit.clone()))?;
        tracing::debug!(email = %self.email, habit = %habit.name, "habit added");
        self.habits.push(habit);
        Ok(())
    }

    pub fn remove_habit(&mut self, name: &str) -> Option<Habit> {
        let idx = self.habits.iter().position(|habit| habit.name == name)?;
        Some(self.habits.remove(idx))
    }

    /// Applies `edit` to the habit called `name`. Returns `false` when there
    /// is no such habit.
    pub fn edit_habit(&mut self, name: &str, edit: HabitEdit) -> bool {
        match self.habits.iter_mut().find(|habit| habit.name == name) {
            Some(habit) => {
                habit.edit(edit);
                true
            }
            None => false,
        }
    }
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| HabitError::Credential(err.to_string()))?;
    Ok(hash.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::habit::Periodicity;
    use crate::store::{owned_id, EntityKind, MemoryStore};

    fn user() -> User {
        User::new("test@example.com", "securepassword").expect("hash password")
    }

    #[test]
    fn password_is_hashed_and_verified() {
        let user = user();
        assert_eq!(user.email(), "test@example.com");
        assert!(user.check_password("securepassword"));
        assert!(!user.check_password("wrong"));
        assert!(!user.password_hash.contains("securepassword"));
        assert!(user.password_hash.starts_with("$argon2"));
    }

    #[test]
    fn each_hash_gets_a_fresh_salt() {
        let first = user();
        let second = user();
        assert_ne!(first.password_hash, second.password_hash);
        assert!(second.check_password("securepassword"));
    }

    #[test]
    fn malformed_hash_fails_closed() {
        let mut user = user();
        user.password_hash = "not-a-phc-string".into();
        assert!(!user.check_password("securepassword"));
    }

    #[test]
    fn debug_output_omits_hash() {
        let user = user();
        let rendered = format!("{user:?}");
        assert!(rendered.contains("test@example.com"));
        assert!(!rendered.contains("argon2"));
    }

    #[test]
    fn add_habit_persists_once_and_rejects_duplicates() {
        let store = MemoryStore::new();
        let mut user = user();
        user.add_habit(Habit::daily("Exercise", "Daily workouts"), &store)
            .expect("add habit");

        let stored = store.read_all(EntityKind::Habits).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(
            stored[0]["id"],
            owned_id("test@example.com", "Exercise").as_str()
        );

        let err = user
            .add_habit(Habit::daily("Exercise", "Again"), &store)
            .unwrap_err();
        assert!(matches!(err, HabitError::DuplicateHabit(name) if name == "Exercise"));
        assert_eq!(user.habits().len(), 1);
        assert_eq!(store.read_all(EntityKind::Habits).unwrap().len(), 1);
    }

    #[test]
    fn edit_habit_changes_only_named_fields() {
        let store = MemoryStore::new();
        let mut user = user();
        user.add_habit(Habit::daily("Exercise", "Daily workouts"), &store)
            .unwrap();

        assert!(user.edit_habit("Exercise", HabitEdit::new().description("Morning workouts")));
        let edited = user.habit("Exercise").expect("habit exists");
        assert_eq!(edited.description, "Morning workouts");
        assert_eq!(edited.name, "Exercise");
        assert_eq!(edited.periodicity, Periodicity::Daily);

        assert!(!user.edit_habit("Missing", HabitEdit::new().description("x")));
    }

    #[test]
    fn remove_habit_is_silent_when_absent() {
        let store = MemoryStore::new();
        let mut user = user();
        user.add_habit(Habit::daily("Exercise", "Daily workouts"), &store)
            .unwrap();

        assert!(user.remove_habit("Missing").is_none());
        let removed = user.remove_habit("Exercise").expect("removed");
        assert_eq!(removed.name, "Exercise");
        assert!(user.habits().is_empty());
    }
}
