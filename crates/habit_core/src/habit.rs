use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{HabitError, Result};
use crate::store::Fields;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Habit {
    pub name: String,
    pub description: String,
    pub periodicity: Periodicity,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Periodicity {
    #[default]
    Daily,
}

impl Periodicity {
    pub fn as_str(self) -> &'static str {
        match self {
            Periodicity::Daily => "Daily",
        }
    }
}

impl fmt::Display for Periodicity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Periodicity {
    type Err = HabitError;

    fn from_str(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("daily") {
            Ok(Periodicity::Daily)
        } else {
            Err(HabitError::InvalidPeriodicity(trimmed.to_string()))
        }
    }
}

/// Partial update for a [`Habit`]. Fields left as `None` are untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HabitEdit {
    pub description: Option<String>,
    pub periodicity: Option<Periodicity>,
}

impl HabitEdit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn periodicity(mut self, periodicity: Periodicity) -> Self {
        self.periodicity = Some(periodicity);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.description.is_none() && self.periodicity.is_none()
    }

    /// Builds an edit from loosely typed name/value pairs, e.g. a JSON body.
    ///
    /// Only `description` and `periodicity` are editable; renaming goes
    /// through remove + add so record ids stay stable.
    pub fn from_fields(fields: &Fields) -> Result<Self> {
        let mut edit = Self::default();
        for (key, value) in fields {
            match key.as_str() {
                "description" => {
                    let text = value.as_str().ok_or_else(|| invalid_field(key, value))?;
                    edit.description = Some(text.to_string());
                }
                "periodicity" => {
                    let tag = value.as_str().ok_or_else(|| invalid_field(key, value))?;
                    edit.periodicity = Some(tag.parse()?);
                }
                _ => return Err(HabitError::UnknownField(key.clone())),
            }
        }
        Ok(edit)
    }
}

fn invalid_field(field: &str, value: &Value) -> HabitError {
    HabitError::InvalidField {
        field: field.to_string(),
        reason: format!("expected a string, found {value}"),
    }
}

impl Habit {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        periodicity: Periodicity,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            periodicity,
        }
    }

    pub fn daily(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, description, Periodicity::Daily)
    }

    pub fn edit(&mut self, edit: HabitEdit) {
        if let Some(description) = edit.description {
            self.description = description;
        }
        if let Some(periodicity) = edit.periodicity {
            self.periodicity = periodicity;
        }
    }
}
