//! Field-level patch vocabulary.
//!
//! # Responsibility
//! - Name every client-editable task field once, with its storage and wire
//!   spellings.
//! - Normalize and type-check patch values before they are queued.
//!
//! # Invariants
//! - `column_name()` is snake_case, `wire_name()` is camelCase.
//! - A `FieldMap` holds at most one value per field; later inserts win.

use crate::model::task::{TaskPriority, TaskStatus, MAX_PROGRESS};
use chrono::NaiveDate;
use serde_json::{Map, Value};
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Client-editable task fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskField {
    Title,
    Description,
    Category,
    Status,
    Progress,
    Priority,
    AssignedTo,
    FollowUpAssignee,
    FollowUpMemo,
    WorkDate,
    DueDate,
}

impl TaskField {
    pub const ALL: [TaskField; 11] = [
        TaskField::Title,
        TaskField::Description,
        TaskField::Category,
        TaskField::Status,
        TaskField::Progress,
        TaskField::Priority,
        TaskField::AssignedTo,
        TaskField::FollowUpAssignee,
        TaskField::FollowUpMemo,
        TaskField::WorkDate,
        TaskField::DueDate,
    ];

    pub fn column_name(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Description => "description",
            Self::Category => "category",
            Self::Status => "status",
            Self::Progress => "progress",
            Self::Priority => "priority",
            Self::AssignedTo => "assigned_to",
            Self::FollowUpAssignee => "follow_up_assignee",
            Self::FollowUpMemo => "follow_up_memo",
            Self::WorkDate => "work_date",
            Self::DueDate => "due_date",
        }
    }

    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Description => "description",
            Self::Category => "category",
            Self::Status => "status",
            Self::Progress => "progress",
            Self::Priority => "priority",
            Self::AssignedTo => "assignedTo",
            Self::FollowUpAssignee => "followUpAssignee",
            Self::FollowUpMemo => "followUpMemo",
            Self::WorkDate => "workDate",
            Self::DueDate => "dueDate",
        }
    }

    /// Resolves either spelling (`followUpAssignee` or `follow_up_assignee`).
    pub fn parse(name: &str) -> Option<Self> {
        let trimmed = name.trim();
        Self::ALL
            .into_iter()
            .find(|field| field.wire_name() == trimmed || field.column_name() == trimmed)
    }

    pub fn is_nullable(self) -> bool {
        matches!(
            self,
            Self::Description
                | Self::Category
                | Self::FollowUpAssignee
                | Self::FollowUpMemo
                | Self::WorkDate
                | Self::DueDate
        )
    }

    /// Normalizes `value` for this field or rejects it.
    ///
    /// Text is trimmed; blank optional text becomes `Null`; status, priority
    /// and dates are accepted in their string spellings.
    pub fn check(self, value: FieldValue) -> Result<FieldValue, FieldError> {
        if value == FieldValue::Null {
            return if self.is_nullable() {
                Ok(FieldValue::Null)
            } else {
                Err(FieldError::NotNullable(self))
            };
        }

        match self {
            Self::Title | Self::AssignedTo => match value {
                FieldValue::Text(text) if !text.trim().is_empty() => {
                    Ok(FieldValue::Text(text.trim().to_string()))
                }
                FieldValue::Text(_) => Err(FieldError::Blank(self)),
                _ => Err(FieldError::invalid(self, "text")),
            },
            Self::Description => match value {
                FieldValue::Text(text) => Ok(FieldValue::Text(text)),
                _ => Err(FieldError::invalid(self, "text")),
            },
            Self::Category | Self::FollowUpAssignee | Self::FollowUpMemo => match value {
                FieldValue::Text(text) if text.trim().is_empty() => Ok(FieldValue::Null),
                FieldValue::Text(text) => Ok(FieldValue::Text(text.trim().to_string())),
                _ => Err(FieldError::invalid(self, "text")),
            },
            Self::Status => match value {
                FieldValue::Status(status) => Ok(FieldValue::Status(status)),
                FieldValue::Text(text) => TaskStatus::parse(&text)
                    .map(FieldValue::Status)
                    .ok_or_else(|| FieldError::invalid(self, "status name")),
                _ => Err(FieldError::invalid(self, "status name")),
            },
            Self::Priority => match value {
                FieldValue::Priority(priority) => Ok(FieldValue::Priority(priority)),
                FieldValue::Text(text) => TaskPriority::parse(&text)
                    .map(FieldValue::Priority)
                    .ok_or_else(|| FieldError::invalid(self, "priority name")),
                _ => Err(FieldError::invalid(self, "priority name")),
            },
            Self::Progress => match value {
                FieldValue::Integer(progress)
                    if (0..=i64::from(MAX_PROGRESS)).contains(&progress) =>
                {
                    Ok(FieldValue::Integer(progress))
                }
                FieldValue::Integer(progress) => Err(FieldError::ProgressOutOfRange(progress)),
                _ => Err(FieldError::invalid(self, "integer")),
            },
            Self::WorkDate | Self::DueDate => match value {
                FieldValue::Date(date) => Ok(FieldValue::Date(date)),
                FieldValue::Text(text) => NaiveDate::parse_from_str(text.trim(), DATE_FORMAT)
                    .map(FieldValue::Date)
                    .map_err(|_| FieldError::invalid(self, "YYYY-MM-DD date")),
                _ => Err(FieldError::invalid(self, "YYYY-MM-DD date")),
            },
        }
    }
}

impl Display for TaskField {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Untyped patch value as received from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Date(NaiveDate),
    Status(TaskStatus),
    Priority(TaskPriority),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn as_optional_text(&self) -> Option<Option<String>> {
        match self {
            Self::Null => Some(None),
            Self::Text(text) => Some(Some(text.clone())),
            _ => None,
        }
    }

    pub fn as_status(&self) -> Option<TaskStatus> {
        match self {
            Self::Status(status) => Some(*status),
            _ => None,
        }
    }

    pub fn as_priority(&self) -> Option<TaskPriority> {
        match self {
            Self::Priority(priority) => Some(*priority),
            _ => None,
        }
    }

    pub fn as_progress(&self) -> Option<u8> {
        match self {
            Self::Integer(value) => u8::try_from(*value)
                .ok()
                .filter(|progress| *progress <= MAX_PROGRESS),
            _ => None,
        }
    }

    pub fn as_optional_date(&self) -> Option<Option<NaiveDate>> {
        match self {
            Self::Null => Some(None),
            Self::Date(date) => Some(Some(*date)),
            _ => None,
        }
    }

    /// Converts a raw JSON value for `field`, then normalizes it.
    pub fn from_json(field: TaskField, value: &Value) -> Result<Self, FieldError> {
        let raw = match value {
            Value::Null => Self::Null,
            Value::String(text) => Self::Text(text.clone()),
            Value::Number(number) => match number.as_i64() {
                Some(integer) => Self::Integer(integer),
                None => return Err(FieldError::invalid(field, "integer")),
            },
            Value::Bool(_) | Value::Array(_) | Value::Object(_) => {
                return Err(FieldError::invalid(field, "scalar"))
            }
        };
        field.check(raw)
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Text(text) => Value::String(text.clone()),
            Self::Integer(value) => Value::from(*value),
            Self::Date(date) => Value::String(date.format(DATE_FORMAT).to_string()),
            Self::Status(status) => Value::String(status.as_str().to_string()),
            Self::Priority(priority) => Value::String(priority.as_str().to_string()),
        }
    }
}

/// Ordered field patch with last-write-wins inserts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    entries: BTreeMap<TaskField, FieldValue>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets one field, returning the replaced value.
    pub fn insert(&mut self, field: TaskField, value: FieldValue) -> Option<FieldValue> {
        self.entries.insert(field, value)
    }

    /// Builder-style `insert`.
    pub fn with(mut self, field: TaskField, value: FieldValue) -> Self {
        self.entries.insert(field, value);
        self
    }

    /// Merges `other` into `self`; values from `other` win per field.
    pub fn merge(&mut self, other: FieldMap) {
        self.entries.extend(other.entries);
    }

    pub fn get(&self, field: TaskField) -> Option<&FieldValue> {
        self.entries.get(&field)
    }

    pub fn contains(&self, field: TaskField) -> bool {
        self.entries.contains_key(&field)
    }

    pub fn remove(&mut self, field: TaskField) -> Option<FieldValue> {
        self.entries.remove(&field)
    }

    pub fn retain(&mut self, keep: impl FnMut(&TaskField, &mut FieldValue) -> bool) {
        self.entries.retain(keep);
    }

    pub fn iter(&self) -> btree_map::Iter<'_, TaskField, FieldValue> {
        self.entries.iter()
    }

    pub fn fields(&self) -> Vec<TaskField> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Renders the camelCase JSON body used by `PATCH /api/tasks/{id}`.
    pub fn to_wire_json(&self) -> Value {
        let mut object = Map::new();
        for (field, value) in &self.entries {
            object.insert(field.wire_name().to_string(), value.to_json());
        }
        Value::Object(object)
    }

    /// Parses a JSON object keyed by wire or column names.
    pub fn from_wire_json(value: &Value) -> Result<Self, FieldError> {
        let Value::Object(object) = value else {
            return Err(FieldError::NotAnObject);
        };
        let mut fields = Self::new();
        for (name, raw) in object {
            let field =
                TaskField::parse(name).ok_or_else(|| FieldError::UnknownField(name.clone()))?;
            fields.insert(field, FieldValue::from_json(field, raw)?);
        }
        Ok(fields)
    }
}

impl<'a> IntoIterator for &'a FieldMap {
    type Item = (&'a TaskField, &'a FieldValue);
    type IntoIter = btree_map::Iter<'a, TaskField, FieldValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Rejected field/value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    UnknownField(String),
    NotAnObject,
    NotNullable(TaskField),
    Blank(TaskField),
    ProgressOutOfRange(i64),
    InvalidValue {
        field: TaskField,
        expected: &'static str,
    },
}

impl FieldError {
    fn invalid(field: TaskField, expected: &'static str) -> Self {
        Self::InvalidValue { field, expected }
    }

    /// Field the error refers to, when known.
    pub fn field(&self) -> Option<TaskField> {
        match self {
            Self::NotNullable(field) | Self::Blank(field) => Some(*field),
            Self::InvalidValue { field, .. } => Some(*field),
            Self::ProgressOutOfRange(_) => Some(TaskField::Progress),
            Self::UnknownField(_) | Self::NotAnObject => None,
        }
    }
}

impl Display for FieldError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownField(name) => write!(f, "unknown task field `{name}`"),
            Self::NotAnObject => write!(f, "field patch must be a JSON object"),
            Self::NotNullable(field) => write!(f, "field `{field}` cannot be null"),
            Self::Blank(field) => write!(f, "field `{field}` must not be blank"),
            Self::ProgressOutOfRange(value) => {
                write!(f, "progress must be within 0..=100, got {value}")
            }
            Self::InvalidValue { field, expected } => {
                write!(f, "field `{field}` expects {expected}")
            }
        }
    }
}

impl Error for FieldError {}
