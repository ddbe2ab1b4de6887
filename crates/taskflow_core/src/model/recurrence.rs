//! Recurrence rule declarations.
//!
//! A rule is attached to its template task at creation time and is read-only
//! afterwards. Expansion lives in `lifecycle::recurrence`.

use chrono::{NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

/// Step kind of a recurrence rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceKind {
    Daily,
    Weekly,
    Monthly,
    Yearly,
    /// Monday through Friday.
    Weekdays,
}

impl RecurrenceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
            Self::Weekdays => "weekdays",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            "yearly" => Some(Self::Yearly),
            "weekdays" => Some(Self::Weekdays),
            _ => None,
        }
    }
}

/// Declarative repeat definition for a template task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurrenceRule {
    #[serde(rename = "type")]
    pub kind: RecurrenceKind,
    /// Day restriction for `weekly`. `None` means "every 7 days"; an empty
    /// list is a declared-but-empty restriction and is rejected.
    #[serde(default, with = "weekday_labels")]
    pub days_of_week: Option<Vec<Weekday>>,
    /// Inclusive last date. May be absent only when `indefinite` is set.
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub indefinite: bool,
}

impl RecurrenceRule {
    /// Bounded rule ending on `end_date` (inclusive).
    pub fn until(kind: RecurrenceKind, end_date: NaiveDate) -> Self {
        Self {
            kind,
            days_of_week: None,
            end_date: Some(end_date),
            indefinite: false,
        }
    }

    /// Open-ended rule; expansion is still capped per call.
    pub fn indefinite(kind: RecurrenceKind) -> Self {
        Self {
            kind,
            days_of_week: None,
            end_date: None,
            indefinite: true,
        }
    }

    pub fn with_days(mut self, days: Vec<Weekday>) -> Self {
        self.days_of_week = Some(days);
        self
    }
}

/// Resolves a weekday label.
///
/// Accepts Korean single-syllable labels (`월`..`일`, optionally suffixed with
/// `요일`) and English names or three-letter abbreviations, case-insensitive.
pub fn parse_weekday(label: &str) -> Option<Weekday> {
    let trimmed = label.trim();
    let korean = trimmed.strip_suffix("요일").unwrap_or(trimmed);
    match korean {
        "월" => return Some(Weekday::Mon),
        "화" => return Some(Weekday::Tue),
        "수" => return Some(Weekday::Wed),
        "목" => return Some(Weekday::Thu),
        "금" => return Some(Weekday::Fri),
        "토" => return Some(Weekday::Sat),
        "일" => return Some(Weekday::Sun),
        _ => {}
    }
    trimmed.parse::<Weekday>().ok()
}

/// Korean display label for a weekday.
pub fn weekday_label(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "월",
        Weekday::Tue => "화",
        Weekday::Wed => "수",
        Weekday::Thu => "목",
        Weekday::Fri => "금",
        Weekday::Sat => "토",
        Weekday::Sun => "일",
    }
}

mod weekday_labels {
    use super::{parse_weekday, weekday_label};
    use chrono::Weekday;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(days: &Option<Vec<Weekday>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match days {
            Some(days) => serializer.collect_seq(days.iter().map(|day| weekday_label(*day))),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<Weekday>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let labels = Option::<Vec<String>>::deserialize(deserializer)?;
        labels
            .map(|labels| {
                labels
                    .iter()
                    .map(|label| {
                        parse_weekday(label)
                            .ok_or_else(|| D::Error::custom(format!("unknown weekday `{label}`")))
                    })
                    .collect()
            })
            .transpose()
    }
}
