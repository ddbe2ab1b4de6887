//! Recurrence expansion.
//!
//! # Responsibility
//! - Walk a recurrence rule forward from a start date into dated occurrences.
//! - Build per-occurrence task drafts from a template task.
//!
//! # Invariants
//! - Expansion is pure and deterministic: same rule and start, same output.
//! - One call never emits more than `MAX_RECURRENCE_INSTANCES` occurrences,
//!   including for indefinite rules.
//! - `end_date` is inclusive.
//! - Monthly/yearly steps are anchored on the start date and clamp to the
//!   last day of short months.
//! - Invalid rules fail before any occurrence is produced.

use crate::model::recurrence::{RecurrenceKind, RecurrenceRule};
use crate::model::task::{NewTask, Task};
use chrono::{Datelike, Days, Months, NaiveDate, Weekday};
use log::debug;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Hard cap on occurrences emitted by one expansion call.
pub const MAX_RECURRENCE_INSTANCES: usize = 365;

/// One dated occurrence in a recurring series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Occurrence {
    /// 1-based ordinal inside the series.
    pub sequence: u32,
    pub date: NaiveDate,
}

/// Result of one bounded expansion call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Expansion {
    pub occurrences: Vec<Occurrence>,
    /// `true` when the cap stopped the walk before the rule was exhausted.
    /// Re-invoke with `resume_after` to continue.
    pub truncated: bool,
}

impl Expansion {
    pub fn dates(&self) -> Vec<NaiveDate> {
        self.occurrences.iter().map(|occurrence| occurrence.date).collect()
    }

    pub fn last(&self) -> Option<Occurrence> {
        self.occurrences.last().copied()
    }

    pub fn len(&self) -> usize {
        self.occurrences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.occurrences.is_empty()
    }
}

/// Invalid recurrence input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecurrenceError {
    /// `weekly` declared a day restriction with no days in it.
    EmptyDaysOfWeek,
    /// Day restriction on a rule kind that does not support it.
    DaysOfWeekNotSupported(RecurrenceKind),
    /// Bounded rule without `end_date`.
    MissingEndDate,
    EndBeforeStart { start: NaiveDate, end: NaiveDate },
    /// Per-call limit outside `1..=MAX_RECURRENCE_INSTANCES`.
    InvalidLimit(usize),
}

impl Display for RecurrenceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyDaysOfWeek => write!(f, "weekly rule declares an empty daysOfWeek"),
            Self::DaysOfWeekNotSupported(kind) => {
                write!(f, "daysOfWeek is not supported for `{}` rules", kind.as_str())
            }
            Self::MissingEndDate => write!(f, "endDate is required unless indefinite is set"),
            Self::EndBeforeStart { start, end } => {
                write!(f, "endDate {end} is earlier than start {start}")
            }
            Self::InvalidLimit(limit) => write!(
                f,
                "expansion limit must be within 1..={MAX_RECURRENCE_INSTANCES}, got {limit}"
            ),
        }
    }
}

impl Error for RecurrenceError {}

/// Checks a rule against its start date.
pub fn validate_rule(rule: &RecurrenceRule, start: NaiveDate) -> Result<(), RecurrenceError> {
    match (&rule.days_of_week, rule.kind) {
        (Some(days), RecurrenceKind::Weekly) if days.is_empty() => {
            return Err(RecurrenceError::EmptyDaysOfWeek)
        }
        (Some(_), RecurrenceKind::Weekly) | (None, _) => {}
        (Some(_), kind) => return Err(RecurrenceError::DaysOfWeekNotSupported(kind)),
    }

    match rule.end_date {
        None if !rule.indefinite => Err(RecurrenceError::MissingEndDate),
        Some(end) if end < start => Err(RecurrenceError::EndBeforeStart { start, end }),
        _ => Ok(()),
    }
}

/// Expands `rule` from `start` with the default cap.
pub fn expand(rule: &RecurrenceRule, start: NaiveDate) -> Result<Expansion, RecurrenceError> {
    expand_with_limit(rule, start, MAX_RECURRENCE_INSTANCES)
}

/// Expands `rule` from `start`, emitting at most `limit` occurrences.
pub fn expand_with_limit(
    rule: &RecurrenceRule,
    start: NaiveDate,
    limit: usize,
) -> Result<Expansion, RecurrenceError> {
    validate_rule(rule, start)?;
    check_limit(limit)?;
    let walker = Walker::new(rule, start, None);
    Ok(collect(walker, 1, limit, rule))
}

/// Continues a series after its last emitted occurrence.
///
/// `anchor` is the series start date used for the original expansion; it
/// keeps month-end clamping stable across calls.
pub fn resume_after(
    rule: &RecurrenceRule,
    anchor: NaiveDate,
    last: Occurrence,
    limit: usize,
) -> Result<Expansion, RecurrenceError> {
    validate_rule(rule, anchor)?;
    check_limit(limit)?;
    let walker = Walker::new(rule, anchor, Some(last.date));
    Ok(collect(walker, last.sequence.saturating_add(1), limit, rule))
}

/// Title for an occurrence: the first keeps the template title, later ones
/// carry an ordinal suffix such as `주간 보고 (2회차)`.
pub fn occurrence_title(title: &str, sequence: u32, ordinal_suffix: &str) -> String {
    if sequence <= 1 {
        title.to_string()
    } else {
        format!("{title} ({sequence}{ordinal_suffix})")
    }
}

/// Builds the task draft for one occurrence of `template`.
///
/// All content fields are copied. `work_date` moves to the occurrence date and
/// `due_date` keeps its offset from `work_date`.
pub fn instance_draft(template: &Task, occurrence: Occurrence, ordinal_suffix: &str) -> NewTask {
    let mut draft = NewTask::from_template(template);
    draft.title = occurrence_title(&template.title, occurrence.sequence, ordinal_suffix);
    draft.work_date = Some(occurrence.date);
    draft.due_date = match (template.work_date, template.due_date) {
        (Some(work), Some(due)) => occurrence
            .date
            .checked_add_signed(due - work)
            .or(Some(occurrence.date)),
        _ => Some(occurrence.date),
    };
    draft.recurring_parent_id = Some(template.id);
    draft.recurring_sequence = Some(occurrence.sequence);
    draft
}

fn check_limit(limit: usize) -> Result<(), RecurrenceError> {
    if limit == 0 || limit > MAX_RECURRENCE_INSTANCES {
        return Err(RecurrenceError::InvalidLimit(limit));
    }
    Ok(())
}

fn collect(mut walker: Walker, first_sequence: u32, limit: usize, rule: &RecurrenceRule) -> Expansion {
    let mut expansion = Expansion::default();
    let mut sequence = first_sequence;

    while expansion.occurrences.len() < limit {
        match walker.next_date() {
            Some(date) if within_end(rule, date) => {
                expansion.occurrences.push(Occurrence { sequence, date });
                sequence = sequence.saturating_add(1);
            }
            _ => return finish(expansion, rule),
        }
    }

    expansion.truncated = matches!(walker.next_date(), Some(date) if within_end(rule, date));
    finish(expansion, rule)
}

fn finish(expansion: Expansion, rule: &RecurrenceRule) -> Expansion {
    debug!(
        "event=recurrence_expand module=recurrence status=ok kind={} emitted={} truncated={}",
        rule.kind.as_str(),
        expansion.occurrences.len(),
        expansion.truncated
    );
    expansion
}

fn within_end(rule: &RecurrenceRule, date: NaiveDate) -> bool {
    rule.end_date.map_or(true, |end| date <= end)
}

/// Lazy date walker over one rule.
enum Walker {
    /// Fixed step from an anchor: `anchor + index * step`.
    Stepped {
        kind: RecurrenceKind,
        anchor: NaiveDate,
        index: u32,
    },
    /// Day-by-day scan keeping only matching weekdays.
    Filtered {
        cursor: Option<NaiveDate>,
        days: [bool; 7],
    },
}

impl Walker {
    fn new(rule: &RecurrenceRule, anchor: NaiveDate, after: Option<NaiveDate>) -> Self {
        let filter = match (rule.kind, &rule.days_of_week) {
            (RecurrenceKind::Weekdays, _) => Some(weekday_mask(&[
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ])),
            (RecurrenceKind::Weekly, Some(days)) => Some(weekday_mask(days)),
            _ => None,
        };

        match filter {
            Some(days) => Walker::Filtered {
                cursor: match after {
                    Some(after) => after.succ_opt(),
                    None => Some(anchor),
                },
                days,
            },
            None => {
                let mut walker = Walker::Stepped {
                    kind: rule.kind,
                    anchor,
                    index: after.map_or(0, |after| estimate_index(rule.kind, anchor, after)),
                };
                if let Some(after) = after {
                    walker.skip_through(after);
                }
                walker
            }
        }
    }

    fn next_date(&mut self) -> Option<NaiveDate> {
        match self {
            Walker::Stepped { kind, anchor, index } => {
                let date = step_date(*kind, *anchor, *index)?;
                *index = index.checked_add(1)?;
                Some(date)
            }
            Walker::Filtered { cursor, days } => loop {
                let date = (*cursor)?;
                *cursor = date.succ_opt();
                if days[date.weekday().num_days_from_monday() as usize] {
                    return Some(date);
                }
            },
        }
    }

    /// Advances a stepped walker past every date `<= after`.
    fn skip_through(&mut self, after: NaiveDate) {
        if let Walker::Stepped { kind, anchor, index } = self {
            while let Some(date) = step_date(*kind, *anchor, *index) {
                if date > after {
                    break;
                }
                *index += 1;
            }
        }
    }
}

fn step_date(kind: RecurrenceKind, anchor: NaiveDate, index: u32) -> Option<NaiveDate> {
    match kind {
        RecurrenceKind::Daily => anchor.checked_add_days(Days::new(u64::from(index))),
        RecurrenceKind::Weekly => anchor.checked_add_days(Days::new(u64::from(index) * 7)),
        RecurrenceKind::Monthly => anchor.checked_add_months(Months::new(index)),
        RecurrenceKind::Yearly => anchor.checked_add_months(Months::new(index.checked_mul(12)?)),
        // Weekdays always walks through `Walker::Filtered`.
        RecurrenceKind::Weekdays => None,
    }
}

/// Lower-bound index whose step date is close to `after`.
fn estimate_index(kind: RecurrenceKind, anchor: NaiveDate, after: NaiveDate) -> u32 {
    let days = (after - anchor).num_days().max(0);
    let months = (i64::from(after.year()) - i64::from(anchor.year())) * 12
        + i64::from(after.month())
        - i64::from(anchor.month());
    let estimate = match kind {
        RecurrenceKind::Daily => days,
        RecurrenceKind::Weekly => days / 7,
        // Step dates can clamp below the naive month diff, so back off by one.
        RecurrenceKind::Monthly => months - 1,
        RecurrenceKind::Yearly => months / 12 - 1,
        RecurrenceKind::Weekdays => 0,
    };
    u32::try_from(estimate.max(0)).unwrap_or(u32::MAX)
}

fn weekday_mask(days: &[Weekday]) -> [bool; 7] {
    let mut mask = [false; 7];
    for day in days {
        mask[day.num_days_from_monday() as usize] = true;
    }
    mask
}
