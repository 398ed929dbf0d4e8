use crate::{ClientAssignment, DeskError, Field};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

const MONTH_CODES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// One categorical filter dimension.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Facet {
    #[default]
    Any,
    Exactly(String),
}

impl Facet {
    /// A missing or blank query parameter filters nothing.
    pub fn from_param(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(value) if !value.is_empty() => Facet::Exactly(value.to_string()),
            _ => Facet::Any,
        }
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            Facet::Any => true,
            Facet::Exactly(expected) => {
                expected.trim().to_lowercase() == value.trim().to_lowercase()
            }
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Facet::Any)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MonthFilter {
    #[default]
    Any,
    Current,
    Previous,
    /// Calendar month `1..=12`, any year.
    Month(u32),
}

impl MonthFilter {
    pub fn from_param(value: Option<&str>) -> Result<Self, DeskError> {
        match value.map(str::trim) {
            Some(value) if !value.is_empty() => value.parse(),
            _ => Ok(MonthFilter::Any),
        }
    }

    /// Undated or unparseable records never match an active month filter.
    pub fn matches(&self, date: Option<NaiveDate>, today: NaiveDate) -> bool {
        if *self == MonthFilter::Any {
            return true;
        }
        let Some(date) = date else {
            return false;
        };
        let month_of = (date.year(), date.month());
        match self {
            MonthFilter::Any => true,
            MonthFilter::Current => month_of == (today.year(), today.month()),
            MonthFilter::Previous => month_of == previous_month(today),
            MonthFilter::Month(month) => date.month() == *month,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            MonthFilter::Any => "any",
            MonthFilter::Current => "current",
            MonthFilter::Previous => "previous",
            MonthFilter::Month(month) => MONTH_CODES
                .get((*month as usize).wrapping_sub(1))
                .copied()
                .unwrap_or("any"),
        }
    }
}

impl fmt::Display for MonthFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for MonthFilter {
    type Err = DeskError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "current" => Ok(MonthFilter::Current),
            "previous" => Ok(MonthFilter::Previous),
            other => MONTH_CODES
                .iter()
                .position(|code| *code == other)
                .map(|idx| MonthFilter::Month(idx as u32 + 1))
                .ok_or_else(|| DeskError::InvalidFilter(format!("unknown month: {other}"))),
        }
    }
}

/// Month-and-year before `today`, wrapping January back to December.
pub fn previous_month(today: NaiveDate) -> (i32, u32) {
    if today.month() == 1 {
        (today.year() - 1, 12)
    } else {
        (today.year(), today.month() - 1)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssignmentFilters {
    #[serde(default)]
    pub search: String,
    #[serde(default)]
    pub location: Facet,
    #[serde(default)]
    pub application: Facet,
    #[serde(default)]
    pub agent: Facet,
    #[serde(default)]
    pub month: MonthFilter,
}

impl AssignmentFilters {
    pub fn is_unfiltered(&self) -> bool {
        self.search.trim().is_empty()
            && self.location.is_any()
            && self.application.is_any()
            && self.agent.is_any()
            && self.month == MonthFilter::Any
    }

    pub fn matches(&self, record: &ClientAssignment, today: NaiveDate) -> bool {
        let query = self.search.trim().to_lowercase();
        if !query.is_empty() && !matches_search(record, &query) {
            return false;
        }
        self.location.matches(&record.location)
            && self.application.matches(&record.application)
            && self.agent.matches(&record.assigned_agent)
            && self.month.matches(record.parsed_date(), today)
    }
}

fn matches_search(record: &ClientAssignment, query: &str) -> bool {
    [
        &record.name,
        &record.location,
        &record.work,
        &record.application,
        &record.assigned_agent,
    ]
    .iter()
    .any(|value| value.to_lowercase().contains(query))
}

/// Positions of the matching records, in input order.
pub fn filter_indices(
    records: &[ClientAssignment],
    filters: &AssignmentFilters,
    today: NaiveDate,
) -> Vec<usize> {
    records
        .iter()
        .enumerate()
        .filter(|(_, record)| filters.matches(record, today))
        .map(|(idx, _)| idx)
        .collect()
}

pub fn apply_filters(
    records: &[ClientAssignment],
    filters: &AssignmentFilters,
    today: NaiveDate,
) -> Vec<ClientAssignment> {
    records
        .iter()
        .filter(|record| filters.matches(record, today))
        .cloned()
        .collect()
}

/// Sorted option list for a filter dropdown; values differing only in case
/// collapse to their first spelling.
pub fn distinct_values(records: &[ClientAssignment], field: Field) -> Vec<String> {
    let mut seen: BTreeMap<String, String> = BTreeMap::new();
    for record in records {
        let value = record.field(field).trim();
        if value.is_empty() {
            continue;
        }
        seen.entry(value.to_lowercase())
            .or_insert_with(|| value.to_string());
    }
    seen.into_values().collect()
}
