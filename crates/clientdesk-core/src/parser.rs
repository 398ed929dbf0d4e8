//! Extraction of client fields from pasted free text.
//!
//! Two layouts are recognised. A *labeled* block has at least one `key: value`
//! line and fields are picked by label; a *positional* block is read line by
//! line as name, age, location, work and application.

use crate::{agent_name_from_identity, DeskError, Field, NewAssignment, ISO_DATE_FORMAT, UNKNOWN};
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

const NAME_SEPARATOR: &str = " / ";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParsedClient {
    pub name: String,
    pub age: String,
    pub location: String,
    pub work: String,
    pub application: String,
}

impl ParsedClient {
    /// Dates the record `today` and assigns it to the agent acting under `identity`.
    pub fn into_assignment(self, identity: &str, today: NaiveDate) -> NewAssignment {
        NewAssignment {
            name: self.name,
            age: self.age,
            location: self.location,
            work: self.work,
            application: self.application,
            assigned_agent: agent_name_from_identity(identity),
            date: today.format(ISO_DATE_FORMAT).to_string(),
        }
    }

    fn slot(&mut self, field: Field) -> Option<&mut String> {
        match field {
            Field::Name => Some(&mut self.name),
            Field::Age => Some(&mut self.age),
            Field::Location => Some(&mut self.location),
            Field::Work => Some(&mut self.work),
            Field::Application => Some(&mut self.application),
            Field::AssignedAgent | Field::Date => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockLayout {
    Labeled,
    Positional,
}

pub fn detect_layout(text: &str) -> BlockLayout {
    if content_lines(text).any(|line| line.contains(':')) {
        BlockLayout::Labeled
    } else {
        BlockLayout::Positional
    }
}

/// Parses one pasted client block into validated fields with defaults applied.
pub fn parse_client_text(text: &str) -> Result<ParsedClient, DeskError> {
    let mut parsed = extract_raw_fields(text);

    parsed.name = clean_name(&parsed.name);
    parsed.age = clean_age(&parsed.age);

    if parsed.name.is_empty() {
        return Err(DeskError::MissingRequiredField { field: Field::Name });
    }
    if parsed.age.is_empty() {
        return Err(DeskError::MissingRequiredField { field: Field::Age });
    }

    for value in [
        &mut parsed.location,
        &mut parsed.work,
        &mut parsed.application,
    ] {
        if value.is_empty() {
            *value = UNKNOWN.to_string();
        }
    }

    Ok(parsed)
}

/// Field values exactly as found in the block: trimmed, but without name/age
/// clean-up, validation or defaults. Absent fields are empty.
pub fn extract_raw_fields(text: &str) -> ParsedClient {
    let lines: Vec<&str> = content_lines(text).collect();
    let mut parsed = ParsedClient::default();

    match detect_layout(text) {
        BlockLayout::Labeled => {
            for line in lines {
                let Some((key, value)) = line.split_once(':') else {
                    continue;
                };
                let Some(field) = label_field(key) else {
                    continue;
                };
                if let Some(slot) = parsed.slot(field) {
                    *slot = value.trim().to_string();
                }
            }
        }
        BlockLayout::Positional => {
            let order = [
                Field::Name,
                Field::Age,
                Field::Location,
                Field::Work,
                Field::Application,
            ];
            for (field, line) in order.into_iter().zip(lines) {
                if let Some(slot) = parsed.slot(field) {
                    *slot = line.to_string();
                }
            }
        }
    }

    parsed
}

fn content_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().map(str::trim).filter(|line| !line.is_empty())
}

/// Maps a label to its field by substring, checked in field order, so
/// `Agent` or `Language` count as age labels. When several lines map to the
/// same field the last one wins.
fn label_field(key: &str) -> Option<Field> {
    let key = key.trim().to_lowercase();
    if key.contains("name") {
        Some(Field::Name)
    } else if key.contains("age") {
        Some(Field::Age)
    } else if key.contains("loc") {
        Some(Field::Location)
    } else if key.contains("work") || key.contains("occupation") {
        Some(Field::Work)
    } else if key.contains("app") {
        Some(Field::Application)
    } else {
        None
    }
}

/// `"username / real name"` keeps the real name.
fn clean_name(raw: &str) -> String {
    match raw.split_once(NAME_SEPARATOR) {
        Some((_, real)) => real.trim().to_string(),
        None => raw.trim().to_string(),
    }
}

fn clean_age(raw: &str) -> String {
    static DIGITS: OnceLock<Regex> = OnceLock::new();
    let digits = DIGITS.get_or_init(|| Regex::new(r"[0-9]+").expect("valid regex"));
    match digits.find(raw) {
        Some(found) => found.as_str().to_string(),
        None => raw.trim().to_string(),
    }
}
