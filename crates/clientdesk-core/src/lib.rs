use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod board;
pub mod edit;
mod error;
pub mod filter;
pub mod menu;
pub mod parser;
pub mod session;
pub mod settings;

pub use error::DeskError;
pub use session::{Capabilities, Session, SessionTable};

/// Placeholder stored for optional client fields that were not provided.
pub const UNKNOWN: &str = "Unknown";

pub const ISO_DATE_FORMAT: &str = "%Y-%m-%d";

/// Collection holding assignment records in the document store, and the
/// fallback-store key holding the same records when no session exists.
pub const ASSIGNMENTS_COLLECTION: &str = "clientAssignments";
pub const CLIENTS_COLLECTION: &str = "clients";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClientAssignment {
    pub id: String,
    pub name: String,
    pub age: String,
    #[serde(default = "unknown")]
    pub location: String,
    #[serde(default = "unknown")]
    pub work: String,
    #[serde(default = "unknown")]
    pub application: String,
    #[serde(default = "unknown")]
    pub assigned_agent: String,
    #[serde(default)]
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl ClientAssignment {
    pub fn from_new(id: impl Into<String>, draft: NewAssignment) -> Self {
        Self {
            id: id.into(),
            name: draft.name,
            age: draft.age,
            location: draft.location,
            work: draft.work,
            application: draft.application,
            assigned_agent: draft.assigned_agent,
            date: draft.date,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn field(&self, field: Field) -> &str {
        match field {
            Field::Name => &self.name,
            Field::Age => &self.age,
            Field::Location => &self.location,
            Field::Work => &self.work,
            Field::Application => &self.application,
            Field::AssignedAgent => &self.assigned_agent,
            Field::Date => &self.date,
        }
    }

    pub fn set_field(&mut self, field: Field, value: String) {
        let slot = match field {
            Field::Name => &mut self.name,
            Field::Age => &mut self.age,
            Field::Location => &mut self.location,
            Field::Work => &mut self.work,
            Field::Application => &mut self.application,
            Field::AssignedAgent => &mut self.assigned_agent,
            Field::Date => &mut self.date,
        };
        *slot = value;
    }

    pub fn parsed_date(&self) -> Option<NaiveDate> {
        parse_iso_date(&self.date)
    }
}

/// A record that has not been stored yet.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewAssignment {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub age: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub work: String,
    #[serde(default)]
    pub application: String,
    #[serde(default)]
    pub assigned_agent: String,
    #[serde(default)]
    pub date: String,
}

impl NewAssignment {
    /// Trims every field, enforces the name/age invariant, fills `Unknown`
    /// defaults and dates the record `today` when no date was given.
    pub fn normalize(mut self, today: NaiveDate) -> Result<Self, DeskError> {
        self.name = validate_field_value(Field::Name, &self.name)?;
        self.age = validate_field_value(Field::Age, &self.age)?;
        self.location = validate_field_value(Field::Location, &self.location)?;
        self.work = validate_field_value(Field::Work, &self.work)?;
        self.application = validate_field_value(Field::Application, &self.application)?;
        self.assigned_agent = validate_field_value(Field::AssignedAgent, &self.assigned_agent)?;
        self.date = if self.date.trim().is_empty() {
            today.format(ISO_DATE_FORMAT).to_string()
        } else {
            validate_field_value(Field::Date, &self.date)?
        };
        Ok(self)
    }
}

/// Editable columns of an assignment. `id` and the store timestamps have no
/// variant and so can never be edited.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    Name,
    Age,
    Location,
    Work,
    Application,
    AssignedAgent,
    Date,
}

impl Field {
    pub const ALL: [Field; 7] = [
        Field::Name,
        Field::Age,
        Field::Location,
        Field::Work,
        Field::Application,
        Field::AssignedAgent,
        Field::Date,
    ];

    /// Document key used by the store and the JSON wire format.
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::Age => "age",
            Field::Location => "location",
            Field::Work => "work",
            Field::Application => "application",
            Field::AssignedAgent => "assignedAgent",
            Field::Date => "date",
        }
    }

    pub fn is_required(&self) -> bool {
        matches!(self, Field::Name | Field::Age)
    }

    /// Fields edited by picking from a fixed set of options rather than typing.
    pub fn is_enumerated(&self) -> bool {
        matches!(self, Field::AssignedAgent)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Field {
    type Err = DeskError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "name" => Ok(Field::Name),
            "age" => Ok(Field::Age),
            "location" => Ok(Field::Location),
            "work" | "occupation" => Ok(Field::Work),
            "application" => Ok(Field::Application),
            "assignedagent" | "assigned_agent" | "assigned-agent" | "agent" => {
                Ok(Field::AssignedAgent)
            }
            "date" => Ok(Field::Date),
            other => Err(DeskError::UnknownField(other.to_string())),
        }
    }
}

/// Validates a single field value and returns the form that gets stored.
pub fn validate_field_value(field: Field, value: &str) -> Result<String, DeskError> {
    let value = value.trim();
    if value.is_empty() {
        if field.is_required() {
            return Err(DeskError::MissingRequiredField { field });
        }
        if field == Field::Date {
            return Err(DeskError::InvalidField {
                field,
                reason: "date is required".to_string(),
            });
        }
        return Ok(UNKNOWN.to_string());
    }
    if field == Field::Date && parse_iso_date(value).is_none() {
        return Err(DeskError::InvalidField {
            field,
            reason: format!("expected yyyy-mm-dd, got {value}"),
        });
    }
    Ok(value.to_string())
}

pub fn parse_iso_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), ISO_DATE_FORMAT).ok()
}

/// Display name of the agent acting under `identity`: the capitalized
/// local-part of an email-like identifier.
pub fn agent_name_from_identity(identity: &str) -> String {
    let local = identity
        .trim()
        .split_once('@')
        .map(|(local, _)| local)
        .unwrap_or_else(|| identity.trim());
    let mut chars = local.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => UNKNOWN.to_string(),
    }
}

/// Fixed set of agent display names. An empty roster accepts any name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRoster {
    names: Vec<String>,
}

impl AgentRoster {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut roster = Self::default();
        for name in names {
            let name = name.into().trim().to_string();
            if !name.is_empty() && roster.canonical(&name).is_none() {
                roster.names.push(name);
            }
        }
        roster
    }

    /// Parses a comma separated list such as `CLIENTDESK_AGENTS=Maria,Leo`.
    pub fn from_csv(value: &str) -> Self {
        Self::new(value.split(','))
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_enforced(&self) -> bool {
        !self.names.is_empty()
    }

    pub fn canonical(&self, name: &str) -> Option<&str> {
        let name = name.trim();
        self.names
            .iter()
            .find(|candidate| candidate.eq_ignore_ascii_case(name))
            .map(String::as_str)
    }

    /// Returns the roster spelling of `name`, or rejects names outside the roster.
    pub fn resolve(&self, name: &str) -> Result<String, DeskError> {
        if !self.is_enforced() {
            return validate_field_value(Field::AssignedAgent, name);
        }
        self.canonical(name)
            .map(str::to_string)
            .ok_or_else(|| DeskError::InvalidField {
                field: Field::AssignedAgent,
                reason: format!("{} is not a known agent", name.trim()),
            })
    }
}

fn unknown() -> String {
    UNKNOWN.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 14).expect("valid date")
    }

    #[test]
    fn agent_name_uses_capitalized_local_part() {
        assert_eq!(agent_name_from_identity("maria@desk.example"), "Maria");
        assert_eq!(agent_name_from_identity("leo.r@desk.example"), "Leo.r");
        assert_eq!(agent_name_from_identity("solo"), "Solo");
        assert_eq!(agent_name_from_identity("  "), UNKNOWN);
    }

    #[test]
    fn normalize_defaults_optional_fields_and_date() {
        let draft = NewAssignment {
            name: " Ada ".to_string(),
            age: "30".to_string(),
            ..Default::default()
        }
        .normalize(today())
        .expect("valid draft");

        assert_eq!(draft.name, "Ada");
        assert_eq!(draft.location, UNKNOWN);
        assert_eq!(draft.assigned_agent, UNKNOWN);
        assert_eq!(draft.date, "2026-03-14");
    }

    #[test]
    fn normalize_rejects_missing_age() {
        let err = NewAssignment {
            name: "Ada".to_string(),
            ..Default::default()
        }
        .normalize(today())
        .unwrap_err();
        assert_eq!(
            err,
            DeskError::MissingRequiredField { field: Field::Age }
        );
    }

    #[test]
    fn date_field_must_be_iso() {
        assert!(validate_field_value(Field::Date, "14/03/2026").is_err());
        assert_eq!(
            validate_field_value(Field::Date, "2026-03-14").expect("iso"),
            "2026-03-14"
        );
    }

    #[test]
    fn field_parses_wire_and_cli_spellings() {
        assert_eq!("assignedAgent".parse::<Field>().unwrap(), Field::AssignedAgent);
        assert_eq!("assigned-agent".parse::<Field>().unwrap(), Field::AssignedAgent);
        assert_eq!("Occupation".parse::<Field>().unwrap(), Field::Work);
        assert!("id".parse::<Field>().is_err());
    }

    #[test]
    fn roster_resolves_case_insensitively() {
        let roster = AgentRoster::from_csv("Maria, Leo,,maria");
        assert_eq!(roster.names(), ["Maria".to_string(), "Leo".to_string()]);
        assert_eq!(roster.resolve("leo").expect("known"), "Leo");
        assert!(roster.resolve("Zed").is_err());
        assert_eq!(AgentRoster::default().resolve("Zed").expect("open"), "Zed");
    }

    #[test]
    fn assignment_deserializes_with_defaults() {
        let record: ClientAssignment = serde_json::from_value(serde_json::json!({
            "id": "a1",
            "name": "Ada",
            "age": "30",
            "date": "2026-03-01"
        }))
        .expect("decode");
        assert_eq!(record.work, UNKNOWN);
        assert_eq!(record.field(Field::Date), "2026-03-01");
        assert!(record.created_at.is_none());
    }
}
