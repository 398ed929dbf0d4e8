//! Single-cell inline editing for the assignment table.
//!
//! At most one cell is in the `Editing` state. Selecting another cell while
//! an edit is open commits the open edit first (auto-commit on switch), with
//! the same stale-record check as an explicit commit.
//!
//! Values are validated before the controller leaves `Editing`. A rejected
//! value keeps its cell open with the input intact, and a selection or pick
//! elsewhere is not applied until the open cell is corrected or cancelled.

use crate::{validate_field_value, AgentRoster, ClientAssignment, DeskError, Field};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditingCell {
    pub client_id: String,
    pub field: Field,
    pub value: String,
    base_value: String,
}

impl EditingCell {
    /// Value the field held when the edit began.
    pub fn base_value(&self) -> &str {
        &self.base_value
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EditState {
    #[default]
    Idle,
    Editing(EditingCell),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKey {
    Enter,
    Escape,
    Blur,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PendingUpdate {
    pub client_id: String,
    pub field: Field,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    /// Nothing was being edited, or the request did not apply.
    Noop,
    Cancelled,
    Unchanged,
    Commit(PendingUpdate),
    /// The edit was dropped because the record vanished or changed underneath it.
    Discarded(DeskError),
    /// The value failed validation; the cell is still open with the input.
    Rejected(DeskError),
}

#[derive(Debug, Clone, Default)]
pub struct EditController {
    state: EditState,
    roster: AgentRoster,
}

impl EditController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Controller that checks agent values against `roster`.
    pub fn with_roster(roster: AgentRoster) -> Self {
        Self {
            state: EditState::Idle,
            roster,
        }
    }

    pub fn state(&self) -> &EditState {
        &self.state
    }

    pub fn editing(&self) -> Option<&EditingCell> {
        match &self.state {
            EditState::Editing(cell) => Some(cell),
            EditState::Idle => None,
        }
    }

    pub fn is_editing(&self, client_id: &str, field: Field) -> bool {
        self.editing()
            .map(|cell| cell.client_id == client_id && cell.field == field)
            .unwrap_or(false)
    }

    /// Starts editing `column` of `record`. Returns the outcome of the edit
    /// that was open before, if any. Non-editable columns such as `id` leave
    /// the controller untouched, and so does a `Rejected` previous edit.
    pub fn select(
        &mut self,
        record: &ClientAssignment,
        column: &str,
        records: &[ClientAssignment],
    ) -> EditOutcome {
        let Ok(field) = column.parse::<Field>() else {
            return EditOutcome::Noop;
        };
        self.select_field(record, field, records)
    }

    pub fn select_field(
        &mut self,
        record: &ClientAssignment,
        field: Field,
        records: &[ClientAssignment],
    ) -> EditOutcome {
        if self.is_editing(&record.id, field) {
            return EditOutcome::Noop;
        }
        let previous = self.commit(records);
        if matches!(previous, EditOutcome::Rejected(_)) {
            return previous;
        }
        let base_value = record.field(field).to_string();
        self.state = EditState::Editing(EditingCell {
            client_id: record.id.clone(),
            field,
            value: base_value.clone(),
            base_value,
        });
        previous
    }

    /// Replaces the in-progress value. Ignored while idle.
    pub fn input(&mut self, value: impl Into<String>) {
        if let EditState::Editing(cell) = &mut self.state {
            cell.value = value.into();
        }
    }

    pub fn cancel(&mut self) -> EditOutcome {
        match std::mem::take(&mut self.state) {
            EditState::Editing(_) => EditOutcome::Cancelled,
            EditState::Idle => EditOutcome::Noop,
        }
    }

    /// Closes the open edit against the current record list. Stale and
    /// unchanged edits return to idle; an invalid value stays open.
    pub fn commit(&mut self, records: &[ClientAssignment]) -> EditOutcome {
        let EditState::Editing(cell) = &self.state else {
            return EditOutcome::Noop;
        };

        let stale = match records.iter().find(|record| record.id == cell.client_id) {
            None => Some(format!("record {} no longer exists", cell.client_id)),
            Some(current) if current.field(cell.field) != cell.base_value => Some(format!(
                "{} of record {} changed while editing",
                cell.field, cell.client_id
            )),
            Some(_) => None,
        };
        if let Some(reason) = stale {
            self.state = EditState::Idle;
            return EditOutcome::Discarded(DeskError::StaleEdit(reason));
        }

        if cell.value.trim() == cell.base_value.trim() {
            self.state = EditState::Idle;
            return EditOutcome::Unchanged;
        }
        let value = match self.validate(cell.field, &cell.value) {
            Ok(value) => value,
            Err(err) => return EditOutcome::Rejected(err),
        };

        let EditState::Editing(cell) = std::mem::take(&mut self.state) else {
            return EditOutcome::Noop;
        };
        EditOutcome::Commit(PendingUpdate {
            client_id: cell.client_id,
            field: cell.field,
            value,
        })
    }

    /// Store-ready form of `value`: agents resolve through the roster, other
    /// fields through the shared field rules.
    fn validate(&self, field: Field, value: &str) -> Result<String, DeskError> {
        if field == Field::AssignedAgent {
            self.roster.resolve(value)
        } else {
            validate_field_value(field, value)
        }
    }

    pub fn handle_key(&mut self, key: EditKey, records: &[ClientAssignment]) -> EditOutcome {
        match key {
            EditKey::Enter | EditKey::Blur => self.commit(records),
            EditKey::Escape => self.cancel(),
        }
    }

    /// Select-then-save used by enumerated columns: the pick is committed at once.
    /// Returns the outcome of any edit open before alongside the new commit.
    /// When the open edit is rejected the pick is not applied.
    pub fn pick(
        &mut self,
        record: &ClientAssignment,
        field: Field,
        value: impl Into<String>,
        records: &[ClientAssignment],
    ) -> (EditOutcome, EditOutcome) {
        let previous = self.select_field(record, field, records);
        if matches!(previous, EditOutcome::Rejected(_)) {
            return (previous, EditOutcome::Noop);
        }
        self.input(value);
        (previous, self.commit(records))
    }
}
