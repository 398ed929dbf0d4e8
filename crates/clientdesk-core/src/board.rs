use crate::edit::{EditController, EditKey, EditOutcome, PendingUpdate};
use crate::filter::{distinct_values, filter_indices, AssignmentFilters};
use crate::{AgentRoster, ClientAssignment, DeskError, Field};
use chrono::NaiveDate;

/// View model of the assignment table: the live record list, the active
/// filters and the inline editor.
/// Result of a dropdown pick. The edit that was open before the pick settles
/// on its own, so a rejected pick never loses it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickOutcome {
    pub previous: Result<Option<PendingUpdate>, DeskError>,
    pub picked: Result<Option<PendingUpdate>, DeskError>,
}

impl PickOutcome {
    /// Store-ready updates in the order they were committed.
    pub fn updates(&self) -> Vec<PendingUpdate> {
        [&self.previous, &self.picked]
            .into_iter()
            .filter_map(|result| result.as_ref().ok().cloned().flatten())
            .collect()
    }

    /// First error, if either side failed.
    pub fn error(&self) -> Option<&DeskError> {
        [&self.previous, &self.picked]
            .into_iter()
            .find_map(|result| result.as_ref().err())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Board {
    records: Vec<ClientAssignment>,
    filters: AssignmentFilters,
    editor: EditController,
    roster: AgentRoster,
}

impl Board {
    pub fn new(roster: AgentRoster) -> Self {
        Self {
            editor: EditController::with_roster(roster.clone()),
            roster,
            ..Self::default()
        }
    }

    /// Applies a snapshot pushed by the store subscription. An open edit is
    /// kept; it is checked against the new list when it commits.
    pub fn replace_records(&mut self, records: Vec<ClientAssignment>) {
        self.records = records;
    }

    pub fn records(&self) -> &[ClientAssignment] {
        &self.records
    }

    pub fn record(&self, id: &str) -> Option<&ClientAssignment> {
        self.records.iter().find(|record| record.id == id)
    }

    pub fn filters(&self) -> &AssignmentFilters {
        &self.filters
    }

    pub fn set_filters(&mut self, filters: AssignmentFilters) {
        self.filters = filters;
    }

    pub fn roster(&self) -> &AgentRoster {
        &self.roster
    }

    pub fn editor(&self) -> &EditController {
        &self.editor
    }

    pub fn visible(&self, today: NaiveDate) -> Vec<&ClientAssignment> {
        filter_indices(&self.records, &self.filters, today)
            .into_iter()
            .map(|idx| &self.records[idx])
            .collect()
    }

    /// Dropdown options for a column. Agents come from the roster when one
    /// is configured.
    pub fn options(&self, field: Field) -> Vec<String> {
        if field == Field::AssignedAgent && self.roster.is_enforced() {
            return self.roster.names().to_vec();
        }
        distinct_values(&self.records, field)
    }

    /// Opens `column` of record `id` for editing and returns the validated
    /// update of any edit that was open before. A rejected previous value is
    /// returned as the error and its cell stays open; a stale previous edit
    /// is reported as `StaleEdit` after the new cell has opened.
    pub fn select_cell(
        &mut self,
        id: &str,
        column: &str,
    ) -> Result<Option<PendingUpdate>, DeskError> {
        let Some(record) = self.records.iter().find(|record| record.id == id) else {
            return Err(DeskError::NotFound { id: id.to_string() });
        };
        let outcome = self.editor.select(record, column, &self.records);
        settle(outcome)
    }

    pub fn input(&mut self, value: impl Into<String>) {
        self.editor.input(value);
    }

    /// Closes the open edit and returns the validated update, if the value
    /// changed. On a validation error the cell stays open for correction.
    pub fn commit_edit(&mut self) -> Result<Option<PendingUpdate>, DeskError> {
        let outcome = self.editor.commit(&self.records);
        settle(outcome)
    }

    pub fn handle_key(&mut self, key: EditKey) -> Result<Option<PendingUpdate>, DeskError> {
        let outcome = self.editor.handle_key(key, &self.records);
        settle(outcome)
    }

    /// Select-then-save for enumerated columns.
    pub fn pick(
        &mut self,
        id: &str,
        field: Field,
        value: &str,
    ) -> Result<PickOutcome, DeskError> {
        let Some(record) = self.records.iter().find(|record| record.id == id) else {
            return Err(DeskError::NotFound { id: id.to_string() });
        };
        let (previous, picked) = self.editor.pick(record, field, value, &self.records);
        Ok(PickOutcome {
            previous: settle(previous),
            picked: settle(picked),
        })
    }
}

/// Turns a controller outcome into a store-ready update or the error to show.
fn settle(outcome: EditOutcome) -> Result<Option<PendingUpdate>, DeskError> {
    match outcome {
        EditOutcome::Commit(update) => Ok(Some(update)),
        EditOutcome::Discarded(err) | EditOutcome::Rejected(err) => Err(err),
        EditOutcome::Noop | EditOutcome::Cancelled | EditOutcome::Unchanged => Ok(None),
    }
}
