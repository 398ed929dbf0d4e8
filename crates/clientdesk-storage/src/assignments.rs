use crate::documents::{DocumentStore, Fields, StoredDocument};
use crate::fallback::FallbackStore;
use crate::watch::{Subscription, Watchers};
use crate::StorageError;
use chrono::{Local, Utc};
use clientdesk_core::{
    validate_field_value, Capabilities, ClientAssignment, DeskError, Field, NewAssignment,
    Session, ASSIGNMENTS_COLLECTION,
};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

pub type SnapshotListener = Box<dyn Fn(&[ClientAssignment]) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    Remote,
    Local,
}

impl StoreMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreMode::Remote => "remote",
            StoreMode::Local => "local",
        }
    }
}

/// Storage of assignment records. Implementations differ in where records
/// live; validation and permission rules are identical.
pub trait AssignmentStore: Send + Sync {
    fn mode(&self) -> StoreMode;

    /// All records, newest `date` first; equal dates keep creation order.
    fn list(&self) -> Result<Vec<ClientAssignment>, DeskError>;

    /// Delivers the full list now and after every change until the returned
    /// handle is dropped.
    fn subscribe(&self, listener: SnapshotListener) -> Result<Subscription, DeskError>;

    fn create(&self, draft: NewAssignment) -> Result<ClientAssignment, DeskError>;

    fn update(&self, id: &str, field: Field, value: &str) -> Result<ClientAssignment, DeskError>;

    fn delete(&self, capabilities: &Capabilities, id: &str) -> Result<(), DeskError>;
}

/// Picks the store for the caller: the shared document store when a session
/// exists, the local fallback file otherwise. `remote` is only invoked in the
/// first case.
pub fn open_assignment_store<F>(
    session: Option<&Session>,
    remote: F,
    fallback_path: &Path,
) -> Result<Box<dyn AssignmentStore>, DeskError>
where
    F: FnOnce() -> Result<Arc<DocumentStore>, StorageError>,
{
    match session {
        Some(session) => {
            let documents = remote()?;
            Ok(Box::new(RemoteAssignmentStore::new(documents, session.clone())))
        }
        None => {
            let fallback = FallbackStore::open(fallback_path)?;
            Ok(Box::new(LocalAssignmentStore::new(fallback)))
        }
    }
}

fn sort_newest_first(records: &mut [ClientAssignment]) {
    records.sort_by(|a, b| b.date.cmp(&a.date));
}

fn today() -> chrono::NaiveDate {
    Local::now().date_naive()
}

pub struct RemoteAssignmentStore {
    documents: Arc<DocumentStore>,
    session: Session,
}

impl RemoteAssignmentStore {
    pub fn new(documents: Arc<DocumentStore>, session: Session) -> Self {
        Self { documents, session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}

fn records_from_documents(documents: &[StoredDocument]) -> Vec<ClientAssignment> {
    let mut records: Vec<ClientAssignment> = documents
        .iter()
        .filter_map(|doc| match doc.decode::<ClientAssignment>() {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(event = "assignment_decode_skip", id = %doc.id, error = %err);
                None
            }
        })
        .collect();
    sort_newest_first(&mut records);
    records
}

fn decode_record(document: &StoredDocument) -> Result<ClientAssignment, DeskError> {
    Ok(document.decode::<ClientAssignment>()?)
}

impl AssignmentStore for RemoteAssignmentStore {
    fn mode(&self) -> StoreMode {
        StoreMode::Remote
    }

    fn list(&self) -> Result<Vec<ClientAssignment>, DeskError> {
        let documents = self.documents.list(ASSIGNMENTS_COLLECTION)?;
        Ok(records_from_documents(&documents))
    }

    fn subscribe(&self, listener: SnapshotListener) -> Result<Subscription, DeskError> {
        let subscription = self
            .documents
            .watch(ASSIGNMENTS_COLLECTION, move |documents| {
                listener(&records_from_documents(documents))
            })?;
        Ok(subscription)
    }

    fn create(&self, draft: NewAssignment) -> Result<ClientAssignment, DeskError> {
        let draft = draft.normalize(today())?;
        let fields = match serde_json::to_value(&draft) {
            Ok(Value::Object(fields)) => fields,
            Ok(_) => Fields::new(),
            Err(err) => return Err(DeskError::OperationFailed(err.to_string())),
        };
        let document = self.documents.insert(ASSIGNMENTS_COLLECTION, fields)?;
        info!(
            event = "assignment_create",
            mode = "remote",
            id = %document.id,
            actor = %self.session.email
        );
        decode_record(&document)
    }

    fn update(&self, id: &str, field: Field, value: &str) -> Result<ClientAssignment, DeskError> {
        let value = validate_field_value(field, value)?;
        let mut patch = Fields::new();
        patch.insert(field.as_str().to_string(), Value::String(value));
        let Some(document) = self
            .documents
            .update_fields(ASSIGNMENTS_COLLECTION, id, patch)?
        else {
            return Err(DeskError::NotFound { id: id.to_string() });
        };
        info!(
            event = "assignment_update",
            mode = "remote",
            id,
            field = %field,
            actor = %self.session.email
        );
        decode_record(&document)
    }

    fn delete(&self, capabilities: &Capabilities, id: &str) -> Result<(), DeskError> {
        if let Err(err) = capabilities.require_admin("delete assignments") {
            warn!(event = "assignment_delete_denied", id, actor = %self.session.email);
            return Err(err);
        }
        if !self.documents.delete(ASSIGNMENTS_COLLECTION, id)? {
            return Err(DeskError::NotFound { id: id.to_string() });
        }
        info!(
            event = "assignment_delete",
            mode = "remote",
            id,
            actor = %self.session.email
        );
        Ok(())
    }
}

struct LocalState {
    fallback: FallbackStore,
    records: Vec<ClientAssignment>,
}

/// Records kept in the fallback file. The file is read once at start and
/// rewritten in full after every mutation.
pub struct LocalAssignmentStore {
    state: Mutex<LocalState>,
    watchers: Watchers<[ClientAssignment]>,
}

impl LocalAssignmentStore {
    pub fn new(fallback: FallbackStore) -> Self {
        let records = fallback.read_array::<ClientAssignment>(ASSIGNMENTS_COLLECTION);
        Self {
            state: Mutex::new(LocalState { fallback, records }),
            watchers: Watchers::default(),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, LocalState>, DeskError> {
        self.state
            .lock()
            .map_err(|_| DeskError::from(StorageError::LockPoisoned))
    }

    /// Applies `change` to a copy of the records, persists the copy and only
    /// then makes it current. Watchers see the new list after the lock is
    /// released.
    fn mutate<R>(
        &self,
        change: impl FnOnce(&mut Vec<ClientAssignment>) -> Result<R, DeskError>,
    ) -> Result<R, DeskError> {
        let (result, snapshot) = {
            let mut state = self.state()?;
            let mut next = state.records.clone();
            let result = change(&mut next)?;
            state.fallback.write_array(ASSIGNMENTS_COLLECTION, &next)?;
            state.records = next;
            (result, self.sorted(&state.records))
        };
        self.watchers.notify(&snapshot);
        Ok(result)
    }

    fn sorted(&self, records: &[ClientAssignment]) -> Vec<ClientAssignment> {
        let mut records = records.to_vec();
        sort_newest_first(&mut records);
        records
    }
}

impl AssignmentStore for LocalAssignmentStore {
    fn mode(&self) -> StoreMode {
        StoreMode::Local
    }

    fn list(&self) -> Result<Vec<ClientAssignment>, DeskError> {
        let state = self.state()?;
        Ok(self.sorted(&state.records))
    }

    fn subscribe(&self, listener: SnapshotListener) -> Result<Subscription, DeskError> {
        let listener: Arc<dyn Fn(&[ClientAssignment]) + Send + Sync> = Arc::from(listener);
        let subscription = self.watchers.add(listener.clone());
        let snapshot = self.list()?;
        listener(&snapshot);
        Ok(subscription)
    }

    fn create(&self, draft: NewAssignment) -> Result<ClientAssignment, DeskError> {
        let draft = draft.normalize(today())?;
        let record = self.mutate(|records| {
            let now = Utc::now().to_rfc3339();
            let mut record = ClientAssignment::from_new(uuid::Uuid::new_v4().to_string(), draft);
            record.created_at = Some(now.clone());
            record.updated_at = Some(now);
            records.push(record.clone());
            Ok(record)
        })?;
        info!(event = "assignment_create", mode = "local", id = %record.id);
        Ok(record)
    }

    fn update(&self, id: &str, field: Field, value: &str) -> Result<ClientAssignment, DeskError> {
        let value = validate_field_value(field, value)?;
        let record = self.mutate(|records| {
            let Some(record) = records.iter_mut().find(|record| record.id == id) else {
                return Err(DeskError::NotFound { id: id.to_string() });
            };
            record.set_field(field, value);
            record.updated_at = Some(Utc::now().to_rfc3339());
            Ok(record.clone())
        })?;
        info!(event = "assignment_update", mode = "local", id, field = %field);
        Ok(record)
    }

    fn delete(&self, capabilities: &Capabilities, id: &str) -> Result<(), DeskError> {
        if let Err(err) = capabilities.require_admin("delete assignments") {
            warn!(event = "assignment_delete_denied", mode = "local", id);
            return Err(err);
        }
        self.mutate(|records| {
            let before = records.len();
            records.retain(|record| record.id != id);
            if records.len() == before {
                return Err(DeskError::NotFound { id: id.to_string() });
            }
            Ok(())
        })?;
        info!(event = "assignment_delete", mode = "local", id);
        Ok(())
    }
}
