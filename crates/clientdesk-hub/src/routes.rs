use crate::auth::authenticate;
use crate::live::live_assignments;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{Local, NaiveDate};
use clientdesk_core::filter::{apply_filters, AssignmentFilters, Facet, MonthFilter};
use clientdesk_core::menu::{quick_actions_for, QuickAction};
use clientdesk_core::parser::parse_client_text;
use clientdesk_core::{
    AgentRoster, ClientAssignment, DeskError, Field, NewAssignment, Session, SessionTable,
    CLIENTS_COLLECTION,
};
use clientdesk_storage::{AssignmentStore, DocumentStore, Fields, RemoteAssignmentStore};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

const DEFAULT_CLIENT_STATUS: &str = "In Process";

#[derive(Clone)]
pub struct AppState {
    pub documents: Arc<DocumentStore>,
    pub sessions: Arc<SessionTable>,
    pub roster: Arc<AgentRoster>,
}

impl AppState {
    pub fn new(documents: Arc<DocumentStore>, sessions: SessionTable, roster: AgentRoster) -> Self {
        Self {
            documents,
            sessions: Arc::new(sessions),
            roster: Arc::new(roster),
        }
    }

    pub fn session(&self, headers: &HeaderMap) -> Result<Session, ApiError> {
        Ok(authenticate(&self.sessions, headers)?)
    }

    pub fn assignments(&self, session: &Session) -> Box<dyn AssignmentStore> {
        Box::new(RemoteAssignmentStore::new(
            self.documents.clone(),
            session.clone(),
        ))
    }
}

/// Error body `{ "error": "..." }` with the status derived from the failure.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<DeskError> for ApiError {
    fn from(err: DeskError) -> Self {
        let status = match &err {
            DeskError::Unauthorized => StatusCode::UNAUTHORIZED,
            DeskError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
            DeskError::NotFound { .. } => StatusCode::NOT_FOUND,
            DeskError::StaleEdit(_) => StatusCode::CONFLICT,
            DeskError::OperationFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DeskError::MissingRequiredField { .. }
            | DeskError::InvalidField { .. }
            | DeskError::UnknownField(_)
            | DeskError::InvalidFilter(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(event = "store_error", code = err.code(), error = %err);
        }
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message() }));
        (self.status(), body).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/clients", get(list_clients).post(create_client))
        .route("/assignments", get(list_assignments).post(create_assignment))
        .route("/assignments/parse", post(parse_assignment))
        .route("/assignments/live", get(live_assignments))
        .route(
            "/assignments/:id",
            patch(update_assignment).delete(delete_assignment),
        )
        .route("/quick-actions", get(quick_actions))
        .with_state(state)
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub async fn list_clients(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Value>>, ApiError> {
    state.session(&headers)?;
    let documents = state
        .documents
        .list(CLIENTS_COLLECTION)
        .map_err(DeskError::from)?;
    Ok(Json(documents.iter().map(|doc| doc.to_json()).collect()))
}

pub async fn create_client(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let session = state.session(&headers)?;
    let Value::Object(mut fields) = body else {
        return Err(ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "client body must be a JSON object",
        ));
    };
    fields
        .entry("status")
        .or_insert_with(|| Value::String(DEFAULT_CLIENT_STATUS.to_string()));
    fields
        .entry("notes")
        .or_insert_with(|| Value::String(String::new()));

    let document = state
        .documents
        .insert(CLIENTS_COLLECTION, fields)
        .map_err(DeskError::from)?;
    info!(event = "client_create", id = %document.id, actor = %session.email);

    let mut body = Fields::new();
    body.insert("id".to_string(), Value::String(document.id.clone()));
    body.extend(document.fields);
    Ok((StatusCode::CREATED, Json(Value::Object(body))))
}

#[derive(Debug, Default, Deserialize)]
pub struct AssignmentQuery {
    pub search: Option<String>,
    pub location: Option<String>,
    pub application: Option<String>,
    pub agent: Option<String>,
    pub month: Option<String>,
}

impl AssignmentQuery {
    pub fn filters(&self) -> Result<AssignmentFilters, DeskError> {
        Ok(AssignmentFilters {
            search: self.search.clone().unwrap_or_default(),
            location: Facet::from_param(self.location.as_deref()),
            application: Facet::from_param(self.application.as_deref()),
            agent: Facet::from_param(self.agent.as_deref()),
            month: MonthFilter::from_param(self.month.as_deref())?,
        })
    }
}

pub async fn list_assignments(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AssignmentQuery>,
) -> Result<Json<Vec<ClientAssignment>>, ApiError> {
    let session = state.session(&headers)?;
    let filters = query.filters()?;
    let records = state.assignments(&session).list()?;
    Ok(Json(apply_filters(&records, &filters, today())))
}

#[derive(Debug, Deserialize)]
pub struct ParseRequest {
    pub text: String,
}

pub async fn parse_assignment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ParseRequest>,
) -> Result<(StatusCode, Json<ClientAssignment>), ApiError> {
    let session = state.session(&headers)?;
    let parsed = parse_client_text(&request.text).map_err(|err| {
        warn!(event = "parse_rejected", actor = %session.email, error = %err);
        err
    })?;
    let mut draft = parsed.into_assignment(&session.email, today());
    if let Some(name) = state.roster.canonical(&draft.assigned_agent) {
        draft.assigned_agent = name.to_string();
    }
    let record = state.assignments(&session).create(draft)?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn create_assignment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut draft): Json<NewAssignment>,
) -> Result<(StatusCode, Json<ClientAssignment>), ApiError> {
    let session = state.session(&headers)?;
    if draft.assigned_agent.trim().is_empty() {
        let agent = session.agent_name();
        draft.assigned_agent = state
            .roster
            .canonical(&agent)
            .map(str::to_string)
            .unwrap_or(agent);
    } else {
        draft.assigned_agent = state.roster.resolve(&draft.assigned_agent)?;
    }
    let record = state.assignments(&session).create(draft)?;
    Ok((StatusCode::CREATED, Json(record)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    pub field: String,
    pub value: String,
}

pub async fn update_assignment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<UpdateRequest>,
) -> Result<Json<ClientAssignment>, ApiError> {
    let session = state.session(&headers)?;
    let field: Field = request.field.parse()?;
    let value = if field == Field::AssignedAgent {
        state.roster.resolve(&request.value)?
    } else {
        request.value
    };
    let record = state.assignments(&session).update(&id, field, &value)?;
    Ok(Json(record))
}

pub async fn delete_assignment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let session = state.session(&headers)?;
    state
        .assignments(&session)
        .delete(&session.capabilities(), &id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn quick_actions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<QuickAction>>, ApiError> {
    let session = state.session(&headers)?;
    Ok(Json(quick_actions_for(&session.capabilities())))
}
