use crate::GlobalArgs;
use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate, Utc};
use clap::{Args, Subcommand};
use clientdesk_core::board::Board;
use clientdesk_core::filter::{apply_filters, AssignmentFilters, Facet, MonthFilter};
use clientdesk_core::menu::quick_actions_for;
use clientdesk_core::parser::{parse_client_text, ParsedClient};
use clientdesk_core::settings::{env_true, resolve_setting};
use clientdesk_core::{
    AgentRoster, Capabilities, ClientAssignment, Field, NewAssignment, Session, SessionTable,
};
use clientdesk_storage::{
    migrate_fallback_to_remote, open_assignment_store, AssignmentStore, DocumentStore,
    FallbackStore, MigrationReport,
};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const DATA_DIR: &str = ".clientdesk";

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
pub enum DeskCommand {
    /// Parse a pasted client block from a file or stdin.
    Parse(ParseArgs),
    #[command(alias = "ls")]
    List(ListArgs),
    Add(AddArgs),
    Edit(EditArgs),
    #[command(alias = "rm")]
    Delete(DeleteArgs),
    /// Copy local fallback collections into the shared store.
    Migrate(MigrateArgs),
    QuickActions(QuickActionsArgs),
}

#[derive(Args, Debug, Default)]
pub struct ParseArgs {
    #[arg(long)]
    pub file: Option<PathBuf>,
    /// Store the parsed client as a new assignment.
    #[arg(long)]
    pub save: bool,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Default)]
pub struct ListArgs {
    #[arg(long, alias = "query")]
    pub search: Option<String>,
    #[arg(long)]
    pub location: Option<String>,
    #[arg(long)]
    pub application: Option<String>,
    #[arg(long)]
    pub agent: Option<String>,
    /// `current`, `previous` or a month code such as `mar`.
    #[arg(long)]
    pub month: Option<String>,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Default)]
pub struct AddArgs {
    #[arg(long)]
    pub name: String,
    #[arg(long)]
    pub age: String,
    #[arg(long)]
    pub location: Option<String>,
    #[arg(long, alias = "occupation")]
    pub work: Option<String>,
    #[arg(long, alias = "app")]
    pub application: Option<String>,
    #[arg(long)]
    pub agent: Option<String>,
    #[arg(long)]
    pub date: Option<String>,
}

#[derive(Args, Debug)]
pub struct EditArgs {
    pub id: String,
    pub field: String,
    pub value: String,
}

#[derive(Args, Debug)]
pub struct DeleteArgs {
    pub id: String,
}

#[derive(Args, Debug, Default)]
pub struct MigrateArgs {
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Default)]
pub struct QuickActionsArgs {
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone)]
pub struct DeskPaths {
    pub db: PathBuf,
    pub fallback: PathBuf,
    pub sessions: PathBuf,
}

impl DeskPaths {
    fn resolve(args: &GlobalArgs, root: &Path) -> Self {
        let data_dir = root.join(DATA_DIR);
        let db = resolve_setting(&args.db, "CLIENTDESK_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("desk.sqlite3"));
        let fallback = resolve_setting(&args.fallback, "CLIENTDESK_FALLBACK")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("fallback.json"));
        let sessions = resolve_setting(&args.sessions, "CLIENTDESK_SESSIONS")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_sessions_path(&data_dir));
        Self {
            db,
            fallback,
            sessions,
        }
    }
}

/// Project-local session table first, then the one in the home directory.
fn default_sessions_path(data_dir: &Path) -> PathBuf {
    let local = data_dir.join("sessions.json");
    if local.exists() {
        return local;
    }
    match dirs::home_dir() {
        Some(home) => {
            let global = home.join(DATA_DIR).join("sessions.json");
            if global.exists() {
                global
            } else {
                local
            }
        }
        None => local,
    }
}

pub struct DeskContext {
    pub paths: DeskPaths,
    pub session: Option<Session>,
    pub roster: AgentRoster,
    pub local_admin: bool,
}

impl DeskContext {
    pub fn from_args(args: &GlobalArgs) -> Result<Self> {
        let root = std::env::current_dir()?;
        let paths = DeskPaths::resolve(args, &root);
        let session = match resolve_setting(&args.token, "CLIENTDESK_TOKEN") {
            Some(token) => {
                let table = SessionTable::load(&paths.sessions).with_context(|| {
                    format!("Failed to read sessions from {}", paths.sessions.display())
                })?;
                Some(
                    table
                        .authenticate(Some(token.as_str()))
                        .context("Session token was not accepted")?,
                )
            }
            None => None,
        };
        let agents = resolve_setting(&args.agents, "CLIENTDESK_AGENTS").unwrap_or_default();
        Ok(Self {
            paths,
            session,
            roster: AgentRoster::from_csv(&agents),
            local_admin: args.local_admin || env_true("CLIENTDESK_LOCAL_ADMIN"),
        })
    }

    fn store(&self) -> Result<Box<dyn AssignmentStore>> {
        let store = open_assignment_store(
            self.session.as_ref(),
            || DocumentStore::open(&self.paths.db).map(Arc::new),
            &self.paths.fallback,
        )?;
        debug!(event = "store_open", mode = store.mode().as_str(), actor = %self.identity());
        Ok(store)
    }

    fn capabilities(&self) -> Capabilities {
        match &self.session {
            Some(session) => session.capabilities(),
            None => Capabilities {
                admin: self.local_admin,
            },
        }
    }

    fn identity(&self) -> &str {
        self.session
            .as_ref()
            .map(|session| session.email.as_str())
            .unwrap_or("")
    }

    /// Roster spelling of the acting agent, or the derived name when the
    /// roster does not list it.
    fn default_agent(&self, derived: String) -> String {
        self.roster
            .canonical(&derived)
            .map(str::to_string)
            .unwrap_or(derived)
    }
}

pub fn handle_desk_command(ctx: &DeskContext, command: DeskCommand) -> Result<()> {
    match command {
        DeskCommand::Parse(args) => {
            let text = read_input(args.file.as_deref())?;
            let (parsed, saved) = parse_text(ctx, &text, args.save)?;
            if args.json {
                let payload = match &saved {
                    Some(record) => serde_json::to_string_pretty(record)?,
                    None => serde_json::to_string_pretty(&parsed)?,
                };
                println!("{payload}");
                return Ok(());
            }
            print_parsed(&parsed);
            if let Some(record) = saved {
                println!("Saved assignment [{}].", record.id);
            }
            Ok(())
        }
        DeskCommand::List(args) => {
            let records = list_records(ctx, &args)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&records)?);
                return Ok(());
            }
            if records.is_empty() {
                println!("No assignments match.");
            }
            for record in &records {
                print_record(record);
            }
            Ok(())
        }
        DeskCommand::Add(args) => {
            let record = add_record(ctx, args)?;
            println!("Added assignment [{}] for {}.", record.id, record.name);
            Ok(())
        }
        DeskCommand::Edit(args) => {
            match edit_record(ctx, &args.id, &args.field, &args.value)? {
                Some(record) => print_record(&record),
                None => println!("No change to {} of [{}].", args.field, args.id),
            }
            Ok(())
        }
        DeskCommand::Delete(args) => {
            ctx.store()?.delete(&ctx.capabilities(), &args.id)?;
            println!("Deleted assignment [{}].", args.id);
            Ok(())
        }
        DeskCommand::Migrate(args) => {
            let report = run_migration(ctx)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for (collection, count) in &report.migrated {
                    println!("{collection}: {count}");
                }
                for key in &report.skipped_keys {
                    println!("{key}: skipped (unreadable)");
                }
            }
            migration_status(&report)
        }
        DeskCommand::QuickActions(args) => {
            let actions = quick_actions_for(&ctx.capabilities());
            if args.json {
                println!("{}", serde_json::to_string_pretty(&actions)?);
                return Ok(());
            }
            for action in actions {
                println!("{:<14} {:<22} {}", action.id, action.label, action.route);
            }
            Ok(())
        }
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn read_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read stdin")?;
            Ok(text)
        }
    }
}

fn parse_text(
    ctx: &DeskContext,
    text: &str,
    save: bool,
) -> Result<(ParsedClient, Option<ClientAssignment>)> {
    let parsed = parse_client_text(text)?;
    if !save {
        return Ok((parsed, None));
    }
    let mut draft = parsed.clone().into_assignment(ctx.identity(), today());
    draft.assigned_agent = ctx.default_agent(draft.assigned_agent);
    let record = ctx.store()?.create(draft)?;
    Ok((parsed, Some(record)))
}

fn list_filters(args: &ListArgs) -> Result<AssignmentFilters> {
    Ok(AssignmentFilters {
        search: args.search.clone().unwrap_or_default(),
        location: Facet::from_param(args.location.as_deref()),
        application: Facet::from_param(args.application.as_deref()),
        agent: Facet::from_param(args.agent.as_deref()),
        month: MonthFilter::from_param(args.month.as_deref())?,
    })
}

fn list_records(ctx: &DeskContext, args: &ListArgs) -> Result<Vec<ClientAssignment>> {
    let filters = list_filters(args)?;
    let records = ctx.store()?.list()?;
    Ok(apply_filters(&records, &filters, today()))
}

fn add_record(ctx: &DeskContext, args: AddArgs) -> Result<ClientAssignment> {
    let assigned_agent = match args.agent {
        Some(agent) if !agent.trim().is_empty() => ctx.roster.resolve(&agent)?,
        _ => ctx.default_agent(clientdesk_core::agent_name_from_identity(ctx.identity())),
    };
    let draft = NewAssignment {
        name: args.name,
        age: args.age,
        location: args.location.unwrap_or_default(),
        work: args.work.unwrap_or_default(),
        application: args.application.unwrap_or_default(),
        assigned_agent,
        date: args.date.unwrap_or_default(),
    };
    Ok(ctx.store()?.create(draft)?)
}

/// Runs one cell edit through the board the way the dashboard does and writes
/// the result. Returns `None` when the value did not change.
fn edit_record(
    ctx: &DeskContext,
    id: &str,
    column: &str,
    value: &str,
) -> Result<Option<ClientAssignment>> {
    let field: Field = column.parse()?;
    let store = ctx.store()?;
    let mut board = Board::new(ctx.roster.clone());
    board.replace_records(store.list()?);

    let update = if field.is_enumerated() {
        board.pick(id, field, value)?.picked?
    } else {
        board.select_cell(id, field.as_str())?;
        board.input(value);
        board.commit_edit()?
    };

    match update {
        Some(update) => Ok(Some(store.update(
            &update.client_id,
            update.field,
            &update.value,
        )?)),
        None => Ok(None),
    }
}

fn run_migration(ctx: &DeskContext) -> Result<MigrationReport> {
    let Some(session) = &ctx.session else {
        bail!("Migration writes to the shared store; pass --token or set CLIENTDESK_TOKEN");
    };
    session.capabilities().require_admin("migrate local data")?;

    let fallback = FallbackStore::open(&ctx.paths.fallback)?;
    let documents = DocumentStore::open(&ctx.paths.db)?;
    info!(
        event = "migrate_start",
        actor = %session.email,
        fallback = %ctx.paths.fallback.display(),
        db = %ctx.paths.db.display()
    );
    Ok(migrate_fallback_to_remote(&fallback, &documents, Utc::now()))
}

fn migration_status(report: &MigrationReport) -> Result<()> {
    if let Some(failure) = &report.failure {
        bail!("Migration stopped after {} records: {failure}", report.total());
    }
    Ok(())
}

fn print_parsed(parsed: &ParsedClient) {
    println!("Name: {}", parsed.name);
    println!("Age: {}", parsed.age);
    println!("Location: {}", parsed.location);
    println!("Work: {}", parsed.work);
    println!("Application: {}", parsed.application);
}

fn print_record(record: &ClientAssignment) {
    println!(
        "- [{}] {} {} ({}) {} / {} / {} -> {}",
        record.id,
        record.date,
        record.name,
        record.age,
        record.location,
        record.work,
        record.application,
        record.assigned_agent
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use clientdesk_core::DeskError;
    use tempfile::TempDir;

    fn local_ctx(dir: &TempDir, local_admin: bool) -> DeskContext {
        DeskContext {
            paths: DeskPaths {
                db: dir.path().join("desk.sqlite3"),
                fallback: dir.path().join("fallback.json"),
                sessions: dir.path().join("sessions.json"),
            },
            session: None,
            roster: AgentRoster::from_csv("Maria,Leo"),
            local_admin,
        }
    }

    fn with_session(mut ctx: DeskContext, email: &str, admin: bool) -> DeskContext {
        ctx.session = Some(Session::new(email, admin));
        ctx
    }

    fn add(ctx: &DeskContext, name: &str, location: &str) -> ClientAssignment {
        add_record(
            ctx,
            AddArgs {
                name: name.to_string(),
                age: "30".to_string(),
                location: Some(location.to_string()),
                ..Default::default()
            },
        )
        .expect("add")
    }

    #[test]
    fn parse_without_save_leaves_store_untouched() {
        let dir = TempDir::new().expect("temp dir");
        let ctx = local_ctx(&dir, false);
        let text = "Name: Jane / Smith\nAge: 41yrs old\nLoc: NY";
        let (parsed, saved) = parse_text(&ctx, text, false).expect("parse");
        assert_eq!(parsed.name, "Smith");
        assert_eq!(parsed.age, "41");
        assert!(saved.is_none());
        assert!(!ctx.paths.fallback.exists());
    }

    #[test]
    fn parse_and_save_uses_session_agent() {
        let dir = TempDir::new().expect("temp dir");
        let ctx = with_session(local_ctx(&dir, false), "leo@desk.example", false);
        let text = "John Doe\n35\nLA\nEngineer\nTanTan";
        let (_, saved) = parse_text(&ctx, text, true).expect("save");
        let record = saved.expect("saved record");
        assert_eq!(record.assigned_agent, "Leo");
        assert!(ctx.paths.db.exists());
        assert!(!ctx.paths.fallback.exists());
    }

    #[test]
    fn list_applies_filters_in_local_mode() {
        let dir = TempDir::new().expect("temp dir");
        let ctx = local_ctx(&dir, false);
        add(&ctx, "Ana", "NY");
        add(&ctx, "Bo", "LA");

        let records = list_records(
            &ctx,
            &ListArgs {
                location: Some("la".to_string()),
                ..Default::default()
            },
        )
        .expect("list");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "Bo");
        assert_eq!(records[0].assigned_agent, "Unknown");

        let err = list_records(
            &ctx,
            &ListArgs {
                month: Some("later".to_string()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeskError>(),
            Some(DeskError::InvalidFilter(_))
        ));
    }

    #[test]
    fn edit_goes_through_board_validation() {
        let dir = TempDir::new().expect("temp dir");
        let ctx = local_ctx(&dir, false);
        let record = add(&ctx, "Ana", "NY");

        let updated = edit_record(&ctx, &record.id, "occupation", "Pilot")
            .expect("edit")
            .expect("changed");
        assert_eq!(updated.work, "Pilot");

        assert!(edit_record(&ctx, &record.id, "location", " NY ")
            .expect("edit")
            .is_none());

        let updated = edit_record(&ctx, &record.id, "agent", "maria")
            .expect("pick")
            .expect("changed");
        assert_eq!(updated.assigned_agent, "Maria");

        assert!(edit_record(&ctx, &record.id, "agent", "Zed").is_err());
        assert!(edit_record(&ctx, &record.id, "name", "").is_err());
        assert!(edit_record(&ctx, &record.id, "id", "x").is_err());
        assert!(edit_record(&ctx, "missing", "work", "Pilot").is_err());
    }

    #[test]
    fn local_delete_follows_local_admin_flag() {
        let dir = TempDir::new().expect("temp dir");
        let agent = local_ctx(&dir, false);
        let record = add(&agent, "Ana", "NY");

        let err = agent
            .store()
            .expect("store")
            .delete(&agent.capabilities(), &record.id)
            .unwrap_err();
        assert!(matches!(err, DeskError::PermissionDenied { .. }));

        let admin = local_ctx(&dir, true);
        admin
            .store()
            .expect("store")
            .delete(&admin.capabilities(), &record.id)
            .expect("delete");
        assert!(admin.store().expect("store").list().expect("list").is_empty());
    }

    #[test]
    fn migration_requires_admin_session() {
        let dir = TempDir::new().expect("temp dir");
        let local = local_ctx(&dir, true);
        assert!(run_migration(&local).is_err());

        let mut fallback = FallbackStore::open(&local.paths.fallback).expect("fallback");
        fallback
            .set("clients", r#"[{"name": "Ana"}, {"name": "Bo"}]"#)
            .expect("seed");

        let agent = with_session(local_ctx(&dir, false), "maria@desk.example", false);
        assert!(run_migration(&agent).is_err());

        let admin = with_session(local_ctx(&dir, false), "root@desk.example", true);
        let report = run_migration(&admin).expect("migrate");
        assert!(report.is_complete());
        assert_eq!(report.migrated.get("clients"), Some(&2));
    }

    #[test]
    fn interrupted_migration_reports_count_and_failure() {
        let mut report = MigrationReport::default();
        report.migrated.insert("clients".to_string(), 3);
        assert!(migration_status(&report).is_ok());

        report.failure = Some("disk full".to_string());
        let err = migration_status(&report).expect_err("failure surfaces");
        assert_eq!(err.to_string(), "Migration stopped after 3 records: disk full");
        assert_eq!(report.failure.as_deref(), Some("disk full"));
    }
}
