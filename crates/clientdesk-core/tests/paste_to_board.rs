use chrono::NaiveDate;
use clientdesk_core::board::Board;
use clientdesk_core::edit::EditKey;
use clientdesk_core::filter::{apply_filters, AssignmentFilters, Facet, MonthFilter};
use clientdesk_core::parser::parse_client_text;
use clientdesk_core::{AgentRoster, ClientAssignment, Field};

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, 20).expect("date")
}

fn stored(id: &str, text: &str, identity: &str, date: &str) -> ClientAssignment {
    let mut draft = parse_client_text(text)
        .expect("parse")
        .into_assignment(identity, today());
    draft.date = date.to_string();
    ClientAssignment::from_new(id, draft.normalize(today()).expect("normalize"))
}

fn records() -> Vec<ClientAssignment> {
    vec![
        stored(
            "1",
            "Name: Jane / Smith\nAge: 41yrs old\nLoc: NY",
            "maria@desk.example",
            "2026-01-03",
        ),
        stored(
            "2",
            "John Doe\n35\nLA\nEngineer\nTanTan",
            "leo@desk.example",
            "2025-12-28",
        ),
        stored(
            "3",
            "App: Hinge\nName: Kim\nWork: Nurse\nAge: 29\nLoc: la",
            "leo@desk.example",
            "2025-11-11",
        ),
    ]
}

#[test]
fn pasted_blocks_become_filterable_records() {
    let records = records();
    assert_eq!(records[0].name, "Smith");
    assert_eq!(records[0].assigned_agent, "Maria");
    assert_eq!(records[1].application, "TanTan");

    let la = AssignmentFilters {
        location: Facet::Exactly("LA".to_string()),
        ..Default::default()
    };
    let ids: Vec<String> = apply_filters(&records, &la, today())
        .into_iter()
        .map(|record| record.id)
        .collect();
    assert_eq!(ids, ["2", "3"]);

    let previous = AssignmentFilters {
        month: MonthFilter::Previous,
        agent: Facet::Exactly("leo".to_string()),
        ..Default::default()
    };
    let ids: Vec<String> = apply_filters(&records, &previous, today())
        .into_iter()
        .map(|record| record.id)
        .collect();
    assert_eq!(ids, ["2"]);
}

#[test]
fn board_edit_flow_produces_store_updates() {
    let mut board = Board::new(AgentRoster::from_csv("Maria,Leo"));
    board.replace_records(records());

    assert_eq!(board.select_cell("2", "work").expect("select"), None);
    board.input("Architect");
    let update = board
        .handle_key(EditKey::Enter)
        .expect("commit")
        .expect("changed");
    assert_eq!(update.client_id, "2");
    assert_eq!(update.field, Field::Work);
    assert_eq!(update.value, "Architect");

    board.select_cell("3", "location").expect("select");
    assert_eq!(board.commit_edit().expect("unchanged"), None);

    board.select_cell("1", "id").expect("non-editable column");
    assert!(board.editor().editing().is_none());
}
