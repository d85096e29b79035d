use recordbind_core::{
    params, Cast, Entity, FetchScope, Fetched, Instructions, Model, Params, RepoError,
    RepoResult, Repository, Schema, StateError, ValidationError, Value,
};
use std::cell::Cell;
use std::error::Error;
use std::io;

struct Note;

impl Model for Note {
    fn schema() -> Schema {
        Schema::builder()
            .fields(["id", "title", "body", "pinned"])
            .required(["title", "body"])
            .cast("id", Cast::AutoIncrement)
            .cast("pinned", Cast::Boolean)
            .soft_delete("archived_at")
            .build()
    }
}

/// In-process backend that serves canned rows and counts calls.
#[derive(Default)]
struct RecordingRepository {
    instructions: Instructions,
    rows: Vec<Vec<(&'static str, Value)>>,
    get_calls: Cell<usize>,
    set_calls: Cell<usize>,
    fail_writes: bool,
}

impl Repository<Note> for RecordingRepository {
    fn instructions(&self) -> &Instructions {
        &self.instructions
    }

    fn get(
        &self,
        entity: &Entity<'_, Note>,
        _params: Option<&Params>,
        scope: &mut FetchScope<'_, Note>,
    ) -> RepoResult<()> {
        self.get_calls.set(self.get_calls.get() + 1);
        let skip_trashed = entity.is_soft_deletable();
        let mut fetched = Fetched::new(
            self.rows
                .iter()
                .map(|row| entity.hydrate(row.iter().cloned()).map_err(RepoError::from))
                .filter(move |row| {
                    !(skip_trashed && row.as_ref().is_ok_and(|note| note.is_soft_deleted()))
                }),
        );
        scope(&mut fetched)
    }

    fn set(&self, _entity: &Entity<'_, Note>, params: &Params) -> RepoResult<i64> {
        self.set_calls.set(self.set_calls.get() + 1);
        if self.fail_writes {
            return Err(RepoError::Backend(Box::new(io::Error::new(
                io::ErrorKind::Other,
                "store offline",
            ))));
        }
        Ok(params.len() as i64)
    }
}

fn ready_repository() -> RecordingRepository {
    let repo = RecordingRepository {
        rows: vec![
            vec![("id", Value::Integer(1)), ("title", Value::from("kept"))],
            vec![
                ("id", Value::Integer(2)),
                ("title", Value::from("archived")),
                ("archived_at", Value::from("2024-05-01 12:00:00")),
            ],
        ],
        ..RecordingRepository::default()
    };
    repo.set_read_instruction("all notes")
        .set_write_instruction("save note");
    repo
}

#[test]
fn fetch_on_unbound_entity_is_a_state_error() {
    let note = Entity::<Note>::new();
    let err = note.fetch_all(None).unwrap_err();
    assert!(matches!(err, RepoError::State(StateError::Unbound)));
}

#[test]
fn persist_on_unbound_entity_is_a_state_error() {
    let note = Entity::<Note>::new();
    let err = note
        .persist(&params([("title", "t"), ("body", "b")]))
        .unwrap_err();
    assert!(matches!(err, RepoError::State(StateError::Unbound)));
}

#[test]
fn missing_instructions_fail_before_backend_calls() {
    let repo = RecordingRepository::default();
    let note = Entity::<Note>::with_repository(&repo);

    let read_err = note.fetch_all(None).unwrap_err();
    assert!(matches!(
        read_err,
        RepoError::State(StateError::MissingReadInstruction)
    ));

    let write_err = note
        .persist(&params([("title", "t"), ("body", "b")]))
        .unwrap_err();
    assert!(matches!(
        write_err,
        RepoError::State(StateError::MissingWriteInstruction)
    ));

    assert_eq!(repo.get_calls.get(), 0);
    assert_eq!(repo.set_calls.get(), 0);
    assert!(!repo.is_diagnosed());
    assert!(!repo.is_prescribed());
}

#[test]
fn persist_missing_required_is_a_validation_error_with_zero_backend_calls() {
    let repo = ready_repository();
    let note = Entity::<Note>::with_repository(&repo);

    let err = note.persist(&params([("title", "only title")])).unwrap_err();
    assert!(matches!(
        err,
        RepoError::Validation(ValidationError::MissingRequired { ref field, .. }) if field == "body"
    ));
    assert_eq!(repo.set_calls.get(), 0);
}

#[test]
fn persist_delegates_when_required_values_are_present() {
    let repo = ready_repository();
    let note = Entity::<Note>::with_repository(&repo);

    let result = note
        .persist(&params([
            ("title", Value::from("t")),
            (":body", Value::from("b")),
            ("pinned", Value::from(true)),
        ]))
        .unwrap();
    assert_eq!(result, 3);
    assert_eq!(repo.set_calls.get(), 1);
}

#[test]
fn fetch_yields_fresh_instances_and_filters_soft_deleted_rows() {
    let repo = ready_repository();
    let note = Entity::<Note>::with_repository(&repo);

    let notes = note.fetch_all(None).unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].get_attribute("title"), Some(&Value::from("kept")));
    assert!(!notes[0].is_bound());
    assert!(!note.is_set("title"));
}

#[test]
fn include_trashed_returns_rows_a_plain_fetch_filters_out() {
    let repo = ready_repository();
    let mut note = Entity::<Note>::with_repository(&repo);
    note.include_trashed();

    let notes = note.fetch_all(None).unwrap();
    assert_eq!(notes.len(), 2);
    assert!(notes[1].is_soft_deleted());
    assert!(matches!(
        notes[1].get_attribute("archived_at"),
        Some(Value::Timestamp(_))
    ));
}

#[test]
fn fetch_scope_can_stop_early() {
    let repo = ready_repository();
    let mut note = Entity::<Note>::with_repository(&repo);
    note.include_trashed();

    let first_title = note
        .fetch(None, |rows| {
            let first = rows.next().transpose()?;
            Ok(first.and_then(|note| note.get_attribute("title").cloned()))
        })
        .unwrap();
    assert_eq!(first_title, Some(Value::from("kept")));
    assert_eq!(repo.get_calls.get(), 1);
}

#[test]
fn bind_only_attaches_once_but_rebind_replaces() {
    let first = ready_repository();
    let second = ready_repository();
    let mut note = Entity::<Note>::new();

    note.bind_repository(&first).bind_repository(&second);
    note.fetch_all(None).unwrap();
    assert_eq!(first.get_calls.get(), 1);
    assert_eq!(second.get_calls.get(), 0);

    note.rebind_repository(&second);
    note.fetch_all(None).unwrap();
    assert_eq!(first.get_calls.get(), 1);
    assert_eq!(second.get_calls.get(), 1);
}

#[test]
fn instructions_can_be_reset_after_binding() {
    let repo = ready_repository();
    let note = Entity::<Note>::with_repository(&repo);

    repo.set_read_instruction("pinned notes");
    assert_eq!(repo.read_instruction().as_deref(), Some("pinned notes"));
    assert_eq!(note.fetch_all(None).unwrap().len(), 1);
}

#[test]
fn diagnose_and_prescribe_set_instructions() {
    let repo = RecordingRepository::default();
    repo.diagnose("all notes").prescribe("save note");

    assert!(repo.is_diagnosed());
    assert!(repo.is_prescribed());
    assert_eq!(repo.read_instruction().as_deref(), Some("all notes"));
    assert_eq!(repo.write_instruction().as_deref(), Some("save note"));
}

#[test]
fn fetch_with_sets_the_read_instruction_for_the_call() {
    let repo = RecordingRepository {
        rows: vec![vec![("id", Value::Integer(1)), ("title", Value::from("kept"))]],
        ..RecordingRepository::default()
    };
    let note = Entity::<Note>::with_repository(&repo);

    let count = note
        .fetch_with("recent notes", None, |rows| Ok(rows.count()))
        .unwrap();
    assert_eq!(count, 1);
    assert_eq!(repo.read_instruction().as_deref(), Some("recent notes"));
    assert_eq!(repo.get_calls.get(), 1);
}

#[test]
fn persist_with_sets_the_write_instruction_before_delegating() {
    let repo = RecordingRepository::default();
    let note = Entity::<Note>::with_repository(&repo);

    let result = note
        .persist_with("upsert note", &params([("title", "t"), ("body", "b")]))
        .unwrap();
    assert_eq!(result, 2);
    assert_eq!(repo.write_instruction().as_deref(), Some("upsert note"));
    assert_eq!(repo.set_calls.get(), 1);
}

#[test]
fn instruction_overrides_on_unbound_entity_are_state_errors() {
    let note = Entity::<Note>::new();

    let read_err = note.fetch_with("all notes", None, |_| Ok(())).unwrap_err();
    assert!(matches!(read_err, RepoError::State(StateError::Unbound)));

    let write_err = note
        .persist_with("save note", &params([("title", "t"), ("body", "b")]))
        .unwrap_err();
    assert!(matches!(write_err, RepoError::State(StateError::Unbound)));
}

#[test]
fn backend_failures_surface_unchanged() {
    let repo = RecordingRepository {
        fail_writes: true,
        ..ready_repository()
    };
    let note = Entity::<Note>::with_repository(&repo);

    let err = note
        .persist(&params([("title", "t"), ("body", "b")]))
        .unwrap_err();
    assert!(matches!(err, RepoError::Backend(_)));
    assert_eq!(err.to_string(), "backend error: store offline");
    assert!(err.source().is_some());
}
