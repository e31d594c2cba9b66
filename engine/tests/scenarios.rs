//! End-to-end scenarios for replica-engine
//!
//! Optimistic mutation, server confirmation, batched diffs, versioned
//! updates, and persistence round trips.

use proptest::prelude::*;
use replica_engine::{
    Collection, CollectionSchema, DiffOp, Engine, FieldDef, FieldType, Item, ManualClock,
    MutateOptions, Mutable, Mutation, OpResult, RebaseOptions, RejectReason, Schema, State,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::Write;
use std::sync::{Arc, Mutex};

#[derive(Deserialize)]
struct ToggleTodo {
    id: String,
    completed: bool,
}

fn todo_schema() -> Schema {
    Schema::new(1)
        .with_collection(CollectionSchema::new(
            "todos",
            vec![
                FieldDef::synced("title", FieldType::String).nullable(),
                FieldDef::synced("completed", FieldType::Bool).with_default(json!(false)),
                FieldDef::local("editing", FieldType::Bool).with_default(json!(false)),
            ],
        ))
        .unwrap()
        .with_collection(
            CollectionSchema::new("docs", vec![FieldDef::synced("body", FieldType::String)])
                .versioned(),
        )
        .unwrap()
        .with_mutation(
            Mutation::new("createTodo", |draft, input| {
                if let (Some(id), Some(doc)) = (input["id"].as_str(), input.as_object()) {
                    draft.insert("todos", id, doc.clone());
                }
            })
            .with_input_shape(vec![
                FieldDef::synced("id", FieldType::String),
                FieldDef::synced("title", FieldType::String),
                FieldDef::synced("completed", FieldType::Bool),
            ]),
        )
        .unwrap()
        .with_mutation(Mutation::typed(
            "toggleTodo",
            |draft: &mut State, input: ToggleTodo| {
                draft.set_field("todos", &input.id, "completed", json!(input.completed));
            },
        ))
        .unwrap()
}

fn engine() -> Engine {
    Engine::with_clock(todo_schema(), Arc::new(ManualClock::new(1_706_745_600_000)))
}

fn create_todo(engine: &mut Engine, id: &str, title: &str) -> String {
    engine
        .mutate(
            "createTodo",
            json!({"id": id, "title": title, "completed": false}),
            MutateOptions::default(),
        )
        .unwrap()
        .unwrap()
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn scenario_a_optimistic_create() {
    let mut engine = engine();
    create_todo(&mut engine, "t1", "X");

    assert_eq!(engine.pending_mutations().len(), 1);
    assert_eq!(
        engine.state().field("todos", "t1", "completed"),
        Some(&json!(false))
    );
    assert!(engine.server_state().get("todos", "t1").is_none());
}

#[test]
fn scenario_b_rebase_then_commit() {
    let mut engine = engine();
    let id = create_todo(&mut engine, "t1", "X");

    engine
        .rebase(
            &json!({"todos": [{"id": "t1", "completed": true}]}),
            RebaseOptions::default(),
        )
        .unwrap();
    // Still pending: the optimistic create is replayed over the server copy.
    assert_eq!(
        engine.state().field("todos", "t1", "completed"),
        Some(&json!(false))
    );

    assert_eq!(engine.commit([&id]), 1);
    assert!(engine.pending_mutations().is_empty());
    assert_eq!(
        engine.state().field("todos", "t1", "completed"),
        Some(&json!(true))
    );
}

#[test]
fn scenario_c_batch_with_partial_rejection() {
    let clock = ManualClock::new(10_000);
    let mut todos = Collection::new("todos");
    todos.apply_diff(
        &[DiffOp::create(
            "seed",
            Item::new("t0").with_mutable("title", json!("seed"), 100),
        )],
        &clock,
    );
    let before = todos.len();

    let results = todos.apply_diff(
        &[
            DiffOp::create("op1", Item::new("t1").with_mutable("title", json!("A"), 200)),
            DiffOp::create("op2", Item::new("t0").with_mutable("title", json!("dup"), 200)),
            DiffOp::create("op3", Item::new("t2").with_mutable("title", json!("B"), 200)),
            DiffOp::update(
                "op4",
                "missing",
                [("title".to_string(), Mutable::at(json!("C"), 300))],
            ),
        ],
        &clock,
    );

    assert_eq!(results["op1"], OpResult::accepted());
    assert_eq!(results["op2"], OpResult::rejected(RejectReason::DuplicateId));
    assert_eq!(results["op3"], OpResult::accepted());
    assert_eq!(results["op4"], OpResult::rejected(RejectReason::NotFound));
    assert_eq!(todos.len(), before + 2);
    assert_eq!(todos.get("t0").unwrap().get("title"), Some(&json!("seed")));
}

#[test]
fn scenario_d_versioned_collection_never_regresses() {
    let mut engine = engine();
    engine
        .rebase(
            &json!({"docs": [{"id": "d1", "body": "fresh", "$version": 5}]}),
            RebaseOptions::default(),
        )
        .unwrap();
    engine
        .rebase(
            &json!({"docs": [{"id": "d1", "body": "stale", "$version": 3}]}),
            RebaseOptions::default(),
        )
        .unwrap();

    let state = engine.state();
    assert_eq!(state.field("docs", "d1", "$version"), Some(&json!(5)));
    assert_eq!(state.field("docs", "d1", "body"), Some(&json!("fresh")));
}

// ============================================================================
// Rebase semantics
// ============================================================================

#[test]
fn replay_preserves_queue_order() {
    let mut engine = engine();
    create_todo(&mut engine, "t1", "X");
    for completed in [true, false, true] {
        engine
            .mutate(
                "toggleTodo",
                json!({"id": "t1", "completed": completed}),
                MutateOptions::default(),
            )
            .unwrap();
    }
    engine
        .rebase(&json!({"todos": [{"id": "t9", "title": "other"}]}), RebaseOptions::default())
        .unwrap();

    assert_eq!(engine.queue().len(), 4);
    assert_eq!(
        engine.state().field("todos", "t1", "completed"),
        Some(&json!(true))
    );
}

#[test]
fn rebase_gates_local_fields() {
    let mut engine = engine();
    engine
        .rebase(
            &json!({"todos": [{"id": "t1", "title": "A", "editing": true}]}),
            RebaseOptions::default(),
        )
        .unwrap();
    assert_eq!(
        engine.server_state().field("todos", "t1", "editing"),
        Some(&json!(false))
    );

    engine
        .rebase(
            &json!({"todos": [{"id": "t1", "editing": true}]}),
            RebaseOptions {
                allow_local_fields: true,
                ..RebaseOptions::default()
            },
        )
        .unwrap();
    assert_eq!(
        engine.server_state().field("todos", "t1", "editing"),
        Some(&json!(true))
    );
}

#[test]
fn invalid_input_is_not_queued() {
    let mut engine = engine();
    let err = engine
        .mutate("createTodo", json!({"id": "t1"}), MutateOptions::default())
        .unwrap_err();
    assert!(err.to_string().starts_with("invalid input for mutation 'createTodo'"));

    let err = engine
        .mutate("toggleTodo", json!({"id": "t1"}), MutateOptions::default())
        .unwrap_err();
    assert!(matches!(err, replica_engine::Error::InvalidInput { .. }));
    assert!(engine.queue().is_empty());
}

#[test]
fn engines_are_independent_and_sendable() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Engine>();

    let handles: Vec<_> = (0..4)
        .map(|n| {
            std::thread::spawn(move || {
                let mut engine = engine();
                for i in 0..=n {
                    create_todo(&mut engine, &format!("t{i}"), "x");
                }
                engine.queue().len()
            })
        })
        .collect();

    let counts: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(counts, vec![1, 2, 3, 4]);
}

// ============================================================================
// Persistence
// ============================================================================

#[test]
fn persist_restore_roundtrip() {
    let mut engine = engine();
    engine
        .rebase(&json!({"todos": [{"id": "s1", "title": "server"}]}), RebaseOptions::default())
        .unwrap();
    create_todo(&mut engine, "t1", "X");
    engine
        .mutate(
            "toggleTodo",
            json!({"id": "t1", "completed": true}),
            MutateOptions::local(),
        )
        .unwrap();

    let payload = engine.persist().unwrap();
    let restored = Engine::restore(todo_schema(), &payload).unwrap();

    assert_eq!(restored.state(), engine.state());
    assert_eq!(restored.server_state(), engine.server_state());
    assert_eq!(restored.queue(), engine.queue());
    assert_eq!(restored.pending_mutations(), engine.pending_mutations());
    assert_eq!(restored.persist().unwrap(), payload);
}

#[test]
fn restore_with_wrong_schema_version_fails() {
    let engine = engine();
    let payload = engine.persist().unwrap();

    let mut newer = todo_schema();
    newer.version = 2;
    assert!(matches!(
        Engine::restore(newer, &payload),
        Err(replica_engine::Error::SchemaVersionMismatch { expected: 2, actual: 1 })
    ));
}

/// Collects formatted log output for assertions.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[test]
fn unregistered_mutation_at_replay_warns_and_skips() {
    let mut engine = engine();
    create_todo(&mut engine, "t1", "X");
    let payload = engine.persist().unwrap();

    // Same schema minus the createTodo handler.
    let without_handler = Schema::new(1)
        .with_collection(todo_schema().get_collection("todos").unwrap().clone())
        .unwrap()
        .with_collection(todo_schema().get_collection("docs").unwrap().clone())
        .unwrap();

    let logs = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_max_level(tracing::Level::WARN)
        .with_ansi(false)
        .finish();

    let restored = tracing::subscriber::with_default(subscriber, || {
        Engine::restore(without_handler, &payload)
    })
    .unwrap();

    assert_eq!(restored.queue().len(), 1);
    assert!(restored.state().get("todos", "t1").is_none());
    assert_eq!(restored.state(), restored.server_state());

    let output = logs.contents();
    assert!(output.contains("WARN"));
    assert!(output.contains("no handler for queued mutation"));
    assert!(output.contains("createTodo"));
}

// ============================================================================
// Properties
// ============================================================================

#[derive(Debug, Clone)]
enum Step {
    Create(u8),
    Toggle(u8, bool),
    LocalToggle(u8, bool),
    Server(u8, bool),
    CommitOldest,
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0u8..5).prop_map(Step::Create),
        (0u8..5, any::<bool>()).prop_map(|(id, c)| Step::Toggle(id, c)),
        (0u8..5, any::<bool>()).prop_map(|(id, c)| Step::LocalToggle(id, c)),
        (0u8..5, any::<bool>()).prop_map(|(id, c)| Step::Server(id, c)),
        Just(Step::CommitOldest),
    ]
}

fn run(engine: &mut Engine, step: &Step) {
    match step {
        Step::Create(id) => {
            create_todo(engine, &format!("t{id}"), "x");
        }
        Step::Toggle(id, completed) | Step::LocalToggle(id, completed) => {
            let options = if matches!(step, Step::LocalToggle(..)) {
                MutateOptions::local()
            } else {
                MutateOptions::default()
            };
            engine
                .mutate(
                    "toggleTodo",
                    json!({"id": format!("t{id}"), "completed": completed}),
                    options,
                )
                .unwrap();
        }
        Step::Server(id, completed) => {
            engine
                .rebase(
                    &json!({"todos": [{"id": format!("t{id}"), "completed": completed}]}),
                    RebaseOptions::default(),
                )
                .unwrap();
        }
        Step::CommitOldest => {
            let oldest = engine.queue().first().map(|m| m.id.clone());
            if let Some(id) = oldest {
                engine.commit([id]);
            }
        }
    }
}

/// Value of the update with the greatest clamped timestamp; ties go to the later one.
fn expected_winner(initial: (i64, u64), updates: &[(i64, u64)], now: u64) -> i64 {
    let mut best = (initial.0, initial.1.min(now));
    for &(value, ts) in updates {
        let ts = ts.min(now);
        if ts >= best.1 {
            best = (value, ts);
        }
    }
    best.0
}

proptest! {
    #[test]
    fn prop_last_write_wins(
        updates in prop::collection::vec((any::<i64>(), 0u64..2_000), 1..20),
    ) {
        let now = 1_000;
        let clock = ManualClock::new(now);
        let mut items = Collection::new("items");
        items.apply_diff(
            &[DiffOp::create("seed", Item::new("i1").with_mutable("n", json!(0), 0))],
            &clock,
        );

        let ops: Vec<DiffOp> = updates
            .iter()
            .enumerate()
            .map(|(i, (value, ts))| {
                DiffOp::update(
                    format!("op{i}"),
                    "i1",
                    [("n".to_string(), Mutable::at(json!(value), *ts))],
                )
            })
            .collect();
        items.apply_diff(&ops, &clock);

        let stored = items.get("i1").unwrap().field("n").unwrap();
        prop_assert_eq!(&stored.value, &json!(expected_winner((0, 0), &updates, now)));
        prop_assert!(stored.changed_at <= now);
    }

    #[test]
    fn prop_clamping_keeps_value(
        ts in any::<u64>(),
        now in 0u64..u64::MAX / 2,
        value in any::<i64>(),
    ) {
        let clock = ManualClock::new(now);
        let mut items = Collection::new("items");
        items.apply_diff(
            &[DiffOp::create("c", Item::new("i1").with_mutable("n", json!(value), ts))],
            &clock,
        );

        let stored = items.get("i1").unwrap().field("n").unwrap();
        prop_assert!(stored.changed_at <= now);
        prop_assert_eq!(&stored.value, &json!(value));
    }

    #[test]
    fn prop_float_fields_survive_persist_restore(
        xs in prop::collection::vec(
            prop::num::f64::NORMAL | prop::num::f64::SUBNORMAL | prop::num::f64::ZERO,
            1..10,
        ),
    ) {
        let schema = || {
            Schema::new(1)
                .with_collection(CollectionSchema::new(
                    "points",
                    vec![FieldDef::synced("x", FieldType::Float)],
                ))
                .unwrap()
        };
        let mut engine = Engine::with_clock(schema(), Arc::new(ManualClock::new(0)));
        let points: Vec<_> = xs
            .iter()
            .enumerate()
            .map(|(i, x)| json!({"id": format!("p{i}"), "x": x}))
            .collect();
        engine.rebase(&json!({ "points": points }), RebaseOptions::default()).unwrap();

        let payload = engine.persist().unwrap();
        let restored = Engine::restore(schema(), &payload).unwrap();
        prop_assert_eq!(restored.state(), engine.state());
        prop_assert_eq!(restored.persist().unwrap(), payload);
        for (i, x) in xs.iter().enumerate() {
            let stored = restored
                .state()
                .field("points", &format!("p{i}"), "x")
                .and_then(Value::as_f64);
            prop_assert_eq!(stored.map(f64::to_bits), Some(x.to_bits()));
        }
    }

    #[test]
    fn prop_persist_restore_roundtrip(steps in prop::collection::vec(arb_step(), 0..30)) {
        let mut engine = engine();
        for step in &steps {
            run(&mut engine, step);
        }

        let payload = engine.persist().unwrap();
        let restored = Engine::restore(todo_schema(), &payload).unwrap();
        prop_assert_eq!(restored.state(), engine.state());
        prop_assert_eq!(restored.pending_mutations(), engine.pending_mutations());

        // Repeated cycles are stable.
        let again = Engine::restore(todo_schema(), &restored.persist().unwrap()).unwrap();
        prop_assert_eq!(again.persist().unwrap(), payload);
    }

    #[test]
    fn prop_computed_state_is_replay_of_queue(steps in prop::collection::vec(arb_step(), 0..30)) {
        let mut engine = engine();
        for step in &steps {
            run(&mut engine, step);
        }

        let schema = todo_schema();
        let mut expected = State::clone(&engine.server_state());
        for pending in engine.queue() {
            schema.mutation(&pending.name).unwrap().apply(&mut expected, &pending.input);
        }
        prop_assert_eq!(&*engine.state(), &expected);
    }

    #[test]
    fn prop_rebase_commit_commutes(completed in any::<bool>(), title in "[a-z]{1,8}") {
        let update = json!({"todos": [{"id": "t1", "title": title, "completed": completed}]});

        let mut a = engine();
        let id_a = a
            .mutate(
                "createTodo",
                json!({"id": "t1", "title": title, "completed": completed}),
                MutateOptions::default(),
            )
            .unwrap()
            .unwrap();
        a.rebase(&update, RebaseOptions::default()).unwrap();
        a.commit([&id_a]);

        let mut b = engine();
        let id_b = b
            .mutate(
                "createTodo",
                json!({"id": "t1", "title": title, "completed": completed}),
                MutateOptions::default(),
            )
            .unwrap()
            .unwrap();
        b.commit([&id_b]);
        b.rebase(&update, RebaseOptions::default()).unwrap();

        prop_assert_eq!(a.state(), b.state());
        prop_assert!(a.queue().is_empty() && b.queue().is_empty());
    }
}

#[test]
fn expected_winner_ties_go_to_later_update() {
    assert_eq!(expected_winner((0, 0), &[(1, 5), (2, 5)], 10), 2);
    assert_eq!(expected_winner((0, 0), &[(1, 50), (2, 20)], 10), 2);
    assert_eq!(expected_winner((0, 0), &[(1, 8), (2, 5)], 10), 1);
}
