mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use common::{ScriptedTransport, capture_notices, lock, session, single_value, sql_error};
use pg_session::{
    Connecting, Error, ErrorHandler, ExecStatus, Guest, NoticeFlow, RawOutcome, Session,
    ToSqlText,
};
use pg_session::transport::PollingStatus;

#[test]
fn second_transaction_is_refused_until_the_first_unregisters() {
    let (mut session, _script) = session();
    let t1 = Guest::new("transaction", "t1");
    let t2 = Guest::new("transaction", "t2");

    session.register_transaction(&t1).unwrap();
    let err = session.register_transaction(&t2).unwrap_err();
    match err {
        Error::Usage(message) => {
            assert_eq!(
                message,
                "Started new transaction 't2' while transaction 't1' was still active."
            );
        }
        other => panic!("unexpected error: {other:?}"),
    }

    session.unregister_transaction(&t1);
    session.register_transaction(&t2).unwrap();
    assert_eq!(session.current_transaction().map(Guest::name), Some("t2"));
}

#[test]
fn registering_the_same_guest_twice() {
    let (mut session, _script) = session();
    let guest = Guest::new("transaction", "");
    session.register_transaction(&guest).unwrap();
    let err = session.register_transaction(&guest.clone()).unwrap_err();
    assert!(matches!(err, Error::Usage(m) if m == "Started twice: transaction"));
}

#[test]
fn mismatched_unregister_becomes_a_notice() {
    let (mut session, _script) = session();
    let notices = capture_notices(&session);
    let current = Guest::new("transaction", "a");
    let stranger = Guest::new("transaction", "b");

    session.unregister_transaction(&stranger);
    session.register_transaction(&current).unwrap();
    session.unregister_transaction(&stranger);

    let notices = notices.lock().unwrap();
    assert_eq!(
        *notices,
        vec![
            "Closed while not open: transaction 'b'\n".to_string(),
            "Closed transaction 'b'; expected to close transaction 'a'\n".to_string(),
        ]
    );
    assert!(session.current_transaction().is_none());
}

#[test]
fn moving_with_a_transaction_fails_and_leaves_the_source_alone() {
    let (mut session, _script) = session();
    let guest = Guest::new("transaction", "");
    session.register_transaction(&guest).unwrap();

    let err = session.take().unwrap_err();
    assert!(matches!(err, Error::Usage(m) if m == "Moving a connection with a transaction open."));
    assert!(session.is_open());
    assert!(session.current_transaction().is_some());
    session.unregister_transaction(&guest);
}

#[test]
fn take_leaves_a_closed_session_behind() {
    let (mut source, script) = session();
    let moved = source.take().unwrap();
    assert!(!source.is_open());
    assert!(moved.is_open());
    assert_eq!(moved.backend_pid(), 4242);
    assert_eq!(source.backend_pid(), 0);

    drop(source);
    assert!(!lock(&script).finished);
    drop(moved);
    assert!(lock(&script).finished);
}

#[test]
fn assign_closes_the_destination_first() {
    let (mut destination, old) = session();
    let (mut source, new) = session();

    destination.assign_from(&mut source).unwrap();
    assert!(lock(&old).finished);
    assert!(!lock(&new).finished);
    assert!(!source.is_open());

    destination.exec("SELECT 1").unwrap();
    assert_eq!(lock(&new).statements, vec!["SELECT 1"]);
}

#[test]
fn assign_onto_a_session_with_a_transaction_fails() {
    let (mut destination, _old) = session();
    let (mut source, _new) = session();
    let guest = Guest::new("transaction", "");
    destination.register_transaction(&guest).unwrap();

    let err = destination.assign_from(&mut source).unwrap_err();
    assert!(
        matches!(err, Error::Usage(m) if m == "Moving a connection onto one with a transaction open.")
    );
    assert!(source.is_open());
    destination.unregister_transaction(&guest);
}

struct CountingHandler {
    unregistered: AtomicUsize,
    order: Arc<Mutex<Vec<&'static str>>>,
    label: &'static str,
}

impl ErrorHandler for CountingHandler {
    fn handle(&self, _notice: &str) -> NoticeFlow {
        NoticeFlow::Continue
    }

    fn unregistered(&self) {
        self.unregistered.fetch_add(1, Ordering::SeqCst);
        self.order.lock().unwrap().push(self.label);
    }
}

#[test]
fn close_is_idempotent_and_reports_leftovers() {
    let (mut session, script) = session();
    let notices = capture_notices(&session);
    let order = Arc::new(Mutex::new(Vec::new()));
    let first = Arc::new(CountingHandler {
        unregistered: AtomicUsize::new(0),
        order: order.clone(),
        label: "first",
    });
    let second = Arc::new(CountingHandler {
        unregistered: AtomicUsize::new(0),
        order: order.clone(),
        label: "second",
    });
    session.register_error_handler(first.clone());
    session.register_error_handler(second.clone());
    let guest = Guest::new("transaction", "batch");
    session.register_transaction(&guest).unwrap();

    session.close().unwrap();
    session.close().unwrap();

    assert!(lock(&script).finished);
    assert!(!session.is_open());
    assert_eq!(first.unregistered.load(Ordering::SeqCst), 1);
    assert_eq!(*order.lock().unwrap(), vec!["second", "first"]);
    assert!(
        notices
            .lock()
            .unwrap()
            .contains(&"Closing connection while transaction 'batch' is still open.\n".to_string())
    );
    session.unregister_transaction(&guest);
}

#[test]
fn failed_teardown_still_releases_the_handle() {
    let (mut session, script) = session();
    lock(&script).fail_finish = true;

    assert!(matches!(session.close(), Err(Error::BrokenConnection(_))));
    assert!(!session.is_open());
    session.close().unwrap();
}

#[test]
fn results_outlive_their_session() {
    let (mut session, script) = session();
    lock(&script).outcomes.push_back(single_value("n", "7"));
    let notices = capture_notices(&session);

    let result = session.exec("SELECT 7 AS n").unwrap();
    drop(session);

    assert_eq!(result.get_as::<i32>(0, 0).unwrap(), 7);
    result.process_notice("late notice\n");
    assert_eq!(*notices.lock().unwrap(), vec!["late notice\n".to_string()]);
}

#[test]
fn server_errors_carry_diagnostics_and_query() {
    let (mut session, script) = session();
    lock(&script)
        .outcomes
        .push_back(sql_error("42P01", "relation \"nope\" does not exist"));

    let err = session.exec("SELECT * FROM nope").unwrap_err();
    assert_eq!(err.sqlstate(), Some("42P01"));
    match err {
        Error::Sql(sql) => {
            assert_eq!(sql.query, "SELECT * FROM nope");
            assert_eq!(sql.message(), "relation \"nope\" does not exist");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn missing_outcome_depends_on_the_link() {
    let (mut session, script) = session();
    lock(&script).broken = true;
    lock(&script).error = "server closed the connection unexpectedly".into();

    let err = session.exec("SELECT 1").unwrap_err();
    assert!(
        matches!(err, Error::BrokenConnection(m) if m == "Lost connection to the database server.")
    );
    assert!(err_is_broken(session.get_notifs()));
}

fn err_is_broken<T: std::fmt::Debug>(result: pg_session::Result<T>) -> bool {
    matches!(result, Err(e) if e.is_connection_broken())
}

#[test]
fn session_setup_checks_versions() {
    let script = common::Shared::default();
    lock(&script).protocol_version = 0;
    let err = Session::from_transport(Box::new(ScriptedTransport::new(script.clone()))).unwrap_err();
    assert!(matches!(err, Error::BrokenConnection(m) if m == "No connection."));
    assert!(lock(&script).finished);

    let script = common::Shared::default();
    lock(&script).protocol_version = 2;
    let err = Session::from_transport(Box::new(ScriptedTransport::new(script))).unwrap_err();
    assert!(matches!(err, Error::FeatureNotSupported(_)));

    let script = common::Shared::default();
    lock(&script).server_version = 80_400;
    let err = Session::from_transport(Box::new(ScriptedTransport::new(script))).unwrap_err();
    assert!(
        matches!(err, Error::FeatureNotSupported(m) if m == "Unsupported server version; 9.0 is the minimum.")
    );
}

#[test]
fn variables_are_set_and_shown_by_quoted_name() {
    let (mut session, script) = session();
    lock(&script).outcomes.push_back(RawOutcome::command("SET"));
    lock(&script).outcomes.push_back(single_value("search_path", "public"));

    session.set_variable("search_path", "public").unwrap();
    let value = session.get_variable("search_path").unwrap();

    assert_eq!(value, "public");
    assert_eq!(
        lock(&script).statements,
        vec!["SET \"search_path\"=public", "SHOW \"search_path\""]
    );
}

#[test]
fn prepared_statement_registry() {
    let (mut session, script) = session();

    session
        .prepare("by_id", "SELECT * FROM items WHERE id = $1")
        .unwrap();
    assert!(session.is_prepared("by_id"));
    session.exec_prepared("by_id", &[&5_i64]).unwrap();
    session.unprepare("by_id").unwrap();

    assert!(!session.is_prepared("by_id"));
    assert_eq!(session.prepared_statements().count(), 0);
    let script = lock(&script);
    assert_eq!(
        script.statements,
        vec![
            "PREPARE by_id AS SELECT * FROM items WHERE id = $1",
            "EXECUTE by_id",
            "DEALLOCATE \"by_id\"",
        ]
    );
    assert_eq!(script.params, vec![vec![Some("5".to_string())]]);
}

#[test]
fn exec_params_sends_null_for_none() {
    let (mut session, script) = session();
    let missing: Option<&str> = None;
    session
        .exec_params("INSERT INTO t VALUES ($1, $2)", &[&"it's", &missing])
        .unwrap();
    assert_eq!(
        lock(&script).params,
        vec![vec![Some("it's".to_string()), None]]
    );
}

#[test]
fn parameter_count_uses_the_full_unsigned_range() {
    let (mut session, script) = session();
    let one: &dyn ToSqlText = &1_i32;

    let many = vec![one; 40_000];
    session.exec_params("SELECT 1", &many).unwrap();
    assert_eq!(lock(&script).params[0].len(), 40_000);

    let too_many = vec![one; 65_536];
    assert!(matches!(
        session.exec_prepared("by_id", &too_many),
        Err(Error::Range(_))
    ));
    assert_eq!(lock(&script).statements, vec!["SELECT 1"]);
}

#[test]
fn adorned_names_never_repeat() {
    let (mut session, _script) = session();
    assert_eq!(session.adorn_name(""), "x1");
    assert_eq!(session.adorn_name("cursor"), "cursor_2");
    assert_eq!(session.adorn_name(""), "x3");
}

#[test]
fn escaping_round_trips() {
    let (session, _script) = session();
    let text = "it's a \\ back'slash, caf\u{e9} \u{65e5}\u{672c}";
    let literal = session.quote(text).unwrap();
    assert_eq!(session.unesc_literal(&literal).unwrap(), text);
    assert_eq!(session.quote(&None::<i32>).unwrap(), "NULL");
    assert_eq!(session.quote(&42).unwrap(), "'42'");

    let bytes: Vec<u8> = (0..=255).collect();
    assert_eq!(session.unesc_raw(&session.esc_raw(&bytes)).unwrap(), bytes);
    assert_eq!(session.quote_raw(b"\x01'"), "'\\x0127'::bytea");

    assert_eq!(session.quote_name("Order \"Items\"").unwrap(), "\"Order \"\"Items\"\"\"");
    assert_eq!(
        session.quote_table(&["sales", "orders"]).unwrap(),
        "\"sales\".\"orders\""
    );
    assert_eq!(session.esc_like("50%_off", '\\').unwrap(), "50\\%\\_off");
}

#[test]
fn escaping_without_standard_strings_doubles_backslashes() {
    let script = common::Shared::default();
    let transport =
        ScriptedTransport::new(script).with_param("standard_conforming_strings", "off");
    let session = Session::from_transport(Box::new(transport)).unwrap();

    assert_eq!(session.esc("a\\b").unwrap(), "a\\\\b");
    let literal = session.quote("a\\'b").unwrap();
    assert_eq!(session.unesc_literal(&literal).unwrap(), "a\\'b");
}

const AWKWARD: [&str; 9] = [
    "'", "\\", "\"", "%", "_", "n", "\u{e9}", "\u{20ac}", "\u{1f600}",
];

/// Every string of one to three pieces drawn from `AWKWARD`.
fn awkward_strings() -> Vec<String> {
    let mut all: Vec<String> = AWKWARD.iter().map(|s| s.to_string()).collect();
    for a in AWKWARD {
        for b in AWKWARD {
            all.push(format!("{a}{b}"));
            for c in AWKWARD {
                all.push(format!("{a}{b}{c}"));
            }
        }
    }
    all
}

#[test]
fn literals_round_trip_for_every_combination() {
    for standard in ["on", "off"] {
        let transport = ScriptedTransport::new(common::Shared::default())
            .with_param("standard_conforming_strings", standard);
        let session = Session::from_transport(Box::new(transport)).unwrap();

        for text in awkward_strings() {
            let literal = session.quote(text.as_str()).unwrap();
            assert_eq!(
                session.unesc_literal(&literal).unwrap(),
                text,
                "standard_conforming_strings={standard}, literal {literal}"
            );
            assert_eq!(literal, format!("'{}'", session.esc(&text).unwrap()));
        }

        for with_nul in ["\0", "a\0b", "\u{e9}\0"] {
            assert!(matches!(session.quote(with_nul), Err(Error::Argument(_))));
            assert!(matches!(session.esc(with_nul), Err(Error::Argument(_))));
        }
    }
}

#[test]
fn encoding_queries() {
    let (mut session, _script) = session();
    assert_eq!(session.encoding_id().unwrap(), 6);
    assert_eq!(session.client_encoding().unwrap(), "UTF8");

    session.set_client_encoding("LATIN1").unwrap();
    assert_eq!(session.client_encoding().unwrap(), "LATIN1");
    assert!(matches!(
        session.set_client_encoding("KLINGON"),
        Err(Error::Failure(m)) if m == "Setting client encoding failed."
    ));
}

#[test]
fn connection_details() {
    let (mut session, _script) = session();
    assert_eq!(session.dbname(), Some("shop"));
    assert_eq!(session.username(), Some("alice"));
    assert_eq!(session.hostname(), Some("localhost"));
    assert_eq!(session.port(), Some(5432));
    assert_eq!(session.server_version(), 160_000);
    assert_eq!(session.protocol_version(), 3);
    assert_eq!(session.connection_string().unwrap(), "user=alice dbname=shop");

    session.close().unwrap();
    assert!(matches!(session.connection_string(), Err(Error::Usage(_))));
    assert_eq!(session.protocol_version(), 0);
}

#[test]
fn two_step_execution() {
    let (mut session, script) = session();
    lock(&script).results.push_back(RawOutcome::command("UPDATE 3"));

    session.start_exec("UPDATE t SET x = 1").unwrap();
    let result = session.get_result().unwrap().unwrap();
    assert_eq!(result.affected_rows(), 3);
    assert_eq!(result.query(), "UPDATE t SET x = 1");
    assert!(session.get_result().unwrap().is_none());
    assert!(!session.is_busy());
}

#[test]
fn dropped_transaction_rolls_back_with_a_notice() {
    let (mut session, script) = session();
    let notices = capture_notices(&session);
    {
        let mut tx = pg_session::Transaction::named(&mut session, "import").unwrap();
        tx.exec("INSERT INTO t VALUES (1)").unwrap();
    }

    assert!(session.current_transaction().is_none());
    assert_eq!(
        lock(&script).statements,
        vec!["BEGIN", "INSERT INTO t VALUES (1)", "ROLLBACK"]
    );
    assert_eq!(
        *notices.lock().unwrap(),
        vec!["transaction 'import' was never closed properly!\n".to_string()]
    );
}

#[test]
fn run_transaction_commits_or_rolls_back() {
    let (mut session, script) = session();

    let answer = session
        .run_transaction(|tx| {
            tx.exec("INSERT INTO t VALUES (1)")?;
            Ok(42)
        })
        .unwrap();
    assert_eq!(answer, 42);

    let err = session
        .run_transaction(|tx| {
            tx.exec("INSERT INTO t VALUES (2)")?;
            Err::<(), _>(Error::Usage("changed my mind".into()))
        })
        .unwrap_err();
    assert!(matches!(err, Error::Usage(_)));

    assert_eq!(
        lock(&script).statements,
        vec![
            "BEGIN",
            "INSERT INTO t VALUES (1)",
            "COMMIT",
            "BEGIN",
            "INSERT INTO t VALUES (2)",
            "ROLLBACK",
        ]
    );
    assert!(session.current_transaction().is_none());
}

#[test]
fn commit_on_a_dying_link_is_in_doubt() {
    let (mut session, script) = session();
    let tx = pg_session::Transaction::begin(&mut session).unwrap();
    lock(&script).broken = true;

    let err = tx.commit().unwrap_err();
    assert!(matches!(err, Error::InDoubt(_)), "{err:?}");
    assert!(err.is_connection_broken());
    assert!(session.current_transaction().is_none());
    assert_eq!(lock(&script).statements, vec!["BEGIN", "COMMIT"]);
}

#[test]
fn rejected_commit_is_a_plain_server_error() {
    let (mut session, script) = session();
    let tx = pg_session::Transaction::begin(&mut session).unwrap();
    lock(&script)
        .outcomes
        .push_back(sql_error("40001", "could not serialize access"));

    let err = tx.commit().unwrap_err();
    assert_eq!(err.sqlstate(), Some("40001"));
    assert!(session.current_transaction().is_none());
}

#[test]
fn transaction_notify_and_row_count_checks() {
    let (mut session, script) = session();
    {
        let mut script = lock(&script);
        script.outcomes.push_back(RawOutcome::command("BEGIN"));
        script.outcomes.push_back(single_value("pg_notify", ""));
        script.outcomes.push_back(single_value("id", "7"));
        script.outcomes.push_back(RawOutcome::command("SELECT 0"));
    }

    let mut tx = pg_session::Transaction::begin(&mut session).unwrap();
    tx.notify("orders", "it's shipped").unwrap();
    assert_eq!(tx.exec_n(1, "SELECT id FROM t").unwrap().len(), 1);
    let err = tx.exec_n(2, "SELECT id FROM t WHERE false").unwrap_err();
    assert!(matches!(
        err,
        Error::Range(m) if m.starts_with("Expected 2 rows from query, got 0.")
    ));
    tx.commit().unwrap();

    let script = lock(&script);
    assert_eq!(script.statements[1], "SELECT pg_notify($1, $2)");
    assert_eq!(
        script.params,
        vec![vec![
            Some("orders".to_string()),
            Some("it's shipped".to_string())
        ]]
    );
}

#[test]
fn password_encryption_follows_the_server_setting() {
    let (mut session, script) = session();
    lock(&script)
        .outcomes
        .push_back(single_value("password_encryption", "md5"));

    assert_eq!(
        session.encrypt_password("alice", "secret", None).unwrap(),
        "md54a0a68b43b6cd5cf266fa02f196e2371"
    );
    assert!(
        session
            .encrypt_password("alice", "secret", Some("scram-sha-256"))
            .unwrap()
            .starts_with("SCRAM-SHA-256$4096:")
    );
    assert_eq!(
        lock(&script).statements,
        vec!["SHOW \"password_encryption\""]
    );
}

#[test]
fn transaction_blocks_a_second_one() {
    let (mut session, _script) = session();
    let guest = Guest::new("subtransaction", "inner");
    session.register_transaction(&guest).unwrap();
    let err = pg_session::Transaction::begin(&mut session).unwrap_err();
    assert!(matches!(
        err,
        Error::Usage(m) if m == "Started new transaction while subtransaction 'inner' was still active."
    ));
    session.unregister_transaction(&guest);
}

#[test]
fn connecting_reports_readiness_until_done() {
    let script = common::Shared::default();
    lock(&script).polls.extend([
        PollingStatus::Writing,
        PollingStatus::Reading,
        PollingStatus::Ok,
    ]);

    let mut connecting =
        Connecting::from_transport(Box::new(ScriptedTransport::new(script))).unwrap();
    assert!(connecting.wait_to_write());
    assert!(!connecting.done());

    connecting.process().unwrap();
    assert!(connecting.wait_to_read());
    connecting.process().unwrap();
    assert!(connecting.done());

    let session = connecting.produce().unwrap();
    assert!(session.is_open());
}

#[test]
fn connecting_refuses_to_produce_early() {
    let script = common::Shared::default();
    lock(&script).polls.push_back(PollingStatus::Reading);
    let connecting = Connecting::from_transport(Box::new(ScriptedTransport::new(script))).unwrap();

    let err = connecting.produce().unwrap_err();
    assert!(matches!(
        err,
        Error::Usage(m) if m == "Tried to produce a nonblocking connection before it was done."
    ));
}

#[test]
fn connecting_failure_is_a_broken_connection() {
    let script = common::Shared::default();
    {
        let mut s = lock(&script);
        s.polls.push_back(PollingStatus::Failed);
        s.error = "password authentication failed".into();
    }
    let err = Connecting::from_transport(Box::new(ScriptedTransport::new(script))).unwrap_err();
    assert!(matches!(err, Error::BrokenConnection(m) if m == "password authentication failed"));
}

#[test]
fn plain_results_have_no_copy_state() {
    let (mut session, _script) = session();
    let result = session.exec("CREATE TABLE t (x int)").unwrap();
    assert_eq!(result.status(), ExecStatus::CommandOk);
    assert_eq!(session.copy_state(), pg_session::CopyState::Idle);
}
