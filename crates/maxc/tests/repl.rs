//! Tests for the stateful REPL session.
//!
//! The session keeps the analyzer scope, literal pool, heap and global array
//! alive between submissions; each feed compiles and executes only the new
//! snippet.

use maxc::{CollectStringPrint, ReplError, ReplSession};
use pretty_assertions::assert_eq;

fn feed(session: &mut ReplSession, line: &str) -> Option<String> {
    let mut out = CollectStringPrint::new();
    session.feed(line, &mut out).expect("snippet should run")
}

#[test]
fn expressions_echo_value_and_type() {
    let mut session = ReplSession::new();
    assert_eq!(feed(&mut session, "1 + 2 * 3"), Some("7: int".to_owned()));
    assert_eq!(feed(&mut session, "1.5 + 0.5"), Some("2.0: float".to_owned()));
    assert_eq!(feed(&mut session, "\"a\" + \"b\""), Some("\"ab\": string".to_owned()));
}

#[test]
fn globals_persist_between_submissions() {
    let mut session = ReplSession::new();
    assert_eq!(feed(&mut session, "let a = 40;"), None);
    assert_eq!(feed(&mut session, "a = a + 2;"), None);
    assert_eq!(feed(&mut session, "a"), Some("42: int".to_owned()));
}

#[test]
fn functions_persist_between_submissions() {
    let mut session = ReplSession::new();
    feed(&mut session, "fn inc(x: int): int = x + 1;");
    assert_eq!(feed(&mut session, "inc(41)"), Some("42: int".to_owned()));
}

#[test]
fn user_types_persist_between_submissions() {
    let mut session = ReplSession::new();
    feed(&mut session, "object P { x: int, y: int }");
    feed(&mut session, "let p = new P { x: 5, y: 6 };");
    assert_eq!(feed(&mut session, "p.x + p.y"), Some("11: int".to_owned()));
}

#[test]
fn operator_overloads_persist_between_submissions() {
    let mut session = ReplSession::new();
    feed(&mut session, "object V { x: int }");
    feed(&mut session, "fn `+`(a: V, b: V): V = new V { x: a.x + b.x };");
    feed(&mut session, "let v = new V { x: 20 } + new V { x: 22 };");
    assert_eq!(feed(&mut session, "v.x"), Some("42: int".to_owned()));
}

#[test]
fn statement_submissions_echo_nothing() {
    let mut session = ReplSession::new();
    let mut out = CollectStringPrint::new();
    let echo = session.feed("println(7);", &mut out).expect("snippet should run");
    assert_eq!(echo, None);
    assert_eq!(out.take(), "7\n");
}

#[test]
fn a_missing_semicolon_is_supplied() {
    let mut session = ReplSession::new();
    assert_eq!(feed(&mut session, "let x = 1"), None);
    assert_eq!(feed(&mut session, "x"), Some("1: int".to_owned()));
}

#[test]
fn compile_errors_leave_the_session_usable() {
    let mut session = ReplSession::new();
    let mut out = CollectStringPrint::new();
    let err = session.feed("zzz", &mut out).expect_err("unknown name");
    match err {
        ReplError::Compile(diags) => {
            assert!(diags.has_message("undeclared variable: zzz"), "{diags}");
        }
        ReplError::Runtime(err) => panic!("expected a compile error, got {err}"),
    }
    assert_eq!(feed(&mut session, "1 + 1"), Some("2: int".to_owned()));
}

#[test]
fn runtime_errors_leave_the_session_usable() {
    let mut session = ReplSession::new();
    let mut out = CollectStringPrint::new();
    let err = session.feed("1 / 0", &mut out).expect_err("division by zero");
    match err {
        ReplError::Runtime(err) => assert_eq!(err.message, "division by zero"),
        ReplError::Compile(diags) => panic!("expected a runtime error, got {diags}"),
    }
    assert_eq!(feed(&mut session, "6 * 7"), Some("42: int".to_owned()));
}

#[test]
fn discarded_temporaries_are_freed() {
    let mut session = ReplSession::new();
    // the concatenation allocates three strings; nothing holds them afterwards
    feed(&mut session, "println(\"x\" + \"y\");");
    assert_eq!(session.heap_stats().live_objects, 0);
}

#[test]
fn globals_hold_their_heap_references_until_teardown() {
    let mut session = ReplSession::new();
    feed(&mut session, "let s = \"abc\";");
    assert_eq!(session.heap_stats().live_objects, 1);

    // echoing clones and releases; the count is unchanged afterwards
    assert_eq!(feed(&mut session, "s"), Some("\"abc\": string".to_owned()));
    assert_eq!(session.heap_stats().live_objects, 1);

    session.teardown();
    assert_eq!(session.heap_stats().live_objects, 0);
}

#[test]
fn list_reassignment_releases_the_old_value() {
    let mut session = ReplSession::new();
    feed(&mut session, "let xs = [1, 2, 3];");
    assert_eq!(session.heap_stats().live_objects, 1);
    feed(&mut session, "xs = [4];");
    assert_eq!(session.heap_stats().live_objects, 1);
}
