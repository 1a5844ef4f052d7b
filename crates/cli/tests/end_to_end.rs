//! End-to-end scenarios run through the `emberc` binary itself, so they
//! exercise the exit codes and stdout/stderr formatting a user actually
//! sees (spec §8's concrete scenarios).

use std::io::Write;
use std::process::{Command, Output};

fn run_source(source: &str) -> Output {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(source.as_bytes()).unwrap();
    Command::new(env!("CARGO_BIN_EXE_emberc"))
        .arg(file.path())
        .output()
        .expect("failed to run emberc")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn arithmetic() {
    let out = run_source("print 1 + 2 * 3;");
    assert_eq!(stdout(&out).trim(), "7");
    assert_eq!(out.status.code(), Some(0));
}

#[test]
fn string_concatenation_round_trips_through_print() {
    let out = run_source(r#"print "hello" + " " + "world";"#);
    assert_eq!(stdout(&out).trim(), "hello world");
}

#[test]
fn closures_capture_their_enclosing_local() {
    let out = run_source(
        r#"
        fun makeCounter() {
            var n = 0;
            fun inc() { n = n + 1; return n; }
            return inc;
        }
        var counter = makeCounter();
        print counter();
        print counter();
        print counter();
        "#,
    );
    assert_eq!(stdout(&out).lines().collect::<Vec<_>>(), vec!["1", "2", "3"]);
}

#[test]
fn a_counter_class_with_init_tracks_state_across_calls() {
    let out = run_source(
        r#"
        class Counter {
            init() { this.n = 0; }
            tick() { this.n = this.n + 1; return this.n; }
        }
        var c = Counter();
        print c.tick();
        print c.tick();
        "#,
    );
    assert_eq!(stdout(&out).lines().collect::<Vec<_>>(), vec!["1", "2"]);
}

#[test]
fn a_for_loop_prints_zero_through_two() {
    let out = run_source("for (var i = 0; i < 3; i = i + 1) { print i; }");
    assert_eq!(stdout(&out).lines().collect::<Vec<_>>(), vec!["0", "1", "2"]);
}

#[test]
fn an_uninitialized_variable_is_nil() {
    let out = run_source("var x; print x;");
    assert_eq!(stdout(&out).trim(), "nil");
}

#[test]
fn arity_mismatch_is_a_runtime_error_with_a_stack_trace_and_exit_70() {
    let out = run_source("fun f(a, b) { return a + b; } f(1);");
    assert_eq!(out.status.code(), Some(70));
    assert!(stderr(&out).contains("Expected 2 arguments"), "{}", stderr(&out));
    assert!(stderr(&out).contains("in script"), "{}", stderr(&out));
}

#[test]
fn a_compile_error_exits_65() {
    let out = run_source("print 1 +;");
    assert_eq!(out.status.code(), Some(65));
    assert!(stderr(&out).contains("Expect expression"), "{}", stderr(&out));
}

#[test]
fn a_missing_file_exits_74() {
    let output = Command::new(env!("CARGO_BIN_EXE_emberc"))
        .arg("/nonexistent/path/does-not-exist.ember")
        .output()
        .expect("failed to run emberc");
    assert_eq!(output.status.code(), Some(74));
}

#[test]
fn inheritance_dispatches_through_super() {
    let out = run_source(
        r#"
        class Animal {
            speak() { return "..."; }
        }
        class Dog < Animal {
            speak() { return "Woof, " + super.speak(); }
        }
        print Dog().speak();
        "#,
    );
    assert_eq!(stdout(&out).trim(), "Woof, ...");
}
