mod common;

use among::ast::Node;
use among::{CompileOptions, Severity};
use common::*;

#[test]
fn objects_lists_and_primitives() {
    let out = compile_clean("point{x: 1, y: 2}\n[a, b]\nhello world");
    assert_eq!(rendered(&out), vec!["point{x: 1, y: 2}", "[a, b]", "hello world"]);
}

#[test]
fn line_breaks_separate_elements() {
    let out = compile_clean("[a\n  b\n\n  c]\n{\n  x: 1\n  y: 2\n}");
    assert_eq!(rendered(&out), vec!["[a, b, c]", "{x: 1, y: 2}"]);
}

#[test]
fn quoted_primitives_keep_delimiters() {
    let out = compile_clean(r#"["a, b", 'c: d']"#);
    let list = single(&out).as_list().unwrap();
    assert_eq!(list.values[0].as_primitive(), Some("a, b"));
    assert_eq!(list.values[1].as_primitive(), Some("c: d"));
}

#[test]
fn comments_are_ignored() {
    let out = compile_clean("// leading\n[a /* inline */, b] // trailing");
    assert_eq!(rendered(&out), vec!["[a, b]"]);
}

#[test]
fn names_must_touch_their_opener() {
    let out = compile_clean("tag[1]");
    assert_eq!(single(&out).name(), Some("tag"));
    let detached = compile("tag (1)");
    assert!(has_message(&detached, "expected a line break or ','"));
}

#[test]
fn redundant_commas_are_errors() {
    let out = compile("[a,,b]");
    assert_eq!(rendered(&out), vec!["[a, b]"]);
    assert!(has_message(&out, "redundant ','"));
    assert_eq!(out.reports[0].offset, Some(3));
}

#[test]
fn precedence_follows_priority() {
    let out = compile_clean("(1 + 2 * 3)");
    assert_eq!(*single(&out), op("+", vec![p("1"), op("*", vec![p("2"), p("3")])]));
}

#[test]
fn binary_operators_are_left_associative() {
    let out = compile_clean("(a - b - c)");
    assert_eq!(*single(&out), op("-", vec![op("-", vec![p("a"), p("b")]), p("c")]));
}

#[test]
fn assignment_is_right_associative() {
    let out = compile_clean("(a = b = c)");
    assert_eq!(*single(&out), op("=", vec![p("a"), op("=", vec![p("b"), p("c")])]));
}

#[test]
fn prefix_binds_tighter_than_binary() {
    let out = compile_clean("(-a * b)");
    assert_eq!(*single(&out), op("*", vec![op("-", vec![p("a")]), p("b")]));
}

#[test]
fn logical_and_comparison_levels() {
    let out = compile_clean("(a || b && c)\n(1 < 2 == x)");
    assert_eq!(
        *values(&out)[0],
        op("||", vec![p("a"), op("&&", vec![p("b"), p("c")])])
    );
    assert_eq!(
        *values(&out)[1],
        op("==", vec![op("<", vec![p("1"), p("2")]), p("x")])
    );
}

#[test]
fn decimal_points_are_not_accessors() {
    let out = compile_clean("(1.5 + x)");
    assert_eq!(*single(&out), op("+", vec![p("1.5"), p("x")]));
}

#[test]
fn unary_operations_collapse_by_default() {
    let out = compile_clean("((x - y) / 2)");
    assert_eq!(
        *single(&out),
        op("/", vec![op("-", vec![p("x"), p("y")]), p("2")])
    );
}

#[test]
fn collapse_can_be_disabled() {
    let options = CompileOptions {
        collapse_unary_operation: false,
        ..CompileOptions::default()
    };
    let out = compile_with(options, "((x - y) / 2)");
    assert!(out.is_success());
    let expected = op(
        "",
        vec![op(
            "/",
            vec![op("", vec![op("-", vec![p("x"), p("y")])]), p("2")],
        )],
    );
    assert_eq!(*single(&out), expected);
}

#[test]
fn named_operations_never_collapse() {
    let out = compile_clean("f(x)");
    assert_eq!(*single(&out), op("f", vec![p("x")]));
}

#[test]
fn accessor_builds_receiver_calls() {
    let out = compile_clean("(a.b)\n(a.f(x))");
    assert_eq!(*values(&out)[0], Node::list("b", vec![p("a")]));
    assert_eq!(
        *values(&out)[1],
        Node::list("f", vec![p("a"), op("", vec![p("x")])])
    );
}

#[test]
fn accessors_chain_left_to_right() {
    let out = compile_clean("(a.b.c)");
    assert_eq!(
        *single(&out),
        Node::list("c", vec![Node::list("b", vec![p("a")])])
    );
    assert_eq!(rendered(&out), vec!["c[b[a]]"]);
}

#[test]
fn duplicate_keys_keep_the_first_value() {
    let out = compile("{a: 1, a: 2}");
    assert_eq!(rendered(&out), vec!["{a: 1}"]);
    assert_eq!(with_severity(&out, Severity::Error).len(), 1);
    assert!(has_message(&out, "duplicate key 'a'"));

    let lenient = CompileOptions {
        allow_duplicate_properties: true,
        ..CompileOptions::default()
    };
    let out = compile_with(lenient, "{a: 1, a: 2}");
    assert!(out.is_success());
    assert_eq!(with_severity(&out, Severity::Warn).len(), 1);
}

#[test]
fn statement_keywords_stay_values_when_attached() {
    let out = compile_clean("use{path: x}\nmacro[1]");
    assert_eq!(values(&out)[0].name(), Some("use"));
    assert_eq!(values(&out)[1].name(), Some("macro"));
}

#[test]
fn display_parses_back_to_the_same_tree() {
    let out = compile_clean(
        "config{name: \"x, y\", items: [1, 2, a b], math: (a + b * -c), call: f(x, [y])}",
    );
    let original = single(&out).clone();
    let text = original.to_string();
    let again = compile_clean(&text);
    assert_eq!(*single(&again), original, "re-parsed from {text}");
}

#[test]
fn spans_cover_the_source_text() {
    let out = compile_clean("  point{x: 1}");
    let span = single(&out).span();
    assert_eq!((span.start, span.end), (2, 13));
}
