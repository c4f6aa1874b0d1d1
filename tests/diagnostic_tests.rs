mod common;

use among::diagnostics::ErrorType;
use among::{CompileOptions, EscapePolicy, Severity};
use common::*;

fn escapes(policy: EscapePolicy) -> CompileOptions {
    CompileOptions {
        invalid_unicode_escape: policy,
        ..CompileOptions::default()
    }
}

#[test]
fn invalid_unicode_escape_follows_policy() {
    let text = r#""\uZZZZ""#;

    let out = compile_with(escapes(EscapePolicy::Error), text);
    assert_eq!(single(&out).as_primitive(), Some("uZZZZ"));
    assert_eq!(out.reports.len(), 1);
    assert_eq!(out.reports[0].kind, ErrorType::Lexical);
    assert_eq!(out.reports[0].severity, Severity::Error);

    let out = compile_with(escapes(EscapePolicy::Warn), text);
    assert_eq!(single(&out).as_primitive(), Some("uZZZZ"));
    assert_eq!(with_severity(&out, Severity::Warn).len(), 1);

    let out = compile_with(escapes(EscapePolicy::Ignore), text);
    assert_eq!(single(&out).as_primitive(), Some("uZZZZ"));
    assert!(out.reports.is_empty());
}

#[test]
fn valid_escapes_decode() {
    let out = compile_clean(r#"["a\tb", "é", "\U01F600"]"#);
    let list = single(&out).as_list().unwrap();
    assert_eq!(list.values[0].as_primitive(), Some("a\tb"));
    assert_eq!(list.values[1].as_primitive(), Some("\u{e9}"));
    assert_eq!(list.values[2].as_primitive(), Some("\u{1F600}"));
}

#[test]
fn unterminated_literals_and_comments() {
    let out = compile("\"abc");
    assert!(has_message(&out, "unterminated quoted literal"));
    assert_eq!(single(&out).as_primitive(), Some("abc"));

    let out = compile("[a]\n/* never closed");
    assert!(has_message(&out, "unterminated block comment"));
    assert_eq!(rendered(&out), vec!["[a]"]);
}

#[test]
fn parsing_continues_after_errors() {
    let out = compile("{a 1}\n[b]");
    assert!(has_message(&out, "expected ':' after key 'a 1'"));
    assert_eq!(rendered(&out), vec!["{}", "[b]"]);
    assert_eq!(out.error_count(), 1);
}

#[test]
fn statements_need_separators() {
    let out = compile("[a] [b]\n[c]");
    assert!(has_message(&out, "expected a line break or ','"));
    assert_eq!(rendered(&out), vec!["[a]", "[c]"]);
    assert_eq!(out.error_count(), 1);
}

#[test]
fn unclosed_groups_point_at_their_opener() {
    let out = compile("x\n  [a, b");
    let report = out.errors().next().unwrap();
    assert!(report.message.contains("unclosed group"));
    assert_eq!(report.offset, Some(4));
}

#[test]
fn unclosed_inner_groups_leave_the_outer_closer_alone() {
    let out = compile("[a, (b]\n[c]");
    assert_eq!(out.error_count(), 1, "{}", out.render_reports());
    let report = out.errors().next().unwrap();
    assert!(report.message.contains("unclosed group; expected ')'"));
    assert_eq!(report.offset, Some(4));
    assert_eq!(rendered(&out), vec!["[a, b]", "[c]"]);

    let out = compile("{a: [1, 2}\nok");
    assert_eq!(out.error_count(), 1, "{}", out.render_reports());
    assert!(has_message(&out, "unclosed group; expected ']'"));
    assert_eq!(rendered(&out), vec!["{a: [1, 2]}", "ok"]);
}

#[test]
fn stray_closers_are_still_skipped() {
    let out = compile("[a] ]\n[b]");
    assert_eq!(rendered(&out), vec!["[a]", "[b]"]);
    assert_eq!(out.error_count(), 1);
}

#[test]
fn unresolved_imports_are_resolution_errors() {
    let out = compile("use missing");
    let report = out.errors().next().unwrap();
    assert_eq!(report.kind, ErrorType::Resolution);
    assert!(report.message.contains("cannot resolve import 'missing'"));
    assert_eq!(report.offset, Some(4));
}

#[test]
fn reports_render_with_location_and_hints() {
    let out = compile("ok\n[a,,b]");
    let text = out.render_reports();
    assert!(text.starts_with("error[syntax]: redundant ','"), "{text}");
    assert!(text.contains("test:2:4"), "{text}");
}

#[test]
fn reports_render_through_miette() {
    let out = compile("macro h[a, b]: x\nh[1]");
    let report = out.errors().next().unwrap().clone();
    let rendered = format!("{:?}", miette::Report::new(report.with_source(&out.source)));
    assert!(rendered.contains("among::macro"), "{rendered}");
    assert!(rendered.contains("declared as macro h[a, b]"), "{rendered}");
}

#[test]
fn template_errors_do_not_register_the_macro() {
    let out = compile("macro broken[x]: {x}\nbroken[1]");
    assert!(!out.is_success());
    assert!(out.definitions.macros.is_empty());
}

#[test]
fn reports_serialize_to_json() {
    let out = compile("[a,,b]");
    let json = serde_json::to_value(&out.reports).unwrap();
    assert_eq!(json[0]["kind"], "syntax");
    assert_eq!(json[0]["severity"], "error");
}
