mod common;

use std::sync::Arc;

use among::ast::Node;
use among::engine::StaticResolver;
use among::{CompileOptions, Engine, Severity, Source};
use common::*;

#[test]
fn constant_macros_replace_primitives() {
    let out = compile_clean("macro pi: 3.14\n[pi, tau]");
    assert_eq!(rendered(&out), vec!["[3.14, tau]"]);
}

#[test]
fn quoted_primitives_are_never_expanded() {
    let out = compile_clean("macro pi: 3.14\n[\"pi\"]");
    assert_eq!(rendered(&out), vec!["[pi]"]);
}

#[test]
fn constant_templates_are_shared_without_copying() {
    let shared = CompileOptions {
        copy_constant_macros: false,
        ..CompileOptions::default()
    };
    let out = compile_with(shared, "macro origin: {x: 0, y: 0}\n[origin, origin]");
    let list = single(&out).as_list().unwrap();
    assert!(Arc::ptr_eq(&list.values[0], &list.values[1]));

    let out = compile("macro origin: {x: 0, y: 0}\n[origin, origin]");
    let list = single(&out).as_list().unwrap();
    assert!(!Arc::ptr_eq(&list.values[0], &list.values[1]));
    assert_eq!(list.values[0], list.values[1]);
}

#[test]
fn list_macros_bind_positionally_with_defaults() {
    let out = compile_clean("macro pair[a, b = 0]: {first: a, second: b}\npair[1]\npair[1, 2]");
    assert_eq!(
        rendered(&out),
        vec!["{first: 1, second: 0}", "{first: 1, second: 2}"]
    );
}

#[test]
fn object_macros_bind_by_key() {
    let out = compile("macro point{x, y = 0}: [x, y]\npoint{x: 3}\npoint{y: 1}\npoint{x: 1, z: 2}");
    let values = rendered(&out);
    assert_eq!(values[0], "[3, 0]");
    assert_eq!(values[1], "ERROR");
    assert_eq!(values[2], "[1, 0]");
    assert!(has_message(&out, "wrong usage of 'point'"));
    assert!(with_severity(&out, Severity::Warn)
        .iter()
        .any(|r| r.message.contains("key 'z' is not a parameter")));
}

#[test]
fn operation_macros_expand_their_body() {
    let out = compile_clean("macro sq(x): (x * x)\nsq(3)");
    assert_eq!(*single(&out), op("*", vec![p("3"), p("3")]));
}

#[test]
fn overloads_prefer_the_closest_fit() {
    let out = compile_clean("macro f[a]: one\nmacro f[a, b]: two\n[f[1], f[1, 2]]");
    assert_eq!(rendered(&out), vec!["[one, two]"]);
}

#[test]
fn equally_good_overloads_are_ambiguous() {
    let out = compile("macro g[a]: one\nmacro g[b]: two\ng[1]");
    assert_eq!(rendered(&out), vec!["ERROR"]);
    let report = out.errors().next().unwrap();
    assert!(report.message.contains("ambiguous invocation of 'g'"));
    assert_eq!(report.hints.len(), 2);
}

#[test]
fn unusable_invocations_list_the_declarations() {
    let out = compile("macro h[a, b]: x\nh[1]");
    let report = out.errors().next().unwrap();
    assert!(report.message.contains("wrong usage of 'h'"));
    assert_eq!(report.hints, vec!["declared as macro h[a, b]"]);
}

#[test]
fn identical_overloads_are_rejected() {
    let out = compile("macro k[a]: 1\nmacro k[a]: 2");
    assert!(has_message(&out, "is already defined"));
}

#[test]
fn receiver_functions() {
    let out = compile_clean("fn len: count[self]\nfn at[i]: get[self, i]\n(items.len)\n(xs.at[2])");
    assert_eq!(*values(&out)[0], Node::list("count", vec![p("items")]));
    assert_eq!(*values(&out)[1], Node::list("get", vec![p("xs"), p("2")]));
}

#[test]
fn receiver_calls_chain() {
    let out = compile_clean("fn at[i]: get[self, i]\n(xs.at[2].at[3])");
    assert_eq!(rendered(&out), vec!["get[get[xs, 2], 3]"]);
}

#[test]
fn parameters_can_name_nodes() {
    let out = compile_clean("macro wrap[tag, v]: tag[v]\nwrap[item, 1]");
    assert_eq!(rendered(&out), vec!["item[1]"]);

    let out = compile("macro wrap[tag, v]: tag[v]\nwrap[[x], 1]");
    assert!(has_message(&out, "argument 'tag'"));
}

#[test]
fn accessor_member_can_be_a_parameter() {
    let out = compile_clean("macro call[target, member]: (target.member)\ncall[box, open]");
    assert_eq!(*single(&out), Node::list("open", vec![p("box")]));
}

#[test]
fn nested_invocations_expand_after_substitution() {
    let out = compile_clean("macro pair[a, b]: {left: a, right: b}\nmacro double[x]: pair[x, x]\ndouble[7]");
    assert_eq!(rendered(&out), vec!["{left: 7, right: 7}"]);
}

#[test]
fn declared_types_are_checked() {
    let out = compile("macro only[x: list]: x\nonly[a]\nonly[[a]]");
    assert!(has_message(&out, "argument 'x' of macro only[]"));
    assert_eq!(rendered(&out)[1], "[a]");
}

#[test]
fn runaway_recursion_is_stopped() {
    let out = compile("macro spin[x]: spin[x]\nspin[1]");
    assert!(has_message(&out, "maximum nesting depth"));
    assert_eq!(out.errors().count(), 1);
}

#[test]
fn undef_removes_macros() {
    let out = compile("macro pi: 3\nundef macro pi\npi\nundef macro pi");
    assert_eq!(rendered(&out), vec!["pi"]);
    assert!(out.is_success());
    assert_eq!(with_severity(&out, Severity::Warn).len(), 1);

    let out = compile_clean("macro v[x]: 1\nmacro v(x): 2\nundef macro v[]\n[v[0], v(0)]");
    assert_eq!(rendered(&out), vec!["[v[0], 2]"]);
}

#[test]
fn imports_bring_definitions_into_scope() {
    let engine = Engine::default();
    let lib = engine.compile_str("lib", "macro greeting: hello\noperator <> as binary");
    assert!(lib.is_success());
    let mut resolver = StaticResolver::new();
    resolver.insert("lib", (*lib.definitions).clone());

    let out = engine.compile(Source::new("main", "use lib\n[greeting, (a <> b)]"), &resolver);
    assert!(out.is_success(), "{}", out.render_reports());
    assert_eq!(rendered(&out), vec!["[hello, <>(a, b)]"]);
    assert!(out.definitions.is_empty());

    let out = engine.compile(Source::new("main", "use public lib"), &resolver);
    assert_eq!(out.definitions.macros.len(), 1);
    assert_eq!(out.definitions.operators.len(), 1);

    let out = engine.compile(Source::new("main", "use lib\nundef use lib\ngreeting"), &resolver);
    assert_eq!(rendered(&out), vec!["greeting"]);
}

#[test]
fn only_definitions_made_here_are_exported() {
    let out = compile_clean("macro a: 1\nfn b: 2\noperator ~> as binary");
    assert_eq!(out.definitions.macros.len(), 2);
    assert_eq!(out.definitions.operators.len(), 1);
}
