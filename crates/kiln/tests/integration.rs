//! End-to-end tests: source text in, rendered output out.

use std::cell::Cell;

use insta::assert_snapshot;
use kiln::{
    DirSource, EngineConfig, Error, MemorySource, Model, OutputMode, RecordType, Registry,
    RenderError, TemplateKey, TextOutput, TypeDesc, TypeRegistry, Value,
};
use serde_json::json;
use tempfile::TempDir;

fn registry(templates: &[(&str, &str)]) -> Registry {
    let mut source = MemorySource::new();
    for (name, text) in templates {
        source.insert(*name, *text);
    }
    Registry::new(source)
}

// ============================================================================
// Rendering basics
// ============================================================================

#[test]
fn test_hello_in_both_modes() {
    let registry = registry(&[(
        "hello",
        "@param string name\n@param int count\nHello ${name}, you have ${count} items.",
    )]);
    let model = json!({ "name": "World", "count": 3 });

    let text = registry.render_text("hello", &model).unwrap();
    let bytes = registry.render_bytes("hello", &model).unwrap();

    assert_eq!(text, "Hello World, you have 3 items.");
    assert_eq!(bytes, b"Hello World, you have 3 items.");
}

#[test]
fn test_escaped_and_raw_interpolation() {
    let registry = registry(&[("t", "@param string s\n${s}|$unsafe{s}")]);
    let out = registry
        .render_text("t", &json!({ "s": "<a href=\"x\">'&'</a>" }))
        .unwrap();
    assert_eq!(
        out,
        "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/a&gt;|<a href=\"x\">'&'</a>"
    );
}

#[test]
fn test_plain_content_type_escapes_nothing() {
    let registry = registry(&[("t", "@param string s\n${s}")])
        .with_config(EngineConfig::default().with_content_type(kiln::ContentType::Plain));
    let out = registry.render_text("t", &json!({ "s": "<&>" })).unwrap();
    assert_eq!(out, "<&>");
}

#[test]
fn test_null_renders_empty() {
    let registry = registry(&[("t", "@param string s\n[${s}]")]);
    assert_eq!(registry.render_text("t", &json!({ "s": null })).unwrap(), "[]");
}

#[test]
fn test_loop_preserves_order() {
    let registry = registry(&[("t", "@param list<int> xs\n@for(x in xs)${x},@end")]);
    let xs: Vec<i64> = (0..50).rev().collect();
    let expected: String = xs.iter().map(|x| format!("{},", x)).collect();
    assert_eq!(registry.render_text("t", &json!({ "xs": xs })).unwrap(), expected);
}

#[test]
fn test_empty_loop_renders_nothing_or_else() {
    let registry = registry(&[
        ("plain", "@param list<string> xs\n<ul>@for(x in xs)<li>${x}</li>@end</ul>"),
        (
            "fallback",
            "@param list<string> xs\n<ul>@for(x in xs)<li>${x}</li>@else<li>none</li>@end</ul>",
        ),
    ]);
    let empty = json!({ "xs": [] });
    assert_eq!(registry.render_text("plain", &empty).unwrap(), "<ul></ul>");
    assert_eq!(
        registry.render_text("fallback", &empty).unwrap(),
        "<ul><li>none</li></ul>"
    );
    assert_eq!(
        registry
            .render_text("fallback", &json!({ "xs": ["a"] }))
            .unwrap(),
        "<ul><li>a</li></ul>"
    );
}

#[test]
fn test_elseif_chain_first_true_wins() {
    let registry = registry(&[(
        "t",
        "@param int n\n@if(n > 10)big@elseif(n > 5)medium@elseif(n > 0)small@else none@end",
    )]);
    let render = |n: i64| registry.render_text("t", &json!({ "n": n })).unwrap();
    assert_eq!(render(11), "big");
    assert_eq!(render(7), "medium");
    assert_eq!(render(1), "small");
    assert_eq!(render(0), " none");
}

#[test]
fn test_comments_and_raw_blocks() {
    let registry = registry(&[("t", "a<%-- hidden ${x} --%>b @raw${not} @if(x)@endraw")]);
    assert_eq!(
        registry.render_text("t", &json!({})).unwrap(),
        "ab ${not} @if(x)"
    );
}

#[test]
fn test_control_lines_are_trimmed() {
    let source = "@param list<string> xs\n<ul>\n@for(x in xs)\n  <li>${x}</li>\n@end\n</ul>\n";
    let trimmed = registry(&[("t", source)]);
    assert_eq!(
        trimmed.render_text("t", &json!({ "xs": ["a", "b"] })).unwrap(),
        "<ul>\n  <li>a</li>\n  <li>b</li>\n</ul>\n"
    );

    let untrimmed = registry(&[("t", source)])
        .with_config(EngineConfig::default().with_trim_control_lines(false));
    assert_eq!(
        untrimmed.render_text("t", &json!({ "xs": ["a"] })).unwrap(),
        "<ul>\n\n  <li>a</li>\n\n</ul>\n"
    );
}

// ============================================================================
// Short-circuit evaluation
// ============================================================================

struct Probe {
    calls: Cell<usize>,
}

impl Model for Probe {
    fn field(&self, _name: &str) -> Option<Value<'_>> {
        None
    }

    fn call(&self, name: &str, _args: &[Value<'_>]) -> Result<Value<'_>, RenderError> {
        match name {
            "tick" => {
                self.calls.set(self.calls.get() + 1);
                Ok(Value::Bool(true))
            }
            _ => Err(RenderError::UnknownMethod {
                name: name.to_string(),
            }),
        }
    }
}

struct Root {
    probe: Probe,
    flag: bool,
}

impl Model for Root {
    fn field(&self, name: &str) -> Option<Value<'_>> {
        match name {
            "p" => Some(Value::Record(&self.probe)),
            "flag" => Some(Value::Bool(self.flag)),
            "empty" => Some(Value::List(Vec::new())),
            _ => None,
        }
    }
}

#[test]
fn test_logical_operators_short_circuit() {
    let types =
        TypeRegistry::new().with(RecordType::new("Probe").method("tick", Vec::new(), TypeDesc::Bool));
    let registry = registry(&[(
        "t",
        "@param Probe p\n@param bool flag\n${flag && p.tick()} ${!flag || p.tick()}",
    )])
    .with_oracle(types);

    let root = Root {
        probe: Probe {
            calls: Cell::new(0),
        },
        flag: false,
    };
    assert_eq!(registry.render_text("t", &root).unwrap(), "false true");
    assert_eq!(root.probe.calls.get(), 0);

    let root = Root { flag: true, ..root };
    assert_eq!(registry.render_text("t", &root).unwrap(), "true true");
    assert_eq!(root.probe.calls.get(), 2);
}

#[test]
fn test_skipped_branches_and_empty_loops_are_not_evaluated() {
    let types =
        TypeRegistry::new().with(RecordType::new("Probe").method("tick", Vec::new(), TypeDesc::Bool));
    let registry = registry(&[(
        "t",
        "@param Probe p\n@param bool flag\n@param list<int> empty\n\
         @if(flag)${p.tick()}@elseif(flag)${p.tick()}@end\
         @for(x in empty)${p.tick()}@else.@end",
    )])
    .with_oracle(types);

    let root = Root {
        probe: Probe {
            calls: Cell::new(0),
        },
        flag: false,
    };
    assert_eq!(registry.render_text("t", &root).unwrap(), ".");
    assert_eq!(root.probe.calls.get(), 0);

    // The first true arm wins; the @elseif is never evaluated.
    let root = Root { flag: true, ..root };
    assert_eq!(registry.render_text("t", &root).unwrap(), "true.");
    assert_eq!(root.probe.calls.get(), 1);
}

// ============================================================================
// Records
// ============================================================================

#[test]
fn test_record_fields_from_yaml_types() {
    let types = TypeRegistry::from_yaml(
        r#"
User:
  fields:
    name: string
    manager: User
"#,
    )
    .unwrap();
    let registry = registry(&[("t", "@param User u\n${u.name} reports to ${u.manager.name}")])
        .with_oracle(types);

    let out = registry
        .render_text(
            "t",
            &json!({ "u": { "name": "Ada", "manager": { "name": "Grace" } } }),
        )
        .unwrap();
    assert_eq!(out, "Ada reports to Grace");

    let err = registry
        .render_text("t", &json!({ "u": { "name": "Ada", "manager": null } }))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Render(RenderError::NullDereference { ref name }) if name == "name"
    ));

    let err = registry
        .render_text("t", &json!({ "u": { "manager": {} } }))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Render(RenderError::MissingField { ref name }) if name == "name"
    ));
}

// ============================================================================
// Includes
// ============================================================================

#[test]
fn test_include_with_named_and_default_arguments() {
    let registry = registry(&[
        (
            "card",
            "@param string title\n@param string tone = \"info\"\n<div class=\"${tone}\">${title}</div>",
        ),
        (
            "page",
            "@template.card(\"Hi\")|@template.card(tone = \"warn\", title = \"Oops\")",
        ),
    ]);
    assert_eq!(
        registry.render_text("page", &json!({})).unwrap(),
        "<div class=\"info\">Hi</div>|<div class=\"warn\">Oops</div>"
    );
}

#[test]
fn test_nested_include_names() {
    let registry = registry(&[
        ("layout/header", "@param string title\n<h1>${title}</h1>"),
        ("index", "@template.layout.header(\"Home\")"),
    ]);
    assert_eq!(
        registry.render_text("index", &json!({})).unwrap(),
        "<h1>Home</h1>"
    );
}

#[test]
fn test_recursive_include() {
    let types = TypeRegistry::new().with(
        RecordType::new("Node")
            .field("name", TypeDesc::Str)
            .field("children", TypeDesc::list(TypeDesc::record("Node"))),
    );
    let registry = registry(&[(
        "tree",
        "@param Node node\n${node.name}@if(!node.children.is_empty())[@for(c in node.children)@template.tree(c)@end]@end",
    )])
    .with_oracle(types);

    let model = json!({
        "node": {
            "name": "a",
            "children": [
                { "name": "b", "children": [] },
                { "name": "c", "children": [{ "name": "d", "children": [] }] }
            ]
        }
    });
    assert_eq!(registry.render_text("tree", &model).unwrap(), "a[bc[d]]");
    assert_eq!(registry.compile_count(), 1);
}

#[test]
fn test_unbounded_recursion_is_stopped() {
    let registry = registry(&[("forever", "x@template.forever()")]);
    let err = registry.render_text("forever", &json!({})).unwrap_err();

    let Error::Render(mut err) = err else {
        panic!("expected a render error");
    };
    while let RenderError::Include { source, .. } = err {
        err = *source;
    }
    assert_eq!(
        err,
        RenderError::RecursionLimit {
            template: "forever".to_string(),
            limit: 64,
        }
    );
}

#[test]
fn test_include_compiles_target_for_same_mode() {
    let registry = registry(&[("a", "@template.b()"), ("b", "b")]);
    registry.render_bytes("a", &json!({})).unwrap();
    assert!(registry.is_compiled(&TemplateKey::new("b", OutputMode::Bytes)));
    assert!(!registry.is_compiled(&TemplateKey::new("b", OutputMode::Text)));
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn test_type_errors_are_collected_with_locations() {
    let registry = registry(&[(
        "broken",
        "@param int n\n${n + \"s\"} ${missing}\n@if(n)yes@end",
    )]);
    let err = registry.render_text("broken", &json!({ "n": 1 })).unwrap_err();
    assert_snapshot!(err.to_string(), @r###"
    type errors in template 'broken':
    operator '+' cannot be applied to int and string at line 2, column 3
    unresolved identifier 'missing' at line 2, column 14
    condition must be bool, found int at line 3, column 5
    "###);
    assert!(!registry.is_compiled(&TemplateKey::new("broken", OutputMode::Text)));
}

#[test]
fn test_parse_error_location() {
    let registry = registry(&[("bad", "line one\n  @for(x of xs)@end")]);
    let err = registry.render_text("bad", &json!({})).unwrap_err();
    assert_snapshot!(err.to_string(), @"syntax error in template 'bad': invalid @for header, expected '@for(item in items)' or '@for(item, index in items)' at line 2, column 10");
}

#[test]
fn test_missing_template() {
    let registry = registry(&[]);
    let err = registry.render_text("nope", &json!({})).unwrap_err();
    assert_eq!(err.to_string(), "template 'nope' not found");
}

#[test]
fn test_render_into_caller_output() {
    let registry = registry(&[("t", "@param int n\n${n * 2}")]);
    let mut out = TextOutput::new();
    registry.render_into("t", &mut out, &json!({ "n": 21 })).unwrap();
    assert_eq!(out.as_str(), "42");
}

// ============================================================================
// Directory source
// ============================================================================

#[test]
fn test_directory_templates_and_config() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("partials")).unwrap();
    std::fs::write(
        dir.path().join("partials/name.html"),
        "@param string who\n<b>${who}</b>",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("greet.html"),
        "@param string who\nHi @template.partials.name(who)!\n",
    )
    .unwrap();

    let config = EngineConfig::from_yaml("extension: .html\noutput_capacity: 64\n").unwrap();
    let registry =
        Registry::new(DirSource::from_config(dir.path(), &config)).with_config(config);

    assert_eq!(
        registry.render_text("greet", &json!({ "who": "you" })).unwrap(),
        "Hi <b>you</b>!\n"
    );
}
