// End-to-end tests: model document in, C++ source out.
//
// Drives the library pipeline (build tree → resolve → analyze → exponents
// → plan → codegen) on small models and checks the generated program for
// the structures each scenario depends on.

use n2c::codegen::{CodegenOptions, Integrator};
use n2c::error::AbortRun;
use n2c::pass::PassId;
use n2c::pipeline::{run_pipeline, CompilationState};

// ── Helpers ─────────────────────────────────────────────────────────────────

fn compile(json: &str, options: &CodegenOptions) -> String {
    let doc = n2c::document::from_str(json).unwrap();
    let mut state = CompilationState::new(doc);
    if let Err(e) = run_pipeline(&mut state, PassId::Codegen, options, false, |_, _| {}) {
        panic!("{:?} failed: {:?}", e.failing_pass, state.diagnostics);
    }
    state.generated.unwrap().cpp_source
}

fn compile_err(json: &str, options: &CodegenOptions) -> AbortRun {
    let doc = n2c::document::from_str(json).unwrap();
    let mut state = CompilationState::new(doc);
    run_pipeline(&mut state, PassId::Codegen, options, false, |_, _| {})
        .expect_err("compilation should fail")
        .into_abort()
}

fn fixed_point() -> CodegenOptions {
    CodegenOptions {
        numeric: "int".into(),
        fixed_point: true,
        ..CodegenOptions::default()
    }
}

/// Body of an out-of-class definition, including its braces.
fn definition<'a>(src: &'a str, signature: &str) -> &'a str {
    let head = format!("{}\n{{\n", signature);
    let start = src
        .find(&head)
        .unwrap_or_else(|| panic!("no definition of {}", signature));
    let rest = &src[start..];
    let end = rest.find("\n}\n").expect("unterminated definition");
    &rest[..end + 3]
}

const DECAY_LOCAL: &str = r#"{"name": "M", "parts": [{"name": "A", "variables": [
    {"name": "$n", "equations": ["5"]},
    {"name": "x", "equations": ["1 @ $init"]},
    {"name": "x'", "equations": ["-x"]}
]}]}"#;

// ── Integration ─────────────────────────────────────────────────────────────

#[test]
fn local_decay_integrates_in_the_instance() {
    let src = compile(DECAY_LOCAL, &CodegenOptions::default());
    let integrate = definition(&src, "void _M__A::integrate ()");
    assert!(integrate.contains("_x += _x_27 * dt;"));
    assert!(!src.contains("void _M__A_Population::integrate ()"));
    assert!(definition(&src, "void _M__A_Population::init ()").contains("resize (max (0, (int) 5));"));
    assert!(src.contains("Simulator<float>::instance.integrator = new Euler<float>;"));
}

#[test]
fn global_decay_integrates_in_the_population() {
    let src = compile(
        r#"{"name": "M", "parts": [{"name": "A", "variables": [
            {"name": "$n", "equations": ["5"]},
            {"name": "x", "attributes": ["global"], "equations": ["1 @ $init"]},
            {"name": "x'", "attributes": ["global"], "equations": ["-x"]}
        ]}]}"#,
        &CodegenOptions::default(),
    );
    let integrate = definition(&src, "void _M__A_Population::integrate ()");
    assert!(integrate.contains("_x += _x_27 * dt;"));
    assert!(!src.contains("void _M__A::integrate ()"));
}

#[test]
fn runge_kutta_steps_from_preserved_values() {
    let options = CodegenOptions {
        integrator: Integrator::RungeKutta,
        ..CodegenOptions::default()
    };
    let src = compile(DECAY_LOCAL, &options);
    let integrate = definition(&src, "void _M__A::integrate ()");
    assert!(integrate.contains("if (preserve)"));
    assert!(integrate.contains("_x = preserve->_x + _x_27 * dt;"));
    assert!(integrate.contains("_x += _x_27 * dt;"));
    assert!(src.contains("new RungeKutta<float>"));
}

#[test]
fn double_precision_uses_plain_literals() {
    let options = CodegenOptions {
        numeric: "double".into(),
        ..CodegenOptions::default()
    };
    let src = compile(DECAY_LOCAL, &options);
    assert!(src.contains("class _M__A : public PartTime<double>"));
    assert!(src.contains("new Euler<double>"));
    assert!(!src.contains("<float>"));
}

// ── Structure ───────────────────────────────────────────────────────────────

#[test]
fn constant_one_collapses_to_a_singleton() {
    let src = compile(
        r#"{"name": "M", "parts": [{"name": "S", "variables": [{"name": "x", "equations": ["$t"]}]}]}"#,
        &CodegenOptions::default(),
    );
    assert!(src.contains("  _M__S instance;\n"));
    assert!(!src.contains("Part<float> * _M__S_Population::create ()"));
    assert!(!src.contains("_M__S_Population::add (Part<float> * part)"));
}

#[test]
fn symbolic_population_size_is_not_a_singleton() {
    let src = compile(
        r#"{"name": "M", "parts": [{"name": "S", "variables": [
            {"name": "$n", "equations": ["$t + 1"]},
            {"name": "x", "equations": ["$t"]}
        ]}]}"#,
        &CodegenOptions::default(),
    );
    assert!(!src.contains("  _M__S instance;\n"));
    assert!(src.contains("Part<float> * _M__S_Population::create ()"));
}

#[test]
fn dying_endpoint_is_reference_counted() {
    let src = compile(
        r#"{"name": "A", "parts": [
            {"name": "B", "variables": [
                {"name": "$n", "equations": ["3"]},
                {"name": "$p", "equations": ["0.5"]}
            ]},
            {"name": "C", "connect": [{"alias": "b", "endpoint": "B"}]}
        ]}"#,
        &CodegenOptions::default(),
    );
    assert!(definition(&src, "void _A__C::enterSimulation ()").contains("_b->refcount++;"));
    assert!(definition(&src, "void _A__C::leaveSimulation ()").contains("_b->refcount--;"));
    assert!(definition(&src, "bool _A__B::isFree ()").contains("return refcount == 0;"));
    assert!(src.contains("  int refcount;\n"));
}

#[test]
fn children_are_declared_before_containers() {
    let src = compile(
        r#"{"name": "M", "parts": [{"name": "G", "variables": [{"name": "$n", "equations": ["2"]}],
            "parts": [{"name": "A", "variables": [{"name": "$n", "equations": ["3"]}]}]}]}"#,
        &CodegenOptions::default(),
    );
    let inner = src.find("class _M__G__A : public").unwrap();
    let outer = src.find("class _M__G : public").unwrap();
    let root = src.find("class _M : public").unwrap();
    let wrapper = src.find("class Wrapper : public").unwrap();
    assert!(inner < outer && outer < root && root < wrapper);
}

#[test]
fn external_accumulators_commit_and_reset_in_finalize() {
    for (assignment, identity) in [
        ("add", "0"),
        ("multiply", "1"),
        ("divide", "1"),
        ("min", "INFINITY"),
        ("max", "-INFINITY"),
    ] {
        let json = format!(
            r#"{{"name": "M", "variables": [{{"name": "total", "assignment": "{a}"}}], "parts": [
                {{"name": "A", "variables": [
                    {{"name": "$n", "equations": ["3"]}},
                    {{"name": "$up.total", "assignment": "{a}", "equations": ["2"]}}
                ]}}
            ]}}"#,
            a = assignment
        );
        let src = compile(&json, &CodegenOptions::default());
        let finalize = definition(&src, "bool _M::finalize ()");
        let commit = format!("  _total = next_total;\n  next_total = {};\n", identity);
        assert!(
            finalize.contains(&commit),
            "{}: finalize does not reset to {}:\n{}",
            assignment,
            identity,
            finalize
        );
    }
}

// ── Fixed point ─────────────────────────────────────────────────────────────

#[test]
fn fixed_point_division_shifts_the_numerator() {
    let src = compile(
        r#"{"name": "M", "variables": [
            {"name": "a", "equations": ["1024 @ $init"]},
            {"name": "b", "equations": ["16 @ $init"]},
            {"name": "y", "equations": ["a / b"]}
        ]}"#,
        &fixed_point(),
    );
    assert!(src.contains("(int) (((int64_t) _a << 15) / _b)"));
    assert!(src.contains("Event<int>::exponent = "));
    assert!(src.contains("new Euler<int>"));
}

// ── Failures ────────────────────────────────────────────────────────────────

#[test]
fn unresolved_reference_aborts() {
    let err = compile_err(
        r#"{"name": "M", "variables": [{"name": "y", "equations": ["ghost + 1"]}]}"#,
        &CodegenOptions::default(),
    );
    assert!(matches!(err, AbortRun::Unresolved { ref name, .. } if name.contains("ghost")));
}

#[test]
fn type_change_into_a_connection_aborts() {
    let err = compile_err(
        r#"{"name": "M", "parts": [
            {"name": "A", "variables": [{"name": "$type", "equations": ["C @ $t > 1"]}]},
            {"name": "B"},
            {"name": "C", "connect": [{"alias": "b", "endpoint": "B"}]}
        ]}"#,
        &CodegenOptions::default(),
    );
    assert_eq!(
        err.to_string(),
        "Can't change $type between connection and non-connection."
    );
}

#[test]
fn malformed_equation_aborts_while_building_the_tree() {
    let doc = n2c::document::from_str(
        r#"{"name": "M", "variables": [{"name": "y", "equations": ["1 +"]}]}"#,
    )
    .unwrap();
    let mut state = CompilationState::new(doc);
    let err = run_pipeline(&mut state, PassId::Codegen, &CodegenOptions::default(), false, |_, _| {})
        .unwrap_err();
    assert_eq!(err.failing_pass, PassId::BuildTree);
    assert!(matches!(err.into_abort(), AbortRun::Parse { .. }));
}
