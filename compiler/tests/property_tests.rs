// Property-based tests for compiler invariants.
//
// Four categories:
// 1. Attribute monotonicity: passes only ever add attributes
// 2. Accumulator resets: each cycle starts again from the identity
// 3. Fixed-point scale rules: shifts re-derive the exponents they target
// 4. Determinism: the same document always yields the same C++
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use n2c::codegen::CodegenOptions;
use n2c::exponent::{
    center_power, divide_scale, divide_shift, multiply_scale, multiply_shift, MSB,
};
use n2c::model::{Assignment, Model};
use n2c::pass::PassId;
use n2c::pipeline::{run_pipeline, CompilationState};
use proptest::prelude::*;

// ── Model generator ─────────────────────────────────────────────────────────

/// A population of `n` instances with a chain of derived variables and an
/// optional decaying state variable. Every name resolves.
fn arb_model() -> impl Strategy<Value = String> {
    (
        1u32..8,
        prop::collection::vec((prop_oneof![Just("+"), Just("*"), Just("-")], 1u32..50), 0..4),
        prop::bool::ANY,
    )
        .prop_map(|(n, chain, decay)| {
            let mut vars = vec![format!(r#"{{"name": "$n", "equations": ["{}"]}}"#, n)];
            vars.push(r#"{"name": "v0", "equations": ["$t"]}"#.to_string());
            for (i, (op, k)) in chain.iter().enumerate() {
                vars.push(format!(
                    r#"{{"name": "v{}", "equations": ["v{} {} {}"]}}"#,
                    i + 1,
                    i,
                    op,
                    k
                ));
            }
            if decay {
                vars.push(r#"{"name": "x", "equations": ["1 @ $init"]}"#.to_string());
                vars.push(r#"{"name": "x'", "equations": ["-x"]}"#.to_string());
            }
            format!(
                r#"{{"name": "M", "parts": [{{"name": "A", "variables": [{}]}}]}}"#,
                vars.join(", ")
            )
        })
}

fn build(json: &str) -> Model {
    Model::from_document(&n2c::document::from_str(json).unwrap()).unwrap()
}

fn compile(json: &str) -> String {
    let mut state = CompilationState::new(n2c::document::from_str(json).unwrap());
    run_pipeline(&mut state, PassId::Codegen, &CodegenOptions::default(), false, |_, _| {})
        .unwrap();
    state.generated.unwrap().cpp_source
}

const ACCUMULATING: [Assignment; 5] = [
    Assignment::Add,
    Assignment::Multiply,
    Assignment::Divide,
    Assignment::Min,
    Assignment::Max,
];

/// What the generated `+=`, `*=`, `/=`, `min` and `max` statements do to a
/// `next_` slot.
fn accumulate(a: Assignment, slot: f64, value: f64) -> f64 {
    match a {
        Assignment::Replace => value,
        Assignment::Add => slot + value,
        Assignment::Multiply => slot * value,
        Assignment::Divide => slot / value,
        Assignment::Min => slot.min(value),
        Assignment::Max => slot.max(value),
    }
}

fn assert_superset(before: &[n2c::attr::AttrSet], after: &[n2c::attr::AttrSet]) {
    assert!(after.len() >= before.len());
    for (i, (b, a)) in before.iter().zip(after).enumerate() {
        assert!(a.is_superset_of(*b), "variable {} lost attributes: {} -> {}", i, b, a);
    }
}

// ── Properties ──────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        ..ProptestConfig::default()
    })]

    #[test]
    fn passes_only_add_attributes(json in arb_model()) {
        let mut m = build(&json);
        let built = m.attribute_snapshot();
        n2c::resolve::resolve(&mut m).unwrap();
        let resolved = m.attribute_snapshot();
        assert_superset(&built, &resolved);
        n2c::analyze::analyze(&mut m, false).unwrap();
        assert_superset(&resolved, &m.attribute_snapshot());
    }

    #[test]
    fn reset_accumulator_leaves_no_residue(
        cycles in prop::collection::vec(prop::collection::vec(0.5f64..100.0, 1..5), 1..6),
    ) {
        for a in ACCUMULATING {
            let identity = a.identity().unwrap();
            let mut slot = identity;
            for writes in &cycles {
                for &w in writes {
                    slot = accumulate(a, slot, w);
                }
                let consumed = slot;
                slot = identity;
                let fresh = writes.iter().fold(identity, |acc, &w| accumulate(a, acc, w));
                prop_assert_eq!(consumed, fresh);
            }
            prop_assert_eq!(slot, identity);
        }
        prop_assert_eq!(Assignment::Replace.identity(), None);
    }

    #[test]
    fn divide_shift_rederives_the_quotient_exponent(ea in -20i32..30, eb in -20i32..30) {
        let (e, c) = divide_scale((ea, MSB), (eb, MSB));
        prop_assert_eq!(center_power(e, c), center_power(ea, MSB) - center_power(eb, MSB));
        let shift = divide_shift(ea, eb, e);
        prop_assert_eq!(ea - eb + MSB - shift, e);
    }

    #[test]
    fn multiply_shift_rederives_the_product_exponent(ea in -20i32..30, eb in -20i32..30) {
        let (e, c) = multiply_scale((ea, MSB), (eb, MSB));
        prop_assert_eq!(center_power(e, c), center_power(ea, MSB) + center_power(eb, MSB));
        let shift = multiply_shift(ea, eb, e);
        prop_assert_eq!(ea + eb - MSB - shift, e);
    }

    #[test]
    fn generated_source_is_deterministic(json in arb_model()) {
        prop_assert_eq!(compile(&json), compile(&json));
    }
}
