// equations.rs — Conditional equations as C++ statements
//
// Every variable's equation list becomes an `if` / `else if` / `else`
// chain whose default arm depends on the phase being emitted. Each arm
// stores one right-hand side using the variable's assignment kind.
//
// Preconditions: the renderer is positioned at the variable's set, scope
//   and phase.
// Postconditions: none.
// Failure modes: none.
// Side effects: none.

use crate::attr::Attr;
use crate::cpp::Stmt;
use crate::exponent::{print_shift, MSB};
use crate::expr::Expr;
use crate::id::VarId;
use crate::model::{Assignment, EquationEntry, ValueType};
use crate::render::{Phase, Renderer};

/// Entry used when no guard holds in the current phase.
fn default_entry<'e>(phase: Phase, equations: &'e [EquationEntry]) -> Option<&'e EquationEntry> {
    let special = match phase {
        Phase::Init => equations.iter().find(|e| e.is_init()),
        Phase::Connect => equations.iter().find(|e| e.is_connect()),
        Phase::Update => None,
    };
    special.or_else(|| equations.iter().rev().find(|e| e.is_unconditional()))
}

fn skipped(phase: Phase, e: &EquationEntry) -> bool {
    match phase {
        Phase::Init => e.is_unconditional() || e.is_connect(),
        Phase::Connect => e.is_unconditional() || e.is_init(),
        Phase::Update => e.is_init() || e.is_connect(),
    }
}

/// Store `expr` into `v` according to its assignment kind.
pub fn render_equation(r: &Renderer<'_, '_>, v: VarId, expr: &Expr) -> Vec<Stmt> {
    let var = r.model.var(v);
    let mut out = r.prepare(expr);
    if var.has(Attr::Dummy) {
        out.push(Stmt::line(format!("{};", r.expr(expr))));
        return out;
    }
    let lvalue = r.lvalue(v);
    if var.name == "$type" && var.order == 0 {
        let index = expr.constant_value().unwrap_or(0.0) as i64;
        out.push(Stmt::line(format!("{} = {};", lvalue, index)));
        return out;
    }
    let rhs = r.expr(expr);
    let exponent = expr.scale.exponent_next.unwrap_or(MSB);
    let line = match var.assignment {
        Assignment::Replace => format!("{} = {};", lvalue, rhs),
        Assignment::Add => format!("{} += {};", lvalue, rhs),
        Assignment::Multiply if r.fixed() => format!(
            "{} = (int64_t) {} * {}{};",
            lvalue,
            lvalue,
            rhs,
            print_shift(exponent - MSB)
        ),
        Assignment::Divide if r.fixed() => format!(
            "{} = ((int64_t) {}{}) / {};",
            lvalue,
            lvalue,
            print_shift(MSB - exponent),
            rhs
        ),
        Assignment::Multiply => format!("{} *= {};", lvalue, rhs),
        Assignment::Divide => format!("{} /= {};", lvalue, rhs),
        Assignment::Min => format!("{} = min ({}, {});", lvalue, lvalue, rhs),
        Assignment::Max => format!("{} = max ({}, {});", lvalue, lvalue, rhs),
    };
    out.push(Stmt::Line(line));
    out
}

/// Statement used when nothing else assigns `v` in this phase.
fn fallback(r: &Renderer<'_, '_>, v: VarId) -> Option<Stmt> {
    let var = r.model.var(v);
    if var.order == 0 && var.name == "$type" {
        return Some(Stmt::line(format!("{} = 0;", r.lvalue(v))));
    }
    if var.order == 0 && var.name == "$p" && r.phase == Phase::Connect {
        return Some(Stmt::line(format!("{} = 1;", r.lvalue(v))));
    }
    let plan = &r.plans[var.set];
    let copies = var.assignment == Assignment::Replace
        && !var.has(Attr::InitOnly)
        && !var.has(Attr::Reference)
        && plan.is_buffered(v)
        && r.phase != Phase::Init;
    if copies {
        return Some(Stmt::line(format!("{} = {};", r.next_name(v), r.name(v))));
    }
    None
}

/// The full conditional chain for `v` in the renderer's phase.
pub fn multiconditional(r: &Renderer<'_, '_>, v: VarId) -> Vec<Stmt> {
    let var = r.model.var(v);
    let default = default_entry(r.phase, &var.equations);
    let mut prep = Vec::new();
    let mut arms = Vec::new();
    for entry in &var.equations {
        if skipped(r.phase, entry) || default.is_some_and(|d| std::ptr::eq(d, entry)) {
            continue;
        }
        let Some(condition) = &entry.condition else {
            continue;
        };
        prep.extend(r.prepare(condition));
        arms.push((r.expr(condition), render_equation(r, v, &entry.expression)));
    }
    let otherwise = match default {
        Some(d) => Some(render_equation(r, v, &d.expression)),
        None => fallback(r, v).map(|s| vec![s]),
    };
    if arms.is_empty() {
        prep.extend(otherwise.unwrap_or_default());
        return prep;
    }
    prep.push(Stmt::If { arms, otherwise });
    prep
}

/// Declare a temporary and compute it.
pub fn temporary(r: &Renderer<'_, '_>, v: VarId) -> Vec<Stmt> {
    let var = r.model.var(v);
    let declaration = format!("{} {}", r.type_name(v), r.name(v));
    let single = match var.equations.as_slice() {
        [only] if only.is_unconditional() && var.assignment == Assignment::Replace => {
            Some(&only.expression)
        }
        _ => None,
    };
    if let Some(expr) = single {
        let mut out = r.prepare(expr);
        out.push(Stmt::line(format!("{} = {};", declaration, r.expr(expr))));
        return out;
    }
    let mut out = vec![Stmt::line(format!("{};", declaration))];
    out.extend(clear_accumulator(r, v, &r.name(v)));
    out.extend(multiconditional(r, v));
    out
}

/// Set `name` to zero in the representation of `v`'s value type.
pub fn zero(r: &Renderer<'_, '_>, v: VarId, name: &str) -> Stmt {
    match r.model.var(v).value_type {
        ValueType::Scalar => Stmt::line(format!("{} = 0;", name)),
        ValueType::Matrix { .. } => Stmt::line(format!("::clear ({});", name)),
        ValueType::Text => Stmt::line(format!("{}.clear ();", name)),
    }
}

/// Reset an accumulating slot to its assignment's identity.
pub fn clear_accumulator(r: &Renderer<'_, '_>, v: VarId, name: &str) -> Option<Stmt> {
    let var = r.model.var(v);
    let identity = var.assignment.identity()?;
    if identity == 0.0 {
        return Some(zero(r, v, name));
    }
    let value = r.number(identity, var.exponent);
    Some(match var.value_type {
        ValueType::Matrix { .. } => Stmt::line(format!("::clear ({}, {});", name, value)),
        _ => Stmt::line(format!("{} = {};", name, value)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::analyze;
    use crate::codegen::CodegenOptions;
    use crate::cpp::Printer;
    use crate::document;
    use crate::id::SetId;
    use crate::model::Model;
    use crate::plan::build_plans;
    use crate::render::Scratch;
    use crate::resolve::resolve;

    fn analyzed(json: &str) -> Model {
        let mut m = Model::from_document(&document::from_str(json).unwrap()).unwrap();
        resolve(&mut m).unwrap();
        analyze(&mut m, false).unwrap();
        m
    }

    fn part(m: &Model, name: &str) -> SetId {
        m.sets.iter().find(|s| s.name == name).unwrap().id
    }

    fn print(body: &[Stmt]) -> String {
        let mut p = Printer::new();
        p.stmts(body);
        p.finish()
    }

    const GUARDED: &str = r#"{"name": "M", "parts": [{"name": "A", "variables": [
        {"name": "$n", "equations": ["2"]},
        {"name": "y", "equations": ["$t"]},
        {"name": "x", "equations": ["1 @ $init", "2 @ y > 1", "3"]}
    ]}]}"#;

    #[test]
    fn update_phase_skips_init_guard() {
        let m = analyzed(GUARDED);
        let plans = build_plans(&m).unwrap();
        let options = CodegenOptions::default();
        let scratch = Scratch::default();
        let a = part(&m, "A");
        let r = Renderer::new(&m, &plans, &options, &scratch).at(a, false);
        let x = m.find(a, "x", 0).unwrap();
        assert_eq!(
            print(&multiconditional(&r, x)),
            "if (_y > 1)\n{\n  _x = 2;\n}\nelse\n{\n  _x = 3;\n}\n"
        );
    }

    #[test]
    fn init_phase_defaults_to_init_guard_and_keeps_other_guards() {
        let m = analyzed(GUARDED);
        let plans = build_plans(&m).unwrap();
        let options = CodegenOptions::default();
        let scratch = Scratch::default();
        let a = part(&m, "A");
        let r = Renderer::new(&m, &plans, &options, &scratch)
            .at(a, false)
            .in_phase(Phase::Init);
        let x = m.find(a, "x", 0).unwrap();
        assert_eq!(
            print(&multiconditional(&r, x)),
            "if (_y > 1)\n{\n  _x = 2;\n}\nelse\n{\n  _x = 1;\n}\n"
        );
    }

    #[test]
    fn assignment_forms() {
        let m = analyzed(
            r#"{"name": "M", "variables": [
                {"name": "y", "equations": ["$t"]},
                {"name": "s", "assignment": "add", "equations": ["y"]},
                {"name": "lo", "assignment": "min", "equations": ["y"]},
                {"name": "q", "assignment": "divide", "equations": ["y"]}
            ]}"#,
        );
        let plans = build_plans(&m).unwrap();
        let options = CodegenOptions::default();
        let scratch = Scratch::default();
        let r = Renderer::new(&m, &plans, &options, &scratch);
        let line = |name: &str| {
            let v = m.find(m.root, name, 0).unwrap();
            print(&multiconditional(&r, v))
        };
        assert_eq!(line("s"), "_s += _y;\n");
        assert_eq!(line("lo"), "_lo = min (_lo, _y);\n");
        assert_eq!(line("q"), "_q /= _y;\n");
    }

    #[test]
    fn accumulator_identities() {
        let m = analyzed(
            r#"{"name": "M", "variables": [
                {"name": "a", "assignment": "add", "equations": ["$t"]},
                {"name": "b", "assignment": "multiply", "equations": ["$t"]},
                {"name": "c", "assignment": "min", "equations": ["$t"]},
                {"name": "d", "assignment": "max", "equations": ["$t"]},
                {"name": "e", "equations": ["$t"]}
            ]}"#,
        );
        let plans = build_plans(&m).unwrap();
        let options = CodegenOptions::default();
        let scratch = Scratch::default();
        let r = Renderer::new(&m, &plans, &options, &scratch);
        let clear = |name: &str| {
            let v = m.find(m.root, name, 0).unwrap();
            clear_accumulator(&r, v, "slot")
        };
        assert_eq!(clear("a"), Some(Stmt::line("slot = 0;")));
        assert_eq!(clear("b"), Some(Stmt::line("slot = 1;")));
        assert_eq!(clear("c"), Some(Stmt::line("slot = INFINITY;")));
        assert_eq!(clear("d"), Some(Stmt::line("slot = -INFINITY;")));
        assert_eq!(clear("e"), None);
    }

    #[test]
    fn temporary_with_single_equation_initializes_inline() {
        let m = analyzed(
            r#"{"name": "M", "variables": [
                {"name": "y", "equations": ["$t"]},
                {"name": "t", "attributes": ["temporary"], "equations": ["y * 2"]},
                {"name": "z", "equations": ["t + 1"]}
            ]}"#,
        );
        let plans = build_plans(&m).unwrap();
        let options = CodegenOptions::default();
        let scratch = Scratch::default();
        let r = Renderer::new(&m, &plans, &options, &scratch);
        let t = m.find(m.root, "t", 0).unwrap();
        assert_eq!(print(&temporary(&r, t)), "float _t = _y * 2;\n");
    }
}
