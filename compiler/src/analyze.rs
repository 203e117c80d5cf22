// analyze.rs — Dependency, lifetime, and ordering analysis
//
// Runs after name resolution. Discovers constants, which sets can die (and
// why), drops unused specials, orders each set's variables, propagates
// init-only values, decides how `$live` is stored, records which sets must
// be reference counted, and assigns value types.
//
// Preconditions: `resolve::resolve` has bound every reference.
// Postconditions: per-set lethality flags, `ordered`, `path_to_container`,
//   `live_references`, `accountable_connections` are filled; attributes are
//   only ever added.
// Failure modes: member-only or temporary-only dependency cycles and
//   ambiguous down-references abort the job.
// Side effects: none.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

use tracing::debug;

use crate::attr::Attr;
use crate::error::{AbortRun, Result};
use crate::expr::{BinaryOp, Expr, ExprKind, Func, UnaryOp};
use crate::id::{SetId, VarId};
use crate::model::{
    AccountableConnection, Assignment, EquationEntry, LiveReference, Model, Step, ValueType,
};

/// Names that never fold to a constant even with a literal equation.
const NEVER_CONSTANT: [&str; 5] = ["$type", "$live", "$init", "$connect", "$index"];

pub fn analyze(model: &mut Model, fixed_point: bool) -> Result<()> {
    find_constants(model);
    find_death(model);
    let keep = add_implicit_dependencies(model, fixed_point);
    remove_unused(model, &keep);
    find_path_to_container(model);
    find_accountable_connections(model);
    find_temporary(model);
    determine_order(model)?;
    find_init_only(model);
    set_attributes_live(model);
    find_live_references(model);
    check_down_references(model)?;
    determine_types(model);
    Ok(())
}

// ── Structural predicates ────────────────────────────────────────────────

/// Some other set's `$type` split can create instances of `set`.
pub fn can_grow(model: &Model, set: SetId) -> bool {
    model
        .sets
        .iter()
        .filter(|s| s.id != set)
        .any(|s| s.splits.iter().any(|split| split.contains(&set)))
}

/// At most one instance ever exists.
pub fn is_singleton(model: &Model, set: SetId) -> bool {
    let s = model.set(set);
    !s.is_connection() && model.n_is_one(set) && !s.can_die() && !can_grow(model, set)
}

/// Variables currently attached to `set`, in declaration order.
fn live_vars(model: &Model, set: SetId) -> Vec<VarId> {
    model.set(set).variables.clone()
}

// ── Constants ────────────────────────────────────────────────────────────

/// Evaluate an expression whose leaves are literals or constant variables.
pub fn evaluate(model: &Model, expr: &Expr) -> Option<f64> {
    match &expr.kind {
        ExprKind::Constant(v) => Some(*v),
        ExprKind::Ref(r) => {
            let v = model.var(r.target?);
            if !v.has(Attr::Constant) {
                return None;
            }
            evaluate(model, v.sole_expression()?)
        }
        ExprKind::Unary(UnaryOp::Negate, a) => evaluate(model, a).map(|v| -v),
        ExprKind::Unary(UnaryOp::Not, a) => {
            evaluate(model, a).map(|v| if v == 0.0 { 1.0 } else { 0.0 })
        }
        ExprKind::Binary(op, a, b) => {
            let (a, b) = (evaluate(model, a)?, evaluate(model, b)?);
            let folded = Expr::new(
                ExprKind::Binary(*op, Box::new(Expr::constant(a)), Box::new(Expr::constant(b))),
                expr.span,
            );
            folded.constant_value()
        }
        ExprKind::Call(f, args) => {
            let a = args
                .iter()
                .map(|e| evaluate(model, e))
                .collect::<Option<Vec<f64>>>()?;
            match (f, a.as_slice()) {
                (Func::Sin, [x]) => Some(x.sin()),
                (Func::Cos, [x]) => Some(x.cos()),
                (Func::Tan, [x]) => Some(x.tan()),
                (Func::Exp, [x]) => Some(x.exp()),
                (Func::Log, [x]) => Some(x.ln()),
                (Func::Sqrt, [x]) => Some(x.sqrt()),
                (Func::Abs, [x]) => Some(x.abs()),
                (Func::Floor, [x]) => Some(x.floor()),
                (Func::Ceil, [x]) => Some(x.ceil()),
                (Func::Round, [x]) => Some(x.round()),
                (Func::Min, [x, y]) => Some(x.min(*y)),
                (Func::Max, [x, y]) => Some(x.max(*y)),
                _ => None,
            }
        }
        ExprKind::Text(_) | ExprKind::Matrix(_) => None,
    }
}

fn is_constant_matrix(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Matrix(rows) => rows.iter().flatten().all(|e| e.constant_value().is_some()),
        _ => false,
    }
}

/// A single unconditional equation that folds (possibly through other
/// constants) makes a variable `Constant`; its expression becomes the literal.
fn find_constants(model: &mut Model) {
    loop {
        let mut changed = false;
        for set in model.pre_order() {
            for id in live_vars(model, set) {
                let v = model.var(id);
                if v.has(Attr::Constant)
                    || v.has_any(&[
                        Attr::Preexistent,
                        Attr::Reference,
                        Attr::ExternalWrite,
                        Attr::Dummy,
                    ])
                    || v.assignment != Assignment::Replace
                    || v.derivative.is_some()
                    || NEVER_CONSTANT.contains(&v.name.as_str())
                {
                    continue;
                }
                let Some(expr) = v.sole_expression() else {
                    continue;
                };
                if is_constant_matrix(expr) {
                    model.var_mut(id).attrs.insert(Attr::Constant);
                    changed = true;
                    continue;
                }
                if let Some(value) = evaluate(model, expr) {
                    let span = expr.span;
                    let v = model.var_mut(id);
                    v.attrs.insert(Attr::Constant);
                    v.equations[0].expression = Expr::new(ExprKind::Constant(value), span);
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }
}

// ── Lifetime ─────────────────────────────────────────────────────────────

/// `$p` for a connection is a creation probability when unconditional or
/// `$connect`-guarded; only other guards can kill an existing connection.
fn p_is_lethal(model: &Model, set: SetId) -> bool {
    let Some(p) = model.find(set, "$p", 0) else {
        return false;
    };
    let p = model.var(p);
    if p.has(Attr::Constant) && evaluate(model, &p.equations[0].expression) == Some(1.0) {
        return false;
    }
    let connection = model.set(set).is_connection();
    p.equations.iter().any(|e| {
        !e.is_init() && !e.is_connect() && !(connection && e.is_unconditional())
    })
}

fn find_death(model: &mut Model) {
    for set in model.pre_order() {
        let lethal_p = p_is_lethal(model, set);
        let s = model.set_mut(set);
        s.lethal_p = lethal_p;
        s.lethal_type = s.splits.iter().any(|split| !split.contains(&set));
    }

    loop {
        let mut changed = false;
        for set in model.pre_order() {
            let s = model.set(set);
            let connection = s
                .bindings
                .iter()
                .any(|b| b.endpoint != set && model.set(b.endpoint).can_die());
            let container = s.container.is_some_and(|c| model.set(c).can_die());
            let s = model.set_mut(set);
            if connection && !s.lethal_connection {
                s.lethal_connection = true;
                changed = true;
            }
            if container && !s.lethal_container {
                s.lethal_container = true;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    for s in &model.sets {
        if s.can_die() {
            debug!(
                "{} can die (p={} type={} connection={} container={})",
                model.path(s.id),
                s.lethal_p,
                s.lethal_type,
                s.lethal_connection,
                s.lethal_container
            );
        }
    }
}

fn add_dependency(model: &mut Model, user: VarId, used: VarId) {
    if user != used {
        model.var_mut(user).add_use(used);
        model.var_mut(used).add_user(user);
    }
}

/// Edges not visible in any equation: integration and decay read `$t'`;
/// lethal sets read the `$live` of what they depend on. Returns variables
/// that must survive `remove_unused` without a user.
fn add_implicit_dependencies(model: &mut Model, fixed_point: bool) -> Vec<VarId> {
    let mut keep = Vec::new();
    if fixed_point {
        if let Some(dt) = model.find(model.root, "$t", 1) {
            keep.push(dt);
        }
    }

    for set in model.post_order() {
        let dt = model.find(set, "$t", 1);
        let live = model.find(set, "$live", 0);
        if let Some(dt) = dt {
            if model.set(set).lethal_p {
                if let Some(p) = model.find(set, "$p", 0) {
                    add_dependency(model, p, dt);
                }
            }
            let integrated: Vec<VarId> = live_vars(model, set)
                .into_iter()
                .filter(|&v| {
                    let var = model.var(v);
                    var.derivative.is_some() && !var.has(Attr::Preexistent)
                })
                .collect();
            for v in integrated {
                add_dependency(model, v, dt);
            }
        }

        let Some(live) = live else { continue };
        let s = model.set(set);
        let mut remote = Vec::new();
        if s.lethal_connection {
            for b in &s.bindings {
                if model.set(b.endpoint).can_die() {
                    remote.extend(model.find(b.endpoint, "$live", 0));
                }
            }
        }
        if s.lethal_container {
            if let Some(c) = s.container {
                remote.extend(model.find(c, "$live", 0));
            }
        }
        for r in remote {
            add_dependency(model, live, r);
            model.var_mut(r).attrs.insert(Attr::ExternalRead);
        }
    }
    keep
}

/// Drop specials that nothing declares or reads.
fn remove_unused(model: &mut Model, keep: &[VarId]) {
    for set in model.pre_order() {
        let before = model.set(set).variables.len();
        let retained: Vec<VarId> = model
            .set(set)
            .variables
            .iter()
            .copied()
            .filter(|&id| {
                let v = model.var(id);
                !(v.has(Attr::Special)
                    && v.equations.is_empty()
                    && v.users.is_empty()
                    && !keep.contains(&id))
            })
            .collect();
        if retained.len() != before {
            debug!(
                "{}: removed {} unused specials",
                model.path(set),
                before - retained.len()
            );
        }
        model.set_mut(set).variables = retained;
    }
}

fn find_path_to_container(model: &mut Model) {
    for set in model.pre_order() {
        let s = model.set(set);
        let found = s
            .bindings
            .iter()
            .find(|b| model.set(b.endpoint).container == s.container)
            .map(|b| b.index);
        model.set_mut(set).path_to_container = found;
    }
}

fn find_accountable_connections(model: &mut Model) {
    for set in model.pre_order() {
        let mut found = Vec::new();
        for b in &model.set(set).bindings {
            let limited = ["$max", "$min"]
                .iter()
                .any(|n| model.find(set, &format!("{}.{}", b.alias, n), 0).is_some());
            if limited {
                found.push((b.endpoint, b.index));
            }
        }
        for (endpoint, binding) in found {
            model
                .set_mut(endpoint)
                .accountable_connections
                .push(AccountableConnection {
                    connection: set,
                    binding,
                });
        }
    }
}

/// A connection's creation probability is evaluated once per candidate
/// pair and never stored.
fn find_temporary(model: &mut Model) {
    for set in model.pre_order() {
        if !model.set(set).is_connection() || model.set(set).lethal_p {
            continue;
        }
        let Some(p) = model.find(set, "$p", 0) else {
            continue;
        };
        let v = model.var(p);
        if !v.has(Attr::Constant)
            && v.equations
                .iter()
                .all(|e| e.is_unconditional() || e.is_connect())
        {
            model.var_mut(p).attrs.insert(Attr::Temporary);
        }
    }
}

// ── Evaluation order ─────────────────────────────────────────────────────

/// Strongly connected components of the local dependency graph, each
/// listed in declaration order. Single nodes without a self edge are skipped.
fn cycles(model: &Model, vars: &[VarId]) -> Vec<Vec<VarId>> {
    let index: HashMap<VarId, usize> = vars.iter().enumerate().map(|(i, v)| (*v, i)).collect();
    let edges: Vec<Vec<usize>> = vars
        .iter()
        .map(|&v| {
            model
                .var(v)
                .uses
                .iter()
                .filter(|u| !model.var(**u).has(Attr::Constant))
                .filter_map(|u| index.get(u).copied())
                .filter(|&u| vars[u] != v)
                .collect()
        })
        .collect();

    // Tarjan, iterative.
    let n = vars.len();
    let mut order = vec![usize::MAX; n];
    let mut low = vec![0; n];
    let mut on_stack = vec![false; n];
    let mut stack = Vec::new();
    let mut counter = 0;
    let mut components = Vec::new();
    for start in 0..n {
        if order[start] != usize::MAX {
            continue;
        }
        let mut work = vec![(start, 0usize)];
        while let Some(&mut (node, ref mut next)) = work.last_mut() {
            if *next == 0 {
                order[node] = counter;
                low[node] = counter;
                counter += 1;
                stack.push(node);
                on_stack[node] = true;
            }
            if let Some(&succ) = edges[node].get(*next) {
                *next += 1;
                if order[succ] == usize::MAX {
                    work.push((succ, 0));
                } else if on_stack[succ] {
                    low[node] = low[node].min(order[succ]);
                }
                continue;
            }
            work.pop();
            if let Some(&(parent, _)) = work.last() {
                low[parent] = low[parent].min(low[node]);
            }
            if low[node] == order[node] {
                let mut component = Vec::new();
                while let Some(w) = stack.pop() {
                    on_stack[w] = false;
                    component.push(w);
                    if w == node {
                        break;
                    }
                }
                if component.len() > 1 {
                    component.sort_unstable();
                    components.push(component.into_iter().map(|i| vars[i]).collect());
                }
            }
        }
    }
    components.sort();
    components
}

fn cycle_names(model: &Model, cycle: &[VarId]) -> String {
    cycle
        .iter()
        .map(|&v| model.var_path(v))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Temporaries follow what they read and precede their readers; members
/// otherwise keep declaration order. Mixed member/temporary cycles are
/// broken by buffering their members.
fn determine_order(model: &mut Model) -> Result<()> {
    for set in model.pre_order() {
        let vars = live_vars(model, set);

        let mut broken: BTreeSet<(VarId, VarId)> = BTreeSet::new();
        for cycle in cycles(model, &vars) {
            let temporaries = cycle
                .iter()
                .filter(|&&v| model.var(v).has(Attr::Temporary))
                .count();
            if temporaries == 0 {
                return Err(AbortRun::MemberCycle(cycle_names(model, &cycle)));
            }
            if temporaries == cycle.len() {
                return Err(AbortRun::TemporaryCycle(cycle_names(model, &cycle)));
            }
            for &v in &cycle {
                if !model.var(v).has(Attr::Temporary) {
                    model.var_mut(v).attrs.insert(Attr::Cycle);
                }
            }
            // A buffered member's readers see last cycle's value, so edges
            // into members of the cycle no longer constrain order.
            for &user in &cycle {
                for &used in &model.var(user).uses {
                    if cycle.contains(&used) && !model.var(used).has(Attr::Temporary) {
                        broken.insert((user, used));
                    }
                }
            }
        }

        // Kahn's algorithm, ties broken by declaration position.
        let position: HashMap<VarId, usize> =
            vars.iter().enumerate().map(|(i, v)| (*v, i)).collect();
        let mut indegree = vec![0usize; vars.len()];
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); vars.len()];
        for (i, &user) in vars.iter().enumerate() {
            for used in &model.var(user).uses {
                let Some(&j) = position.get(used) else { continue };
                if j == i || broken.contains(&(user, *used)) {
                    continue;
                }
                let temporary = |v: VarId| model.var(v).has(Attr::Temporary);
                if temporary(user) || temporary(*used) {
                    successors[j].push(i);
                    indegree[i] += 1;
                }
            }
        }
        let mut ready: BinaryHeap<Reverse<usize>> = (0..vars.len())
            .filter(|&i| indegree[i] == 0)
            .map(Reverse)
            .collect();
        let mut ordered = Vec::with_capacity(vars.len());
        while let Some(Reverse(i)) = ready.pop() {
            ordered.push(vars[i]);
            for &k in &successors[i] {
                indegree[k] -= 1;
                if indegree[k] == 0 {
                    ready.push(Reverse(k));
                }
            }
        }
        model.set_mut(set).ordered = ordered;
    }
    Ok(())
}

// ── Init-only ────────────────────────────────────────────────────────────

fn init_only_candidate(model: &Model, id: VarId) -> bool {
    let v = model.var(id);
    if v.equations.is_empty()
        || v.has_any(&[
            Attr::Constant,
            Attr::InitOnly,
            Attr::Temporary,
            Attr::Dummy,
            Attr::Reference,
            Attr::ExternalWrite,
            Attr::Cycle,
        ])
        || v.derivative.is_some()
        || v.assignment != Assignment::Replace
        || matches!(v.name.as_str(), "$type" | "$live" | "$p" | "$index" | "$init" | "$connect")
        || (v.has(Attr::Preexistent) && !(v.name == "$t" && v.order == 1))
    {
        return false;
    }
    if v.equations.iter().all(EquationEntry::is_init) {
        return true;
    }
    if v.equations.iter().any(|e| !e.is_unconditional() && !e.is_init()) {
        return false;
    }
    let impure = v.equations.iter().any(|e| e.expression.is_impure());
    !impure
        && v.uses.iter().all(|&u| {
            let u = model.var(u);
            u.has_any(&[Attr::Constant, Attr::InitOnly])
        })
}

fn find_init_only(model: &mut Model) {
    loop {
        let mut changed = false;
        for set in model.pre_order() {
            for id in live_vars(model, set) {
                if init_only_candidate(model, id) {
                    model.var_mut(id).attrs.insert(Attr::InitOnly);
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }
}

/// `$live` is the literal 1 when the set can never die, otherwise a stored
/// flag that only changes at init (set) and death (cleared).
fn set_attributes_live(model: &mut Model) {
    for set in model.pre_order() {
        let Some(live) = model.find(set, "$live", 0) else {
            continue;
        };
        if model.set(set).can_die() {
            model.var_mut(live).attrs.insert(Attr::InitOnly);
        } else {
            let v = model.var_mut(live);
            v.attrs.insert(Attr::Constant);
            v.equations = vec![EquationEntry::unconditional(Expr::constant(1.0))];
        }
    }
}

// ── Live references ──────────────────────────────────────────────────────

fn find_live_references(model: &mut Model) {
    for set in model.post_order() {
        let s = model.set(set);
        if !(s.lethal_connection || s.lethal_container) {
            continue;
        }
        let mut found: Vec<LiveReference> = Vec::new();
        let mut touched: BTreeSet<SetId> = BTreeSet::new();
        let mut resolution = Vec::new();
        collect_live_references(model, set, &mut resolution, &mut touched, &mut found, false);
        for r in &found {
            model.set_mut(r.target).referenced = true;
            debug!(
                "{} holds a counted reference to {}",
                model.path(set),
                model.path(r.target)
            );
        }
        model.set_mut(set).live_references = found;
    }
}

fn collect_live_references(
    model: &Model,
    set: SetId,
    resolution: &mut Vec<Step>,
    touched: &mut BTreeSet<SetId>,
    found: &mut Vec<LiveReference>,
    terminate: bool,
) {
    if terminate {
        let Some(live) = model.find(set, "$live", 0) else {
            return;
        };
        let live = model.var(live);
        if live.has(Attr::InitOnly) && !live.has(Attr::Constant) && touched.insert(set) {
            found.push(LiveReference {
                target: set,
                resolution: resolution.clone(),
            });
        }
        return;
    }

    let s = model.set(set);
    if s.lethal_container {
        if let Some(c) = s.container {
            resolution.push(Step::Ascend(c));
            collect_live_references(model, c, resolution, touched, found, true);
            resolution.pop();
        }
    }
    if s.lethal_connection {
        for b in &s.bindings {
            resolution.push(Step::Connect {
                binding: b.index,
                endpoint: b.endpoint,
            });
            collect_live_references(model, b.endpoint, resolution, touched, found, true);
            resolution.pop();
        }
    }
}

// ── Ambiguity ────────────────────────────────────────────────────────────

fn check_steps(model: &Model, set: SetId, text: &str, target: VarId, steps: &[Step]) -> Result<()> {
    let global = model.var(target).has(Attr::Global);
    for (i, step) in steps.iter().enumerate() {
        if let Step::Descend(child) = step {
            let last = i + 1 == steps.len();
            if last && global {
                continue;
            }
            if !is_singleton(model, *child) {
                return Err(AbortRun::AmbiguousDownReference {
                    set: model.path(set),
                    reference: text.to_string(),
                });
            }
        }
    }
    Ok(())
}

fn check_down_references(model: &Model) -> Result<()> {
    for set in model.pre_order() {
        for &id in &model.set(set).variables {
            let v = model.var(id);
            if let Some(target) = v.reference.target {
                check_steps(model, set, &v.reference.text, target, &v.reference.resolution)?;
            }
            for e in &v.equations {
                let mut refs = e.expression.refs();
                if let Some(c) = &e.condition {
                    refs.extend(c.refs());
                }
                for r in refs {
                    if let Some(target) = r.target {
                        check_steps(model, set, &r.text, target, &r.resolution)?;
                    }
                }
            }
        }
    }
    Ok(())
}

// ── Types ────────────────────────────────────────────────────────────────

fn expression_type(model: &Model, expr: &Expr) -> ValueType {
    match &expr.kind {
        ExprKind::Text(_) => ValueType::Text,
        ExprKind::Matrix(rows) => ValueType::Matrix {
            rows: rows.len(),
            cols: rows.first().map_or(0, Vec::len),
        },
        ExprKind::Ref(r) => r
            .target
            .map_or(ValueType::Scalar, |t| model.var(t).value_type),
        ExprKind::Binary(BinaryOp::Add | BinaryOp::Subtract, a, b) => {
            match (expression_type(model, a), expression_type(model, b)) {
                (m @ ValueType::Matrix { .. }, _) | (_, m @ ValueType::Matrix { .. }) => m,
                _ => ValueType::Scalar,
            }
        }
        _ => ValueType::Scalar,
    }
}

fn determine_types(model: &mut Model) {
    loop {
        let mut changed = false;
        for set in model.pre_order() {
            for id in live_vars(model, set) {
                let mut ty = ValueType::Scalar;
                for e in &model.var(id).equations {
                    match expression_type(model, &e.expression) {
                        ValueType::Scalar => {}
                        other => ty = other,
                    }
                }
                if ty != model.var(id).value_type {
                    model.var_mut(id).value_type = ty;
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document;
    use crate::resolve::resolve;

    fn analyzed(json: &str) -> Model {
        let mut m = Model::from_document(&document::from_str(json).unwrap()).unwrap();
        resolve(&mut m).unwrap();
        analyze(&mut m, false).unwrap();
        m
    }

    fn analysis_error(json: &str) -> AbortRun {
        let mut m = Model::from_document(&document::from_str(json).unwrap()).unwrap();
        resolve(&mut m).unwrap();
        analyze(&mut m, false).unwrap_err()
    }

    fn part(m: &Model, name: &str) -> SetId {
        m.sets.iter().find(|s| s.name == name).unwrap().id
    }

    #[test]
    fn constants_fold_through_references() {
        let m = analyzed(
            r#"{"name": "M", "variables": [
                {"name": "a", "equations": ["2"]},
                {"name": "b", "equations": ["a * 3"]},
                {"name": "c", "equations": ["b + $t"]}
            ]}"#,
        );
        let b = m.var(m.find(m.root, "b", 0).unwrap());
        assert!(b.has(Attr::Constant));
        assert_eq!(b.equations[0].expression.constant_value(), Some(6.0));
        assert!(!m.var(m.find(m.root, "c", 0).unwrap()).has(Attr::Constant));
    }

    #[test]
    fn death_propagates_through_containment_and_connection() {
        let m = analyzed(
            r#"{"name": "M", "parts": [
                {"name": "A", "variables": [{"name": "$p", "equations": ["0.5"]}],
                 "parts": [{"name": "B"}]},
                {"name": "C", "connect": [{"alias": "b", "endpoint": "A"}]}
            ]}"#,
        );
        let (a, b, c) = (part(&m, "A"), part(&m, "B"), part(&m, "C"));
        assert!(m.set(a).lethal_p);
        assert!(m.set(b).lethal_container);
        assert!(m.set(c).lethal_connection);
        assert!(!m.set(m.root).can_die());
    }

    #[test]
    fn p_equal_one_is_not_lethal() {
        let m = analyzed(
            r#"{"name": "M", "parts": [{"name": "A", "variables": [{"name": "$p", "equations": ["1"]}]}]}"#,
        );
        assert!(!m.set(part(&m, "A")).lethal_p);
    }

    #[test]
    fn unused_specials_are_removed() {
        let m = analyzed(r#"{"name": "M", "parts": [{"name": "A"}]}"#);
        let a = part(&m, "A");
        assert!(m.find(a, "$index", 0).is_none());
        assert!(m.find(a, "$type", 0).is_none());
        assert!(m.find(m.root, "$t", 1).is_none());
    }

    #[test]
    fn dt_kept_only_where_something_integrates() {
        let m = analyzed(
            r#"{"name": "M", "parts": [{"name": "A", "variables": [
                {"name": "x", "equations": ["1 @ $init"]},
                {"name": "x'", "equations": ["-x"]}
            ]}]}"#,
        );
        let a = part(&m, "A");
        let dt = m.find(a, "$t", 1).unwrap();
        assert!(m.var(dt).users.contains(&m.find(a, "x", 0).unwrap()));
        assert!(m.find(m.root, "$t", 1).is_none());
    }

    #[test]
    fn fixed_point_keeps_root_dt() {
        let mut m = Model::from_document(&document::from_str(r#"{"name": "M"}"#).unwrap()).unwrap();
        resolve(&mut m).unwrap();
        analyze(&mut m, true).unwrap();
        assert!(m.find(m.root, "$t", 1).is_some());
    }

    #[test]
    fn temporaries_precede_their_readers() {
        let m = analyzed(
            r#"{"name": "M", "variables": [
                {"name": "y", "equations": ["t + 1"]},
                {"name": "t", "attributes": ["temporary"], "equations": ["$t * 2"]}
            ]}"#,
        );
        let y = m.find(m.root, "y", 0).unwrap();
        let t = m.find(m.root, "t", 0).unwrap();
        let order = &m.set(m.root).ordered;
        let pos = |v| order.iter().position(|x| *x == v).unwrap();
        assert!(pos(t) < pos(y));
    }

    #[test]
    fn member_cycle_is_fatal() {
        let err = analysis_error(
            r#"{"name": "M", "variables": [
                {"name": "a", "equations": ["b + $t"]},
                {"name": "b", "equations": ["a + 1"]}
            ]}"#,
        );
        assert!(matches!(err, AbortRun::MemberCycle(_)));
    }

    #[test]
    fn temporary_cycle_is_fatal() {
        let err = analysis_error(
            r#"{"name": "M", "variables": [
                {"name": "a", "attributes": ["temporary"], "equations": ["b + $t"]},
                {"name": "b", "attributes": ["temporary"], "equations": ["a + 1"]}
            ]}"#,
        );
        assert!(matches!(err, AbortRun::TemporaryCycle(_)));
    }

    #[test]
    fn mixed_cycle_buffers_members() {
        let m = analyzed(
            r#"{"name": "M", "variables": [
                {"name": "a", "equations": ["b + $t"]},
                {"name": "b", "attributes": ["temporary"], "equations": ["a + 1"]}
            ]}"#,
        );
        let a = m.var(m.find(m.root, "a", 0).unwrap());
        let b = m.var(m.find(m.root, "b", 0).unwrap());
        assert!(a.has(Attr::Cycle));
        assert!(!b.has(Attr::Cycle));
    }

    #[test]
    fn init_only_propagates() {
        let m = analyzed(
            r#"{"name": "M", "variables": [
                {"name": "a", "equations": ["uniform () @ $init"]},
                {"name": "b", "equations": ["a * 2"]},
                {"name": "c", "equations": ["b + $t"]}
            ]}"#,
        );
        assert!(m.var(m.find(m.root, "a", 0).unwrap()).has(Attr::InitOnly));
        assert!(m.var(m.find(m.root, "b", 0).unwrap()).has(Attr::InitOnly));
        assert!(!m.var(m.find(m.root, "c", 0).unwrap()).has(Attr::InitOnly));
    }

    #[test]
    fn live_reference_through_connection_marks_refcount() {
        let m = analyzed(
            r#"{"name": "M", "parts": [
                {"name": "A", "variables": [{"name": "$p", "equations": ["0.5"]}],
                 "parts": [
                    {"name": "B"},
                    {"name": "C", "connect": [{"alias": "b", "endpoint": "B"}]}
                 ]}
            ]}"#,
        );
        let (b, c) = (part(&m, "B"), part(&m, "C"));
        assert!(m.set(b).referenced);
        let refs = &m.set(c).live_references;
        assert!(refs.iter().any(|r| r.target == b
            && r.resolution == vec![Step::Connect { binding: 0, endpoint: b }]));
        let live = m.var(m.find(b, "$live", 0).unwrap());
        assert!(live.has(Attr::InitOnly));
        assert_eq!(m.set(c).path_to_container, Some(0));
    }

    #[test]
    fn constant_live_for_immortal_sets() {
        let m = analyzed(
            r#"{"name": "M", "parts": [
                {"name": "A", "variables": [{"name": "y", "equations": ["$live"]}]}
            ]}"#,
        );
        let live = m.var(m.find(part(&m, "A"), "$live", 0).unwrap());
        assert!(live.has(Attr::Constant));
        assert_eq!(live.equations[0].expression.constant_value(), Some(1.0));
    }

    #[test]
    fn down_reference_into_population_is_ambiguous() {
        let err = analysis_error(
            r#"{"name": "M", "variables": [{"name": "y", "equations": ["A.x"]}], "parts": [
                {"name": "A", "variables": [
                    {"name": "$n", "equations": ["5"]},
                    {"name": "x", "equations": ["$t"]}
                ]}
            ]}"#,
        );
        assert!(matches!(err, AbortRun::AmbiguousDownReference { .. }));
    }

    #[test]
    fn down_reference_to_global_is_fine() {
        let m = analyzed(
            r#"{"name": "M", "variables": [{"name": "y", "equations": ["A.$n + $t"]}], "parts": [
                {"name": "A", "variables": [{"name": "$n", "equations": ["5"]}]}
            ]}"#,
        );
        assert!(m.find(m.root, "y", 0).is_some());
    }

    #[test]
    fn singleton_predicate() {
        let m = analyzed(
            r#"{"name": "M", "variables": [{"name": "n", "equations": ["$t"]}], "parts": [
                {"name": "A"},
                {"name": "B", "variables": [{"name": "$n", "equations": ["n"]}]}
            ]}"#,
        );
        assert!(is_singleton(&m, m.root));
        assert!(is_singleton(&m, part(&m, "A")));
        assert!(!is_singleton(&m, part(&m, "B")));
    }

    #[test]
    fn matrix_literal_sets_type() {
        let m = analyzed(
            r#"{"name": "M", "variables": [{"name": "w", "equations": ["[1, 2; 3, 4]"]}]}"#,
        );
        let w = m.var(m.find(m.root, "w", 0).unwrap());
        assert_eq!(w.value_type, ValueType::Matrix { rows: 2, cols: 2 });
        assert!(w.has(Attr::Constant));
    }
}
