// resolve.rs — Name resolution over the equation-set tree
//
// Binds every variable reference (equation right-hand sides, conditions,
// and reference-writer left-hand sides) to a target variable plus the chain
// of steps that reaches the target's set, and records use/user edges.
//
// Preconditions: `model` was built by `Model::from_document`.
// Postconditions: every `VarRef` in every equation has `target` set;
//   `Reference` writers point at their destination, which is marked
//   `ExternalWrite`; cross-set reads mark the target `ExternalRead`.
// Failure modes: unresolved names abort the job.
// Side effects: none.

use tracing::debug;

use crate::attr::{Attr, AttrSet};
use crate::error::{AbortRun, Result};
use crate::expr::{Descend, ExprKind, VarRef};
use crate::id::{SetId, VarId};
use crate::model::{Assignment, EquationEntry, Model, Step};

/// Endpoint-scoped parameters a connection declares as `alias.$name`.
const BINDING_PARAMETERS: [&str; 5] = ["$max", "$min", "$k", "$radius", "$project"];

pub fn resolve(model: &mut Model) -> Result<()> {
    fill_integrated_variables(model);
    find_integrated(model);
    resolve_lhs(model)?;
    resolve_rhs(model)?;
    Ok(())
}

// ── Integration pairs ────────────────────────────────────────────────────

/// A derivative `x''` implies storage for every lower order down to `x`.
fn fill_integrated_variables(model: &mut Model) {
    let declared: Vec<(SetId, String, u32)> = model
        .vars
        .iter()
        .filter(|v| v.order > 0 && !v.name.starts_with('$') && v.reference.path.is_empty())
        .map(|v| (v.set, v.name.clone(), v.order))
        .collect();
    for (set, name, order) in declared {
        for lower in (0..order).rev() {
            if model.find(set, &name, lower).is_none() {
                let id = model.add_variable(set, &name, lower, AttrSet::new());
                model.var_mut(id).reference.target = Some(id);
                debug!("added integrated variable {}", model.var_path(id));
            }
        }
    }
}

fn find_integrated(model: &mut Model) {
    let pairs: Vec<(VarId, VarId)> = model
        .vars
        .iter()
        .filter(|v| v.order > 0)
        .filter_map(|v| {
            model
                .find(v.set, &v.name, v.order - 1)
                .map(|lower| (lower, v.id))
        })
        .collect();
    for (lower, derivative) in pairs {
        model.var_mut(lower).derivative = Some(derivative);
    }
}

// ── Path lookup ──────────────────────────────────────────────────────────

/// True for `alias.$max` and friends declared in a connection.
pub fn is_binding_parameter(model: &Model, set: SetId, r: &VarRef) -> bool {
    r.path.len() == 1
        && BINDING_PARAMETERS.contains(&r.name.as_str())
        && model.set(set).binding(&r.path[0]).is_some()
}

/// Walk `path` from `from`, then find `name`/`order` in the set reached.
/// A leading component that is not a part, binding, or `$up` is searched for
/// in the containers. A bare name not found locally is searched for in the
/// containers as well.
pub fn lookup(
    model: &Model,
    from: SetId,
    path: &[String],
    name: &str,
    order: u32,
) -> Option<(VarId, Vec<Step>)> {
    let mut current = from;
    let mut steps = Vec::new();

    for (i, component) in path.iter().enumerate() {
        if component == "$up" {
            let c = model.set(current).container?;
            steps.push(Step::Ascend(c));
            current = c;
            continue;
        }
        if let Some(b) = model.set(current).binding(component) {
            steps.push(Step::Connect {
                binding: b.index,
                endpoint: b.endpoint,
            });
            current = b.endpoint;
            continue;
        }
        loop {
            let child = model
                .set(current)
                .parts
                .iter()
                .copied()
                .find(|&p| model.set(p).name == *component);
            if let Some(child) = child {
                steps.push(Step::Descend(child));
                current = child;
                break;
            }
            if i > 0 {
                return None;
            }
            let c = model.set(current).container?;
            steps.push(Step::Ascend(c));
            current = c;
        }
    }

    if let Some(v) = model.find(current, name, order) {
        return Some((v, steps));
    }
    if !path.is_empty() {
        return None;
    }
    while let Some(c) = model.set(current).container {
        steps.push(Step::Ascend(c));
        current = c;
        if let Some(v) = model.find(current, name, order) {
            return Some((v, steps));
        }
    }
    None
}

fn resolve_ref(model: &Model, set: SetId, r: &mut VarRef) -> Result<VarId> {
    // `alias.$k` style parameters live in the connection itself.
    if is_binding_parameter(model, set, r) {
        let dotted = format!("{}.{}", r.path[0], r.name);
        if let Some(v) = model.find(set, &dotted, r.order) {
            r.target = Some(v);
            r.resolution.clear();
            return Ok(v);
        }
    }
    let (target, steps) =
        lookup(model, set, &r.path, &r.name, r.order).ok_or_else(|| AbortRun::Unresolved {
            name: r.text.clone(),
            set: model.path(set),
        })?;
    r.target = Some(target);
    r.resolution = steps;
    Ok(target)
}

// ── Left-hand sides ──────────────────────────────────────────────────────

fn resolve_lhs(model: &mut Model) -> Result<()> {
    for index in 0..model.vars.len() {
        let id = VarId(index as u32);
        let set = model.var(id).set;
        let mut reference = model.var(id).reference.clone();
        if reference.path.is_empty() {
            continue;
        }
        if is_binding_parameter(model, set, &reference) {
            reference.target = Some(id);
            model.var_mut(id).reference = reference;
            continue;
        }

        let target = resolve_ref(model, set, &mut reference)?;
        let assignment = model.var(id).assignment;
        {
            let v = model.var_mut(id);
            v.reference = reference;
            v.attrs.insert(Attr::Reference);
            v.add_use(target);
        }
        let t = model.var_mut(target);
        t.attrs.insert(Attr::ExternalWrite);
        t.add_user(id);
        if t.assignment == Assignment::Replace && assignment != Assignment::Replace {
            t.assignment = assignment;
        }
        debug!(
            "{} writes {}",
            model.var_path(id),
            model.var_path(target)
        );
    }
    Ok(())
}

// ── Right-hand sides ─────────────────────────────────────────────────────

fn resolve_entry(model: &Model, set: SetId, entry: &mut EquationEntry) -> Result<Vec<(VarId, bool)>> {
    let mut found = Vec::new();
    let mut failure = None;
    let mut visit = |e: &mut crate::expr::Expr| {
        if failure.is_some() {
            return Descend::Skip;
        }
        if let ExprKind::Ref(r) = &mut e.kind {
            match resolve_ref(model, set, r) {
                Ok(v) => found.push((v, !r.resolution.is_empty())),
                Err(err) => failure = Some(err),
            }
        }
        Descend::Continue
    };
    entry.expression.visit_mut(&mut visit);
    if let Some(c) = &mut entry.condition {
        c.visit_mut(&mut visit);
    }
    match failure {
        Some(err) => Err(err),
        None => Ok(found),
    }
}

fn resolve_rhs(model: &mut Model) -> Result<()> {
    for index in 0..model.vars.len() {
        let id = VarId(index as u32);
        let set = model.var(id).set;
        let mut equations = std::mem::take(&mut model.var_mut(id).equations);
        let mut targets = Vec::new();
        let mut outcome = Ok(());
        for entry in &mut equations {
            match resolve_entry(model, set, entry) {
                Ok(found) => targets.extend(found),
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }
        model.var_mut(id).equations = equations;
        outcome?;

        for (target, remote) in targets {
            if target == id {
                continue;
            }
            model.var_mut(id).add_use(target);
            let t = model.var_mut(target);
            t.add_user(id);
            if remote {
                t.attrs.insert(Attr::ExternalRead);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document;

    fn resolved(json: &str) -> Model {
        let mut m = Model::from_document(&document::from_str(json).unwrap()).unwrap();
        resolve(&mut m).unwrap();
        m
    }

    fn first_ref(m: &Model, v: VarId) -> VarRef {
        m.var(v).equations[0].expression.refs()[0].clone()
    }

    #[test]
    fn local_reference_has_empty_resolution() {
        let m = resolved(
            r#"{"name": "M", "variables": [{"name": "x'", "equations": ["-x"]}]}"#,
        );
        let x = m.find(m.root, "x", 0).unwrap();
        let dx = m.find(m.root, "x", 1).unwrap();
        assert_eq!(m.var(x).derivative, Some(dx));
        let r = first_ref(&m, dx);
        assert_eq!(r.target, Some(x));
        assert!(r.is_local());
        assert!(m.var(x).users.contains(&dx));
    }

    #[test]
    fn up_reference_ascends_and_marks_external_read() {
        let m = resolved(
            r#"{"name": "M", "variables": [{"name": "g", "equations": ["2"]}], "parts": [
                {"name": "A", "variables": [{"name": "y", "equations": ["$up.g"]}]}
            ]}"#,
        );
        let a = m.set(m.root).parts[0];
        let y = m.find(a, "y", 0).unwrap();
        let g = m.find(m.root, "g", 0).unwrap();
        let r = first_ref(&m, y);
        assert_eq!(r.target, Some(g));
        assert_eq!(r.resolution, vec![Step::Ascend(m.root)]);
        assert!(m.var(g).has(Attr::ExternalRead));
    }

    #[test]
    fn bare_name_climbs_containers() {
        let m = resolved(
            r#"{"name": "M", "variables": [{"name": "g", "equations": ["2"]}], "parts": [
                {"name": "A", "variables": [{"name": "y", "equations": ["g + 1"]}]}
            ]}"#,
        );
        let a = m.set(m.root).parts[0];
        let y = m.find(a, "y", 0).unwrap();
        assert_eq!(first_ref(&m, y).resolution, vec![Step::Ascend(m.root)]);
    }

    #[test]
    fn binding_alias_traverses_connection() {
        let m = resolved(
            r#"{"name": "M", "parts": [
                {"name": "A", "variables": [{"name": "v", "equations": ["0"]}]},
                {"name": "C", "connect": [{"alias": "pre", "endpoint": "A"}],
                 "variables": [{"name": "w", "equations": ["pre.v"]}]}
            ]}"#,
        );
        let a = m.set(m.root).parts[0];
        let c = m.set(m.root).parts[1];
        let w = m.find(c, "w", 0).unwrap();
        assert_eq!(
            first_ref(&m, w).resolution,
            vec![Step::Connect { binding: 0, endpoint: a }]
        );
    }

    #[test]
    fn reference_writer_marks_destination() {
        let m = resolved(
            r#"{"name": "M", "variables": [{"name": "total"}], "parts": [
                {"name": "A", "variables": [{"name": "$up.total", "assignment": "add", "equations": ["1"]}]}
            ]}"#,
        );
        let a = m.set(m.root).parts[0];
        let writer = m.find(a, "$up.total", 0).unwrap();
        let total = m.find(m.root, "total", 0).unwrap();
        assert!(m.var(writer).has(Attr::Reference));
        assert_eq!(m.var(writer).reference.target, Some(total));
        assert!(m.var(total).has(Attr::ExternalWrite));
        assert_eq!(m.var(total).assignment, Assignment::Add);
    }

    #[test]
    fn binding_parameter_stays_local() {
        let m = resolved(
            r#"{"name": "M", "parts": [
                {"name": "A"},
                {"name": "C", "connect": [{"alias": "A", "endpoint": "A"}],
                 "variables": [{"name": "A.$max", "equations": ["3"]}]}
            ]}"#,
        );
        let c = m.set(m.root).parts[1];
        let max = m.find(c, "A.$max", 0).unwrap();
        assert!(!m.var(max).has(Attr::Reference));
        assert!(m.var(max).has(Attr::Global));
        assert_eq!(m.var(max).reference.target, Some(max));
    }

    #[test]
    fn unresolved_name_aborts() {
        let mut m = Model::from_document(
            &document::from_str(r#"{"name": "M", "variables": [{"name": "x", "equations": ["nope"]}]}"#)
                .unwrap(),
        )
        .unwrap();
        let err = resolve(&mut m).unwrap_err();
        assert!(matches!(err, AbortRun::Unresolved { ref name, .. } if name == "nope"));
    }
}
