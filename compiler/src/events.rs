// events.rs — Event targets and the sets that monitor them
//
// An `event (condition [, delay [, edge]])` call makes its set an event
// target. The sets whose state the condition reads are its sources: each
// source instance keeps a monitor list of target instances and tests the
// condition when it finalizes.
//
// Preconditions: the model is resolved, analyzed and (in fixed-point mode)
//   has exponents; the caller supplies the set's externally buffered members.
// Postconditions: targets are numbered in discovery order; `value_index` is
//   the latch bit of each target.
// Failure modes: none.
// Side effects: none.

use crate::analyze::evaluate;
use crate::expr::{Descend, Expr, ExprKind, Func};
use crate::id::{SetId, VarId};
use crate::model::{Model, Step};
use crate::plan::temporaries_of;

/// Delay argument was omitted.
pub const DELAY_UNSPECIFIED: f64 = -1.0;
/// Delay is an expression evaluated per instance at fire time.
pub const DELAY_COMPUTED: f64 = -2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rise,
    Fall,
    Change,
    Nonzero,
}

impl Edge {
    fn parse(text: &str) -> Edge {
        match text.trim().to_ascii_lowercase().as_str() {
            "fall" => Edge::Fall,
            "change" => Edge::Change,
            "nonzero" => Edge::Nonzero,
            _ => Edge::Rise,
        }
    }
}

/// Where the previous value of the trigger expression is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Track {
    /// The trigger is a buffered member; `x` is before, `next_x` after.
    Member(VarId),
    /// Synthesized per-instance slot.
    Aux(String),
}

#[derive(Debug, Clone)]
pub struct EventSource {
    /// The monitored set; its instances hold the monitor list.
    pub container: SetId,
    pub target_set: SetId,
    /// Index of the target in `target_set`'s event targets.
    pub target: usize,
    /// Hops from a target instance to the monitored instance; empty when
    /// the target monitors itself.
    pub reference: Vec<Step>,
    /// Position in the monitored set's source list.
    pub monitor_index: usize,
    /// The condition reads target-local state, so each target is tested.
    pub test_each: bool,
    /// The delay is computed per target.
    pub delay_each: bool,
}

impl EventSource {
    pub fn monitor_name(&self) -> String {
        format!("eventMonitor_{}", self.monitor_index)
    }
}

#[derive(Debug, Clone)]
pub struct EventTarget<'m> {
    pub container: SetId,
    /// The `event (...)` call.
    pub event: &'m Expr,
    pub edge: Edge,
    pub track: Option<Track>,
    /// Slot that remembers when a time-valued Nonzero trigger last fired.
    pub time_index: Option<usize>,
    pub delay: f64,
    pub value_index: usize,
    /// Temporaries the condition reads, in evaluation order.
    pub dependencies: Vec<VarId>,
    pub sources: Vec<EventSource>,
}

impl<'m> EventTarget<'m> {
    pub fn condition(&self) -> Option<&'m Expr> {
        match &self.event.kind {
            ExprKind::Call(Func::Event, args) => args.first(),
            _ => None,
        }
    }

    pub fn delay_expression(&self) -> Option<&'m Expr> {
        match &self.event.kind {
            ExprKind::Call(Func::Event, args) => args.get(1),
            _ => None,
        }
    }
}

// ── Discovery ────────────────────────────────────────────────────────────

/// Every distinct `event (...)` call in `set`'s equations and conditions.
fn event_calls<'m>(model: &'m Model, set: SetId) -> Vec<&'m Expr> {
    let mut found: Vec<&'m Expr> = Vec::new();
    let mut collect = |e: &'m Expr| {
        if matches!(&e.kind, ExprKind::Call(Func::Event, _))
            && !found.iter().any(|f| f.kind == e.kind)
        {
            found.push(e);
        }
        Descend::Continue
    };
    for &v in &model.set(set).ordered {
        for entry in &model.var(v).equations {
            if let Some(c) = &entry.condition {
                c.visit(&mut collect);
            }
            entry.expression.visit(&mut collect);
        }
    }
    found
}

fn delay_of(model: &Model, event: &Expr) -> f64 {
    let ExprKind::Call(_, args) = &event.kind else {
        return DELAY_UNSPECIFIED;
    };
    match args.get(1) {
        None => DELAY_UNSPECIFIED,
        Some(d) => match evaluate(model, d) {
            Some(value) if value < 0.0 => DELAY_UNSPECIFIED,
            Some(value) => value,
            None => DELAY_COMPUTED,
        },
    }
}

/// Local temporaries reachable from `expr`, listed in `set`'s order.
fn temporary_dependencies(model: &Model, set: SetId, expr: &Expr) -> Vec<VarId> {
    let seeds: Vec<VarId> = expr
        .refs()
        .into_iter()
        .filter(|r| r.is_local())
        .filter_map(|r| r.target)
        .filter(|&v| model.var(v).has(crate::attr::Attr::Temporary))
        .collect();
    temporaries_of(model, set, &seeds)
}

/// Event targets of `set`. `buffered_external` lists the set's members
/// whose next value is stored, which lets a bare-variable trigger use the
/// member itself as its "before" slot.
pub fn find_targets<'m>(
    model: &'m Model,
    set: SetId,
    buffered_external: &[VarId],
) -> Vec<EventTarget<'m>> {
    let mut targets = Vec::new();
    let mut aux = 0;
    let mut times = 0;
    for (value_index, event) in event_calls(model, set).into_iter().enumerate() {
        let ExprKind::Call(_, args) = &event.kind else {
            continue;
        };
        let Some(condition) = args.first() else {
            continue;
        };
        let edge = args
            .get(2)
            .and_then(Expr::as_text)
            .map_or(Edge::Rise, Edge::parse);

        let track = match &condition.kind {
            ExprKind::Ref(r)
                if r.is_local() && r.target.is_some_and(|t| buffered_external.contains(&t)) =>
            {
                r.target.map(Track::Member)
            }
            _ if edge == Edge::Nonzero => None,
            _ => {
                let name = format!("eventAux{}", aux);
                aux += 1;
                Some(Track::Aux(name))
            }
        };

        let reads_time = condition
            .refs()
            .iter()
            .any(|r| r.name == "$t" && r.order == 0);
        let time_index = if edge == Edge::Nonzero && reads_time {
            times += 1;
            Some(times - 1)
        } else {
            None
        };

        targets.push(EventTarget {
            container: set,
            event,
            edge,
            track,
            time_index,
            delay: delay_of(model, event),
            value_index,
            dependencies: temporary_dependencies(model, set, condition),
            sources: Vec::new(),
        });
    }
    targets
}

/// Monitored sets of one target: every set whose variables the condition
/// reads, or the target's own set when it reads nothing remote.
pub fn find_sources(model: &Model, target: &EventTarget<'_>, index: usize) -> Vec<EventSource> {
    let Some(condition) = target.condition() else {
        return Vec::new();
    };
    let refs = condition.refs();
    let test_each = refs.is_empty()
        || refs
            .iter()
            .any(|r| r.is_local() && r.target.is_some_and(|t| !is_preexistent(model, t)));
    let delay_each = target.delay == DELAY_COMPUTED;

    let mut sources: Vec<EventSource> = Vec::new();
    let add = |sources: &mut Vec<EventSource>, container: SetId, reference: Vec<Step>| {
        if sources.iter().any(|s| s.container == container) {
            return;
        }
        sources.push(EventSource {
            container,
            target_set: target.container,
            target: index,
            reference,
            monitor_index: 0,
            test_each,
            delay_each,
        });
    };
    for r in &refs {
        let Some(t) = r.target else { continue };
        if is_preexistent(model, t) && r.is_local() {
            continue;
        }
        if r.is_local() {
            add(&mut sources, target.container, Vec::new());
        } else {
            add(&mut sources, model.var(t).set, r.resolution.clone());
        }
    }
    if sources.is_empty() {
        add(&mut sources, target.container, Vec::new());
    }
    sources
}

fn is_preexistent(model: &Model, v: VarId) -> bool {
    model.var(v).has(crate::attr::Attr::Preexistent)
}

/// Reference writers in `set` whose guards fire on an event; their writes
/// are committed when the event finishes rather than at the next finalize.
pub fn event_references(model: &Model, set: SetId) -> Vec<VarId> {
    model
        .set(set)
        .ordered
        .iter()
        .copied()
        .filter(|&v| {
            let var = model.var(v);
            var.has(crate::attr::Attr::Reference)
                && var.equations.iter().any(|e| {
                    e.condition
                        .as_ref()
                        .is_some_and(|c| c.contains_call(Func::Event))
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::analyze;
    use crate::document;
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

    #[test]
    fn edge_delay_and_aux_slots() {
        let m = analyzed(
            r#"{"name": "M", "parts": [{"name": "A", "variables": [
                {"name": "v", "equations": ["v + 1"]},
                {"name": "a", "equations": ["1 @ event (v > 1)"]},
                {"name": "b", "equations": ["2 @ event (v, 0.5, \"fall\")"]},
                {"name": "c", "equations": ["3 @ event ($t > 1, v, \"nonzero\")"]}
            ]}]}"#,
        );
        let a = part(&m, "A");
        let targets = find_targets(&m, a, &[]);
        assert_eq!(targets.len(), 3);
        assert_eq!(targets[0].edge, Edge::Rise);
        assert_eq!(targets[0].delay, DELAY_UNSPECIFIED);
        assert_eq!(targets[0].track, Some(Track::Aux("eventAux0".into())));
        assert_eq!(targets[1].edge, Edge::Fall);
        assert_eq!(targets[1].delay, 0.5);
        assert_eq!(targets[1].track, Some(Track::Aux("eventAux1".into())));
        assert_eq!(targets[2].edge, Edge::Nonzero);
        assert_eq!(targets[2].delay, DELAY_COMPUTED);
        assert_eq!(targets[2].track, None);
        assert_eq!(targets[2].time_index, Some(0));
        let bits: Vec<usize> = targets.iter().map(|t| t.value_index).collect();
        assert_eq!(bits, vec![0, 1, 2]);
    }

    #[test]
    fn buffered_trigger_tracks_itself() {
        let m = analyzed(
            r#"{"name": "M", "parts": [{"name": "A", "variables": [
                {"name": "v", "equations": ["v + 1"]},
                {"name": "a", "equations": ["1 @ event (v)"]}
            ]}]}"#,
        );
        let a = part(&m, "A");
        let v = m.find(a, "v", 0).unwrap();
        let targets = find_targets(&m, a, &[v]);
        assert_eq!(targets[0].track, Some(Track::Member(v)));
    }

    #[test]
    fn remote_condition_monitors_the_read_set() {
        let m = analyzed(
            r#"{"name": "M", "parts": [
                {"name": "A", "variables": [{"name": "v", "equations": ["v + 1"]}]},
                {"name": "C", "connect": [{"alias": "pre", "endpoint": "A"}], "variables": [
                    {"name": "w", "equations": ["w + 1 @ event (pre.v > 1)"]}
                ]}
            ]}"#,
        );
        let (a, c) = (part(&m, "A"), part(&m, "C"));
        let targets = find_targets(&m, c, &[]);
        let sources = find_sources(&m, &targets[0], 0);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].container, a);
        assert_eq!(
            sources[0].reference,
            vec![Step::Connect { binding: 0, endpoint: a }]
        );
        assert!(!sources[0].test_each);
    }

    #[test]
    fn local_condition_monitors_itself() {
        let m = analyzed(
            r#"{"name": "M", "parts": [{"name": "A", "variables": [
                {"name": "v", "equations": ["v + 1"]},
                {"name": "a", "equations": ["1 @ event (v > 1)"]}
            ]}]}"#,
        );
        let a = part(&m, "A");
        let targets = find_targets(&m, a, &[]);
        let sources = find_sources(&m, &targets[0], 0);
        assert_eq!(sources[0].container, a);
        assert!(sources[0].reference.is_empty());
        assert!(sources[0].test_each);
    }

    #[test]
    fn time_only_condition_falls_back_to_own_set() {
        let m = analyzed(
            r#"{"name": "M", "parts": [{"name": "A", "variables": [
                {"name": "v", "equations": ["v + 1"]},
                {"name": "a", "equations": ["1 @ event ($t > 1)"]},
                {"name": "b", "equations": ["2 @ event (v > 1)"]}
            ]}]}"#,
        );
        let a = part(&m, "A");
        let targets = find_targets(&m, a, &[]);
        let time_only = find_sources(&m, &targets[0], 0);
        assert_eq!(time_only.len(), 1);
        assert_eq!(time_only[0].container, a);
        assert!(!time_only[0].test_each);
        let local = find_sources(&m, &targets[1], 1);
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].target, 1);
    }

    #[test]
    fn condition_temporaries_are_dependencies() {
        let m = analyzed(
            r#"{"name": "M", "parts": [{"name": "A", "variables": [
                {"name": "v", "equations": ["v + 1"]},
                {"name": "h", "attributes": ["temporary"], "equations": ["v * 2"]},
                {"name": "a", "equations": ["1 @ event (h > 1)"]}
            ]}]}"#,
        );
        let a = part(&m, "A");
        let h = m.find(a, "h", 0).unwrap();
        let targets = find_targets(&m, a, &[]);
        assert_eq!(targets[0].dependencies, vec![h]);
    }
}
