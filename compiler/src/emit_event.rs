// emit_event.rs — Event detection, delivery and monitor bookkeeping
//
// Target side: per-instance trigger slots, `eventTest`, `eventDelay`,
// `setLatch`, `finalizeEvent`, and registration in the monitor lists of the
// instances whose state the trigger reads. Source side: the loop in the
// monitored instance's `finalize` that tests each registered target and
// queues spikes, quantizing delays to the target's step where possible.
//
// Preconditions: plans are built; event sources are attached to the plans
//   of the monitored sets.
// Postconditions: none.
// Failure modes: none.
// Side effects: none.

use crate::attr::Attr;
use crate::codegen::{compute_temporaries, set_flag, EventMode};
use crate::cpp::{ClassCode, Stmt};
use crate::equations::temporary;
use crate::events::{Edge, EventSource, EventTarget, Track, DELAY_COMPUTED, DELAY_UNSPECIFIED};
use crate::exponent::time_exponent;
use crate::expr::Expr;
use crate::id::VarId;
use crate::render::{Phase, Renderer};

// ── Target fields ───────────────────────────────────────────────────────────

fn time_slot(index: usize) -> String {
    format!("eventTime{}", index)
}

/// Trigger history slots of this set's targets.
pub fn target_fields(r: &Renderer<'_, '_>, code: &mut ClassCode) {
    for target in &r.plans[r.set].event_targets {
        if let Some(Track::Aux(name)) = &target.track {
            code.decl(format!("{} {}", r.t(), name));
        }
        if let Some(i) = target.time_index {
            code.decl(format!("{} {}", r.t(), time_slot(i)));
        }
    }
}

/// Monitor lists held by instances of a monitored set.
pub fn monitor_fields(r: &Renderer<'_, '_>, code: &mut ClassCode) {
    for source in &r.plans[r.set].event_sources {
        code.decl(format!(
            "std::vector<{} *> {}",
            r.model.prefix(Some(source.target_set)),
            source.monitor_name()
        ));
    }
}

/// Reset of the trigger slots, for a fresh or recycled instance.
pub fn clear_slots(r: &Renderer<'_, '_>) -> Vec<Stmt> {
    let mut out = Vec::new();
    for target in &r.plans[r.set].event_targets {
        if let Some(Track::Aux(name)) = &target.track {
            out.push(Stmt::line(format!("{} = 0;", name)));
        }
        if let Some(i) = target.time_index {
            out.push(Stmt::line(format!("{} = -1;", time_slot(i))));
        }
    }
    out
}

fn monitor_path(r: &Renderer<'_, '_>, source: &EventSource) -> String {
    format!("{}{}", r.instance_path(&source.reference), source.monitor_name())
}

/// Join the monitor lists and seed the trigger history. Runs at the end of
/// `init`, after every temporary the triggers read has been computed.
pub fn target_init(r: &Renderer<'_, '_>) -> Vec<Stmt> {
    let r = r.in_phase(Phase::Init);
    let mut out = Vec::new();
    for target in &r.plans[r.set].event_targets {
        if let (Some(Track::Aux(name)), Some(condition)) = (&target.track, target.condition()) {
            out.extend(r.prepare(condition));
            out.push(Stmt::line(format!("{} = {};", name, r.expr(condition))));
        }
        for source in &target.sources {
            out.push(Stmt::line(format!("{}.push_back (this);", monitor_path(&r, source))));
        }
    }
    out
}

/// Leave every monitor list held by another instance.
pub fn target_die(r: &Renderer<'_, '_>) -> Vec<Stmt> {
    let mut out = Vec::new();
    for target in &r.plans[r.set].event_targets {
        for source in target.sources.iter().filter(|s| !s.reference.is_empty()) {
            out.push(Stmt::line(format!("removeMonitor ({}, this);", monitor_path(r, source))));
        }
    }
    out
}

// ── Target methods ──────────────────────────────────────────────────────────

fn edge_test(r: &Renderer<'_, '_>, target: &EventTarget<'_>) -> Vec<Stmt> {
    match (target.edge, target.time_index) {
        (Edge::Nonzero, Some(i)) => {
            let now = format!("{}.currentEvent->t", r.simulator());
            vec![
                Stmt::line("if (after == 0) return false;"),
                Stmt::line(format!("if ({} == {}) return false;", time_slot(i), now)),
                Stmt::line(format!("{} = {};", time_slot(i), now)),
                Stmt::line("return true;"),
            ]
        }
        (Edge::Nonzero, None) => vec![Stmt::line("return after != 0;")],
        (Edge::Change, _) => vec![Stmt::line("return before != after;")],
        (Edge::Fall, _) => vec![Stmt::line("return before != 0 && after == 0;")],
        (Edge::Rise, _) => vec![Stmt::line("return before == 0 && after != 0;")],
    }
}

fn test_case(r: &Renderer<'_, '_>, target: &EventTarget<'_>) -> Vec<Stmt> {
    let t = r.t();
    let mut body: Vec<Stmt> = target
        .dependencies
        .iter()
        .flat_map(|&d| temporary(r, d))
        .collect();
    let condition = target.condition();
    let after = |body: &mut Vec<Stmt>| {
        if let Some(c) = condition {
            body.extend(r.prepare(c));
            body.push(Stmt::line(format!("{} after = {};", t, r.expr(c))));
        } else {
            body.push(Stmt::line(format!("{} after = 0;", t)));
        }
    };
    match &target.track {
        Some(Track::Member(v)) => {
            body.push(Stmt::line(format!("{} before = {};", t, r.name(*v))));
            body.push(Stmt::line(format!("{} after = {};", t, r.next_name(*v))));
        }
        Some(Track::Aux(name)) => {
            body.push(Stmt::line(format!("{} before = {};", t, name)));
            after(&mut body);
            body.push(Stmt::line(format!("{} = after;", name)));
        }
        None => after(&mut body),
    }
    body.extend(edge_test(r, target));
    body
}

/// Temporaries a delay expression reads.
fn delay_dependencies(r: &Renderer<'_, '_>, delay: &Expr) -> Vec<VarId> {
    delay
        .refs()
        .into_iter()
        .filter(|x| x.is_local())
        .filter_map(|x| x.target)
        .filter(|&v| r.model.var(v).has(Attr::Temporary))
        .collect()
}

pub fn target_methods(r: &Renderer<'_, '_>, code: &mut ClassCode) {
    let plan = &r.plans[r.set];
    if plan.event_targets.is_empty() {
        return;
    }
    let r = r.in_phase(Phase::Update);

    let cases = plan
        .event_targets
        .iter()
        .map(|target| (format!("case {}:", target.value_index), test_case(&r, target)))
        .collect();
    code.method(
        "bool",
        "eventTest (int i)",
        vec![
            Stmt::Switch {
                subject: "i".into(),
                cases,
            },
            Stmt::line("return false;"),
        ],
    );

    if plan.need_local_event_delay {
        let mut cases = Vec::new();
        for target in plan.event_targets.iter().filter(|t| t.delay == DELAY_COMPUTED) {
            let Some(delay) = target.delay_expression() else {
                continue;
            };
            let mut body = compute_temporaries(&r, &delay_dependencies(&r, delay));
            body.extend(r.prepare(delay));
            body.push(Stmt::line(format!("return {};", r.expr(delay))));
            cases.push((format!("case {}:", target.value_index), body));
        }
        code.method(
            r.t(),
            "eventDelay (int i)",
            vec![
                Stmt::Switch {
                    subject: "i".into(),
                    cases,
                },
                Stmt::line("return -1;"),
            ],
        );
    }

    if let Some(ty) = plan.local.flag_type {
        code.method("void", "setLatch (int i)", vec![set_flag("", ty, "i")]);
    }

    if !plan.event_references.is_empty() {
        let mut body = Vec::new();
        for &v in &plan.event_references {
            let reference = &r.model.var(v).reference;
            let Some(target) = reference.target else {
                continue;
            };
            let path = r.container_path(&reference.resolution, target);
            body.push(Stmt::line(format!(
                "{}{} = {}{};",
                path,
                r.name(target),
                path,
                r.next_name(target)
            )));
        }
        code.method("void", "finalizeEvent ()", body);
    }
}

// ── Source side ─────────────────────────────────────────────────────────────

/// Who receives a spike: one target instance, or a whole monitor list.
enum Recipient<'s> {
    Single(&'s str),
    Multi(&'s str),
}

fn spike(r: &Renderer<'_, '_>, latch: bool, to: &Recipient<'_>, bit: usize, time: &str) -> Stmt {
    let t = r.t();
    let class = match (to, latch) {
        (Recipient::Single(_), false) => format!("EventSpikeSingle<{}>", t),
        (Recipient::Single(_), true) => format!("EventSpikeSingleLatch<{}>", t),
        (Recipient::Multi(_), false) => format!("EventSpikeMulti<{}>", t),
        (Recipient::Multi(_), true) => format!("EventSpikeMultiLatch<{}>", t),
    };
    let target = match to {
        Recipient::Single(p) => format!("spike->target = {};", p),
        Recipient::Multi(list) => format!("spike->targets = &{};", list),
    };
    Stmt::block(
        "",
        vec![
            Stmt::line(format!("{} * spike = new {};", class, class)),
            Stmt::line(format!("spike->t = {};", time)),
            Stmt::line(format!("spike->latch = {};", bit)),
            Stmt::line(target),
            Stmt::line(format!("{}.queueEvent.push (spike);", r.simulator())),
        ],
    )
}

/// Spike for a positive `delay` (a C++ variable in scope), aligned to the
/// step grid when the delay is a whole number of steps.
fn quantized(r: &Renderer<'_, '_>, to: &Recipient<'_>, bit: usize) -> Vec<Stmt> {
    let now = format!("{}.currentEvent->t", r.simulator());
    let mode = r.options.event_mode;
    let unaligned = spike(r, false, to, bit, &format!("{} + delay", now));
    if r.fixed() {
        let aligned = match mode {
            EventMode::During => spike(r, true, to, bit, &format!("{} + quantizedTime", now)),
            EventMode::After => spike(r, false, to, bit, &format!("{} + quantizedTime + 1", now)),
            EventMode::Before => spike(r, false, to, bit, &format!("{} + quantizedTime - 1", now)),
        };
        return vec![
            Stmt::line("EventStep<int> * event = getEvent ();"),
            Stmt::line("int step = (delay + event->dt / 2) / event->dt;"),
            Stmt::line("int quantizedTime = step * event->dt;"),
            Stmt::when_else("quantizedTime == delay", vec![aligned], vec![unaligned]),
        ];
    }
    let aligned = match mode {
        EventMode::During => spike(r, true, to, bit, &format!("{} + step * event->dt", now)),
        EventMode::After => spike(r, false, to, bit, &format!("{} + (step + 1e-6) * event->dt", now)),
        EventMode::Before => spike(r, false, to, bit, &format!("{} + (step - 1e-6) * event->dt", now)),
    };
    vec![
        Stmt::line(format!("EventStep<{}> * event = getEvent ();", r.t())),
        Stmt::line(format!("{} ratio = delay / event->dt;", r.t())),
        Stmt::line("int step = (int) round (ratio);"),
        Stmt::when_else("fabs (ratio - step) < 1e-3", vec![aligned], vec![unaligned]),
    ]
}

fn immediate(r: &Renderer<'_, '_>, to: &Recipient<'_>, bit: usize) -> Stmt {
    let now = format!("{}.currentEvent->t", r.simulator());
    spike(r, r.options.event_mode == EventMode::During, to, bit, &now)
}

/// Queue the spike(s) for one fired target.
fn deliver(r: &Renderer<'_, '_>, target: &EventTarget<'_>, to: &Recipient<'_>, who: &str) -> Vec<Stmt> {
    let bit = target.value_index;
    let now = format!("{}.currentEvent->t", r.simulator());
    let delay = target.delay;
    if delay == DELAY_UNSPECIFIED {
        return vec![spike(r, true, to, bit, &now)];
    }
    if delay == 0.0 {
        return vec![immediate(r, to, bit)];
    }
    if delay == DELAY_COMPUTED {
        return vec![Stmt::block(
            "",
            vec![
                Stmt::line(format!("{} delay = {}->eventDelay ({});", r.t(), who, bit)),
                Stmt::If {
                    arms: vec![
                        ("delay < 0".into(), vec![spike(r, true, to, bit, &now)]),
                        ("delay == 0".into(), vec![immediate(r, to, bit)]),
                    ],
                    otherwise: Some(quantized(r, to, bit)),
                },
            ],
        )];
    }
    let value = r.number(delay, Some(time_exponent(r.options.duration)));
    let mut body = vec![Stmt::line(format!("{} delay = {};", r.t(), value))];
    body.extend(quantized(r, to, bit));
    vec![Stmt::block("", body)]
}

/// Test and fire every target registered with this instance. Placed at the
/// start of the monitored instance's `finalize`.
pub fn source_finalize(r: &Renderer<'_, '_>) -> Vec<Stmt> {
    let mut out = Vec::new();
    for source in &r.plans[r.set].event_sources {
        let target = &r.plans[source.target_set].event_targets[source.target];
        let ty = r.model.prefix(Some(source.target_set));
        let monitor = source.monitor_name();
        let bit = target.value_index;
        let single = Recipient::Single("p");

        let mut each = Vec::new();
        if source.test_each {
            each.push(Stmt::line(format!("if (!p->eventTest ({})) continue;", bit)));
        }
        each.extend(deliver(r, target, &single, "p"));
        let per_target = Stmt::block(format!("for ({} * p : {})", ty, monitor), each);

        if source.test_each {
            out.push(per_target);
            continue;
        }
        let fired = format!("{}.size () && {}[0]->eventTest ({})", monitor, monitor, bit);
        if source.delay_each {
            out.push(Stmt::when(fired, vec![per_target]));
        } else {
            let multi = Recipient::Multi(&monitor);
            out.push(Stmt::when(fired, deliver(r, target, &multi, "")));
        }
    }
    out
}
