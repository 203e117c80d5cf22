// plan.rs — Storage layout and feature flags for each equation set
//
// Decides, once and from attributes alone, where every variable lives
// (instance member, population member, temporary, buffered `next_` slot),
// which phase lists it joins, which optional methods the generated classes
// need, and how the per-instance flag word is laid out. Also registers the
// process-wide static objects (constant matrices, file-backed I/O holders).
//
// Preconditions: the model is resolved and analyzed (and has exponents in
//   fixed-point mode). It is not modified again.
// Postconditions: `Plans` holds one `SetPlan` per set, indexed by `SetId`.
// Failure modes: illegal `$type` conversions and non-constant file names
//   abort the job.
// Side effects: none.

use std::collections::{HashMap, HashSet};
use std::ops::Index;

use tracing::debug;

use crate::analyze::{can_grow, is_singleton};
use crate::attr::Attr;
use crate::error::{AbortRun, Result};
use crate::events::{self, EventSource, EventTarget, DELAY_COMPUTED};
use crate::expr::{Descend, Expr, ExprKey, ExprKind, Func};
use crate::id::{SetId, VarId};
use crate::model::{mangle, AccountableConnection, Assignment, LiveReference, Model};

// ── Per-scope lists ──────────────────────────────────────────────────────

/// Lists and flags for one storage scope: the instance (local) or the
/// population (global).
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub members: Vec<VarId>,
    /// Every variable with a `next_` slot.
    pub buffered: Vec<VarId>,
    pub buffered_internal: Vec<VarId>,
    pub buffered_internal_update: Vec<VarId>,
    pub buffered_internal_derivative: Vec<VarId>,
    /// `next_` is a member, written by other sets or read across sets.
    pub buffered_external: Vec<VarId>,
    pub buffered_external_derivative: Vec<VarId>,
    pub buffered_external_write: Vec<VarId>,
    pub buffered_external_write_derivative: Vec<VarId>,
    pub init: Vec<VarId>,
    pub update: Vec<VarId>,
    pub integrated: Vec<VarId>,
    pub derivative: Vec<VarId>,
    pub derivative_update: Vec<VarId>,
    /// Members overwritten while derivatives are evaluated, restored after.
    pub derivative_preserve: Vec<VarId>,
    /// Output column-name slots filled in at init.
    pub columns: Vec<(String, VarId)>,
    pub need_ctor: bool,
    pub need_dtor: bool,
    pub need_init: bool,
    pub need_finalize: bool,
    pub need_preserve: bool,
    pub need_path: bool,
    pub flag_type: Option<&'static str>,
}

impl Scope {
    fn add_buffered(&mut self, v: VarId) {
        if !self.buffered.contains(&v) {
            self.buffered.push(v);
        }
    }
}

/// A `$type` change from one part type into a sibling type, generated as a
/// method of the common container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conversion {
    pub from: SetId,
    pub to: SetId,
}

#[derive(Debug, Clone)]
pub struct SetPlan<'m> {
    pub set: SetId,
    pub local: Scope,
    pub global: Scope,

    pub need_local_die: bool,
    pub need_local_event_delay: bool,
    pub need_global_finalize_n: bool,
    pub can_resize: bool,
    pub can_grow_or_die: bool,
    pub track_instances: bool,
    pub singleton: bool,
    pub refcount: bool,
    pub last_t: bool,
    pub has_project: bool,
    pub n_init_only: bool,
    pub has_index: bool,
    /// Some connection binds to this set.
    pub connected: bool,

    pub n: Option<VarId>,
    pub index: Option<VarId>,
    pub live: Option<VarId>,
    pub p: Option<VarId>,
    pub dt: Option<VarId>,
    pub t: Option<VarId>,
    pub type_: Option<VarId>,
    pub xyz: Option<VarId>,

    pub newborn: Option<u32>,
    pub live_flag: Option<u32>,
    /// Population flag bit: newborn instances are waiting to be cleared.
    pub clear_new: Option<u32>,

    pub event_targets: Vec<EventTarget<'m>>,
    pub event_sources: Vec<EventSource>,
    pub event_references: Vec<VarId>,
    pub local_reference: Vec<LiveReference>,
    /// Bindings of this connection whose endpoints count attachments.
    pub accountable_endpoints: Vec<usize>,
    /// Attachment counters this set keeps for limited connections.
    pub accountable_connections: Vec<AccountableConnection>,
    pub path_to_container: Option<usize>,
    /// `$type` conversions among this set's children.
    pub conversions: Vec<Conversion>,
}

impl SetPlan<'_> {
    /// Number of bits used in the instance flag word.
    pub fn local_flag_count(&self) -> u32 {
        self.event_targets.len() as u32
            + u32::from(self.live_flag.is_some())
            + u32::from(self.newborn.is_some())
    }

    /// Stored in an instance or population member.
    pub fn is_member(&self, v: VarId) -> bool {
        self.local.members.contains(&v) || self.global.members.contains(&v)
    }

    pub fn is_buffered(&self, v: VarId) -> bool {
        self.local.buffered.contains(&v) || self.global.buffered.contains(&v)
    }

    pub fn is_buffered_external(&self, v: VarId) -> bool {
        self.local.buffered_external.contains(&v) || self.global.buffered_external.contains(&v)
    }
}

// ── Static objects ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticKind {
    /// A constant matrix literal.
    Literal,
    MatrixFile,
    Input,
    Output,
}

#[derive(Debug, Clone)]
pub struct StaticObject<'m> {
    pub name: String,
    pub kind: StaticKind,
    pub file: String,
    /// The literal (for `Literal`) or the first call that named the file.
    pub expr: &'m Expr,
    pub input_time: bool,
}

/// Objects declared once at file scope and shared by every instance.
#[derive(Debug, Clone, Default)]
pub struct Statics<'m> {
    pub objects: Vec<StaticObject<'m>>,
    names: HashMap<ExprKey, String>,
    columns: HashMap<ExprKey, String>,
}

impl<'m> Statics<'m> {
    /// Static object that stands for `expr` (a constant matrix literal or a
    /// file-backed call).
    pub fn name_of(&self, expr: &Expr) -> Option<&str> {
        self.names.get(&ExprKey::of(expr)).map(String::as_str)
    }

    /// Generated column-name slot of an `output` call that names no column.
    pub fn column_of(&self, expr: &Expr) -> Option<&str> {
        self.columns.get(&ExprKey::of(expr)).map(String::as_str)
    }
}

/// Where an `output` call's file name and value sit among its operands.
pub fn output_operands(args: &[Expr]) -> (Option<&str>, usize) {
    match args.first().and_then(Expr::as_text) {
        Some(file) if args.len() > 1 => (Some(file), 1),
        _ => (None, 0),
    }
}

#[derive(Default)]
struct StaticsBuilder<'m> {
    statics: Statics<'m>,
    matrices: usize,
    inputs: usize,
    outputs: usize,
    columns: usize,
}

impl<'m> StaticsBuilder<'m> {
    fn file_object(&mut self, kind: StaticKind, file: &str, expr: &'m Expr) -> String {
        if let Some(o) = self
            .statics
            .objects
            .iter()
            .find(|o| o.kind == kind && o.file == file)
        {
            return o.name.clone();
        }
        let counter = match kind {
            StaticKind::Literal | StaticKind::MatrixFile => &mut self.matrices,
            StaticKind::Input => &mut self.inputs,
            StaticKind::Output => &mut self.outputs,
        };
        let stem = match kind {
            StaticKind::Literal | StaticKind::MatrixFile => "Matrix",
            StaticKind::Input => "Input",
            StaticKind::Output => "Output",
        };
        let name = format!("{}{}", stem, *counter);
        *counter += 1;
        let input_time = kind == StaticKind::Input
            && matches!(&expr.kind, ExprKind::Call(_, args)
                if args.get(3).and_then(Expr::as_text).is_some_and(|m| m.contains("time")));
        self.statics.objects.push(StaticObject {
            name: name.clone(),
            kind,
            file: file.to_string(),
            expr,
            input_time,
        });
        name
    }

    fn visit_node(
        &mut self,
        model: &Model,
        v: VarId,
        e: &'m Expr,
        columns: &mut Vec<(String, VarId)>,
    ) -> Result<Descend> {
        match &e.kind {
            ExprKind::Matrix(rows)
                if rows.iter().flatten().all(|c| c.constant_value().is_some()) =>
            {
                let name = format!("Matrix{}", self.matrices);
                self.matrices += 1;
                self.statics.objects.push(StaticObject {
                    name: name.clone(),
                    kind: StaticKind::Literal,
                    file: String::new(),
                    expr: e,
                    input_time: false,
                });
                self.statics.names.insert(ExprKey::of(e), name);
                return Ok(Descend::Skip);
            }
            ExprKind::Call(f @ (Func::Input | Func::Matrix), args) => {
                let file = args.first().and_then(Expr::as_text).ok_or_else(|| {
                    AbortRun::DynamicFileName {
                        variable: model.var_path(v),
                        function: f.name().to_string(),
                    }
                })?;
                let kind = if *f == Func::Input {
                    StaticKind::Input
                } else {
                    StaticKind::MatrixFile
                };
                let name = self.file_object(kind, file, e);
                self.statics.names.insert(ExprKey::of(e), name);
            }
            ExprKind::Call(Func::Output, args) => {
                let (file, value) = output_operands(args);
                let name = self.file_object(StaticKind::Output, file.unwrap_or(""), e);
                self.statics.names.insert(ExprKey::of(e), name);
                if args.len() <= value + 1 {
                    let column = format!("columnName{}", self.columns);
                    self.columns += 1;
                    self.statics.columns.insert(ExprKey::of(e), column.clone());
                    columns.push((column, v));
                }
            }
            _ => {}
        }
        Ok(Descend::Continue)
    }

    /// Register the static objects of one expression tree. Generated output
    /// column slots are appended to `columns`.
    fn register(
        &mut self,
        model: &Model,
        v: VarId,
        expr: &'m Expr,
        columns: &mut Vec<(String, VarId)>,
    ) -> Result<()> {
        let mut failure = None;
        expr.visit(&mut |e: &'m Expr| {
            if failure.is_some() {
                return Descend::Skip;
            }
            match self.visit_node(model, v, e, columns) {
                Ok(d) => d,
                Err(err) => {
                    failure = Some(err);
                    Descend::Skip
                }
            }
        });
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

// ── Plans ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Plans<'m> {
    plans: Vec<SetPlan<'m>>,
    pub statics: Statics<'m>,
}

impl<'m> Plans<'m> {
    pub fn get(&self, set: SetId) -> &SetPlan<'m> {
        &self.plans[set.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &SetPlan<'m>> {
        self.plans.iter()
    }
}

impl<'m> Index<SetId> for Plans<'m> {
    type Output = SetPlan<'m>;

    fn index(&self, set: SetId) -> &SetPlan<'m> {
        self.get(set)
    }
}

/// Name of the per-instance attachment counter for a limited connection.
pub fn count_name(model: &Model, ac: &AccountableConnection) -> String {
    let alias = &model.set(ac.connection).bindings[ac.binding].alias;
    format!("{}_{}_count", model.prefix(Some(ac.connection)), mangle(alias))
}

pub fn flag_type(bits: u32) -> Option<&'static str> {
    match bits {
        0 => None,
        1 => Some("bool"),
        2..=8 => Some("uint8_t"),
        9..=16 => Some("uint16_t"),
        17..=32 => Some("uint32_t"),
        _ => Some("uint64_t"),
    }
}

/// Temporaries of `set` needed to evaluate `seeds`, in evaluation order.
/// A seed that is itself a temporary is included; any other seed only
/// contributes what it reads.
pub fn temporaries_of(model: &Model, set: SetId, seeds: &[VarId]) -> Vec<VarId> {
    let mut pending: Vec<VarId> = Vec::new();
    for &s in seeds {
        let var = model.var(s);
        if var.has(Attr::Temporary) {
            pending.push(s);
        } else if var.set == set {
            pending.extend(var.uses.iter().copied());
        }
    }
    let mut reached: HashSet<VarId> = HashSet::new();
    while let Some(v) = pending.pop() {
        let var = model.var(v);
        if var.set != set || !var.has(Attr::Temporary) || !reached.insert(v) {
            continue;
        }
        pending.extend(var.uses.iter().copied());
    }
    model
        .set(set)
        .ordered
        .iter()
        .copied()
        .filter(|v| reached.contains(v))
        .collect()
}

/// Variables the runtime supplies, that live in the flag word, or that are
/// only evaluated while finalizing (`$type`).
fn is_runtime_special(model: &Model, v: VarId) -> bool {
    let var = model.var(v);
    var.has(Attr::Preexistent)
        || (var.order == 0 && (var.name == "$live" || var.name == "$type"))
}

/// The derivatives of `set` plus everything in `set` they read that is
/// recomputed rather than integrated or fixed at init.
fn derivative_closure(model: &Model, set: SetId) -> HashSet<VarId> {
    let mut pending: Vec<VarId> = model
        .set(set)
        .variables
        .iter()
        .filter_map(|&v| {
            let var = model.var(v);
            if var.has(Attr::Preexistent) {
                None
            } else {
                var.derivative
            }
        })
        .collect();
    let mut reached = HashSet::new();
    while let Some(v) = pending.pop() {
        let var = model.var(v);
        if var.set != set
            || var.derivative.is_some()
            || var.has_any(&[Attr::Constant, Attr::InitOnly, Attr::Preexistent])
            || !reached.insert(v)
        {
            continue;
        }
        pending.extend(var.uses.iter().copied());
    }
    reached
}

fn derivative_of(model: &Model, set: SetId, v: VarId) -> bool {
    model
        .set(set)
        .variables
        .iter()
        .any(|&w| w != v && model.var(w).derivative == Some(v) && !model.var(w).has(Attr::Preexistent))
}

fn updates(model: &Model, v: VarId) -> bool {
    let var = model.var(v);
    if var.has_any(&[Attr::InitOnly, Attr::Constant]) || var.equations.is_empty() {
        return false;
    }
    if var.derivative.is_some() {
        return var.equations.iter().any(|e| !e.is_unconditional() && !e.is_init());
    }
    true
}

fn categorize(model: &Model, set: SetId, plan: &mut SetPlan<'_>) {
    let closure = derivative_closure(model, set);
    for &v in &model.set(set).ordered {
        let var = model.var(v);
        let scope = if var.has(Attr::Global) {
            &mut plan.global
        } else {
            &mut plan.local
        };
        if is_runtime_special(model, v) || var.has(Attr::Constant) {
            continue;
        }
        let name = var.name.as_str();
        let is_n = name == "$n" && var.order == 0;

        let init_only = var.has(Attr::InitOnly);
        let temporary = var.has(Attr::Temporary);
        let unused_temporary = temporary && var.users.is_empty();
        let empty_combiner = var.assignment != Assignment::Replace && var.equations.is_empty();
        let updates = updates(model, v);
        let in_derivative = closure.contains(&v);
        let is_derivative = derivative_of(model, set, v);
        let integrated = var.derivative.is_some();

        if !unused_temporary && !empty_combiner && !var.equations.is_empty() {
            scope.init.push(v);
        }
        if updates && !unused_temporary {
            scope.update.push(v);
            if in_derivative {
                scope.derivative_update.push(v);
            }
        }

        let member = var.is_member()
            && !var.has(Attr::Reference)
            && !(is_n && (init_only || var.equations.is_empty()));
        if !member {
            continue;
        }
        scope.members.push(v);
        if integrated {
            scope.integrated.push(v);
        }
        if is_derivative {
            scope.derivative.push(v);
        } else if in_derivative && updates && !integrated {
            scope.derivative_preserve.push(v);
        }

        let mut external = false;
        if var.has(Attr::ExternalWrite) {
            external = true;
            scope.buffered_external_write.push(v);
            if in_derivative {
                scope.buffered_external_write_derivative.push(v);
            }
        }
        if external || (var.has(Attr::ExternalRead) && updates) {
            external = true;
            scope.buffered_external.push(v);
            scope.add_buffered(v);
            if in_derivative {
                scope.buffered_external_derivative.push(v);
            }
        }
        if !external && var.has(Attr::Cycle) {
            scope.buffered_internal.push(v);
            scope.add_buffered(v);
            if !init_only {
                scope.buffered_internal_update.push(v);
            }
            if in_derivative {
                scope.buffered_internal_derivative.push(v);
            }
        }
    }
}

fn conversions(model: &Model, set: SetId) -> Result<Vec<Conversion>> {
    let mut found: Vec<Conversion> = Vec::new();
    for &from in &model.set(set).parts {
        for split in &model.set(from).splits {
            for &to in split {
                if to == from || found.contains(&Conversion { from, to }) {
                    continue;
                }
                let (f, t) = (model.set(from), model.set(to));
                if f.is_connection() != t.is_connection() {
                    return Err(AbortRun::TypeChangeConnectivity {
                        from: model.path(from),
                        to: model.path(to),
                    });
                }
                for b in &t.bindings {
                    if f.binding(&b.alias).is_none() {
                        return Err(AbortRun::UnfulfilledBinding {
                            from: model.path(from),
                            to: model.path(to),
                            alias: b.alias.clone(),
                        });
                    }
                }
                found.push(Conversion { from, to });
            }
        }
    }
    Ok(found)
}

fn plan_set<'m>(model: &'m Model, set: SetId, connected: bool) -> Result<SetPlan<'m>> {
    let s = model.set(set);
    let find = |name: &str, order: u32| model.find(set, name, order);
    let singleton = is_singleton(model, set);

    let mut plan = SetPlan {
        set,
        local: Scope::default(),
        global: Scope::default(),
        need_local_die: false,
        need_local_event_delay: false,
        need_global_finalize_n: false,
        can_resize: false,
        can_grow_or_die: s.can_die() || can_grow(model, set),
        track_instances: false,
        singleton,
        refcount: s.referenced,
        last_t: false,
        has_project: false,
        n_init_only: false,
        has_index: false,
        connected,
        n: find("$n", 0),
        index: find("$index", 0),
        live: find("$live", 0),
        p: find("$p", 0),
        dt: find("$t", 1),
        t: find("$t", 0),
        type_: find("$type", 0),
        xyz: find("$xyz", 0),
        newborn: None,
        live_flag: None,
        clear_new: None,
        event_targets: Vec::new(),
        event_sources: Vec::new(),
        event_references: events::event_references(model, set),
        local_reference: s.live_references.clone(),
        accountable_endpoints: Vec::new(),
        accountable_connections: s.accountable_connections.clone(),
        path_to_container: s.path_to_container,
        conversions: conversions(model, set)?,
    };

    categorize(model, set, &mut plan);

    if let Some(n) = plan.n {
        let var = model.var(n);
        plan.n_init_only = var.has(Attr::InitOnly);
        plan.can_resize = !singleton && plan.global.members.contains(&n);
    }
    plan.need_global_finalize_n = model.is_root(set) && plan.n.is_some() && !singleton;
    plan.track_instances = !singleton && (connected || plan.can_resize);
    plan.has_index = !singleton && (plan.index.is_some() || plan.track_instances);
    plan.has_project = s.bindings.iter().any(|b| {
        model
            .find(set, &format!("{}.$project", b.alias), 0)
            .is_some()
    });
    for ac in &model.sets {
        for a in &ac.accountable_connections {
            if a.connection == set && !plan.accountable_endpoints.contains(&a.binding) {
                plan.accountable_endpoints.push(a.binding);
            }
        }
    }

    plan.event_targets = events::find_targets(model, set, &plan.local.buffered_external);
    plan.need_local_event_delay = plan
        .event_targets
        .iter()
        .any(|t| t.delay == DELAY_COMPUTED);
    plan.last_t = !plan.local.integrated.is_empty() && !plan.event_targets.is_empty();

    // Flag word: latch bits, then live, then newborn.
    let mut bit = plan.event_targets.len() as u32;
    if plan.live.is_some_and(|l| !model.var(l).has(Attr::Constant)) {
        plan.live_flag = Some(bit);
        bit += 1;
    }
    if connected {
        plan.newborn = Some(bit);
        plan.clear_new = Some(0);
    }
    plan.local.flag_type = flag_type(plan.local_flag_count());
    plan.global.flag_type = flag_type(u32::from(plan.clear_new.is_some()));

    Ok(plan)
}

/// Optional-method flags that depend only on the finished lists.
fn settle_needs(model: &Model, plan: &mut SetPlan<'_>) {
    let set = plan.set;
    let s = model.set(set);
    let has_sources = !plan.event_sources.is_empty();

    plan.local.need_preserve = !plan.local.integrated.is_empty()
        || !plan.local.derivative_preserve.is_empty()
        || !plan.local.buffered_external_write_derivative.is_empty();
    plan.global.need_preserve = !plan.global.integrated.is_empty()
        || !plan.global.derivative_preserve.is_empty()
        || !plan.global.buffered_external_write_derivative.is_empty();

    plan.need_local_die = plan.live_flag.is_some()
        || (plan.n.is_some() && !plan.singleton)
        || !plan.accountable_endpoints.is_empty()
        || plan.event_targets.iter().any(|t| !t.sources.is_empty());

    plan.local.need_ctor = !plan.local.derivative.is_empty()
        || plan.local.need_preserve
        || plan.refcount
        || plan.has_index
        || !plan.local.members.is_empty()
        || !plan.accountable_connections.is_empty()
        || !s.parts.is_empty()
        || plan.local.flag_type.is_some()
        || !plan.event_targets.is_empty();
    plan.local.need_dtor = !plan.local.derivative.is_empty() || plan.local.need_preserve;

    plan.local.need_init = !plan.local.init.is_empty()
        || !plan.local.buffered_external.is_empty()
        || plan.local.flag_type.is_some()
        || !plan.event_targets.is_empty()
        || plan.dt.is_some_and(|dt| !model.var(dt).equations.is_empty())
        || (plan.n.is_some() && !plan.singleton)
        || !plan.accountable_endpoints.is_empty()
        || !plan.local.columns.is_empty()
        || plan.last_t
        || !s.parts.is_empty();

    plan.local.need_finalize = !plan.local.buffered_external.is_empty()
        || !plan.local.buffered_external_write.is_empty()
        || has_sources
        || !plan.event_targets.is_empty()
        || plan.type_.is_some_and(|t| !model.var(t).equations.is_empty())
        || s.can_die()
        || plan.last_t;

    plan.global.need_ctor = plan.has_index
        || (plan.can_resize && plan.can_grow_or_die)
        || !plan.global.derivative.is_empty()
        || plan.global.need_preserve
        || !plan.global.members.is_empty()
        || !plan.global.buffered_external.is_empty()
        || plan.global.flag_type.is_some();
    plan.global.need_dtor = !plan.global.derivative.is_empty() || plan.global.need_preserve;
    plan.global.need_init = !plan.global.init.is_empty()
        || !plan.global.buffered_external.is_empty()
        || !plan.global.columns.is_empty()
        || (plan.n.is_some() && !plan.singleton);
    plan.global.need_finalize = !plan.global.buffered_external.is_empty()
        || !plan.global.buffered_external_write.is_empty()
        || plan.can_resize
        || plan.need_global_finalize_n;
}

/// Mark `set` as needing a path, and every container below the root.
fn need_path(model: &Model, plans: &mut [SetPlan<'_>], set: SetId, global: bool) {
    let plan = &mut plans[set.index()];
    if global {
        plan.global.need_path = true;
    } else {
        plan.local.need_path = true;
    }
    let mut c = model.set(set).container;
    while let Some(container) = c {
        if model.is_root(container) {
            break;
        }
        plans[container.index()].local.need_path = true;
        c = model.set(container).container;
    }
}

pub fn build_plans(model: &Model) -> Result<Plans<'_>> {
    let connected: HashSet<SetId> = model
        .sets
        .iter()
        .flat_map(|s| s.bindings.iter().map(|b| b.endpoint))
        .collect();

    let mut plans = Vec::with_capacity(model.sets.len());
    for s in &model.sets {
        plans.push(plan_set(model, s.id, connected.contains(&s.id))?);
    }

    // Event sources attach to the monitored set's plan.
    for set in model.pre_order() {
        let count = plans[set.index()].event_targets.len();
        for index in 0..count {
            let sources = events::find_sources(model, &plans[set.index()].event_targets[index], index);
            let mut attached = Vec::with_capacity(sources.len());
            for mut source in sources {
                let monitored = &mut plans[source.container.index()].event_sources;
                source.monitor_index = monitored.len();
                monitored.push(source.clone());
                attached.push(source);
            }
            plans[set.index()].event_targets[index].sources = attached;
        }
    }

    // Static objects, children before containers.
    let mut builder = StaticsBuilder::default();
    let mut column_owners: Vec<(SetId, bool, String, VarId)> = Vec::new();
    for set in model.post_order() {
        for &v in &model.set(set).ordered {
            let var = model.var(v);
            let mut found = Vec::new();
            for entry in &var.equations {
                if let Some(c) = &entry.condition {
                    builder.register(model, v, c, &mut found)?;
                }
                builder.register(model, v, &entry.expression, &mut found)?;
            }
            let global = var.has(Attr::Global);
            for (name, owner) in found {
                column_owners.push((set, global, name, owner));
            }
        }
    }
    for (set, global, name, owner) in column_owners {
        let scope = if global {
            &mut plans[set.index()].global
        } else {
            &mut plans[set.index()].local
        };
        scope.columns.push((name, owner));
        if !model.is_root(set) {
            need_path(model, &mut plans, set, global);
        }
    }

    for plan in &mut plans {
        settle_needs(model, plan);
        debug!(
            "{}: {} local members, {} global members, {} events, flags {:?}",
            model.path(plan.set),
            plan.local.members.len(),
            plan.global.members.len(),
            plan.event_targets.len(),
            plan.local.flag_type
        );
    }

    Ok(Plans {
        plans,
        statics: builder.statics,
    })
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

    fn var(m: &Model, set: SetId, name: &str) -> VarId {
        m.find(set, name, 0).unwrap()
    }

    #[test]
    fn flag_type_widths() {
        assert_eq!(flag_type(0), None);
        assert_eq!(flag_type(1), Some("bool"));
        assert_eq!(flag_type(8), Some("uint8_t"));
        assert_eq!(flag_type(9), Some("uint16_t"));
        assert_eq!(flag_type(32), Some("uint32_t"));
        assert_eq!(flag_type(33), Some("uint64_t"));
    }

    #[test]
    fn integrated_population_lists() {
        let m = analyzed(
            r#"{"name": "M", "parts": [{"name": "A", "variables": [
                {"name": "$n", "equations": ["5"]},
                {"name": "x'", "equations": ["-x"]}
            ]}]}"#,
        );
        let a = part(&m, "A");
        let plans = build_plans(&m).unwrap();
        let p = &plans[a];
        let x = var(&m, a, "x");
        let dx = m.find(a, "x", 1).unwrap();
        assert!(!p.singleton);
        assert_eq!(p.local.integrated, vec![x]);
        assert_eq!(p.local.derivative, vec![dx]);
        assert!(p.local.derivative_update.contains(&dx));
        assert!(p.local.members.contains(&x));
        assert!(p.local.need_preserve);
        assert!(p.local.need_dtor);
        assert!(p.global.members.is_empty());
        assert!(!p.can_resize);
    }

    #[test]
    fn singleton_has_no_index_or_flags() {
        let m = analyzed(
            r#"{"name": "M", "parts": [{"name": "A", "variables": [
                {"name": "y", "equations": ["$index + $t"]}
            ]}]}"#,
        );
        let a = part(&m, "A");
        let plans = build_plans(&m).unwrap();
        assert!(plans[a].singleton);
        assert!(!plans[a].has_index);
        assert!(!plans[a].track_instances);
        assert_eq!(plans[a].local.flag_type, None);
    }

    #[test]
    fn cycle_members_are_buffered_internally() {
        let m = analyzed(
            r#"{"name": "M", "variables": [
                {"name": "a", "equations": ["b + $t"]},
                {"name": "b", "attributes": ["temporary"], "equations": ["a + 1"]}
            ]}"#,
        );
        let plans = build_plans(&m).unwrap();
        let a = var(&m, m.root, "a");
        let p = &plans[m.root];
        assert_eq!(p.local.buffered_internal, vec![a]);
        assert_eq!(p.local.buffered_internal_update, vec![a]);
        assert!(p.local.buffered_external.is_empty());
        assert!(p.is_buffered(a));
    }

    #[test]
    fn external_write_is_buffered_externally() {
        let m = analyzed(
            r#"{"name": "M", "variables": [{"name": "total", "equations": ["0 @ $init"]}], "parts": [
                {"name": "A", "variables": [{"name": "$up.total", "assignment": "add", "equations": ["1"]}]}
            ]}"#,
        );
        let plans = build_plans(&m).unwrap();
        let total = var(&m, m.root, "total");
        let p = &plans[m.root];
        assert_eq!(p.local.buffered_external_write, vec![total]);
        assert_eq!(p.local.buffered_external, vec![total]);
        assert!(p.local.need_finalize);
        let a = part(&m, "A");
        let writer = m.find(a, "$up.total", 0).unwrap();
        assert!(!plans[a].is_member(writer));
        assert!(plans[a].local.update.contains(&writer));
    }

    #[test]
    fn lethal_set_stores_live_and_newborn_flags() {
        let m = analyzed(
            r#"{"name": "M", "parts": [
                {"name": "A", "variables": [
                    {"name": "$n", "equations": ["3"]},
                    {"name": "$p", "equations": ["0.5"]},
                    {"name": "v", "equations": ["v + 1"]},
                    {"name": "w", "equations": ["1 @ event (v > 2)"]}
                ]},
                {"name": "C", "connect": [{"alias": "a", "endpoint": "A"}]}
            ]}"#,
        );
        let a = part(&m, "A");
        let plans = build_plans(&m).unwrap();
        let p = &plans[a];
        assert_eq!(p.event_targets.len(), 1);
        assert_eq!(p.live_flag, Some(1));
        assert_eq!(p.newborn, Some(2));
        assert_eq!(p.local_flag_count(), 3);
        assert_eq!(p.local.flag_type, Some("uint8_t"));
        assert_eq!(p.global.flag_type, Some("bool"));
        assert!(p.track_instances);
        assert!(p.has_index);
        assert!(p.need_local_die);
        assert_eq!(p.event_sources.len(), 1);
        assert_eq!(p.event_sources[0].monitor_name(), "eventMonitor_0");
    }

    #[test]
    fn type_change_between_connection_and_part_aborts() {
        let m = analyzed(
            r#"{"name": "M", "parts": [
                {"name": "A", "variables": [{"name": "$type", "equations": ["C @ $t > 1"]}]},
                {"name": "B"},
                {"name": "C", "connect": [{"alias": "b", "endpoint": "B"}]}
            ]}"#,
        );
        let err = build_plans(&m).unwrap_err();
        assert!(matches!(err, AbortRun::TypeChangeConnectivity { .. }));
    }

    #[test]
    fn type_change_needs_every_target_binding() {
        let m = analyzed(
            r#"{"name": "M", "parts": [
                {"name": "B"},
                {"name": "C", "connect": [{"alias": "x", "endpoint": "B"}],
                 "variables": [{"name": "$type", "equations": ["D @ $t > 1"]}]},
                {"name": "D", "connect": [{"alias": "y", "endpoint": "B"}]}
            ]}"#,
        );
        let err = build_plans(&m).unwrap_err();
        assert!(matches!(err, AbortRun::UnfulfilledBinding { ref alias, .. } if alias == "y"));
    }

    #[test]
    fn conversions_live_on_the_container() {
        let m = analyzed(
            r#"{"name": "M", "parts": [
                {"name": "A", "variables": [
                    {"name": "$n", "equations": ["2"]},
                    {"name": "$type", "equations": ["A, B @ $t > 1"]}
                ]},
                {"name": "B"}
            ]}"#,
        );
        let (a, b) = (part(&m, "A"), part(&m, "B"));
        let plans = build_plans(&m).unwrap();
        assert_eq!(plans[m.root].conversions, vec![Conversion { from: a, to: b }]);
    }

    #[test]
    fn statics_share_file_handles_and_name_columns() {
        let m = analyzed(
            r#"{"name": "M", "parts": [{"name": "A", "variables": [
                {"name": "$n", "equations": ["2"]},
                {"name": "x", "equations": ["input (\"in.txt\", 0, 1)"]},
                {"name": "y", "equations": ["input (\"in.txt\", 0, 2)"]},
                {"name": "z", "attributes": ["dummy"], "equations": ["output (\"out.txt\", x)"]},
                {"name": "w", "equations": ["[1, 2; 3, 4]"]}
            ]}]}"#,
        );
        let a = part(&m, "A");
        let plans = build_plans(&m).unwrap();
        let kinds: Vec<(StaticKind, &str)> = plans
            .statics
            .objects
            .iter()
            .map(|o| (o.kind, o.name.as_str()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (StaticKind::Input, "Input0"),
                (StaticKind::Output, "Output0"),
                (StaticKind::Literal, "Matrix0"),
            ]
        );
        let z = var(&m, a, "z");
        assert_eq!(plans[a].local.columns, vec![("columnName0".to_string(), z)]);
        assert!(plans[a].local.need_path);
        assert!(!plans[m.root].local.need_path);
    }

    #[test]
    fn dynamic_file_name_aborts() {
        let m = analyzed(
            r#"{"name": "M", "variables": [
                {"name": "f", "equations": ["$t"]},
                {"name": "x", "equations": ["input (f, 0, 1)"]}
            ]}"#,
        );
        let err = build_plans(&m).unwrap_err();
        assert!(matches!(err, AbortRun::DynamicFileName { .. }));
    }

    #[test]
    fn accountable_connection_counts_at_endpoint() {
        let m = analyzed(
            r#"{"name": "M", "parts": [
                {"name": "A", "variables": [{"name": "$n", "equations": ["4"]}]},
                {"name": "C", "connect": [{"alias": "a", "endpoint": "A"}],
                 "variables": [{"name": "a.$max", "equations": ["2"]}]}
            ]}"#,
        );
        let (a, c) = (part(&m, "A"), part(&m, "C"));
        let plans = build_plans(&m).unwrap();
        assert_eq!(plans[c].accountable_endpoints, vec![0]);
        let ac = plans[a].accountable_connections[0];
        assert_eq!(count_name(&m, &ac), "_M__C__a_count");
    }
}
