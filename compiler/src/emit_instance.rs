// emit_instance.rs — The instance class of an equation set
//
// Each live part is one object of this class. It holds the set's local
// state, its child populations, its connection endpoints and its flag word,
// and implements the runtime's lifecycle hooks: `init` on birth, then
// `integrate`, `update` and `finalize` every step, and `die` at the end.
// `$type` conversions among children are methods of the container, since
// the new part must be allocated from a sibling population.
//
// Preconditions: plans are built; the renderer is positioned at the set
//   with `global` clear.
// Postconditions: none.
// Failure modes: none.
// Side effects: none.

use crate::attr::Attr;
use crate::codegen::{
    children_where, clear_flag, commit_external, compute_temporaries, init_variables,
    integrate_body, integrator_fields, integrator_init, integrator_methods, integrator_release,
    population_integrates, population_updates, set_flag, test_flag, update_variables,
};
use crate::cpp::{ClassCode, Stmt};
use crate::emit_connect;
use crate::emit_event;
use crate::emit_population::{column_names, container_prefix};
use crate::equations::{clear_accumulator, multiconditional, zero};
use crate::id::SetId;
use crate::model::{mangle, AccountableConnection, Model};
use crate::plan::{count_name, Conversion};
use crate::render::{Phase, Renderer};

/// Container method that turns a part of `from` into a new part of `to`.
pub fn conversion_name(model: &Model, c: &Conversion) -> String {
    format!(
        "{}_2_{}",
        mangle(&model.set(c.from).name),
        mangle(&model.set(c.to).name)
    )
}

fn child_field(model: &Model, child: SetId) -> String {
    mangle(&model.set(child).name)
}

/// Statement that ends `finalize` for a dying part.
fn die_now() -> Vec<Stmt> {
    vec![Stmt::line("die ();"), Stmt::line("return false;")]
}

/// Counters on endpoints that limit how many connections attach to them.
fn endpoint_counts(r: &Renderer<'_, '_>, op: &str) -> Vec<Stmt> {
    let s = r.model.set(r.set);
    r.plans[r.set]
        .accountable_endpoints
        .iter()
        .map(|&i| {
            let ac = AccountableConnection {
                connection: r.set,
                binding: i,
            };
            Stmt::line(format!(
                "{}->{}{};",
                mangle(&s.bindings[i].alias),
                count_name(r.model, &ac),
                op
            ))
        })
        .collect()
}

fn fields(r: &Renderer<'_, '_>, code: &mut ClassCode) {
    let model = r.model;
    let set = r.set;
    let s = model.set(set);
    let plan = &r.plans[set];
    let t = r.t();

    code.decl(format!("{} * container", model.prefix(s.container)));
    for &child in &s.parts {
        code.decl(format!(
            "{}_Population {}",
            model.prefix(Some(child)),
            child_field(model, child)
        ));
    }
    emit_connect::binding_fields(r, code);
    if plan.refcount {
        code.decl("int refcount");
    }
    if plan.has_index {
        code.decl("int __24index");
    }
    if plan.last_t {
        code.decl(format!("{} lastT", t));
    }
    for &v in &plan.local.members {
        code.decl(format!("{} {}", r.type_name(v), r.name(v)));
    }
    for &v in &plan.local.buffered_external {
        code.decl(format!("{} {}", r.type_name(v), r.next_name(v)));
    }
    for (slot, _) in &plan.local.columns {
        code.decl(format!("String {}", slot));
    }
    if let Some(ty) = plan.local.flag_type {
        code.decl(format!("{} flags", ty));
    }
    emit_event::target_fields(r, code);
    for ac in &plan.accountable_connections {
        code.decl(format!("int {}", count_name(model, ac)));
    }
    emit_event::monitor_fields(r, code);
    integrator_fields(r, &plan.local, code);
}

fn clear_body(r: &Renderer<'_, '_>) -> Vec<Stmt> {
    let plan = &r.plans[r.set];
    let mut out = Vec::new();
    for &v in &plan.local.members {
        out.push(zero(r, v, &r.name(v)));
    }
    for &v in &plan.local.buffered_external {
        let next = r.next_name(v);
        out.push(clear_accumulator(r, v, &next).unwrap_or_else(|| zero(r, v, &next)));
    }
    if plan.local.flag_type.is_some() {
        out.push(Stmt::line("flags = 0;"));
    }
    out.extend(emit_event::clear_slots(r));
    for ac in &plan.accountable_connections {
        out.push(Stmt::line(format!("{} = 0;", count_name(r.model, ac))));
    }
    if plan.last_t {
        out.push(Stmt::line("lastT = 0;"));
    }
    out
}

fn lifetime(r: &Renderer<'_, '_>, code: &mut ClassCode) {
    let model = r.model;
    let plan = &r.plans[r.set];
    let clear = clear_body(r);

    let mut ctor = Vec::new();
    for &child in &model.set(r.set).parts {
        let field = child_field(model, child);
        ctor.push(Stmt::line(format!("{}.container = this;", field)));
        if r.plans[child].singleton {
            ctor.push(Stmt::line(format!("{}.instance.container = this;", field)));
        }
    }
    ctor.extend(integrator_init(&plan.local));
    if plan.has_index {
        ctor.push(Stmt::line("__24index = -1;"));
    }
    if plan.refcount {
        ctor.push(Stmt::line("refcount = 0;"));
    }
    if !clear.is_empty() {
        ctor.push(Stmt::line("clear ();"));
    }
    if plan.local.need_ctor || !ctor.is_empty() {
        code.constructor(ctor);
    }
    if plan.local.need_dtor {
        code.destructor(integrator_release(&plan.local));
    }
    if !clear.is_empty() {
        code.method("void", "clear ()", clear);
    }
}

/// `$t'` set by equation: change this part's period when it differs.
fn period(r: &Renderer<'_, '_>) -> Vec<Stmt> {
    let plan = &r.plans[r.set];
    let Some(dt) = plan.dt else {
        return Vec::new();
    };
    let var = r.model.var(dt);
    if var.equations.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::new();
    let value = match var.sole_expression().and_then(|e| e.constant_value()) {
        Some(c) => r.number(c, var.exponent),
        None => {
            out.push(Stmt::line(format!("{} {};", r.t(), r.name(dt))));
            out.extend(multiconditional(r, dt));
            r.name(dt)
        }
    };
    out.push(Stmt::line(format!(
        "if ({} != getEvent ()->dt) setPeriod ({});",
        value, value
    )));
    out
}

fn init_method(r: &Renderer<'_, '_>, code: &mut ClassCode) {
    let model = r.model;
    let plan = &r.plans[r.set];
    if !plan.local.need_init {
        return;
    }
    let ri = r.in_phase(Phase::Init);
    let mut body = Vec::new();
    if plan.last_t {
        body.push(Stmt::line(format!("lastT = {}.currentEvent->t;", r.simulator())));
    }
    if let (Some(bit), Some(ty)) = (plan.live_flag, plan.local.flag_type) {
        body.push(set_flag("", ty, bit));
    }
    body.extend(period(&ri));
    body.extend(init_variables(r, &plan.local));
    body.extend(column_names(r, &plan.local.columns, plan.local.need_path));
    body.extend(emit_event::target_init(r));
    for &child in &model.set(r.set).parts {
        body.push(Stmt::line(format!("{}.init ();", child_field(model, child))));
    }
    code.method("void", "init ()", body);
}

fn step_methods(r: &Renderer<'_, '_>, code: &mut ClassCode) {
    let model = r.model;
    let plans = r.plans;
    let plan = &plans[r.set];

    let integrating = children_where(model, plans, r.set, population_integrates);
    if !plan.local.integrated.is_empty() || !integrating.is_empty() {
        let mut body = Vec::new();
        if !plan.local.integrated.is_empty() {
            let dt = if plan.last_t {
                format!("{}.currentEvent->t - lastT", r.simulator())
            } else {
                "getEvent ()->dt".to_string()
            };
            body.extend(integrate_body(r, &plan.local, &dt));
        }
        for child in integrating {
            body.push(Stmt::line(format!("{}.integrate ();", child_field(model, child))));
        }
        code.method("void", "integrate ()", body);
    }

    let updating = children_where(model, plans, r.set, population_updates);
    let local_updates =
        !plan.local.update.is_empty() || !plan.local.buffered_internal_update.is_empty();
    if local_updates || !updating.is_empty() {
        let mut body = update_variables(r, &plan.local);
        for child in updating {
            body.push(Stmt::line(format!("{}.update ();", child_field(model, child))));
        }
        code.method("void", "update ()", body);
    }

    let finalizing = children_where(model, plans, r.set, |p| p.global.need_finalize);
    if plan.local.need_finalize || !finalizing.is_empty() {
        code.method("bool", "finalize ()", finalize_body(r, &finalizing));
    }
}

fn finalize_body(r: &Renderer<'_, '_>, children: &[SetId]) -> Vec<Stmt> {
    let model = r.model;
    let s = model.set(r.set);
    let plan = &r.plans[r.set];
    let mut body = emit_event::source_finalize(r);
    for &child in children {
        body.push(Stmt::line(format!("{}.finalize ();", child_field(model, child))));
    }
    if plan.last_t {
        body.push(Stmt::line(format!("lastT = {}.currentEvent->t;", r.simulator())));
    }
    body.extend(commit_external(r, &plan.local.buffered_external));
    if !plan.event_targets.is_empty() {
        if let Some(ty) = plan.local.flag_type {
            body.push(Stmt::line(format!(
                "flags &= ~({}) 0 << {};",
                ty,
                plan.event_targets.len()
            )));
        }
    }

    if s.lethal_container {
        body.push(Stmt::when("!container->getLive ()", die_now()));
    }
    if s.lethal_connection {
        let dead: Vec<String> = s
            .bindings
            .iter()
            .filter(|b| model.set(b.endpoint).can_die())
            .map(|b| format!("!{}->getLive ()", mangle(&b.alias)))
            .collect();
        if !dead.is_empty() {
            body.push(Stmt::when(dead.join(" || "), die_now()));
        }
    }
    if let (true, Some(p)) = (s.lethal_p, plan.p) {
        let mut check = compute_temporaries(r, &[p]);
        let value = if model.var(p).has(Attr::Temporary) {
            r.name(p)
        } else {
            r.value(p)
        };
        let one = r.number(1.0, model.var(p).exponent);
        check.push(Stmt::when(
            format!(
                "{v} <= 0 || {v} < {one} && pow ({v}, getEvent ()->dt) < uniform<{t}> ()",
                v = value,
                one = one,
                t = r.t()
            ),
            die_now(),
        ));
        body.push(Stmt::block("", check));
    }
    if let Some(ty) = plan.type_.filter(|&ty| !model.var(ty).equations.is_empty()) {
        let name = r.name(ty);
        body.push(Stmt::line(format!("int {};", name)));
        body.extend(multiconditional(r, ty));
        let mut cases = Vec::new();
        for (k, split) in s.splits.iter().enumerate() {
            let mut case = Vec::new();
            for &to in split.iter().filter(|&&to| to != r.set) {
                let c = Conversion { from: r.set, to };
                case.push(Stmt::line(format!(
                    "container->{} (this);",
                    conversion_name(model, &c)
                )));
            }
            if !split.contains(&r.set) {
                case.extend(die_now());
            }
            cases.push((format!("case {}:", k + 1), case));
        }
        body.push(Stmt::Switch {
            subject: name,
            cases,
        });
    }
    body.push(Stmt::line("return true;"));
    body
}

fn lifecycle_hooks(r: &Renderer<'_, '_>, code: &mut ClassCode) {
    let model = r.model;
    let s = model.set(r.set);
    let plan = &r.plans[r.set];
    let population = format!("container->{}", mangle(&s.name));

    let mut die = Vec::new();
    if let (Some(bit), Some(ty)) = (plan.live_flag, plan.local.flag_type) {
        die.push(clear_flag("", ty, bit));
    }
    die.extend(emit_event::target_die(r));
    if plan.need_local_die && !die.is_empty() {
        code.method("void", "die ()", die);
    }

    let mut enter = Vec::new();
    let mut leave = Vec::new();
    if !plan.singleton {
        enter.push(Stmt::line(format!("{}.add (this);", population)));
        leave.push(Stmt::line(format!("{}.remove (this);", population)));
    }
    for reference in &plan.local_reference {
        let path = r.instance_path(&reference.resolution);
        enter.push(Stmt::line(format!("{}refcount++;", path)));
        leave.push(Stmt::line(format!("{}refcount--;", path)));
    }
    enter.extend(endpoint_counts(r, "++"));
    leave.extend(endpoint_counts(r, "--"));
    if !enter.is_empty() {
        code.method("void", "enterSimulation ()", enter);
        code.method("void", "leaveSimulation ()", leave);
    }

    if plan.refcount {
        code.method("bool", "isFree ()", vec![Stmt::line("return refcount == 0;")]);
    }
    if let (Some(bit), Some(ty)) = (plan.live_flag, plan.local.flag_type) {
        code.method(
            r.t(),
            "getLive ()",
            vec![Stmt::line(format!("return ({}) ? 1 : 0;", test_flag("", ty, bit)))],
        );
    }
    if let (Some(bit), Some(ty)) = (plan.newborn, plan.local.flag_type) {
        code.method(
            "bool",
            "getNewborn ()",
            vec![Stmt::line(format!("return {};", test_flag("", ty, bit)))],
        );
    }
}

fn path_method(r: &Renderer<'_, '_>, code: &mut ClassCode) {
    let plan = &r.plans[r.set];
    if !plan.local.need_path {
        return;
    }
    let mut body = container_prefix(r);
    body.push(Stmt::line(format!(
        "result += \"{}\";",
        r.model.set(r.set).name.replace('"', "\\\"")
    )));
    if plan.has_index {
        body.push(Stmt::line("result += __24index;"));
    }
    code.method("void", "path (String & result)", body);
}

fn xyz_method(r: &Renderer<'_, '_>, code: &mut ClassCode) {
    let plan = &r.plans[r.set];
    let Some(xyz) = plan.xyz else {
        return;
    };
    if r.model.var(xyz).equations.is_empty() {
        return;
    }
    let mut body = compute_temporaries(r, &[xyz]);
    let value = if r.model.var(xyz).has(Attr::Temporary) {
        r.name(xyz)
    } else {
        r.value(xyz)
    };
    body.push(Stmt::line(format!("xyz = {};", value)));
    code.method(
        "void",
        &format!("getXYZ (MatrixFixed<{},3,1> & xyz)", r.t()),
        body,
    );
}

fn conversion_methods(r: &Renderer<'_, '_>, code: &mut ClassCode) {
    let model = r.model;
    for c in &r.plans[r.set].conversions {
        let (from, to) = (model.prefix(Some(c.from)), model.prefix(Some(c.to)));
        let mut body = vec![Stmt::line(format!(
            "{} * to = ({} *) {}.allocate ();",
            to,
            to,
            child_field(model, c.to)
        ))];
        for b in &model.set(c.to).bindings {
            let alias = mangle(&b.alias);
            body.push(Stmt::line(format!("to->{} = from->{};", alias, alias)));
        }
        body.push(Stmt::line("to->enterSimulation ();"));
        body.push(Stmt::line("from->getEvent ()->enqueue (to);"));
        body.push(Stmt::line("to->init ();"));
        let from_plan = &r.plans[c.from];
        for &v in &r.plans[c.to].local.members {
            let var = model.var(v);
            let same = model
                .find(c.from, &var.name, var.order)
                .filter(|w| from_plan.local.members.contains(w))
                .filter(|&w| model.var(w).value_type == var.value_type);
            if same.is_some() {
                let name = r.name(v);
                body.push(Stmt::line(format!("to->{} = from->{};", name, name)));
            }
        }
        code.helper(
            "void",
            &format!("{} ({} * from)", conversion_name(model, c), from),
            body,
        );
    }
}

pub fn instance_class(r: &Renderer<'_, '_>) -> ClassCode {
    let prefix = r.model.prefix(Some(r.set));
    let mut code = ClassCode::new(prefix, Some(format!("PartTime<{}>", r.t())));
    fields(r, &mut code);
    code.blank();
    lifetime(r, &mut code);
    init_method(r, &mut code);
    step_methods(r, &mut code);
    lifecycle_hooks(r, &mut code);
    path_method(r, &mut code);
    xyz_method(r, &mut code);
    emit_event::target_methods(r, &mut code);
    emit_connect::instance_methods(r, &mut code);
    emit_connect::holder_methods(r, &mut code);
    conversion_methods(r, &mut code);
    integrator_methods(r, &r.plans[r.set].local, &mut code);
    code
}
