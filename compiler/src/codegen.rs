// codegen.rs — C++ source for a planned model
//
// Lays out the generated program: includes, file-scope static objects,
// forward declarations, one instance class and one population class per
// equation set (children before containers), the `Wrapper` that owns the
// root population, all out-of-class method definitions, and `main`.
// Method bodies that instances and populations share (init, update,
// integration, buffered commits, Runge-Kutta bookkeeping) live here; the
// `emit_*` modules assemble them into classes.
//
// Preconditions: `plans` was built from `model`; in fixed-point mode every
//                expression carries exponents.
// Postconditions: returns `CodegenResult` with the complete C++ source.
//                 Output is a pure function of the inputs.
// Failure modes: none; everything that can fail was decided while planning.
// Side effects: none.

use std::fmt;
use std::str::FromStr;

use crate::attr::Attr;
use crate::cpp::{Class, ClassCode, Function, Member, Printer, Stmt};
use crate::diag::Diagnostic;
use crate::emit_instance;
use crate::emit_population;
use crate::equations::{clear_accumulator, multiconditional, temporary};
use crate::exponent::{fixed_value, integration_shift, print_shift, time_exponent, MSB};
use crate::expr::ExprKind;
use crate::id::{SetId, VarId};
use crate::model::Model;
use crate::plan::{temporaries_of, Plans, Scope, SetPlan, StaticKind};
use crate::render::{Phase, Renderer, Scratch};

// ── Public types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Integrator {
    #[default]
    Euler,
    RungeKutta,
}

impl FromStr for Integrator {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s.trim().to_ascii_lowercase().as_str() {
            "euler" => Ok(Integrator::Euler),
            "rungekutta" | "runge-kutta" | "rk4" => Ok(Integrator::RungeKutta),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Integrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Integrator::Euler => write!(f, "Euler"),
            Integrator::RungeKutta => write!(f, "RungeKutta"),
        }
    }
}

/// When a spike delivered at an exact step boundary is processed relative
/// to the regular step at that time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventMode {
    #[default]
    During,
    Before,
    After,
}

impl FromStr for EventMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s.trim().to_ascii_lowercase().as_str() {
            "during" => Ok(EventMode::During),
            "before" => Ok(EventMode::Before),
            "after" => Ok(EventMode::After),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodegenOptions {
    /// C++ numeric type `T`: `float`, `double` or `int`.
    pub numeric: String,
    pub fixed_point: bool,
    pub integrator: Integrator,
    pub event_mode: EventMode,
    /// Simulated seconds; sets the exponent of time in fixed-point mode.
    pub duration: f64,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        CodegenOptions {
            numeric: "float".to_string(),
            fixed_point: false,
            integrator: Integrator::Euler,
            event_mode: EventMode::During,
            duration: 1.0,
        }
    }
}

#[derive(Debug)]
pub struct CodegenResult {
    pub generated: GeneratedCode,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug)]
pub struct GeneratedCode {
    pub cpp_source: String,
}

// ── Public entry point ──────────────────────────────────────────────────────

pub fn codegen(model: &Model, plans: &Plans<'_>, options: &CodegenOptions) -> CodegenResult {
    let scratch = Scratch::default();
    let r = Renderer::new(model, plans, options, &scratch);
    let mut p = Printer::new();

    emit_header(&mut p);
    emit_statics(&r, &mut p);
    emit_forward_declarations(model, &mut p);

    let mut classes: Vec<ClassCode> = Vec::new();
    for set in model.post_order() {
        classes.push(emit_instance::instance_class(&r.at(set, false)));
        classes.push(emit_population::population_class(&r.at(set, true)));
    }
    classes.push(wrapper_class(&r));

    for c in &classes {
        p.class(&c.class);
    }
    for c in &classes {
        for f in &c.definitions {
            p.function(f);
        }
    }
    p.function(&main_function(&r));

    CodegenResult {
        generated: GeneratedCode {
            cpp_source: p.finish(),
        },
        diagnostics: Vec::new(),
    }
}

// ── File scope ──────────────────────────────────────────────────────────────

fn emit_header(p: &mut Printer) {
    p.line("#include \"runtime.h\"");
    p.line("");
    p.line("#include <iostream>");
    p.line("#include <vector>");
    p.line("#include <cmath>");
    p.line("#include <string>");
    p.line("");
    p.line("using namespace std;");
    p.line("using namespace fl;");
    p.line("");
}

fn emit_statics(r: &Renderer<'_, '_>, p: &mut Printer) {
    let objects = &r.plans.statics.objects;
    if objects.is_empty() {
        return;
    }
    let t = r.t();
    for o in objects {
        let file = format!("\"{}\"", o.file.replace('\\', "\\\\").replace('"', "\\\""));
        let line = match o.kind {
            StaticKind::Literal => {
                let (rows, cols) = match &o.expr.kind {
                    ExprKind::Matrix(rows) => (rows.len(), rows.first().map_or(0, Vec::len)),
                    _ => (0, 0),
                };
                format!("MatrixFixed<{},{},{}> {};", t, rows, cols, o.name)
            }
            StaticKind::MatrixFile if r.fixed() => format!(
                "MatrixInput<{t}> * {} = matrixHelper<{t}> ({}, {});",
                o.name,
                file,
                o.expr.scale.exponent.unwrap_or(MSB)
            ),
            StaticKind::MatrixFile => {
                format!("MatrixInput<{t}> * {} = matrixHelper<{t}> ({});", o.name, file)
            }
            StaticKind::Input => {
                format!("InputHolder<{t}> * {} = inputHelper<{t}> ({});", o.name, file)
            }
            StaticKind::Output => {
                format!("OutputHolder<{t}> * {} = outputHelper<{t}> ({});", o.name, file)
            }
        };
        p.line(&line);
    }
    p.line("");
}

fn emit_forward_declarations(model: &Model, p: &mut Printer) {
    p.line("class Wrapper;");
    for set in model.post_order() {
        let prefix = model.prefix(Some(set));
        p.line(&format!("class {};", prefix));
        p.line(&format!("class {}_Population;", prefix));
    }
    p.line("");
}

/// Elements of constant matrix literals, assigned before the run starts.
fn literal_fills(r: &Renderer<'_, '_>) -> Vec<Stmt> {
    let mut out = Vec::new();
    for o in &r.plans.statics.objects {
        let (StaticKind::Literal, ExprKind::Matrix(rows)) = (o.kind, &o.expr.kind) else {
            continue;
        };
        for (i, row) in rows.iter().enumerate() {
            for (j, cell) in row.iter().enumerate() {
                let value = cell.constant_value().unwrap_or(0.0);
                let text = if r.fixed() {
                    let e = cell.scale.exponent_next.or(o.expr.scale.exponent).unwrap_or(MSB);
                    fixed_value(value, e).to_string()
                } else {
                    r.number(value, None)
                };
                out.push(Stmt::line(format!("{}({},{}) = {};", o.name, i, j, text)));
            }
        }
    }
    out
}

fn main_function(r: &Renderer<'_, '_>) -> Function {
    let t = r.t();
    let mut body = Vec::new();
    if r.fixed() {
        body.push(Stmt::line(format!(
            "Event<int>::exponent = {};",
            time_exponent(r.options.duration)
        )));
    }
    body.extend(literal_fills(r));
    for o in &r.plans.statics.objects {
        if o.kind != StaticKind::Input {
            continue;
        }
        if o.input_time {
            body.push(Stmt::line(format!("{}->time = true;", o.name)));
        }
        if r.fixed() {
            let e = o.expr.scale.exponent.unwrap_or(MSB);
            body.push(Stmt::line(format!("{}->exponent = {};", o.name, e)));
        }
    }
    body.push(Stmt::line("Wrapper wrapper;"));
    let integrator = match r.options.integrator {
        Integrator::Euler => format!("new Euler<{}>", t),
        Integrator::RungeKutta => format!("new RungeKutta<{}>", t),
    };
    body.push(Stmt::line(format!("{}.integrator = {};", r.simulator(), integrator)));
    body.push(Stmt::line(format!("{}.run (wrapper);", r.simulator())));
    body.push(Stmt::line("outputClose ();"));

    Function::new(
        "int main (int argc, char * argv[])",
        vec![
            Stmt::block("try", body),
            Stmt::block(
                "catch (const char * message)",
                vec![
                    Stmt::line("cerr << \"Exception: \" << message << endl;"),
                    Stmt::line("return 1;"),
                ],
            ),
            Stmt::line("return 0;"),
        ],
    )
}

fn wrapper_class(r: &Renderer<'_, '_>) -> ClassCode {
    let model = r.model;
    let root = model.root;
    let root_plan = &r.plans[root];
    let prefix = model.prefix(Some(root));
    let field = crate::model::mangle(&model.set(root).name);

    let mut code = ClassCode::new("Wrapper", Some(format!("WrapperBase<{}>", r.t())));
    code.decl(format!("{}_Population {}", prefix, field));
    code.blank();

    let mut ctor = vec![
        Stmt::line(format!("population = &{};", field)),
        Stmt::line(format!("{}.container = this;", field)),
    ];
    if root_plan.singleton {
        ctor.push(Stmt::line(format!("{}.instance.container = this;", field)));
    }
    code.constructor(ctor);
    code.method("void", "init ()", vec![Stmt::line(format!("{}.init ();", field))]);
    if population_integrates(root_plan) {
        code.method("void", "integrate ()", vec![Stmt::line(format!("{}.integrate ();", field))]);
    }
    if population_updates(root_plan) {
        code.method("void", "update ()", vec![Stmt::line(format!("{}.update ();", field))]);
    }
    if root_plan.global.need_finalize {
        code.method(
            "bool",
            "finalize ()",
            vec![Stmt::line(format!("return {}.finalize ();", field))],
        );
    }
    code
}

// ── Flag word ───────────────────────────────────────────────────────────────

pub fn flag_mask(ty: &str, bit: impl fmt::Display) -> String {
    format!("({}) 0x1 << {}", ty, bit)
}

pub fn set_flag(prefix: &str, ty: &str, bit: impl fmt::Display) -> Stmt {
    Stmt::line(format!("{}flags |= {};", prefix, flag_mask(ty, bit)))
}

pub fn clear_flag(prefix: &str, ty: &str, bit: impl fmt::Display) -> Stmt {
    Stmt::line(format!("{}flags &= ~({});", prefix, flag_mask(ty, bit)))
}

pub fn test_flag(prefix: &str, ty: &str, bit: impl fmt::Display) -> String {
    format!("{}flags & {}", prefix, flag_mask(ty, bit))
}

// ── Shared method bodies ────────────────────────────────────────────────────

pub fn scope<'p>(plan: &'p SetPlan<'_>, global: bool) -> &'p Scope {
    if global {
        &plan.global
    } else {
        &plan.local
    }
}

pub fn is_n(model: &Model, v: VarId) -> bool {
    let var = model.var(v);
    var.name == "$n" && var.order == 0
}

/// The population's global variables integrate, so its container drives it.
pub fn population_integrates(plan: &SetPlan<'_>) -> bool {
    !plan.global.integrated.is_empty()
}

pub fn population_updates(plan: &SetPlan<'_>) -> bool {
    !plan.global.update.is_empty() || !plan.global.buffered_internal_update.is_empty()
}

/// Init-phase computation of the scope's init list, then the starting
/// contents of every externally buffered `next_` slot.
pub fn init_variables(r: &Renderer<'_, '_>, scope: &Scope) -> Vec<Stmt> {
    let r = r.in_phase(Phase::Init);
    let plan = &r.plans[r.set];
    let mut out = Vec::new();
    for &v in &scope.init {
        let var = r.model.var(v);
        if var.has(Attr::Temporary) {
            out.extend(temporary(&r, v));
            continue;
        }
        if plan.is_member(v) {
            out.extend(clear_accumulator(&r, v, &r.name(v)));
        } else if is_n(r.model, v) {
            out.push(Stmt::line(format!("{} {};", r.type_name(v), r.name(v))));
        }
        out.extend(multiconditional(&r, v));
    }
    for &v in &scope.buffered_external {
        let next = r.next_name(v);
        out.push(
            clear_accumulator(&r, v, &next)
                .unwrap_or_else(|| Stmt::line(format!("{} = {};", next, r.name(v)))),
        );
    }
    out
}

/// Regular update: internally buffered values are computed into locals and
/// committed once every equation has read the old values.
pub fn update_variables(r: &Renderer<'_, '_>, scope: &Scope) -> Vec<Stmt> {
    let r = r.in_phase(Phase::Update);
    let mut out = Vec::new();
    for &v in &scope.buffered_internal_update {
        out.push(Stmt::line(format!("{} {};", r.type_name(v), r.next_name(v))));
    }
    for &v in &scope.update {
        if r.model.var(v).has(Attr::Temporary) {
            out.extend(temporary(&r, v));
        } else {
            out.extend(multiconditional(&r, v));
        }
    }
    for &v in &scope.buffered_internal_update {
        out.push(Stmt::line(format!("{} = {};", r.name(v), r.next_name(v))));
    }
    out
}

/// Copy `next_` slots into their members and reset accumulators.
pub fn commit_external(r: &Renderer<'_, '_>, vars: &[VarId]) -> Vec<Stmt> {
    let mut out = Vec::new();
    for &v in vars {
        let next = r.next_name(v);
        out.push(Stmt::line(format!("{} = {};", r.name(v), next)));
        out.extend(clear_accumulator(r, v, &next));
    }
    out
}

/// Compute `seeds`' temporaries (and the seeds themselves, when they are
/// temporaries) as locals of the current function.
pub fn compute_temporaries(r: &Renderer<'_, '_>, seeds: &[VarId]) -> Vec<Stmt> {
    temporaries_of(r.model, r.set, seeds)
        .into_iter()
        .flat_map(|v| temporary(r, v))
        .collect()
}

/// Exponent of the step size seen by `set`.
fn dt_exponent(r: &Renderer<'_, '_>) -> i32 {
    let mut s = Some(r.set);
    while let Some(set) = s {
        if let Some(e) = r.model.find(set, "$t", 1).and_then(|v| r.model.var(v).exponent) {
            return e;
        }
        s = r.model.set(set).container;
    }
    time_exponent(r.options.duration)
}

/// Euler step of every integrated variable. Inside a Runge-Kutta stage the
/// step starts from the preserved values instead of the current ones.
pub fn integrate_body(r: &Renderer<'_, '_>, scope: &Scope, dt: &str) -> Vec<Stmt> {
    let mut out = vec![Stmt::line(format!("{} dt = {};", r.t(), dt))];
    let rates: Vec<VarId> = scope
        .integrated
        .iter()
        .filter_map(|&x| r.model.var(x).derivative)
        .filter(|&d| r.model.var(d).has(Attr::Temporary))
        .collect();
    out.extend(compute_temporaries(r, &rates));

    let mut from_saved = Vec::new();
    let mut in_place = Vec::new();
    for &x in &scope.integrated {
        let Some(d) = r.model.var(x).derivative else {
            continue;
        };
        let rate = r.value(d);
        let step = if r.fixed() {
            let shift = integration_shift(
                r.model.var(d).exponent.unwrap_or(MSB),
                dt_exponent(r),
                r.model.var(x).exponent.unwrap_or(MSB),
            );
            format!("(int) ((int64_t) {} * dt{})", rate, print_shift(shift))
        } else {
            format!("{} * dt", rate)
        };
        let name = r.name(x);
        from_saved.push(Stmt::line(format!("{} = preserve->{} + {};", name, name, step)));
        in_place.push(Stmt::line(format!("{} += {};", name, step)));
    }
    if scope.need_preserve {
        out.push(Stmt::when_else("preserve", from_saved, in_place));
    } else {
        out.extend(in_place);
    }
    out
}

// ── Runge-Kutta bookkeeping ─────────────────────────────────────────────────

/// Values saved by `snapshot` and put back by `restore`: the integrated
/// variables, members recomputed during derivative evaluation, and `next_`
/// slots that remote writers fill during it.
fn preserved(r: &Renderer<'_, '_>, scope: &Scope) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for &v in scope.integrated.iter().chain(&scope.derivative_preserve) {
        out.push((r.type_name(v), r.name(v)));
    }
    for &v in &scope.buffered_external_write_derivative {
        out.push((r.type_name(v), r.next_name(v)));
    }
    out
}

/// Nested record classes and the pointers that hold them.
pub fn integrator_fields(r: &Renderer<'_, '_>, scope: &Scope, code: &mut ClassCode) {
    if scope.need_preserve {
        let mut preserve = Class::new("Preserve", None);
        for (ty, name) in preserved(r, scope) {
            preserve.decl(format!("{} {}", ty, name));
        }
        code.class.members.push(Member::Nested(preserve));
    }
    if !scope.derivative.is_empty() {
        let mut derivative = Class::new("Derivative", None);
        for &v in &scope.derivative {
            derivative.decl(format!("{} {}", r.type_name(v), r.name(v)));
        }
        derivative.decl("Derivative * next");
        code.class.members.push(Member::Nested(derivative));
    }
    if scope.need_preserve {
        code.decl("Preserve * preserve");
    }
    if !scope.derivative.is_empty() {
        code.decl("Derivative * stackDerivative");
    }
}

pub fn integrator_init(scope: &Scope) -> Vec<Stmt> {
    let mut out = Vec::new();
    if scope.need_preserve {
        out.push(Stmt::line("preserve = 0;"));
    }
    if !scope.derivative.is_empty() {
        out.push(Stmt::line("stackDerivative = 0;"));
    }
    out
}

pub fn integrator_release(scope: &Scope) -> Vec<Stmt> {
    let mut out = Vec::new();
    if scope.need_preserve {
        out.push(Stmt::line("if (preserve) delete preserve;"));
    }
    if !scope.derivative.is_empty() {
        out.push(Stmt::block(
            "while (stackDerivative)",
            vec![
                Stmt::line("Derivative * temp = stackDerivative;"),
                Stmt::line("stackDerivative = stackDerivative->next;"),
                Stmt::line("delete temp;"),
            ],
        ));
    }
    out
}

/// `value * scalar` where `scalar` is a Runge-Kutta weight.
fn scaled(r: &Renderer<'_, '_>, value: &str) -> String {
    if r.fixed() {
        format!("(int) ((int64_t) {} * scalar{})", value, print_shift(-MSB))
    } else {
        format!("{} * scalar", value)
    }
}

/// Stage methods the Runge-Kutta integrator calls.
pub fn integrator_methods(r: &Renderer<'_, '_>, scope: &Scope, code: &mut ClassCode) {
    if r.options.integrator != Integrator::RungeKutta {
        return;
    }
    let t = r.t();
    if scope.need_preserve {
        let saved = preserved(r, scope);
        let mut snapshot = vec![Stmt::line("preserve = new Preserve;")];
        let mut restore = Vec::new();
        for (_, name) in &saved {
            snapshot.push(Stmt::line(format!("preserve->{} = {};", name, name)));
            restore.push(Stmt::line(format!("{} = preserve->{};", name, name)));
        }
        restore.push(Stmt::line("delete preserve;"));
        restore.push(Stmt::line("preserve = 0;"));
        code.method("void", "snapshot ()", snapshot);
        code.method("void", "restore ()", restore);
    }
    if !scope.derivative.is_empty() {
        let mut push = vec![
            Stmt::line("Derivative * temp = new Derivative;"),
            Stmt::line("temp->next = stackDerivative;"),
            Stmt::line("stackDerivative = temp;"),
        ];
        let mut add_to_stack = Vec::new();
        let mut multiply = Vec::new();
        let mut add_to_members = Vec::new();
        for &v in &scope.derivative {
            let name = r.name(v);
            push.push(Stmt::line(format!("temp->{} = {};", name, name)));
            add_to_stack.push(Stmt::line(format!(
                "stackDerivative->{} += {};",
                name,
                scaled(r, &name)
            )));
            multiply.push(Stmt::line(format!("{} = {};", name, scaled(r, &name))));
            add_to_members.push(Stmt::line(format!("{} += stackDerivative->{};", name, name)));
        }
        add_to_members.push(Stmt::line("Derivative * temp = stackDerivative;"));
        add_to_members.push(Stmt::line("stackDerivative = stackDerivative->next;"));
        add_to_members.push(Stmt::line("delete temp;"));
        code.method("void", "pushDerivative ()", push);
        code.method("void", &format!("multiplyAddToStack ({} scalar)", t), add_to_stack);
        code.method("void", &format!("multiply ({} scalar)", t), multiply);
        code.method("void", "addToMembers ()", add_to_members);
    }
    if !scope.derivative_update.is_empty() {
        let r = r.in_phase(Phase::Update);
        let mut body = Vec::new();
        for &v in &scope.buffered_internal_derivative {
            body.push(Stmt::line(format!("{} {};", r.type_name(v), r.next_name(v))));
        }
        for &v in &scope.derivative_update {
            if r.model.var(v).has(Attr::Temporary) {
                body.extend(temporary(&r, v));
            } else {
                body.extend(multiconditional(&r, v));
            }
        }
        for &v in &scope.buffered_internal_derivative {
            body.push(Stmt::line(format!("{} = {};", r.name(v), r.next_name(v))));
        }
        code.method("void", "updateDerivative ()", body);
    }
    if !scope.buffered_external_derivative.is_empty() {
        code.method(
            "void",
            "finalizeDerivative ()",
            commit_external(r, &scope.buffered_external_derivative),
        );
    }
}

/// Child populations of `set` whose plans satisfy `pred`.
pub fn children_where(
    model: &Model,
    plans: &Plans<'_>,
    set: SetId,
    pred: impl Fn(&SetPlan<'_>) -> bool,
) -> Vec<SetId> {
    model
        .set(set)
        .parts
        .iter()
        .copied()
        .filter(|&c| pred(&plans[c]))
        .collect()
}
