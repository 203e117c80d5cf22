// render.rs — Variable resolution and C++ expression text
//
// Turns resolved references and expression trees into C++ expression text
// for one rendering context: an equation set, its instance or population
// scope, and a lifecycle phase. Fixed-point mode inserts the shifts that
// `exponent` recorded on every node.
//
// Preconditions: plans are built; in fixed-point mode every expression node
//   carries `scale.exponent` and `scale.exponent_next`.
// Postconditions: output is a pure function of the context and the tree,
//   apart from names handed out for dynamic matrix literals.
// Failure modes: none.
// Side effects: dynamic matrix literals are named in the shared `Scratch`.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use crate::attr::Attr;
use crate::codegen::CodegenOptions;
use crate::cpp::Stmt;
use crate::exponent::{divide_shift, fixed_value, multiply_shift, print_shift, MSB};
use crate::expr::{BinaryOp, Descend, Expr, ExprKey, ExprKind, Func, UnaryOp, VarRef};
use crate::id::{SetId, VarId};
use crate::model::{mangle, mangle_with, Model, Step, ValueType};
use crate::plan::{output_operands, Plans};

/// Which lifecycle method the rendered code belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Connect,
    Update,
}

/// Names handed out while rendering, shared by every renderer of one job.
#[derive(Debug, Default)]
pub struct Scratch {
    matrices: Cell<usize>,
    names: RefCell<HashMap<ExprKey, String>>,
}

impl Scratch {
    fn matrix_name(&self, e: &Expr) -> String {
        let mut names = self.names.borrow_mut();
        names
            .entry(ExprKey::of(e))
            .or_insert_with(|| {
                let n = self.matrices.get();
                self.matrices.set(n + 1);
                format!("matrix{}", n)
            })
            .clone()
    }
}

// ── Precedence ───────────────────────────────────────────────────────────

const ATOM: u8 = 0;
const UNARY: u8 = 3;

fn precedence(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Modulo => 5,
        BinaryOp::Add | BinaryOp::Subtract => 6,
        BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => 9,
        BinaryOp::Equal | BinaryOp::NotEqual => 10,
        BinaryOp::And => 14,
        BinaryOp::Or => 15,
        BinaryOp::Power => ATOM,
    }
}

// ── Literals ─────────────────────────────────────────────────────────────

/// Floating-point literal. Integral values print without a fraction;
/// `single` adds the `f` suffix to the rest.
pub fn float_literal(value: f64, single: bool) -> String {
    if value.is_nan() {
        return "NAN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "INFINITY" } else { "-INFINITY" }.to_string();
    }
    let magnitude = value.abs();
    if value.fract() == 0.0 && magnitude < 1e9 {
        return format!("{}", value as i64);
    }
    let text = if magnitude < 1e-4 || magnitude >= 1e9 {
        format!("{:e}", value)
    } else {
        format!("{}", value)
    };
    if single {
        format!("{}f", text)
    } else {
        text
    }
}

fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

// ── Renderer ─────────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
pub struct Renderer<'a, 'm> {
    pub model: &'m Model,
    pub plans: &'a Plans<'m>,
    pub options: &'a CodegenOptions,
    pub set: SetId,
    /// Rendering inside the population class rather than the instance.
    pub global: bool,
    pub phase: Phase,
    scratch: &'a Scratch,
}

impl<'a, 'm> Renderer<'a, 'm> {
    pub fn new(
        model: &'m Model,
        plans: &'a Plans<'m>,
        options: &'a CodegenOptions,
        scratch: &'a Scratch,
    ) -> Self {
        Renderer {
            model,
            plans,
            options,
            set: model.root,
            global: false,
            phase: Phase::Update,
            scratch,
        }
    }

    pub fn at(self, set: SetId, global: bool) -> Self {
        Renderer {
            set,
            global,
            ..self
        }
    }

    pub fn in_phase(self, phase: Phase) -> Self {
        Renderer { phase, ..self }
    }

    /// The numeric type `T`.
    pub fn t(&self) -> &'a str {
        &self.options.numeric
    }

    pub fn fixed(&self) -> bool {
        self.options.fixed_point
    }

    pub fn simulator(&self) -> String {
        format!("Simulator<{}>::instance", self.t())
    }

    /// C++ type of a stored variable.
    pub fn type_name(&self, v: VarId) -> String {
        match self.model.var(v).value_type {
            ValueType::Scalar => self.t().to_string(),
            ValueType::Matrix { rows, cols } => {
                format!("MatrixFixed<{},{},{}>", self.t(), rows, cols)
            }
            ValueType::Text => "String".to_string(),
        }
    }

    /// Member or temporary name of `v` in its own scope.
    pub fn name(&self, v: VarId) -> String {
        mangle(&self.model.var(v).name_string())
    }

    pub fn next_name(&self, v: VarId) -> String {
        mangle_with("next_", &self.model.var(v).name_string())
    }

    /// Numeric literal at `exponent` in fixed-point mode.
    pub fn number(&self, value: f64, exponent: Option<i32>) -> String {
        if self.fixed() {
            if value.is_infinite() {
                return if value > 0.0 { "INT_MAX" } else { "INT_MIN" }.to_string();
            }
            return fixed_value(value, exponent.unwrap_or(MSB)).to_string();
        }
        float_literal(value, self.t() == "float")
    }

    /// Current value of `v`, read from this context.
    pub fn value(&self, v: VarId) -> String {
        self.resolve(&self.model.var(v).reference, false)
    }

    /// Where an equation of `v` stores its value.
    pub fn lvalue(&self, v: VarId) -> String {
        self.resolve(&self.model.var(v).reference, true)
    }

    /// Text for a resolved reference, read or written from this context.
    pub fn resolve(&self, r: &VarRef, lvalue: bool) -> String {
        let Some(target) = r.target else {
            return mangle(&r.text);
        };
        let var = self.model.var(target);
        let plan = &self.plans[var.set];

        if !lvalue {
            if var.has(Attr::Constant) {
                if let Some(e) = var.sole_expression() {
                    if let Some(name) = self.plans.statics.name_of(e) {
                        return name.to_string();
                    }
                    if let Some(value) = e.constant_value() {
                        return self.number(value, var.exponent);
                    }
                }
            }
            let name = var.name.as_str();
            match (name, var.order) {
                ("$t", 0) => return format!("{}.currentEvent->t", self.simulator()),
                ("$t", 1) => {
                    if self.global && r.is_local() {
                        return format!("{}.currentEvent->dt", self.simulator());
                    }
                    return format!("{}getEvent ()->dt", self.container_path(&r.resolution, target));
                }
                ("$init", 0) => return u8::from(self.phase == Phase::Init).to_string(),
                ("$connect", 0) => return u8::from(self.phase == Phase::Connect).to_string(),
                ("$live", 0) => {
                    return format!("{}getLive ()", self.container_path(&r.resolution, target))
                }
                ("$index", 0) if plan.singleton => return "0".to_string(),
                ("$n", 0) if !plan.is_member(target) => {
                    return format!("{}n", self.container_path(&r.resolution, target))
                }
                _ => {}
            }
        }

        let container = self.container_path(&r.resolution, target);
        let name = var.name_string();
        let buffered = lvalue
            && plan.is_buffered(target)
            && !(r.is_local() && self.phase == Phase::Init);
        if buffered {
            format!("{}{}", container, mangle_with("next_", &name))
        } else {
            format!("{}{}", container, mangle(&name))
        }
    }

    /// Member-access prefix that walks `steps` from this context and ends
    /// at the object holding `target`.
    pub fn container_path(&self, steps: &[Step], target: VarId) -> String {
        self.walk(steps, self.model.var(target).has(Attr::Global))
    }

    /// Member-access prefix that walks `steps` and ends at an instance.
    pub fn instance_path(&self, steps: &[Step]) -> String {
        self.walk(steps, false)
    }

    fn walk(&self, steps: &[Step], global_target: bool) -> String {
        let mut out = String::new();
        let mut current = self.set;
        let mut at_population = self.global;
        for (i, step) in steps.iter().enumerate() {
            let last = i + 1 == steps.len();
            match *step {
                Step::Ascend(c) => {
                    out.push_str("container->");
                    current = c;
                    at_population = false;
                }
                Step::Descend(p) => {
                    out.push_str(&mangle(&self.model.set(p).name));
                    out.push('.');
                    current = p;
                    at_population = true;
                    if self.plans[p].singleton && !(last && global_target) {
                        out.push_str("instance.");
                        at_population = false;
                    }
                }
                Step::Connect { binding, endpoint } => {
                    out.push_str(&mangle(&self.model.set(current).bindings[binding].alias));
                    out.push_str("->");
                    current = endpoint;
                    at_population = false;
                }
            }
        }
        if global_target && !at_population {
            out.push_str("container->");
            out.push_str(&mangle(&self.model.set(current).name));
            out.push('.');
        }
        out
    }

    // ── Expressions ──────────────────────────────────────────────────────

    fn shift(&self, e: &Expr) -> i32 {
        if !self.fixed() {
            return 0;
        }
        match (e.scale.exponent, e.scale.exponent_next) {
            (Some(own), Some(next)) => own - next,
            _ => 0,
        }
    }

    fn constant_target(&self, e: &Expr) -> Option<f64> {
        let ExprKind::Ref(r) = &e.kind else {
            return None;
        };
        let var = self.model.var(r.target?);
        if !var.has(Attr::Constant) {
            return None;
        }
        var.sole_expression()?.constant_value()
    }

    fn precedence_of(&self, e: &Expr) -> u8 {
        if self.shift(e) != 0 || self.constant_target(e).is_some() {
            return ATOM;
        }
        match &e.kind {
            ExprKind::Unary(..) => UNARY,
            ExprKind::Binary(BinaryOp::Multiply | BinaryOp::Divide, ..) if self.fixed() => UNARY,
            ExprKind::Binary(BinaryOp::Modulo, ..) if !self.fixed() => ATOM,
            ExprKind::Binary(op, ..) => precedence(*op),
            ExprKind::Constant(v) if *v < 0.0 => UNARY,
            _ => ATOM,
        }
    }

    fn operand(&self, e: &Expr, parent: u8, right: bool) -> String {
        let text = self.expr(e);
        let p = self.precedence_of(e);
        if p > parent || (right && p == parent && p != ATOM) {
            format!("({})", text)
        } else {
            text
        }
    }

    /// C++ text of `e`, delivered at its consumer's exponent.
    pub fn expr(&self, e: &Expr) -> String {
        if let Some(value) = self.constant_target(e) {
            return self.number(value, e.scale.exponent_next);
        }
        let text = self.node(e);
        match self.shift(e) {
            0 => text,
            s => format!("({}{})", text, print_shift(s)),
        }
    }

    fn node(&self, e: &Expr) -> String {
        match &e.kind {
            ExprKind::Constant(v) => self.number(*v, e.scale.exponent_next.or(e.scale.exponent)),
            ExprKind::Text(s) => quote(s),
            ExprKind::Matrix(_) => match self.plans.statics.name_of(e) {
                Some(name) => name.to_string(),
                None => self.scratch.matrix_name(e),
            },
            ExprKind::Ref(r) => self.resolve(r, false),
            ExprKind::Unary(op, a) => {
                let inner = self.operand(a, UNARY, false);
                let inner = if inner.starts_with('-') {
                    format!("({})", inner)
                } else {
                    inner
                };
                match op {
                    UnaryOp::Negate => format!("-{}", inner),
                    UnaryOp::Not => format!("!{}", inner),
                }
            }
            ExprKind::Binary(op, a, b) => self.binary(e, *op, a, b),
            ExprKind::Call(f, args) => self.call(e, *f, args),
        }
    }

    fn binary(&self, e: &Expr, op: BinaryOp, a: &Expr, b: &Expr) -> String {
        let exponent = |x: &Expr| x.scale.exponent_next.or(x.scale.exponent).unwrap_or(MSB);
        if self.fixed() {
            let next = e.scale.exponent_next.or(e.scale.exponent).unwrap_or(MSB);
            match op {
                BinaryOp::Multiply => {
                    let shift = multiply_shift(exponent(a), exponent(b), next);
                    return format!(
                        "(int) ((int64_t) {} * {}{})",
                        self.operand(a, UNARY, false),
                        self.operand(b, UNARY, true),
                        print_shift(shift)
                    );
                }
                BinaryOp::Divide => {
                    let shift = divide_shift(exponent(a), exponent(b), next);
                    return format!(
                        "(int) (((int64_t) {}{}) / {})",
                        self.operand(a, UNARY, false),
                        print_shift(shift),
                        self.operand(b, UNARY, true)
                    );
                }
                BinaryOp::Power => {
                    return format!(
                        "pow ({}, {}, {}, {})",
                        self.expr(a),
                        self.expr(b),
                        exponent(a),
                        e.scale.exponent.unwrap_or(MSB)
                    );
                }
                _ => {}
            }
        } else {
            match op {
                BinaryOp::Power => return format!("pow ({}, {})", self.expr(a), self.expr(b)),
                BinaryOp::Modulo => return format!("fmod ({}, {})", self.expr(a), self.expr(b)),
                _ => {}
            }
        }
        let p = precedence(op);
        format!(
            "{} {} {}",
            self.operand(a, p, false),
            op.symbol(),
            self.operand(b, p, true)
        )
    }

    fn static_name(&self, e: &Expr) -> String {
        self.plans
            .statics
            .name_of(e)
            .map(str::to_string)
            .unwrap_or_default()
    }

    fn call(&self, e: &Expr, f: Func, args: &[Expr]) -> String {
        let list = |xs: &[Expr]| {
            xs.iter()
                .map(|a| self.expr(a))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let arg = |i: usize| args.get(i).map_or_else(|| "0".to_string(), |a| self.expr(a));
        match f {
            Func::Uniform | Func::Gaussian => format!("{}<{}> ({})", f.name(), self.t(), list(args)),
            Func::Event => {
                let plan = &self.plans[self.set];
                let bit = plan
                    .event_targets
                    .iter()
                    .find(|t| std::ptr::eq(t.event, e) || t.event.kind == e.kind)
                    .map(|t| t.value_index);
                match (bit, plan.local.flag_type) {
                    (Some(bit), Some(ty)) => format!("((flags & ({}) 0x1 << {}) != 0)", ty, bit),
                    _ => "0".to_string(),
                }
            }
            Func::Input => format!("{}->get ({}, {})", self.static_name(e), arg(1), arg(2)),
            Func::Output => {
                let (_, value) = output_operands(args);
                let column = match args.get(value + 1) {
                    Some(c) => self.expr(c),
                    None => self
                        .plans
                        .statics
                        .column_of(e)
                        .map(str::to_string)
                        .unwrap_or_default(),
                };
                let time = format!("{}.currentEvent->t", self.simulator());
                if self.fixed() {
                    let exponent = args
                        .get(value)
                        .and_then(|a| a.scale.exponent_next)
                        .unwrap_or(MSB);
                    format!(
                        "{}->trace ({}, {}, {}, {})",
                        self.static_name(e),
                        time,
                        column,
                        arg(value),
                        exponent
                    )
                } else {
                    format!("{}->trace ({}, {}, {})", self.static_name(e), time, column, arg(value))
                }
            }
            Func::Matrix => {
                if args.len() >= 3 {
                    format!("{}->get ({}, {})", self.static_name(e), arg(1), arg(2))
                } else {
                    format!("*{}", self.static_name(e))
                }
            }
            Func::Abs | Func::Min | Func::Max => format!("{} ({})", f.name(), list(args)),
            _ if self.fixed() => self.fixed_function(e, f, args),
            _ => format!("{} ({})", f.name(), list(args)),
        }
    }

    /// Fixed-point math functions take the operand and result exponents.
    fn fixed_function(&self, e: &Expr, f: Func, args: &[Expr]) -> String {
        let a = args.first().map_or_else(|| "0".to_string(), |a| self.expr(a));
        let ea = args
            .first()
            .and_then(|a| a.scale.exponent_next)
            .unwrap_or(MSB);
        let result = e.scale.exponent.unwrap_or(MSB);
        match f {
            Func::Sin | Func::Cos => format!("{} ({}, {})", f.name(), a, ea),
            Func::Exp => format!("exp ({}, {})", a, result),
            _ => format!("{} ({}, {}, {})", f.name(), a, ea, result),
        }
    }

    /// Declarations that fill dynamic matrix literals used by `e`.
    pub fn prepare(&self, e: &Expr) -> Vec<Stmt> {
        let mut out = Vec::new();
        e.visit(&mut |node| {
            let ExprKind::Matrix(rows) = &node.kind else {
                return Descend::Continue;
            };
            if self.plans.statics.name_of(node).is_some() {
                return Descend::Skip;
            }
            let name = self.scratch.matrix_name(node);
            let cols = rows.first().map_or(0, Vec::len);
            out.push(Stmt::line(format!(
                "MatrixFixed<{},{},{}> {};",
                self.t(),
                rows.len(),
                cols,
                name
            )));
            for (r, row) in rows.iter().enumerate() {
                for (c, cell) in row.iter().enumerate() {
                    out.push(Stmt::line(format!("{}({},{}) = {};", name, r, c, self.expr(cell))));
                }
            }
            Descend::Skip
        });
        out
    }
}
