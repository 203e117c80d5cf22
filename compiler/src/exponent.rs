// exponent.rs — Fixed-point scale inference
//
// In fixed-point mode every value is a 32-bit integer `i` standing for
// `i * 2^(exponent - MSB)`. This pass picks an exponent (and a centre, the
// bit where typical magnitudes sit) for every variable and expression node,
// then pushes each consumer's required exponent down the tree so rendering
// knows where to shift.
//
// Preconditions: `analyze::analyze` has run.
// Postconditions: every live variable has `exponent`; every expression node
//   has `scale.exponent` and `scale.exponent_next`.
// Failure modes: variables still unknown after `MAX_ROUNDS` abort the job.
// Side effects: none.

use tracing::{debug, info};

use crate::attr::Attr;
use crate::error::{AbortRun, Result};
use crate::expr::{BinaryOp, Expr, ExprKind, Func, Scale, UnaryOp};
use crate::id::VarId;
use crate::model::{Assignment, Model};

/// Position of the most significant value bit in a 32-bit signed word.
pub const MSB: i32 = 30;
pub const MAX_ROUNDS: usize = 64;
const DEFAULT_EXPONENT: i32 = 15;
const DEFAULT_CENTER: i32 = 15;
/// Runtime default step when `$t'` is not given.
const DEFAULT_DT: f64 = 1e-4;

type Known = Option<(i32, i32)>;

// ── Scale arithmetic ─────────────────────────────────────────────────────

pub fn center_power(exponent: i32, center: i32) -> i32 {
    exponent - MSB + center
}

/// Exponent of a literal: the power of two of its leading bit.
pub fn constant_exponent(value: f64) -> i32 {
    if value == 0.0 || !value.is_finite() {
        return 0;
    }
    value.abs().log2().floor() as i32
}

/// Integer stored for `value` at `exponent`.
pub fn fixed_value(value: f64, exponent: i32) -> i64 {
    (value * 2f64.powi(MSB - exponent)).round() as i64
}

/// Shift text for a left shift by `shift` bits; empty when zero.
pub fn print_shift(shift: i32) -> String {
    match shift {
        0 => String::new(),
        s if s > 0 => format!(" << {}", s),
        s => format!(" >> {}", -s),
    }
}

pub fn multiply_scale(a: (i32, i32), b: (i32, i32)) -> (i32, i32) {
    let cent = MSB / 2;
    let pow = center_power(a.0, a.1) + center_power(b.0, b.1) + MSB - cent;
    (pow, cent)
}

pub fn divide_scale(a: (i32, i32), b: (i32, i32)) -> (i32, i32) {
    let cent = MSB / 2;
    let pow = center_power(a.0, a.1) - center_power(b.0, b.1) + MSB - cent;
    (pow, cent)
}

/// Left shift applied to the 64-bit product `a * b` to land at `target`.
pub fn multiply_shift(ea: i32, eb: i32, target: i32) -> i32 {
    ea + eb - MSB - target
}

/// Left shift applied to the 64-bit numerator of `a / b` to land at `target`.
pub fn divide_shift(ea: i32, eb: i32, target: i32) -> i32 {
    MSB - target + ea - eb
}

/// Left shift that moves `x' * dt` into the scale of `x`.
pub fn integration_shift(derivative: i32, dt: i32, integrated: i32) -> i32 {
    derivative + dt - MSB - integrated
}

// ── Variable leaves ──────────────────────────────────────────────────────

/// Exponent of `$t`, wide enough to hold the run duration.
pub fn time_exponent(duration: f64) -> i32 {
    let d = if duration > 0.0 { duration } else { 1.0 };
    constant_exponent(d) + 1
}

/// Variables whose scale is fixed by what they are rather than by equations.
fn fixed_scale(model: &Model, v: VarId, duration: f64) -> Known {
    let var = model.var(v);
    if var.has(Attr::Constant) {
        return None;
    }
    match (var.name.as_str(), var.order) {
        ("$t", 0) => Some((time_exponent(duration), MSB)),
        ("$t", 1) => {
            let dt = var
                .equations
                .iter()
                .find_map(|e| e.expression.constant_value())
                .unwrap_or(DEFAULT_DT);
            Some((constant_exponent(dt), MSB))
        }
        ("$index" | "$n" | "$init" | "$connect" | "$type" | "$live", 0) => Some((MSB, 0)),
        _ => None,
    }
}

// ── Bottom-up ────────────────────────────────────────────────────────────

struct Context<'a> {
    model: &'a Model,
    known: &'a [Known],
}

impl Context<'_> {
    fn var(&self, v: VarId) -> Known {
        self.known[v.index()]
    }

    /// Compute and store the natural scale of `expr`.
    fn determine(&self, expr: &mut Expr) -> Known {
        let result = match &mut expr.kind {
            ExprKind::Constant(v) => Some((constant_exponent(*v), MSB)),
            ExprKind::Text(_) => Some((MSB, 0)),
            ExprKind::Matrix(rows) => {
                let mut best: Known = None;
                for e in rows.iter_mut().flatten() {
                    let k = self.determine(e);
                    best = max_known(best, k);
                }
                best
            }
            ExprKind::Ref(r) => r.target.and_then(|t| self.var(t)),
            ExprKind::Unary(UnaryOp::Negate, a) => self.determine(a),
            ExprKind::Unary(UnaryOp::Not, a) => {
                self.determine(a);
                Some((MSB, 0))
            }
            ExprKind::Binary(op, a, b) => {
                let ka = self.determine(a);
                let kb = self.determine(b);
                match op {
                    BinaryOp::Multiply => both(ka, kb).map(|(x, y)| multiply_scale(x, y)),
                    BinaryOp::Divide => both(ka, kb).map(|(x, y)| divide_scale(x, y)),
                    BinaryOp::Add | BinaryOp::Subtract => both(ka, kb).map(|(x, y)| larger(x, y)),
                    BinaryOp::Modulo => ka,
                    BinaryOp::Power => both(ka, kb).map(|(x, y)| average(&[x, y])),
                    _ => Some((MSB, 0)),
                }
            }
            ExprKind::Call(f, args) => {
                let ks: Vec<Known> = args.iter_mut().map(|e| self.determine(e)).collect();
                self.determine_call(*f, args, &ks)
            }
        };
        if let Some((e, c)) = result {
            expr.scale.exponent = Some(e);
            expr.scale.center = c;
        }
        result
    }

    fn determine_call(&self, f: Func, args: &[Expr], ks: &[Known]) -> Known {
        match f {
            Func::Uniform => Some((0, MSB)),
            Func::Gaussian => Some((3, MSB)),
            Func::Event => Some((MSB, 0)),
            Func::Input | Func::Matrix => Some((DEFAULT_EXPONENT, DEFAULT_CENTER)),
            Func::Output => {
                // The traced value is the first non-text operand.
                args.iter()
                    .zip(ks)
                    .find(|(a, _)| a.as_text().is_none())
                    .and_then(|(_, k)| *k)
            }
            Func::Min | Func::Max => ks
                .iter()
                .copied()
                .try_fold(None, |acc: Known, k| k.map(|k| max_known(acc, Some(k))))
                .flatten(),
            _ => {
                let known: Option<Vec<(i32, i32)>> = ks.iter().copied().collect();
                known.filter(|k| !k.is_empty()).map(|k| average(&k))
            }
        }
    }
}

fn both(a: Known, b: Known) -> Option<((i32, i32), (i32, i32))> {
    Some((a?, b?))
}

fn larger(a: (i32, i32), b: (i32, i32)) -> (i32, i32) {
    if b.0 > a.0 {
        b
    } else {
        a
    }
}

fn max_known(a: Known, b: Known) -> Known {
    match (a, b) {
        (Some(x), Some(y)) => Some(larger(x, y)),
        (x, None) => x,
        (None, y) => y,
    }
}

fn average(ks: &[(i32, i32)]) -> (i32, i32) {
    let n = ks.len() as i32;
    let pow: i32 = ks.iter().map(|k| k.0).sum();
    let cent: i32 = ks.iter().map(|k| k.1).sum();
    (pow / n, cent / n)
}

// ── Top-down ─────────────────────────────────────────────────────────────

/// Push `next` onto `expr` and decide what its operands must deliver.
/// Nodes that fold the shift into their own operation (literals, multiply,
/// divide) adopt `next` as their exponent.
pub fn determine_next(expr: &mut Expr, next: i32) {
    expr.scale.exponent_next = Some(next);
    let own = expr.scale.exponent.unwrap_or(next);
    match &mut expr.kind {
        ExprKind::Constant(_) => expr.scale.exponent = Some(next),
        ExprKind::Text(_) | ExprKind::Ref(_) => {}
        ExprKind::Matrix(rows) => {
            for e in rows.iter_mut().flatten() {
                determine_next(e, next);
            }
            expr.scale.exponent = Some(next);
        }
        ExprKind::Unary(UnaryOp::Negate, a) => {
            determine_next(a, next);
            expr.scale.exponent = Some(next);
        }
        ExprKind::Unary(UnaryOp::Not, a) => {
            let e = a.scale.exponent.unwrap_or(MSB);
            determine_next(a, e);
        }
        ExprKind::Binary(op, a, b) => match op {
            BinaryOp::Multiply | BinaryOp::Divide => {
                let ea = a.scale.exponent.unwrap_or(MSB);
                let eb = b.scale.exponent.unwrap_or(MSB);
                determine_next(a, ea);
                determine_next(b, eb);
                expr.scale.exponent = Some(next);
            }
            BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Modulo => {
                determine_next(a, own);
                determine_next(b, own);
            }
            BinaryOp::And | BinaryOp::Or => {
                let ea = a.scale.exponent.unwrap_or(MSB);
                let eb = b.scale.exponent.unwrap_or(MSB);
                determine_next(a, ea);
                determine_next(b, eb);
            }
            BinaryOp::Power => {
                let eb = b.scale.exponent.unwrap_or(MSB);
                determine_next(a, own);
                determine_next(b, eb);
            }
            _ => {
                // Comparison: align both sides.
                let ea = a.scale.exponent.unwrap_or(MSB);
                let eb = b.scale.exponent.unwrap_or(MSB);
                let common = ea.max(eb);
                determine_next(a, common);
                determine_next(b, common);
            }
        },
        ExprKind::Call(f, args) => match f {
            Func::Min | Func::Max => {
                for a in args.iter_mut() {
                    determine_next(a, own);
                }
            }
            _ => {
                for a in args.iter_mut() {
                    let e = a.scale.exponent.unwrap_or(MSB);
                    determine_next(a, e);
                }
            }
        },
    }
}

// ── Driver ───────────────────────────────────────────────────────────────

fn live_variables(model: &Model) -> Vec<VarId> {
    model
        .pre_order()
        .into_iter()
        .flat_map(|s| model.set(s).variables.clone())
        .collect()
}

/// Iterate variable exponents to a fixed point, then annotate every
/// expression for rendering. Returns the number of rounds taken.
pub fn determine_exponents(model: &mut Model, duration: f64) -> Result<usize> {
    let vars = live_variables(model);
    let mut known: Vec<Known> = vec![None; model.vars.len()];
    for &v in &vars {
        known[v.index()] = fixed_scale(model, v, duration);
    }

    let mut rounds = 0;
    loop {
        rounds += 1;
        let snapshot = known.clone();
        let mut candidates: Vec<Known> = vec![None; model.vars.len()];
        for &v in &vars {
            let mut equations = std::mem::take(&mut model.var_mut(v).equations);
            let ctx = Context {
                model,
                known: &snapshot,
            };
            let mut best: Known = None;
            for e in &mut equations {
                let k = ctx.determine(&mut e.expression);
                if let Some(c) = &mut e.condition {
                    ctx.determine(c);
                }
                best = max_known(best, k);
            }
            // Reference writers contribute to the variable they store into.
            let target = match model.var(v).reference.target {
                Some(t) if model.var(v).has(Attr::Reference) => t,
                _ => v,
            };
            candidates[target.index()] = max_known(candidates[target.index()], best);
            model.var_mut(v).equations = equations;
        }

        let mut changed = false;
        for &v in &vars {
            if fixed_scale(model, v, duration).is_some() {
                continue;
            }
            let var = model.var(v);
            let mut next = candidates[v.index()];
            if var.has(Attr::Reference) {
                next = var.reference.target.and_then(|t| known[t.index()].or(candidates[t.index()]));
            } else if next.is_none() && var.equations.is_empty() {
                next = Some((DEFAULT_EXPONENT, DEFAULT_CENTER));
            }
            if next.is_some() && next != known[v.index()] {
                known[v.index()] = next;
                changed = true;
            }
        }

        let unknown: Vec<VarId> = vars
            .iter()
            .copied()
            .filter(|v| known[v.index()].is_none())
            .collect();
        if !changed && unknown.is_empty() {
            break;
        }
        if rounds >= MAX_ROUNDS {
            if unknown.is_empty() {
                break;
            }
            let names = unknown
                .iter()
                .map(|&v| model.var_path(v))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(AbortRun::ExponentNonConvergence(names));
        }
    }

    for &v in &vars {
        if let Some((e, c)) = known[v.index()] {
            let var = model.var_mut(v);
            var.exponent = Some(e);
            var.center = c;
        }
    }

    // Each equation must deliver the exponent of the variable it stores into.
    for &v in &vars {
        let target = match model.var(v).reference.target {
            Some(t) if model.var(v).has(Attr::Reference) => t,
            _ => v,
        };
        let target_exponent = model.var(target).exponent.unwrap_or(DEFAULT_EXPONENT);
        let assignment = model.var(v).assignment;
        for e in &mut model.var_mut(v).equations {
            let own = e.expression.scale.exponent.unwrap_or(target_exponent);
            let next = match assignment {
                Assignment::Multiply | Assignment::Divide => own,
                _ => target_exponent,
            };
            determine_next(&mut e.expression, next);
            if let Some(c) = &mut e.condition {
                let own = c.scale.exponent.unwrap_or(MSB);
                determine_next(c, own);
            }
        }
        debug!(
            "{}: exponent {:?} center {}",
            model.var_path(v),
            model.var(v).exponent,
            model.var(v).center
        );
    }

    info!("exponents converged after {} rounds", rounds);
    Ok(rounds)
}

/// Scale annotation helper for synthesized expressions.
pub fn scale_of(exponent: i32, center: i32) -> Scale {
    Scale {
        exponent: Some(exponent),
        center,
        exponent_next: Some(exponent),
    }
}
