// expr.rs — Expression trees for equation right-hand sides and conditions
//
// Produced by the parser, name-resolved in place by `resolve`, annotated
// with fixed-point exponents by `exponent`, and rendered by `render`.
//
// Preconditions: none (types only, plus pure helpers).
// Postconditions: none.
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::id::VarId;
use crate::lexer::Span;
use crate::model::Step;

// ── Operators ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
    NotEqual,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Power => "^",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    /// Comparison and logical operators yield 0/1.
    pub fn is_logical(self) -> bool {
        matches!(
            self,
            BinaryOp::Less
                | BinaryOp::LessEqual
                | BinaryOp::Greater
                | BinaryOp::GreaterEqual
                | BinaryOp::Equal
                | BinaryOp::NotEqual
                | BinaryOp::And
                | BinaryOp::Or
        )
    }

    fn fold(self, a: f64, b: f64) -> f64 {
        let truth = |c: bool| if c { 1.0 } else { 0.0 };
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Subtract => a - b,
            BinaryOp::Multiply => a * b,
            BinaryOp::Divide => a / b,
            BinaryOp::Modulo => a % b,
            BinaryOp::Power => a.powf(b),
            BinaryOp::Less => truth(a < b),
            BinaryOp::LessEqual => truth(a <= b),
            BinaryOp::Greater => truth(a > b),
            BinaryOp::GreaterEqual => truth(a >= b),
            BinaryOp::Equal => truth(a == b),
            BinaryOp::NotEqual => truth(a != b),
            BinaryOp::And => truth(a != 0.0 && b != 0.0),
            BinaryOp::Or => truth(a != 0.0 || b != 0.0),
        }
    }
}

/// Built-in functions understood by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Sin,
    Cos,
    Tan,
    Exp,
    Log,
    Sqrt,
    Abs,
    Floor,
    Ceil,
    Round,
    Min,
    Max,
    Uniform,
    Gaussian,
    /// `event (condition [, delay [, edge]])`
    Event,
    /// `input (file, line, column [, mode])`
    Input,
    /// `output ([file,] value [, column])`
    Output,
    /// `matrix (file)` — sparse or dense matrix read from disk.
    Matrix,
}

impl Func {
    pub fn from_name(name: &str) -> Option<Func> {
        Some(match name {
            "sin" => Func::Sin,
            "cos" => Func::Cos,
            "tan" => Func::Tan,
            "exp" => Func::Exp,
            "log" => Func::Log,
            "sqrt" => Func::Sqrt,
            "abs" => Func::Abs,
            "floor" => Func::Floor,
            "ceil" => Func::Ceil,
            "round" => Func::Round,
            "min" => Func::Min,
            "max" => Func::Max,
            "uniform" => Func::Uniform,
            "gaussian" => Func::Gaussian,
            "event" => Func::Event,
            "input" => Func::Input,
            "output" => Func::Output,
            "matrix" => Func::Matrix,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Func::Sin => "sin",
            Func::Cos => "cos",
            Func::Tan => "tan",
            Func::Exp => "exp",
            Func::Log => "log",
            Func::Sqrt => "sqrt",
            Func::Abs => "abs",
            Func::Floor => "floor",
            Func::Ceil => "ceil",
            Func::Round => "round",
            Func::Min => "min",
            Func::Max => "max",
            Func::Uniform => "uniform",
            Func::Gaussian => "gaussian",
            Func::Event => "event",
            Func::Input => "input",
            Func::Output => "output",
            Func::Matrix => "matrix",
        }
    }

    /// Functions whose value depends on something other than their operands.
    pub fn is_impure(self) -> bool {
        matches!(
            self,
            Func::Uniform | Func::Gaussian | Func::Event | Func::Input | Func::Output
        )
    }
}

// ── Variable references ──────────────────────────────────────────────────

/// A symbolic reference such as `x`, `x'`, `$up.$live` or `A.$k`.
#[derive(Debug, Clone, PartialEq)]
pub struct VarRef {
    /// Text as written.
    pub text: String,
    /// Leading path components (`$up`, part names, binding aliases).
    pub path: Vec<String>,
    /// Final variable name without primes.
    pub name: String,
    /// Derivative order (number of trailing primes).
    pub order: u32,
    /// Filled by name resolution.
    pub target: Option<VarId>,
    /// Hops from the referencing set to the set holding `target`.
    pub resolution: Vec<Step>,
}

impl VarRef {
    pub fn parse(text: &str) -> VarRef {
        let mut parts: Vec<&str> = text.split('.').collect();
        let last = parts.pop().unwrap_or_default();
        let name = last.trim_end_matches('\'');
        let order = (last.len() - name.len()) as u32;
        VarRef {
            text: text.to_string(),
            path: parts.into_iter().map(str::to_string).collect(),
            name: name.to_string(),
            order,
            target: None,
            resolution: Vec::new(),
        }
    }

    pub fn is_local(&self) -> bool {
        self.resolution.is_empty()
    }
}

// ── Expression nodes ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Constant(f64),
    Text(String),
    /// Matrix literal `[a, b; c, d]`, row-major.
    Matrix(Vec<Vec<Expr>>),
    Ref(VarRef),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
}

/// Fixed-point annotation: `value = raw * 2^(exponent - MSB)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Scale {
    /// `None` until the exponent resolver has determined it.
    pub exponent: Option<i32>,
    pub center: i32,
    /// Exponent the consuming context requires (top-down pass).
    pub exponent_next: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
    pub scale: Scale,
}

/// Identity of a node inside a frozen tree, for side tables keyed by node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprKey(usize);

impl ExprKey {
    pub fn of(expr: &Expr) -> Self {
        ExprKey(expr as *const Expr as usize)
    }
}

/// Controls descent in `Expr::visit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Descend {
    Continue,
    Skip,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Expr {
            kind,
            span,
            scale: Scale::default(),
        }
    }

    pub fn constant(value: f64) -> Self {
        Expr::new(ExprKind::Constant(value), Span::default())
    }

    /// Operand list in evaluation order.
    pub fn operands(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Constant(_) | ExprKind::Text(_) | ExprKind::Ref(_) => Vec::new(),
            ExprKind::Matrix(rows) => rows.iter().flatten().collect(),
            ExprKind::Unary(_, a) => vec![a.as_ref()],
            ExprKind::Binary(_, a, b) => vec![a.as_ref(), b.as_ref()],
            ExprKind::Call(_, args) => args.iter().collect(),
        }
    }

    pub fn operands_mut(&mut self) -> Vec<&mut Expr> {
        match &mut self.kind {
            ExprKind::Constant(_) | ExprKind::Text(_) | ExprKind::Ref(_) => Vec::new(),
            ExprKind::Matrix(rows) => rows.iter_mut().flatten().collect(),
            ExprKind::Unary(_, a) => vec![a.as_mut()],
            ExprKind::Binary(_, a, b) => vec![a.as_mut(), b.as_mut()],
            ExprKind::Call(_, args) => args.iter_mut().collect(),
        }
    }

    /// Pre-order walk. Returning `Descend::Skip` prunes the node's operands.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Expr) -> Descend) {
        if f(self) == Descend::Skip {
            return;
        }
        for op in self.operands() {
            op.visit(f);
        }
    }

    pub fn visit_mut(&mut self, f: &mut impl FnMut(&mut Expr) -> Descend) {
        if f(self) == Descend::Skip {
            return;
        }
        for op in self.operands_mut() {
            op.visit_mut(f);
        }
    }

    /// All variable references, in pre-order.
    pub fn refs(&self) -> Vec<&VarRef> {
        let mut out = Vec::new();
        self.visit(&mut |e| {
            if let ExprKind::Ref(r) = &e.kind {
                out.push(r);
            }
            Descend::Continue
        });
        out
    }

    /// Fold to a number when the tree contains only numeric constants.
    pub fn constant_value(&self) -> Option<f64> {
        match &self.kind {
            ExprKind::Constant(v) => Some(*v),
            ExprKind::Unary(UnaryOp::Negate, a) => a.constant_value().map(|v| -v),
            ExprKind::Unary(UnaryOp::Not, a) => {
                a.constant_value().map(|v| if v == 0.0 { 1.0 } else { 0.0 })
            }
            ExprKind::Binary(op, a, b) => Some(op.fold(a.constant_value()?, b.constant_value()?)),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn contains_call(&self, func: Func) -> bool {
        let mut found = false;
        self.visit(&mut |e| {
            if matches!(&e.kind, ExprKind::Call(f, _) if *f == func) {
                found = true;
            }
            Descend::Continue
        });
        found
    }

    pub fn is_impure(&self) -> bool {
        let mut found = false;
        self.visit(&mut |e| {
            if matches!(&e.kind, ExprKind::Call(f, _) if f.is_impure()) {
                found = true;
            }
            Descend::Continue
        });
        found
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Constant(v) => write!(f, "{}", v),
            ExprKind::Text(s) => write!(f, "\"{}\"", s),
            ExprKind::Matrix(rows) => {
                write!(f, "[")?;
                for (r, row) in rows.iter().enumerate() {
                    if r > 0 {
                        write!(f, ";")?;
                    }
                    for (c, e) in row.iter().enumerate() {
                        if c > 0 {
                            write!(f, ",")?;
                        }
                        write!(f, "{}", e)?;
                    }
                }
                write!(f, "]")
            }
            ExprKind::Ref(r) => write!(f, "{}", r.text),
            ExprKind::Unary(UnaryOp::Negate, a) => write!(f, "-{}", a),
            ExprKind::Unary(UnaryOp::Not, a) => write!(f, "!{}", a),
            ExprKind::Binary(op, a, b) => write!(f, "({} {} {})", a, op.symbol(), b),
            ExprKind::Call(func, args) => {
                write!(f, "{}(", func.name())?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ")")
            }
        }
    }
}
