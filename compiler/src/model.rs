// model.rs — The equation-set tree
//
// Arena of equation sets and variables built from a model document. Later
// passes annotate it in place (attributes, resolution paths, order,
// exponents); code generation only ever sees `&Model`.
//
// Preconditions: the document is already flattened (no inheritance).
// Postconditions: every equation is parsed; specials are present; `$type`
//   equations are rewritten to split indices; binding endpoints are found.
// Failure modes: parse errors, unknown attributes, unresolved endpoints or
//   split targets abort the job.
// Side effects: none.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::attr::{Attr, AttrSet};
use crate::document::{BackendDoc, EquationDoc, PartDoc, VariableDoc};
use crate::error::{AbortRun, Result};
use crate::expr::{Expr, ExprKind, VarRef};
use crate::id::{IdAllocator, SetId, VarId};
use crate::parser::{parse_equation, parse_expression, ParseError};

// ── Resolution steps ─────────────────────────────────────────────────────

/// One hop of a resolution path from a referencing set to a target set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// Move to the container of the current set; the payload is the container.
    Ascend(SetId),
    /// Move into a child population.
    Descend(SetId),
    /// Follow connection binding `binding` of the current set to its endpoint.
    Connect { binding: usize, endpoint: SetId },
}

impl Step {
    /// The set reached after taking this step.
    pub fn target(self) -> SetId {
        match self {
            Step::Ascend(s) | Step::Descend(s) => s,
            Step::Connect { endpoint, .. } => endpoint,
        }
    }
}

// ── Variables ────────────────────────────────────────────────────────────

/// How several simultaneous writers to one variable combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Assignment {
    #[default]
    Replace,
    Add,
    Multiply,
    Divide,
    Min,
    Max,
}

impl Assignment {
    /// Value the `next_` slot is reset to before writers accumulate into it.
    pub fn identity(self) -> Option<f64> {
        match self {
            Assignment::Replace => None,
            Assignment::Add => Some(0.0),
            Assignment::Multiply | Assignment::Divide => Some(1.0),
            Assignment::Min => Some(f64::INFINITY),
            Assignment::Max => Some(f64::NEG_INFINITY),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueType {
    #[default]
    Scalar,
    Matrix {
        rows: usize,
        cols: usize,
    },
    Text,
}

/// One conditional right-hand side.
#[derive(Debug, Clone, PartialEq)]
pub struct EquationEntry {
    /// Condition source text; empty when unconditional.
    pub if_string: String,
    pub condition: Option<Expr>,
    pub expression: Expr,
}

impl EquationEntry {
    pub fn unconditional(expression: Expr) -> Self {
        EquationEntry {
            if_string: String::new(),
            condition: None,
            expression,
        }
    }

    pub fn is_unconditional(&self) -> bool {
        self.if_string.is_empty()
    }

    pub fn is_init(&self) -> bool {
        self.if_string == "$init"
    }

    pub fn is_connect(&self) -> bool {
        self.if_string == "$connect"
    }

    /// Equal guards compare equal; unconditional sorts last, then `$init`,
    /// then longer guards before shorter ones, then by guard text.
    pub fn priority(&self, other: &EquationEntry) -> Ordering {
        if self.if_string == other.if_string {
            return Ordering::Equal;
        }
        if self.if_string.is_empty() {
            return Ordering::Greater;
        }
        if other.if_string.is_empty() {
            return Ordering::Less;
        }
        if self.is_init() {
            return Ordering::Greater;
        }
        if other.is_init() {
            return Ordering::Less;
        }
        other
            .if_string
            .len()
            .cmp(&self.if_string.len())
            .then_with(|| self.if_string.cmp(&other.if_string))
    }
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub id: VarId,
    pub set: SetId,
    /// Name without primes; may carry a path (`$up.x`) for reference writers.
    pub name: String,
    pub order: u32,
    pub attrs: AttrSet,
    pub assignment: Assignment,
    pub value_type: ValueType,
    pub equations: Vec<EquationEntry>,
    /// Where the value is stored. Resolves to this variable unless `Reference`.
    pub reference: VarRef,
    /// Variables this one reads.
    pub uses: Vec<VarId>,
    /// Variables that read this one.
    pub users: Vec<VarId>,
    /// The `x'` of `x`.
    pub derivative: Option<VarId>,
    pub exponent: Option<i32>,
    pub center: i32,
}

impl Variable {
    pub fn has(&self, attr: Attr) -> bool {
        self.attrs.contains(attr)
    }

    pub fn has_any(&self, attrs: &[Attr]) -> bool {
        self.attrs.contains_any(attrs)
    }

    /// `x''` style name.
    pub fn name_string(&self) -> String {
        format!("{}{}", self.name, "'".repeat(self.order as usize))
    }

    /// Member unless recomputed, folded, or evaluated only for effect.
    pub fn is_member(&self) -> bool {
        !self.has_any(&[Attr::Constant, Attr::Temporary, Attr::Dummy])
    }

    pub fn add_use(&mut self, other: VarId) {
        if !self.uses.contains(&other) {
            self.uses.push(other);
        }
    }

    pub fn add_user(&mut self, other: VarId) {
        if !self.users.contains(&other) {
            self.users.push(other);
        }
    }

    /// Single unconditional equation, if that is all there is.
    pub fn sole_expression(&self) -> Option<&Expr> {
        match self.equations.as_slice() {
            [only] if only.is_unconditional() => Some(&only.expression),
            _ => None,
        }
    }
}

// ── Equation sets ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ConnectionBinding {
    pub alias: String,
    pub endpoint_name: String,
    pub endpoint: SetId,
    pub index: usize,
    pub resolution: Vec<Step>,
}

/// Sparse adjacency read from a file; rows and columns name bindings.
#[derive(Debug, Clone)]
pub struct ConnectionMatrix {
    pub file: String,
    pub rows: usize,
    pub columns: usize,
}

#[derive(Debug, Clone)]
pub struct EquationSet {
    pub id: SetId,
    pub name: String,
    pub container: Option<SetId>,
    pub parts: Vec<SetId>,
    /// Non-empty iff this is a connection type.
    pub bindings: Vec<ConnectionBinding>,
    pub matrix: Option<ConnectionMatrix>,
    pub variables: Vec<VarId>,
    /// Distinct `$type` target lists, in discovery order.
    pub splits: Vec<Vec<SetId>>,
    /// Evaluation order.
    pub ordered: Vec<VarId>,
    pub lethal_p: bool,
    pub lethal_type: bool,
    pub lethal_connection: bool,
    pub lethal_container: bool,
    /// Another set holds a counted reference to instances of this one.
    pub referenced: bool,
    /// `$live` flags of other sets this one must keep alive while it exists.
    pub live_references: Vec<LiveReference>,
    /// Connections that limit (`$min`/`$max`) how many of them attach to
    /// one instance of this set, and so need a per-instance count.
    pub accountable_connections: Vec<AccountableConnection>,
    /// Binding whose endpoint shares this set's container.
    pub path_to_container: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveReference {
    pub target: SetId,
    pub resolution: Vec<Step>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountableConnection {
    pub connection: SetId,
    pub binding: usize,
}

impl EquationSet {
    pub fn is_connection(&self) -> bool {
        !self.bindings.is_empty()
    }

    pub fn can_die(&self) -> bool {
        self.lethal_p || self.lethal_type || self.lethal_connection || self.lethal_container
    }

    pub fn binding(&self, alias: &str) -> Option<&ConnectionBinding> {
        self.bindings.iter().find(|b| b.alias == alias)
    }
}

// ── Model ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Model {
    pub sets: Vec<EquationSet>,
    pub vars: Vec<Variable>,
    pub root: SetId,
    pub backend: BackendDoc,
}

impl Model {
    pub fn set(&self, id: SetId) -> &EquationSet {
        &self.sets[id.index()]
    }

    pub fn set_mut(&mut self, id: SetId) -> &mut EquationSet {
        &mut self.sets[id.index()]
    }

    pub fn var(&self, id: VarId) -> &Variable {
        &self.vars[id.index()]
    }

    pub fn var_mut(&mut self, id: VarId) -> &mut Variable {
        &mut self.vars[id.index()]
    }

    /// Variable `name` with derivative `order` declared directly in `set`.
    pub fn find(&self, set: SetId, name: &str, order: u32) -> Option<VarId> {
        self.set(set)
            .variables
            .iter()
            .copied()
            .find(|&v| self.var(v).name == name && self.var(v).order == order)
    }

    pub fn is_root(&self, set: SetId) -> bool {
        set == self.root
    }

    /// Children before containers.
    pub fn post_order(&self) -> Vec<SetId> {
        let mut out = Vec::with_capacity(self.sets.len());
        self.post_order_from(self.root, &mut out);
        out
    }

    fn post_order_from(&self, set: SetId, out: &mut Vec<SetId>) {
        for &p in &self.set(set).parts {
            self.post_order_from(p, out);
        }
        out.push(set);
    }

    /// Containers before children.
    pub fn pre_order(&self) -> Vec<SetId> {
        let mut out = Vec::with_capacity(self.sets.len());
        let mut stack = vec![self.root];
        while let Some(s) = stack.pop() {
            out.push(s);
            stack.extend(self.set(s).parts.iter().rev().copied());
        }
        out
    }

    /// Class-name stem: mangled names from the root down, joined by `_`.
    pub fn prefix(&self, set: Option<SetId>) -> String {
        let Some(mut s) = set else {
            return "Wrapper".to_string();
        };
        let mut result = mangle(&self.set(s).name);
        while let Some(c) = self.set(s).container {
            result = format!("{}_{}", mangle(&self.set(c).name), result);
            s = c;
        }
        result
    }

    /// Dotted path from the root, for diagnostics.
    pub fn path(&self, set: SetId) -> String {
        let mut names = vec![self.set(set).name.clone()];
        let mut s = set;
        while let Some(c) = self.set(s).container {
            names.push(self.set(c).name.clone());
            s = c;
        }
        names.reverse();
        names.join(".")
    }

    pub fn var_path(&self, v: VarId) -> String {
        let var = self.var(v);
        format!("{}.{}", self.path(var.set), var.name_string())
    }

    /// `$n` is constant 1 (or absent).
    pub fn n_is_one(&self, set: SetId) -> bool {
        match self.find(set, "$n", 0) {
            None => true,
            Some(n) => match self.var(n).equations.as_slice() {
                [] => true,
                [only] => {
                    only.is_unconditional() && only.expression.constant_value() == Some(1.0)
                }
                _ => false,
            },
        }
    }

    /// Attribute snapshot, for monotonicity checks.
    pub fn attribute_snapshot(&self) -> Vec<AttrSet> {
        self.vars.iter().map(|v| v.attrs).collect()
    }

    // ── Construction ─────────────────────────────────────────────────────

    pub fn from_document(doc: &PartDoc) -> Result<Model> {
        let mut builder = Builder {
            ids: IdAllocator::new(),
            sets: Vec::new(),
            vars: Vec::new(),
            pending_bindings: Vec::new(),
            pending_matrix: Vec::new(),
            pending_splits: Vec::new(),
        };
        let root = builder.build_set(doc, None)?;
        let mut model = Model {
            sets: builder.sets,
            vars: builder.vars,
            root,
            backend: doc.backend.clone().unwrap_or_default(),
        };
        model.resolve_bindings(&builder.pending_bindings)?;
        model.attach_matrices(&builder.pending_matrix)?;
        model.add_specials();
        model.add_attributes();
        model.collect_splits(&builder.pending_splits)?;
        Ok(model)
    }

    fn resolve_bindings(&mut self, pending: &[(SetId, String, String)]) -> Result<()> {
        for (set, alias, endpoint_name) in pending {
            let (endpoint, resolution) = self
                .find_part_upward(*set, endpoint_name)
                .ok_or_else(|| AbortRun::UnresolvedEndpoint {
                    set: self.path(*set),
                    alias: alias.clone(),
                    endpoint: endpoint_name.clone(),
                })?;
            let index = self.set(*set).bindings.len();
            self.set_mut(*set).bindings.push(ConnectionBinding {
                alias: alias.clone(),
                endpoint_name: endpoint_name.clone(),
                endpoint,
                index,
                resolution,
            });
        }
        Ok(())
    }

    /// Search the containers of `from` (nearest first) for a part named
    /// `name`. The path ascends to the owning container and then descends.
    fn find_part_upward(&self, from: SetId, name: &str) -> Option<(SetId, Vec<Step>)> {
        let mut steps = Vec::new();
        let mut current = self.set(from).container;
        while let Some(c) = current {
            steps.push(Step::Ascend(c));
            if let Some(&p) = self.set(c).parts.iter().find(|&&p| self.set(p).name == name) {
                steps.push(Step::Descend(p));
                return Some((p, steps));
            }
            current = self.set(c).container;
        }
        None
    }

    fn attach_matrices(&mut self, pending: &[(SetId, crate::document::MatrixDoc)]) -> Result<()> {
        for (set, m) in pending {
            let index_of = |alias: &str| -> Result<usize> {
                self.set(*set)
                    .bindings
                    .iter()
                    .position(|b| b.alias == alias)
                    .ok_or_else(|| AbortRun::UnresolvedEndpoint {
                        set: self.path(*set),
                        alias: alias.to_string(),
                        endpoint: m.file.clone(),
                    })
            };
            let rows = index_of(&m.rows)?;
            let columns = index_of(&m.columns)?;
            self.set_mut(*set).matrix = Some(ConnectionMatrix {
                file: m.file.clone(),
                rows,
                columns,
            });
        }
        Ok(())
    }

    fn add_special(&mut self, set: SetId, name: &str, order: u32) {
        if self.find(set, name, order).is_none() {
            self.add_variable(set, name, order, [Attr::Special].into_iter().collect());
        }
    }

    /// Append a compiler-created variable with no equations.
    pub fn add_variable(&mut self, set: SetId, name: &str, order: u32, attrs: AttrSet) -> VarId {
        let id = VarId(self.vars.len() as u32);
        let text = format!("{}{}", name, "'".repeat(order as usize));
        let mut reference = VarRef::parse(&text);
        reference.target = Some(id);
        self.vars.push(Variable {
            id,
            set,
            name: name.to_string(),
            order,
            attrs,
            assignment: Assignment::Replace,
            value_type: ValueType::Scalar,
            equations: Vec::new(),
            reference,
            uses: Vec::new(),
            users: Vec::new(),
            derivative: None,
            exponent: None,
            center: 0,
        });
        self.set_mut(set).variables.push(id);
        id
    }

    /// `$t $t' $init $live` everywhere; `$n $index $type` below the root;
    /// `$connect` on connections.
    fn add_specials(&mut self) {
        for set in self.pre_order() {
            self.add_special(set, "$t", 0);
            self.add_special(set, "$t", 1);
            self.add_special(set, "$init", 0);
            self.add_special(set, "$live", 0);
            if !self.is_root(set) {
                self.add_special(set, "$n", 0);
                self.add_special(set, "$index", 0);
                self.add_special(set, "$type", 0);
            }
            if self.set(set).is_connection() {
                self.add_special(set, "$connect", 0);
            }
        }
    }

    /// Connection parameters such as `A.$max` match by their last component.
    /// `$init` and `$connect` are phase indicators supplied by the caller.
    fn add_attributes(&mut self) {
        const GLOBAL: [&str; 5] = ["$max", "$min", "$k", "$n", "$radius"];
        for v in &mut self.vars {
            let last = v.name.rsplit('.').next().unwrap_or_default();
            if v.order == 0 && GLOBAL.contains(&last) {
                v.attrs.insert(Attr::Global);
            }
            let preexistent = match v.name.as_str() {
                "$t" => v.order <= 1,
                "$index" | "$init" | "$connect" => v.order == 0,
                _ => false,
            };
            if preexistent {
                v.attrs.insert(Attr::Preexistent);
            }
        }
    }

    /// Record each distinct `$type` target list once and rewrite the
    /// equation to the 1-based split index.
    fn collect_splits(&mut self, pending: &[(VarId, usize, Vec<String>)]) -> Result<()> {
        for (v, eq, names) in pending {
            let set = self.var(*v).set;
            let container = self.set(set).container;
            let mut targets = Vec::with_capacity(names.len());
            for name in names {
                let found = container.and_then(|c| {
                    self.set(c)
                        .parts
                        .iter()
                        .copied()
                        .find(|&p| self.set(p).name == *name)
                });
                let target = found.ok_or_else(|| AbortRun::Unresolved {
                    name: name.clone(),
                    set: self.path(set),
                })?;
                targets.push(target);
            }
            let splits = &mut self.set_mut(set).splits;
            let index = match splits.iter().position(|s| *s == targets) {
                Some(i) => i,
                None => {
                    splits.push(targets);
                    splits.len() - 1
                }
            };
            let entry = &mut self.var_mut(*v).equations[*eq];
            let span = entry.expression.span;
            entry.expression = Expr::new(ExprKind::Constant((index + 1) as f64), span);
        }
        Ok(())
    }
}

/// C++ identifier for a model name. Letters and digits pass through; every
/// other character (including `_`) becomes `_` plus its hex code.
pub fn mangle(input: &str) -> String {
    mangle_with("_", input)
}

pub fn mangle_with(prefix: &str, input: &str) -> String {
    let mut result = String::from(prefix);
    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            result.push(c);
        } else {
            result.push_str(&format!("_{:x}", c as u32));
        }
    }
    result
}

// ── Builder ──────────────────────────────────────────────────────────────

struct Builder {
    ids: IdAllocator,
    sets: Vec<EquationSet>,
    vars: Vec<Variable>,
    pending_bindings: Vec<(SetId, String, String)>,
    pending_matrix: Vec<(SetId, crate::document::MatrixDoc)>,
    /// `$type` equations: variable, equation index, target names.
    pending_splits: Vec<(VarId, usize, Vec<String>)>,
}

impl Builder {
    fn build_set(&mut self, doc: &PartDoc, container: Option<SetId>) -> Result<SetId> {
        let id = self.ids.alloc_set();
        self.sets.push(EquationSet {
            id,
            name: doc.name.clone(),
            container,
            parts: Vec::new(),
            bindings: Vec::new(),
            matrix: None,
            variables: Vec::new(),
            splits: Vec::new(),
            ordered: Vec::new(),
            lethal_p: false,
            lethal_type: false,
            lethal_connection: false,
            lethal_container: false,
            referenced: false,
            live_references: Vec::new(),
            accountable_connections: Vec::new(),
            path_to_container: None,
        });
        for b in &doc.connect {
            self.pending_bindings
                .push((id, b.alias.clone(), b.endpoint.clone()));
        }
        if let Some(m) = &doc.matrix {
            self.pending_matrix.push((id, m.clone()));
        }
        for v in &doc.variables {
            self.build_variable(id, v)?;
        }
        for p in &doc.parts {
            let child = self.build_set(p, Some(id))?;
            self.sets[id.index()].parts.push(child);
        }
        Ok(id)
    }

    fn build_variable(&mut self, set: SetId, doc: &VariableDoc) -> Result<()> {
        let id = self.ids.alloc_var();
        let mut reference = VarRef::parse(doc.name.trim());
        let name = if reference.path.is_empty() {
            reference.name.clone()
        } else {
            format!("{}.{}", reference.path.join("."), reference.name)
        };
        if reference.path.is_empty() {
            reference.target = Some(id);
        }

        let mut attrs = AttrSet::new();
        for a in &doc.attributes {
            let attr: Attr = a.parse().map_err(|message| AbortRun::Parse {
                variable: doc.name.clone(),
                text: a.clone(),
                message,
            })?;
            attrs.insert(attr);
        }

        let is_type = name == "$type";
        let mut equations: Vec<EquationEntry> = Vec::new();
        for e in &doc.equations {
            let (entry, split) = parse_entry(&doc.name, e, is_type)?;
            // A later equation with the same guard replaces the earlier one.
            let slot = match equations.iter().position(|q| q.if_string == entry.if_string) {
                Some(i) => {
                    equations[i] = entry;
                    i
                }
                None => {
                    equations.push(entry);
                    equations.len() - 1
                }
            };
            if let Some(names) = split {
                self.pending_splits.retain(|(v, i, _)| !(*v == id && *i == slot));
                self.pending_splits.push((id, slot, names));
            }
        }

        self.vars.push(Variable {
            id,
            set,
            name,
            order: reference.order,
            attrs,
            assignment: doc.assignment,
            value_type: ValueType::Scalar,
            equations,
            reference,
            uses: Vec::new(),
            users: Vec::new(),
            derivative: None,
            exponent: None,
            center: 0,
        });
        self.sets[set.index()].variables.push(id);
        Ok(())
    }
}

fn parse_failure(variable: &str, text: &str, errors: Vec<ParseError>) -> AbortRun {
    let message = errors
        .into_iter()
        .map(|e| e.message)
        .collect::<Vec<_>>()
        .join("; ");
    AbortRun::Parse {
        variable: variable.to_string(),
        text: text.to_string(),
        message,
    }
}

/// Parse one document equation. `$type` right-hand sides are comma-separated
/// part names, returned separately and replaced by a placeholder.
fn parse_entry(
    variable: &str,
    doc: &EquationDoc,
    is_type: bool,
) -> Result<(EquationEntry, Option<Vec<String>>)> {
    let parse_condition = |c: &str| -> Result<(String, Option<Expr>)> {
        let c = c.trim();
        if c.is_empty() {
            return Ok((String::new(), None));
        }
        let expr = parse_expression(c).map_err(|e| parse_failure(variable, c, e))?;
        Ok((c.to_string(), Some(expr)))
    };

    if is_type {
        let (names, condition) = match doc {
            EquationDoc::Text(text) => match text.split_once('@') {
                Some((e, c)) => (e, Some(c)),
                None => (text.as_str(), None),
            },
            EquationDoc::Split {
                expression,
                condition,
            } => (expression.as_str(), condition.as_deref()),
        };
        let (if_string, condition) = parse_condition(condition.unwrap_or(""))?;
        let names: Vec<String> = names
            .split(',')
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();
        let entry = EquationEntry {
            if_string,
            condition,
            expression: Expr::constant(0.0),
        };
        let split = if names.is_empty() { None } else { Some(names) };
        return Ok((entry, split));
    }

    let entry = match doc {
        EquationDoc::Text(text) => {
            let parsed = parse_equation(text).map_err(|e| parse_failure(variable, text, e))?;
            match parsed.condition {
                Some(c) if !c.text.is_empty() => EquationEntry {
                    if_string: c.text,
                    condition: Some(c.expr),
                    expression: parsed.expression,
                },
                _ => EquationEntry::unconditional(parsed.expression),
            }
        }
        EquationDoc::Split {
            expression,
            condition,
        } => {
            let expr =
                parse_expression(expression).map_err(|e| parse_failure(variable, expression, e))?;
            let (if_string, condition) = parse_condition(condition.as_deref().unwrap_or(""))?;
            EquationEntry {
                if_string,
                condition,
                expression: expr,
            }
        }
    };
    Ok((entry, None))
}

impl fmt::Display for Model {
    /// Indented dump of sets and variables with their attributes.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for set in self.pre_order() {
            let s = self.set(set);
            let mut depth = 0;
            let mut c = s.container;
            while let Some(p) = c {
                depth += 1;
                c = self.set(p).container;
            }
            let indent = "  ".repeat(depth);
            write!(f, "{}{}", indent, s.name)?;
            if s.is_connection() {
                let aliases: Vec<String> = s
                    .bindings
                    .iter()
                    .map(|b| format!("{}={}", b.alias, self.set(b.endpoint).name))
                    .collect();
                write!(f, " connect({})", aliases.join(", "))?;
            }
            writeln!(f)?;
            for &v in &s.variables {
                let var = self.var(v);
                write!(f, "{}  {} [{}]", indent, var.name_string(), var.attrs)?;
                for e in &var.equations {
                    if e.is_unconditional() {
                        write!(f, " {}", e.expression)?;
                    } else {
                        write!(f, " {} @ {};", e.expression, e.if_string)?;
                    }
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}
