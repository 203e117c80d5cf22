// cpp.rs — A small typed C++ syntax tree and its printer
//
// Emitters build statements, functions and class declarations as values;
// `Printer` lays them out with two-space indentation and braces on their
// own lines. Expression text is opaque here.
//
// Preconditions: none.
// Postconditions: printing is deterministic.
// Failure modes: none.
// Side effects: none.

use std::fmt::Write as _;

// ── Statements ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// One line of code, printed as given (including any `;`).
    Line(String),
    /// `head` followed by a braced body. An empty head prints a bare scope.
    Block { head: String, body: Vec<Stmt> },
    /// `if` / `else if` chain with an optional `else`.
    If {
        arms: Vec<(String, Vec<Stmt>)>,
        otherwise: Option<Vec<Stmt>>,
    },
    Switch {
        subject: String,
        cases: Vec<(String, Vec<Stmt>)>,
    },
    Blank,
}

impl Stmt {
    pub fn line(text: impl Into<String>) -> Stmt {
        Stmt::Line(text.into())
    }

    pub fn block(head: impl Into<String>, body: Vec<Stmt>) -> Stmt {
        Stmt::Block {
            head: head.into(),
            body,
        }
    }

    pub fn when(condition: impl Into<String>, body: Vec<Stmt>) -> Stmt {
        Stmt::If {
            arms: vec![(condition.into(), body)],
            otherwise: None,
        }
    }

    pub fn when_else(condition: impl Into<String>, body: Vec<Stmt>, otherwise: Vec<Stmt>) -> Stmt {
        Stmt::If {
            arms: vec![(condition.into(), body)],
            otherwise: Some(otherwise),
        }
    }
}

// ── Functions and classes ────────────────────────────────────────────────

/// An out-of-class function definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    /// Everything before the body, e.g. `void _M__A::init ()`.
    pub signature: String,
    pub body: Vec<Stmt>,
}

impl Function {
    pub fn new(signature: impl Into<String>, body: Vec<Stmt>) -> Self {
        Function {
            signature: signature.into(),
            body,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Member {
    /// A field or method declaration; `;` is appended.
    Decl(String),
    /// A method with an inline body.
    Inline(Function),
    /// A nested class, e.g. the integrator's saved-state record.
    Nested(Class),
    Blank,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Class {
    pub name: String,
    pub base: Option<String>,
    pub members: Vec<Member>,
}

impl Class {
    pub fn new(name: impl Into<String>, base: Option<String>) -> Self {
        Class {
            name: name.into(),
            base,
            members: Vec::new(),
        }
    }

    pub fn decl(&mut self, text: impl Into<String>) {
        self.members.push(Member::Decl(text.into()));
    }

    pub fn inline(&mut self, f: Function) {
        self.members.push(Member::Inline(f));
    }

    /// Separate groups with one blank line, never two.
    pub fn blank(&mut self) {
        if !matches!(self.members.last(), None | Some(Member::Blank)) {
            self.members.push(Member::Blank);
        }
    }
}

/// A class declaration together with its out-of-class method definitions.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassCode {
    pub class: Class,
    pub definitions: Vec<Function>,
}

impl ClassCode {
    pub fn new(name: impl Into<String>, base: Option<String>) -> Self {
        ClassCode {
            class: Class::new(name, base),
            definitions: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.class.name
    }

    pub fn decl(&mut self, text: impl Into<String>) {
        self.class.decl(text);
    }

    pub fn blank(&mut self) {
        self.class.blank();
    }

    fn define(&mut self, declaration: String, ret: &str, name: &str, body: Vec<Stmt>) {
        self.class.decl(declaration);
        let signature = if ret.is_empty() {
            format!("{}::{}", self.class.name, name)
        } else {
            format!("{} {}::{}", ret, self.class.name, name)
        };
        self.definitions.push(Function::new(signature, body));
    }

    /// Virtual override, e.g. `method("void", "init ()", body)`.
    pub fn method(&mut self, ret: &str, name: &str, body: Vec<Stmt>) {
        self.define(format!("virtual {} {}", ret, name), ret, name, body);
    }

    /// Non-virtual member function.
    pub fn helper(&mut self, ret: &str, name: &str, body: Vec<Stmt>) {
        self.define(format!("{} {}", ret, name), ret, name, body);
    }

    pub fn constructor(&mut self, body: Vec<Stmt>) {
        let name = format!("{} ()", self.class.name);
        self.define(name.clone(), "", &name, body);
    }

    pub fn destructor(&mut self, body: Vec<Stmt>) {
        let name = format!("~{} ()", self.class.name);
        self.define(format!("virtual {}", name), "", &name, body);
    }
}

// ── Printer ──────────────────────────────────────────────────────────────

pub struct Printer {
    out: String,
    depth: usize,
}

impl Default for Printer {
    fn default() -> Self {
        Self::new()
    }
}

impl Printer {
    pub fn new() -> Self {
        Printer {
            out: String::with_capacity(16384),
            depth: 0,
        }
    }

    pub fn finish(self) -> String {
        self.out
    }

    pub fn raw(&mut self, text: &str) {
        self.out.push_str(text);
    }

    pub fn line(&mut self, text: &str) {
        if text.is_empty() {
            self.out.push('\n');
            return;
        }
        let _ = writeln!(self.out, "{}{}", "  ".repeat(self.depth), text);
    }

    fn braced(&mut self, body: &[Stmt]) {
        self.line("{");
        self.depth += 1;
        self.stmts(body);
        self.depth -= 1;
        self.line("}");
    }

    pub fn stmts(&mut self, body: &[Stmt]) {
        for s in body {
            self.stmt(s);
        }
    }

    pub fn stmt(&mut self, s: &Stmt) {
        match s {
            Stmt::Line(text) => self.line(text),
            Stmt::Blank => self.line(""),
            Stmt::Block { head, body } => {
                if !head.is_empty() {
                    self.line(head);
                }
                self.braced(body);
            }
            Stmt::If { arms, otherwise } => {
                for (i, (condition, body)) in arms.iter().enumerate() {
                    let keyword = if i == 0 { "if" } else { "else if" };
                    self.line(&format!("{} ({})", keyword, condition));
                    self.braced(body);
                }
                if let Some(body) = otherwise {
                    if arms.is_empty() {
                        self.stmts(body);
                    } else {
                        self.line("else");
                        self.braced(body);
                    }
                }
            }
            Stmt::Switch { subject, cases } => {
                self.line(&format!("switch ({})", subject));
                self.line("{");
                self.depth += 1;
                for (label, body) in cases {
                    self.line(label);
                    if matches!(body.last(), Some(Stmt::Line(l)) if l.starts_with("return")) {
                        self.braced(body);
                    } else {
                        let mut body = body.clone();
                        body.push(Stmt::line("break;"));
                        self.braced(&body);
                    }
                }
                self.depth -= 1;
                self.line("}");
            }
        }
    }

    pub fn function(&mut self, f: &Function) {
        self.line(&f.signature);
        self.braced(&f.body);
        self.line("");
    }

    fn class_body(&mut self, c: &Class) {
        match &c.base {
            Some(base) => self.line(&format!("class {} : public {}", c.name, base)),
            None => self.line(&format!("class {}", c.name)),
        }
        self.line("{");
        self.line("public:");
        self.depth += 1;
        for m in &c.members {
            match m {
                Member::Decl(text) => self.line(&format!("{};", text)),
                Member::Inline(f) => {
                    self.line(&f.signature);
                    self.braced(&f.body);
                }
                Member::Nested(inner) => self.class_body(inner),
                Member::Blank => self.line(""),
            }
        }
        self.depth -= 1;
        self.line("};");
    }

    pub fn class(&mut self, c: &Class) {
        self.class_body(c);
        self.line("");
    }
}
