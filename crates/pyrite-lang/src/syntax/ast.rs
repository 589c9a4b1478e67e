use std::rc::Rc;

/// Source location attached to every node for error reporting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

// ─── Top level ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct Program {
    pub stmts: Vec<Stmt>,
}

impl Program {
    /// True when the final statement is a bare expression, i.e. the script
    /// has a result value.
    pub fn has_result_expr(&self) -> bool {
        matches!(self.stmts.last(), Some(Stmt::Expr(_)))
    }
}

// ─── Functions ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FnDef {
    pub name: String,
    pub params: Vec<Param>,
    /// Shared with every closure created from this definition.
    pub body: Rc<[Stmt]>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    /// Evaluated once, when the `def` statement runs.
    pub default: Option<Expr>,
    pub span: Span,
}

// ─── Statements ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum Stmt {
    /// `x = 1`, `xs[0] = 1`
    Assign(Assign),
    /// `x += 1`
    AugAssign(AugAssign),
    /// `if … elif … else`
    If(IfStmt),
    /// `for x in xs:`
    For(ForStmt),
    /// `while cond:`
    While(WhileStmt),
    /// `def name(params):`
    FnDef(FnDef),
    /// `return expr` or bare `return`
    Return(Option<Expr>, Span),
    /// `import json`
    Import(ImportDecl),
    /// `try: … except Kind as e: … else: … finally: …`
    Try(TryStmt),
    /// `raise expr`, or a bare `raise` inside a handler
    Raise(Option<Expr>, Span),
    Pass(Span),
    Break(Span),
    Continue(Span),
    /// A standalone expression used as a statement (e.g. a function call).
    Expr(Expr),
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Assign(a)    => a.span,
            Stmt::AugAssign(a) => a.span,
            Stmt::If(i)        => i.span,
            Stmt::For(f)       => f.span,
            Stmt::While(w)     => w.span,
            Stmt::FnDef(f)     => f.span,
            Stmt::Return(_, s) => *s,
            Stmt::Import(i)    => i.span,
            Stmt::Try(t)       => t.span,
            Stmt::Raise(_, s)  => *s,
            Stmt::Pass(s) | Stmt::Break(s) | Stmt::Continue(s) => *s,
            Stmt::Expr(e)      => e.span(),
        }
    }
}

/// Assignable locations.
#[derive(Debug, Clone)]
pub enum Target {
    Name(String),
    Index { expr: Box<Expr>, index: Box<Expr> },
    /// `a, b = …` and `for k, v in …`: one target per item.
    Unpack(Vec<Target>),
}

#[derive(Debug, Clone)]
pub struct Assign {
    pub target: Target,
    pub value: Expr,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct AugAssign {
    pub target: Target,
    pub op: BinOp,
    pub value: Expr,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct IfStmt {
    /// `if` followed by every `elif`, in order.
    pub branches: Vec<(Expr, Vec<Stmt>)>,
    pub else_block: Option<Vec<Stmt>>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct ForStmt {
    pub target: Target,
    pub iterable: Expr,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct WhileStmt {
    pub condition: Expr,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct TryStmt {
    pub body: Vec<Stmt>,
    pub handlers: Vec<ExceptClause>,
    /// Runs when the body finished without an error.
    pub else_block: Option<Vec<Stmt>>,
    pub finally: Option<Vec<Stmt>>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct ExceptClause {
    /// `None` for a bare `except:`. Dotted names keep their dots.
    pub kind: Option<String>,
    pub binding: Option<String>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

/// `import json` or `import os.path` (dotted names are kept whole).
#[derive(Debug, Clone)]
pub struct ImportDecl {
    pub name: String,
    pub span: Span,
}

// ─── Expressions ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum Expr {
    Int(i64, Span),
    Float(f64, Span),
    Str(String, Span),
    Bool(bool, Span),
    None(Span),
    Ident(String, Span),

    /// `a + b`, `a == b`, etc.
    BinOp {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
        span: Span,
    },

    /// Short-circuiting `and` / `or`.
    Logical {
        left: Box<Expr>,
        op: LogicalOp,
        right: Box<Expr>,
        span: Span,
    },

    /// `not x`, `-x`, `+x`
    UnOp {
        op: UnOp,
        operand: Box<Expr>,
        span: Span,
    },

    /// `then_expr if condition else else_expr`
    Conditional {
        condition: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
        span: Span,
    },

    /// `callee(args, name=val)`
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
        span: Span,
    },

    /// `expr[index]`
    Index {
        expr: Box<Expr>,
        index: Box<Expr>,
        span: Span,
    },

    /// `expr[start:stop:step]`, any part optional
    Slice {
        expr: Box<Expr>,
        start: Option<Box<Expr>>,
        stop: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
        span: Span,
    },

    /// `expr.field`
    Attribute {
        expr: Box<Expr>,
        name: String,
        span: Span,
    },

    /// `expr.method(args, name=val)`
    MethodCall {
        expr: Box<Expr>,
        method: String,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
        span: Span,
    },

    /// `[1, 2, 3]`
    List(Vec<Expr>, Span),

    /// `{"a": 1}`
    Dict(Vec<(Expr, Expr)>, Span),

    /// `[element for var in iterable if condition]`
    ListComp {
        element: Box<Expr>,
        clause: Box<CompClause>,
        span: Span,
    },

    /// `{key: value for var in iterable if condition}`
    DictComp {
        key: Box<Expr>,
        value: Box<Expr>,
        clause: Box<CompClause>,
        span: Span,
    },

    /// `lambda x, y=1: x + y`. The body is a single `return` statement so
    /// lambdas share the closure machinery with `def`.
    Lambda {
        params: Vec<Param>,
        body: Rc<[Stmt]>,
        span: Span,
    },

    /// `f"total: {n:.2f}"`
    FString(Vec<FStringPart>, Span),
}

#[derive(Debug, Clone)]
pub enum FStringPart {
    Text(String),
    Field {
        expr: Expr,
        /// `{x!r}`
        repr: bool,
        /// Text after the `:`, e.g. `>8.2f`.
        spec: Option<String>,
    },
}

/// The `for var in iterable if condition` tail shared by comprehensions.
#[derive(Debug, Clone)]
pub struct CompClause {
    pub target: Target,
    pub iterable: Expr,
    pub condition: Option<Expr>,
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Int(_, s)
            | Expr::Float(_, s)
            | Expr::Str(_, s)
            | Expr::Bool(_, s)
            | Expr::None(s)
            | Expr::Ident(_, s)
            | Expr::List(_, s)
            | Expr::Dict(_, s)
            | Expr::FString(_, s)               => *s,
            Expr::BinOp { span, .. }
            | Expr::Logical { span, .. }
            | Expr::UnOp { span, .. }
            | Expr::Conditional { span, .. }
            | Expr::Call { span, .. }
            | Expr::Index { span, .. }
            | Expr::Slice { span, .. }
            | Expr::Attribute { span, .. }
            | Expr::MethodCall { span, .. }
            | Expr::ListComp { span, .. }
            | Expr::DictComp { span, .. }
            | Expr::Lambda { span, .. }         => *span,
        }
    }
}

// ─── Operators ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add, Sub, Mul, Div, FloorDiv, Mod, Pow,
    Eq, NotEq,
    Lt, LtEq, Gt, GtEq,
    In, NotIn,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+", BinOp::Sub => "-", BinOp::Mul => "*",
            BinOp::Div => "/", BinOp::FloorDiv => "//", BinOp::Mod => "%", BinOp::Pow => "**",
            BinOp::Eq => "==", BinOp::NotEq => "!=",
            BinOp::Lt => "<", BinOp::LtEq => "<=", BinOp::Gt => ">", BinOp::GtEq => ">=",
            BinOp::In => "in", BinOp::NotIn => "not in",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Pos,
    Not,
}
