//! Syntax tree for template expressions and embedded code
//!
//! The node set follows Python's expression grammar: chained comparisons,
//! n-ary boolean operators, conditional expressions and tuples. The one
//! addition is `value | filter(args)`. Every node records a [`Span`] into
//! the text it was parsed from, so evaluation errors can point back at it.

use miette::SourceSpan;

use crate::error::TemplateSource;

pub type Span = SourceSpan;

pub fn span(offset: usize, len: usize) -> Span {
    SourceSpan::new(offset.into(), len)
}

/// The span covering both `first` and `last`.
pub fn join(first: Span, last: Span) -> Span {
    let start = first.offset();
    span(start, (last.offset() + last.len()).saturating_sub(start))
}

/// A compiled expression together with its text, kept for diagnostics.
#[derive(Debug, Clone)]
pub struct Code {
    pub expr: Expr,
    pub source: TemplateSource,
}

impl Code {
    pub fn text(&self) -> &str {
        self.source.text()
    }
}

#[derive(Debug, Clone)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

/// Left-hand side of an assignment or loop: `x` or `k, v`.
#[derive(Debug, Clone)]
pub enum Target {
    Name(Ident),
    Unpack { names: Vec<Ident>, span: Span },
}

impl Target {
    pub fn span(&self) -> Span {
        match self {
            Target::Name(ident) => ident.span,
            Target::Unpack { span, .. } => *span,
        }
    }

    pub fn names(&self) -> Vec<&str> {
        match self {
            Target::Name(ident) => vec![ident.name.as_str()],
            Target::Unpack { names, .. } => names.iter().map(|n| n.name.as_str()).collect(),
        }
    }
}

/// `target in iter`
#[derive(Debug, Clone)]
pub struct ForHead {
    pub target: Target,
    pub iter: Expr,
}

/// One `target = value` of a `py:with`.
#[derive(Debug, Clone)]
pub struct Binding {
    pub target: Target,
    pub value: Expr,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: Ident,
    pub default: Option<Expr>,
}

/// `name(params)` in a function definition.
#[derive(Debug, Clone)]
pub struct Signature {
    pub name: Ident,
    pub params: Vec<Param>,
}

#[derive(Debug, Clone)]
pub enum Statement {
    Assign { target: Target, value: Expr, span: Span },
    Expr(Expr),
}

/// Literal constants.
#[derive(Debug, Clone, PartialEq)]
pub enum Const {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// Arithmetic operators, named after Python's `ast` module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Sub,
    Mult,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mult => "*",
            Operator::Div => "/",
            Operator::FloorDiv => "//",
            Operator::Mod => "%",
            Operator::Pow => "**",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    In,
    NotIn,
    Is,
    IsNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
}

/// Positional and keyword arguments of a call or filter.
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    pub positional: Vec<Expr>,
    pub keywords: Vec<(Ident, Expr)>,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Const(Const, Span),
    Name(Ident),
    Tuple(Vec<Expr>, Span),
    List(Vec<Expr>, Span),
    Dict(Vec<(Expr, Expr)>, Span),
    Attribute {
        value: Box<Expr>,
        attr: Ident,
        span: Span,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
        span: Span,
    },
    Call {
        func: Box<Expr>,
        args: Arguments,
        span: Span,
    },
    /// `value | name(args)`
    Filter {
        value: Box<Expr>,
        name: Ident,
        args: Arguments,
        span: Span,
    },
    BinOp {
        left: Box<Expr>,
        op: Operator,
        right: Box<Expr>,
        span: Span,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },
    /// `a and b and c`: operands are evaluated left to right, stopping at
    /// the first that decides the result.
    BoolOp {
        op: BoolOp,
        values: Vec<Expr>,
        span: Span,
    },
    /// `a < b <= c` holds when every adjacent pair does; each operand is
    /// evaluated at most once.
    Compare {
        left: Box<Expr>,
        rest: Vec<(CmpOp, Expr)>,
        span: Span,
    },
    /// `body if test else orelse`
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Name(ident) => ident.span,
            Expr::Const(_, span)
            | Expr::Tuple(_, span)
            | Expr::List(_, span)
            | Expr::Dict(_, span)
            | Expr::Attribute { span, .. }
            | Expr::Subscript { span, .. }
            | Expr::Call { span, .. }
            | Expr::Filter { span, .. }
            | Expr::BinOp { span, .. }
            | Expr::Unary { span, .. }
            | Expr::BoolOp { span, .. }
            | Expr::Compare { span, .. }
            | Expr::IfExp { span, .. } => *span,
        }
    }
}
