//! Expression evaluator
//!
//! Evaluates inline expressions against a [`Scope`]. Plain data is a
//! `facet_value::Value`; the runtime adds rendered markup, callables and
//! template instances on top through [`Val`].

use super::ast::*;
use super::builtins;
use super::error::{
    ArgumentError, RenderError, TemplateSource, TypeError, UndefinedError, UnknownFieldError,
    UnknownFilterError,
};
use super::lazy::{Chunk, Fragment};
use facet_value::{DestructuredRef, VArray, VObject, VSafeString, VString};
use miette::Result;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

/// Re-export facet_value::Value as the template Value type
pub use facet_value::Value;

/// Helper trait to extend Value with template-specific operations
pub trait ValueExt {
    /// Check if the value is truthy (for conditionals)
    fn is_truthy(&self) -> bool;

    /// Get a human-readable type name
    fn type_name(&self) -> &'static str;

    /// Render the value to a string for output
    fn render_to_string(&self) -> String;

    /// Check if this value is marked as "safe" (should not be HTML-escaped)
    fn is_safe(&self) -> bool;
}

impl ValueExt for Value {
    fn is_truthy(&self) -> bool {
        match self.destructure_ref() {
            DestructuredRef::Null => false,
            DestructuredRef::Bool(b) => b,
            DestructuredRef::Number(n) => n.to_f64().is_none_or(|f| f != 0.0),
            DestructuredRef::String(s) => !s.is_empty(),
            DestructuredRef::Bytes(b) => !b.is_empty(),
            DestructuredRef::Array(arr) => !arr.is_empty(),
            DestructuredRef::Object(obj) => !obj.is_empty(),
            DestructuredRef::DateTime(_) | DestructuredRef::QName(_) | DestructuredRef::Uuid(_) => {
                true
            }
        }
    }

    fn type_name(&self) -> &'static str {
        match self.destructure_ref() {
            DestructuredRef::Null => "none",
            DestructuredRef::Bool(_) => "bool",
            DestructuredRef::Number(_) => "number",
            DestructuredRef::String(_) => "string",
            DestructuredRef::Bytes(_) => "bytes",
            DestructuredRef::Array(_) => "list",
            DestructuredRef::Object(_) => "dict",
            DestructuredRef::DateTime(_) => "datetime",
            DestructuredRef::QName(_) => "qname",
            DestructuredRef::Uuid(_) => "uuid",
        }
    }

    fn render_to_string(&self) -> String {
        match self.destructure_ref() {
            DestructuredRef::Null => String::new(),
            DestructuredRef::Bool(b) => if b { "true" } else { "false" }.to_string(),
            DestructuredRef::Number(n) => {
                if let Some(i) = n.to_i64() {
                    i.to_string()
                } else if let Some(f) = n.to_f64() {
                    f.to_string()
                } else {
                    n.to_u64().map(|u| u.to_string()).unwrap_or_default()
                }
            }
            DestructuredRef::String(s) => s.to_string(),
            DestructuredRef::Bytes(b) => format!("<bytes: {} bytes>", b.len()),
            DestructuredRef::Array(arr) => {
                let items: Vec<String> = arr.iter().map(|v| v.render_to_string()).collect();
                format!("[{}]", items.join(", "))
            }
            DestructuredRef::Object(obj) => {
                let items: Vec<String> = obj
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.as_str(), v.render_to_string()))
                    .collect();
                format!("{{{}}}", items.join(", "))
            }
            DestructuredRef::DateTime(dt) => format!("{dt:?}"),
            DestructuredRef::QName(qn) => format!("{qn:?}"),
            DestructuredRef::Uuid(uuid) => format!("{uuid:?}"),
        }
    }

    fn is_safe(&self) -> bool {
        self.as_string().is_some_and(|s| s.is_safe())
    }
}

/// Integer view of a number (whole floats included).
pub fn as_int(value: &Value) -> Option<i64> {
    value.as_number().and_then(|n| n.to_i64())
}

pub fn as_float(value: &Value) -> Option<f64> {
    value.as_number().and_then(|n| n.to_f64())
}

/// A string value marked safe: it is emitted without escaping.
pub fn safe_string(s: &str) -> Value {
    VSafeString::new(s).into_value()
}

/// Escape `&`, `<` and `>` for text content.
pub fn escape_text(s: &str) -> String {
    quick_xml::escape::partial_escape(s).into_owned()
}

/// Escape an attribute value, which is always written in double quotes.
pub fn escape_attr(s: &str) -> String {
    escape_text(s).replace('"', "&quot;")
}

// ============================================================================
// Runtime values
// ============================================================================

/// Something callable from an expression: a builtin, a template function,
/// a closure created by a nested definition or a call block.
pub trait Callable {
    fn name(&self) -> &str;

    fn call(&self, args: Vec<Val>, kwargs: Vec<(String, Val)>) -> Result<Val>;

    /// Whether this is a function defined by a template (`py:def`, a block
    /// or `__main__`). Only those take part in inheritance.
    fn is_template_function(&self) -> bool {
        false
    }
}

/// Something with attributes: a template instance or an import alias.
pub trait Namespace {
    fn member(&self, name: &str) -> Option<Val>;

    fn member_names(&self) -> Vec<String>;

    /// Short description used in messages and when the object is printed.
    fn describe(&self) -> String;
}

/// Name resolution for the evaluator.
pub trait Scope {
    fn lookup(&self, name: &str) -> Option<Val>;

    /// Every visible name (for error messages)
    fn available(&self) -> Vec<String>;
}

/// A value as the runtime sees it.
#[derive(Clone)]
pub enum Val {
    /// Plain data, possibly a safe string
    Data(Value),
    /// Rendered (or deferred) output; never escaped again
    Markup(Fragment),
    Func(Rc<dyn Callable>),
    Object(Rc<dyn Namespace>),
}

impl Val {
    pub fn none() -> Self {
        Val::Data(Value::NULL)
    }

    pub fn safe(s: &str) -> Self {
        Val::Data(safe_string(s))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Val::Data(v) if v.is_null())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Val::Data(v) => v.type_name(),
            Val::Markup(_) => "markup",
            Val::Func(_) => "function",
            Val::Object(_) => "template",
        }
    }

    pub fn as_data(&self) -> Option<&Value> {
        match self {
            Val::Data(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> Result<bool> {
        Ok(match self {
            Val::Data(v) => v.is_truthy(),
            Val::Markup(frag) => !frag.render()?.is_empty(),
            Val::Func(_) | Val::Object(_) => true,
        })
    }

    /// The value as unescaped text. Markup is flattened.
    pub fn to_text(&self) -> Result<String> {
        Ok(match self {
            Val::Data(v) => v.render_to_string(),
            Val::Markup(frag) => frag.render()?,
            Val::Func(f) => format!("<function {}>", f.name()),
            Val::Object(ns) => ns.describe(),
        })
    }

    /// The value as plain data. Markup becomes a safe string.
    pub fn to_value(&self) -> Result<Value> {
        Ok(match self {
            Val::Data(v) => v.clone(),
            Val::Markup(frag) => safe_string(&frag.render()?),
            Val::Func(_) | Val::Object(_) => Value::from(self.to_text()?.as_str()),
        })
    }

    /// The chunk appended to the output for this value. `escape` is ignored
    /// for safe strings and markup.
    pub fn to_chunk(&self, escape: bool) -> Option<Chunk> {
        match self {
            Val::Data(v) if v.is_null() => None,
            Val::Data(v) if v.is_safe() || !escape => Some(Chunk::text(v.render_to_string())),
            Val::Data(v) => Some(Chunk::text(escape_text(&v.render_to_string()))),
            Val::Markup(frag) => Some(Chunk::Fragment(frag.clone())),
            Val::Func(f) => Some(Chunk::text(escape_text(&format!("<function {}>", f.name())))),
            Val::Object(ns) => Some(Chunk::text(escape_text(&ns.describe()))),
        }
    }

    /// Identity in the sense of `is`: `None`, `True` and `False` are
    /// singletons, functions and templates compare by reference.
    pub fn is_same(&self, other: &Val) -> bool {
        match (self, other) {
            (Val::Func(a), Val::Func(b)) => Rc::ptr_eq(a, b),
            (Val::Object(a), Val::Object(b)) => Rc::ptr_eq(a, b),
            (Val::Data(a), Val::Data(b)) => match (a.destructure_ref(), b.destructure_ref()) {
                (DestructuredRef::Null, DestructuredRef::Null) => true,
                (DestructuredRef::Bool(x), DestructuredRef::Bool(y)) => x == y,
                _ => false,
            },
            _ => false,
        }
    }

    pub fn equals(&self, other: &Val) -> Result<bool> {
        match (self, other) {
            (Val::Func(a), Val::Func(b)) => Ok(Rc::ptr_eq(a, b)),
            (Val::Object(a), Val::Object(b)) => Ok(Rc::ptr_eq(a, b)),
            (Val::Func(_) | Val::Object(_), _) | (_, Val::Func(_) | Val::Object(_)) => Ok(false),
            _ => Ok(values_equal(&self.to_value()?, &other.to_value()?)),
        }
    }
}

impl fmt::Debug for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Data(v) => write!(f, "{v:?}"),
            Val::Markup(frag) => write!(f, "Markup({frag:?})"),
            Val::Func(func) => write!(f, "<function {}>", func.name()),
            Val::Object(ns) => write!(f, "{}", ns.describe()),
        }
    }
}

impl From<Value> for Val {
    fn from(value: Value) -> Self {
        Val::Data(value)
    }
}

impl From<&str> for Val {
    fn from(s: &str) -> Self {
        Val::Data(Value::from(s))
    }
}

impl From<String> for Val {
    fn from(s: String) -> Self {
        Val::Data(Value::from(s.as_str()))
    }
}

impl From<i64> for Val {
    fn from(n: i64) -> Self {
        Val::Data(Value::from(n))
    }
}

impl From<bool> for Val {
    fn from(b: bool) -> Self {
        Val::Data(Value::from(b))
    }
}

impl From<Fragment> for Val {
    fn from(frag: Fragment) -> Self {
        Val::Markup(frag)
    }
}

/// Find a keyword argument by name.
pub fn kwarg<'a>(kwargs: &'a [(String, Val)], name: &str) -> Option<&'a Val> {
    kwargs.iter().find(|(k, _)| k == name).map(|(_, v)| v)
}

// ============================================================================
// Evaluator
// ============================================================================

/// Expression evaluator
pub struct Evaluator<'a> {
    scope: &'a dyn Scope,
    source: &'a TemplateSource,
}

impl<'a> Evaluator<'a> {
    pub fn new(scope: &'a dyn Scope, source: &'a TemplateSource) -> Self {
        Self { scope, source }
    }

    /// Evaluate an expression
    pub fn eval(&self, expr: &Expr) -> Result<Val> {
        match expr {
            Expr::Const(constant, _) => Ok(Val::Data(const_value(constant))),
            Expr::Name(ident) => self.eval_name(ident),
            Expr::Tuple(items, _) | Expr::List(items, _) => {
                let mut elements = Vec::with_capacity(items.len());
                for item in items {
                    elements.push(self.eval_value(item)?);
                }
                Ok(Val::Data(VArray::from_iter(elements).into()))
            }
            Expr::Dict(entries, _) => {
                let mut obj = VObject::new();
                for (k, v) in entries {
                    let key = self.eval(k)?.to_text()?;
                    obj.insert(VString::from(key.as_str()), self.eval_value(v)?);
                }
                Ok(Val::Data(obj.into()))
            }
            Expr::Attribute { value, attr, .. } => self.eval_attribute(value, attr),
            Expr::Subscript { value, index, .. } => self.eval_subscript(value, index),
            Expr::Call { func, args, span } => self.eval_call(func, args, *span),
            Expr::Filter {
                value, name, args, ..
            } => self.eval_filter(value, name, args),
            Expr::BinOp {
                left,
                op,
                right,
                span,
            } => self.eval_binop(left, *op, right, *span),
            Expr::Unary { op, operand, span } => self.eval_unary(*op, operand, *span),
            Expr::BoolOp { op, values, .. } => {
                let mut result = Val::none();
                for value in values {
                    result = self.eval(value)?;
                    let decided = match op {
                        BoolOp::And => !result.is_truthy()?,
                        BoolOp::Or => result.is_truthy()?,
                    };
                    if decided {
                        break;
                    }
                }
                Ok(result)
            }
            Expr::Compare { left, rest, .. } => {
                let mut lhs = self.eval(left)?;
                for (op, right) in rest {
                    let rhs = self.eval(right)?;
                    if !compare(*op, &lhs, &rhs)? {
                        return Ok(Val::from(false));
                    }
                    lhs = rhs;
                }
                Ok(Val::from(true))
            }
            Expr::IfExp {
                test, body, orelse, ..
            } => {
                if self.eval(test)?.is_truthy()? {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
        }
    }

    /// Evaluate to plain data
    pub fn eval_value(&self, expr: &Expr) -> Result<Value> {
        self.eval(expr)?.to_value()
    }

    /// Evaluate an iterable for a loop.
    ///
    /// Lists yield their items, dicts their keys and strings their
    /// characters.
    pub fn iterate(&self, expr: &Expr) -> Result<Vec<Val>> {
        let value = self.eval(expr)?;
        let data = match &value {
            Val::Data(v) => v.clone(),
            Val::Markup(_) => value.to_value()?,
            _ => Value::NULL,
        };
        match data.destructure_ref() {
            DestructuredRef::Array(arr) => Ok(arr.iter().cloned().map(Val::Data).collect()),
            DestructuredRef::Object(obj) => Ok(obj
                .iter()
                .map(|(k, _)| Val::from(k.as_str()))
                .collect()),
            DestructuredRef::String(s) => Ok(s
                .as_str()
                .chars()
                .map(|c| Val::from(c.to_string()))
                .collect()),
            _ => Err(TypeError {
                expected: "iterable".to_string(),
                found: value.type_name().to_string(),
                context: "loop".to_string(),
                span: expr.span(),
                src: self.source.named_source(),
            })?,
        }
    }

    /// Bind a value to a loop or assignment target.
    pub fn bind(&self, target: &Target, value: Val) -> Result<Vec<(String, Val)>> {
        match target {
            Target::Name(ident) => Ok(vec![(ident.name.clone(), value)]),
            Target::Unpack { names, span } => {
                let items: Vec<Value> = match value.as_data().map(|v| v.destructure_ref()) {
                    Some(DestructuredRef::Array(arr)) => arr.iter().cloned().collect(),
                    _ => Vec::new(),
                };
                if items.len() != names.len() {
                    return Err(TypeError {
                        expected: format!("sequence of {} items", names.len()),
                        found: if value.as_data().is_some_and(|v| v.is_array()) {
                            format!("{} items", items.len())
                        } else {
                            value.type_name().to_string()
                        },
                        context: "unpacking".to_string(),
                        span: *span,
                        src: self.source.named_source(),
                    }
                    .into());
                }
                Ok(names
                    .iter()
                    .zip(items)
                    .map(|(ident, v)| (ident.name.clone(), Val::Data(v)))
                    .collect())
            }
        }
    }

    fn eval_name(&self, ident: &Ident) -> Result<Val> {
        if let Some(value) = self.scope.lookup(&ident.name) {
            return Ok(value);
        }
        if let Some(builtin) = builtins::lookup(&ident.name) {
            return Ok(builtin);
        }
        Err(UndefinedError {
            name: ident.name.clone(),
            available: self.scope.available(),
            span: ident.span,
            src: self.source.named_source(),
        })?
    }

    fn eval_attribute(&self, value: &Expr, attr: &Ident) -> Result<Val> {
        let base = self.eval(value)?;
        let name = attr.name.as_str();

        let data = match &base {
            Val::Object(ns) => {
                return ns.member(name).ok_or_else(|| {
                    UnknownFieldError {
                        base_type: ns.describe(),
                        field: name.to_string(),
                        known_fields: ns.member_names(),
                        span: attr.span,
                        src: self.source.named_source(),
                    }
                    .into()
                });
            }
            Val::Func(_) => Value::NULL,
            _ => base.to_value()?,
        };

        if let Some(obj) = data.as_object()
            && let Some(value) = obj.get(name)
        {
            return Ok(Val::Data(value.clone()));
        }
        if builtins::has_method(&data, name) {
            return Ok(Val::Func(Rc::new(builtins::Method::new(data, name))));
        }

        let known_fields = match data.as_object() {
            Some(obj) => obj.iter().map(|(k, _)| k.to_string()).collect(),
            None => Vec::new(),
        };
        Err(UnknownFieldError {
            base_type: base.type_name().to_string(),
            field: name.to_string(),
            known_fields,
            span: attr.span,
            src: self.source.named_source(),
        })?
    }

    fn eval_subscript(&self, value: &Expr, index: &Expr) -> Result<Val> {
        let base = self.eval(value)?;
        let key = self.eval_value(index)?;

        if let Val::Object(ns) = &base {
            let name = key.render_to_string();
            return ns.member(&name).ok_or_else(|| {
                UnknownFieldError {
                    base_type: ns.describe(),
                    field: name,
                    known_fields: ns.member_names(),
                    span: index.span(),
                    src: self.source.named_source(),
                }
                .into()
            });
        }

        let data = base.to_value()?;
        let out_of_range = |len: usize, i: i64, context: &str| TypeError {
            expected: format!("index < {len}"),
            found: format!("index {i}"),
            context: context.to_string(),
            span: index.span(),
            src: self.source.named_source(),
        };
        // Negative positions count from the end.
        let position = |i: i64, len: usize| {
            let pos = if i < 0 { len as i64 + i } else { i };
            usize::try_from(pos).ok()
        };

        match (data.destructure_ref(), key.destructure_ref()) {
            (DestructuredRef::Array(arr), DestructuredRef::Number(n)) => {
                let i = n.to_i64().unwrap_or(0);
                position(i, arr.len())
                    .and_then(|p| arr.get(p))
                    .cloned()
                    .map(Val::Data)
                    .ok_or_else(|| out_of_range(arr.len(), i, "list index").into())
            }
            (DestructuredRef::Object(obj), _) => {
                let name = key.render_to_string();
                obj.get(name.as_str()).cloned().map(Val::Data).ok_or_else(|| {
                    UnknownFieldError {
                        base_type: "dict".to_string(),
                        field: name,
                        known_fields: obj.iter().map(|(k, _)| k.to_string()).collect(),
                        span: index.span(),
                        src: self.source.named_source(),
                    }
                    .into()
                })
            }
            (DestructuredRef::String(s), DestructuredRef::Number(n)) => {
                let i = n.to_i64().unwrap_or(0);
                let len = s.as_str().chars().count();
                position(i, len)
                    .and_then(|p| s.as_str().chars().nth(p))
                    .map(|c| Val::from(c.to_string()))
                    .ok_or_else(|| out_of_range(len, i, "string index").into())
            }
            _ => Err(TypeError {
                expected: "list, dict, or string".to_string(),
                found: base.type_name().to_string(),
                context: "subscript".to_string(),
                span: value.span(),
                src: self.source.named_source(),
            })?,
        }
    }

    fn eval_filter(&self, value: &Expr, name: &Ident, args: &Arguments) -> Result<Val> {
        let value = self.eval(value)?;
        if name.name == "safe" && matches!(value, Val::Markup(_)) {
            return Ok(value);
        }
        let value = value.to_value()?;

        let mut positional = Vec::with_capacity(args.positional.len());
        for a in &args.positional {
            positional.push(self.eval_value(a)?);
        }
        let mut keywords = Vec::with_capacity(args.keywords.len());
        for (ident, expr) in &args.keywords {
            keywords.push((ident.name.clone(), self.eval_value(expr)?));
        }

        apply_filter(&name.name, value, &positional, &keywords, name.span, self.source).map(Val::Data)
    }

    fn eval_binop(&self, left: &Expr, op: Operator, right: &Expr, span: Span) -> Result<Val> {
        let left = self.eval(left)?;
        let right = self.eval(right)?;

        // Markup concatenation keeps the result safe.
        if op == Operator::Add && (matches!(left, Val::Markup(_)) || matches!(right, Val::Markup(_))) {
            let chunks = [left.to_chunk(true), right.to_chunk(true)];
            return Ok(Val::Markup(Fragment::new(chunks.into_iter().flatten().collect())));
        }

        let left = left.to_value()?;
        let right = right.to_value()?;

        let result = match op {
            Operator::Div | Operator::FloorDiv | Operator::Mod if is_zero(&right) => {
                if left.is_number() {
                    return Err(ArgumentError {
                        message: "division by zero".to_string(),
                        span,
                        src: self.source.named_source(),
                    })?;
                }
                binary_mod(&left, &right)
            }
            Operator::Add => binary_add(&left, &right),
            Operator::Sub => binary_sub(&left, &right),
            Operator::Mult => binary_mul(&left, &right),
            Operator::Div => binary_div(&left, &right),
            Operator::FloorDiv => binary_floor_div(&left, &right),
            Operator::Mod => binary_mod(&left, &right),
            Operator::Pow => binary_pow(&left, &right),
        };

        result.map(Val::Data).ok_or_else(|| {
            TypeError {
                expected: format!("operands compatible with {}", op.symbol()),
                found: format!("{} and {}", left.type_name(), right.type_name()),
                context: "binary operation".to_string(),
                span,
                src: self.source.named_source(),
            }
            .into()
        })
    }

    fn eval_unary(&self, op: UnaryOp, operand: &Expr, span: Span) -> Result<Val> {
        let value = self.eval(operand)?;
        if op == UnaryOp::Not {
            return Ok(Val::from(!value.is_truthy()?));
        }

        let value = value.to_value()?;
        let result = match (op, value.destructure_ref()) {
            (UnaryOp::Neg, DestructuredRef::Number(n)) => match (n.is_integer(), n.to_i64()) {
                (true, Some(i)) => i.checked_neg().map(Value::from),
                _ => n.to_f64().map(|f| Value::from(-f)),
            },
            (UnaryOp::Pos, DestructuredRef::Number(_)) => Some(value.clone()),
            _ => None,
        };
        result.map(Val::Data).ok_or_else(|| {
            TypeError {
                expected: "number".to_string(),
                found: value.type_name().to_string(),
                context: "unary operator".to_string(),
                span,
                src: self.source.named_source(),
            }
            .into()
        })
    }

    fn eval_call(&self, func: &Expr, args: &Arguments, span: Span) -> Result<Val> {
        // Scope-aware builtins, unless shadowed
        if let Expr::Name(ident) = func
            && self.scope.lookup(&ident.name).is_none()
        {
            match ident.name.as_str() {
                "defined" => {
                    let name = self.name_argument(args, span)?;
                    return Ok(Val::from(self.scope.lookup(&name).is_some()));
                }
                "value_of" => {
                    let name = self.name_argument(args, span)?;
                    return match self.scope.lookup(&name) {
                        Some(v) => Ok(v),
                        None => match args.positional.get(1) {
                            Some(default) => self.eval(default),
                            None => Ok(Val::none()),
                        },
                    };
                }
                _ => {}
            }
        }

        let callee = self.eval(func)?;

        let mut positional = Vec::with_capacity(args.positional.len());
        for a in &args.positional {
            positional.push(self.eval(a)?);
        }
        let mut keywords = Vec::with_capacity(args.keywords.len());
        for (ident, expr) in &args.keywords {
            keywords.push((ident.name.clone(), self.eval(expr)?));
        }

        match callee {
            Val::Func(f) => f.call(positional, keywords).map_err(|err| self.call_error(err, span)),
            other => Err(TypeError {
                expected: "callable".to_string(),
                found: other.type_name().to_string(),
                context: "call".to_string(),
                span: func.span(),
                src: self.source.named_source(),
            })?,
        }
    }

    fn name_argument(&self, args: &Arguments, span: Span) -> Result<String> {
        match args.positional.first() {
            Some(arg) => self.eval(arg)?.to_text(),
            None => Err(ArgumentError {
                message: "expected a variable name".to_string(),
                span,
                src: self.source.named_source(),
            })?,
        }
    }

    /// Give a location to errors raised inside callables that have none.
    fn call_error(&self, err: miette::Report, span: Span) -> miette::Report {
        if err.labels().is_some() || err.downcast_ref::<RenderError>().is_some() {
            return err;
        }
        ArgumentError {
            message: err.to_string(),
            span,
            src: self.source.named_source(),
        }
        .into()
    }
}

fn const_value(constant: &Const) -> Value {
    match constant {
        Const::None => Value::NULL,
        Const::Bool(b) => Value::from(*b),
        Const::Int(i) => Value::from(*i),
        Const::Float(f) => Value::from(*f),
        Const::Str(s) => Value::from(s.as_str()),
    }
}

/// One link of a comparison chain. Values of unrelated types are unordered,
/// so `<` and friends are false for them.
fn compare(op: CmpOp, left: &Val, right: &Val) -> Result<bool> {
    let ordering = || -> Result<Option<Ordering>> {
        Ok(compare_values(&left.to_value()?, &right.to_value()?))
    };
    Ok(match op {
        CmpOp::Eq => left.equals(right)?,
        CmpOp::NotEq => !left.equals(right)?,
        CmpOp::Is => left.is_same(right),
        CmpOp::IsNot => !left.is_same(right),
        CmpOp::Lt => ordering()?.is_some_and(Ordering::is_lt),
        CmpOp::LtE => ordering()?.is_some_and(Ordering::is_le),
        CmpOp::Gt => ordering()?.is_some_and(Ordering::is_gt),
        CmpOp::GtE => ordering()?.is_some_and(Ordering::is_ge),
        CmpOp::In => value_in(&left.to_value()?, &right.to_value()?),
        CmpOp::NotIn => !value_in(&left.to_value()?, &right.to_value()?),
    })
}

// === Binary operation helpers ===

/// Both operands as integers, when neither is a fractional float.
fn int_pair(left: &Value, right: &Value) -> Option<(i64, i64)> {
    let (a, b) = (left.as_number()?, right.as_number()?);
    if a.is_float() || b.is_float() {
        return None;
    }
    Some((a.to_i64()?, b.to_i64()?))
}

fn float_pair(left: &Value, right: &Value) -> Option<(f64, f64)> {
    Some((as_float(left)?, as_float(right)?))
}

fn is_zero(value: &Value) -> bool {
    as_float(value).is_some_and(|f| f == 0.0)
}

fn binary_add(left: &Value, right: &Value) -> Option<Value> {
    if let Some((a, b)) = int_pair(left, right) {
        return a.checked_add(b).map(Value::from);
    }
    if let Some((a, b)) = float_pair(left, right) {
        return Some(Value::from(a + b));
    }
    match (left.destructure_ref(), right.destructure_ref()) {
        (DestructuredRef::String(a), DestructuredRef::String(b)) => {
            Some(Value::from(format!("{}{}", a.as_str(), b.as_str()).as_str()))
        }
        (DestructuredRef::Array(a), DestructuredRef::Array(b)) => {
            Some(VArray::from_iter(a.iter().chain(b.iter()).cloned()).into())
        }
        _ => None,
    }
}

fn binary_sub(left: &Value, right: &Value) -> Option<Value> {
    if let Some((a, b)) = int_pair(left, right) {
        return a.checked_sub(b).map(Value::from);
    }
    float_pair(left, right).map(|(a, b)| Value::from(a - b))
}

fn binary_mul(left: &Value, right: &Value) -> Option<Value> {
    if let Some((a, b)) = int_pair(left, right) {
        return a.checked_mul(b).map(Value::from);
    }
    if let Some((a, b)) = float_pair(left, right) {
        return Some(Value::from(a * b));
    }
    match (left.destructure_ref(), right.destructure_ref()) {
        (DestructuredRef::String(s), DestructuredRef::Number(n))
        | (DestructuredRef::Number(n), DestructuredRef::String(s)) => {
            let count = usize::try_from(n.to_i64()?).unwrap_or(0);
            Some(Value::from(s.as_str().repeat(count).as_str()))
        }
        _ => None,
    }
}

/// True division: always a float.
fn binary_div(left: &Value, right: &Value) -> Option<Value> {
    float_pair(left, right).map(|(a, b)| Value::from(a / b))
}

fn binary_floor_div(left: &Value, right: &Value) -> Option<Value> {
    if let Some((a, b)) = int_pair(left, right) {
        let q = a.checked_div(b)?;
        let floored = if a.checked_rem(b)? != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q };
        return Some(Value::from(floored));
    }
    float_pair(left, right).map(|(a, b)| Value::from((a / b).floor()))
}

fn binary_mod(left: &Value, right: &Value) -> Option<Value> {
    if let Some(fmt) = left.as_string() {
        return Some(Value::from(percent_format(fmt.as_str(), right).as_str()));
    }
    if let Some((a, b)) = int_pair(left, right) {
        let r = a.checked_rem(b)?;
        let r = if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r };
        return Some(Value::from(r));
    }
    float_pair(left, right).map(|(a, b)| {
        let r = a % b;
        Value::from(if r != 0.0 && ((r < 0.0) != (b < 0.0)) { r + b } else { r })
    })
}

fn binary_pow(left: &Value, right: &Value) -> Option<Value> {
    if let Some((a, b)) = int_pair(left, right) {
        if let Ok(exp) = u32::try_from(b) {
            return a.checked_pow(exp).map(Value::from);
        }
    }
    float_pair(left, right).map(|(a, b)| Value::from(a.powf(b)))
}

/// printf-style `"%s of %d" % (a, b)`, supporting `%s`, `%d`, `%i`, `%r`,
/// `%f` (with optional precision) and `%%`.
fn percent_format(fmt: &str, args: &Value) -> String {
    let args: Vec<Value> = match args.as_array() {
        Some(arr) => arr.iter().cloned().collect(),
        None => vec![args.clone()],
    };
    let mut args = args.into_iter();
    let mut out = String::with_capacity(fmt.len());
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut precision = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut digits = String::new();
            while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                digits.push(*d);
                chars.next();
            }
            precision = digits.parse::<usize>().ok();
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('s') => out.push_str(&args.next().map(|a| a.render_to_string()).unwrap_or_default()),
            Some('r') => out.push_str(&args.next().map(|a| format!("{a:?}")).unwrap_or_default()),
            Some('d' | 'i') => {
                let arg = args.next().unwrap_or(Value::NULL);
                let n = as_float(&arg).map(|f| f.trunc() as i64).unwrap_or(0);
                out.push_str(&n.to_string());
            }
            Some('f') => {
                let arg = args.next().unwrap_or(Value::NULL);
                let f = as_float(&arg).unwrap_or(0.0);
                out.push_str(&format!("{:.*}", precision.unwrap_or(6), f));
            }
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    out
}

pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_string(), b.as_string()) {
        (Some(x), Some(y)) => x.as_str() == y.as_str(),
        _ => a == b,
    }
}

pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a.as_string(), b.as_string()) {
        (Some(x), Some(y)) => Some(x.as_str().cmp(y.as_str())),
        _ => a.partial_cmp(b),
    }
}

fn value_in(needle: &Value, haystack: &Value) -> bool {
    match haystack.destructure_ref() {
        DestructuredRef::Array(arr) => arr.iter().any(|v| values_equal(needle, v)),
        DestructuredRef::Object(obj) => needle
            .as_string()
            .is_some_and(|key| obj.contains_key(key.as_str())),
        DestructuredRef::String(s) => needle
            .as_string()
            .is_some_and(|sub| s.as_str().contains(sub.as_str())),
        _ => false,
    }
}

const KNOWN_FILTERS: &[&str] = &[
    "upper",
    "lower",
    "capitalize",
    "title",
    "trim",
    "length",
    "first",
    "last",
    "reverse",
    "sort",
    "join",
    "split",
    "default",
    "escape",
    "safe",
];

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
    }
}

/// Apply a built-in filter
fn apply_filter(
    name: &str,
    value: Value,
    args: &[Value],
    kwargs: &[(String, Value)],
    span: Span,
    source: &TemplateSource,
) -> Result<Value> {
    let get_kwarg =
        |key: &str| -> Option<&Value> { kwargs.iter().find(|(k, _)| k == key).map(|(_, v)| v) };
    let text = || value.render_to_string();

    Ok(match name {
        "upper" => Value::from(text().to_uppercase().as_str()),
        "lower" => Value::from(text().to_lowercase().as_str()),
        "capitalize" => Value::from(capitalize(&text()).as_str()),
        "title" => {
            let words: Vec<String> = text().split_whitespace().map(capitalize).collect();
            Value::from(words.join(" ").as_str())
        }
        "trim" => Value::from(text().trim()),
        "length" => Value::from(match value.destructure_ref() {
            DestructuredRef::String(s) => s.as_str().chars().count(),
            DestructuredRef::Array(arr) => arr.len(),
            DestructuredRef::Object(obj) => obj.len(),
            _ => 0,
        }),
        "first" | "last" => {
            let items: Vec<Value> = match value.destructure_ref() {
                DestructuredRef::Array(arr) => arr.iter().cloned().collect(),
                DestructuredRef::String(s) => s.as_str().chars().map(|c| Value::from(c.to_string())).collect(),
                _ => Vec::new(),
            };
            let picked = if name == "first" { items.first() } else { items.last() };
            picked.cloned().unwrap_or(Value::NULL)
        }
        "reverse" => match value.destructure_ref() {
            DestructuredRef::Array(arr) => VArray::from_iter(arr.iter().rev().cloned()).into(),
            DestructuredRef::String(s) => {
                Value::from(s.as_str().chars().rev().collect::<String>().as_str())
            }
            _ => value,
        },
        "sort" => match value.destructure_ref() {
            DestructuredRef::Array(arr) => {
                let mut items: Vec<Value> = arr.iter().cloned().collect();
                let attribute = get_kwarg("attribute").and_then(|v| v.as_string()).map(|s| s.to_string());
                let key = |v: &Value| match &attribute {
                    Some(attr) => v.as_object().and_then(|o| o.get(attr.as_str())).cloned().unwrap_or(Value::NULL),
                    None => v.clone(),
                };
                items.sort_by(|a, b| compare_values(&key(a), &key(b)).unwrap_or(Ordering::Equal));
                if get_kwarg("reverse").is_some_and(|r| r.is_truthy()) {
                    items.reverse();
                }
                VArray::from_iter(items).into()
            }
            _ => value,
        },
        "join" => {
            let sep = args.first().map(|v| v.render_to_string()).unwrap_or_default();
            match value.destructure_ref() {
                DestructuredRef::Array(arr) => {
                    let strings: Vec<String> = arr.iter().map(|v| v.render_to_string()).collect();
                    Value::from(strings.join(&sep).as_str())
                }
                _ => value,
            }
        }
        "split" => {
            let s = text();
            let parts: Vec<Value> = match get_kwarg("pat").or(args.first()) {
                Some(pat) => s.split(pat.render_to_string().as_str()).map(Value::from).collect(),
                None => s.split_whitespace().map(Value::from).collect(),
            };
            VArray::from_iter(parts).into()
        }
        "default" => {
            let default_val = get_kwarg("value")
                .or(args.first())
                .cloned()
                .unwrap_or(Value::NULL);
            let empty = value.is_null() || value.as_string().is_some_and(|s| s.is_empty());
            if empty { default_val } else { value }
        }
        "escape" => {
            if value.is_safe() {
                value
            } else {
                safe_string(&escape_attr(&text()))
            }
        }
        "safe" => safe_string(&text()),
        _ => {
            return Err(UnknownFilterError {
                name: name.to_string(),
                known_filters: KNOWN_FILTERS.iter().map(|s| s.to_string()).collect(),
                span,
                src: source.named_source(),
            })?;
        }
    })
}
