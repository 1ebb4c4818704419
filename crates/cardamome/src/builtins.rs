//! Builtin functions and value methods.
//!
//! Builtins resolve after every template and context name, so a template may
//! shadow any of them. `defined` and `value_of` need the caller's scope and
//! are handled by the evaluator itself.

use crate::eval::{
    Callable, Val, Value, ValueExt, as_float, as_int, compare_values, kwarg, values_equal,
};
use facet_value::{DestructuredRef, VArray, VObject, VString};
use miette::{Result, miette};
use std::cmp::Ordering;
use std::rc::Rc;

type BuiltinFn = fn(Vec<Val>, Vec<(String, Val)>) -> Result<Val>;

const BUILTINS: &[(&str, BuiltinFn)] = &[
    ("range", range),
    ("len", len),
    ("str", str),
    ("int", int),
    ("float", float),
    ("bool", bool),
    ("dict", dict),
    ("list", list),
    ("literal", literal),
    ("enumerate", enumerate),
    ("sorted", sorted),
    ("min", min),
    ("max", max),
    ("abs", abs),
    ("round", round),
    ("gettext", gettext),
];

/// A builtin function value
pub struct Builtin {
    name: &'static str,
    f: BuiltinFn,
}

impl Callable for Builtin {
    fn name(&self) -> &str {
        self.name
    }

    fn call(&self, args: Vec<Val>, kwargs: Vec<(String, Val)>) -> Result<Val> {
        (self.f)(args, kwargs)
    }
}

/// Look up a builtin by name
pub fn lookup(name: &str) -> Option<Val> {
    BUILTINS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|&(name, f)| Val::Func(Rc::new(Builtin { name, f })))
}

pub fn names() -> impl Iterator<Item = &'static str> {
    BUILTINS.iter().map(|(n, _)| *n).chain(["defined", "value_of"])
}

fn arg(args: &[Val], index: usize, fname: &str) -> Result<Val> {
    args.get(index)
        .cloned()
        .ok_or_else(|| miette!("{fname}() missing required argument #{}", index + 1))
}

/// Items of an iterable as plain values: list items, dict keys or string
/// characters.
fn items_of(value: &Val, fname: &str) -> Result<Vec<Value>> {
    let data = value.to_value()?;
    match data.destructure_ref() {
        DestructuredRef::Array(arr) => Ok(arr.iter().cloned().collect()),
        DestructuredRef::Object(obj) => Ok(obj.iter().map(|(k, _)| Value::from(k.as_str())).collect()),
        DestructuredRef::String(s) => Ok(s.as_str().chars().map(|c| Value::from(c.to_string())).collect()),
        _ => Err(miette!("{fname}(): {} is not iterable", value.type_name())),
    }
}

fn list_of(items: impl IntoIterator<Item = Value>) -> Val {
    Val::Data(VArray::from_iter(items).into())
}

fn range(args: Vec<Val>, _kwargs: Vec<(String, Val)>) -> Result<Val> {
    let ints = args
        .iter()
        .map(|a| a.as_data().and_then(as_int).ok_or_else(|| miette!("range() expects integers")))
        .collect::<Result<Vec<i64>>>()?;
    let (start, stop, step) = match ints[..] {
        [stop] => (0, stop, 1),
        [start, stop] => (start, stop, 1),
        [start, stop, step] => (start, stop, step),
        _ => return Err(miette!("range() expects 1 to 3 arguments, got {}", ints.len())),
    };
    if step == 0 {
        return Err(miette!("range() step must not be zero"));
    }
    let mut items = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        items.push(Value::from(i));
        match i.checked_add(step) {
            Some(next) => i = next,
            None => break,
        }
    }
    Ok(list_of(items))
}

fn len(args: Vec<Val>, _kwargs: Vec<(String, Val)>) -> Result<Val> {
    let value = arg(&args, 0, "len")?;
    let data = value.to_value()?;
    let n = match data.destructure_ref() {
        DestructuredRef::String(s) => s.as_str().chars().count(),
        DestructuredRef::Array(arr) => arr.len(),
        DestructuredRef::Object(obj) => obj.len(),
        _ => return Err(miette!("object of type {} has no len()", value.type_name())),
    };
    Ok(Val::Data(Value::from(n)))
}

fn str(args: Vec<Val>, _kwargs: Vec<(String, Val)>) -> Result<Val> {
    match args.first() {
        Some(value) => Ok(Val::from(value.to_text()?)),
        None => Ok(Val::from("")),
    }
}

fn int(args: Vec<Val>, _kwargs: Vec<(String, Val)>) -> Result<Val> {
    let value = arg(&args, 0, "int")?.to_value()?;
    let n = match value.destructure_ref() {
        DestructuredRef::Bool(b) => i64::from(b),
        DestructuredRef::Number(n) => match n.to_i64() {
            Some(i) => i,
            None => n.to_f64().map(|f| f.trunc() as i64).unwrap_or(0),
        },
        DestructuredRef::String(s) => s
            .as_str()
            .trim()
            .parse::<i64>()
            .map_err(|_| miette!("invalid literal for int(): {:?}", s.as_str()))?,
        _ => return Err(miette!("int() can't convert {}", value.type_name())),
    };
    Ok(Val::from(n))
}

fn float(args: Vec<Val>, _kwargs: Vec<(String, Val)>) -> Result<Val> {
    let value = arg(&args, 0, "float")?.to_value()?;
    let f = match value.destructure_ref() {
        DestructuredRef::Bool(b) => f64::from(u8::from(b)),
        DestructuredRef::Number(n) => n.to_f64().unwrap_or(0.0),
        DestructuredRef::String(s) => s
            .as_str()
            .trim()
            .parse::<f64>()
            .map_err(|_| miette!("could not convert string to float: {:?}", s.as_str()))?,
        _ => return Err(miette!("float() can't convert {}", value.type_name())),
    };
    Ok(Val::Data(Value::from(f)))
}

fn bool(args: Vec<Val>, _kwargs: Vec<(String, Val)>) -> Result<Val> {
    match args.first() {
        Some(value) => Ok(Val::from(value.is_truthy()?)),
        None => Ok(Val::from(false)),
    }
}

/// `dict(a=1)`, `dict(other)` or `dict([("a", 1)])`, merged left to right.
fn dict(args: Vec<Val>, kwargs: Vec<(String, Val)>) -> Result<Val> {
    let mut obj = VObject::new();
    if let Some(first) = args.first() {
        let data = first.to_value()?;
        match data.destructure_ref() {
            DestructuredRef::Object(src) => {
                for (k, v) in src.iter() {
                    obj.insert(k.clone(), v.clone());
                }
            }
            DestructuredRef::Array(pairs) => {
                for pair in pairs.iter() {
                    match pair.as_array().map(|p| p.as_slice()) {
                        Some([k, v]) => {
                            obj.insert(VString::from(k.render_to_string().as_str()), v.clone());
                        }
                        _ => return Err(miette!("dict() expects a sequence of pairs")),
                    }
                }
            }
            DestructuredRef::Null => {}
            _ => return Err(miette!("dict() can't convert {}", first.type_name())),
        }
    }
    for (k, v) in kwargs {
        obj.insert(VString::from(k.as_str()), v.to_value()?);
    }
    Ok(Val::Data(obj.into()))
}

fn list(args: Vec<Val>, _kwargs: Vec<(String, Val)>) -> Result<Val> {
    match args.first() {
        Some(value) => Ok(list_of(items_of(value, "list")?)),
        None => Ok(list_of([])),
    }
}

/// Mark a value as safe markup.
fn literal(args: Vec<Val>, _kwargs: Vec<(String, Val)>) -> Result<Val> {
    match arg(&args, 0, "literal")? {
        markup @ Val::Markup(_) => Ok(markup),
        Val::Data(v) if v.is_null() => Ok(Val::none()),
        other => Ok(Val::safe(&other.to_text()?)),
    }
}

fn enumerate(args: Vec<Val>, kwargs: Vec<(String, Val)>) -> Result<Val> {
    let items = items_of(&arg(&args, 0, "enumerate")?, "enumerate")?;
    let start = args
        .get(1)
        .or(kwarg(&kwargs, "start"))
        .and_then(|v| v.as_data().and_then(as_int))
        .unwrap_or(0);
    Ok(list_of(items.into_iter().zip(start..).map(|(item, i)| {
        Value::from(VArray::from_iter([Value::from(i), item]))
    })))
}

fn sorted(args: Vec<Val>, kwargs: Vec<(String, Val)>) -> Result<Val> {
    let mut items = items_of(&arg(&args, 0, "sorted")?, "sorted")?;
    items.sort_by(|a, b| compare_values(a, b).unwrap_or(Ordering::Equal));
    if kwarg(&kwargs, "reverse").map(|r| r.is_truthy()).transpose()? == Some(true) {
        items.reverse();
    }
    Ok(list_of(items))
}

fn extreme(args: Vec<Val>, fname: &str, want: Ordering) -> Result<Val> {
    let items = match &args[..] {
        [single] => items_of(single, fname)?,
        many => many.iter().map(Val::to_value).collect::<Result<Vec<_>>>()?,
    };
    items
        .into_iter()
        .reduce(|best, item| {
            if compare_values(&item, &best) == Some(want) {
                item
            } else {
                best
            }
        })
        .map(Val::Data)
        .ok_or_else(|| miette!("{fname}() arg is an empty sequence"))
}

fn min(args: Vec<Val>, _kwargs: Vec<(String, Val)>) -> Result<Val> {
    extreme(args, "min", Ordering::Less)
}

fn max(args: Vec<Val>, _kwargs: Vec<(String, Val)>) -> Result<Val> {
    extreme(args, "max", Ordering::Greater)
}

fn abs(args: Vec<Val>, _kwargs: Vec<(String, Val)>) -> Result<Val> {
    let value = arg(&args, 0, "abs")?.to_value()?;
    match value.as_number() {
        Some(n) if n.is_integer() => n
            .to_i64()
            .and_then(i64::checked_abs)
            .map(Val::from)
            .ok_or_else(|| miette!("abs() overflow")),
        Some(n) => Ok(Val::Data(Value::from(n.to_f64().unwrap_or(0.0).abs()))),
        None => Err(miette!("bad operand type for abs(): {}", value.type_name())),
    }
}

/// Round half to even, like Python. Without `ndigits` the result is an integer.
fn round(args: Vec<Val>, kwargs: Vec<(String, Val)>) -> Result<Val> {
    let value = arg(&args, 0, "round")?.to_value()?;
    let f = as_float(&value)
        .ok_or_else(|| miette!("round() expects a number, got {}", value.type_name()))?;
    let ndigits = args
        .get(1)
        .or(kwarg(&kwargs, "ndigits"))
        .and_then(|v| v.as_data().and_then(as_int));
    match ndigits {
        None => Ok(Val::from(f.round_ties_even() as i64)),
        Some(n) => {
            let scale = 10f64.powi(i32::try_from(n).unwrap_or(0));
            Ok(Val::Data(Value::from((f * scale).round_ties_even() / scale)))
        }
    }
}

/// Identity translation hook applied to translatable text.
fn gettext(args: Vec<Val>, _kwargs: Vec<(String, Val)>) -> Result<Val> {
    arg(&args, 0, "gettext")
}

// ============================================================================
// Methods
// ============================================================================

const STRING_METHODS: &[&str] = &[
    "upper",
    "lower",
    "strip",
    "lstrip",
    "rstrip",
    "startswith",
    "endswith",
    "replace",
    "split",
    "join",
    "title",
    "capitalize",
    "count",
    "find",
];

const DICT_METHODS: &[&str] = &["items", "keys", "values", "get"];

const LIST_METHODS: &[&str] = &["index", "count"];

pub fn has_method(value: &Value, name: &str) -> bool {
    let table = match value.destructure_ref() {
        DestructuredRef::String(_) => STRING_METHODS,
        DestructuredRef::Object(_) => DICT_METHODS,
        DestructuredRef::Array(_) => LIST_METHODS,
        _ => return false,
    };
    table.contains(&name)
}

/// A method bound to its receiver, e.g. `name.upper`
pub struct Method {
    recv: Value,
    name: String,
}

impl Method {
    pub fn new(recv: Value, name: &str) -> Self {
        Self {
            recv,
            name: name.to_string(),
        }
    }
}

impl Callable for Method {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, args: Vec<Val>, _kwargs: Vec<(String, Val)>) -> Result<Val> {
        let args = args.iter().map(Val::to_value).collect::<Result<Vec<_>>>()?;
        let text_arg = |i: usize| args.get(i).map(|v| v.render_to_string());

        match (self.recv.destructure_ref(), self.name.as_str()) {
            (DestructuredRef::String(s), method) => {
                let s = s.as_str();
                Ok(match method {
                    "upper" => Val::from(s.to_uppercase()),
                    "lower" => Val::from(s.to_lowercase()),
                    "strip" => Val::from(match text_arg(0) {
                        Some(chars) => s.trim_matches(|c: char| chars.contains(c)),
                        None => s.trim(),
                    }),
                    "lstrip" => Val::from(s.trim_start()),
                    "rstrip" => Val::from(s.trim_end()),
                    "startswith" => Val::from(s.starts_with(&text_arg(0).unwrap_or_default())),
                    "endswith" => Val::from(s.ends_with(&text_arg(0).unwrap_or_default())),
                    "replace" => {
                        let (from, to) = (text_arg(0).unwrap_or_default(), text_arg(1).unwrap_or_default());
                        Val::from(s.replace(&from, &to))
                    }
                    "split" => list_of(match text_arg(0) {
                        Some(sep) => s.split(sep.as_str()).map(Value::from).collect::<Vec<_>>(),
                        None => s.split_whitespace().map(Value::from).collect(),
                    }),
                    "join" => {
                        let items = args
                            .first()
                            .and_then(|v| v.as_array())
                            .map(|arr| arr.iter().map(|v| v.render_to_string()).collect::<Vec<_>>())
                            .unwrap_or_default();
                        Val::from(items.join(s))
                    }
                    "title" | "capitalize" => {
                        let words: Vec<String> = s
                            .split(' ')
                            .enumerate()
                            .map(|(i, word)| {
                                let mut chars = word.chars();
                                match chars.next() {
                                    Some(first) if method == "title" || i == 0 => first
                                        .to_uppercase()
                                        .chain(chars.flat_map(char::to_lowercase))
                                        .collect(),
                                    _ => word.to_lowercase(),
                                }
                            })
                            .collect();
                        Val::from(words.join(" "))
                    }
                    "count" => Val::Data(Value::from(s.matches(&text_arg(0).unwrap_or_default()).count())),
                    "find" => Val::from(
                        s.find(&text_arg(0).unwrap_or_default())
                            .map(|byte| s[..byte].chars().count() as i64)
                            .unwrap_or(-1),
                    ),
                    other => return Err(miette!("str has no method {other}")),
                })
            }
            (DestructuredRef::Object(obj), method) => Ok(match method {
                "items" => list_of(obj.iter().map(|(k, v)| {
                    Value::from(VArray::from_iter([Value::from(k.as_str()), v.clone()]))
                })),
                "keys" => list_of(obj.iter().map(|(k, _)| Value::from(k.as_str()))),
                "values" => list_of(obj.iter().map(|(_, v)| v.clone())),
                "get" => {
                    let key = text_arg(0).ok_or_else(|| miette!("get() missing key"))?;
                    Val::Data(
                        obj.get(key.as_str())
                            .cloned()
                            .or_else(|| args.get(1).cloned())
                            .unwrap_or(Value::NULL),
                    )
                }
                other => return Err(miette!("dict has no method {other}")),
            }),
            (DestructuredRef::Array(arr), method) => {
                let needle = args.first().cloned().unwrap_or(Value::NULL);
                Ok(match method {
                    "count" => Val::Data(Value::from(arr.iter().filter(|v| values_equal(v, &needle)).count())),
                    "index" => arr
                        .iter()
                        .position(|v| values_equal(v, &needle))
                        .map(|i| Val::Data(Value::from(i)))
                        .ok_or_else(|| miette!("{} is not in list", needle.render_to_string()))?,
                    other => return Err(miette!("list has no method {other}")),
                })
            }
            (_, other) => Err(miette!("{} has no method {other}", self.recv.type_name())),
        }
    }
}
