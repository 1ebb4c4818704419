//! Template execution
//!
//! A [`Runtime`] is created for every render. It owns the output stack, the
//! switch stack and every namespace created along the way, and it walks the
//! lowered ops of a template function.
//!
//! Name resolution inside a function goes innermost scope first (loop and
//! `py:with` scopes, then the function's locals), then the instance globals,
//! then the builtins:
//!
//! ```text
//! for-scope → with-scope → locals → globals (context, functions, imports) → builtins
//! ```
//!
//! Calling a template function runs its body right away, so it sees the
//! variables as they are at the call site. Only a template's main body is
//! deferred: it runs when the output is flattened, once the whole
//! inheritance chain has been set up.

use crate::ast::{Param, Statement};
use crate::builtins;
use crate::doctype::{HTML_EMPTY_ATTRS, Mode};
use crate::error::{RenderError, TemplateSource};
use crate::eval::{Callable, Evaluator, Namespace, Scope, Val, Value, ValueExt, escape_attr};
use crate::lazy::{Chunk, Fragment};
use crate::loader::Loader;
use crate::lower::{Op, OpAt};
use crate::template::{Function, Template};
use facet_value::DestructuredRef;
use miette::{Result, miette};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Range;
use std::rc::Rc;
use std::sync::Arc;

/// Names the runtime manages itself; a context never overrides them.
const RESERVED: &[&str] = &["local", "self", "parent", "child"];

/// The variables a template is rendered with.
#[derive(Clone, Default)]
pub struct Context {
    vars: BTreeMap<String, Val>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Val>) {
        self.vars.insert(name.into(), value.into());
    }

    /// Builder form of [`Context::set`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Val>) -> Self {
        self.set(name, value);
        self
    }

    /// Set a string that is written without escaping.
    pub fn set_safe(&mut self, name: impl Into<String>, text: &str) {
        self.vars.insert(name.into(), Val::safe(text));
    }

    /// Expose a native function. Registering `gettext` replaces the
    /// translation function used for template text.
    pub fn register_fn(
        &mut self,
        name: impl Into<String>,
        f: impl Fn(Vec<Val>, Vec<(String, Val)>) -> Result<Val> + 'static,
    ) {
        let name = name.into();
        let func = NativeFn {
            name: name.clone(),
            f: Box::new(f),
        };
        self.vars.insert(name, Val::Func(Rc::new(func)));
    }

    /// Add every entry of a dict value.
    pub fn extend_from_value(&mut self, value: &Value) -> Result<()> {
        let Some(object) = value.as_object() else {
            return Err(miette!(
                "context must be a dict, found {}",
                value.type_name()
            ));
        };
        for (key, value) in object.iter() {
            self.vars.insert(key.as_str().to_string(), Val::Data(value.clone()));
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Val> {
        self.vars.get(name)
    }

    pub fn variable_names(&self) -> Vec<String> {
        self.vars.keys().cloned().collect()
    }

    fn into_vars(self) -> Vec<(String, Val)> {
        self.vars.into_iter().collect()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.vars.iter()).finish()
    }
}

struct NativeFn {
    name: String,
    f: Box<dyn Fn(Vec<Val>, Vec<(String, Val)>) -> Result<Val>>,
}

impl Callable for NativeFn {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, args: Vec<Val>, kwargs: Vec<(String, Val)>) -> Result<Val> {
        (self.f)(args, kwargs)
    }
}

type Vars = Rc<RefCell<HashMap<String, Val>>>;

struct SwitchState {
    value: Val,
    matched: bool,
}

/// Per-render state.
pub(crate) struct Runtime {
    loader: Arc<dyn Loader>,
    output: RefCell<Vec<Vec<Chunk>>>,
    switches: RefCell<Vec<SwitchState>>,
    /// Every instance and scope created during the render, so that
    /// [`Runtime::release`] can break the reference cycles between them
    instances: RefCell<Vec<Rc<Instance>>>,
    scopes: RefCell<Vec<Vars>>,
}

/// One activation of a template.
pub(crate) struct Instance {
    template: Arc<Template>,
    runtime: Rc<Runtime>,
    /// What the instance was created with; a parent template gets the same
    context: Vec<(String, Val)>,
    globals: RefCell<HashMap<String, Val>>,
    /// The template's own functions, bound to this instance
    methods: RefCell<HashMap<String, Val>>,
    parent: RefCell<Option<Rc<Instance>>>,
}

impl Namespace for Instance {
    fn member(&self, name: &str) -> Option<Val> {
        if let Some(method) = self.methods.borrow().get(name) {
            return Some(method.clone());
        }
        let parent = self.parent.borrow().clone();
        parent.and_then(|p| p.member(name))
    }

    fn member_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.borrow().keys().cloned().collect();
        if let Some(parent) = self.parent.borrow().as_ref() {
            names.extend(parent.member_names());
        }
        names.sort();
        names.dedup();
        names
    }

    fn describe(&self) -> String {
        format!("<template {}>", self.template.name())
    }
}

/// A template function bound to an instance.
struct TemplateFn {
    instance: Rc<Instance>,
    function: Arc<Function>,
}

impl Callable for TemplateFn {
    fn name(&self) -> &str {
        self.function.name()
    }

    fn call(&self, args: Vec<Val>, kwargs: Vec<(String, Val)>) -> Result<Val> {
        let runtime = self.instance.runtime.clone();
        let scope = runtime.new_scope();
        let frame = Frame {
            instance: self.instance.clone(),
            scopes: vec![scope.clone()],
            base: Some(0),
        };
        bind_params(
            &frame,
            &scope,
            self.function.name(),
            self.function.params(),
            self.function.params_source(),
            args,
            kwargs,
        )?;
        let ops = self.function.ops();
        Ok(Val::Markup(runtime.run_body(&frame, ops, 0..ops.len())?))
    }

    fn is_template_function(&self) -> bool {
        true
    }
}

/// A function defined inside another one (`py:def` in a def, or the body
/// of a `py:call`). It sees the scopes that were live where it was defined.
struct Closure {
    name: String,
    params: Vec<Param>,
    source: TemplateSource,
    frame: Frame,
    ops: Arc<[OpAt]>,
    body: Range<usize>,
}

impl Callable for Closure {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, args: Vec<Val>, kwargs: Vec<(String, Val)>) -> Result<Val> {
        let runtime = self.frame.instance.runtime.clone();
        let scope = runtime.new_scope();
        let mut frame = self.frame.with_scope(scope.clone());
        frame.base = Some(frame.scopes.len() - 1);
        bind_params(&frame, &scope, &self.name, &self.params, &self.source, args, kwargs)?;
        Ok(Val::Markup(runtime.run_body(&frame, &self.ops, self.body.clone())?))
    }
}

/// Bind call arguments into `scope`. Defaults are evaluated at call time
/// and see the parameters bound before them.
fn bind_params(
    frame: &Frame,
    scope: &Vars,
    name: &str,
    params: &[Param],
    source: &TemplateSource,
    args: Vec<Val>,
    mut kwargs: Vec<(String, Val)>,
) -> Result<()> {
    if args.len() > params.len() {
        return Err(miette!(
            "{name}() takes {} positional argument(s) but {} were given",
            params.len(),
            args.len()
        ));
    }
    let positional = args.len();
    let mut args = args.into_iter();
    for (idx, param) in params.iter().enumerate() {
        let keyword = kwargs
            .iter()
            .position(|(k, _)| *k == param.name.name)
            .map(|i| kwargs.remove(i).1);
        let value = match (args.next(), keyword) {
            (Some(_), Some(_)) => {
                return Err(miette!(
                    "{name}() got multiple values for argument `{}`",
                    param.name.name
                ));
            }
            (Some(value), None) | (None, Some(value)) => value,
            (None, None) => match &param.default {
                Some(default) => Evaluator::new(frame, source).eval(default)?,
                None => {
                    return Err(miette!(
                        "{name}() missing required argument `{}` (position {})",
                        param.name.name,
                        idx.max(positional) + 1
                    ));
                }
            },
        };
        scope.borrow_mut().insert(param.name.name.clone(), value);
    }
    if let Some((extra, _)) = kwargs.first() {
        return Err(miette!("{name}() got an unexpected keyword argument `{extra}`"));
    }
    Ok(())
}

/// Where names are looked up and assigned while running a body.
#[derive(Clone)]
struct Frame {
    instance: Rc<Instance>,
    /// Innermost last
    scopes: Vec<Vars>,
    /// The function's local scope; `None` at module level, where
    /// assignments go to the globals
    base: Option<usize>,
}

impl Frame {
    fn with_scope(&self, scope: Vars) -> Frame {
        let mut frame = self.clone();
        frame.scopes.push(scope);
        frame
    }

    fn eval(&self, code: &crate::ast::Code) -> Result<Val> {
        Evaluator::new(self, &code.source).eval(&code.expr)
    }

    /// Bind a function in the innermost scope.
    fn define(&self, name: &str, value: Val) {
        match self.scopes.last() {
            Some(scope) => scope.borrow_mut().insert(name.to_string(), value),
            None => self.instance.globals.borrow_mut().insert(name.to_string(), value),
        };
    }

    /// Assign from embedded code: rebinds the nearest enclosing binding of
    /// the function, or creates a local.
    fn assign(&self, name: String, value: Val) {
        let Some(base) = self.base else {
            self.instance.globals.borrow_mut().insert(name, value);
            return;
        };
        for scope in self.scopes[base..].iter().rev() {
            if scope.borrow().contains_key(&name) {
                scope.borrow_mut().insert(name, value);
                return;
            }
        }
        self.scopes[base].borrow_mut().insert(name, value);
    }
}

impl Scope for Frame {
    fn lookup(&self, name: &str) -> Option<Val> {
        for scope in self.scopes.iter().rev() {
            if let Some(value) = scope.borrow().get(name) {
                return Some(value.clone());
            }
        }
        self.instance.globals.borrow().get(name).cloned()
    }

    fn available(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .scopes
            .iter()
            .flat_map(|s| s.borrow().keys().cloned().collect::<Vec<_>>())
            .chain(self.instance.globals.borrow().keys().cloned())
            .chain(builtins::names().map(String::from))
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

/// The text an op's errors point into.
fn op_source<'a>(at: &'a OpAt, template: &'a TemplateSource) -> &'a TemplateSource {
    match &at.op {
        Op::Expr { code, .. } => &code.source,
        Op::If { test, .. } | Op::Switch { test, .. } => &test.source,
        Op::Case { value, .. } => &value.source,
        Op::AttrSet { attrs, .. } => &attrs.source,
        Op::Call { callee, .. } => &callee.source,
        Op::For { source, .. }
        | Op::With { source, .. }
        | Op::Def { source, .. }
        | Op::Code { source, .. } => source,
        _ => template,
    }
}

impl Runtime {
    pub(crate) fn new(loader: Arc<dyn Loader>) -> Rc<Self> {
        Rc::new(Self {
            loader,
            output: RefCell::new(Vec::new()),
            switches: RefCell::new(Vec::new()),
            instances: RefCell::new(Vec::new()),
            scopes: RefCell::new(Vec::new()),
        })
    }

    /// Instantiate `template` against `context` and return its deferred
    /// main output.
    pub(crate) fn render_main(self: &Rc<Self>, template: &Arc<Template>, context: Context) -> Result<Fragment> {
        let instance = self.instantiate(template, context.into_vars())?;
        self.main_of(&instance)
    }

    /// Break the cycles between instances, scopes and the functions bound in
    /// them. Nothing rendered by this runtime can be forced afterwards.
    pub(crate) fn release(&self) {
        let instances = std::mem::take(&mut *self.instances.borrow_mut());
        for instance in &instances {
            let globals = std::mem::take(&mut *instance.globals.borrow_mut());
            let methods = std::mem::take(&mut *instance.methods.borrow_mut());
            let parent = instance.parent.borrow_mut().take();
            drop((globals, methods, parent));
        }
        let scopes = std::mem::take(&mut *self.scopes.borrow_mut());
        for scope in &scopes {
            let vars = std::mem::take(&mut *scope.borrow_mut());
            drop(vars);
        }
        self.switches.borrow_mut().clear();
        self.output.borrow_mut().clear();
        tracing::trace!(instances = instances.len(), scopes = scopes.len(), "released render state");
    }

    fn new_scope(&self) -> Vars {
        let scope: Vars = Rc::default();
        self.scopes.borrow_mut().push(scope.clone());
        scope
    }

    fn push(&self) {
        self.output.borrow_mut().push(Vec::new());
    }

    fn append(&self, chunk: Chunk) {
        if let Some(top) = self.output.borrow_mut().last_mut() {
            top.push(chunk);
        }
    }

    fn pop(&self) -> Vec<Chunk> {
        self.output.borrow_mut().pop().unwrap_or_default()
    }

    fn instantiate(self: &Rc<Self>, template: &Arc<Template>, context: Vec<(String, Val)>) -> Result<Rc<Instance>> {
        let instance = Rc::new(Instance {
            template: template.clone(),
            runtime: self.clone(),
            context: context.clone(),
            globals: RefCell::new(HashMap::new()),
            methods: RefCell::new(HashMap::new()),
            parent: RefCell::new(None),
        });
        self.instances.borrow_mut().push(instance.clone());

        {
            let mut globals = instance.globals.borrow_mut();
            let mut methods = instance.methods.borrow_mut();
            globals.insert("local".to_string(), Val::Object(instance.clone()));
            globals.insert("self".to_string(), Val::Object(instance.clone()));
            for function in template.functions() {
                let bound = Val::Func(Rc::new(TemplateFn {
                    instance: instance.clone(),
                    function: function.clone(),
                }));
                methods.insert(function.name().to_string(), bound.clone());
                globals.insert(function.name().to_string(), bound);
            }
            for (name, value) in context {
                if RESERVED.contains(&name.as_str()) || methods.contains_key(&name) {
                    continue;
                }
                globals.insert(name, value);
            }
        }

        let module = template.module_ops();
        if !module.is_empty() {
            let frame = Frame {
                instance: instance.clone(),
                scopes: Vec::new(),
                base: None,
            };
            self.push();
            let result = self.exec(&frame, module, 0..module.len());
            self.pop();
            result?;
        }
        tracing::trace!(template = template.name(), "instantiated template");
        Ok(instance)
    }

    /// The main body of `instance`, deferred until the output is flattened.
    fn main_of(self: &Rc<Self>, instance: &Rc<Instance>) -> Result<Fragment> {
        let main = instance
            .template
            .main()
            .cloned()
            .ok_or_else(|| miette!("{} has no main function", instance.template.name()))?;
        let frame = Frame {
            instance: instance.clone(),
            scopes: vec![self.new_scope()],
            base: Some(0),
        };
        let runtime = self.clone();
        Ok(Fragment::deferred(move || {
            let ops = main.ops();
            runtime.run_body(&frame, ops, 0..ops.len())
        }))
    }

    fn run_body(self: &Rc<Self>, frame: &Frame, ops: &Arc<[OpAt]>, body: Range<usize>) -> Result<Fragment> {
        self.push();
        let result = self.exec(frame, ops, body);
        let chunks = self.pop();
        result?;
        Ok(Fragment::new(chunks))
    }

    fn exec(self: &Rc<Self>, frame: &Frame, ops: &Arc<[OpAt]>, range: Range<usize>) -> Result<()> {
        let mut pc = range.start;
        let mut last_if = None;
        while pc < range.end {
            let at = &ops[pc];
            let previous_if = last_if.take();
            self.step(frame, ops, pc, previous_if, &mut last_if).map_err(|err| {
                let template = &frame.instance.template;
                RenderError::annotate(err, template.name(), at.line, op_source(at, template.source()))
            })?;
            pc = at.end().map_or(pc + 1, |end| end + 1);
        }
        Ok(())
    }

    fn step(
        self: &Rc<Self>,
        frame: &Frame,
        ops: &Arc<[OpAt]>,
        pc: usize,
        previous_if: Option<bool>,
        last_if: &mut Option<bool>,
    ) -> Result<()> {
        let body = |end: usize| pc + 2..end;
        match &ops[pc].op {
            Op::Text { text, translatable } => {
                if *translatable {
                    self.translate(frame, text)?;
                } else {
                    self.append(Chunk::text(text.as_str()));
                }
            }
            Op::Expr { code, escape } => {
                if let Some(chunk) = frame.eval(code)?.to_chunk(*escape) {
                    self.append(chunk);
                }
            }
            Op::If { test, end } => {
                let passed = frame.eval(test)?.is_truthy()?;
                *last_if = Some(passed);
                if passed {
                    self.exec(frame, ops, body(*end))?;
                }
            }
            Op::Else { end } => {
                let run = match previous_if {
                    Some(passed) => !passed,
                    None => self.switches.borrow().last().is_some_and(|s| !s.matched),
                };
                if run {
                    self.exec(frame, ops, body(*end))?;
                }
            }
            Op::Switch { test, end } => {
                let value = frame.eval(test)?;
                self.switches.borrow_mut().push(SwitchState {
                    value,
                    matched: false,
                });
                let result = self.exec(frame, ops, body(*end));
                self.switches.borrow_mut().pop();
                result?;
            }
            Op::Case { value, end } => {
                let top = match self.switches.borrow().last() {
                    Some(state) if !state.matched => Some(state.value.clone()),
                    _ => None,
                };
                if let Some(top) = top
                    && frame.eval(value)?.equals(&top)?
                {
                    if let Some(state) = self.switches.borrow_mut().last_mut() {
                        state.matched = true;
                    }
                    self.exec(frame, ops, body(*end))?;
                }
            }
            Op::For { head, source, end } => {
                let evaluator = Evaluator::new(frame, source);
                for item in evaluator.iterate(&head.iter)? {
                    let scope = self.new_scope();
                    for (name, value) in evaluator.bind(&head.target, item)? {
                        scope.borrow_mut().insert(name, value);
                    }
                    self.exec(&frame.with_scope(scope), ops, body(*end))?;
                }
            }
            Op::With { bindings, source, end } => {
                let scope = self.new_scope();
                let inner = frame.with_scope(scope.clone());
                for binding in bindings {
                    let evaluator = Evaluator::new(&inner, source);
                    let value = evaluator.eval(&binding.value)?;
                    for (name, value) in evaluator.bind(&binding.target, value)? {
                        scope.borrow_mut().insert(name, value);
                    }
                }
                self.exec(&inner, ops, body(*end))?;
            }
            Op::Def { name, params, source, end } => {
                let closure = self.closure(frame, ops, name, params, source, body(*end));
                frame.define(name, closure);
            }
            Op::Call {
                name,
                params,
                source,
                callee,
                end,
            } => {
                let closure = self.closure(frame, ops, name, params, source, body(*end));
                frame.define(name, closure);
                if let Some(chunk) = frame.eval(callee)?.to_chunk(true) {
                    self.append(chunk);
                }
            }
            Op::Attr { name, mode, end } => {
                if *end == pc + 3
                    && let Op::Expr { code, .. } = &ops[pc + 2].op
                {
                    let value = frame.eval(code)?;
                    self.write_attr(name, &value, *mode)?;
                } else {
                    self.push();
                    let result = self.exec(frame, ops, body(*end));
                    let chunks = self.pop();
                    result?;
                    if !chunks.is_empty() {
                        let value = Fragment::new(chunks).render()?;
                        self.append(Chunk::text(format!(" {name}=\"{}\"", escape_attr(&value))));
                    }
                }
            }
            Op::AttrSet { attrs, mode } => {
                let value = frame.eval(attrs)?;
                for (name, value) in attr_pairs(&value)? {
                    self.write_attr(&name, &value, *mode)?;
                }
            }
            Op::Import { href, alias } => self.import(frame, href, alias.as_deref())?,
            Op::Include { href } => {
                let template = self.loader.load(href)?;
                tracing::debug!(href, "including template");
                let instance = self.instantiate(&template, globals_of(&frame.instance))?;
                let main = self.main_of(&instance)?;
                self.append(Chunk::Fragment(main));
            }
            Op::Extend { href } => self.extend(&frame.instance, href)?,
            Op::Code { statements, source } => {
                let evaluator = Evaluator::new(frame, source);
                for statement in statements {
                    match statement {
                        Statement::Assign { target, value, .. } => {
                            let value = evaluator.eval(value)?;
                            for (name, value) in evaluator.bind(target, value)? {
                                frame.assign(name, value);
                            }
                        }
                        Statement::Expr(expr) => {
                            evaluator.eval(expr)?;
                        }
                    }
                }
            }
            Op::Pass | Op::Indent | Op::Dedent => {}
        }
        Ok(())
    }

    fn closure(
        &self,
        frame: &Frame,
        ops: &Arc<[OpAt]>,
        name: &str,
        params: &[Param],
        source: &TemplateSource,
        body: Range<usize>,
    ) -> Val {
        Val::Func(Rc::new(Closure {
            name: name.to_string(),
            params: params.to_vec(),
            source: source.clone(),
            frame: frame.clone(),
            ops: ops.clone(),
            body,
        }))
    }

    /// Translatable text goes through `gettext`: a context override if there
    /// is one, the identity builtin otherwise.
    fn translate(&self, frame: &Frame, text: &str) -> Result<()> {
        let gettext = frame
            .lookup("gettext")
            .or_else(|| builtins::lookup("gettext"))
            .ok_or_else(|| miette!("gettext is not available"))?;
        let Val::Func(gettext) = gettext else {
            return Err(miette!("gettext is a {}, not a function", gettext.type_name()));
        };
        if let Some(chunk) = gettext.call(vec![Val::from(text)], Vec::new())?.to_chunk(false) {
            self.append(chunk);
        }
        Ok(())
    }

    fn write_attr(&self, name: &str, value: &Val, mode: Mode) -> Result<()> {
        let boolean = HTML_EMPTY_ATTRS.contains(&name);
        let rendered = match value {
            Val::Data(data) => match data.destructure_ref() {
                DestructuredRef::Null | DestructuredRef::Bool(false) => return Ok(()),
                DestructuredRef::Bool(true) if boolean && !mode.is_html() => {
                    format!(" {name}=\"{name}\"")
                }
                _ if boolean && mode.is_html() => format!(" {}", name.to_lowercase()),
                _ => format!(" {name}=\"{}\"", escape_attr(&data.render_to_string())),
            },
            _ if boolean && mode.is_html() => format!(" {}", name.to_lowercase()),
            Val::Markup(fragment) => format!(" {name}=\"{}\"", escape_attr(&fragment.render()?)),
            other => format!(" {name}=\"{}\"", escape_attr(&other.to_text()?)),
        };
        self.append(Chunk::text(rendered));
        Ok(())
    }

    fn import(self: &Rc<Self>, frame: &Frame, href: &str, alias: Option<&str>) -> Result<()> {
        let template = self.loader.load(href)?;
        let instance = self.instantiate(&template, globals_of(&frame.instance))?;
        let alias = alias
            .map(String::from)
            .unwrap_or_else(|| self.loader.default_alias_for(href));
        tracing::debug!(href, alias = alias.as_str(), "imported template");
        frame
            .instance
            .globals
            .borrow_mut()
            .insert(alias, Val::Object(instance));
        Ok(())
    }

    /// Make `child` extend the template `href` and emit the parent's main.
    fn extend(self: &Rc<Self>, child: &Rc<Instance>, href: &str) -> Result<()> {
        let template = self.loader.load(href)?;
        let parent = self.instantiate(&template, child.context.clone())?;

        // Overrides flow up: the parent calls the child's definitions
        let overrides = template_functions(&child.globals.borrow());
        parent.globals.borrow_mut().extend(overrides);

        let inherited = template_functions(&parent.globals.borrow());
        {
            let mut globals = child.globals.borrow_mut();
            for (name, function) in inherited {
                globals.entry(name).or_insert(function);
            }
        }

        *child.parent.borrow_mut() = Some(parent.clone());
        let child_self = child.globals.borrow().get("self").cloned();
        {
            let mut globals = parent.globals.borrow_mut();
            globals.insert("child".to_string(), Val::Object(child.clone()));
            globals.insert("local".to_string(), Val::Object(parent.clone()));
            if let Some(child_self) = child_self {
                globals.insert("self".to_string(), child_self);
            }
        }
        {
            let mut globals = child.globals.borrow_mut();
            globals.insert("parent".to_string(), Val::Object(parent.clone()));
            globals.insert("local".to_string(), Val::Object(child.clone()));
        }
        tracing::debug!(child = child.template.name(), parent = href, "extended template");

        let main = self.main_of(&parent)?;
        self.append(Chunk::Fragment(main));
        Ok(())
    }
}

fn globals_of(instance: &Instance) -> Vec<(String, Val)> {
    instance
        .globals
        .borrow()
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Template functions among `globals`, `__main__` excluded.
fn template_functions(globals: &HashMap<String, Val>) -> Vec<(String, Val)> {
    globals
        .iter()
        .filter(|(name, value)| {
            name.as_str() != "__main__" && matches!(value, Val::Func(f) if f.is_template_function())
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// `py:attrs` accepts a dict or a list of `(name, value)` pairs. The result
/// is sorted by name.
fn attr_pairs(value: &Val) -> Result<Vec<(String, Val)>> {
    let data = value.to_value()?;
    let mut pairs = match data.destructure_ref() {
        DestructuredRef::Null => Vec::new(),
        DestructuredRef::Object(object) => object
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), Val::Data(v.clone())))
            .collect(),
        DestructuredRef::Array(items) => {
            let mut pairs = Vec::with_capacity(items.len());
            for item in items.iter() {
                match item.as_array().map(|pair| pair.iter().collect::<Vec<_>>()).as_deref() {
                    Some([name, value]) => {
                        pairs.push((name.render_to_string(), Val::Data((*value).clone())));
                    }
                    _ => {
                        return Err(miette!(
                            "py:attrs list items must be (name, value) pairs, found {}",
                            item.type_name()
                        ));
                    }
                }
            }
            pairs
        }
        _ => {
            return Err(miette!(
                "py:attrs expects a dict or a list of pairs, found {}",
                data.type_name()
            ));
        }
    };
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(pairs)
}
