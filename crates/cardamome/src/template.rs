//! Compiled templates

use crate::ast::Param;
use crate::compiler::{self, CompileOptions};
use crate::doctype::Mode;
use crate::error::{CompileError, TemplateSource};
use crate::ir::{IrKind, TemplateIr};
use crate::lazy::Stream;
use crate::loader::Loader;
use crate::lower::{self, OpAt};
use crate::runtime::{Context, Runtime};
use miette::Result;
use std::sync::Arc;

/// A compiled template function: `__main__`, a `py:def` or a block.
#[derive(Debug)]
pub struct Function {
    name: String,
    params: Vec<Param>,
    params_source: TemplateSource,
    ops: Arc<[OpAt]>,
    line: usize,
}

impl Function {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Text the parameter defaults were parsed from.
    pub fn params_source(&self) -> &TemplateSource {
        &self.params_source
    }

    pub fn ops(&self) -> &Arc<[OpAt]> {
        &self.ops
    }

    /// Line of the definition.
    pub fn line(&self) -> usize {
        self.line
    }

    /// `name(a, b='x')`
    pub fn signature(&self) -> String {
        let text = self.params_source.text();
        let params: Vec<String> = self
            .params
            .iter()
            .map(|param| match &param.default {
                Some(default) => {
                    let span = default.span();
                    let default = text
                        .get(span.offset()..span.offset() + span.len())
                        .unwrap_or("...");
                    format!("{}={default}", param.name.name)
                }
                None => param.name.name.clone(),
            })
            .collect();
        format!("{}({})", self.name, params.join(", "))
    }
}

/// A compiled template, ready to render any number of times.
#[derive(Debug)]
pub struct Template {
    name: String,
    /// `__main__` first
    functions: Vec<Arc<Function>>,
    module_ops: Arc<[OpAt]>,
    mode: Mode,
    source: TemplateSource,
}

impl Template {
    /// Compile an XML/HTML template.
    pub fn from_markup(name: impl AsRef<str>, text: impl Into<String>, options: &CompileOptions) -> Result<Self> {
        let source = TemplateSource::new(name, text);
        let ir = compiler::compile(&source, options)?;
        Self::from_ir(source, ir)
    }

    /// Compile a text template. With `autoescape`, expressions are
    /// HTML-escaped.
    pub fn from_text(name: impl AsRef<str>, text: impl Into<String>, autoescape: bool) -> Result<Self> {
        let source = TemplateSource::new(name, text);
        let ir = compiler::compile_text(&source, autoescape)?;
        Self::from_ir(source, ir)
    }

    fn from_ir(source: TemplateSource, ir: TemplateIr) -> Result<Self> {
        let mut functions = Vec::with_capacity(ir.defs.len());
        for node in &ir.defs {
            let line = node.pos.line;
            let IrKind::Def { decl, body } = &node.kind else {
                return Err(CompileError::at_line(&source, line, "expected a function definition").into());
            };
            let header = lower::header(decl, line, &source)?;
            let ops = lower::lower(body, &source)?;
            functions.push(Arc::new(Function {
                name: header.name,
                params: header.params,
                params_source: header.source,
                ops: ops.into(),
                line,
            }));
        }
        let module_ops: Arc<[OpAt]> = lower::lower(&ir.module, &source)?.into();
        tracing::debug!(
            template = source.name(),
            mode = %ir.mode,
            functions = functions.len(),
            "compiled template"
        );
        Ok(Self {
            name: source.name().to_string(),
            functions,
            module_ops,
            mode: ir.mode,
            source,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn source(&self) -> &TemplateSource {
        &self.source
    }

    pub fn functions(&self) -> &[Arc<Function>] {
        &self.functions
    }

    pub fn function(&self, name: &str) -> Option<&Arc<Function>> {
        self.functions.iter().find(|f| f.name() == name)
    }

    pub fn main(&self) -> Option<&Arc<Function>> {
        self.function("__main__")
    }

    pub(crate) fn module_ops(&self) -> &Arc<[OpAt]> {
        &self.module_ops
    }

    /// Render to a string. `loader` resolves imports, includes and
    /// extends.
    pub fn render(self: &Arc<Self>, context: Context, loader: Arc<dyn Loader>) -> Result<String> {
        let runtime = Runtime::new(loader);
        let result = runtime
            .render_main(self, context)
            .and_then(|main| main.render());
        runtime.release();
        result
    }

    /// Render as a stream of text pieces, produced as the output is
    /// flattened. Per-render state is released when the stream is dropped.
    pub fn stream(self: &Arc<Self>, context: Context, loader: Arc<dyn Loader>) -> Result<Stream> {
        let runtime = Runtime::new(loader);
        match runtime.render_main(self, context) {
            Ok(main) => Ok(main.stream().with_cleanup(move || runtime.release())),
            Err(err) => {
                runtime.release();
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::NullLoader;

    #[test]
    fn test_functions_and_signature() {
        let src = "<div><py:def function=\"item(label, kind='plain')\">$label</py:def>${item('a')}</div>";
        let template = Template::from_markup("t.html", src, &CompileOptions::default()).unwrap();
        assert_eq!(template.functions()[0].name(), "__main__");
        let item = template.function("item").unwrap();
        assert_eq!(item.signature(), "item(label, kind='plain')");
        assert!(template.main().is_some());
    }

    #[test]
    fn test_def_bodies_keep_their_line() {
        let src = "<div>\n<py:def function=\"a()\">x</py:def>\n\n<py:def function=\"b()\">y</py:def>\n</div>";
        let template = Template::from_markup("t.html", src, &CompileOptions::default()).unwrap();
        let names: Vec<_> = template.functions().iter().map(|f| (f.name(), f.line())).collect();
        assert_eq!(names, vec![("__main__", 1), ("a", 2), ("b", 4)]);
    }

    #[test]
    fn test_compile_error_surfaces_at_compile_time() {
        let err = Template::from_markup("t.html", "<p>\n${1 +}</p>", &CompileOptions::default()).unwrap_err();
        assert!(err.to_string().starts_with("t.html:2"));
    }

    #[test]
    fn test_render_twice() {
        let template = Arc::new(Template::from_text("t.txt", "Hi $name\n", false).unwrap());
        for name in ["a", "b"] {
            let out = template
                .render(Context::new().with("name", name), Arc::new(NullLoader))
                .unwrap();
            assert_eq!(out, format!("Hi {name}\n"));
        }
    }

    #[test]
    fn test_stream() {
        let template = Arc::new(Template::from_text("t.txt", "%for i in range(3)\n$i\n%end\n", false).unwrap());
        let pieces: Vec<String> = template
            .stream(Context::new(), Arc::new(NullLoader))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(pieces.concat(), "0\n1\n2\n");
    }
}
