//! Directive tree → IR
//!
//! Markup and text templates share this pass. Plain elements are flattened
//! into text and attribute nodes; `py:*` directives become structured nodes;
//! `py:def` and `py:block` bodies are lifted out into template functions.

use crate::doctype::{self, HTML_CDATA_TAGS, HTML_OPTIONAL_END_TAGS, HTML_REQUIRED_END_TAGS, Mode};
use crate::error::{CompileError, TemplateSource};
use crate::ir::{IrKind, IrNode, Pos, TemplateIr, merge_text};
use crate::scan::{self, Piece};
use crate::tree::{self, Document, Element, Node};
use crate::{markup, text};
use miette::Result;
use std::sync::Arc;

/// Options for compiling markup templates.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileOptions {
    /// Serialization mode; when unset it follows the DTD, then `xml`
    pub mode: Option<Mode>,
    /// Never write a doctype
    pub fragment: bool,
    /// Elements that implicitly become blocks named after their tag
    pub autoblocks: Vec<String>,
    /// Wrap `<script>`/`<style>` content in commented CDATA markers in
    /// xml mode, and treat it as raw text
    pub cdata_scripts: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            mode: None,
            fragment: false,
            autoblocks: Vec::new(),
            cdata_scripts: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Flavor {
    Markup,
    Text { autoescape: bool },
}

/// Where a run of children sits.
#[derive(Debug, Clone, Copy, Default)]
struct Ctx {
    in_switch: bool,
    /// Text of `<script>`/`<style>`: never translated
    raw_text: bool,
}

/// Compile a markup template.
pub fn compile(source: &TemplateSource, options: &CompileOptions) -> Result<TemplateIr> {
    let document = markup::parse(source)?;
    let document = tree::expand(document, &options.autoblocks, source)?;
    let dtd_mode = document
        .doctype
        .as_deref()
        .and_then(doctype::matching)
        .map(|d| d.mode);
    let mode = options.mode.or(dtd_mode).unwrap_or_default();
    let compiler = Compiler::new(source, Flavor::Markup, mode, options.cdata_scripts);
    compiler.markup(document, options.fragment)
}

/// Compile a text template. With `autoescape`, expressions are HTML-escaped.
pub fn compile_text(source: &TemplateSource, autoescape: bool) -> Result<TemplateIr> {
    let document = text::parse(source)?;
    let compiler = Compiler::new(source, Flavor::Text { autoescape }, Mode::Xml, false);
    compiler.text(document)
}

struct Compiler<'a> {
    source: &'a TemplateSource,
    filename: Arc<str>,
    flavor: Flavor,
    mode: Mode,
    cdata_scripts: bool,
    /// `Def` nodes; the body of `__main__` is filled in last
    defs: Vec<IrNode>,
    module: Vec<IrNode>,
    in_def: bool,
    is_child: bool,
    counter: usize,
}

impl<'a> Compiler<'a> {
    fn new(source: &'a TemplateSource, flavor: Flavor, mode: Mode, cdata_scripts: bool) -> Self {
        Self {
            source,
            filename: Arc::from(source.name()),
            flavor,
            mode,
            cdata_scripts,
            defs: Vec::new(),
            module: Vec::new(),
            in_def: false,
            is_child: false,
            counter: 0,
        }
    }

    fn markup(mut self, document: Document, fragment: bool) -> Result<TemplateIr> {
        let nodes: Vec<Node> = document
            .root
            .into_iter()
            .filter(|n| !matches!(n, Node::Comment { .. }))
            .collect();
        if nodes.iter().filter(|n| matches!(n, Node::Element(_))).count() != 1 {
            return Err(self.error(1, "expected a single root node in document"));
        }
        let mut body = self.children(nodes, Ctx::default())?;

        if !fragment && !self.is_child {
            let dtd = match document.doctype {
                Some(dtd) => Some(dtd.trim().to_string()),
                None if self.mode == Mode::Html5 => Some("<!DOCTYPE html>".to_string()),
                None => None,
            };
            if let Some(dtd) = dtd {
                body.insert(0, IrNode::text(dtd + "\n", self.pos(1)));
            }
        }
        Ok(self.finish(body))
    }

    fn text(mut self, document: Document) -> Result<TemplateIr> {
        let body = self.children(document.root, Ctx::default())?;
        Ok(self.finish(body))
    }

    fn finish(mut self, main: Vec<IrNode>) -> TemplateIr {
        let main = self.node(
            IrKind::Def {
                decl: "__main__()".to_string(),
                body: main,
            },
            1,
        );
        self.defs.insert(0, main);
        tracing::trace!(name = self.source.name(), mode = %self.mode, "compiled template");
        TemplateIr {
            defs: merge_text(self.defs),
            module: self.module,
            mode: self.mode,
        }
    }

    fn pos(&self, line: usize) -> Pos {
        Pos {
            filename: self.filename.clone(),
            line,
        }
    }

    fn error(&self, line: usize, message: impl Into<String>) -> miette::Report {
        CompileError::at_line(self.source, line, message).into()
    }

    fn node(&self, kind: IrKind, line: usize) -> IrNode {
        IrNode::new(kind, self.pos(line))
    }

    fn define(&mut self, decl: String, body: Vec<IrNode>, line: usize) {
        let name = decl_name(&decl).to_string();
        let def = self.node(IrKind::Def { decl, body }, line);
        let slot = self.defs.iter_mut().find(|node| match &node.kind {
            IrKind::Def { decl, .. } => decl_name(decl) == name,
            _ => false,
        });
        match slot {
            Some(slot) => *slot = def,
            None => self.defs.push(def),
        }
    }

    fn children(&mut self, nodes: Vec<Node>, ctx: Ctx) -> Result<Vec<IrNode>> {
        let mut out: Vec<IrNode> = Vec::new();
        for node in nodes {
            if let Node::Element(el) = &node {
                match el.name.as_str() {
                    "py:case" if !ctx.in_switch => {
                        return Err(self.error(el.line, "py:case directive can only be used inside a py:switch"));
                    }
                    "py:else"
                        if !ctx.in_switch
                            && !matches!(out.last(), Some(IrNode { kind: IrKind::If { .. }, .. })) =>
                    {
                        return Err(self.error(
                            el.line,
                            "py:else directive must be inside a py:switch or directly after py:if without text or spaces in between",
                        ));
                    }
                    _ => {}
                }
            }
            let compiled = match node {
                Node::Text { text, line, cdata: true } if self.flavor == Flavor::Markup => {
                    self.cdata_section(&text, line)?
                }
                Node::Text { text, line, .. } => {
                    let translatable = self.flavor == Flavor::Markup && !ctx.raw_text;
                    self.interpolate(&text, line, translatable)?
                }
                Node::Comment { text, line } => {
                    if text.starts_with('!') {
                        Vec::new()
                    } else {
                        vec![IrNode::text(format!("<!-- {text} -->"), self.pos(line))]
                    }
                }
                Node::Pi { target, data, line } => self.pi(&target, &data, line),
                Node::Element(el) => self.element(el)?,
            };
            out.extend(compiled);
        }
        Ok(out)
    }

    /// Scan character data into text and expression nodes.
    fn interpolate(&self, text: &str, line: usize, translatable: bool) -> Result<Vec<IrNode>> {
        let escape = match self.flavor {
            Flavor::Markup => true,
            Flavor::Text { autoescape } => autoescape,
        };
        let pieces = self.scan(text, line)?;
        Ok(pieces
            .into_iter()
            .map(|piece| {
                let line = line + text[..piece.offset()].matches('\n').count();
                match piece {
                    Piece::Text { text, .. } => {
                        let translatable = translatable && !text.trim().is_empty();
                        self.node(
                            IrKind::Text {
                                text,
                                guard: None,
                                translatable,
                                verbatim: false,
                            },
                            line,
                        )
                    }
                    Piece::Expr { code, .. } => self.node(IrKind::Expr { code, escape }, line),
                }
            })
            .collect())
    }

    fn scan(&self, text: &str, line: usize) -> Result<Vec<Piece>> {
        scan::scan(text).map_err(|err| {
            let line = line + text[..err.offset].matches('\n').count();
            self.error(line, err.message)
        })
    }

    /// Raw text: interpolated, never translated or merged.
    fn raw(&self, text: &str, line: usize) -> Result<Vec<IrNode>> {
        let pieces = self.scan(text, line)?;
        Ok(pieces
            .into_iter()
            .map(|piece| {
                let line = line + text[..piece.offset()].matches('\n').count();
                match piece {
                    Piece::Text { text, .. } => self.verbatim(text, line),
                    Piece::Expr { code, .. } => self.node(IrKind::Expr { code, escape: true }, line),
                }
            })
            .collect())
    }

    fn verbatim(&self, text: impl Into<String>, line: usize) -> IrNode {
        self.node(
            IrKind::Text {
                text: text.into(),
                guard: None,
                translatable: false,
                verbatim: true,
            },
            line,
        )
    }

    fn cdata_section(&self, text: &str, line: usize) -> Result<Vec<IrNode>> {
        let mut out = vec![self.verbatim("<![CDATA[", line)];
        out.extend(self.raw(text, line)?);
        out.push(self.verbatim("]]>", line));
        Ok(out)
    }

    fn pi(&mut self, target: &str, data: &str, line: usize) -> Vec<IrNode> {
        if target != "py" && target != "python" {
            let pi = if data.is_empty() {
                format!("<?{target}?>")
            } else {
                format!("<?{target} {data}?>")
            };
            return vec![IrNode::text(pi, self.pos(line))];
        }
        let code = data.trim();
        match code.strip_prefix('%') {
            Some(module_code) => {
                let node = self.node(
                    IrKind::EmbeddedCode {
                        code: module_code.to_string(),
                        module_level: true,
                    },
                    line,
                );
                self.module.push(node);
                Vec::new()
            }
            None => vec![self.node(
                IrKind::EmbeddedCode {
                    code: code.to_string(),
                    module_level: false,
                },
                line,
            )],
        }
    }

    fn required(&self, el: &Element, attr: &str) -> Result<String> {
        el.attr(attr).map(String::from).ok_or_else(|| {
            self.error(
                el.line,
                format!("{} directive requires a `{attr}` attribute", el.name),
            )
        })
    }

    fn element(&mut self, el: Element) -> Result<Vec<IrNode>> {
        let Some(directive) = el.name.strip_prefix("py:") else {
            return self.plain(el);
        };
        let line = el.line;
        let ir = match directive {
            "nop" => return self.children(el.children, Ctx::default()),
            "for" => {
                let each = self.required(&el, "each")?;
                let body = self.children(el.children, Ctx::default())?;
                IrKind::For { each, body }
            }
            "if" => {
                let test = self.required(&el, "test")?;
                let body = self.children(el.children, Ctx::default())?;
                IrKind::If { test, body }
            }
            "else" => {
                let body = self.children(el.children, Ctx::default())?;
                IrKind::Else { body }
            }
            "switch" => return self.switch(el),
            "case" => {
                let value = self.required(&el, "value")?;
                let body = self.children(el.children, Ctx::default())?;
                IrKind::Case { value, body }
            }
            "with" => {
                let vars = self.required(&el, "vars")?;
                let body = self.children(el.children, Ctx::default())?;
                IrKind::With { vars, body }
            }
            "def" => {
                let decl = self.required(&el, "function")?;
                let outer = std::mem::replace(&mut self.in_def, true);
                let body = self.children(el.children, Ctx::default());
                self.in_def = outer;
                let body = body?;
                if !outer {
                    self.define(decl, body, line);
                    return Ok(Vec::new());
                }
                IrKind::InnerDef { decl, body }
            }
            "call" => {
                let callee = self.required(&el, "function")?;
                let params = el
                    .attr("args")
                    .or_else(|| {
                        el.children
                            .iter()
                            .find_map(Node::as_element)
                            .and_then(|first| first.attr("args"))
                    })
                    .unwrap_or_default()
                    .to_string();
                let name = format!("_caller_{}", self.counter);
                self.counter += 1;
                let callee = callee.replace("%caller", &name);
                let body = self.children(el.children, Ctx::default())?;
                IrKind::Call {
                    name,
                    params,
                    callee,
                    body,
                }
            }
            "replace" => IrKind::Expr {
                code: self.required(&el, "value")?,
                escape: true,
            },
            "block" => return self.block(el),
            "extends" => {
                self.is_child = true;
                let href = self.required(&el, "href")?;
                let mut out = vec![self.node(IrKind::Extend { href }, line)];
                out.extend(self.children(el.children, Ctx::default())?);
                return Ok(out);
            }
            "import" => IrKind::Import {
                href: self.required(&el, "href")?,
                alias: el.attr("alias").map(String::from),
            },
            "include" => IrKind::Include {
                href: self.required(&el, "href")?,
            },
            other => return Err(self.error(line, format!("unknown directive py:{other}"))),
        };
        Ok(vec![self.node(ir, line)])
    }

    fn switch(&mut self, el: Element) -> Result<Vec<IrNode>> {
        let test = self.required(&el, "test")?;
        let ctx = Ctx {
            in_switch: true,
            raw_text: false,
        };
        let mut body = Vec::new();
        for node in self.children(el.children, ctx)? {
            match &node.kind {
                IrKind::Text { text, .. } if text.trim().is_empty() => {}
                IrKind::Case { .. } | IrKind::Else { .. } => body.push(node),
                _ => {
                    return Err(self.error(
                        el.line,
                        "py:switch directive can only contain py:case and py:else nodes and cannot be placed on a tag.",
                    ));
                }
            }
        }
        if let Some(idx) = body.iter().position(|n| matches!(n.kind, IrKind::Else { .. }))
            && idx + 1 != body.len()
        {
            return Err(self.error(body[idx].pos.line, "py:else must be the last branch of a py:switch"));
        }
        Ok(vec![self.node(IrKind::Switch { test, body }, el.line)])
    }

    fn block(&mut self, el: Element) -> Result<Vec<IrNode>> {
        let name = self.required(&el, "name")?;
        let line = el.line;
        let function = format!("_block_{name}");
        let mut body = self.children(el.children, Ctx::default())?;
        if body.is_empty() {
            body.push(self.node(IrKind::Pass, line));
        }
        if self.is_child {
            body.insert(
                0,
                self.node(
                    IrKind::EmbeddedCode {
                        code: format!("parent_block = parent.{function}"),
                        module_level: false,
                    },
                    line,
                ),
            );
            self.define(format!("{function}()"), body, line);
            Ok(Vec::new())
        } else {
            self.define(format!("{function}()"), body, line);
            Ok(vec![self.node(
                IrKind::Expr {
                    code: format!("{function}()"),
                    escape: false,
                },
                line,
            )])
        }
    }

    fn guarded(&self, text: impl Into<String>, guard: &Option<String>, line: usize) -> IrNode {
        self.node(
            IrKind::Text {
                text: text.into(),
                guard: guard.clone(),
                translatable: false,
                verbatim: false,
            },
            line,
        )
    }

    /// A literal element with its attributes and content.
    fn plain(&mut self, mut el: Element) -> Result<Vec<IrNode>> {
        let line = el.line;
        let guard = el.remove_attr("py:strip").map(|g| {
            if g.trim().is_empty() {
                "False".to_string()
            } else {
                format!("not ({g})")
            }
        });
        let content = el.remove_attr("py:content");
        let attrs = el.remove_attr("py:attrs");
        el.remove_attr("py:autoblock");

        let tag = el.name.clone();
        let mut out = vec![self.guarded(format!("<{tag}"), &guard, line)];

        let mut sorted = std::mem::take(&mut el.attrs);
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, value) in sorted {
            let value = self
                .scan(&value, line)?
                .into_iter()
                .map(|piece| match piece {
                    Piece::Text { text, .. } => IrNode::text(text, self.pos(line)),
                    Piece::Expr { code, .. } => self.node(IrKind::Expr { code, escape: false }, line),
                })
                .collect();
            out.push(self.node(
                IrKind::Attr {
                    name,
                    value,
                    guard: guard.clone(),
                    mode: self.mode,
                },
                line,
            ));
        }
        if let Some(attrs) = attrs {
            out.push(self.node(
                IrKind::AttrSet {
                    attrs,
                    guard: guard.clone(),
                    mode: self.mode,
                },
                line,
            ));
        }

        if let Some(content) = content {
            out.push(self.guarded(">", &guard, line));
            out.push(self.node(IrKind::Expr { code: content, escape: true }, line));
            out.push(self.guarded(format!("</{tag}>"), &guard, line));
            return Ok(out);
        }

        let html = self.mode.is_html();
        if el.children.is_empty() {
            let end = if HTML_REQUIRED_END_TAGS.contains(&tag.as_str()) {
                format!("></{tag}>")
            } else if html && HTML_OPTIONAL_END_TAGS.contains(&tag.as_str()) {
                ">".to_string()
            } else if html {
                format!("></{tag}>")
            } else {
                "/>".to_string()
            };
            out.push(self.guarded(end, &guard, line));
            return Ok(out);
        }

        out.push(self.guarded(">", &guard, line));
        let raw_tag = HTML_CDATA_TAGS.contains(&tag.as_str());
        if self.cdata_scripts && raw_tag {
            out.extend(self.script_body(el.children)?);
        } else {
            let ctx = Ctx {
                in_switch: false,
                raw_text: raw_tag,
            };
            out.extend(self.children(el.children, ctx)?);
        }
        if !(html && HTML_OPTIONAL_END_TAGS.contains(&tag.as_str())) {
            out.push(self.guarded(format!("</{tag}>"), &guard, line));
        }
        Ok(out)
    }

    /// Content of `<script>` and `<style>`: raw text, wrapped in commented
    /// CDATA markers in xml mode.
    fn script_body(&mut self, children: Vec<Node>) -> Result<Vec<IrNode>> {
        let xml = self.mode == Mode::Xml;
        let first_line = children.first().map_or(1, Node::line);
        let mut out = Vec::new();
        if xml {
            out.push(self.verbatim("/*<![CDATA[*/", first_line));
        }
        for child in children {
            match child {
                Node::Text { text, line, cdata: true } => out.extend(self.raw(&text, line)?),
                Node::Text { text, line, .. } => {
                    let text = quick_xml::escape::unescape(&text)
                        .map_err(|e| self.error(line, e.to_string()))?;
                    out.extend(self.raw(&text, line)?);
                }
                other => {
                    let ctx = Ctx {
                        in_switch: false,
                        raw_text: true,
                    };
                    out.extend(self.children(vec![other], ctx)?);
                }
            }
        }
        if xml {
            out.push(self.verbatim("/*]]>*/", first_line));
        }
        Ok(out)
    }
}

/// `name(a, b=1)` → `name`
pub fn decl_name(decl: &str) -> &str {
    decl.split('(').next().unwrap_or(decl).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn compile_str(s: &str) -> Result<TemplateIr> {
        compile(&TemplateSource::new("t.html", s), &CompileOptions::default())
    }

    fn def(ir: &TemplateIr, idx: usize) -> (&str, &[IrNode]) {
        match &ir.defs[idx].kind {
            IrKind::Def { decl, body } => (decl, body),
            other => panic!("expected a def, found {other:?}"),
        }
    }

    fn main_body(ir: &TemplateIr) -> &[IrNode] {
        def(ir, 0).1
    }

    fn texts(nodes: &[IrNode]) -> Vec<&str> {
        nodes
            .iter()
            .filter_map(|n| match &n.kind {
                IrKind::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_plain_element() {
        let ir = compile_str("<div><br/></div>").unwrap();
        assert_eq!(texts(main_body(&ir)), vec!["<div><br/></div>"]);
    }

    #[test]
    fn test_html_mode_endings() {
        let options = CompileOptions {
            mode: Some(Mode::Html),
            ..CompileOptions::default()
        };
        let ir = compile(&TemplateSource::new("t.html", "<div><br/><p/></div>"), &options).unwrap();
        assert_eq!(texts(main_body(&ir)), vec!["<div><br><p></p></div>"]);
    }

    #[test]
    fn test_html5_doctype_is_added() {
        let options = CompileOptions {
            mode: Some(Mode::Html5),
            ..CompileOptions::default()
        };
        let ir = compile(&TemplateSource::new("t.html", "<p/>"), &options).unwrap();
        assert_eq!(texts(main_body(&ir)), vec!["<!DOCTYPE html>\n<p></p>"]);
    }

    #[test]
    fn test_fragment_has_no_doctype() {
        let options = CompileOptions {
            mode: Some(Mode::Html5),
            fragment: true,
            ..CompileOptions::default()
        };
        let ir = compile(&TemplateSource::new("t.html", "<p/>"), &options).unwrap();
        assert_eq!(texts(main_body(&ir)), vec!["<p></p>"]);
    }

    #[test]
    fn test_dtd_decides_mode() {
        let ir = compile_str("<!DOCTYPE html>\n<p/>").unwrap();
        assert_eq!(ir.mode, Mode::Html5);
    }

    #[test]
    fn test_translatable_text() {
        let ir = compile_str("<p>Hello $name!</p>").unwrap();
        let kinds: Vec<_> = main_body(&ir).iter().map(|n| &n.kind).collect();
        assert!(matches!(kinds[1], IrKind::Text { text, translatable: true, .. } if text == "Hello "));
        assert!(matches!(kinds[2], IrKind::Expr { code, escape: true } if code == "name"));
        assert!(matches!(kinds[3], IrKind::Text { text, translatable: true, .. } if text == "!"));
    }

    #[test]
    fn test_def_is_lifted_out() {
        let ir = compile_str("<div><py:def function=\"greet(name)\">Hi $name</py:def></div>").unwrap();
        assert_eq!(ir.defs.len(), 2);
        assert_eq!(def(&ir, 0).0, "__main__()");
        let (decl, body) = def(&ir, 1);
        assert_eq!(decl, "greet(name)");
        assert_eq!(texts(body), vec!["Hi "]);
        assert_eq!(ir.defs[1].pos.line, 1);
        assert_eq!(texts(main_body(&ir)), vec!["<div></div>"]);
    }

    #[test]
    fn test_redefinition_replaces_def() {
        let ir = compile_str(indoc! {r#"
            <div>
              <py:def function="greet()">one</py:def>
              <py:def function="greet(name)">two</py:def>
            </div>
        "#})
        .unwrap();
        assert_eq!(ir.defs.len(), 2);
        let (decl, body) = def(&ir, 1);
        assert_eq!(decl, "greet(name)");
        assert_eq!(texts(body), vec!["two"]);
        assert_eq!(ir.defs[1].pos.line, 3);
    }

    #[test]
    fn test_block_in_parent_and_child() {
        let parent = compile_str("<div py:block=\"body\">x</div>").unwrap();
        assert!(matches!(
            &main_body(&parent)[0].kind,
            IrKind::Expr { code, escape: false } if code == "_block_body()"
        ));

        let child = compile_str("<div><py:extends href=\"'p.html'\"/><py:block name=\"body\">y</py:block></div>").unwrap();
        let (decl, body) = def(&child, 1);
        assert_eq!(decl, "_block_body()");
        assert!(matches!(
            &body[0].kind,
            IrKind::EmbeddedCode { code, .. } if code == "parent_block = parent._block_body"
        ));
    }

    #[test]
    fn test_strip_guards_tag_text() {
        let ir = compile_str("<div py:strip=\"\">x</div>").unwrap();
        assert!(matches!(
            &main_body(&ir)[0].kind,
            IrKind::Text { guard: Some(g), .. } if g == "False"
        ));
    }

    #[test]
    fn test_switch_rejects_other_content() {
        let err = compile_str("<py:switch test=\"1\"><p/></py:switch>").unwrap_err();
        assert!(err.to_string().contains("can only contain py:case"));
    }

    #[test]
    fn test_case_outside_switch() {
        let err = compile_str("<div><py:case value=\"1\">x</py:case></div>").unwrap_err();
        assert!(err.to_string().contains("inside a py:switch"));
    }

    #[test]
    fn test_else_needs_if() {
        let err = compile_str("<div><py:if test=\"x\">a</py:if> <py:else>b</py:else></div>").unwrap_err();
        assert!(err.to_string().contains("directly after py:if"));
        assert!(compile_str("<div><py:if test=\"x\">a</py:if><py:else>b</py:else></div>").is_ok());
    }

    #[test]
    fn test_script_cdata_in_xml() {
        let ir = compile_str("<script>if (a &lt; b) {}</script>").unwrap();
        assert_eq!(
            texts(main_body(&ir)).concat(),
            "<script>/*<![CDATA[*/if (a < b) {}/*]]>*/</script>"
        );
    }

    #[test]
    fn test_comments() {
        let ir = compile_str("<div><!-- a --><!--! b --></div>").unwrap();
        assert_eq!(texts(main_body(&ir)), vec!["<div><!--  a  --></div>"]);
    }

    #[test]
    fn test_module_level_code() {
        let ir = compile_str("<div><?py %x = 1?></div>").unwrap();
        assert_eq!(ir.module.len(), 1);
        assert_eq!(texts(main_body(&ir)), vec!["<div></div>"]);
    }

    #[test]
    fn test_unknown_directive() {
        assert!(compile_str("<py:bogus/>").is_err());
    }

    #[test]
    fn test_text_template() {
        let ir = compile_text(&TemplateSource::new("t.txt", "%for i in x\n<$i>\n%end\n"), true).unwrap();
        let IrKind::For { each, body } = &main_body(&ir)[0].kind else {
            panic!("expected a for loop");
        };
        assert_eq!(each, "i in x");
        assert_eq!(texts(body), vec!["<", ">\n"]);
        assert!(matches!(&body[1].kind, IrKind::Expr { escape: true, .. }));
    }
}
