//! IR → executable ops
//!
//! Bodies are flattened into a single op list. A block op (`For`, `If`, ...)
//! is followed by `Indent`, its body and `Dedent`, and records `end`, the
//! index of that `Dedent`:
//!
//! ```text
//! 0  If { test: x, end: 3 }
//! 1  Indent
//! 2  Text "yes"
//! 3  Dedent
//! ```
//! Every expression is parsed here, so syntax errors surface when a template
//! is compiled rather than when it is rendered.

use crate::ast::{Binding, Code, ForHead, Param, Statement};
use crate::doctype::Mode;
use crate::error::{CompileError, TemplateSource};
use crate::ir::{IrKind, IrNode};
use crate::parser::Parser;
use miette::Result;

#[derive(Debug, Clone)]
pub struct OpAt {
    pub op: Op,
    pub line: usize,
}

#[derive(Debug, Clone)]
pub enum Op {
    Text {
        text: String,
        translatable: bool,
    },
    Expr {
        code: Code,
        escape: bool,
    },
    For {
        head: ForHead,
        source: TemplateSource,
        end: usize,
    },
    If {
        test: Code,
        end: usize,
    },
    /// Runs when the preceding `If` failed, or when no `Case` of the
    /// enclosing `Switch` matched
    Else {
        end: usize,
    },
    Switch {
        test: Code,
        end: usize,
    },
    Case {
        value: Code,
        end: usize,
    },
    With {
        bindings: Vec<Binding>,
        source: TemplateSource,
        end: usize,
    },
    /// A nested function, bound in the current scope
    Def {
        name: String,
        params: Vec<Param>,
        source: TemplateSource,
        end: usize,
    },
    /// Define the caller `name` from the body, then write `callee`.
    Call {
        name: String,
        params: Vec<Param>,
        source: TemplateSource,
        callee: Code,
        end: usize,
    },
    /// The body produces the attribute value.
    Attr {
        name: String,
        mode: Mode,
        end: usize,
    },
    AttrSet {
        attrs: Code,
        mode: Mode,
    },
    Import {
        href: String,
        alias: Option<String>,
    },
    Include {
        href: String,
    },
    Extend {
        href: String,
    },
    Code {
        statements: Vec<Statement>,
        source: TemplateSource,
    },
    Pass,
    Indent,
    Dedent,
}

impl OpAt {
    /// The `Dedent` closing this op's body, for block ops.
    pub fn end(&self) -> Option<usize> {
        match self.op {
            Op::For { end, .. }
            | Op::If { end, .. }
            | Op::Else { end }
            | Op::Switch { end, .. }
            | Op::Case { end, .. }
            | Op::With { end, .. }
            | Op::Def { end, .. }
            | Op::Call { end, .. }
            | Op::Attr { end, .. } => Some(end),
            _ => None,
        }
    }
}

/// A lowered function header.
#[derive(Debug, Clone)]
pub struct Header {
    pub name: String,
    pub params: Vec<Param>,
    /// Text the parameter defaults were parsed from
    pub source: TemplateSource,
}

/// Parse `name(params)`.
pub fn header(decl: &str, line: usize, template: &TemplateSource) -> Result<Header> {
    let parser = Parser::new(template.name(), decl.trim());
    let source = parser.source().clone();
    let signature = parser
        .parse_signature()
        .map_err(|e| CompileError::from_expression(template, line, e))?;
    Ok(Header {
        name: signature.name.name,
        params: signature.params,
        source,
    })
}

/// Flatten a body into ops.
pub fn lower(body: &[IrNode], template: &TemplateSource) -> Result<Vec<OpAt>> {
    let mut lowerer = Lowerer {
        template,
        ops: Vec::new(),
    };
    lowerer.nodes(body)?;
    Ok(lowerer.ops)
}

struct Lowerer<'a> {
    template: &'a TemplateSource,
    ops: Vec<OpAt>,
}

impl Lowerer<'_> {
    fn push(&mut self, op: Op, line: usize) -> usize {
        self.ops.push(OpAt { op, line });
        self.ops.len() - 1
    }

    /// Open the body of the block op at `idx`.
    fn open(&mut self, op: Op, line: usize) -> usize {
        let idx = self.push(op, line);
        self.push(Op::Indent, line);
        idx
    }

    /// Close the body of the block op at `idx`.
    fn close(&mut self, idx: usize) {
        let line = self.ops[idx].line;
        let here = self.push(Op::Dedent, line);
        match &mut self.ops[idx].op {
            Op::For { end, .. }
            | Op::If { end, .. }
            | Op::Else { end }
            | Op::Switch { end, .. }
            | Op::Case { end, .. }
            | Op::With { end, .. }
            | Op::Def { end, .. }
            | Op::Call { end, .. }
            | Op::Attr { end, .. } => *end = here,
            _ => {}
        }
    }

    fn block(&mut self, op: Op, line: usize, body: &[IrNode]) -> Result<()> {
        let idx = self.open(op, line);
        self.nodes(body)?;
        self.close(idx);
        Ok(())
    }

    fn code(&self, text: &str, line: usize) -> Result<Code> {
        let parser = Parser::new(self.template.name(), text.trim());
        let source = parser.source().clone();
        let expr = parser
            .parse_expression()
            .map_err(|e| CompileError::from_expression(self.template, line, e))?;
        Ok(Code { expr, source })
    }

    /// Open an `If` for `guard`, returning its index.
    fn guard(&mut self, guard: &Option<String>, line: usize) -> Result<Option<usize>> {
        match guard {
            Some(test) => {
                let test = self.code(test, line)?;
                Ok(Some(self.open(Op::If { test, end: 0 }, line)))
            }
            None => Ok(None),
        }
    }

    fn nodes(&mut self, nodes: &[IrNode]) -> Result<()> {
        for node in nodes {
            self.node(node)?;
        }
        Ok(())
    }

    fn node(&mut self, node: &IrNode) -> Result<()> {
        let line = node.pos.line;
        let template = self.template;
        let expression = |e: miette::Report| CompileError::from_expression(template, line, e);
        match &node.kind {
            IrKind::Text {
                text,
                guard,
                translatable,
                ..
            } => {
                let open = self.guard(guard, line)?;
                self.push(
                    Op::Text {
                        text: text.clone(),
                        translatable: *translatable,
                    },
                    line,
                );
                if let Some(idx) = open {
                    self.close(idx);
                }
            }
            IrKind::Expr { code, escape } => {
                let code = self.code(code, line)?;
                self.push(Op::Expr { code, escape: *escape }, line);
            }
            IrKind::For { each, body } => {
                let parser = Parser::new(template.name(), each.trim());
                let source = parser.source().clone();
                let head = parser.parse_for_head().map_err(expression)?;
                self.block(Op::For { head, source, end: 0 }, line, body)?;
            }
            IrKind::If { test, body } => {
                let test = self.code(test, line)?;
                self.block(Op::If { test, end: 0 }, line, body)?;
            }
            IrKind::Else { body } => self.block(Op::Else { end: 0 }, line, body)?,
            IrKind::Switch { test, body } => {
                let test = self.code(test, line)?;
                self.block(Op::Switch { test, end: 0 }, line, body)?;
            }
            IrKind::Case { value, body } => {
                let value = self.code(value, line)?;
                self.block(Op::Case { value, end: 0 }, line, body)?;
            }
            IrKind::With { vars, body } => {
                let parser = Parser::new(template.name(), vars.trim());
                let source = parser.source().clone();
                let bindings = parser.parse_bindings().map_err(expression)?;
                self.block(
                    Op::With {
                        bindings,
                        source,
                        end: 0,
                    },
                    line,
                    body,
                )?;
            }
            IrKind::Def { decl, body } | IrKind::InnerDef { decl, body } => {
                let Header { name, params, source } = header(decl, line, template)?;
                self.block(
                    Op::Def {
                        name,
                        params,
                        source,
                        end: 0,
                    },
                    line,
                    body,
                )?;
            }
            IrKind::Call {
                name,
                params,
                callee,
                body,
            } => {
                let parser = Parser::new(template.name(), params.trim());
                let source = parser.source().clone();
                let params = parser.parse_param_list().map_err(expression)?;
                let callee = self.code(callee, line)?;
                self.block(
                    Op::Call {
                        name: name.clone(),
                        params,
                        source,
                        callee,
                        end: 0,
                    },
                    line,
                    body,
                )?;
            }
            IrKind::Attr {
                name,
                value,
                guard,
                mode,
            } => {
                let open = self.guard(guard, line)?;
                let idx = self.open(
                    Op::Attr {
                        name: name.clone(),
                        mode: *mode,
                        end: 0,
                    },
                    line,
                );
                if value.is_empty() {
                    self.push(
                        Op::Text {
                            text: String::new(),
                            translatable: false,
                        },
                        line,
                    );
                } else {
                    self.nodes(value)?;
                }
                self.close(idx);
                if let Some(idx) = open {
                    self.close(idx);
                }
            }
            IrKind::AttrSet { attrs, guard, mode } => {
                let open = self.guard(guard, line)?;
                let attrs = self.code(attrs, line)?;
                self.push(Op::AttrSet { attrs, mode: *mode }, line);
                if let Some(idx) = open {
                    self.close(idx);
                }
            }
            IrKind::Import { href, alias } => {
                self.push(
                    Op::Import {
                        href: href.clone(),
                        alias: alias.clone(),
                    },
                    line,
                );
            }
            IrKind::Include { href } => {
                self.push(Op::Include { href: href.clone() }, line);
            }
            IrKind::Extend { href } => {
                self.push(Op::Extend { href: href.clone() }, line);
            }
            IrKind::EmbeddedCode { code, .. } => {
                let code = normalize_code(code);
                let parser = Parser::statements(template.name(), code);
                let source = parser.source().clone();
                let statements = parser.parse_statements().map_err(expression)?;
                self.push(Op::Code { statements, source }, line);
            }
            IrKind::Pass => {
                self.push(Op::Pass, line);
            }
        }
        Ok(())
    }
}

/// Dedent embedded code by the indentation of its first line.
fn normalize_code(code: &str) -> String {
    let code = code.strip_prefix("#\n").unwrap_or(code);
    let mut lines = code.lines().skip_while(|l| l.trim().is_empty()).peekable();
    let prefix_len = lines
        .peek()
        .map_or(0, |first| first.len() - first.trim_start().len());
    lines
        .map(|line| {
            let indent = line.len() - line.trim_start().len();
            &line[indent.min(prefix_len)..]
        })
        .collect::<Vec<_>>()
        .join("\n")
}
