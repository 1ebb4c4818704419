//! Error types with rich diagnostics
//!
//! Expression errors point into the expression text they came from. Structural
//! errors point at the template line that produced them.

use miette::{Diagnostic, NamedSource, SourceSpan};
use std::sync::Arc;
use thiserror::Error;

/// Named source text shared between the parser, evaluator and diagnostics.
#[derive(Debug, Clone)]
pub struct TemplateSource {
    name: Arc<str>,
    text: Arc<String>,
}

impl TemplateSource {
    pub fn new(name: impl AsRef<str>, text: impl Into<String>) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            text: Arc::new(text.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn named_source(&self) -> NamedSource<String> {
        NamedSource::new(self.name.to_string(), self.text.to_string())
    }

    /// Span covering line `line` (1-based), without its newline.
    pub fn line_span(&self, line: usize) -> SourceSpan {
        let mut offset = 0;
        for (idx, text) in self.text.split('\n').enumerate() {
            if idx + 1 == line {
                return SourceSpan::new(offset.into(), text.len());
            }
            offset += text.len() + 1;
        }
        SourceSpan::new(self.text.len().into(), 0)
    }
}

/// 1-based line and column of a byte offset.
pub fn line_col(text: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(text.len());
    let before = &text[..offset];
    let line = before.matches('\n').count() + 1;
    let column = match before.rfind('\n') {
        Some(nl) => before[nl + 1..].chars().count() + 1,
        None => before.chars().count() + 1,
    };
    (line, column)
}

// ============================================================================
// Expression language
// ============================================================================

#[derive(Error, Debug, Diagnostic)]
#[error("Syntax error: found {found}, expected {expected}")]
#[diagnostic(code(cardamome::syntax))]
pub struct SyntaxError {
    pub found: String,
    pub expected: String,
    #[label("unexpected {found}")]
    pub span: SourceSpan,
    #[source_code]
    pub src: NamedSource<String>,
}

#[derive(Error, Debug, Diagnostic)]
#[error("Undefined name: {name}")]
#[diagnostic(code(cardamome::undefined), help("available names: {available:?}"))]
pub struct UndefinedError {
    pub name: String,
    pub available: Vec<String>,
    #[label("not defined")]
    pub span: SourceSpan,
    #[source_code]
    pub src: NamedSource<String>,
}

#[derive(Error, Debug, Diagnostic)]
#[error("Type error: expected {expected}, found {found} in {context}")]
#[diagnostic(code(cardamome::type_error))]
pub struct TypeError {
    pub expected: String,
    pub found: String,
    pub context: String,
    #[label("this is a {found}")]
    pub span: SourceSpan,
    #[source_code]
    pub src: NamedSource<String>,
}

#[derive(Error, Debug, Diagnostic)]
#[error("Unknown field `{field}` on {base_type}")]
#[diagnostic(code(cardamome::unknown_field), help("known fields: {known_fields:?}"))]
pub struct UnknownFieldError {
    pub base_type: String,
    pub field: String,
    pub known_fields: Vec<String>,
    #[label("no such field")]
    pub span: SourceSpan,
    #[source_code]
    pub src: NamedSource<String>,
}

#[derive(Error, Debug, Diagnostic)]
#[error("Unknown filter `{name}`")]
#[diagnostic(code(cardamome::unknown_filter), help("known filters: {known_filters:?}"))]
pub struct UnknownFilterError {
    pub name: String,
    pub known_filters: Vec<String>,
    #[label("unknown filter")]
    pub span: SourceSpan,
    #[source_code]
    pub src: NamedSource<String>,
}

#[derive(Error, Debug, Diagnostic)]
#[error("Bad arguments: {message}")]
#[diagnostic(code(cardamome::arguments))]
pub struct ArgumentError {
    pub message: String,
    #[label("in this call")]
    pub span: SourceSpan,
    #[source_code]
    pub src: NamedSource<String>,
}

// ============================================================================
// Templates
// ============================================================================

/// Malformed markup.
#[derive(Error, Debug, Diagnostic)]
#[error("{filename}:{line}: {message}")]
#[diagnostic(code(cardamome::parse))]
pub struct ParseError {
    pub message: String,
    pub filename: String,
    pub line: usize,
    #[label("here")]
    pub span: SourceSpan,
    #[source_code]
    pub src: NamedSource<String>,
}

impl ParseError {
    pub fn at(source: &TemplateSource, offset: usize, message: impl Into<String>) -> Self {
        let (line, _) = line_col(source.text(), offset);
        Self {
            message: message.into(),
            filename: source.name().to_string(),
            line,
            span: SourceSpan::new(offset.min(source.text().len()).into(), 0),
            src: source.named_source(),
        }
    }
}

/// Invalid directive structure or inline expression.
#[derive(Error, Debug, Diagnostic)]
#[error("{filename}:{line}:{column}: {message}")]
#[diagnostic(code(cardamome::compile))]
pub struct CompileError {
    pub message: String,
    pub filename: String,
    pub line: usize,
    pub column: usize,
    #[label("{message}")]
    pub span: SourceSpan,
    #[source_code]
    pub src: NamedSource<String>,
    #[related]
    pub related: Vec<SyntaxError>,
}

impl CompileError {
    pub fn at_line(source: &TemplateSource, line: usize, message: impl Into<String>) -> Self {
        let span = source.line_span(line);
        let snippet = &source.text()[span.offset()..span.offset() + span.len()];
        let column = snippet.len() - snippet.trim_start().len() + 1;
        Self {
            message: message.into(),
            filename: source.name().to_string(),
            line,
            column,
            span,
            src: source.named_source(),
            related: Vec::new(),
        }
    }

    /// Wrap an expression parse failure reported for `line`.
    pub fn from_expression(source: &TemplateSource, line: usize, report: miette::Report) -> Self {
        match report.downcast::<SyntaxError>() {
            Ok(syntax) => {
                let mut err = Self::at_line(source, line, syntax.to_string());
                err.related.push(syntax);
                err
            }
            Err(other) => Self::at_line(source, line, other.to_string()),
        }
    }
}

/// An expression failed while rendering.
#[derive(Error, Debug, Clone, Diagnostic)]
#[error("{filename}:{line}: {message}")]
#[diagnostic(code(cardamome::render))]
pub struct RenderError {
    pub message: String,
    pub filename: String,
    pub line: usize,
    #[help]
    pub help: Option<String>,
    #[label("failed here")]
    pub span: Option<SourceSpan>,
    #[source_code]
    pub src: NamedSource<String>,
}

impl RenderError {
    /// Attach a template position to an evaluation failure. Errors that
    /// already carry a position pass through untouched.
    pub fn annotate(report: miette::Report, filename: &str, line: usize, src: &TemplateSource) -> miette::Report {
        if report.downcast_ref::<RenderError>().is_some()
            || report.downcast_ref::<LoaderError>().is_some()
            || report.downcast_ref::<CompileError>().is_some()
            || report.downcast_ref::<ParseError>().is_some()
        {
            return report;
        }
        let span = report
            .labels()
            .and_then(|mut labels| labels.next())
            .map(|label| *label.inner());
        let help = report.help().map(|h| h.to_string());
        tracing::warn!(filename, line, error = %report, "render failed");
        RenderError {
            message: report.to_string(),
            filename: filename.to_string(),
            line,
            help,
            span,
            src: src.named_source(),
        }
        .into()
    }
}

/// Template lookup failures.
#[derive(Error, Debug, Diagnostic)]
pub enum LoaderError {
    #[error("{name} not found in any of {paths:?}")]
    #[diagnostic(code(cardamome::loader::not_found))]
    NotFound { name: String, paths: Vec<String> },

    #[error("don't know how to load {name}: unknown extension")]
    #[diagnostic(
        code(cardamome::loader::extension),
        help("known extensions: txt, xml, html, html5")
    )]
    UnknownExtension { name: String },

    #[error("failed to read {path}")]
    #[diagnostic(code(cardamome::loader::io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
