//! Intermediate representation
//!
//! The compiler turns a directive tree into these nodes. Each node keeps the
//! template position it came from so render errors can point back at it.

use crate::doctype::Mode;
use std::sync::Arc;

/// Where a node came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Pos {
    pub filename: Arc<str>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IrNode {
    pub kind: IrKind,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IrKind {
    /// Literal output. `guard` is an expression that must be truthy for the
    /// text to be written (used by `py:strip`).
    Text {
        text: String,
        guard: Option<String>,
        /// Passed through `gettext` at render time
        translatable: bool,
        /// Never merged with its neighbours
        verbatim: bool,
    },
    Expr {
        code: String,
        escape: bool,
    },
    For {
        each: String,
        body: Vec<IrNode>,
    },
    If {
        test: String,
        body: Vec<IrNode>,
    },
    Else {
        body: Vec<IrNode>,
    },
    Switch {
        test: String,
        body: Vec<IrNode>,
    },
    Case {
        value: String,
        body: Vec<IrNode>,
    },
    With {
        vars: String,
        body: Vec<IrNode>,
    },
    /// A template function: `__main__`, a `py:def` or a block. Only
    /// appears at the top of [`TemplateIr::defs`].
    Def {
        decl: String,
        body: Vec<IrNode>,
    },
    /// A function nested in another function body
    InnerDef {
        decl: String,
        body: Vec<IrNode>,
    },
    /// `py:call`: `name(params)` is defined from `body`, then `callee` is
    /// evaluated and written.
    Call {
        name: String,
        params: String,
        callee: String,
        body: Vec<IrNode>,
    },
    /// One attribute. `value` holds text and unescaped expressions.
    Attr {
        name: String,
        value: Vec<IrNode>,
        guard: Option<String>,
        mode: Mode,
    },
    /// `py:attrs`
    AttrSet {
        attrs: String,
        guard: Option<String>,
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
    /// `<?py ...?>`; module-level code runs once per template instance.
    EmbeddedCode {
        code: String,
        module_level: bool,
    },
    /// An empty body
    Pass,
}

impl IrNode {
    pub fn new(kind: IrKind, pos: Pos) -> Self {
        Self { kind, pos }
    }

    pub fn text(text: impl Into<String>, pos: Pos) -> Self {
        Self::new(
            IrKind::Text {
                text: text.into(),
                guard: None,
                translatable: false,
                verbatim: false,
            },
            pos,
        )
    }

    /// Child nodes, for kinds that have them.
    pub fn body(&self) -> Option<&[IrNode]> {
        match &self.kind {
            IrKind::For { body, .. }
            | IrKind::If { body, .. }
            | IrKind::Else { body }
            | IrKind::Switch { body, .. }
            | IrKind::Case { body, .. }
            | IrKind::With { body, .. }
            | IrKind::Def { body, .. }
            | IrKind::InnerDef { body, .. }
            | IrKind::Call { body, .. } => Some(body),
            IrKind::Attr { value, .. } => Some(value),
            _ => None,
        }
    }

    fn body_mut(&mut self) -> Option<&mut Vec<IrNode>> {
        match &mut self.kind {
            IrKind::For { body, .. }
            | IrKind::If { body, .. }
            | IrKind::Else { body }
            | IrKind::Switch { body, .. }
            | IrKind::Case { body, .. }
            | IrKind::With { body, .. }
            | IrKind::Def { body, .. }
            | IrKind::InnerDef { body, .. }
            | IrKind::Call { body, .. } => Some(body),
            IrKind::Attr { value, .. } => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateIr {
    /// [`IrKind::Def`] nodes: `__main__` first, then the rest in
    /// definition order
    pub defs: Vec<IrNode>,
    /// Module-level code
    pub module: Vec<IrNode>,
    pub mode: Mode,
}

/// Join runs of plain text with the same guard.
pub fn merge_text(nodes: Vec<IrNode>) -> Vec<IrNode> {
    let mut out: Vec<IrNode> = Vec::with_capacity(nodes.len());
    for mut node in nodes {
        if let Some(body) = node.body_mut() {
            *body = merge_text(std::mem::take(body));
        }
        if let (
            Some(IrNode {
                kind:
                    IrKind::Text {
                        text: previous,
                        guard: previous_guard,
                        translatable: false,
                        verbatim: false,
                    },
                ..
            }),
            IrKind::Text {
                text,
                guard,
                translatable: false,
                verbatim: false,
            },
        ) = (out.last_mut(), &node.kind)
            && previous_guard == guard
        {
            previous.push_str(text);
            continue;
        }
        out.push(node);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos() -> Pos {
        Pos {
            filename: Arc::from("t.xml"),
            line: 1,
        }
    }

    fn guarded(text: &str, guard: Option<&str>) -> IrNode {
        IrNode::new(
            IrKind::Text {
                text: text.to_string(),
                guard: guard.map(String::from),
                translatable: false,
                verbatim: false,
            },
            pos(),
        )
    }

    #[test]
    fn test_merge_adjacent_text() {
        let merged = merge_text(vec![
            IrNode::text("<a", pos()),
            IrNode::text(">", pos()),
            guarded("</a>", Some("x")),
            guarded("!", Some("x")),
        ]);
        assert_eq!(merged, vec![IrNode::text("<a>", pos()), guarded("</a>!", Some("x"))]);
    }

    #[test]
    fn test_merge_keeps_translatable_and_exprs_apart() {
        let translatable = IrNode::new(
            IrKind::Text {
                text: "Hello".to_string(),
                guard: None,
                translatable: true,
                verbatim: false,
            },
            pos(),
        );
        let expr = IrNode::new(
            IrKind::Expr {
                code: "x".to_string(),
                escape: true,
            },
            pos(),
        );
        let nodes = vec![
            IrNode::text("<p>", pos()),
            translatable.clone(),
            IrNode::text("</p>", pos()),
            expr.clone(),
            IrNode::text("a", pos()),
        ];
        assert_eq!(merge_text(nodes.clone()), nodes);
    }

    #[test]
    fn test_merge_recurses_into_bodies() {
        let node = IrNode::new(
            IrKind::If {
                test: "x".to_string(),
                body: vec![IrNode::text("a", pos()), IrNode::text("b", pos())],
            },
            pos(),
        );
        let merged = merge_text(vec![node]);
        assert_eq!(merged[0].body(), Some(&[IrNode::text("ab", pos())][..]));
    }
}
