//! The directive tree
//!
//! Both front ends produce this tree: the markup parser directly, the text
//! parser by turning its `%tag` lines into `py:*` elements. [`expand`] then
//! rewrites directive attributes into explicit wrapper elements so that the
//! compiler only ever sees one shape:
//!
//! ```text
//! <li py:for="x in xs" py:if="x">$x</li>
//!             ↓
//! <py:for each="x in xs"><py:if test="x"><li>$x</li></py:if></py:for>
//! ```

use crate::error::{CompileError, TemplateSource};
use miette::Result;

/// Directive attributes in wrapping order (outermost first), with the name of
/// the attribute the wrapper element carries.
pub const DIRECTIVES: &[(&str, &str)] = &[
    ("def", "function"),
    ("call", "function"),
    ("case", "value"),
    ("else", ""),
    ("for", "each"),
    ("if", "test"),
    ("switch", "test"),
    ("with", "vars"),
    ("replace", "value"),
    ("block", "name"),
    ("extends", "href"),
];

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub name: String,
    /// Attributes in document order
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
    pub line: usize,
}

impl Element {
    pub fn new(name: impl Into<String>, line: usize) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
            line,
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((name, value)),
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let idx = self.attrs.iter().position(|(k, _)| k == name)?;
        Some(self.attrs.remove(idx).1)
    }

    /// The directive this element stands for, if it is a `py:*` directive tag.
    pub fn directive(&self) -> Option<&str> {
        let name = self.name.strip_prefix("py:")?;
        DIRECTIVES
            .iter()
            .any(|(d, _)| *d == name)
            .then_some(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    /// Character data. Markup text is kept escaped (`&lt;`), except inside a
    /// CDATA section (`cdata`), where it is raw.
    Text {
        text: String,
        line: usize,
        cdata: bool,
    },
    Comment {
        text: String,
        line: usize,
    },
    /// A processing instruction such as `<?py x = 1?>`
    Pi {
        target: String,
        data: String,
        line: usize,
    },
}

impl Node {
    pub fn text(text: impl Into<String>, line: usize) -> Self {
        Node::Text {
            text: text.into(),
            line,
            cdata: false,
        }
    }

    pub fn line(&self) -> usize {
        match self {
            Node::Element(el) => el.line,
            Node::Text { line, .. } | Node::Comment { line, .. } | Node::Pi { line, .. } => *line,
        }
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(el) => Some(el),
            _ => None,
        }
    }
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Top-level nodes; markup documents have exactly one element here,
    /// possibly surrounded by comments and processing instructions
    pub root: Vec<Node>,
    /// The declaration cut from the source, if any
    pub doctype: Option<String>,
}

/// Rewrite directive attributes into wrapper elements.
///
/// Elements named in `autoblocks` become `py:block` elements named after the
/// tag, unless they carry `py:autoblock="False"`.
pub fn expand(document: Document, autoblocks: &[String], source: &TemplateSource) -> Result<Document> {
    let expander = Expander { autoblocks, source };
    let root = document
        .root
        .into_iter()
        .map(|node| expander.node(node))
        .collect::<Result<Vec<_>>>()?;
    Ok(Document {
        root,
        doctype: document.doctype,
    })
}

struct Expander<'a> {
    autoblocks: &'a [String],
    source: &'a TemplateSource,
}

impl Expander<'_> {
    fn node(&self, node: Node) -> Result<Node> {
        match node {
            Node::Element(el) => self.element(el),
            other => Ok(other),
        }
    }

    fn children(&self, children: Vec<Node>) -> Result<Vec<Node>> {
        children.into_iter().map(|c| self.node(c)).collect()
    }

    fn element(&self, mut el: Element) -> Result<Node> {
        if el.directive().is_some() {
            el.children = self.children(el.children)?;
            return Ok(Node::Element(el));
        }

        if el.name != "py:nop"
            && let Some(href) = el.remove_attr("py:extends")
        {
            let extends = Element::new("py:extends", el.line).with_attr("href", href);
            el.children.insert(0, Node::Element(extends));
        }

        for (directive, attr) in DIRECTIVES {
            let qualified = format!("py:{directive}");
            let Some(value) = el.remove_attr(&qualified) else {
                continue;
            };
            let mut wrapper = Element::new(qualified, el.line);
            if !attr.is_empty() {
                wrapper.set_attr(*attr, value);
            }
            wrapper.children = vec![self.element(el)?];
            return Ok(Node::Element(wrapper));
        }

        if self.is_autoblock(&mut el)? {
            let mut block = Element::new("py:block", el.line).with_attr("name", el.name.clone());
            block.children = self.children(el.children)?;
            return Ok(Node::Element(block));
        }

        el.children = self.children(el.children)?;
        Ok(Node::Element(el))
    }

    fn is_autoblock(&self, el: &mut Element) -> Result<bool> {
        if !self.autoblocks.iter().any(|name| *name == el.name) {
            return Ok(false);
        }
        match el.remove_attr("py:autoblock") {
            None => Ok(true),
            Some(flag) if flag.eq_ignore_ascii_case("true") => Ok(true),
            Some(flag) if flag.eq_ignore_ascii_case("false") => Ok(false),
            Some(_) => Err(CompileError::at_line(
                self.source,
                el.line,
                "py:autoblock is evaluated at compile time and only accepts True/False constants",
            )
            .into()),
        }
    }
}
