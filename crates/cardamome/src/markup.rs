//! Markup front end
//!
//! Parses an XML template into a [`Document`] with quick-xml. HTML named
//! entities are accepted everywhere (`&nbsp;` becomes U+00A0), but character
//! data is stored re-escaped, so `&lt;` stays `&lt;` in the output.

use crate::doctype;
use crate::error::{ParseError, TemplateSource};
use crate::tree::{Document, Element, Node};
use miette::Result;
use quick_xml::Reader;
use quick_xml::escape::{partial_escape, resolve_html5_entity, resolve_xml_entity, unescape_with};
use quick_xml::events::{BytesStart, Event};

/// Byte offset to line number lookup.
struct Lines {
    starts: Vec<usize>,
}

impl Lines {
    fn new(text: &str) -> Self {
        let starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { starts }
    }

    /// 1-based line containing `offset`
    fn at(&self, offset: usize) -> usize {
        match self.starts.binary_search(&offset) {
            Ok(idx) => idx + 1,
            Err(idx) => idx,
        }
    }
}

fn resolve_entity(name: &str) -> Option<&'static str> {
    resolve_xml_entity(name).or_else(|| resolve_html5_entity(name))
}

/// Parse markup into a directive tree.
pub fn parse(source: &TemplateSource) -> Result<Document> {
    let (doctype, text) = doctype::extract_dtd(source.text());
    let lines = Lines::new(&text);
    let mut reader = Reader::from_str(&text);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Vec<Node> = Vec::new();
    let mut seen_root = false;

    let error = |offset: u64, message: String| ParseError::at(source, offset as usize, message);

    loop {
        let offset = reader.buffer_position();
        let line = lines.at(offset as usize);
        let event = reader
            .read_event()
            .map_err(|e| error(reader.error_position(), e.to_string()))?;

        match event {
            Event::Start(start) => {
                if stack.is_empty() && seen_root {
                    return Err(error(offset, "junk after document element".to_string()).into());
                }
                stack.push(element(&start, line).map_err(|msg| error(offset, msg))?);
            }
            Event::Empty(start) => {
                if stack.is_empty() && seen_root {
                    return Err(error(offset, "junk after document element".to_string()).into());
                }
                let el = element(&start, line).map_err(|msg| error(offset, msg))?;
                append(&mut stack, &mut root, &mut seen_root, Node::Element(el));
            }
            Event::End(_) => {
                let Some(el) = stack.pop() else {
                    return Err(error(offset, "unexpected end tag".to_string()).into());
                };
                append(&mut stack, &mut root, &mut seen_root, Node::Element(el));
            }
            Event::Text(t) => {
                let content = t.decode().map_err(|e| error(offset, e.to_string()))?;
                push_text(&mut stack, &partial_escape(&*content), line)
                    .map_err(|msg| error(offset, msg))?;
            }
            Event::GeneralRef(r) => {
                let name = r.decode().map_err(|e| error(offset, e.to_string()))?;
                let resolved = match name.strip_prefix('#') {
                    Some(code) => char_ref(code)
                        .map(String::from)
                        .ok_or_else(|| error(offset, format!("invalid character reference &{name};")))?,
                    None => resolve_entity(&name)
                        .map(String::from)
                        .ok_or_else(|| error(offset, format!("undefined entity &{name};")))?,
                };
                push_text(&mut stack, &partial_escape(&resolved), line)
                    .map_err(|msg| error(offset, msg))?;
            }
            Event::CData(c) => {
                let content = std::str::from_utf8(c.as_ref())
                    .map_err(|e| error(offset, e.to_string()))?;
                let node = Node::Text {
                    text: content.to_string(),
                    line,
                    cdata: true,
                };
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => {
                        return Err(error(offset, "character data outside the root element".to_string()).into());
                    }
                }
            }
            Event::Comment(c) => {
                let content = std::str::from_utf8(c.as_ref())
                    .map_err(|e| error(offset, e.to_string()))?;
                let node = Node::Comment {
                    text: content.to_string(),
                    line,
                };
                append(&mut stack, &mut root, &mut seen_root, node);
            }
            Event::PI(pi) => {
                let content = std::str::from_utf8(pi.as_ref())
                    .map_err(|e| error(offset, e.to_string()))?;
                let (target, data) = content
                    .split_once(char::is_whitespace)
                    .unwrap_or((content, ""));
                let node = Node::Pi {
                    target: target.to_string(),
                    data: data.to_string(),
                    line,
                };
                append(&mut stack, &mut root, &mut seen_root, node);
            }
            Event::Decl(_) | Event::DocType(_) => {}
            Event::Eof => break,
        }
    }

    if let Some(open) = stack.last() {
        return Err(ParseError::at(
            source,
            text.len(),
            format!("unclosed element <{}>", open.name),
        )
        .into());
    }
    if !seen_root {
        return Err(ParseError::at(source, text.len(), "no element found").into());
    }
    tracing::trace!(name = source.name(), "parsed markup");
    Ok(Document { root, doctype })
}

fn element(start: &BytesStart<'_>, line: usize) -> Result<Element, String> {
    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(|e| e.to_string())?
        .to_string();
    let mut el = Element::new(name, line);
    for attr in start.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = std::str::from_utf8(attr.key.as_ref()).map_err(|e| e.to_string())?;
        let raw = std::str::from_utf8(&attr.value).map_err(|e| e.to_string())?;
        let value = unescape_with(raw, resolve_entity).map_err(|e| e.to_string())?;
        el.attrs.push((key.to_string(), value.into_owned()));
    }
    Ok(el)
}

fn append(stack: &mut [Element], root: &mut Vec<Node>, seen_root: &mut bool, node: Node) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => {
            if matches!(node, Node::Element(_)) {
                *seen_root = true;
            }
            root.push(node);
        }
    }
}

/// Append character data, joining it with the text before when an entity
/// reference split it up.
fn push_text(stack: &mut [Element], text: &str, line: usize) -> Result<(), String> {
    let Some(parent) = stack.last_mut() else {
        if text.trim().is_empty() {
            return Ok(());
        }
        return Err("text outside the root element".to_string());
    };
    match parent.children.last_mut() {
        Some(Node::Text {
            text: previous,
            cdata: false,
            ..
        }) => previous.push_str(text),
        _ => parent.children.push(Node::text(text, line)),
    }
    Ok(())
}

fn char_ref(code: &str) -> Option<char> {
    let value = match code.strip_prefix(['x', 'X']) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => code.parse().ok()?,
    };
    char::from_u32(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_str(s: &str) -> Result<Document> {
        parse(&TemplateSource::new("test.xml", s))
    }

    fn root(doc: &Document) -> &Element {
        doc.root
            .iter()
            .find_map(Node::as_element)
            .unwrap()
    }

    #[test]
    fn test_elements_and_lines() {
        let doc = parse_str("<div>\n  <p class=\"x\">hi</p>\n</div>").unwrap();
        let div = root(&doc);
        assert_eq!(div.name, "div");
        assert_eq!(div.line, 1);
        let p = div.children[1].as_element().unwrap();
        assert_eq!(p.line, 2);
        assert_eq!(p.attr("class"), Some("x"));
        assert_eq!(p.children, vec![Node::text("hi", 2)]);
    }

    #[test]
    fn test_entities() {
        let doc = parse_str("<div>Spam&nbsp;Spam &lt; Spam &amp; &#65;</div>").unwrap();
        assert_eq!(
            root(&doc).children,
            vec![Node::text("Spam\u{a0}Spam &lt; Spam &amp; A", 1)]
        );
    }

    #[test]
    fn test_attribute_entities_are_resolved() {
        let doc = parse_str("<a title=\"&quot;Ha!&quot; &hellip;\" href=\"?a=1&amp;b=2\"/>").unwrap();
        let a = root(&doc);
        assert_eq!(a.attr("title"), Some("\"Ha!\" \u{2026}"));
        assert_eq!(a.attr("href"), Some("?a=1&b=2"));
    }

    #[test]
    fn test_cdata_is_raw() {
        let doc = parse_str("<script><![CDATA[if (a < b) {}]]></script>").unwrap();
        assert_eq!(
            root(&doc).children,
            vec![Node::Text {
                text: "if (a < b) {}".to_string(),
                line: 1,
                cdata: true
            }]
        );
    }

    #[test]
    fn test_comments_and_pis() {
        let doc = parse_str("<!-- top --><x><?py a = 1?><!--! hidden --></x>").unwrap();
        assert_eq!(
            doc.root[0],
            Node::Comment {
                text: " top ".to_string(),
                line: 1
            }
        );
        let x = root(&doc);
        assert_eq!(
            x.children[0],
            Node::Pi {
                target: "py".to_string(),
                data: "a = 1".to_string(),
                line: 1
            }
        );
    }

    #[test]
    fn test_doctype_is_extracted() {
        let doc = parse_str("<!DOCTYPE html>\n<html/>").unwrap();
        assert_eq!(doc.doctype.as_deref(), Some("<!DOCTYPE html>"));
        assert_eq!(root(&doc).line, 2);
    }

    #[test]
    fn test_multiple_roots() {
        let err = parse_str("<x/><y/>").unwrap_err();
        assert!(err.to_string().contains("junk after document element"));
    }

    #[test]
    fn test_no_root() {
        let err = parse_str("<!-- a -->").unwrap_err();
        assert!(err.to_string().contains("no element found"));
    }

    #[test]
    fn test_mismatched_end_tag() {
        assert!(parse_str("<a><b></a>").is_err());
    }

    #[test]
    fn test_unknown_entity() {
        let err = parse_str("<a>&bogus;</a>").unwrap_err();
        assert!(err.to_string().contains("undefined entity"));
    }
}
