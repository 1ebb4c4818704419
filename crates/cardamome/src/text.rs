//! Text template front end
//!
//! Turns a text template into the same directive tree the markup front end
//! produces, so both share one compiler:
//!
//! ```text
//! %for item in items              <py:for each="item in items">
//! - $item                    →      - $item
//! %end                            </py:for>
//! ```
//!
//! Tags are written either as `%tag body` at the start of a line (blank lines
//! and indentation in front of it are swallowed, as is the line break after
//! it) or inline as `{%tag body%}`. `{%-tag%}` at the start of a line also
//! swallows the indentation before it, and a body ending in `-` swallows the
//! spaces and tabs after the tag.

use crate::error::{CompileError, TemplateSource};
use crate::scan;
use crate::tree::{Document, Element, Node};
use miette::Result;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Text { text: String, line: usize },
    Tag { name: String, body: String, line: usize },
}

/// Parse a text template into a directive tree.
pub fn parse(source: &TemplateSource) -> Result<Document> {
    let tokens = tokenize(source)?;
    let mut builder = Builder {
        tokens: tokens.into_iter().rev().collect(),
        source,
    };
    let (root, stop) = builder.body(&[])?;
    if let Some((name, _, line)) = stop {
        return Err(CompileError::at_line(source, line, format!("unexpected %{name}")).into());
    }
    tracing::trace!(name = source.name(), "parsed text template");
    Ok(Document {
        root,
        doctype: None,
    })
}

struct Tokenizer<'a> {
    source: &'a TemplateSource,
    text: &'a str,
    pos: usize,
    tokens: Vec<Token>,
    pending: String,
    pending_line: usize,
    /// Line of `pos`
    line: usize,
    /// Offset `line` was computed for
    line_pos: usize,
}

fn tokenize(source: &TemplateSource) -> Result<Vec<Token>> {
    let mut tokenizer = Tokenizer {
        source,
        text: source.text(),
        pos: 0,
        tokens: Vec::new(),
        pending: String::new(),
        pending_line: 1,
        line: 1,
        line_pos: 0,
    };
    tokenizer.run()?;
    Ok(tokenizer.tokens)
}

impl Tokenizer<'_> {
    fn line_at(&mut self, offset: usize) -> usize {
        self.line += self.text[self.line_pos..offset].matches('\n').count();
        self.line_pos = offset;
        self.line
    }

    fn error(&self, offset: usize, message: impl Into<String>) -> miette::Report {
        let (line, _) = crate::error::line_col(self.text, offset);
        CompileError::at_line(self.source, line, message).into()
    }

    fn push_char(&mut self, c: char) {
        if self.pending.is_empty() {
            self.pending_line = self.line_at(self.pos);
        }
        self.pending.push(c);
    }

    fn push_str(&mut self, s: &str) {
        if self.pending.is_empty() {
            self.pending_line = self.line_at(self.pos);
        }
        self.pending.push_str(s);
    }

    fn flush(&mut self) {
        if !self.pending.is_empty() {
            self.tokens.push(Token::Text {
                text: std::mem::take(&mut self.pending),
                line: self.pending_line,
            });
        }
    }

    fn run(&mut self) -> Result<()> {
        let bytes = self.text.as_bytes();
        while self.pos < bytes.len() {
            if (self.pos == 0 || bytes[self.pos - 1] == b'\n') && self.line_start_tag()? {
                continue;
            }
            match bytes[self.pos] {
                b'{' if bytes.get(self.pos + 1) == Some(&b'%') => {
                    let start = self.pos;
                    let name_start = if bytes.get(self.pos + 2) == Some(&b'-') {
                        self.pos + 3
                    } else {
                        self.pos + 2
                    };
                    if !bytes.get(name_start).is_some_and(u8::is_ascii_alphabetic) {
                        return Err(self.error(start, "invalid tag: expected a tag name after `{%`"));
                    }
                    self.flush();
                    self.inline_tag(start, name_start)?;
                }
                b'$' => match bytes.get(self.pos + 1) {
                    Some(b'$') => {
                        self.push_str("$$");
                        self.pos += 2;
                    }
                    Some(b'{') => {
                        let end = scan::braced_end(self.text, self.pos + 1)
                            .ok_or_else(|| self.error(self.pos, "Braced expression not terminated"))?;
                        let expr = &self.text[self.pos..end];
                        self.push_str(expr);
                        self.pos = end;
                    }
                    _ => {
                        self.push_char('$');
                        self.pos += 1;
                    }
                },
                b'\\' => {
                    let Some(next) = self.text[self.pos + 1..].chars().next() else {
                        self.push_char('\\');
                        self.pos += 1;
                        continue;
                    };
                    match next {
                        '\n' => {}
                        '$' => self.push_str("$$"),
                        c => self.push_char(c),
                    }
                    self.pos += 1 + next.len_utf8();
                }
                _ => {
                    let Some(c) = self.text[self.pos..].chars().next() else {
                        break;
                    };
                    self.push_char(c);
                    self.pos += c.len_utf8();
                }
            }
        }
        self.flush();
        Ok(())
    }

    /// Handle `%tag` and `{%-tag%}` at the start of a line. Returns whether a
    /// tag was consumed.
    fn line_start_tag(&mut self) -> Result<bool> {
        let bytes = self.text.as_bytes();
        let mut at = self.pos;
        while at < bytes.len() && bytes[at].is_ascii_whitespace() {
            at += 1;
        }
        let rest = &bytes[at..];
        if rest.first() == Some(&b'%') && rest.get(1).is_some_and(u8::is_ascii_alphabetic) {
            self.flush();
            let name_end = tag_name_end(self.text, at + 1);
            let body_end = self.text[name_end..]
                .find('\n')
                .map_or(self.text.len(), |i| name_end + i);
            let line = self.line_at(at);
            self.tokens.push(Token::Tag {
                name: self.text[at + 1..name_end].to_string(),
                body: self.text[name_end..body_end].trim().to_string(),
                line,
            });
            self.pos = (body_end + 1).min(self.text.len());
            return Ok(true);
        }
        if rest.starts_with(b"{%-") && rest.get(3).is_some_and(u8::is_ascii_alphabetic) {
            self.flush();
            self.inline_tag(at, at + 3)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn inline_tag(&mut self, start: usize, name_start: usize) -> Result<()> {
        let name_end = tag_name_end(self.text, name_start);
        let close = self.text[name_end..]
            .find("%}")
            .map(|i| name_end + i)
            .ok_or_else(|| self.error(start, "tag not terminated: missing `%}`"))?;
        let mut body = &self.text[name_end..close];
        self.pos = close + 2;
        if let Some(stripped) = body.strip_suffix('-') {
            body = stripped;
            let bytes = self.text.as_bytes();
            while self.pos < bytes.len() && matches!(bytes[self.pos], b' ' | b'\t') {
                self.pos += 1;
            }
        }
        let line = self.line_at(start);
        self.tokens.push(Token::Tag {
            name: self.text[name_start..name_end].to_string(),
            body: body.trim().to_string(),
            line,
        });
        Ok(())
    }
}

fn tag_name_end(text: &str, start: usize) -> usize {
    let bytes = text.as_bytes();
    let mut end = start;
    while end < bytes.len() && bytes[end].is_ascii_alphabetic() {
        end += 1;
    }
    end
}

/// The tag that ended a body: name, body text and line.
type Stop = Option<(String, String, usize)>;

struct Builder<'a> {
    /// Remaining tokens, next one last
    tokens: Vec<Token>,
    source: &'a TemplateSource,
}

impl Builder<'_> {
    fn error(&self, line: usize, message: impl Into<String>) -> miette::Report {
        CompileError::at_line(self.source, line, message).into()
    }

    fn push_back(&mut self, (name, body, line): (String, String, usize)) {
        self.tokens.push(Token::Tag { name, body, line });
    }

    /// Parse nodes until one of `stops` (returned, not consumed) or the end
    /// of input.
    fn body(&mut self, stops: &[&str]) -> Result<(Vec<Node>, Stop)> {
        let mut nodes = Vec::new();
        while let Some(token) = self.tokens.pop() {
            match token {
                Token::Text { text, line } => nodes.push(Node::text(text, line)),
                Token::Tag { name, body, line } => {
                    if stops.contains(&name.as_str()) {
                        return Ok((nodes, Some((name, body, line))));
                    }
                    nodes.extend(self.tag(&name, body, line)?);
                }
            }
        }
        Ok((nodes, None))
    }

    /// A body that must be closed by `%end`.
    fn block(&mut self, tag: &str, line: usize) -> Result<Vec<Node>> {
        match self.body(&["end"])? {
            (nodes, Some(_)) => Ok(nodes),
            (_, None) => Err(self.error(line, format!("%{tag} is never closed with %end"))),
        }
    }

    fn tag(&mut self, name: &str, body: String, line: usize) -> Result<Option<Node>> {
        let element = |directive: &str| Element::new(format!("py:{directive}"), line);
        let node = match name {
            "for" => {
                let mut el = element("for").with_attr("each", body);
                el.children = self.block(name, line)?;
                el
            }
            "if" => {
                let mut el = element("if").with_attr("test", body);
                let (children, stop) = self.body(&["end", "else"])?;
                match stop {
                    Some(stop) if stop.0 == "else" => self.push_back(stop),
                    Some(_) => {}
                    None => return Err(self.error(line, "%if is never closed with %end")),
                }
                el.children = children;
                el
            }
            "else" => {
                let mut el = element("else");
                el.children = self.block(name, line)?;
                el
            }
            "switch" => {
                let mut el = element("switch").with_attr("test", body);
                let (mut children, stop) = self.body(&["end", "else"])?;
                match stop {
                    // The fallback branch's `%end` closes the switch too
                    Some((stop_name, _, else_line)) if stop_name == "else" => {
                        let mut fallback = Element::new("py:else", else_line);
                        fallback.children = self.block("else", else_line)?;
                        children.push(Node::Element(fallback));
                    }
                    Some(_) => {}
                    None => return Err(self.error(line, "%switch is never closed with %end")),
                }
                el.children = children;
                el
            }
            "case" => {
                let mut el = element("case").with_attr("value", body);
                let (children, stop) = self.body(&["case", "else", "end"])?;
                match stop {
                    Some(stop) => self.push_back(stop),
                    None => return Err(self.error(line, "%case is never closed with %end")),
                }
                el.children = children;
                el
            }
            "def" => {
                let mut el = element("def").with_attr("function", body);
                el.children = self.block(name, line)?;
                el
            }
            "call" => {
                let (args, callee) = split_call(&body)
                    .ok_or_else(|| self.error(line, "%call expects `(args) callee`"))?;
                let mut el = element("call")
                    .with_attr("args", args)
                    .with_attr("function", callee);
                el.children = self.block(name, line)?;
                el
            }
            "import" => {
                let words = shell_words(&body);
                match words.as_slice() {
                    [href] => element("import").with_attr("href", href.as_str()),
                    [href, as_, alias] if as_ == "as" => element("import")
                        .with_attr("href", href.as_str())
                        .with_attr("alias", alias.as_str()),
                    _ => return Err(self.error(line, "%import expects `\"file\" [as alias]`")),
                }
            }
            "include" | "extends" => match shell_words(&body).as_slice() {
                [href] => element(name).with_attr("href", href.as_str()),
                _ => return Err(self.error(line, format!("%{name} expects a single file name"))),
            },
            "block" => {
                let mut el = element("block").with_attr("name", body);
                el.children = self.block(name, line)?;
                el
            }
            "py" => {
                let code = if body.is_empty() {
                    let mut code = String::new();
                    for node in self.block(name, line)? {
                        match node {
                            Node::Text { text, .. } => code.push_str(&text.replace("$$", "$")),
                            _ => return Err(self.error(line, "%py blocks may only contain code")),
                        }
                    }
                    code
                } else {
                    body
                };
                return Ok(Some(Node::Pi {
                    target: "py".to_string(),
                    data: code,
                    line,
                }));
            }
            "end" => return Err(self.error(line, "unexpected %end")),
            other => return Err(self.error(line, format!("unknown tag %{other}"))),
        };
        Ok(Some(Node::Element(node)))
    }
}

/// `(a, b) callee(%caller)` → (`a, b`, `callee(%caller)`)
fn split_call(body: &str) -> Option<(String, String)> {
    let open = body.find('(')?;
    let close = open + body[open..].find(')')?;
    Some((
        body[open + 1..close].trim().to_string(),
        body[close + 1..].trim().to_string(),
    ))
}

/// Whitespace-separated words; single or double quotes group a word.
fn shell_words(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote = None;
    for c in text.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_word = true;
            }
            None if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            None => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn parse_str(s: &str) -> Result<Document> {
        parse(&TemplateSource::new("test.txt", s))
    }

    fn tokens(s: &str) -> Vec<Token> {
        tokenize(&TemplateSource::new("test.txt", s)).unwrap()
    }

    fn tag(name: &str, body: &str, line: usize) -> Token {
        Token::Tag {
            name: name.to_string(),
            body: body.to_string(),
            line,
        }
    }

    fn text(t: &str, line: usize) -> Token {
        Token::Text {
            text: t.to_string(),
            line,
        }
    }

    #[test]
    fn test_line_tags() {
        let toks = tokens(indoc! {"
            %for i in range(2)
            $i
            %end
        "});
        assert_eq!(
            toks,
            vec![tag("for", "i in range(2)", 1), text("$i\n", 2), tag("end", "", 3)]
        );
    }

    #[test]
    fn test_blank_lines_before_line_tag_are_dropped() {
        let toks = tokens("a\n\n   %end\nb");
        assert_eq!(toks, vec![text("a\n", 1), tag("end", "", 3), text("b", 4)]);
    }

    #[test]
    fn test_inline_tags_and_rstrip() {
        let toks = tokens("x{%if a-%}   y{%end%}");
        assert_eq!(
            toks,
            vec![text("x", 1), tag("if", "a", 1), text("y", 1), tag("end", "", 1)]
        );
    }

    #[test]
    fn test_ljust_tag() {
        let toks = tokens("a\n    {%-end%}b");
        assert_eq!(toks, vec![text("a\n", 1), tag("end", "", 2), text("b", 2)]);
    }

    #[test]
    fn test_backslash_escapes() {
        let toks = tokens("a\\\nb\\%c \\$x");
        assert_eq!(toks, vec![text("ab%c $$x", 1)]);
    }

    #[test]
    fn test_percent_in_text_is_literal() {
        assert_eq!(tokens("100% sure"), vec![text("100% sure", 1)]);
        assert_eq!(tokens("%5 off"), vec![text("%5 off", 1)]);
    }

    #[test]
    fn test_braced_expression_may_contain_tag_markers() {
        assert_eq!(tokens("${'{%'}"), vec![text("${'{%'}", 1)]);
    }

    #[test]
    fn test_if_else_tree() {
        let doc = parse_str("{%if x%}a{%else%}b{%end%}").unwrap();
        let names: Vec<_> = doc.root.iter().filter_map(Node::as_element).map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["py:if", "py:else"]);
        assert_eq!(doc.root[0].as_element().unwrap().attr("test"), Some("x"));
    }

    #[test]
    fn test_switch_tree() {
        let doc = parse_str("{%switch n%}{%case 0%}zero{%case 1%}one{%else%}many{%end%}!").unwrap();
        let switch = doc.root[0].as_element().unwrap();
        assert_eq!(switch.name, "py:switch");
        let names: Vec<_> = switch.children.iter().filter_map(Node::as_element).map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["py:case", "py:case", "py:else"]);
        assert_eq!(doc.root[1], Node::text("!", 1));
    }

    #[test]
    fn test_call_import_py() {
        let doc = parse_str(indoc! {r#"
            %import "lib.txt" as lib
            %call(x) lib.each([1, 2], %caller)
            [$x]
            %end
            %py y = 1
        "#})
        .unwrap();
        let import = doc.root[0].as_element().unwrap();
        assert_eq!(import.attr("href"), Some("lib.txt"));
        assert_eq!(import.attr("alias"), Some("lib"));
        let call = doc.root[1].as_element().unwrap();
        assert_eq!(call.attr("args"), Some("x"));
        assert_eq!(call.attr("function"), Some("lib.each([1, 2], %caller)"));
        assert_eq!(
            doc.root[2],
            Node::Pi {
                target: "py".to_string(),
                data: "y = 1".to_string(),
                line: 5
            }
        );
    }

    #[test]
    fn test_py_block() {
        let doc = parse_str("%py\n  a = 1\n  b = 2\n%end\n").unwrap();
        assert_eq!(
            doc.root[0],
            Node::Pi {
                target: "py".to_string(),
                data: "  a = 1\n  b = 2\n".to_string(),
                line: 1
            }
        );
    }

    #[test]
    fn test_unclosed_block() {
        let err = parse_str("%for x in y\n$x\n").unwrap_err();
        assert!(err.to_string().contains("never closed"));
    }

    #[test]
    fn test_stray_end() {
        let err = parse_str("a\n%end\n").unwrap_err();
        assert!(err.to_string().contains("unexpected %end"));
    }

    #[test]
    fn test_unknown_tag() {
        assert!(parse_str("%endfor\n").is_err());
    }

    #[test]
    fn test_shell_words() {
        assert_eq!(shell_words(r#""a b.txt" as  c"#), vec!["a b.txt", "as", "c"]);
        assert_eq!(shell_words("'x'"), vec!["x"]);
    }
}
