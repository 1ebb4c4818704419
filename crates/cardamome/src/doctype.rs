//! Document types and rendering modes
//!
//! A markup template's DTD decides how empty elements and boolean attributes
//! are written. The DTD is cut out of the source before parsing and put back
//! in front of the rendered output.

use std::fmt;
use std::str::FromStr;

/// How markup is serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// `<br/>`, every element closed
    #[default]
    Xml,
    /// HTML 4: optional end tags omitted, bare boolean attributes
    Html,
    /// Like `Html`; a missing doctype is written as `<!DOCTYPE html>`
    Html5,
}

impl Mode {
    pub fn is_html(self) -> bool {
        matches!(self, Mode::Html | Mode::Html5)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Xml => "xml",
            Mode::Html => "html",
            Mode::Html5 => "html5",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "xml" => Ok(Mode::Xml),
            "html" => Ok(Mode::Html),
            "html5" => Ok(Mode::Html5),
            other => Err(format!("unknown mode `{other}` (expected xml, html or html5)")),
        }
    }
}

/// Attributes written as a bare name in html modes.
pub const HTML_EMPTY_ATTRS: &[&str] = &[
    "checked", "disabled", "readonly", "multiple", "selected", "nohref", "ismap", "declare",
    "defer",
];

/// Elements whose end tag is omitted in html modes.
pub const HTML_OPTIONAL_END_TAGS: &[&str] = &[
    "area", "base", "br", "col", "hr", "img", "input", "link", "meta", "param",
];

/// Elements that are always closed with an explicit end tag.
pub const HTML_REQUIRED_END_TAGS: &[&str] = &["script"];

/// Elements whose content is raw character data.
pub const HTML_CDATA_TAGS: &[&str] = &["script", "style"];

/// A well-known document type declaration.
#[derive(Debug, Clone, Copy)]
pub struct Doctype {
    pub name: &'static str,
    pub public_id: &'static str,
    pub system_id: &'static str,
    pub mode: Mode,
}

impl Doctype {
    const fn new(
        name: &'static str,
        public_id: &'static str,
        system_id: &'static str,
        mode: Mode,
    ) -> Self {
        Self {
            name,
            public_id,
            system_id,
            mode,
        }
    }

    /// The declaration as written in a document.
    pub fn declaration(&self) -> String {
        let mut out = String::from("<!DOCTYPE html");
        if !self.public_id.is_empty() {
            out.push_str(" PUBLIC \"");
            out.push_str(self.public_id);
            out.push('"');
            if !self.system_id.is_empty() {
                out.push_str(" \"");
                out.push_str(self.system_id);
                out.push('"');
            }
        }
        out.push('>');
        out
    }
}

pub const DOCTYPES: &[Doctype] = &[
    Doctype::new("html5", "", "", Mode::Html5),
    Doctype::new(
        "xhtml1transitional",
        "-//W3C//DTD XHTML 1.0 Transitional//EN",
        "http://www.w3.org/TR/xhtml1/DTD/xhtml1-transitional.dtd",
        Mode::Xml,
    ),
    Doctype::new(
        "xhtml1strict",
        "-//W3C//DTD XHTML 1.0 Strict//EN",
        "http://www.w3.org/TR/xhtml1/DTD/xhtml1-strict.dtd",
        Mode::Xml,
    ),
    Doctype::new(
        "xhtml1rdfa",
        "-//W3C//DTD XHTML+RDFa 1.0//EN",
        "http://www.w3.org/MarkUp/DTD/xhtml-rdfa-1.dtd",
        Mode::Xml,
    ),
    Doctype::new(
        "xhtml11",
        "-//W3C//DTD XHTML 1.1//EN",
        "http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd",
        Mode::Xml,
    ),
    Doctype::new(
        "xhtml1frameset",
        "-//W3C//DTD XHTML 1.0 Frameset//EN",
        "http://www.w3.org/TR/xhtml1/DTD/xhtml1-frameset.dtd",
        Mode::Xml,
    ),
    Doctype::new(
        "xhtmlbasic11",
        "-//W3C//DTD XHTML Basic 1.1//EN",
        "http://www.w3.org/TR/xhtml-basic/xhtml-basic11.dtd",
        Mode::Xml,
    ),
    Doctype::new(
        "xhtmlmobile12",
        "-//WAPFORUM//DTD XHTML Mobile 1.2//EN",
        "http://www.openmobilealliance.org/tech/DTD/xhtml-mobile12.dtd",
        Mode::Xml,
    ),
    Doctype::new(
        "html4transitional",
        "-//W3C//DTD HTML 4.01 Transitional//EN",
        "http://www.w3.org/TR/html4/loose.dtd",
        Mode::Html,
    ),
    Doctype::new(
        "html4strict",
        "-//W3C//DTD HTML 4.01//EN",
        "http://www.w3.org/TR/html4/strict.dtd",
        Mode::Html,
    ),
    Doctype::new(
        "html4frameset",
        "-//W3C//DTD HTML 4.01 Frameset//EN",
        "http://www.w3.org/TR/html4/frameset.dtd",
        Mode::Html,
    ),
];

/// Collapse whitespace runs to one space and lowercase.
fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
}

/// Look up a known document type. Matching ignores case and the amount of
/// whitespace between tokens.
pub fn matching(dtd: &str) -> Option<&'static Doctype> {
    let dtd = normalize(dtd);
    DOCTYPES
        .iter()
        .find(|doctype| dtd.starts_with(&normalize(&doctype.declaration())))
}

/// Cut the first `<!DOCTYPE ...>` out of `source`.
///
/// The declaration is blanked out rather than removed: every character but
/// its newlines becomes a space, so byte offsets and line numbers in the
/// remaining markup still match the original.
pub fn extract_dtd(source: &str) -> (Option<String>, String) {
    let Some(start) = find_ignore_case(source, "<!doctype") else {
        return (None, source.to_string());
    };
    let Some(len) = source[start..].find('>') else {
        return (None, source.to_string());
    };
    let end = start + len + 1;
    let dtd = &source[start..end];
    let mut rest = String::with_capacity(source.len());
    rest.push_str(&source[..start]);
    rest.extend(dtd.bytes().map(|b| if b == b'\n' { '\n' } else { ' ' }));
    rest.push_str(&source[end..]);
    (Some(dtd.to_string()), rest)
}

fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .char_indices()
        .map(|(i, _)| i)
        .find(|&i| {
            haystack
                .get(i..i + needle.len())
                .is_some_and(|window| window.eq_ignore_ascii_case(needle))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_html5() {
        let doctype = matching("<!DOCTYPE html>").unwrap();
        assert_eq!(doctype.name, "html5");
        assert_eq!(doctype.mode, Mode::Html5);
    }

    #[test]
    fn test_match_is_case_and_whitespace_insensitive() {
        let doctype = matching(
            "<!doctype HTML public  \"-//W3C//DTD HTML 4.01 Transitional//EN\"\n   \"http://www.w3.org/TR/html4/loose.dtd\">",
        )
        .unwrap();
        assert_eq!(doctype.name, "html4transitional");
        assert_eq!(doctype.mode, Mode::Html);
    }

    #[test]
    fn test_xhtml_is_xml() {
        let doctype = matching(&DOCTYPES[2].declaration()).unwrap();
        assert_eq!(doctype.name, "xhtml1strict");
        assert_eq!(doctype.mode, Mode::Xml);
    }

    #[test]
    fn test_unknown_dtd() {
        assert!(matching("<!DOCTYPE custom SYSTEM \"x.dtd\">").is_none());
    }

    #[test]
    fn test_extract_dtd() {
        let (dtd, rest) = extract_dtd("<?xml version=\"1.0\"?><!DOCTYPE html><html/>");
        assert_eq!(dtd.as_deref(), Some("<!DOCTYPE html>"));
        assert_eq!(rest, "<?xml version=\"1.0\"?>               <html/>");
    }

    #[test]
    fn test_extract_dtd_keeps_offsets() {
        let source = "<!DOCTYPE html PUBLIC\n \"x\">\n<p/>";
        let (_, rest) = extract_dtd(source);
        assert_eq!(rest.len(), source.len());
        assert_eq!(rest.matches('\n').count(), 2);
        assert!(rest.ends_with("\n<p/>"));
    }

    #[test]
    fn test_no_dtd() {
        let (dtd, rest) = extract_dtd("<p/>");
        assert!(dtd.is_none());
        assert_eq!(rest, "<p/>");
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("HTML5".parse::<Mode>().unwrap(), Mode::Html5);
        assert!("svg".parse::<Mode>().is_err());
    }
}
