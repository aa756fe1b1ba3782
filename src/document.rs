use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// One XML element, fully owned.
///
/// Reading goes through `roxmltree`; the result is converted into these
/// owned nodes immediately because the resolver splices include files and
/// rewrites attribute/text values in place. Attribute and child order is
/// preserved, flag aggregation depends on it. Comments are dropped and
/// element text is stored trimmed.
#[derive(Debug, Clone)]
pub struct Element {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub text: Option<String>,
    pub children: Vec<Element>,
    pub line: u32,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    pub fn find(&self, tag: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.tag == tag)
    }

    pub fn find_all<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.tag == tag)
    }

    /// Serialize back to XML text. Used by the `-x` intermediate dumps.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out, 0);
        out
    }

    fn write_xml(&self, out: &mut String, depth: usize) {
        let pad = "    ".repeat(depth);
        let _ = write!(out, "{pad}<{}", self.tag);
        for (k, v) in &self.attrs {
            let _ = write!(out, " {k}=\"{}\"", escape(v));
        }
        if self.children.is_empty() && self.text.is_none() {
            out.push_str("/>\n");
            return;
        }
        out.push('>');
        if let Some(text) = &self.text {
            out.push_str(&escape(text));
        }
        if !self.children.is_empty() {
            out.push('\n');
            for child in &self.children {
                child.write_xml(out, depth + 1);
            }
            out.push_str(&pad);
        }
        let _ = write!(out, "</{}>\n", self.tag);
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Load an XML file into an owned element tree.
pub fn load(path: &Path) -> Result<Element> {
    let data = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    parse(&data, path)
}

pub fn parse(data: &str, path: &Path) -> Result<Element> {
    let doc = roxmltree::Document::parse(data).map_err(|e| {
        Error::config(format!("{}: XML parse error: {e}", path.display()))
    })?;
    Ok(convert(doc.root_element(), &doc))
}

fn convert(node: roxmltree::Node, doc: &roxmltree::Document) -> Element {
    let line = doc.text_pos_at(node.range().start).row;
    let attrs = node
        .attributes()
        .map(|a| (a.name().to_string(), a.value().to_string()))
        .collect();
    let mut text = String::new();
    let mut children = Vec::new();
    for child in node.children() {
        if child.is_element() {
            children.push(convert(child, doc));
        } else if child.is_text() {
            text.push_str(child.text().unwrap_or(""));
        }
    }
    let text = text.trim();
    Element {
        tag: node.tag_name().name().to_string(),
        attrs,
        text: (!text.is_empty()).then(|| text.to_string()),
        children,
        line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_str(data: &str) -> Element {
        parse(data, Path::new("test.xml")).unwrap()
    }

    #[test]
    fn preserves_child_and_attribute_order() {
        let root = parse_str(
            r#"<project artifact="hello" type="executable">
                 <ccflag>-DA</ccflag>
                 <ccflag>-DB</ccflag>
                 <lflag>-lm</lflag>
               </project>"#,
        );
        assert_eq!(root.tag, "project");
        assert_eq!(root.attr("artifact"), Some("hello"));
        assert_eq!(root.attrs[0].0, "artifact");
        assert_eq!(root.attrs[1].0, "type");
        let tags: Vec<&str> = root.children.iter().map(|c| c.tag.as_str()).collect();
        assert_eq!(tags, ["ccflag", "ccflag", "lflag"]);
        let flags: Vec<&str> = root.find_all("ccflag").map(|c| c.text()).collect();
        assert_eq!(flags, ["-DA", "-DB"]);
    }

    #[test]
    fn trims_text_and_skips_comments() {
        let root = parse_str("<a>\n  <!-- note -->\n  <b>  x  </b>\n</a>");
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.find("b").unwrap().text(), "x");
    }

    #[test]
    fn records_source_lines() {
        let root = parse_str("<a>\n<b/>\n<c/>\n</a>");
        assert_eq!(root.line, 1);
        assert_eq!(root.find("c").unwrap().line, 3);
    }

    #[test]
    fn parse_error_names_the_file() {
        let err = parse("<a><b></a>", Path::new("broken.xml")).unwrap_err();
        assert!(err.to_string().contains("broken.xml"));
    }

    #[test]
    fn round_trips_through_serializer() {
        let root = parse_str(r#"<a k="v"><b>t</b><c/></a>"#);
        let dumped = root.to_xml();
        let again = parse(&dumped, Path::new("dump.xml")).unwrap();
        assert_eq!(again.attr("k"), Some("v"));
        assert_eq!(again.find("b").unwrap().text(), "t");
        assert!(again.find("c").is_some());
    }
}
