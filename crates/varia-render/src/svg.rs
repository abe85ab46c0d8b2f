//! A minimal mutable SVG/XML document tree.
//!
//! Documents are parsed with `quick-xml` into owned nodes so the compositor
//! can address elements by their child-index path, edit them in place and
//! serialize the result. Comments, CDATA and whitespace text are kept; the
//! prolog (XML declaration, doctype) is not.

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use varia_core::{VariaError, VariaResult};

/// Child indices leading from the root to an element. The root is `[]`.
pub type ElementPath = Vec<usize>;

#[derive(Debug, Clone, PartialEq)]
pub enum SvgNode {
    Element(SvgElement),
    Text(String),
    CData(String),
    Comment(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SvgElement {
    /// Qualified name as written (`text`, `svg:rect`, ...).
    pub name: String,
    /// Attributes in source order, values unescaped.
    pub attributes: Vec<(String, String)>,
    pub children: Vec<SvgNode>,
}

impl SvgElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Builder: set an attribute.
    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    /// Name without namespace prefix.
    pub fn local_name(&self) -> &str {
        self.name.rsplit(':').next().unwrap_or(&self.name)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    /// Replace an attribute value in place, or append it.
    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value,
            None => self.attributes.push((name.to_string(), value)),
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let pos = self.attributes.iter().position(|(k, _)| k == name)?;
        Some(self.attributes.remove(pos).1)
    }

    /// Replace all children with a single text node.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.children.clear();
        self.children.push(SvgNode::Text(text.into()));
    }

    /// Concatenated text of all descendant text and CDATA nodes.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }

    pub fn append_child(&mut self, node: SvgNode) {
        self.children.push(node);
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &SvgElement> {
        self.children.iter().filter_map(|n| match n {
            SvgNode::Element(e) => Some(e),
            _ => None,
        })
    }

    fn write_to(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (k, v) in &self.attributes {
            out.push(' ');
            out.push_str(k);
            out.push_str("=\"");
            out.push_str(&escape(v.as_str()));
            out.push('"');
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for child in &self.children {
            match child {
                SvgNode::Element(e) => e.write_to(out),
                SvgNode::Text(t) => out.push_str(&escape(t.as_str())),
                SvgNode::CData(t) => {
                    out.push_str("<![CDATA[");
                    out.push_str(t);
                    out.push_str("]]>");
                }
                SvgNode::Comment(t) => {
                    out.push_str("<!--");
                    out.push_str(t);
                    out.push_str("-->");
                }
            }
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

fn collect_text(el: &SvgElement, out: &mut String) {
    for child in &el.children {
        match child {
            SvgNode::Element(e) => collect_text(e, out),
            SvgNode::Text(t) | SvgNode::CData(t) => out.push_str(t),
            SvgNode::Comment(_) => {}
        }
    }
}

/// A parsed document: one root element.
#[derive(Debug, Clone, PartialEq)]
pub struct SvgDocument {
    pub root: SvgElement,
}

impl SvgDocument {
    /// Parse raw document bytes. Must be UTF-8; a leading BOM is ignored.
    pub fn parse_bytes(bytes: &[u8]) -> VariaResult<Self> {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        let text = std::str::from_utf8(bytes)
            .map_err(|e| VariaError::MalformedDocument(format!("not UTF-8: {}", e)))?;
        Self::parse(text)
    }

    pub fn parse(source: &str) -> VariaResult<Self> {
        let mut reader = Reader::from_str(source);
        reader.config_mut().trim_text_start = false;
        reader.config_mut().trim_text_end = false;

        let mut stack: Vec<SvgElement> = Vec::new();
        let mut root: Option<SvgElement> = None;

        loop {
            let event = reader.read_event().map_err(|e| {
                VariaError::MalformedDocument(format!(
                    "{} at byte {}",
                    e,
                    reader.error_position()
                ))
            })?;
            match event {
                Event::Start(e) => stack.push(start_element(&e)?),
                Event::End(_) => {
                    let el = stack.pop().ok_or_else(|| {
                        VariaError::MalformedDocument("unexpected closing tag".into())
                    })?;
                    attach(&mut stack, &mut root, el)?;
                }
                Event::Empty(e) => {
                    let el = start_element(&e)?;
                    attach(&mut stack, &mut root, el)?;
                }
                Event::Text(e) => {
                    let text = e
                        .unescape()
                        .map_err(|err| VariaError::MalformedDocument(err.to_string()))?;
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(SvgNode::Text(text.into_owned()));
                    }
                }
                Event::CData(e) => {
                    if let Some(parent) = stack.last_mut() {
                        parent
                            .children
                            .push(SvgNode::CData(String::from_utf8_lossy(&e).into_owned()));
                    }
                }
                Event::Comment(e) => {
                    if let Some(parent) = stack.last_mut() {
                        parent
                            .children
                            .push(SvgNode::Comment(String::from_utf8_lossy(&e).into_owned()));
                    }
                }
                Event::Decl(_) | Event::PI(_) | Event::DocType(_) => {}
                Event::Eof => break,
            }
        }

        if let Some(open) = stack.last() {
            return Err(VariaError::MalformedDocument(format!(
                "unclosed element <{}>",
                open.name
            )));
        }
        let root = root.ok_or_else(|| VariaError::MalformedDocument("document is empty".into()))?;
        Ok(Self { root })
    }

    /// Serialize the tree back to markup.
    pub fn to_svg_string(&self) -> String {
        let mut out = String::new();
        self.root.write_to(&mut out);
        out
    }

    pub fn element(&self, path: &[usize]) -> Option<&SvgElement> {
        let mut current = &self.root;
        for &i in path {
            current = match current.children.get(i)? {
                SvgNode::Element(e) => e,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn element_mut(&mut self, path: &[usize]) -> Option<&mut SvgElement> {
        let mut current = &mut self.root;
        for &i in path {
            current = match current.children.get_mut(i)? {
                SvgNode::Element(e) => e,
                _ => return None,
            };
        }
        Some(current)
    }

    /// All elements in document order (pre-order, root first), with their paths.
    pub fn elements(&self) -> Vec<(ElementPath, &SvgElement)> {
        let mut out = Vec::new();
        let mut path = Vec::new();
        walk(&self.root, &mut path, &mut out);
        out
    }

    /// Paths of elements matching `pred`, in document order.
    pub fn find_paths(&self, pred: impl Fn(&SvgElement) -> bool) -> Vec<ElementPath> {
        self.elements()
            .into_iter()
            .filter(|(_, el)| pred(el))
            .map(|(path, _)| path)
            .collect()
    }
}

fn walk<'a>(el: &'a SvgElement, path: &mut ElementPath, out: &mut Vec<(ElementPath, &'a SvgElement)>) {
    out.push((path.clone(), el));
    for (i, child) in el.children.iter().enumerate() {
        if let SvgNode::Element(e) = child {
            path.push(i);
            walk(e, path, out);
            path.pop();
        }
    }
}

fn start_element(e: &BytesStart<'_>) -> VariaResult<SvgElement> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut el = SvgElement::new(name);
    for attr in e.attributes() {
        let attr = attr.map_err(|err| VariaError::MalformedDocument(err.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| VariaError::MalformedDocument(err.to_string()))?;
        el.attributes.push((key, value.into_owned()));
    }
    Ok(el)
}

fn attach(
    stack: &mut [SvgElement],
    root: &mut Option<SvgElement>,
    el: SvgElement,
) -> VariaResult<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(SvgNode::Element(el)),
        None if root.is_none() => *root = Some(el),
        None => {
            return Err(VariaError::MalformedDocument(
                "document has more than one root element".into(),
            ))
        }
    }
    Ok(())
}
