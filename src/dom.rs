//! Minimal host document tree.
//!
//! Only what page rendering needs: elements with attributes, text and
//! comments. Markup written by the sandbox or pulled in by an include is
//! parsed with html5ever into the same tree, so its ids are addressable.
//! Serialization follows the HTML fragment rules for escaping, void
//! elements and raw text elements.

use html5ever::tendril::TendrilSink;
use html5ever::{local_name, namespace_url, ns, ParseOpts, QualName};
use markup5ever_rcdom::{Handle, NodeData, RcDom};

/// Elements that never have children or a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Elements whose text children are serialized without escaping.
const RAW_TEXT_ELEMENTS: &[&str] = &[
    "iframe", "noembed", "noframes", "noscript", "plaintext", "script", "style", "xmp",
];

/// Escape text content.
pub fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Escape a double-quoted attribute value.
pub fn escape_attribute(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Parse an HTML fragment in `<body>` context.
pub fn parse_fragment(html: &str) -> Vec<Node> {
    let dom = html5ever::parse_fragment(
        RcDom::default(),
        ParseOpts::default(),
        QualName::new(None, ns!(html), local_name!("body")),
        Vec::new(),
    )
    .one(html);

    // The parsed nodes hang off a synthetic <html> root.
    let roots = dom.document.children.borrow();
    roots
        .iter()
        .flat_map(convert_children)
        .collect()
}

fn convert_children(parent: &Handle) -> Vec<Node> {
    parent.children.borrow().iter().filter_map(convert).collect()
}

fn convert(handle: &Handle) -> Option<Node> {
    match &handle.data {
        NodeData::Text { contents } => Some(Node::Text(contents.borrow().to_string())),
        NodeData::Comment { contents } => Some(Node::Comment(contents.to_string())),
        NodeData::Element {
            name,
            attrs,
            template_contents,
            ..
        } => {
            let attributes = attrs
                .borrow()
                .iter()
                .map(|attr| {
                    let name = match &attr.name.prefix {
                        Some(prefix) => format!("{prefix}:{}", attr.name.local),
                        None => attr.name.local.to_string(),
                    };
                    (name, attr.value.to_string())
                })
                .collect();
            let children = match template_contents.borrow().as_ref() {
                Some(contents) => convert_children(contents),
                None => convert_children(handle),
            };
            // Parsed tag names keep their case (SVG `foreignObject`).
            Some(Node::Element(Element {
                tag: name.local.to_string(),
                attributes,
                children,
            }))
        }
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
    Comment(String),
}

impl Node {
    fn write_html(&self, out: &mut String, raw_text: bool) {
        match self {
            Node::Element(el) => el.write_outer_html(out),
            Node::Text(text) if raw_text => out.push_str(text),
            Node::Text(text) => out.push_str(&escape_text(text)),
            Node::Comment(text) => {
                out.push_str("<!--");
                out.push_str(text);
                out.push_str("-->");
            }
        }
    }
}

impl From<Element> for Node {
    fn from(el: Element) -> Self {
        Node::Element(el)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    tag: String,
    attributes: Vec<(String, String)>,
    children: Vec<Node>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Builder form of [`Element::set_attribute`].
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(name, value);
        self
    }

    pub fn with_id(self, id: impl Into<String>) -> Self {
        self.with_attribute("id", id)
    }

    pub fn with_class(self, class: impl Into<String>) -> Self {
        self.with_attribute("class", class)
    }

    pub fn with_child(mut self, child: impl Into<Node>) -> Self {
        self.append(child);
        self
    }

    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.with_child(Node::Text(text.into()))
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn id(&self) -> Option<&str> {
        self.attribute("id")
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((name, value)),
        }
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn append(&mut self, child: impl Into<Node>) {
        self.children.push(child.into());
    }

    /// Replace all children with the parsed `html` fragment.
    pub fn set_inner_html(&mut self, html: &str) {
        self.children = parse_fragment(html);
    }

    /// Parse `html` and append the nodes after the current children.
    pub fn append_html(&mut self, html: &str) {
        self.children.extend(parse_fragment(html));
    }

    /// Replace all children with a single text node.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.children.clear();
        self.children.push(Node::Text(text.into()));
    }

    /// Depth-first search for an element by id, self included.
    pub fn find_by_id_mut(&mut self, id: &str) -> Option<&mut Element> {
        if self.id() == Some(id) {
            return Some(self);
        }
        self.children.iter_mut().find_map(|child| match child {
            Node::Element(el) => el.find_by_id_mut(id),
            _ => None,
        })
    }

    pub fn inner_html(&self) -> String {
        let mut out = String::new();
        self.write_children(&mut out);
        out
    }

    fn write_children(&self, out: &mut String) {
        let raw_text = RAW_TEXT_ELEMENTS.contains(&self.tag.as_str());
        for child in &self.children {
            child.write_html(out, raw_text);
        }
    }

    pub fn outer_html(&self) -> String {
        let mut out = String::new();
        self.write_outer_html(&mut out);
        out
    }

    fn write_outer_html(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.tag);
        for (name, value) in &self.attributes {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            out.push_str(&escape_attribute(value));
            out.push('"');
        }
        out.push('>');
        if VOID_ELEMENTS.contains(&self.tag.as_str()) {
            return;
        }
        self.write_children(out);
        out.push_str("</");
        out.push_str(&self.tag);
        out.push('>');
    }
}

/// Document readiness, mirroring `document.readyState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Loading,
    Complete,
}

/// One page's document. Created empty, mutated by the renderer and the
/// sandbox, then read once for its body markup.
#[derive(Debug)]
pub struct Document {
    title: String,
    body: Element,
    ready_state: ReadyState,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            title: String::new(),
            body: Element::new("body"),
            ready_state: ReadyState::Loading,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn body(&self) -> &Element {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Element {
        &mut self.body
    }

    pub fn get_element_by_id_mut(&mut self, id: &str) -> Option<&mut Element> {
        self.body.find_by_id_mut(id)
    }

    pub fn ready_state(&self) -> ReadyState {
        self.ready_state
    }

    pub(crate) fn set_ready_state(&mut self, state: ReadyState) {
        self.ready_state = state;
    }

    /// `document.body.innerHTML`
    pub fn body_inner_html(&self) -> String {
        self.body.inner_html()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_nested_elements() {
        let el = Element::new("DIV")
            .with_class("nb-cell")
            .with_child(Element::new("pre").with_text("if (a < b && c) {}"))
            .with_child(Element::new("br"))
            .with_child(Element::new("b").with_text("42"));

        assert_eq!(
            el.outer_html(),
            "<div class=\"nb-cell\"><pre>if (a &lt; b &amp;&amp; c) {}</pre><br><b>42</b></div>"
        );
    }

    #[test]
    fn test_escapes_attributes() {
        let el = Element::new("a").with_attribute("title", "say \"hi\" & <go>");
        assert_eq!(
            el.outer_html(),
            "<a title=\"say &quot;hi&quot; &amp; &lt;go&gt;\"></a>"
        );
    }

    #[test]
    fn test_set_attribute_replaces() {
        let mut el = Element::new("div").with_id("a");
        el.set_attribute("id", "b");
        assert_eq!(el.id(), Some("b"));
        assert_eq!(el.outer_html(), "<div id=\"b\"></div>");
    }

    #[test]
    fn test_find_by_id_and_replace_content() {
        let mut doc = Document::new();
        doc.body_mut().append(
            Element::new("div").with_id("cell-0").with_child(
                Element::new("div")
                    .with_id("cell-0-output")
                    .with_text("pending"),
            ),
        );

        doc.get_element_by_id_mut("cell-0-output")
            .unwrap()
            .set_inner_html("<span>42</span>");
        assert_eq!(
            doc.body_inner_html(),
            "<div id=\"cell-0\"><div id=\"cell-0-output\"><span>42</span></div></div>"
        );

        doc.get_element_by_id_mut("cell-0-output")
            .unwrap()
            .set_text("<x>");
        assert!(doc.body_inner_html().contains("&lt;x&gt;"));
        assert!(doc.get_element_by_id_mut("missing").is_none());
    }

    #[test]
    fn test_new_document_is_empty_and_loading() {
        let doc = Document::new();
        assert_eq!(doc.title(), "");
        assert_eq!(doc.body_inner_html(), "");
        assert_eq!(doc.ready_state(), ReadyState::Loading);
    }

    #[test]
    fn test_inserted_markup_is_addressable() {
        let mut doc = Document::new();
        doc.body_mut().append(Element::new("div").with_id("out"));

        doc.get_element_by_id_mut("out")
            .unwrap()
            .set_inner_html("<div id=\"plot\" class=\"chart\"></div><!-- axis -->");
        let plot = doc.get_element_by_id_mut("plot").unwrap();
        assert_eq!(plot.attribute("class"), Some("chart"));
        plot.set_text("drawn");

        doc.get_element_by_id_mut("out")
            .unwrap()
            .append_html("<p id=\"note\">a &amp; b</p>");
        doc.get_element_by_id_mut("note").unwrap().set_text("noted");

        assert_eq!(
            doc.body_inner_html(),
            "<div id=\"out\"><div id=\"plot\" class=\"chart\">drawn</div><!-- axis --><p id=\"note\">noted</p></div>"
        );
    }

    #[test]
    fn test_parsed_fragment_serialization() {
        let nodes = parse_fragment("<p>1 < 2 &amp; <br></p><script>if (a < b) {}</script><svg><foreignObject></foreignObject></svg>");
        let mut el = Element::new("div");
        for node in nodes {
            el.append(node);
        }
        assert_eq!(
            el.inner_html(),
            "<p>1 &lt; 2 &amp; <br></p><script>if (a < b) {}</script><svg><foreignObject></foreignObject></svg>"
        );
    }
}
