//! Page descriptors, the page registry, and the renderer.

use crate::dom::{escape_text, Document, Element, Node};
use crate::error::{Error, Result};
use crate::host::HostEnvironment;
use crate::loader::is_absolute_url;
use crate::sandbox::Sandbox;
use serde::Deserialize;
use std::cell::RefMut;
use std::collections::HashSet;
use std::fmt;
use std::path::{Component, Path};

/// Stylesheet produced by the style compilation step.
pub const STYLESHEET_HREF: &str = "/bundle.css";
/// Client bundle produced by the bundling step.
pub const CLIENT_SCRIPT_SRC: &str = "/website_main.js";

/// Where rendered cells are sent for execution.
pub trait CellRunner {
    fn execute_cell(&mut self, id: &str, source: &str) -> Result<()>;
}

impl CellRunner for Sandbox {
    fn execute_cell(&mut self, id: &str, source: &str) -> Result<()> {
        Sandbox::execute_cell(self, id, source)
    }
}

/// Everything a page's content logic may touch while rendering.
pub struct RenderContext<'a> {
    host: &'a HostEnvironment,
    cells: &'a mut dyn CellRunner,
    next_cell: usize,
    next_include: usize,
}

impl<'a> RenderContext<'a> {
    pub fn new(host: &'a HostEnvironment, cells: &'a mut dyn CellRunner) -> Self {
        Self {
            host,
            cells,
            next_cell: 0,
            next_include: 0,
        }
    }

    /// Do not hold the guard across [`RenderContext::cell`].
    pub fn document_mut(&self) -> RefMut<'_, Document> {
        self.host.document_mut()
    }

    /// Append a node to the document body.
    pub fn append(&self, node: impl Into<Node>) {
        self.host.document_mut().body_mut().append(node);
    }

    /// Parse `html` and append it to the document body.
    pub fn append_html(&self, html: &str) {
        self.host.document_mut().body_mut().append_html(html);
    }

    /// Render a notebook cell frame and schedule the cell on the sandbox.
    ///
    /// Cells without an explicit id are numbered `cell-0`, `cell-1`, ...
    pub fn cell(&mut self, id: Option<&str>, source: &str) -> Result<String> {
        let id = match id {
            Some(id) => id.to_string(),
            None => format!("cell-{}", self.next_cell),
        };
        self.next_cell += 1;

        self.append(
            Element::new("div")
                .with_class("nb-cell")
                .with_id(id.as_str())
                .with_child(
                    Element::new("pre")
                        .with_class("nb-input")
                        .with_child(Element::new("code").with_text(source)),
                )
                .with_child(
                    Element::new("div")
                        .with_class("nb-output")
                        .with_id(output_id(&id)),
                ),
        );
        self.cells.execute_cell(&id, source)?;
        Ok(id)
    }

    /// Insert the output-root file at `src` before the load signal fires.
    pub fn include(&mut self, src: &str) -> Result<()> {
        if is_absolute_url(src) {
            return Err(Error::UnsupportedUrl(src.to_string()));
        }
        let target = format!("include-{}", self.next_include);
        self.next_include += 1;

        self.append(
            Element::new("div")
                .with_class("include")
                .with_id(target.as_str()),
        );
        self.host.defer_include(target, src);
        Ok(())
    }
}

/// Id of the element a cell's output is written into.
pub fn output_id(cell_id: &str) -> String {
    format!("{cell_id}-output")
}

/// Content-producing logic of a page.
pub trait Render {
    fn render(&self, cx: &mut RenderContext<'_>) -> Result<()>;
}

impl<F> Render for F
where
    F: Fn(&mut RenderContext<'_>) -> Result<()>,
{
    fn render(&self, cx: &mut RenderContext<'_>) -> Result<()> {
        self(cx)
    }
}

/// One output page.
pub struct Page {
    path: String,
    title: String,
    content: Box<dyn Render>,
}

impl Page {
    pub fn new(
        path: impl Into<String>,
        title: impl Into<String>,
        content: impl Render + 'static,
    ) -> Self {
        Self {
            path: path.into(),
            title: title.into(),
            content: Box::new(content),
        }
    }

    /// Output path, relative to the website output root.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn title(&self) -> &str {
        &self.title
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("path", &self.path)
            .field("title", &self.title)
            .finish_non_exhaustive()
    }
}

/// Page output paths are relative, scheme-less, and never climb.
pub fn validate_page_path(path: &str) -> Result<()> {
    let invalid = || Error::InvalidPagePath(path.to_string());
    if path.is_empty() || path.ends_with('/') || is_absolute_url(path) {
        return Err(invalid());
    }
    for component in Path::new(path).components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => return Err(invalid()),
        }
    }
    Ok(())
}

/// Pages in render order. Built once at startup, read-only afterwards.
#[derive(Debug, Default)]
pub struct PageRegistry {
    pages: Vec<Page>,
    paths: HashSet<String>,
}

impl PageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, page: Page) -> Result<()> {
        validate_page_path(&page.path)?;
        if !self.paths.insert(page.path.clone()) {
            return Err(Error::DuplicatePage(page.path));
        }
        self.pages.push(page);
        Ok(())
    }

    pub fn with_page(mut self, page: Page) -> Result<Self> {
        self.register(page)?;
        Ok(self)
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn from_manifest(manifest: PageManifest) -> Result<Self> {
        let mut registry = Self::new();
        for entry in manifest.pages {
            registry.register(Page::new(entry.path, entry.title, Blocks(entry.blocks)))?;
        }
        Ok(registry)
    }

    /// Load a JSON page manifest.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read page manifest '{}': {}", path.display(), e))
        })?;
        let manifest: PageManifest = serde_json::from_str(&text)?;
        Self::from_manifest(manifest)
    }
}

// ============================================================================
// Page manifest
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PageManifest {
    pub pages: Vec<PageEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PageEntry {
    pub path: String,
    pub title: String,
    #[serde(default)]
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Heading {
        text: String,
        #[serde(default = "default_heading_level")]
        level: u8,
    },
    Text {
        text: String,
    },
    Html {
        html: String,
    },
    Include {
        src: String,
    },
    Cell {
        #[serde(default)]
        id: Option<String>,
        source: String,
    },
}

fn default_heading_level() -> u8 {
    1
}

/// Manifest-declared page content.
#[derive(Debug, Clone)]
pub struct Blocks(pub Vec<Block>);

impl Render for Blocks {
    fn render(&self, cx: &mut RenderContext<'_>) -> Result<()> {
        for block in &self.0 {
            match block {
                Block::Heading { text, level } => {
                    let level = (*level).clamp(1, 6);
                    cx.append(Element::new(format!("h{level}")).with_text(text.as_str()));
                }
                Block::Text { text } => cx.append(Element::new("p").with_text(text.as_str())),
                Block::Html { html } => cx.append_html(html),
                Block::Include { src } => cx.include(src)?,
                Block::Cell { id, source } => {
                    cx.cell(id.as_deref(), source)?;
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Renderer
// ============================================================================

/// Mutate the context's host document to show `page`.
pub fn render_page(page: &Page, cx: &mut RenderContext<'_>) -> Result<()> {
    cx.document_mut().set_title(page.title.as_str());
    page.content.render(cx)
}

/// Wrap a body fragment into a complete document.
pub fn get_html(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
<link rel="stylesheet" href="{STYLESHEET_HREF}">
</head>
<body>
{body}
<script src="{CLIENT_SCRIPT_SRC}"></script>
</body>
</html>
"#,
        title = escape_text(title),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::create_host_environment;

    #[derive(Default)]
    struct RecordingRunner {
        cells: Vec<(String, String)>,
    }

    impl CellRunner for RecordingRunner {
        fn execute_cell(&mut self, id: &str, source: &str) -> Result<()> {
            self.cells.push((id.to_string(), source.to_string()));
            Ok(())
        }
    }

    fn render(page: &Page) -> (String, String, Vec<(String, String)>) {
        let host = create_host_environment();
        let mut runner = RecordingRunner::default();
        render_page(page, &mut RenderContext::new(&host, &mut runner)).unwrap();
        let title = host.document().title().to_string();
        (title, host.body_inner_html(), runner.cells)
    }

    #[test]
    fn test_get_html_wraps_body() {
        let html = get_html("Tips & Tricks", "<p>Hello</p>");
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<title>Tips &amp; Tricks</title>"));
        assert!(html.contains("<body>\n<p>Hello</p>\n"));
        assert!(html.contains(STYLESHEET_HREF));
        assert!(html.contains(CLIENT_SCRIPT_SRC));
    }

    #[test]
    fn test_render_blocks() {
        let page = Page::new(
            "index.html",
            "Home",
            Blocks(vec![
                Block::Heading { text: "Intro".into(), level: 2 },
                Block::Text { text: "Hello <world>".into() },
                Block::Html { html: "<hr>".into() },
            ]),
        );
        let (title, body, cells) = render(&page);
        assert_eq!(title, "Home");
        assert_eq!(body, "<h2>Intro</h2><p>Hello &lt;world&gt;</p><hr>");
        assert!(cells.is_empty());
    }

    #[test]
    fn test_cells_get_frames_and_are_scheduled() {
        let page = Page::new(
            "nb.html",
            "Notebook",
            Blocks(vec![
                Block::Cell { id: None, source: "1 + 1".into() },
                Block::Cell { id: Some("answer".into()), source: "6 * 7".into() },
            ]),
        );
        let (_, body, cells) = render(&page);
        assert_eq!(
            cells,
            vec![
                ("cell-0".to_string(), "1 + 1".to_string()),
                ("answer".to_string(), "6 * 7".to_string()),
            ]
        );
        assert!(body.contains("<div class=\"nb-output\" id=\"cell-0-output\"></div>"));
        assert!(body.contains("id=\"answer-output\""));
        assert!(body.contains("<code>6 * 7</code>"));
    }

    #[test]
    fn test_closure_content() {
        let page = Page::new("a.html", "A", |cx: &mut RenderContext<'_>| -> Result<()> {
            cx.append(Element::new("p").with_text("from closure"));
            Ok(())
        });
        let (_, body, _) = render(&page);
        assert_eq!(body, "<p>from closure</p>");
    }

    #[test]
    fn test_include_rejects_absolute_urls() {
        let page = Page::new(
            "a.html",
            "A",
            Blocks(vec![Block::Include { src: "https://example.com/a.html".into() }]),
        );
        let host = create_host_environment();
        let mut runner = RecordingRunner::default();
        let err = render_page(&page, &mut RenderContext::new(&host, &mut runner)).unwrap_err();
        assert!(matches!(err, Error::UnsupportedUrl(_)));
    }

    #[test]
    fn test_render_order_independence() {
        let a = Page::new("a.html", "A", Blocks(vec![Block::Text { text: "alpha".into() }]));
        let b = Page::new(
            "b.html",
            "B",
            Blocks(vec![Block::Cell { id: None, source: "beta".into() }]),
        );

        let forward = (render(&a), render(&b));
        let reverse_b = render(&b);
        let reverse_a = render(&a);
        assert_eq!(forward.0, reverse_a);
        assert_eq!(forward.1, reverse_b);
        assert!(!forward.1 .1.contains("alpha"));
    }

    #[test]
    fn test_page_path_validation() {
        for ok in ["index.html", "docs/api.html", "./notebook/index.html"] {
            assert!(validate_page_path(ok).is_ok(), "{ok}");
        }
        for bad in [
            "",
            "/index.html",
            "../index.html",
            "docs/../../x.html",
            "http://example.com/index.html",
            "//cdn/index.html",
            "docs/",
        ] {
            assert!(
                matches!(validate_page_path(bad), Err(Error::InvalidPagePath(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let mut registry = PageRegistry::new();
        registry.register(Page::new("index.html", "Home", Blocks(vec![]))).unwrap();
        let err = registry
            .register(Page::new("index.html", "Again", Blocks(vec![])))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicatePage(ref p) if p == "index.html"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_manifest_parsing_keeps_order() {
        let manifest: PageManifest = serde_json::from_str(
            r#"{
                "pages": [
                    { "path": "index.html", "title": "Home",
                      "blocks": [ { "type": "text", "text": "Hello" } ] },
                    { "path": "notebook/index.html", "title": "Notebook",
                      "blocks": [
                        { "type": "heading", "text": "Cells" },
                        { "type": "cell", "source": "return 42;" },
                        { "type": "include", "src": "static/footer.html" }
                      ] }
                ]
            }"#,
        )
        .unwrap();
        let registry = PageRegistry::from_manifest(manifest).unwrap();
        let paths: Vec<_> = registry.pages().iter().map(Page::path).collect();
        assert_eq!(paths, ["index.html", "notebook/index.html"]);
    }

    #[test]
    fn test_manifest_rejects_unknown_block() {
        let result: std::result::Result<PageManifest, _> = serde_json::from_str(
            r#"{ "pages": [ { "path": "a.html", "title": "A", "blocks": [ { "type": "video" } ] } ] }"#,
        );
        assert!(result.is_err());
    }
}
