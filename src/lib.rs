//! # Page Prerender
//!
//! Builds a static website by rendering each page inside a fresh host
//! document, running its notebook cells in a nested deno_core sandbox, and
//! snapshotting the markup only after every scheduled cell task has settled.
//!
//! ## Sandbox Guarantees
//!
//! - **No network access**: `fetch` and `import()` reject absolute URLs
//! - **No filesystem escape**: reads are confined to the website output root
//! - **No shared state between pages**: host, sandbox and document are per page
//!
//! ## Usage
//!
//! ```rust,ignore
//! use page_prerender::{BuildConfig, Page, PageRegistry, Pipeline, RenderContext};
//! use page_prerender::dom::Element;
//!
//! #[tokio::main]
//! async fn main() -> page_prerender::Result<()> {
//!     let registry = PageRegistry::new().with_page(Page::new(
//!         "index.html",
//!         "Home",
//!         |cx: &mut RenderContext<'_>| -> page_prerender::Result<()> {
//!             cx.append(Element::new("p").with_text("Hello"));
//!             cx.cell(None, "return 6 * 7;")?;
//!             Ok(())
//!         },
//!     ))?;
//!
//!     let report = Pipeline::new(BuildConfig::default(), registry).run().await?;
//!     println!("{} pages written", report.pages.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dom;
mod error;
pub mod host;
pub mod loader;
mod ops;
pub mod page;
pub mod pipeline;
pub mod queue;
pub mod sandbox;
pub mod steps;

pub use config::BuildConfig;
pub use error::{Error, Result};
pub use host::{create_host_environment, HostEnvironment, HostHandle};
pub use loader::{Resource, ResourceLoader};
pub use page::{get_html, render_page, Page, PageRegistry, Render, RenderContext};
pub use pipeline::{BuildReport, Pipeline};
pub use queue::ExecuteQueue;
pub use sandbox::{create_sandbox, Sandbox, SandboxOptions};
