//! Virtual environment host: the per-page document context.
//!
//! Rendering never touches ambient globals. Each page gets a fresh
//! [`HostEnvironment`] that is passed explicitly to every rendering call and
//! dropped once its markup has been extracted.

use crate::dom::{Document, Element, ReadyState};
use crate::error::{Error, Result};
use crate::loader::ResourceLoader;
use std::cell::{Ref, RefCell, RefMut};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

/// Content the document still has to pull in before "load" fires.
#[derive(Debug)]
struct PendingLoad {
    target: String,
    url: String,
}

/// One page's top-level rendering context.
pub struct HostEnvironment {
    document: Rc<RefCell<Document>>,
    pending_loads: RefCell<VecDeque<PendingLoad>>,
}

/// Create a fresh host with an empty document and no pending loads.
pub fn create_host_environment() -> HostEnvironment {
    tracing::debug!("creating host environment");
    HostEnvironment {
        document: Rc::new(RefCell::new(Document::new())),
        pending_loads: RefCell::new(VecDeque::new()),
    }
}

impl HostEnvironment {
    pub fn document(&self) -> Ref<'_, Document> {
        self.document.borrow()
    }

    /// Mutable access for the renderer. Drop the guard before handing control
    /// to the sandbox, which writes through [`HostHandle`].
    pub fn document_mut(&self) -> RefMut<'_, Document> {
        self.document.borrow_mut()
    }

    /// Non-owning handle for the sandbox.
    pub fn handle(&self) -> HostHandle {
        HostHandle {
            document: Rc::downgrade(&self.document),
        }
    }

    /// Fill element `target` with the resource at `url` before load completes.
    pub fn defer_include(&self, target: impl Into<String>, url: impl Into<String>) {
        self.pending_loads.borrow_mut().push_back(PendingLoad {
            target: target.into(),
            url: url.into(),
        });
    }

    /// Wait for the document's load signal.
    ///
    /// Pending loads are applied in the order they were registered. The
    /// document switches to [`ReadyState::Complete`] once none remain.
    pub async fn wait_for_load(&self, loader: &ResourceLoader) -> Result<()> {
        loop {
            let next = self.pending_loads.borrow_mut().pop_front();
            let Some(load) = next else { break };

            let resource = loader.load(&load.url).await?;
            let mut document = self.document.borrow_mut();
            let target = document
                .get_element_by_id_mut(&load.target)
                .ok_or_else(|| Error::ElementNotFound(load.target.clone()))?;
            target.set_inner_html(&resource.text());
        }

        self.document
            .borrow_mut()
            .set_ready_state(ReadyState::Complete);
        Ok(())
    }

    pub fn body_inner_html(&self) -> String {
        self.document.borrow().body_inner_html()
    }
}

/// The sandbox's back-reference into its host.
///
/// Holds the document weakly; exposes only the signalling the sandbox needs.
#[derive(Clone)]
pub struct HostHandle {
    document: Weak<RefCell<Document>>,
}

impl HostHandle {
    /// Replace the content of element `id` with `html`.
    pub fn set_output(&self, id: &str, html: &str) -> Result<()> {
        self.with_element(id, |el| el.set_inner_html(html))
    }

    /// Append `html` after the current content of element `id`.
    pub fn append_output(&self, id: &str, html: &str) -> Result<()> {
        self.with_element(id, |el| el.append_html(html))
    }

    /// Replace the content of element `id` with escaped text.
    pub fn set_text(&self, id: &str, text: &str) -> Result<()> {
        self.with_element(id, |el| el.set_text(text))
    }

    fn with_element(&self, id: &str, f: impl FnOnce(&mut Element)) -> Result<()> {
        let document = self.document.upgrade().ok_or(Error::HostGone)?;
        let mut document = document
            .try_borrow_mut()
            .map_err(|_| Error::Script("host document is already borrowed".into()))?;
        let el = document
            .get_element_by_id_mut(id)
            .ok_or_else(|| Error::ElementNotFound(id.to_string()))?;
        f(el);
        Ok(())
    }
}
