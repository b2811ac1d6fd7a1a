//! Pipeline driver.
//!
//! ```text
//! SCAFFOLD -> STYLE_COMPILE -> CLIENT_BUNDLE ->
//!   per page: CREATE_HOST -> WIRE_SANDBOX -> EXEC_SANDBOX_SCRIPT -> RENDER
//!             -> AWAIT_LOAD -> AWAIT_DRAIN -> EXTRACT_HTML -> WRITE
//! -> DONE
//! ```
//!
//! Strictly sequential: a page's host is created only after the previous
//! page has been written. The first error aborts the build.

use crate::config::{BuildConfig, CommandSpec};
use crate::error::{Error, Result};
use crate::host::create_host_environment;
use crate::loader::ResourceLoader;
use crate::page::{get_html, render_page, Page, PageRegistry, RenderContext};
use crate::queue::ExecuteQueue;
use crate::sandbox::{create_sandbox, SandboxOptions};
use crate::steps::{self, Bundler, CommandBundler, CommandStyleCompiler, StyleCompiler};
use std::path::PathBuf;
use url::Url;

/// What a finished build produced.
#[derive(Debug, Default)]
pub struct BuildReport {
    pub pages: Vec<PathBuf>,
}

pub struct Pipeline {
    config: BuildConfig,
    registry: PageRegistry,
    style_compiler: Box<dyn StyleCompiler>,
    bundler: Box<dyn Bundler>,
    queue: ExecuteQueue,
    skip_assets: bool,
}

impl Pipeline {
    /// A pipeline using the configured external commands.
    pub fn new(config: BuildConfig, registry: PageRegistry) -> Self {
        let cwd = config.project_root.clone();
        let style_command = config
            .style
            .as_ref()
            .map(|s| s.command.clone())
            .unwrap_or_else(|| CommandSpec::new("sass", &[]));
        let bundler = CommandBundler::new(config.bundler.clone(), cwd.clone());

        Self {
            style_compiler: Box::new(CommandStyleCompiler::new(style_command, cwd)),
            bundler: Box::new(bundler),
            config,
            registry,
            queue: ExecuteQueue::new(),
            skip_assets: false,
        }
    }

    pub fn with_style_compiler(mut self, compiler: impl StyleCompiler + 'static) -> Self {
        self.style_compiler = Box::new(compiler);
        self
    }

    pub fn with_bundler(mut self, bundler: impl Bundler + 'static) -> Self {
        self.bundler = Box::new(bundler);
        self
    }

    /// Skip docs, style and bundle steps; the output tree must already hold them.
    pub fn skip_assets(mut self, skip: bool) -> Self {
        self.skip_assets = skip;
        self
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn registry(&self) -> &PageRegistry {
        &self.registry
    }

    pub fn queue(&self) -> &ExecuteQueue {
        &self.queue
    }

    /// Run every step, in order.
    pub async fn run(&self) -> Result<BuildReport> {
        self.scaffold()?;
        if !self.skip_assets {
            self.compile_styles()?;
            // The sandbox evaluates the runtime bundle, so bundling goes first.
            self.bundle()?;
        }
        self.ensure_sandbox_script()?;
        let pages = self.write_pages().await?;

        tracing::info!(out_dir = %self.config.out_dir().display(), pages = pages.len(), "website built");
        Ok(BuildReport { pages })
    }

    fn scaffold(&self) -> Result<()> {
        steps::scaffold(
            &self.config.project_root,
            &self.config.directories,
            &self.config.links,
        )?;
        std::fs::create_dir_all(self.config.out_dir())?;

        if let (Some(docs), false) = (&self.config.docs, self.skip_assets) {
            let output = self.config.out_dir().join(&docs.output);
            steps::generate_docs(&docs.command, &output, &self.config.project_root)?;
        }
        Ok(())
    }

    fn compile_styles(&self) -> Result<()> {
        let Some(style) = &self.config.style else {
            return Ok(());
        };
        let output = self.config.out_dir().join(&style.output);
        self.style_compiler
            .compile(&style.input, &style.include_paths, &output)
    }

    fn bundle(&self) -> Result<()> {
        let out_dir = self.config.out_dir();
        for entry in &self.config.bundles {
            self.bundler.bundle(entry, &out_dir)?;
        }
        Ok(())
    }

    fn ensure_sandbox_script(&self) -> Result<()> {
        let script = self.config.sandbox_script_path();
        if !script.is_file() {
            return Err(Error::MissingAsset(script));
        }
        Ok(())
    }

    /// Render and write every registered page, in registry order.
    pub async fn write_pages(&self) -> Result<Vec<PathBuf>> {
        let loader = ResourceLoader::new(self.config.out_dir())?;
        let mut written = Vec::with_capacity(self.registry.len());

        for page in self.registry.pages() {
            tracing::info!(path = page.path(), "rendering");
            let html = self.render_with(&loader, page).await?;

            let path = loader.root().join(page.path());
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, html).await?;
            written.push(path);
        }
        Ok(written)
    }

    /// Render one page to a complete HTML document without writing it.
    pub async fn render_to_html(&self, page: &Page) -> Result<String> {
        let loader = ResourceLoader::new(self.config.out_dir())?;
        self.render_with(&loader, page).await
    }

    async fn render_with(&self, loader: &ResourceLoader, page: &Page) -> Result<String> {
        self.queue.reset();

        let host = create_host_environment();
        let mut sandbox = create_sandbox(
            &host,
            SandboxOptions {
                location: self.sandbox_location(loader)?,
                loader: loader.clone(),
                queue: self.queue.clone(),
            },
        );
        sandbox
            .exec_script(&loader.root().join(&self.config.sandbox_script))
            .await?;
        sandbox.init()?;

        render_page(page, &mut RenderContext::new(&host, &mut sandbox))?;
        host.wait_for_load(loader).await?;
        sandbox.settle(self.config.drain_timeout()).await?;

        let body = host.body_inner_html();
        Ok(get_html(page.title(), &body))
    }

    fn sandbox_location(&self, loader: &ResourceLoader) -> Result<Url> {
        loader
            .root_url()
            .join(&self.config.sandbox_location)
            .map_err(|e| Error::Config(format!("invalid sandbox_location: {e}")))
    }
}
