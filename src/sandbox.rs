//! Execution sandbox - a script-enabled V8 context nested under a page's host.
//!
//! The sandbox sees only what the `prerender_sandbox` extension gives it:
//! - `fetch` backed by the output-root [`ResourceLoader`]
//! - `host`, a non-owning handle into the page document
//! - `__prerender` for scheduling cell work on the [`ExecuteQueue`]
//! - `setTimeout`, `console`, `location`
//! - `import()` of .js/.mjs files under the output root only

use crate::error::{Error, Result};
use crate::host::HostEnvironment;
use crate::loader::{ResourceLoader, SandboxModuleLoader};
use crate::ops::prerender_sandbox;
use crate::queue::ExecuteQueue;
use deno_core::{JsRuntime, PollEventLoopOptions, RuntimeOptions};
use std::future::{poll_fn, Future};
use std::io;
use std::path::Path;
use std::rc::Rc;
use std::task::Poll;
use std::time::Duration;
use url::Url;

/// Wiring for a new sandbox.
pub struct SandboxOptions {
    /// Synthetic base URL; relative imports inside the sandbox resolve against it.
    pub location: Url,
    pub loader: ResourceLoader,
    pub queue: ExecuteQueue,
}

pub struct Sandbox {
    runtime: JsRuntime,
    queue: ExecuteQueue,
    location: Url,
}

/// Create a sandbox nested under `host`.
///
/// The host back-reference, fetch loader and execute queue are installed
/// into op state before the bootstrap script runs.
pub fn create_sandbox(host: &HostEnvironment, options: SandboxOptions) -> Sandbox {
    tracing::debug!(location = %options.location, "creating sandbox");
    let SandboxOptions {
        location,
        loader,
        queue,
    } = options;

    let module_loader = SandboxModuleLoader::new(loader.clone(), location.clone());
    let runtime = JsRuntime::new(RuntimeOptions {
        module_loader: Some(Rc::new(module_loader)),
        extensions: vec![prerender_sandbox::init_ops_and_esm(
            host.handle(),
            loader,
            queue.clone(),
            location.clone(),
        )],
        ..Default::default()
    });

    Sandbox {
        runtime,
        queue,
        location,
    }
}

impl Sandbox {
    pub fn location(&self) -> &Url {
        &self.location
    }

    pub fn queue(&self) -> &ExecuteQueue {
        &self.queue
    }

    /// Evaluate the prebuilt notebook runtime bundle as a classic script.
    pub async fn exec_script(&mut self, path: &Path) -> Result<()> {
        let code = match tokio::fs::read_to_string(path).await {
            Ok(code) => code,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::MissingAsset(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(script = %path.display(), bytes = code.len(), "evaluating sandbox script");
        self.execute("<nb_sandbox>", code)
    }

    /// Run the init hooks the runtime registered with `__prerender.onInit`.
    ///
    /// From here on the driver drains this sandbox's queue.
    pub fn init(&mut self) -> Result<()> {
        self.execute("<init>", "globalThis.__prerender.init();".to_string())
    }

    /// Hand one cell to the runtime's registered executor as a queued task.
    pub fn execute_cell(&mut self, id: &str, source: &str) -> Result<()> {
        let call = format!(
            "globalThis.__prerender.executeCell({}, {});",
            serde_json::to_string(id)?,
            serde_json::to_string(source)?
        );
        self.execute("<cell>", call)
    }

    fn execute(&mut self, name: &'static str, code: String) -> Result<()> {
        match self.runtime.execute_script(name, code) {
            Ok(_) => Ok(()),
            Err(e) => Err(self.script_error(e)),
        }
    }

    /// A parked fault explains a script error better than the JS exception text.
    fn script_error(&self, e: anyhow::Error) -> Error {
        self.queue
            .take_fault()
            .unwrap_or_else(|| Error::Script(e.to_string()))
    }

    /// Drive the event loop until the execute queue is empty.
    ///
    /// With `timeout` of `None` a task that never completes blocks forever.
    pub async fn settle(&mut self, timeout: Option<Duration>) -> Result<()> {
        match timeout {
            None => self.run_until_drained().await?,
            Some(limit) => tokio::time::timeout(limit, self.run_until_drained())
                .await
                .map_err(|_| Error::DrainTimeout(limit))??,
        }

        match self.queue.take_fault() {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }

    async fn run_until_drained(&mut self) -> Result<()> {
        let queue = self.queue.clone();
        let drain = queue.drain();
        tokio::pin!(drain);

        let runtime = &mut self.runtime;
        let outcome = poll_fn(|cx| {
            // An idle event loop does not end the wait; only the queue does.
            if let Poll::Ready(Err(e)) = runtime.poll_event_loop(cx, PollEventLoopOptions::default()) {
                return Poll::Ready(Err(e));
            }
            drain.as_mut().poll(cx).map(Ok)
        })
        .await;

        outcome.map_err(|e| self.script_error(e))
    }
}
