//! Sandbox extension: the ops behind the sandbox's `fetch`, `host`,
//! `__prerender`, timers and console, plus the `extension!` definition that
//! wires their state before any sandbox script runs.

use crate::error::Error;
use crate::host::HostHandle;
use crate::loader::ResourceLoader;
use crate::queue::{ExecuteQueue, TaskId};
use anyhow::anyhow;
use deno_core::error::AnyError;
use deno_core::{op2, OpState, ToJsBuffer};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use url::Url;

/// Synthetic base URL of the sandbox (`location.href`).
#[derive(Debug, Clone)]
pub struct SandboxLocation(pub Url);

// ============================================================================
// Console Ops
// ============================================================================

#[op2(fast)]
pub fn op_console_log(#[string] msg: &str) {
    tracing::info!(target: "sandbox", "{}", msg);
}

#[op2(fast)]
pub fn op_console_debug(#[string] msg: &str) {
    tracing::debug!(target: "sandbox", "{}", msg);
}

#[op2(fast)]
pub fn op_console_warn(#[string] msg: &str) {
    tracing::warn!(target: "sandbox", "{}", msg);
}

#[op2(fast)]
pub fn op_console_error(#[string] msg: &str) {
    tracing::error!(target: "sandbox", "{}", msg);
}

// ============================================================================
// Fetch Ops
// ============================================================================

/// Read a relative URL from the output root.
///
/// Absolute URLs are additionally parked as a fault so the page fails even if
/// the script swallows the rejection.
#[op2(async)]
#[serde]
pub async fn op_sandbox_fetch(
    state: Rc<RefCell<OpState>>,
    #[string] url: String,
) -> Result<ToJsBuffer, AnyError> {
    let (loader, queue) = {
        let state_ref = state.borrow();
        (
            state_ref.borrow::<ResourceLoader>().clone(),
            state_ref.borrow::<ExecuteQueue>().clone(),
        )
    };

    match loader.load(&url).await {
        Ok(resource) => Ok(resource.into_bytes().into()),
        Err(err @ Error::UnsupportedUrl(_)) => {
            let message = err.to_string();
            queue.record_fault(err);
            Err(anyhow!(message))
        }
        Err(err) => Err(err.into()),
    }
}

#[op2]
#[string]
pub fn op_utf8_decode(#[buffer] bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[op2]
#[string]
pub fn op_sandbox_location(state: &mut OpState) -> String {
    state.borrow::<SandboxLocation>().0.to_string()
}

// ============================================================================
// Host Ops
// ============================================================================

#[op2(fast)]
pub fn op_host_set_output(
    state: &mut OpState,
    #[string] id: &str,
    #[string] html: &str,
) -> Result<(), AnyError> {
    Ok(state.borrow::<HostHandle>().set_output(id, html)?)
}

#[op2(fast)]
pub fn op_host_append_output(
    state: &mut OpState,
    #[string] id: &str,
    #[string] html: &str,
) -> Result<(), AnyError> {
    Ok(state.borrow::<HostHandle>().append_output(id, html)?)
}

#[op2(fast)]
pub fn op_host_set_text(
    state: &mut OpState,
    #[string] id: &str,
    #[string] text: &str,
) -> Result<(), AnyError> {
    Ok(state.borrow::<HostHandle>().set_text(id, text)?)
}

// ============================================================================
// Execute Queue Ops
// ============================================================================

#[op2(fast)]
pub fn op_queue_schedule(state: &mut OpState) -> u32 {
    state.borrow::<ExecuteQueue>().schedule().get()
}

#[op2(fast)]
pub fn op_queue_complete(state: &mut OpState, id: u32) {
    state.borrow::<ExecuteQueue>().complete(TaskId::from(id));
}

#[op2(fast)]
pub fn op_queue_fail(state: &mut OpState, id: u32, #[string] message: String) {
    state
        .borrow::<ExecuteQueue>()
        .fail(TaskId::from(id), message);
}

// ============================================================================
// Timer Ops
// ============================================================================

#[op2(async)]
pub async fn op_sandbox_sleep(ms: u32) {
    tokio::time::sleep(Duration::from_millis(u64::from(ms))).await;
}

// ============================================================================
// Extension Definition
// ============================================================================

deno_core::extension!(
    prerender_sandbox,
    ops = [
        op_console_log,
        op_console_debug,
        op_console_warn,
        op_console_error,
        op_sandbox_fetch,
        op_utf8_decode,
        op_sandbox_location,
        op_host_set_output,
        op_host_append_output,
        op_host_set_text,
        op_queue_schedule,
        op_queue_complete,
        op_queue_fail,
        op_sandbox_sleep,
    ],
    esm_entry_point = "ext:prerender_sandbox/bootstrap.js",
    esm = ["ext:prerender_sandbox/bootstrap.js" = "src/bootstrap.js"],
    options = {
        host: HostHandle,
        loader: ResourceLoader,
        queue: ExecuteQueue,
        location: Url,
    },
    state = |state, options| {
        state.put(options.host);
        state.put(options.loader);
        state.put(options.queue);
        state.put(SandboxLocation(options.location));
    },
);
