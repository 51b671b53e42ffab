use std::sync::Arc;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{ApplyParams, Engine, PreparedPatch};
use crate::error::ApplyError;
use crate::view::{NodeId, ViewTree};

/// Receives the outcome of an async apply. Exactly one method is called.
pub trait ApplyListener: Send + Sync {
    fn on_view_applied(&self, node: NodeId);

    fn on_error(&self, error: &ApplyError);
}

/// Handle to an in-flight async apply or reapply.
///
/// Cancelling before phase two starts leaves the view tree untouched; once
/// phase two holds the write lock it runs to completion.
#[derive(Debug)]
pub struct ApplyTask {
    cancel: CancellationToken,
    handle: JoinHandle<Result<NodeId, ApplyError>>,
}

impl ApplyTask {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Waits for phase two and returns the applied root.
    pub async fn finish(self) -> Result<NodeId, ApplyError> {
        match self.handle.await {
            Ok(result) => result,
            Err(err) => Err(ApplyError::Background(err.to_string())),
        }
    }

    /// Waits for the outcome and reports it to `listener`.
    pub async fn notify(self, listener: &dyn ApplyListener) {
        match self.finish().await {
            Ok(node) => listener.on_view_applied(node),
            Err(err) => listener.on_error(&err),
        }
    }
}

pub(super) fn spawn<F>(
    engine: Engine,
    tree: Arc<RwLock<ViewTree>>,
    params: ApplyParams,
    phase_one: F,
) -> ApplyTask
where
    F: FnOnce(&Engine, &RwLock<ViewTree>, &ApplyParams, &CancellationToken) -> Result<PreparedPatch, ApplyError>
        + Send
        + 'static,
{
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let handle = tokio::spawn(async move {
        let background = {
            let engine = engine.clone();
            let tree = tree.clone();
            let token = token.clone();
            tokio::task::spawn_blocking(move || phase_one(&engine, &tree, &params, &token))
        };

        let patch = tokio::select! {
            biased;
            () = token.cancelled() => {
                tracing::debug!("async apply cancelled during preparation");
                return Err(ApplyError::Cancelled);
            }
            joined = background => joined.map_err(|err| ApplyError::Background(err.to_string()))?,
        };
        let patch = patch.inspect_err(|err| tracing::debug!(%err, "async apply failed during preparation"))?;
        if token.is_cancelled() {
            return Err(ApplyError::Cancelled);
        }
        commit(&engine, &tree, patch, &params)
    });

    ApplyTask { cancel, handle }
}

fn commit(
    engine: &Engine,
    tree: &RwLock<ViewTree>,
    patch: PreparedPatch,
    params: &ApplyParams,
) -> Result<NodeId, ApplyError> {
    let mut tree = tree.write();
    patch.commit(engine, &mut tree, &params.config)
}
