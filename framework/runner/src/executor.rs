use std::future::Future;

use race_tunnel_core::prelude::{ShutdownHandle, ShutdownSignalError};

/// Bridges the synchronous hooks to the async service client.
///
/// Every worker slot is a plain thread, so a hook hands its calls to the shared multi-threaded
/// runtime here and blocks until they finish.
#[derive(Debug)]
pub struct Executor {
    runtime: tokio::runtime::Runtime,
    shutdown_handle: ShutdownHandle,
}

impl Executor {
    pub(crate) fn new(runtime: tokio::runtime::Runtime, shutdown_handle: ShutdownHandle) -> Self {
        Self {
            runtime,
            shutdown_handle,
        }
    }

    /// Block on `fut` unless the run is stopped first.
    ///
    /// On shutdown the future is dropped, which aborts any request it has in flight, and a
    /// [ShutdownSignalError] is returned. Propagate it with `?` from an agent behaviour and the
    /// iteration is counted as interrupted rather than failed.
    ///
    /// Must not be called from inside async code.
    pub fn execute_in_place<T>(
        &self,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        let mut shutdown_listener = self.shutdown_handle.new_listener();
        self.runtime.block_on(async move {
            tokio::select! {
                result = fut => result,
                _ = shutdown_listener.wait_for_shutdown() => {
                    Err(ShutdownSignalError::default().into())
                },
            }
        })
    }

    /// Block on `fut` whether or not the run has been stopped.
    ///
    /// Used for the arrival-rate timer loop, which watches for shutdown itself, and for the closing
    /// verification snapshot, which must be taken even after a forced stop. The future has to bound
    /// itself.
    pub fn execute_to_completion<T>(
        &self,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        self.runtime.block_on(fut)
    }
}
