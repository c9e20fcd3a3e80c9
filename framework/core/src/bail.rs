/// Return this error from an agent hook to retire the worker slot that is running it.
///
/// The iteration is counted as failed and the slot's state is discarded instead of being returned
/// to the pool. A fresh slot will be allocated the next time one is needed, so the run itself
/// carries on. Use this when the slot's state can no longer be trusted, for example when a
/// per-worker session has been revoked.
#[derive(derive_more::Error, derive_more::Display, Debug)]
pub struct AgentBailError {
    msg: String,
}

impl AgentBailError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { msg: msg.into() }
    }
}

impl Default for AgentBailError {
    fn default() -> Self {
        Self {
            msg: "Agent is bailing".to_string(),
        }
    }
}
