mod bail;
mod duration;
mod shutdown;
mod stage;
mod verdict;

pub mod prelude {
    pub use crate::bail::AgentBailError;
    pub use crate::duration::{
        deserialize_duration, deserialize_optional_duration, format_duration, parse_duration,
        DurationParseError,
    };
    pub use crate::shutdown::{DelegatedShutdownListener, ShutdownHandle, ShutdownSignalError};
    pub use crate::stage::{LoadProfile, Stage, StageError};
    pub use crate::verdict::Verdict;
}
