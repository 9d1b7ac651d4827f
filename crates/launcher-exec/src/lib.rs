mod error;
pub use error::{ExecError, ExecResult};

mod config;
pub use config::ExecConfig;

pub mod guard;
pub mod proc;
pub use proc::{CommandOutput, CommandSpec, ProcessRunner, SystemRunner};

mod backend;
pub use backend::{Executor, Lifecycle};

mod util;

pub mod prelude {
    pub use crate::error::{ExecError, ExecResult};
    pub use crate::{ExecConfig, Executor, Lifecycle, SystemRunner};
}
