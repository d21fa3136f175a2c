//! CLI command implementations.
//!
//! Each submodule owns one `Commands` variant:
//!
//! | Module | Commands handled |
//! |--------|------------------|
//! | `run`  | `Run`            |
//! | `plan` | `Plan`           |

pub mod plan;
pub mod run;

pub use plan::cmd_plan;
pub use run::cmd_run;
