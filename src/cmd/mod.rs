//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled |
//! |-----------|------------------|
//! | `project` | `Init`           |
//! | `config`  | `Config`         |
//! | `serve`   | `Serve`          |
//! | `parse`   | `Parse`          |
//! | `submit`  | `Submit`         |

pub mod config;
pub mod parse;
pub mod project;
pub mod serve;
pub mod submit;

pub use config::cmd_config;
pub use parse::cmd_parse;
pub use project::cmd_init;
pub use serve::cmd_serve;
pub use submit::{SubmitArgs, cmd_submit};
