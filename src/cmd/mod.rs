//! CLI command implementations.
//!
//! | Module    | Commands handled                   |
//! |-----------|------------------------------------|
//! | `run`     | `Run`                              |
//! | `items`   | `Status`, `List`, `Reset`          |
//! | `project` | `Init`                             |
//! | `config`  | `Config`                           |

pub mod config;
pub mod items;
pub mod project;
pub mod run;

pub use config::cmd_config;
pub use items::{cmd_list, cmd_reset, cmd_status};
pub use project::cmd_init;
pub use run::cmd_run;
