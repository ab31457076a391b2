//! Terminal output for the stratum CLI
//!
//! Uses `cliclack` for styled logs and spinners in a terminal and falls
//! back to plain bracketed lines when output is piped or running in CI.

mod context;
mod output;
mod progress;
mod prompts;
mod theme;

pub use context::UiContext;
pub use output::{
    intro, key_value, outro_success, outro_warn, remark, step_cached, step_info, step_ok,
    step_ok_detail, step_warn_hint,
};
pub use progress::{PlanProgress, TaskSpinner};
pub use prompts::confirm;
pub use theme::{init_theme, StratumTheme};
