mod key;
mod make;
mod predict;

pub use key::cmd_key;
pub use make::{MakeArgs, cmd_make};
pub use predict::{PredictArgs, cmd_predict};

use std::path::Path;

/// Directory relative plan paths and shell commands are resolved against.
fn plan_dir(plan: &Path) -> &Path {
  plan.parent().unwrap_or(Path::new(""))
}
