pub mod env;
pub mod tracing_init;

pub use env::{ensure_present, get_var_or, require_var, AppConfig, DEFAULT_BATCH_LIMIT};
pub use tracing_init::init_tracing;
