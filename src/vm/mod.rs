// Carbon VM
// Runtime values, instances, per-call contexts and the interpreter

pub mod context;
pub mod instance;
pub mod ops;
pub mod value;
#[allow(clippy::module_inception)]
mod vm;

pub use context::{Args, RuntimeContext};
pub use instance::Instance;
pub use value::Value;
pub use vm::{DEFAULT_STACK_BUDGET, VM};
