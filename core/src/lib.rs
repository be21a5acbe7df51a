pub mod error;
pub mod tac;
pub mod util;
pub mod val;
pub mod vm;

pub use error::{ErrorKind, Result, RuntimeError, SourceLoc};
pub use tac::{Line, Op};
pub use val::Value;
pub use vm::{Context, ContextHandle, Intrinsic, IntrinsicResult, Machine, PartialResult};
