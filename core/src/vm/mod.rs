mod context;
mod intrinsic;
mod machine;

#[cfg(test)]
mod machine_test;

pub use context::{Context, ContextHandle};
pub use intrinsic::{Intrinsic, IntrinsicBuilder, IntrinsicFn, IntrinsicResult, PartialResult};
pub use machine::Machine;
