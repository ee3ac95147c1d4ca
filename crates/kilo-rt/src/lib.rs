//! # kilo-rt
//!
//! Operator execution core for quantized inference on memory-constrained
//! devices (kilobytes of RAM).
//!
//! ## Key pieces
//! - [`ScratchPool`]: relocatable, handle-indirected scratch allocator —
//!   compaction-safe under the bind/unbind discipline
//! - [`ExecutionContext`]: per-pass access point for the pool and the
//!   centralized error channel
//! - [`Operator`](op::Operator): closed operator set with fixed-arity
//!   tensor slots, run strictly sequentially by an external scheduler
//! - [`Conv2dOperator`]: per-channel-quantized 2-D convolution, scratch
//!   lifecycle included
//!
//! Execution is single-threaded and synchronous; an error aborts the
//! current inference pass through the context's error channel.

pub mod activation;
pub mod context;
pub mod conv2d;
pub mod kernel;
pub mod op;
pub mod padding;
pub mod pool;

pub use activation::FusedActivation;
pub use context::ExecutionContext;
pub use conv2d::Conv2dOperator;
pub use op::{Conv2dInputs, Conv2dOutputs, InputSlots, Operator, OutputSlots};
pub use padding::{Padding, PaddingValues};
pub use pool::{Handle, ScratchPool};
