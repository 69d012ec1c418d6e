//! Service layer
//!
//! The execution service is the seam between the pipeline controller and the
//! action implementations. It is trait-based so the controller can be driven
//! by fakes in tests.

mod execution;

pub use execution::ExecutionService;
pub use execution::StandardExecutionService;
