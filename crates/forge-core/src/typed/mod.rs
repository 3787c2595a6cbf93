//! Task handler capability.
//!
//! Two layers:
//! - **typed**: `Job` + `Handler<J>`; the payload type and its handler are tied
//!   together at compile time.
//! - **dyn**: `TaskHandler`; object-safe, what the scheduler stores per task.
//!
//! `HandlerRegistry` holds the fixed set of variants registered at startup.

pub mod context;
pub mod handler;
pub mod job;
pub mod registry;

pub use self::context::TaskContext;
pub use self::handler::{FnHandler, Handler, TaskHandler, TypedHandler, handler_fn};
pub use self::job::Job;
pub use self::registry::{HandlerRegistry, HandlerRegistryError};
