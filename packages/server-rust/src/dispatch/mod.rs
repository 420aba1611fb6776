//! Record delivery: ordered synchronous fan-out and the background
//! dispatcher built on top of it.

pub mod async_dispatcher;
mod isolation;
pub mod stack;
pub mod sync;

pub use async_dispatcher::{AsyncDispatcher, DeliveryState};
pub use stack::EventStack;
pub use sync::Dispatcher;
