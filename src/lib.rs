pub mod interest;
pub mod reactor;

pub(crate) mod fd_registry;
pub(crate) mod panic_util;
pub(crate) mod syscall;
pub(crate) mod timer;
pub(crate) mod waker;

pub use fd_registry::FdCallback;
pub use interest::{Events, Interest};
pub use reactor::Reactor;
pub use timer::{TimerCallback, TimerId};
