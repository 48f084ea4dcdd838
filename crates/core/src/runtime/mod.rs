mod dispatcher;
mod event_loop;
pub mod fanout;
mod queue;
mod shutdown;

pub use dispatcher::Dispatcher;
pub use event_loop::Runtime;
pub use queue::TaskQueue;
pub use shutdown::ShutdownGuard;
