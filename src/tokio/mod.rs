//! Async driver: connection, pool, cancellation over tokio sockets.

mod cancel;
mod conn;
mod pool;
mod stream;

pub use cancel::CancelHandle;
pub use conn::{Batch, Conn, CopyBothDuplex, CopyInWriter, NoticeSink, Portal};
pub use pool::{AfterConnect, BoxFuture, Pool, PoolOptions, PooledConn};
pub use stream::Stream;
