//! Blocking driver: connection, pool, cancellation over std sockets.

mod cancel;
mod conn;
mod pool;
mod stream;

pub use cancel::CancelHandle;
pub use conn::{Batch, Conn, CopyBothDuplex, CopyInWriter, Notification, NoticeSink, Portal};
pub use pool::{Pool, PoolOptions, PooledConn};
pub use stream::Stream;
