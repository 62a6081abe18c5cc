//! Field transport
//!
//! [`RegisterClient`] is the capability the acquisition core consumes: read N holding
//! registers from a unit, with an explicit open/close lifecycle. Handles are used
//! through `&mut`; the health manager's per-device lock guarantees one request at a
//! time per connection.

pub mod frame;
pub mod tcp;

use async_trait::async_trait;

use crate::error::Result;

pub use tcp::{ModbusTcpClient, TcpClientConfig};

#[async_trait]
pub trait RegisterClient: Send {
    /// Open (or reopen) the underlying connection
    async fn init(&mut self) -> Result<()>;

    fn is_initialized(&self) -> bool;

    /// Read `count` holding registers starting at `start`
    async fn read_words(&mut self, unit_id: u8, start: u16, count: u16) -> Result<Vec<u16>>;

    /// Drop the connection; the next `init` starts fresh
    async fn close(&mut self);

    /// Peer description for logs
    fn endpoint(&self) -> String;
}
