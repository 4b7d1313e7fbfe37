//! Client side of the event channel: an owned connection object with
//! automatic reconnection, used by dashboards and device simulators.

pub mod channel;
pub mod transport;
pub mod ws;

pub use channel::{ChannelClient, ConnectionStatus, ReconnectPolicy};
pub use transport::{Connection, Transport};
pub use ws::WsTransport;
