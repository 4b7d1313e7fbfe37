use async_trait::async_trait;

use crate::error::ChannelError;

/// Opens connections to the broker. One call per connect attempt.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Connection>, ChannelError>;
}

/// A single established session carrying text frames.
#[async_trait]
pub trait Connection: Send {
    async fn send(&mut self, frame: String) -> Result<(), ChannelError>;

    /// `None` once the peer has closed the session.
    async fn recv(&mut self) -> Option<Result<String, ChannelError>>;
}
