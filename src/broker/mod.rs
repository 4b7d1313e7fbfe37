pub mod channel;
pub mod router;
