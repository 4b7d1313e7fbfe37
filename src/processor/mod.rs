pub mod attendance;
pub mod emergency;
pub mod location;
pub mod message_processor;
pub mod trips;
