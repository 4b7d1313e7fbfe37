pub mod alert;
pub mod attendance;
pub mod events;
pub mod location;
pub mod message;
pub mod vehicle;
