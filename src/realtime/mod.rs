pub mod heartbeat;
pub mod protocol;
pub mod room;
