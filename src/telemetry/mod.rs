pub mod database;
pub mod subscriber;

pub use subscriber::init_tracing;
