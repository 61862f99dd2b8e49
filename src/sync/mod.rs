pub mod conflict;
pub mod projection;
pub mod vector_clock;
