pub mod canvases;
pub mod events;
