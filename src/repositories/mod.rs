pub mod canvases;
pub mod events;
pub mod shapes;
