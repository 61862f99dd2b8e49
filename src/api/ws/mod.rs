pub mod canvases;
