pub mod api;
pub mod app;
pub mod client;
pub mod dto;
pub mod error;
pub mod models;
pub mod realtime;
pub mod repositories;
pub mod sync;
pub mod telemetry;
pub mod usecases;
