pub mod client;
pub mod gs_service;
pub mod rm_service;
pub mod server;
