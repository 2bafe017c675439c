pub mod mjpeg;
mod server;

pub use server::{router, serve, start_server, AppState};
