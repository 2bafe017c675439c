//! Camera-to-browser classification feed.
//!
//! A producer thread reads frames, finds moving regions, runs every
//! configured classifier, records results in a bounded history, draws the
//! annotations and publishes a JPEG that HTTP clients receive as a
//! `multipart/x-mixed-replace` stream.

pub mod analytics;
pub mod api;
pub mod buffer;
pub mod camera;
pub mod config;
pub mod frame;
pub mod render;
pub mod storage;

/// Files under `src/assets/`: the dashboard page and the default caption font.
#[derive(rust_embed::Embed)]
#[folder = "src/assets/"]
pub(crate) struct Assets;
