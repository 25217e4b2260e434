//! Streaming transport: JPEG encoding, MJPEG framing and the HTTP server.

mod http;
pub mod mjpeg;
mod server;

pub use mjpeg::{JpegEncoder, BOUNDARY, STREAM_CONTENT_TYPE};
pub use server::{
    ServerConfig, SessionFactory, SessionSettings, SourcePool, StreamHandle, StreamServer,
};
