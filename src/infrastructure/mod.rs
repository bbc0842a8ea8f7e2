// Infrastructure layer - Storage, configuration and external adapters
pub mod broadcast_publisher;
pub mod checkpoint;
pub mod config;
pub mod http_publisher;
pub mod http_response;
pub mod ring_buffer;
pub mod status_stream;
