pub mod http;
pub mod http_client;
pub mod http_handler;

pub use http::server::HyperServer;
pub use http_client::HyperHttpClient;
pub use http_handler::MirrorHandler;
