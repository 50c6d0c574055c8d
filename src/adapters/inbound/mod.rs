mod proxy_listener;
mod proxy_server;

pub use proxy_listener::{forward, ProxyListener};
pub use proxy_server::{ProxyError, ProxyServer};
