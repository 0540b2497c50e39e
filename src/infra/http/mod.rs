mod handlers;
mod middleware;

pub use handlers::{ProxyState, build_router};
