pub mod service;

pub use service::{AppState, Caller, build_router};
