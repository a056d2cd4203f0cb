pub mod session;

pub use session::websocket_handler;
