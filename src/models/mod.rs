pub mod messages;
pub mod health;
pub mod ready;
pub mod diagnostics;
pub mod room_latest;
pub mod error;

pub use messages::*;
pub use health::*;
pub use ready::*;
pub use diagnostics::*;
pub use room_latest::*;
pub use error::*;
