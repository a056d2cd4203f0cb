pub mod health;
pub mod room_latest;
pub mod diagnostics;

pub use health::*;
pub use room_latest::*;
pub use diagnostics::*;
