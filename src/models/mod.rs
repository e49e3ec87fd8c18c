pub mod conversation;
pub mod error;
pub mod message;
pub mod messages;
pub mod notification;
pub mod session;
pub mod squad;

pub use conversation::*;
pub use error::*;
pub use message::*;
pub use messages::*;
pub use notification::*;
pub use session::*;
pub use squad::*;
