pub mod session;
pub mod session_cookie;

pub use session::{AuthState, LoginOutcome, SessionManager};
pub use session_cookie::SessionCookieStore;
