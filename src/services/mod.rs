pub mod chat_service;
pub mod notification_service;
pub mod squad_service;

pub use chat_service::{ChatService, ChatState, PrivateMerge};
pub use notification_service::{NotificationService, NotificationState};
pub use squad_service::SquadService;
