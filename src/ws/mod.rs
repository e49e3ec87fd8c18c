pub mod connection;
pub mod presence;
pub mod protocol;
pub mod transport;

pub use connection::{ConnectionEvent, ConnectionManager, ConnectionSettings};
pub use presence::PresenceCache;
pub use transport::{Connector, SocketLink, TungsteniteConnector};
