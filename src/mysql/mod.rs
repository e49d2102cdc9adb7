pub mod protocol;
pub mod packet;
pub mod server;
pub mod connection;

pub use connection::MysqlConnection;
pub use server::MysqlServer;
pub use protocol::*;
pub use packet::*;
