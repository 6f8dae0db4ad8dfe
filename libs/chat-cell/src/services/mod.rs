pub mod connection;
pub mod history;
pub mod session;
pub mod transport;

pub use connection::*;
pub use history::*;
pub use session::*;
pub use transport::*;
