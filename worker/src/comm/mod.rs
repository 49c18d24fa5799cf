mod communicator;
mod solo;
mod star;

pub use communicator::Communicator;
pub use solo::Solo;
pub use star::{Star, TcpStar, connect, listen};
