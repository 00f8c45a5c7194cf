#![doc = "startrek-net-tcp: a non-blocking `Channel` implementation over `std::net::TcpStream`."]

pub mod channel;
pub mod listener;

pub use channel::TcpChannel;
pub use listener::TcpListenerChannel;
