#![doc = "startrek-net-udp: a non-blocking `Channel` implementation over `std::net::UdpSocket`."]

pub mod channel;

pub use channel::UdpChannel;
