pub mod btle;
pub mod codec;
pub mod connection;
pub mod constants;
pub mod settle;
pub mod transport;
pub mod types;
