pub mod client;
pub mod dns;
pub mod pool;
pub mod timed_io;
