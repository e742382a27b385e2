//! Memcached ASCII protocol, client side

pub mod command;
pub mod parser;
pub mod request;

pub use command::{MAX_KEY_LENGTH, Reply, is_printable_key, is_valid_key};
pub use parser::{MAX_VALUE_LENGTH, ParseResult, parse_reply};
pub use request::RequestWriter;
