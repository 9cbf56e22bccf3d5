//! Application messages exchanged between the console and its agents.
mod io;
mod types;


pub use io::{MAX_MESSAGE_BYTES, decode_line, encode_line};
pub use types::*;
