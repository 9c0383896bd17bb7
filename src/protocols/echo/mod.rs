//! Echo protocol implementation.
//!
//! Line-oriented echo: every chunk a client sends is written back to the
//! same connection unchanged.
//!
//! ## Framing
//!
//! A chunk ends after a `\n` or after 1023 bytes, whichever comes first.
//! Lines longer than that come back as several chunks that concatenate to
//! the original line. Data left without a trailing newline when the client
//! closes its side is echoed as a final chunk.
//!
//! ```text
//! Request:  hello\n
//! Response: hello\n
//! ```
//!
//! There is no quit command; a session ends when the client closes the
//! stream or an I/O error occurs.

pub mod handler;
pub mod parser;

pub use handler::handle_connection;
