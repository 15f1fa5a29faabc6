/*!
 * Client-facing server.
 *
 * - `protocol`: named-event frames exchanged with clients
 * - `dispatcher`: routes frames to sessions and the query pipeline
 * - `tcp`: newline-delimited JSON listener
 */

pub mod dispatcher;
pub mod protocol;
pub mod tcp;

// Re-export main types
pub use dispatcher::{Dispatcher, Flow};
pub use protocol::{ClientEvent, ServerEvent};
pub use tcp::TcpServer;
