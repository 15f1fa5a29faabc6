/*!
 * Client session management.
 *
 * This module provides:
 * - Sessions that survive transport loss for a grace window
 * - Rooms of sessions bound to the same database
 * - The [`Transport`] seam between session state and connection I/O
 */

pub mod manager;
pub mod models;
pub mod room;
pub mod transport;

// Re-export main types
pub use manager::{InFlightGuard, SessionManager};
pub use models::{BindOutcome, ConnectionStats, DisconnectReason, ResumeResult, SweepReport};
pub use room::Room;
pub use transport::{ChannelTransport, Outbound, Transport, TransportError};
