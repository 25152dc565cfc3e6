//! Wire and runtime constants shared by both transport roles.

use std::time::Duration;

// =============================================================================
// FRAMING
// =============================================================================

/// Maximum number of bytes in a length prefix.
///
/// The prefix is a 7-bit varint carrying a 32-bit length, so five bytes
/// cover every representable value.
pub const MAX_LENGTH_PREFIX_SIZE: usize = 5;

/// Continuation bit of a length prefix byte.
pub const LENGTH_CONTINUATION_BIT: u8 = 0x80;

/// Payload bits of a length prefix byte.
pub const LENGTH_VALUE_MASK: u8 = 0x7F;

/// Largest length a prefix may carry (mirrors a signed 32-bit length).
pub const MAX_ENCODABLE_LENGTH: usize = i32::MAX as usize;

/// Default upper bound on a single packet's payload size.
///
/// Packets are unbounded up to what the length prefix can carry; a smaller
/// cap is opt-in through the client configuration.
pub const DEFAULT_MAX_PACKET_SIZE: usize = MAX_ENCODABLE_LENGTH;

// =============================================================================
// CONNECTION
// =============================================================================

/// Default timeout for an actively-opened connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the buffered reader wrapped around each read half.
pub const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Host used by the builders when none is given.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Port used by the builders when none is given.
pub const DEFAULT_PORT: u16 = 9999;

/// Pause after a failed accept before trying again.
pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);
