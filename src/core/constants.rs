//! Protocol constants and defaults.
//!
//! Wire-level bytes and keywords are fixed by the peers already deployed in
//! the field and MUST NOT be changed. Timing values are defaults only; every
//! one of them can be overridden through the config types.

use std::time::Duration;

// =============================================================================
// WIRE FRAMING
// =============================================================================

/// Frame terminator byte.
pub const DEFAULT_FRAME_END: u8 = b'\r';

/// Message separator byte inside a frame.
pub const DEFAULT_MSG_SEP: u8 = b'\n';

/// Escape byte used to stuff delimiter bytes occurring inside a message.
pub const DEFAULT_ESCAPE: u8 = 0x1B;

/// Code following the escape byte for an embedded frame terminator.
pub const ESCAPED_FRAME_END: u8 = 0x1C;

/// Code following the escape byte for an embedded message separator.
pub const ESCAPED_MSG_SEP: u8 = 0x1D;

/// Code following the escape byte for an embedded escape byte.
pub const ESCAPED_ESCAPE: u8 = 0x1E;

// =============================================================================
// DEVICE PROTOCOL (SQM-LU / SQM-LE)
// =============================================================================

/// Character terminating every photometer command.
pub const COMMAND_TERMINATOR: char = 'x';

/// Command used to probe a candidate address during discovery.
pub const PROBE_COMMAND: &str = "ix";

/// Echo character expected in the probe response.
pub const PROBE_ECHO: char = 'i';

/// Line terminator of photometer responses.
pub const RESPONSE_LINE_END: u8 = b'\n';

/// Default baud rate for USB photometers and radio modems.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// TCP port of network-attached photometers.
pub const SQM_LE_PORT: u16 = 10001;

/// UDP port SQM-LE network modules answer discovery queries on.
pub const SQM_LE_DISCOVERY_PORT: u16 = 30718;

/// Discovery query broadcast to SQM-LE network modules.
pub const SQM_LE_DISCOVERY_QUERY: [u8; 4] = [0x00, 0x00, 0x00, 0xF6];

/// Fourth byte of a discovery reply from an SQM-LE network module.
pub const SQM_LE_DISCOVERY_REPLY: u8 = 0xF7;

/// Default retry budget for a single command exchange.
pub const DEFAULT_MAX_TRIES: u32 = 3;

/// Upper bound on candidate addresses probed during discovery.
pub const MAX_SCAN_CANDIDATES: usize = 100;

// =============================================================================
// DEVICE TIMING
// =============================================================================

/// Delay between writing a command and reading its response.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Maximum wait for one response line.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Pause between a failed attempt and the reset that follows it.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Pause between closing and reopening a connection during reset.
pub const DEFAULT_RESET_PAUSE: Duration = Duration::from_millis(100);

/// Interval of the background continuous-read loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Maximum wait when probing a candidate address.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Maximum wait for a TCP connection to a network photometer.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Window during which SQM-LE discovery replies are collected.
pub const DEFAULT_DISCOVERY_WINDOW: Duration = Duration::from_secs(3);

// =============================================================================
// RELAY
// =============================================================================

/// Default TCP port the relay listens on for the host.
pub const DEFAULT_RELAY_PORT: u16 = 42069;

/// Backoff after a downstream connectivity failure.
pub const DEFAULT_DOWNSTREAM_BACKOFF: Duration = Duration::from_secs(1);

/// Capacity of the channel carrying sync replies from the radio reader.
pub const SYNC_REPLY_CAPACITY: usize = 64;

/// Messages held by an outgoing buffer before the oldest are dropped.
pub const OUTGOING_CAPACITY: usize = 4096;

/// Coalescing delay between the first wakeup and the drain of a batch.
pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_millis(5);

// =============================================================================
// SYNC
// =============================================================================

/// Reserved keyword that triggers (and prefixes) reconciliation traffic.
pub const SYNC_KEYWORD: &str = "rsync";

/// Inventory request token (`rsync list`).
pub const SYNC_LIST: &str = "list";

/// Inventory response header token (`rsync files`).
pub const SYNC_FILES: &str = "files";

/// Separator between path and timestamp in an inventory entry.
pub const INVENTORY_FIELD_SEP: char = ';';

/// Suffix selecting the files that take part in reconciliation.
pub const DATA_FILE_SUFFIX: &str = ".dat";

/// Maximum wait for the peer's inventory.
pub const DEFAULT_INVENTORY_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum wait for one requested file.
pub const DEFAULT_FILE_TIMEOUT: Duration = Duration::from_secs(120);
