use std::time::Duration;

/// Default port shared by the server and client roles.
pub const DEFAULT_PORT: u16 = 23432;

/// Per-destination write deadline applied during fan-out unless overridden.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Hardening knobs for the relay. Neither is part of the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySettings {
    /// Largest payload a handler accepts; `None` accepts any declared length.
    pub max_frame_len: Option<u64>,
    /// Deadline for writing one frame to one destination; `None` waits forever.
    pub write_timeout: Option<Duration>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            max_frame_len: None,
            write_timeout: Some(DEFAULT_WRITE_TIMEOUT),
        }
    }
}
