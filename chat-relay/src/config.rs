use std::time::Duration;

/// Port the relay listens on when none is configured.
pub const DEFAULT_PORT: u16 = 7;

/// Delay applied before telling a requester that an invite target does not exist.
pub const DEFAULT_NOT_FOUND_DELAY: Duration = Duration::from_secs(2);

/// Runtime settings shared by the accept loop and every session.
///
/// `Default` reproduces the legacy relay exactly: no connection limit, unbounded
/// outbound queues and a two second `_usernotfound_` delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub not_found_delay: Duration,
    /// Upper bound on concurrently served sessions. `None` accepts without limit.
    pub max_connections: Option<usize>,
    /// Capacity of each session's outbound queue. `None` means unbounded; when set, a
    /// session whose queue fills up is disconnected.
    pub outbound_capacity: Option<usize>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            not_found_delay: DEFAULT_NOT_FOUND_DELAY,
            max_connections: None,
            outbound_capacity: None,
        }
    }
}
