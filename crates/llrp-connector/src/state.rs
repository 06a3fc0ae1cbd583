//! Connection state shared between the connector's workers.
//!
//! Every field is an atomic: the setup sequence, the socket reader, the
//! dispatchers and the liveness monitor each read and write it without a
//! lock. Two workers racing on a transition is tolerated; at worst the
//! reader is set up twice and the ROSpec conflict path sorts it out.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use tokio::time::Instant;

/// Where a connector is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    Offline = 0,
    Connecting = 1,
    AwaitConnectEvent = 2,
    Capabilities = 3,
    Configure = 4,
    AddRoSpec = 5,
    ConflictRecovery = 6,
    EnableRoSpec = 7,
    Online = 8,
    Stopping = 9,
    /// Closed for good; no further setup attempts.
    Terminated = 10,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::AwaitConnectEvent,
            3 => Self::Capabilities,
            4 => Self::Configure,
            5 => Self::AddRoSpec,
            6 => Self::ConflictRecovery,
            7 => Self::EnableRoSpec,
            8 => Self::Online,
            9 => Self::Stopping,
            10 => Self::Terminated,
            _ => Self::Offline,
        }
    }

    /// True for the transient states between `Offline` and `Online`.
    pub fn is_setting_up(self) -> bool {
        matches!(
            self,
            Self::Connecting
                | Self::AwaitConnectEvent
                | Self::Capabilities
                | Self::Configure
                | Self::AddRoSpec
                | Self::ConflictRecovery
                | Self::EnableRoSpec
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Offline => "OFFLINE",
            Self::Connecting => "CONNECTING",
            Self::AwaitConnectEvent => "AWAIT_CONNECT_EVENT",
            Self::Capabilities => "CAPABILITIES",
            Self::Configure => "CONFIGURE",
            Self::AddRoSpec => "ADD_ROSPEC",
            Self::ConflictRecovery => "CONFLICT_RECOVERY",
            Self::EnableRoSpec => "ENABLE_ROSPEC",
            Self::Online => "ONLINE",
            Self::Stopping => "STOPPING",
            Self::Terminated => "TERMINATED",
        };
        f.write_str(s)
    }
}

/// Lock-free status cell for one reader connection.
#[derive(Debug)]
pub struct ConnectionStatus {
    state: AtomicU8,
    reader_offline: AtomicBool,
    sink_available: AtomicBool,
    setup_in_flight: AtomicBool,
    /// Milliseconds since `epoch` of the last keepalive; 0 means never.
    last_keepalive_ms: AtomicU64,
    /// Current connection generation; bumped for every new TCP session.
    generation: AtomicU64,
    epoch: Instant,
}

impl ConnectionStatus {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Offline as u8),
            reader_offline: AtomicBool::new(true),
            sink_available: AtomicBool::new(true),
            setup_in_flight: AtomicBool::new(false),
            last_keepalive_ms: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `next` unless the connector has been terminated.
    ///
    /// Returns false if the transition was refused.
    pub fn set_state(&self, next: ConnectionState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current == ConnectionState::Terminated as u8 {
                return next == ConnectionState::Terminated;
            }
            match self.state.compare_exchange_weak(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(prev) => {
                    if prev != next as u8 {
                        tracing::debug!(
                            from = %ConnectionState::from_u8(prev),
                            to = %next,
                            "Connection state"
                        );
                    }
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == ConnectionState::Terminated
    }

    pub fn reader_offline(&self) -> bool {
        self.reader_offline.load(Ordering::Acquire)
    }

    /// Set the reader-offline flag, returning its previous value.
    pub fn swap_reader_offline(&self, offline: bool) -> bool {
        self.reader_offline.swap(offline, Ordering::AcqRel)
    }

    pub fn sink_available(&self) -> bool {
        self.sink_available.load(Ordering::Acquire)
    }

    pub fn set_sink_available(&self, available: bool) {
        self.sink_available.store(available, Ordering::Release);
    }

    /// Claim the single setup slot. Returns false if an attempt is running.
    pub fn try_begin_setup(&self) -> bool {
        self.setup_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn end_setup(&self) {
        self.setup_in_flight.store(false, Ordering::Release);
    }

    pub fn setup_in_flight(&self) -> bool {
        self.setup_in_flight.load(Ordering::Acquire)
    }

    /// Record a keepalive observed now.
    pub fn stamp_keepalive(&self) {
        self.stamp_keepalive_at(Instant::now());
    }

    pub fn stamp_keepalive_at(&self, at: Instant) {
        let ms = at.saturating_duration_since(self.epoch).as_millis() as u64;
        // Keep 0 reserved for "never".
        self.last_keepalive_ms.store(ms.max(1), Ordering::Release);
    }

    /// When the last keepalive was seen, if ever.
    pub fn last_keepalive(&self) -> Option<Instant> {
        match self.last_keepalive_ms.load(Ordering::Acquire) {
            0 => None,
            ms => Some(self.epoch + std::time::Duration::from_millis(ms)),
        }
    }

    /// Whether the keepalive deadline has passed.
    ///
    /// A connection that has never seen a keepalive counts as expired.
    pub fn keepalive_expired(&self, now: Instant, threshold: std::time::Duration) -> bool {
        match self.last_keepalive() {
            None => true,
            Some(last) => now.saturating_duration_since(last) > threshold,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Start a new connection generation and return its number.
    pub fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::new()
    }
}
