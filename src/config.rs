//! Tunable knobs for an [`IoHandle`](crate::io_handle::IoHandle).

/// Durability level applied to commits, mapped onto `PRAGMA SYNCHRONOUS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Synchronicity {
    Off,
    #[default]
    Normal,
    Full,
    Extra,
}

impl Synchronicity {
    pub(crate) fn pragma_value(self) -> &'static str {
        match self {
            Synchronicity::Off => "OFF",
            Synchronicity::Normal => "NORMAL",
            Synchronicity::Full => "FULL",
            Synchronicity::Extra => "EXTRA",
        }
    }
}

/// Construction-time configuration for an [`IoHandle`](crate::io_handle::IoHandle).
#[derive(Debug, Clone)]
pub struct IoHandleConfig {
    /// Open the connection read-only; no write-side pragmas are applied
    /// and no initial transaction is opened.
    pub read_only: bool,
    /// Number of 20ms sleeps `ResultSet::next` and `PreparedStatement`
    /// execution retry on `SQLITE_BUSY` before giving up.
    pub busy_retry_timeout: u32,
    /// Number of 200ms sleeps `close()` retries on `SQLITE_BUSY`.
    pub close_busy_retry_timeout: u32,
    /// Durability level applied immediately after opening.
    pub synchronicity: Synchronicity,
}

impl Default for IoHandleConfig {
    fn default() -> Self {
        IoHandleConfig {
            read_only: false,
            busy_retry_timeout: 50,
            close_busy_retry_timeout: 25,
            synchronicity: Synchronicity::Normal,
        }
    }
}

impl IoHandleConfig {
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn busy_retry_timeout(mut self, retries: u32) -> Self {
        self.busy_retry_timeout = retries;
        self
    }

    pub fn close_busy_retry_timeout(mut self, retries: u32) -> Self {
        self.close_busy_retry_timeout = retries;
        self
    }

    pub fn synchronicity(mut self, level: Synchronicity) -> Self {
        self.synchronicity = level;
        self
    }
}
