//! Reconnect state machine
//!
//! `Connecting → Open → Closed → Connecting (after delay) → ...`
//!
//! The machine owns the single reconnect timer slot. It only returns the
//! action to take; the driver performs I/O and sleeping, so the policy is
//! testable without any transport.

use crate::models::ChannelStatus;
use std::time::Duration;

/// Default fixed reconnect delay
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

/// What the driver must do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectAction {
    /// Open a new connection now
    Connect,
    /// Arm the (single) reconnect timer
    ScheduleReconnect(Duration),
    /// Disarm the pending reconnect timer
    CancelTimer,
    /// Nothing to do
    Idle,
}

/// Push channel lifecycle
#[derive(Debug, Clone)]
pub struct ReconnectState {
    status: ChannelStatus,
    retry_count: u32,
    timer_pending: bool,
    shut_down: bool,
    delay: Duration,
}

impl ReconnectState {
    pub fn new(delay: Duration) -> Self {
        Self {
            status: ChannelStatus::Closed,
            retry_count: 0,
            timer_pending: false,
            shut_down: false,
            delay,
        }
    }

    pub fn status(&self) -> ChannelStatus {
        self.status
    }

    /// Consecutive failed or closed connections since the last open
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn timer_pending(&self) -> bool {
        self.timer_pending
    }

    /// Initial connect at application start
    pub fn start(&mut self) -> ReconnectAction {
        if self.shut_down || self.status != ChannelStatus::Closed || self.timer_pending {
            return ReconnectAction::Idle;
        }
        self.status = ChannelStatus::Connecting;
        ReconnectAction::Connect
    }

    /// Connection established
    pub fn on_open(&mut self) -> ReconnectAction {
        if self.shut_down {
            return ReconnectAction::Idle;
        }
        self.status = ChannelStatus::Open;
        self.retry_count = 0;
        if self.timer_pending {
            self.timer_pending = false;
            return ReconnectAction::CancelTimer;
        }
        ReconnectAction::Idle
    }

    /// Connection closed (cleanly or with error) or an open attempt failed
    pub fn on_close(&mut self) -> ReconnectAction {
        if self.shut_down {
            return ReconnectAction::Idle;
        }
        self.status = ChannelStatus::Closed;
        if self.timer_pending {
            return ReconnectAction::Idle;
        }
        self.timer_pending = true;
        self.retry_count = self.retry_count.saturating_add(1);
        ReconnectAction::ScheduleReconnect(self.delay)
    }

    /// Reconnect timer elapsed
    pub fn on_timer(&mut self) -> ReconnectAction {
        if self.shut_down || !self.timer_pending {
            return ReconnectAction::Idle;
        }
        self.timer_pending = false;
        self.status = ChannelStatus::Connecting;
        ReconnectAction::Connect
    }

    /// Explicit teardown; no further reconnects
    pub fn shutdown(&mut self) -> ReconnectAction {
        self.shut_down = true;
        self.status = ChannelStatus::Closed;
        if self.timer_pending {
            self.timer_pending = false;
            return ReconnectAction::CancelTimer;
        }
        ReconnectAction::Idle
    }
}

impl Default for ReconnectState {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_schedules_one_timer() {
        let mut m = ReconnectState::default();
        assert_eq!(m.start(), ReconnectAction::Connect);
        assert_eq!(m.on_open(), ReconnectAction::Idle);
        assert_eq!(m.status(), ChannelStatus::Open);

        assert_eq!(
            m.on_close(),
            ReconnectAction::ScheduleReconnect(Duration::from_millis(3000))
        );
        assert_eq!(m.status(), ChannelStatus::Closed);
        assert_eq!(m.retry_count(), 1);
    }

    #[test]
    fn test_rapid_closes_do_not_overlap_timers() {
        let mut m = ReconnectState::new(Duration::from_millis(500));
        m.start();
        assert!(matches!(m.on_close(), ReconnectAction::ScheduleReconnect(_)));
        assert_eq!(m.on_close(), ReconnectAction::Idle);
        assert_eq!(m.on_close(), ReconnectAction::Idle);
        assert!(m.timer_pending());
        assert_eq!(m.retry_count(), 1);

        assert_eq!(m.on_timer(), ReconnectAction::Connect);
        assert_eq!(m.on_timer(), ReconnectAction::Idle);
        assert_eq!(m.status(), ChannelStatus::Connecting);
    }

    #[test]
    fn test_failed_reconnect_schedules_again() {
        let mut m = ReconnectState::default();
        m.start();
        m.on_close();
        assert_eq!(m.on_timer(), ReconnectAction::Connect);
        assert_eq!(
            m.on_close(),
            ReconnectAction::ScheduleReconnect(DEFAULT_RECONNECT_DELAY)
        );
        assert_eq!(m.retry_count(), 2);

        m.on_timer();
        m.on_open();
        assert_eq!(m.retry_count(), 0);
    }

    #[test]
    fn test_open_cancels_pending_timer() {
        let mut m = ReconnectState::default();
        m.start();
        m.on_close();
        assert_eq!(m.on_open(), ReconnectAction::CancelTimer);
        assert!(!m.timer_pending());
        assert_eq!(m.on_timer(), ReconnectAction::Idle);
    }

    #[test]
    fn test_shutdown_stops_reconnects() {
        let mut m = ReconnectState::default();
        m.start();
        m.on_close();
        assert_eq!(m.shutdown(), ReconnectAction::CancelTimer);
        assert_eq!(m.on_timer(), ReconnectAction::Idle);
        assert_eq!(m.on_close(), ReconnectAction::Idle);
        assert_eq!(m.start(), ReconnectAction::Idle);
        assert_eq!(m.status(), ChannelStatus::Closed);
    }
}
