//! Shared types for the playclockd API

use chrono::{DateTime, Duration, Utc};
use playclock_util::{DeviceId, SessionId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Paused,
    /// Ran out of time
    Expired,
    /// Ended by the operator before running out
    Cancelled,
}

impl SessionStatus {
    /// Active or paused: the session currently occupying its device
    pub fn is_current(&self) -> bool {
        matches!(self, SessionStatus::Active | SessionStatus::Paused)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Expired | SessionStatus::Cancelled)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Expired => "expired",
            SessionStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Kind of terminal a device is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Computer,
    Console,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceKind::Computer => "computer",
            DeviceKind::Console => "console",
        };
        write!(f, "{}", s)
    }
}

/// Whether a device's terminal client is currently reachable.
///
/// This is an input signal only: session transitions never depend on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Online,
    Offline,
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Connectivity::Online => "online",
            Connectivity::Offline => "offline",
        };
        write!(f, "{}", s)
    }
}

/// A paid play session on one device.
///
/// Remaining time is never stored; it is derived from `start_time`,
/// `duration_minutes` and `status` via [`Session::remaining_seconds`], and
/// every observer (daemon, dashboard, lock client) uses the same derivation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub device_id: DeviceId,
    /// When the countdown started. Resume shifts this forward by the paused
    /// interval, so the deadline always follows from it directly.
    pub start_time: DateTime<Utc>,
    /// Total granted minutes (initial plus added). Never decreases.
    pub duration_minutes: i64,
    /// Amount charged, in the venue's smallest currency unit. Opaque here.
    #[serde(default)]
    pub amount: i64,
    pub status: SessionStatus,
    /// Set exactly while `status` is `paused`.
    pub paused_at: Option<DateTime<Utc>>,
}

impl Session {
    /// The instant this session runs out if left alone.
    pub fn deadline(&self) -> DateTime<Utc> {
        self.start_time + Duration::minutes(self.duration_minutes)
    }

    /// Whole seconds left before expiry at `now`, clamped at zero.
    ///
    /// Returns 0 for any non-active status. A paused session reports 0 here;
    /// its frozen budget lives in `start_time`/`duration_minutes` and becomes
    /// visible again on resume. This formula is part of the wire contract:
    /// clients polling raw session rows compute the same value the daemon
    /// reports.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        if self.status != SessionStatus::Active {
            return 0;
        }
        (self.deadline() - now).num_seconds().max(0)
    }
}

/// A terminal in the venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub kind: DeviceKind,
    pub connectivity: Connectivity,
    /// Last contact from the device's client. Absent until first contact.
    pub last_seen: Option<DateTime<Utc>>,
}

impl Device {
    pub fn is_online(&self) -> bool {
        self.connectivity == Connectivity::Online
    }
}

/// Device plus its current session, as shown on the dashboard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceView {
    pub device: Device,
    /// The active or paused session, if any
    pub session: Option<Session>,
    /// Remaining seconds at snapshot time (0 when nothing is counting down)
    pub remaining_seconds: i64,
}

impl DeviceView {
    pub fn new(device: Device, session: Option<Session>, now: DateTime<Utc>) -> Self {
        let remaining_seconds = session
            .as_ref()
            .map(|s| s.remaining_seconds(now))
            .unwrap_or(0);
        Self {
            device,
            session,
            remaining_seconds,
        }
    }
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub live: bool,
    pub ready: bool,
    pub store_ok: bool,
    pub device_count: usize,
    pub active_sessions: usize,
}
