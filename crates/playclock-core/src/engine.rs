//! Session lifecycle state machine

use chrono::{DateTime, Utc};
use playclock_api::{Session, SessionStatus};
use playclock_store::Store;
use playclock_util::{DeviceId, PlayclockError, Result, SessionId};
use std::sync::Arc;
use tracing::{debug, info};

use crate::{DeadlineQueue, DeviceLocks, Notifier};

/// Outcome of an expiry check on one device
#[derive(Debug)]
pub enum ExpireOutcome {
    /// The session's time ran out and it was marked expired
    Expired(Session),
    /// The session is active but its deadline moved past the scheduled
    /// check. The caller should re-arm for the returned deadline.
    NotDue { deadline: DateTime<Utc> },
    /// No active session to expire (paused, already over, or none)
    Skipped,
}

/// The session lifecycle engine.
///
/// All mutating operations serialize per device through [`DeviceLocks`],
/// re-read current state under the lock, write through the store, and only
/// then publish a notice. The notice goes out before the lock is released,
/// so observers see per-device notices in commit order.
///
/// Remaining time is never stored. It is derived from `start_time` and
/// `duration_minutes` at read time, so every observer computes the same
/// value from the same persisted facts.
pub struct SessionEngine {
    store: Arc<dyn Store>,
    notifier: Notifier,
    deadlines: Arc<DeadlineQueue>,
    locks: DeviceLocks,
}

impl SessionEngine {
    pub fn new(store: Arc<dyn Store>, notifier: Notifier, deadlines: Arc<DeadlineQueue>) -> Self {
        Self {
            store,
            notifier,
            deadlines,
            locks: DeviceLocks::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Start a session on an idle device.
    ///
    /// Fails with `SessionConflict` if the device already has an active or
    /// paused session. The new session's deadline is armed for expiry.
    pub async fn start(
        &self,
        device_id: &DeviceId,
        duration_minutes: i64,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        if duration_minutes <= 0 {
            return Err(PlayclockError::validation(
                "duration_minutes must be positive",
            ));
        }
        if amount < 0 {
            return Err(PlayclockError::validation("amount must not be negative"));
        }

        let _guard = self.locks.acquire(device_id).await;

        if self.store.get_device(device_id)?.is_none() {
            return Err(PlayclockError::DeviceNotFound(device_id.clone()));
        }
        if let Some(existing) = self.store.current_session(device_id)? {
            debug!(
                device_id = %device_id,
                existing_session = %existing.id,
                "Start rejected, device already has a session"
            );
            return Err(PlayclockError::SessionConflict(device_id.clone()));
        }

        let session = Session {
            id: SessionId::new(),
            device_id: device_id.clone(),
            start_time: now,
            duration_minutes,
            amount,
            status: SessionStatus::Active,
            paused_at: None,
        };
        self.store.insert_session(&session)?;
        self.deadlines.arm(session.deadline(), device_id.clone());

        info!(
            session_id = %session.id,
            device_id = %device_id,
            duration_minutes,
            amount,
            deadline = %session.deadline(),
            "Session started"
        );
        self.notifier.device_changed(device_id);

        Ok(session)
    }

    /// Extend the current session by `extra_minutes`.
    ///
    /// Works on both active and paused sessions. A paused session keeps its
    /// paused state; the added time becomes visible when it resumes. For an
    /// active session the new deadline is armed for expiry.
    pub async fn add_time(
        &self,
        device_id: &DeviceId,
        extra_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        if extra_minutes <= 0 {
            return Err(PlayclockError::validation("extra_minutes must be positive"));
        }

        let _guard = self.locks.acquire(device_id).await;

        let Some(mut session) = self.store.current_session(device_id)? else {
            return Err(PlayclockError::SessionNotFound(device_id.clone()));
        };

        session.duration_minutes += extra_minutes;
        self.store.update_session(&session)?;
        if session.status == SessionStatus::Active {
            self.deadlines.arm(session.deadline(), device_id.clone());
        }

        info!(
            session_id = %session.id,
            device_id = %device_id,
            extra_minutes,
            duration_minutes = session.duration_minutes,
            remaining_seconds = session.remaining_seconds(now),
            "Time added"
        );
        self.notifier.device_changed(device_id);

        Ok(session)
    }

    /// Pause the current session, freezing its remaining time.
    ///
    /// Only an active session can pause. The frozen budget is captured by
    /// recording `paused_at`; nothing else changes until resume.
    pub async fn pause(&self, device_id: &DeviceId, now: DateTime<Utc>) -> Result<Session> {
        let _guard = self.locks.acquire(device_id).await;

        let Some(mut session) = self.store.current_session(device_id)? else {
            return Err(PlayclockError::invalid_state(format!(
                "no session to pause on {device_id}"
            )));
        };
        if session.status != SessionStatus::Active {
            return Err(PlayclockError::invalid_state(format!(
                "cannot pause a {} session on {device_id}",
                session.status
            )));
        }

        let frozen_seconds = session.remaining_seconds(now);
        session.status = SessionStatus::Paused;
        session.paused_at = Some(now);
        self.store.update_session(&session)?;

        info!(
            session_id = %session.id,
            device_id = %device_id,
            frozen_seconds,
            "Session paused"
        );
        self.notifier.device_changed(device_id);

        Ok(session)
    }

    /// Resume a paused session with exactly the budget it froze with.
    ///
    /// The pause gap is folded into `start_time`, shifting the deadline
    /// forward by the time spent paused. Observers keep deriving remaining
    /// time from the same two fields as before.
    pub async fn resume(&self, device_id: &DeviceId, now: DateTime<Utc>) -> Result<Session> {
        let _guard = self.locks.acquire(device_id).await;

        let Some(mut session) = self.store.current_session(device_id)? else {
            return Err(PlayclockError::invalid_state(format!(
                "no session to resume on {device_id}"
            )));
        };
        if session.status != SessionStatus::Paused {
            return Err(PlayclockError::invalid_state(format!(
                "cannot resume a {} session on {device_id}",
                session.status
            )));
        }
        let paused_at = session.paused_at.ok_or_else(|| {
            PlayclockError::internal(format!("paused session {} has no paused_at", session.id))
        })?;

        let paused_for = now - paused_at;
        session.start_time += paused_for;
        session.status = SessionStatus::Active;
        session.paused_at = None;
        self.store.update_session(&session)?;
        self.deadlines.arm(session.deadline(), device_id.clone());

        info!(
            session_id = %session.id,
            device_id = %device_id,
            paused_seconds = paused_for.num_seconds(),
            deadline = %session.deadline(),
            "Session resumed"
        );
        self.notifier.device_changed(device_id);

        Ok(session)
    }

    /// End the current session early at the operator's request.
    ///
    /// Valid from both active and paused. The session is marked cancelled,
    /// never expired, so the history distinguishes an operator stop from
    /// time running out.
    pub async fn end(&self, device_id: &DeviceId) -> Result<Session> {
        let _guard = self.locks.acquire(device_id).await;

        let Some(mut session) = self.store.current_session(device_id)? else {
            return Err(PlayclockError::invalid_state(format!(
                "no session to end on {device_id}"
            )));
        };

        session.status = SessionStatus::Cancelled;
        session.paused_at = None;
        self.store.update_session(&session)?;

        info!(
            session_id = %session.id,
            device_id = %device_id,
            "Session ended by operator"
        );
        self.notifier.device_changed(device_id);

        Ok(session)
    }

    /// Check whether the device's session is due and expire it if so.
    ///
    /// Called by the expiry scheduler when an armed deadline fires. A stale
    /// deadline (session since paused, ended, extended, or replaced) is not
    /// an error; the outcome tells the scheduler what actually held.
    pub async fn expire(&self, device_id: &DeviceId, now: DateTime<Utc>) -> Result<ExpireOutcome> {
        let _guard = self.locks.acquire(device_id).await;

        let Some(mut session) = self.store.current_session(device_id)? else {
            return Ok(ExpireOutcome::Skipped);
        };
        // A paused session has no deadline until it resumes
        if session.status != SessionStatus::Active {
            return Ok(ExpireOutcome::Skipped);
        }

        let deadline = session.deadline();
        if deadline > now {
            return Ok(ExpireOutcome::NotDue { deadline });
        }

        session.status = SessionStatus::Expired;
        self.store.update_session(&session)?;

        info!(
            session_id = %session.id,
            device_id = %device_id,
            deadline = %deadline,
            "Session expired"
        );
        self.notifier.device_changed(device_id);
        self.notifier.time_over(device_id);

        Ok(ExpireOutcome::Expired(session))
    }

    /// Re-arm deadlines for sessions that were active when the process last
    /// stopped. Returns how many were re-armed. Sessions whose deadline
    /// passed while the daemon was down expire on the first sweep.
    pub fn recover(&self, now: DateTime<Utc>) -> Result<usize> {
        let sessions = self.store.active_sessions()?;
        for session in &sessions {
            let overdue = session.deadline() <= now;
            self.deadlines
                .arm(session.deadline(), session.device_id.clone());
            debug!(
                session_id = %session.id,
                device_id = %session.device_id,
                deadline = %session.deadline(),
                overdue,
                "Deadline re-armed"
            );
        }
        if !sessions.is_empty() {
            info!(count = sessions.len(), "Recovered active sessions");
        }
        Ok(sessions.len())
    }
}
