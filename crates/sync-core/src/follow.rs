use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    api::FollowApi,
    channel::SessionChannels,
    error::SyncError,
    types::{FollowStatus, PersonaId, SessionEvent},
};

/// Status refresh cadence while a follow request is pending.
pub const DEFAULT_FOLLOW_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct RunningPoll {
    subject: PersonaId,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl RunningPoll {
    fn is_live(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Follow-status state machine with a cancellable poll task.
///
/// `None` status means unknown. Every status comes verbatim from a server
/// response; the client never promotes `Pending` by itself. While the adopted
/// phase is `Pending` one poll task refreshes the status every interval; it is
/// cancelled when the phase leaves `Pending`, on [`FollowPoller::stop`] and on
/// drop.
pub struct FollowPoller<A: FollowApi> {
    api: Arc<A>,
    channels: SessionChannels,
    interval: Duration,
    status: Arc<Mutex<Option<FollowStatus>>>,
    poll: Option<RunningPoll>,
}

impl<A: FollowApi> FollowPoller<A> {
    pub fn new(api: Arc<A>, channels: SessionChannels) -> Self {
        Self {
            api,
            channels,
            interval: DEFAULT_FOLLOW_POLL_INTERVAL,
            status: Arc::new(Mutex::new(None)),
            poll: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Last status adopted from the server, `None` while unknown.
    pub fn status(&self) -> Option<FollowStatus> {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_polling(&self) -> bool {
        self.poll.as_ref().is_some_and(RunningPoll::is_live)
    }

    /// Issue the create call and adopt its response.
    ///
    /// On failure nothing transitions. Concurrent requests for the same
    /// subject are not deduplicated here.
    pub async fn request_follow(&mut self, subject: &PersonaId) -> Result<FollowStatus, SyncError> {
        info!(%subject, "requesting follow");
        let status = self.api.create_follow(subject).await.inspect_err(|err| {
            warn!(%subject, error = %err, "follow request failed");
        })?;
        self.adopt(subject, status.clone());
        Ok(status)
    }

    /// Read the current status and adopt it.
    pub async fn refresh_status(&mut self, subject: &PersonaId) -> Result<FollowStatus, SyncError> {
        let status = self.api.follow_status(subject).await.inspect_err(|err| {
            warn!(%subject, error = %err, "follow status read failed");
        })?;
        self.adopt(subject, status.clone());
        Ok(status)
    }

    /// Cancel the poll task, if any.
    pub fn stop(&mut self) {
        let Some(poll) = self.poll.take() else {
            return;
        };
        {
            // Taken so a poll response cannot be adopted after this point.
            let _guard = self.status.lock().unwrap_or_else(PoisonError::into_inner);
            poll.stop.cancel();
        }
        poll.task.abort();
        debug!(subject = %poll.subject, "follow poll cancelled");
    }

    fn adopt(&mut self, subject: &PersonaId, status: FollowStatus) {
        if status.subject != *subject {
            warn!(
                requested = %subject,
                reported = %status.subject,
                "follow response names a different persona"
            );
        }

        let settled = status.phase.is_terminal();
        {
            let mut guard = self.status.lock().unwrap_or_else(PoisonError::into_inner);
            *guard = Some(status.clone());
        }
        self.channels.emit(SessionEvent::FollowStatusChanged(status));

        if settled {
            self.stop();
        } else {
            self.ensure_polling(subject);
        }
    }

    fn ensure_polling(&mut self, subject: &PersonaId) {
        if let Some(poll) = &self.poll
            && poll.is_live()
            && poll.subject == *subject
        {
            return;
        }
        self.stop();

        let stop = CancellationToken::new();
        let task = tokio::spawn(poll_loop(
            Arc::clone(&self.api),
            subject.clone(),
            self.interval,
            stop.child_token(),
            Arc::clone(&self.status),
            self.channels.clone(),
        ));
        debug!(%subject, interval_ms = self.interval.as_millis() as u64, "follow poll started");

        self.poll = Some(RunningPoll {
            subject: subject.clone(),
            stop,
            task,
        });
    }
}

impl<A: FollowApi> Drop for FollowPoller<A> {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_loop<A: FollowApi>(
    api: Arc<A>,
    subject: PersonaId,
    interval: Duration,
    stop: CancellationToken,
    status: Arc<Mutex<Option<FollowStatus>>>,
    channels: SessionChannels,
) {
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let result = tokio::select! {
            _ = stop.cancelled() => break,
            result = api.follow_status(&subject) => result,
        };

        match result {
            Ok(next) => {
                let settled = next.phase.is_terminal();
                {
                    let mut guard = status.lock().unwrap_or_else(PoisonError::into_inner);
                    if stop.is_cancelled() {
                        break;
                    }
                    *guard = Some(next.clone());
                    channels.emit(SessionEvent::FollowStatusChanged(next));
                }
                if settled {
                    debug!(%subject, "follow status settled; poll finished");
                    break;
                }
            }
            Err(err) => {
                // No guessed transition: stay pending and poll again.
                warn!(%subject, error = %err, "follow status poll failed");
                channels.emit(err.to_event());
            }
        }
    }
}
