use crate::{error::SyncError, types::ChannelState};

/// Push-channel lifecycle.
///
/// `Disconnected|Failed -> Connecting -> Connected`, any state `-> Failed` on a
/// transport error and `-> Disconnected` on close. Re-entrant opens are the
/// caller's job: close first, then `begin_open`.
#[derive(Debug, Clone, Default)]
pub struct ChannelStateMachine {
    state: ChannelState,
}

impl ChannelStateMachine {
    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ChannelState::Connected
    }

    pub fn begin_open(&mut self) -> Result<ChannelState, SyncError> {
        self.transition_from_any_of(
            &[ChannelState::Disconnected, ChannelState::Failed],
            ChannelState::Connecting,
            "open",
        )
    }

    pub fn on_connected(&mut self) -> Result<ChannelState, SyncError> {
        self.transition_from_any_of(
            &[ChannelState::Connecting],
            ChannelState::Connected,
            "mark_connected",
        )
    }

    /// Returns the new state when it changed.
    pub fn on_failure(&mut self) -> Option<ChannelState> {
        self.force(ChannelState::Failed)
    }

    /// Returns the new state when it changed.
    pub fn on_closed(&mut self) -> Option<ChannelState> {
        self.force(ChannelState::Disconnected)
    }

    fn force(&mut self, next: ChannelState) -> Option<ChannelState> {
        if self.state == next {
            return None;
        }
        self.state = next;
        Some(next)
    }

    fn transition_from_any_of(
        &mut self,
        expected: &[ChannelState],
        next: ChannelState,
        action: &str,
    ) -> Result<ChannelState, SyncError> {
        if !expected.contains(&self.state) {
            return Err(SyncError::invalid_state(self.state, action));
        }
        self.state = next;
        Ok(next)
    }
}
