use crate::{
    error::ChatError,
    types::{ChatCommand, ChatEvent, ClientLifecycleState},
};

#[derive(Debug, Clone)]
pub struct ClientStateMachine {
    state: ClientLifecycleState,
}

impl Default for ClientStateMachine {
    fn default() -> Self {
        Self {
            state: ClientLifecycleState::SignedOut,
        }
    }
}

impl ClientStateMachine {
    pub fn state(&self) -> ClientLifecycleState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(
            self.state,
            ClientLifecycleState::Online | ClientLifecycleState::Offline
        )
    }

    pub fn apply(&mut self, command: &ChatCommand) -> Result<Vec<ChatEvent>, ChatError> {
        use ChatCommand::*;

        match command {
            Login { .. } | Register { .. } | RestoreSession => self.transition_from_state(
                ClientLifecycleState::SignedOut,
                ClientLifecycleState::Authenticating,
                "authenticate",
            ),
            Logout => {
                if self.state == ClientLifecycleState::SignedOut {
                    return Err(ChatError::invalid_state(self.state, "logout"));
                }
                Ok(self.set(ClientLifecycleState::SignedOut))
            }
            RefreshRoster | SelectPeer { .. } | SendMessage { .. } | Keystroke => {
                if self.is_authenticated() {
                    Ok(Vec::new())
                } else {
                    Err(ChatError::invalid_state(self.state, "conversation command"))
                }
            }
        }
    }

    /// Resolve an authentication flow. A fresh session starts `Offline`
    /// until the push channel reports `Connected`.
    pub fn on_auth_result(&mut self, success: bool) -> Result<ChatEvent, ChatError> {
        if self.state != ClientLifecycleState::Authenticating {
            return Err(ChatError::invalid_state(self.state, "on_auth_result"));
        }

        let next = if success {
            ClientLifecycleState::Offline
        } else {
            ClientLifecycleState::SignedOut
        };
        self.state = next;
        Ok(ChatEvent::StateChanged { state: next })
    }

    /// Track push channel status. Ignored outside an authenticated context;
    /// returns an event only on an actual transition.
    pub fn on_channel_status(&mut self, connected: bool) -> Option<ChatEvent> {
        if !self.is_authenticated() {
            return None;
        }

        let next = if connected {
            ClientLifecycleState::Online
        } else {
            ClientLifecycleState::Offline
        };
        if next == self.state {
            return None;
        }
        self.state = next;
        Some(ChatEvent::StateChanged { state: next })
    }

    fn set(&mut self, next: ClientLifecycleState) -> Vec<ChatEvent> {
        self.state = next;
        vec![ChatEvent::StateChanged { state: next }]
    }

    fn transition_from_state(
        &mut self,
        expected: ClientLifecycleState,
        next: ClientLifecycleState,
        action: &str,
    ) -> Result<Vec<ChatEvent>, ChatError> {
        if self.state != expected {
            return Err(ChatError::invalid_state(self.state, action));
        }
        Ok(self.set(next))
    }
}
