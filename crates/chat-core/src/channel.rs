use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::trace;

use crate::types::{ChatCommand, ChatEvent};

/// Broadcast event stream type used by frontend subscribers.
pub type EventStream = broadcast::Receiver<ChatEvent>;

/// Errors returned by command channel operations.
#[derive(Debug, Error)]
pub enum ChatChannelError {
    /// The runtime stopped reading commands.
    #[error("command channel is closed")]
    CommandChannelClosed,
}

/// Command/event channel pair shared by the runtime and frontends.
#[derive(Clone, Debug)]
pub struct ChatChannels {
    command_tx: mpsc::Sender<ChatCommand>,
    event_tx: broadcast::Sender<ChatEvent>,
}

impl ChatChannels {
    /// Create a new channel set and return it with the command receiver.
    pub fn new(command_buffer: usize, event_buffer: usize) -> (Self, mpsc::Receiver<ChatCommand>) {
        let (command_tx, command_rx) = mpsc::channel(command_buffer.max(1));
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));

        (
            Self {
                command_tx,
                event_tx,
            },
            command_rx,
        )
    }

    /// Subscribe to emitted events.
    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    /// Queue one command for the runtime.
    pub async fn send_command(&self, command: ChatCommand) -> Result<(), ChatChannelError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| ChatChannelError::CommandChannelClosed)
    }

    /// Emit an event to all subscribers.
    ///
    /// Best-effort: with no subscribers the event is dropped, lagging
    /// subscribers observe `RecvError::Lagged`.
    pub fn emit(&self, event: ChatEvent) {
        if let Err(broadcast::error::SendError(event)) = self.event_tx.send(event) {
            trace!(?event, "no event subscribers");
        }
    }

    /// Emit a batch in order.
    pub fn emit_all(&self, events: impl IntoIterator<Item = ChatEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClientLifecycleState;

    #[tokio::test]
    async fn delivers_commands_in_order() {
        let (channels, mut rx) = ChatChannels::new(8, 8);
        channels
            .send_command(ChatCommand::SelectPeer { peer_id: 7 })
            .await
            .expect("first command should enqueue");
        channels
            .send_command(ChatCommand::Keystroke)
            .await
            .expect("second command should enqueue");

        assert_eq!(rx.recv().await, Some(ChatCommand::SelectPeer { peer_id: 7 }));
        assert_eq!(rx.recv().await, Some(ChatCommand::Keystroke));
    }

    #[tokio::test]
    async fn reports_closed_command_channel() {
        let (channels, rx) = ChatChannels::new(1, 1);
        drop(rx);
        let err = channels
            .send_command(ChatCommand::Logout)
            .await
            .expect_err("send should fail once the receiver is gone");
        assert!(matches!(err, ChatChannelError::CommandChannelClosed));
    }

    #[tokio::test]
    async fn fans_out_batches_in_order() {
        let (channels, _) = ChatChannels::new(4, 16);
        let mut a = channels.subscribe();
        let mut b = channels.subscribe();

        channels.emit_all([
            ChatEvent::StateChanged {
                state: ClientLifecycleState::Authenticating,
            },
            ChatEvent::StateChanged {
                state: ClientLifecycleState::Offline,
            },
        ]);

        for rx in [&mut a, &mut b] {
            assert_eq!(
                rx.recv().await.expect("first event"),
                ChatEvent::StateChanged {
                    state: ClientLifecycleState::Authenticating
                }
            );
            assert_eq!(
                rx.recv().await.expect("second event"),
                ChatEvent::StateChanged {
                    state: ClientLifecycleState::Offline
                }
            );
        }
    }

    #[test]
    fn emitting_without_subscribers_is_harmless() {
        let (channels, _) = ChatChannels::new(1, 1);
        channels.emit(ChatEvent::UnreadUpdated {
            counts: Default::default(),
        });
    }
}
