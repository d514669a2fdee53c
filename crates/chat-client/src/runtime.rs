//! Single-task cooperative runtime.
//!
//! One task owns the lifecycle state machine, the session aggregate and the
//! push link. Pull calls run on spawned tasks and report back through a
//! completion queue tagged with the session epoch; completions from an older
//! epoch (a session that was logged out) are dropped on arrival.

use std::{collections::HashMap, future::Future, sync::Arc};

use chat_core::{
    ChatChannelError, ChatChannels, ChatCommand, ChatError, ChatErrorCategory, ChatEvent,
    ChatSession, ClientStateMachine, EventStream, FetchTicket, Message, OutboundSignal,
    PushEvent, Session, SyncConfig, SyncEffect, User, UserId, normalize_error,
};
use chrono::Utc;
use tokio::{
    sync::mpsc,
    time::{Instant, sleep_until},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{
    api::ChatApi,
    connection::{ConnectionManager, PushTransport},
    vault::SessionVault,
};

#[derive(Clone, Debug)]
pub struct ChatRuntimeHandle {
    channels: ChatChannels,
    stop: CancellationToken,
}

impl ChatRuntimeHandle {
    pub async fn send(&self, command: ChatCommand) -> Result<(), ChatChannelError> {
        self.channels.send_command(command).await
    }

    pub fn subscribe(&self) -> EventStream {
        self.channels.subscribe()
    }

    /// Stop the runtime task and its push link.
    pub fn shutdown(&self) {
        self.stop.cancel();
    }
}

/// Spawn the runtime on the current tokio runtime.
pub fn spawn_runtime(
    api: Arc<dyn ChatApi>,
    transport: Arc<dyn PushTransport>,
    vault: SessionVault,
    config: SyncConfig,
) -> ChatRuntimeHandle {
    let (channels, command_rx) = ChatChannels::new(config.command_buffer, config.event_buffer);
    let stop = CancellationToken::new();
    let runtime = ChatRuntime::new(
        channels.clone(),
        command_rx,
        api,
        ConnectionManager::new(transport),
        vault,
        config,
        stop.child_token(),
    );
    tokio::spawn(async move {
        runtime.run().await;
    });

    ChatRuntimeHandle { channels, stop }
}

enum Completion {
    Auth(Result<Session, ChatError>),
    Roster(Result<Vec<User>, ChatError>),
    Unread(Result<HashMap<UserId, u64>, ChatError>),
    History(FetchTicket, Result<Vec<Message>, ChatError>),
    MarkRead(UserId, Result<(), ChatError>),
}

struct Tagged {
    epoch: u64,
    completion: Completion,
}

struct ChatRuntime {
    channels: ChatChannels,
    command_rx: mpsc::Receiver<ChatCommand>,
    state_machine: ClientStateMachine,
    api: Arc<dyn ChatApi>,
    connection: ConnectionManager,
    vault: SessionVault,
    config: SyncConfig,
    session: Option<ChatSession>,
    push_rx: Option<mpsc::Receiver<PushEvent>>,
    completion_tx: mpsc::UnboundedSender<Tagged>,
    completion_rx: mpsc::UnboundedReceiver<Tagged>,
    epoch: u64,
    stop: CancellationToken,
}

impl ChatRuntime {
    fn new(
        channels: ChatChannels,
        command_rx: mpsc::Receiver<ChatCommand>,
        api: Arc<dyn ChatApi>,
        connection: ConnectionManager,
        vault: SessionVault,
        config: SyncConfig,
        stop: CancellationToken,
    ) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            channels,
            command_rx,
            state_machine: ClientStateMachine::default(),
            api,
            connection,
            vault,
            config,
            session: None,
            push_rx: None,
            completion_tx,
            completion_rx,
            epoch: 0,
            stop,
        }
    }

    async fn run(mut self) {
        loop {
            let deadline = self.session.as_ref().and_then(ChatSession::next_deadline);
            tokio::select! {
                _ = self.stop.cancelled() => break,
                command = self.command_rx.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    if let Err(err) = self.handle_command(command) {
                        self.emit_error(err);
                    }
                }
                Some(tagged) = self.completion_rx.recv() => self.handle_completion(tagged),
                event = next_push(&mut self.push_rx) => match event {
                    Some(event) => self.handle_push(event),
                    None => {
                        debug!("push event stream closed");
                        self.push_rx = None;
                    }
                },
                _ = sleep_until_deadline(deadline) => self.poll_timers(),
            }
        }

        self.connection.disconnect();
        debug!("chat runtime exited");
    }

    fn handle_command(&mut self, command: ChatCommand) -> Result<(), ChatError> {
        let transition_events = self.state_machine.apply(&command)?;
        self.channels.emit_all(transition_events);

        match command {
            ChatCommand::Login { username, password } => {
                info!(username = %username, "login requested");
                let api = self.api.clone();
                self.spawn_pull(async move {
                    Completion::Auth(api.login(&username, &password).await)
                });
                Ok(())
            }
            ChatCommand::Register {
                username,
                email,
                password,
            } => {
                info!(username = %username, "registration requested");
                let api = self.api.clone();
                self.spawn_pull(async move {
                    Completion::Auth(api.register(&username, &email, &password).await)
                });
                Ok(())
            }
            ChatCommand::RestoreSession => {
                self.handle_restore_session();
                Ok(())
            }
            ChatCommand::Logout => {
                self.teardown_session();
                Ok(())
            }
            ChatCommand::RefreshRoster => {
                self.execute(vec![SyncEffect::FetchRoster, SyncEffect::FetchUnread]);
                Ok(())
            }
            ChatCommand::SelectPeer { peer_id } => {
                let effects = self.session_mut()?.select(peer_id)?;
                self.execute(effects);
                Ok(())
            }
            ChatCommand::SendMessage { body } => {
                let Some(session) = self.session.as_mut() else {
                    return Err(no_session());
                };
                if session.conversations().active_peer().is_none() {
                    return Err(ChatError::no_active_conversation());
                }
                if !self.connection.is_connected() {
                    return Err(ChatError::channel_disconnected());
                }
                let effects = session.send_local(&body, Utc::now())?;
                self.execute(effects);
                Ok(())
            }
            ChatCommand::Keystroke => {
                let effects = self.session_mut()?.keystroke(Instant::now());
                self.execute(effects);
                Ok(())
            }
        }
    }

    fn handle_restore_session(&mut self) {
        match self.vault.load() {
            Ok(Some(session)) => {
                info!(user_id = session.user.id, "restoring saved session");
                self.establish_session(session, false);
            }
            Ok(None) => self.fail_auth(ChatError::no_saved_session()),
            Err(err) => {
                warn!(code = %err.code, error = %err.message, "saved session unusable");
                if let Err(clear_err) = self.vault.clear() {
                    warn!(code = %clear_err.code, "failed clearing unusable session");
                }
                self.fail_auth(ChatError::no_saved_session());
            }
        }
    }

    fn establish_session(&mut self, session: Session, persist: bool) {
        let state_event = match self.state_machine.on_auth_result(true) {
            Ok(event) => event,
            Err(err) => {
                self.emit_error(err);
                return;
            }
        };

        if persist && let Err(err) = self.vault.save(&session) {
            warn!(code = %err.code, error = %err.message, "failed persisting session");
        }
        self.api.set_auth_token(Some(session.token.clone()));
        self.push_rx = Some(self.connection.connect(session.user.id));

        let user = session.user.clone();
        let chat = ChatSession::new(session, &self.config);
        let bootstrap = chat.bootstrap();
        self.session = Some(chat);

        info!(user_id = user.id, username = %user.username, "session established");
        self.channels.emit(state_event);
        self.channels.emit(ChatEvent::AuthResult {
            success: true,
            error_code: None,
            user: Some(user),
        });
        self.execute(bootstrap);
    }

    fn fail_auth(&mut self, error: ChatError) {
        warn!(code = %error.code, "authentication failed");
        if let Ok(event) = self.state_machine.on_auth_result(false) {
            self.channels.emit(event);
        }
        self.channels.emit(ChatEvent::AuthResult {
            success: false,
            error_code: Some(error.code.clone()),
            user: None,
        });
        self.emit_error(error);
    }

    /// Invalidate everything that belongs to the current session.
    fn teardown_session(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        self.connection.disconnect();
        self.push_rx = None;
        self.session = None;
        if let Err(err) = self.vault.clear() {
            warn!(code = %err.code, error = %err.message, "failed clearing saved session");
        }
        self.api.set_auth_token(None);
        info!(epoch = self.epoch, "signed out");
    }

    fn handle_completion(&mut self, tagged: Tagged) {
        if tagged.epoch != self.epoch {
            debug!(
                completion_epoch = tagged.epoch,
                current_epoch = self.epoch,
                "discarding completion from a previous session"
            );
            return;
        }

        match tagged.completion {
            Completion::Auth(Ok(session)) => self.establish_session(session, true),
            Completion::Auth(Err(err)) => self.fail_auth(err),
            Completion::Roster(result) => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                match result {
                    Ok(users) => {
                        let effects = session.apply_roster(users);
                        self.execute(effects);
                    }
                    Err(err) => self.emit_error(err),
                }
            }
            Completion::Unread(result) => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                match result {
                    Ok(counts) => {
                        let effects = session.apply_unread(counts);
                        self.execute(effects);
                    }
                    Err(err) => self.emit_error(err),
                }
            }
            Completion::History(ticket, result) => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                let effects = session.complete_history(ticket, result);
                self.execute(effects);
            }
            Completion::MarkRead(peer_id, result) => match result {
                Ok(()) => trace!(peer_id, "read receipt acknowledged"),
                Err(err) => warn!(peer_id, code = %err.code, "read receipt failed"),
            },
        }
    }

    fn handle_push(&mut self, event: PushEvent) {
        let channel_status = match &event {
            PushEvent::Connected => Some(true),
            PushEvent::Disconnected { .. } => Some(false),
            _ => None,
        };
        if let Some(connected) = channel_status
            && let Some(state_event) = self.state_machine.on_channel_status(connected)
        {
            self.channels.emit(state_event);
        }

        let Some(session) = self.session.as_mut() else {
            return;
        };
        let effects = session.handle_push(event, Instant::now());
        self.execute(effects);
    }

    fn poll_timers(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let effects = session.poll_timers(Instant::now());
        self.execute(effects);
    }

    fn execute(&mut self, effects: Vec<SyncEffect>) {
        for effect in effects {
            match effect {
                SyncEffect::Notify(event) => self.channels.emit(event),
                SyncEffect::Outbound(signal) => self.send_outbound(signal),
                SyncEffect::FetchRoster => {
                    let Some(self_id) = self.self_id() else {
                        continue;
                    };
                    let api = self.api.clone();
                    self.spawn_pull(async move { Completion::Roster(api.users(self_id).await) });
                }
                SyncEffect::FetchUnread => {
                    let Some(self_id) = self.self_id() else {
                        continue;
                    };
                    let api = self.api.clone();
                    self.spawn_pull(async move {
                        Completion::Unread(api.unread_counts(self_id).await)
                    });
                }
                SyncEffect::FetchHistory(ticket) => {
                    let Some(self_id) = self.self_id() else {
                        continue;
                    };
                    debug!(
                        peer_id = ticket.peer_id,
                        generation = ticket.generation,
                        "fetching history"
                    );
                    let api = self.api.clone();
                    self.spawn_pull(async move {
                        Completion::History(ticket, api.history(self_id, ticket.peer_id).await)
                    });
                }
                SyncEffect::MarkRead { contact_id } => {
                    let Some(self_id) = self.self_id() else {
                        continue;
                    };
                    let api = self.api.clone();
                    self.spawn_pull(async move {
                        Completion::MarkRead(contact_id, api.mark_read(self_id, contact_id).await)
                    });
                }
            }
        }
    }

    fn send_outbound(&mut self, signal: OutboundSignal) {
        let is_typing = matches!(signal, OutboundSignal::TypingSignal { .. });
        if let Err(err) = self.connection.send(signal) {
            if is_typing {
                debug!(code = %err.code, "typing signal dropped");
            } else {
                self.emit_error(err);
            }
        }
    }

    fn spawn_pull<F>(&self, pull: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let completion_tx = self.completion_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let completion = pull.await;
            let _ = completion_tx.send(Tagged { epoch, completion });
        });
    }

    fn self_id(&self) -> Option<UserId> {
        self.session.as_ref().map(ChatSession::self_id)
    }

    fn session_mut(&mut self) -> Result<&mut ChatSession, ChatError> {
        self.session.as_mut().ok_or_else(no_session)
    }

    fn emit_error(&self, error: ChatError) {
        warn!(code = %error.code, category = ?error.category, "{}", error.message);
        self.channels.emit(normalize_error(error));
    }
}

fn no_session() -> ChatError {
    ChatError::new(
        ChatErrorCategory::Internal,
        "no_session",
        "authenticated state without a session",
    )
}

async fn next_push(push_rx: &mut Option<mpsc::Receiver<PushEvent>>) -> Option<PushEvent> {
    match push_rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
