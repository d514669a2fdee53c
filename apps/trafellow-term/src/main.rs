mod config;
mod input;
mod logging;
mod view;

use std::{process::ExitCode, sync::Arc};

use chat_client::{ChatRuntimeHandle, HttpChatApi, SessionVault, WebSocketTransport, spawn_runtime};
use chat_core::{ChatChannelError, ChatCommand, ChatEvent};
use chat_platform::{FileKeyValueStore, KeyValueStore, OsKeyringStore};
use config::{SessionStoreKind, TermConfig};
use input::{HELP_TEXT, InputLine, parse_line};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout},
    sync::broadcast::error::RecvError,
};
use tracing::{debug, error, info, warn};
use view::TermView;

enum Flow {
    Continue,
    Quit,
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    info!("starting trafellow-term");

    let config = match TermConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "terminal config invalid");
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };
    info!(
        server = %config.server_url,
        push = %config.push_url,
        data_dir = %config.data_dir.display(),
        session_store = ?config.session_store,
        "loaded terminal config"
    );

    let api = match HttpChatApi::new(config.server_url.clone()) {
        Ok(api) => Arc::new(api),
        Err(err) => {
            error!(code = %err.code, error = %err, "failed to build http client");
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };
    let store: Arc<dyn KeyValueStore> = match config.session_store {
        SessionStoreKind::File => Arc::new(FileKeyValueStore::new(&config.data_dir)),
        SessionStoreKind::Keyring => Arc::new(OsKeyringStore),
    };
    let transport = Arc::new(WebSocketTransport::new(
        config.push_url.clone(),
        config.reconnect,
    ));
    let handle = spawn_runtime(api, transport, SessionVault::new(store), config.sync.clone());

    let code = match run_loop(&handle, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "terminal loop failed");
            ExitCode::FAILURE
        }
    };
    handle.shutdown();
    info!("trafellow-term exited");
    code
}

async fn run_loop(handle: &ChatRuntimeHandle, config: &TermConfig) -> io::Result<()> {
    let mut events = handle.subscribe();
    let mut view = TermView::default();
    let mut stdout = io::stdout();
    let mut stdin = BufReader::new(io::stdin()).lines();
    let mut prefill_tried = false;

    if handle.send(ChatCommand::RestoreSession).await.is_err() {
        return Ok(());
    }
    print_lines(&mut stdout, &["type /help for commands".to_owned()], &view).await?;

    loop {
        tokio::select! {
            line = stdin.next_line() => {
                let Some(line) = line? else {
                    debug!("stdin closed");
                    return Ok(());
                };
                let (flow, output) = match dispatch(handle, &view, &line).await {
                    Ok(result) => result,
                    Err(err) => {
                        warn!(error = %err, "runtime stopped accepting commands");
                        return Ok(());
                    }
                };
                print_lines(&mut stdout, &output, &view).await?;
                if let Flow::Quit = flow {
                    return Ok(());
                }
            }
            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "terminal fell behind runtime events");
                        continue;
                    }
                    Err(RecvError::Closed) => return Ok(()),
                };

                if !prefill_tried
                    && is_missing_session(&event)
                    && let Some((username, password)) = config.prefill_credentials()
                {
                    prefill_tried = true;
                    info!(%username, "no saved session, signing in with configured credentials");
                    if handle
                        .send(ChatCommand::Login { username, password })
                        .await
                        .is_err()
                    {
                        return Ok(());
                    }
                }

                let output = view.handle_event(event);
                print_lines(&mut stdout, &output, &view).await?;
            }
        }
    }
}

async fn dispatch(
    handle: &ChatRuntimeHandle,
    view: &TermView,
    line: &str,
) -> Result<(Flow, Vec<String>), ChatChannelError> {
    let parsed = match parse_line(line) {
        Ok(parsed) => parsed,
        Err(usage) => return Ok((Flow::Continue, vec![usage.0.to_owned()])),
    };

    let output = match parsed {
        InputLine::Empty => Vec::new(),
        InputLine::Help => HELP_TEXT.lines().map(str::to_owned).collect(),
        InputLine::Quit => return Ok((Flow::Quit, Vec::new())),
        InputLine::Unread => view.unread_lines(),
        InputLine::Login { username, password } => {
            handle.send(ChatCommand::Login { username, password }).await?;
            Vec::new()
        }
        InputLine::Register {
            username,
            email,
            password,
        } => {
            handle
                .send(ChatCommand::Register {
                    username,
                    email,
                    password,
                })
                .await?;
            Vec::new()
        }
        InputLine::Logout => {
            handle.send(ChatCommand::Logout).await?;
            Vec::new()
        }
        InputLine::Users => {
            handle.send(ChatCommand::RefreshRoster).await?;
            Vec::new()
        }
        InputLine::Open { .. } if !view.is_signed_in() => {
            vec!["sign in first: /login <username> <password>".to_owned()]
        }
        InputLine::Open { target } => match view.resolve_target(&target) {
            Some(peer_id) => {
                handle.send(ChatCommand::SelectPeer { peer_id }).await?;
                Vec::new()
            }
            None => vec![format!("unknown contact '{target}'")],
        },
        InputLine::Message(body) => {
            if view.active_peer().is_none() {
                vec!["open a conversation first: /open <id|username>".to_owned()]
            } else {
                handle.send(ChatCommand::Keystroke).await?;
                handle.send(ChatCommand::SendMessage { body }).await?;
                Vec::new()
            }
        }
    };
    Ok((Flow::Continue, output))
}

fn is_missing_session(event: &ChatEvent) -> bool {
    matches!(
        event,
        ChatEvent::AuthResult {
            success: false,
            error_code: Some(code),
            ..
        } if code == "no_saved_session"
    )
}

async fn print_lines(stdout: &mut Stdout, lines: &[String], view: &TermView) -> io::Result<()> {
    if lines.is_empty() {
        return Ok(());
    }
    let mut text = String::from("\n");
    for line in lines {
        text.push_str(line);
        text.push('\n');
    }
    text.push_str(&view.prompt());
    stdout.write_all(text.as_bytes()).await?;
    stdout.flush().await
}
