//! mdsync — headless terminal client for a shared markdown session.
//!
//! Each line read from stdin is appended to the shared document as a local
//! edit. Status changes, remote document replacements and presence changes
//! are printed as they arrive.
//!
//! The text is always read back from the session snapshot; events are only
//! printed.

use clap::Parser;
use log::info;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

use mdsync_client::{
    calculate_cursor_position, utf16_len, Session, SessionConfig, SessionEvent, DEFAULT_ENDPOINT,
};

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "mdsync")]
#[command(about = "Join a collaborative markdown session from the terminal")]
struct Args {
    /// WebSocket URL of the session
    #[arg(long, env = "MDSYNC_URL", default_value = DEFAULT_ENDPOINT)]
    url: String,

    /// User id to announce (random if omitted)
    #[arg(long, env = "MDSYNC_USER")]
    user: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let mut config = SessionConfig::new(args.url);
    if let Some(user) = args.user {
        config = config.with_user_id(user);
    }
    let edit_window = config.edit_window;

    let mut session = Session::start(config);
    info!("Joining as {}", session.user_id());
    let mut events = session.take_events().ok_or("event stream already taken")?;
    let mut status = session.watch_status();
    session.connect()?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut dirty = false;

    loop {
        tokio::select! {
            line = stdin.next_line() => match line? {
                Some(line) => {
                    let mut text = session.snapshot().await?.content;
                    text.push_str(&line);
                    text.push('\n');
                    let caret = utf16_len(&text);
                    session.edit(text, caret)?;
                    dirty = true;
                }
                None => break,
            },
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("[status] {}", status.borrow_and_update().status_text);
            }
            Some(event) = events.recv() => match event {
                SessionEvent::DocumentReplaced { content } => {
                    println!("[document]\n{content}");
                }
                SessionEvent::PreviewUpdated { rendered_html } => {
                    log::debug!("Preview: {}", rendered_html.unwrap_or_default());
                }
                SessionEvent::CursorMoved { user_id, position } => {
                    let text = session.snapshot().await?.content;
                    let at = calculate_cursor_position(&text, position);
                    println!("[cursor] {user_id} at {}:{}", at.line + 1, at.column + 1);
                }
                SessionEvent::CursorLeft { user_id } => {
                    println!("[cursor] {user_id} left");
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                dirty = false;
                break;
            }
        }
    }

    // Give the last edit one quiescence window to go out.
    if dirty {
        tokio::time::sleep(edit_window + Duration::from_millis(50)).await;
    }

    session.disconnect()?;
    session.shutdown().await;
    Ok(())
}
