//! Register-then-login exchange for servers running a chat-based auth plugin.

use std::time::Duration;

use {
    tokio::sync::broadcast::{self, error::RecvError},
    tracing::{debug, warn},
};

use crate::{
    client::{ChatLine, ProtocolClient},
    error::{AuthStep, Error, Result},
};

const REGISTER_OK: &[&str] = &["successfully registered", "already registered"];
const LOGIN_OK: &[&str] = &["successfully logged in", "already logged in"];

/// Run the exchange.
///
/// `replies` must be subscribed before this is called so a reply that races
/// the command is not lost. Each step waits at most `timeout` for a line not
/// authored by the bot itself; that line decides the step.
pub async fn run(
    client: &dyn ProtocolClient,
    replies: &mut broadcast::Receiver<ChatLine>,
    password: &str,
    timeout: Duration,
) -> Result<()> {
    let own_name = client.username();

    client.chat(&format!("/register {password} {password}"))?;
    let reply = await_reply(replies, &own_name, AuthStep::Register, timeout).await?;
    if !matches_any(&reply.message, REGISTER_OK) {
        return Err(Error::auth_failed(AuthStep::Register, reply.message));
    }
    debug!(bot = %own_name, "auto-auth register step accepted");

    client.chat(&format!("/login {password}"))?;
    let reply = await_reply(replies, &own_name, AuthStep::Login, timeout).await?;
    if !matches_any(&reply.message, LOGIN_OK) {
        return Err(Error::auth_failed(AuthStep::Login, reply.message));
    }
    debug!(bot = %own_name, "auto-auth login step accepted");
    Ok(())
}

async fn await_reply(
    replies: &mut broadcast::Receiver<ChatLine>,
    own_name: &str,
    step: AuthStep,
    timeout: Duration,
) -> Result<ChatLine> {
    let wait = async {
        loop {
            match replies.recv().await {
                Ok(line) if line.username == own_name => continue,
                Ok(line) => return Ok(line),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, %step, "auto-auth reply stream lagged");
                },
                Err(RecvError::Closed) => {
                    return Err(Error::auth_failed(step, "bot disconnected"));
                },
            }
        }
    };
    tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| Error::auth_failed(step, format!("no reply within {}s", timeout.as_secs())))?
}

fn matches_any(message: &str, phrases: &[&str]) -> bool {
    let lower = message.to_lowercase();
    phrases.iter().any(|p| lower.contains(p))
}
