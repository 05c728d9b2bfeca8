use crate::state::AppState;
use crate::SessionCommand;
use anyhow::Context;
use cove_core::{AccountAction, AccountConfig, AccountsState, ClientSession, Cookie, NotificationOutput};
use cove_notify::{
    InterceptedResponse, MultiplexerSettings, NotificationMultiplexer, PageState, SharedPageState,
};
use cove_security::BrowserSession;
use cove_storage::EntityStoreAccessor;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};

/// Capacity of the intercepted response fan-out.
const RESPONSE_CHANNEL_CAPACITY: usize = 1024;

/// One line of host input for `run`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    Response(InterceptedResponse),
    Page(PageState),
    Cookie { url: String, cookie: Cookie },
}

pub fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))?;
    if key.is_empty() {
        return Err(format!("empty key in `{raw}`"));
    }
    Ok((key.to_string(), value.to_string()))
}

pub async fn run(state: &AppState, login: String) -> anyhow::Result<()> {
    let config = state.config().await;
    let page = SharedPageState::default();
    let multiplexer = NotificationMultiplexer::new(
        MultiplexerSettings::from_config(&config),
        Arc::new(page.clone()),
        state.email.clone(),
    )
    .context("build notification multiplexer")?;

    let (responses, _) = broadcast::channel(RESPONSE_CHANNEL_CAPACITY);
    let (handle, notifications) = multiplexer.start(&responses);

    let mut accounts = AccountsState::default();
    accounts.reduce(AccountAction::WireUpConfigs {
        configs: vec![AccountConfig {
            login: login.clone(),
            database: true,
        }],
    })?;
    accounts.reduce(AccountAction::Select {
        login: login.clone(),
    })?;
    let printer = tokio::spawn(print_notifications(login.clone(), accounts, notifications));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut interrupted = false;
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("read host input")?,
            _ = tokio::signal::ctrl_c() => {
                interrupted = true;
                None
            }
        };
        let Some(line) = line else {
            break;
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<HostMessage>(line) {
            Ok(message) => dispatch(state, &login, &page, &responses, message).await,
            Err(err) => tracing::warn!("skipping host message: {err}"),
        }
    }

    drop(responses);
    if interrupted {
        handle.stop().await?;
    } else {
        handle.finish().await?;
    }

    let accounts = printer.await.context("notification printer")??;
    let revision = state.store.revision().await.context("read store revision")?;
    if let Some(account) = accounts.account(&login) {
        tracing::info!(
            logged_in = account.notifications.logged_in,
            unread = account.notifications.unread,
            batches = account.notifications.batch_entity_updates_counter,
            revision,
            "bridge stopped"
        );
    }
    Ok(())
}

async fn dispatch(
    state: &AppState,
    login: &str,
    page: &SharedPageState,
    responses: &broadcast::Sender<InterceptedResponse>,
    message: HostMessage,
) {
    match message {
        HostMessage::Response(response) => {
            if responses.send(response).is_err() {
                tracing::debug!("no response listeners");
            }
        }
        HostMessage::Page(next) => page.update(next).await,
        HostMessage::Cookie { url, cookie } => {
            if let Err(err) = state.browser.set_cookie(login, &url, cookie).await {
                tracing::warn!("failed to record cookie: {err}");
            }
        }
    }
}

async fn print_notifications(
    login: String,
    mut accounts: AccountsState,
    mut notifications: mpsc::UnboundedReceiver<NotificationOutput>,
) -> anyhow::Result<AccountsState> {
    let mut stdout = tokio::io::stdout();

    while let Some(notification) = notifications.recv().await {
        write_json_line(&mut stdout, &notification).await?;
        accounts.reduce(AccountAction::PatchNotifications {
            login: login.clone(),
            patch: notification,
            ignore_no_account: true,
        })?;
    }

    Ok(accounts)
}

async fn write_json_line<W, T>(out: &mut W, value: &T) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    out.write_all(&line).await?;
    out.flush().await?;
    Ok(())
}

pub async fn tree(state: &AppState, conversation: Option<&str>) -> anyhow::Result<()> {
    let rendered = match conversation {
        Some(entry_pk) => {
            let root = state
                .email
                .conversation(entry_pk)
                .await
                .context("load conversation")?
                .with_context(|| format!("conversation entry {entry_pk} not found"))?;
            serde_json::to_string_pretty(&root)?
        }
        None => {
            let views = state.email.folder_views().await.context("load folder views")?;
            serde_json::to_string_pretty(&views)?
        }
    };
    println!("{rendered}");
    Ok(())
}

pub async fn show_config(state: &AppState) -> anyhow::Result<()> {
    let config = state.config().await;
    println!("# {}", state.config_manager.config_path().display());
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub async fn session(state: &AppState, action: SessionCommand) -> anyhow::Result<()> {
    match action {
        SessionCommand::Show { login } => {
            let key = state.session_key(&login).await?;
            let client_session = state
                .sessions
                .resolve_saved_client_session(&key)
                .context("resolve saved session")?;
            println!("{}", serde_json::to_string_pretty(&client_session)?);
        }
        SessionCommand::Save {
            login,
            window_name,
            items,
        } => {
            let key = state.session_key(&login).await?;
            let client_session = ClientSession {
                session_storage: items.into_iter().collect(),
                window_name,
            };
            state
                .sessions
                .save_session(&key, client_session)
                .await
                .context("save session")?;
        }
        SessionCommand::Apply { login } => {
            let key = state.session_key(&login).await?;
            let applied = state
                .sessions
                .apply_saved_backend_session(&key)
                .await
                .context("apply saved session")?;
            println!("{applied}");
        }
        SessionCommand::Reset { login } => {
            let key = state.session_key(&login).await?;
            state
                .sessions
                .reset_saved_session(&key)
                .context("reset saved session")?;
            state
                .sessions
                .reset_backend_session(&login)
                .await
                .context("reset browser session")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_messages() {
        let response: HostMessage = serde_json::from_str(
            r#"{"type":"response","url":"https://api.test/api/events/a==","body":"{}"}"#,
        )
        .expect("response");
        assert!(matches!(response, HostMessage::Response(r) if r.url.ends_with("a==")));

        let page: HostMessage =
            serde_json::from_str(r#"{"type":"page","loggedIn":true}"#).expect("page");
        assert!(matches!(page, HostMessage::Page(state) if state.logged_in));

        let cookie: HostMessage = serde_json::from_str(
            r#"{"type":"cookie","url":"https://api.test/","cookie":{"name":"AUTH-1","value":"x"}}"#,
        )
        .expect("cookie");
        assert!(matches!(cookie, HostMessage::Cookie { cookie, .. } if cookie.path == "/"));
    }

    #[test]
    fn key_value_items() {
        assert_eq!(
            parse_key_val("a=b=c"),
            Ok(("a".to_string(), "b=c".to_string()))
        );
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=x").is_err());
    }

    #[tokio::test]
    async fn json_lines_end_with_newline() {
        let mut out = Vec::new();
        write_json_line(&mut out, &NotificationOutput::unread(3))
            .await
            .expect("write");
        assert_eq!(String::from_utf8(out).expect("utf8"), "{\"unread\":3}\n");
    }
}
