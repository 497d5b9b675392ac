//! Keyword-matched reply table: the stock "AI" dispatcher.
//!
//! Scans each incoming message for known tokens (case-insensitive
//! containment, first table entry wins) and fills the matching reply
//! template from the connection handle. Unknown messages get a stock
//! answer.

use chrono::Local;

use crate::connection::{Connection, QUIT_COMMAND};
use crate::dispatcher::Dispatcher;

/// Handle query backing a templated reply.
#[derive(Debug, Clone, Copy)]
enum Action {
    UserName,
    Time,
    Date,
    TotalConnections,
    ConnectionIndex,
    ClientId,
}

/// One known token with its reply template. The template's `{}` slot,
/// if any, is filled with the action's result.
struct KnownCommand {
    token: &'static str,
    response: String,
    action: Option<Action>,
}

impl KnownCommand {
    fn new(token: &'static str, response: impl Into<String>, action: Option<Action>) -> Self {
        Self {
            token,
            response: response.into(),
            action,
        }
    }
}

/// Dispatcher answering a fixed set of conversational tokens.
pub struct KeywordResponder {
    commands: Vec<KnownCommand>,
    unknown_response: String,
}

const TIME_FORMAT: &str = "%H:%M:%S %:z";
const DATE_FORMAT: &str = "%a, %b %d, %Y";

impl KeywordResponder {
    pub fn new() -> Self {
        let mut commands = vec![
            KnownCommand::new("hello", "Hi, {}!", Some(Action::UserName)),
            KnownCommand::new(
                "my name",
                "Hmm... you had introduced as \"{}\"",
                Some(Action::UserName),
            ),
            KnownCommand::new(
                "your name",
                "\"You can call me Susan if it makes you happy\"(c)Snatch",
                None,
            ),
            KnownCommand::new("time", "The current time is: {}", Some(Action::Time)),
            KnownCommand::new("date", "Today is: {}", Some(Action::Date)),
            KnownCommand::new(
                "total",
                "Total connections number is: {}",
                Some(Action::TotalConnections),
            ),
            KnownCommand::new(
                "my number",
                "Your connection index is: {}",
                Some(Action::ConnectionIndex),
            ),
            KnownCommand::new("id", "Client's ID is: {}", Some(Action::ClientId)),
            KnownCommand::new(
                QUIT_COMMAND,
                "You are disconnected from server, {}! So long!",
                Some(Action::UserName),
            ),
        ];

        let help = format!(
            "The commands could contain these known tokens:\n- {}",
            commands
                .iter()
                .map(|c| c.token)
                .chain(std::iter::once("help"))
                .collect::<Vec<_>>()
                .join("\n- ")
        );
        // Before "id": otherwise a message like "help" would never be
        // reached if it also contained an earlier token.
        commands.insert(7, KnownCommand::new("help", help, None));

        Self {
            commands,
            unknown_response: "Unknown command. Should I consider it like a message to a world?"
                .to_string(),
        }
    }

    fn detail(&self, action: Action, conn: &Connection) -> String {
        match action {
            Action::UserName => conn.user_name().unwrap_or_default().to_string(),
            Action::Time => Local::now().format(TIME_FORMAT).to_string(),
            Action::Date => Local::now().format(DATE_FORMAT).to_string(),
            Action::TotalConnections => conn.connection_count().to_string(),
            Action::ConnectionIndex => conn
                .connection_index()
                .map(|i| i.to_string())
                .unwrap_or_else(|| "not found".to_string()),
            Action::ClientId => conn.client_id().to_string(),
        }
    }

    fn answer(&self, cmd: &KnownCommand, conn: &Connection) -> String {
        match cmd.action {
            None => cmd.response.clone(),
            Some(action) => cmd.response.replacen("{}", &self.detail(action, conn), 1),
        }
    }
}

impl Default for KeywordResponder {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher for KeywordResponder {
    fn respond(&self, msg: &str, conn: &Connection) -> String {
        let lowered = msg.to_lowercase();
        self.commands
            .iter()
            .find(|cmd| lowered.contains(cmd.token))
            .map(|cmd| self.answer(cmd, conn))
            .unwrap_or_else(|| self.unknown_response.clone())
    }
}
