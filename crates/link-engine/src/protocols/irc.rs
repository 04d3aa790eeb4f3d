//! Twitch chat over IRC-on-websocket.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, trace};

use crate::error::{LinkError, Result};
use crate::handshake::{HandshakeStep, Verdict};
use crate::protocol::LinkProtocol;
use crate::transport::{RawMessage, WebSocketTransport};

/// Twitch WebSocket IRC server URL
pub const TWITCH_IRC_URL: &str = "wss://irc-ws.chat.twitch.tv:443";

const CAPABILITIES: &str = "twitch.tv/tags twitch.tv/commands";

const LOGIN_FAILURES: [&str; 2] = [
    "Login authentication failed",
    "Improperly formatted auth",
];

/// One IRC line: `[@tags] [:prefix] COMMAND [params...] [:trailing]`.
///
/// The trailing parameter, when present, is the last entry of `params`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IrcMessage {
    pub tags: HashMap<String, String>,
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl IrcMessage {
    pub fn new<S: Into<String>>(
        command: impl Into<String>,
        params: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            command: command.into(),
            params: params.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Parse one line without its line terminator.
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']);
        let mut message = Self::default();

        if let Some(tagged) = rest.strip_prefix('@') {
            let (tags, remainder) = tagged.split_once(' ')?;
            for tag in tags.split(';').filter(|t| !t.is_empty()) {
                let (key, value) = tag.split_once('=').unwrap_or((tag, ""));
                message.tags.insert(key.to_string(), unescape_tag(value));
            }
            rest = remainder.trim_start();
        }

        if let Some(prefixed) = rest.strip_prefix(':') {
            let (prefix, remainder) = prefixed.split_once(' ')?;
            message.prefix = Some(prefix.to_string());
            rest = remainder.trim_start();
        }

        let (command, mut params) = match rest.split_once(' ') {
            Some((command, params)) => (command, params),
            None => (rest, ""),
        };
        if command.is_empty() {
            return None;
        }
        message.command = command.to_string();

        while !params.is_empty() {
            if let Some(trailing) = params.strip_prefix(':') {
                message.params.push(trailing.to_string());
                break;
            }
            match params.split_once(' ') {
                Some((param, remainder)) => {
                    if !param.is_empty() {
                        message.params.push(param.to_string());
                    }
                    params = remainder;
                }
                None => {
                    message.params.push(params.to_string());
                    break;
                }
            }
        }

        Some(message)
    }

    /// Render the line that goes on the wire. Tags and prefix are not sent
    /// by clients.
    pub fn to_line(&self) -> String {
        let mut line = self.command.clone();
        let last = self.params.len().saturating_sub(1);
        for (index, param) in self.params.iter().enumerate() {
            line.push(' ');
            let needs_colon =
                index == last && (param.is_empty() || param.contains(' ') || param.starts_with(':'));
            if needs_colon {
                line.push(':');
            }
            line.push_str(param);
        }
        line
    }

    /// Nickname part of the prefix (`nick!user@host`).
    pub fn nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        prefix.split(['!', '@']).next().filter(|nick| !nick.is_empty())
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    pub fn trailing(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }
}

fn unescape_tag(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// A chat line extracted from a `PRIVMSG`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub channel: String,
    pub user_id: String,
    pub login: String,
    pub display_name: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badges: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bits: Option<u32>,
}

impl ChatMessage {
    /// Extract a chat line; `None` for anything but a channel `PRIVMSG`.
    pub fn from_irc(message: &IrcMessage) -> Option<Self> {
        if message.command != "PRIVMSG" {
            return None;
        }
        let channel = message.param(0)?.strip_prefix('#')?.to_string();
        let text = message.param(1)?.trim().to_string();
        let login = message.nick().unwrap_or("unknown").to_string();

        Some(Self {
            id: message
                .tag("id")
                .map(str::to_string)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            channel,
            user_id: message
                .tag("user-id")
                .map(str::to_string)
                .unwrap_or_else(|| login.clone()),
            display_name: message
                .tag("display-name")
                .map(str::to_string)
                .unwrap_or_else(|| login.clone()),
            login,
            text,
            color: message.tag("color").map(str::to_string),
            badges: message.tag("badges").map(str::to_string),
            bits: message.tag("bits").and_then(|b| b.parse().ok()),
        })
    }
}

/// Twitch IRC login and channel.
#[derive(Debug, Clone)]
pub struct IrcProtocol {
    channel: String,
    nick: String,
    token: Option<String>,
}

impl IrcProtocol {
    /// Read-only anonymous session.
    pub fn anonymous(channel: &str) -> Self {
        Self {
            channel: normalize_channel(channel),
            nick: anonymous_nick(),
            token: None,
        }
    }

    /// Authenticated session. The `oauth:` prefix is optional.
    pub fn with_oauth(channel: &str, nick: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            channel: normalize_channel(channel),
            nick: nick.into().to_lowercase(),
            token: Some(token.into()),
        }
    }

    /// Channel name without the leading `#`.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    /// Websocket transport pointed at Twitch.
    pub fn transport() -> WebSocketTransport {
        WebSocketTransport::new(TWITCH_IRC_URL)
    }

    fn pass(&self) -> String {
        match &self.token {
            Some(token) if token.starts_with("oauth:") => token.clone(),
            Some(token) => format!("oauth:{token}"),
            None => "oauth:".to_string(),
        }
    }
}

fn normalize_channel(channel: &str) -> String {
    channel.trim().trim_start_matches('#').to_lowercase()
}

fn anonymous_nick() -> String {
    let random_num: u32 = rand::random::<u32>() % 100000;
    format!("justinfan{random_num}")
}

impl LinkProtocol for IrcProtocol {
    type Outbound = IrcMessage;
    type Inbound = IrcMessage;

    fn name(&self) -> &str {
        "irc"
    }

    fn handshake_steps(&self) -> Vec<HandshakeStep<IrcMessage, IrcMessage>> {
        let capabilities = HandshakeStep::expect(
            vec![IrcMessage::new("CAP", ["REQ", CAPABILITIES])],
            |m: &IrcMessage| m.command == "CAP" && m.param(1) == Some("ACK"),
        );

        let login = HandshakeStep::with_verdict(
            vec![
                IrcMessage::new("PASS", [self.pass()]),
                IrcMessage::new("NICK", [self.nick.clone()]),
            ],
            |m: &IrcMessage| match m.command.as_str() {
                "001" => Verdict::Accepted,
                "NOTICE" => match m.trailing() {
                    Some(text) if LOGIN_FAILURES.iter().any(|f| text.contains(f)) => {
                        Verdict::Rejected(text.to_string())
                    }
                    _ => Verdict::Pending,
                },
                _ => Verdict::Pending,
            },
        );

        let target = format!("#{}", self.channel);
        let nick = self.nick.clone();
        let join = HandshakeStep::expect(
            vec![IrcMessage::new("JOIN", [target.clone()])],
            move |m: &IrcMessage| {
                m.command == "JOIN"
                    && m.param(0) == Some(target.as_str())
                    && m.nick().is_some_and(|n| n.eq_ignore_ascii_case(&nick))
            },
        );

        vec![capabilities, login, join]
    }

    fn parse_message(&self, raw: &RawMessage) -> Result<Vec<IrcMessage>> {
        let text = raw
            .as_text()
            .ok_or_else(|| LinkError::protocol("IRC payload is not UTF-8"))?;
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| {
                let parsed = IrcMessage::parse(line);
                if parsed.is_none() {
                    trace!(line, "Skipping malformed IRC line");
                }
                parsed
            })
            .collect())
    }

    fn serialize_message(&self, message: &IrcMessage) -> Result<RawMessage> {
        if message.command.is_empty() {
            return Err(LinkError::protocol("IRC message without a command"));
        }
        Ok(RawMessage::Text(message.to_line()))
    }

    fn reply_to(&self, message: &IrcMessage) -> Option<IrcMessage> {
        if message.command != "PING" {
            return None;
        }
        debug!("Answering PING");
        let params = if message.params.is_empty() {
            vec!["tmi.twitch.tv".to_string()]
        } else {
            message.params.clone()
        };
        Some(IrcMessage::new("PONG", params))
    }
}
