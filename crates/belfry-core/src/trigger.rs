//! Inbound event snapshot.
//!
//! A [`Trigger`] is built once per parsed protocol line by the external
//! parser and is never mutated afterwards. The dispatcher wraps it in an
//! `Arc` and hands the same snapshot to every handler matched for it.
//!
//! ```rust,ignore
//! use belfry_core::{Target, Trigger};
//!
//! let trigger = Trigger::builder("alice", Target::channel("#rust"))
//!     .text(".ping")
//!     .build();
//!
//! assert_eq!(trigger.actor().nick(), "alice");
//! assert!(!trigger.is_direct());
//! ```

use std::fmt;
use std::time::SystemTime;

use bitflags::bitflags;

/// Default event kind for triggers built without an explicit one.
pub const DEFAULT_EVENT: &str = "PRIVMSG";

/// Intent name carried by `/me`-style action messages.
pub const ACTION_INTENT: &str = "ACTION";

bitflags! {
    /// Cheap classification bits computed when the trigger is built.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TriggerFlags: u8 {
        /// The message carries the `ACTION` intent.
        const ACTION = 1 << 0;
        /// The message was sent directly to the bot rather than to a channel.
        const DIRECT = 1 << 1;
        /// The message is the bot's own output echoed back by the server.
        const ECHO = 1 << 2;
    }
}

/// The originator of a trigger.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Actor {
    nick: String,
    user: Option<String>,
    host: Option<String>,
}

impl Actor {
    /// Creates an actor known only by nick.
    pub fn new(nick: impl Into<String>) -> Self {
        Self {
            nick: nick.into(),
            user: None,
            host: None,
        }
    }

    /// Attaches the user and host parts of the actor's hostmask.
    pub fn with_mask(mut self, user: impl Into<String>, host: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.host = Some(host.into());
        self
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.user, &self.host) {
            (Some(user), Some(host)) => write!(f, "{}!{}@{}", self.nick, user, host),
            _ => f.write_str(&self.nick),
        }
    }
}

/// Where a trigger was addressed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// A channel shared by several users.
    Channel(String),
    /// A direct conversation; the value is the peer's nick.
    Direct(String),
}

impl Target {
    pub fn channel(name: impl Into<String>) -> Self {
        Self::Channel(name.into())
    }

    pub fn direct(nick: impl Into<String>) -> Self {
        Self::Direct(nick.into())
    }

    /// The identifier used for replies and for target-scoped rate limits.
    pub fn key(&self) -> &str {
        match self {
            Self::Channel(name) | Self::Direct(name) => name,
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, Self::Direct(_))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Immutable snapshot of one parsed inbound event.
#[derive(Debug, Clone)]
pub struct Trigger {
    actor: Actor,
    target: Target,
    event: String,
    text: String,
    args: Vec<String>,
    intent: Option<String>,
    flags: TriggerFlags,
    received_at: SystemTime,
}

impl Trigger {
    /// Starts building a trigger from `nick` addressed to `target`.
    pub fn builder(actor: impl Into<Actor>, target: Target) -> TriggerBuilder {
        TriggerBuilder {
            actor: actor.into(),
            target,
            event: DEFAULT_EVENT.to_string(),
            text: String::new(),
            args: Vec::new(),
            intent: None,
            echo: false,
            received_at: None,
        }
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Protocol event kind, upper-cased (`PRIVMSG`, `JOIN`, …).
    pub fn event(&self) -> &str {
        &self.event
    }

    /// The message body, with any intent framing already removed.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Structured arguments supplied by the parser.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn intent(&self) -> Option<&str> {
        self.intent.as_deref()
    }

    pub fn flags(&self) -> TriggerFlags {
        self.flags
    }

    pub fn is_action(&self) -> bool {
        self.flags.contains(TriggerFlags::ACTION)
    }

    pub fn is_direct(&self) -> bool {
        self.flags.contains(TriggerFlags::DIRECT)
    }

    pub fn is_echo(&self) -> bool {
        self.flags.contains(TriggerFlags::ECHO)
    }

    pub fn received_at(&self) -> SystemTime {
        self.received_at
    }
}

impl From<&str> for Actor {
    fn from(nick: &str) -> Self {
        Actor::new(nick)
    }
}

impl From<String> for Actor {
    fn from(nick: String) -> Self {
        Actor::new(nick)
    }
}

/// Builder for [`Trigger`]; nothing is visible until [`build`](Self::build).
#[derive(Debug)]
pub struct TriggerBuilder {
    actor: Actor,
    target: Target,
    event: String,
    text: String,
    args: Vec<String>,
    intent: Option<String>,
    echo: bool,
    received_at: Option<SystemTime>,
}

impl TriggerBuilder {
    pub fn event(mut self, event: impl AsRef<str>) -> Self {
        self.event = event.as_ref().to_uppercase();
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn intent(mut self, intent: impl AsRef<str>) -> Self {
        self.intent = Some(intent.as_ref().to_uppercase());
        self
    }

    /// Marks the trigger as the bot's own echoed message.
    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn received_at(mut self, at: SystemTime) -> Self {
        self.received_at = Some(at);
        self
    }

    pub fn build(self) -> Trigger {
        let mut flags = TriggerFlags::empty();
        if self.intent.as_deref() == Some(ACTION_INTENT) {
            flags |= TriggerFlags::ACTION;
        }
        if self.target.is_direct() {
            flags |= TriggerFlags::DIRECT;
        }
        if self.echo {
            flags |= TriggerFlags::ECHO;
        }

        Trigger {
            actor: self.actor,
            target: self.target,
            event: self.event,
            text: self.text,
            args: self.args,
            intent: self.intent,
            flags,
            received_at: self.received_at.unwrap_or_else(SystemTime::now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let trigger = Trigger::builder("alice", Target::channel("#rust"))
            .text("hi")
            .build();

        assert_eq!(trigger.event(), DEFAULT_EVENT);
        assert_eq!(trigger.text(), "hi");
        assert!(trigger.args().is_empty());
        assert!(trigger.flags().is_empty());
    }

    #[test]
    fn test_flags_derived_from_parts() {
        let trigger = Trigger::builder("alice", Target::direct("alice"))
            .intent("action")
            .echo(true)
            .build();

        assert!(trigger.is_action());
        assert!(trigger.is_direct());
        assert!(trigger.is_echo());
        assert_eq!(trigger.intent(), Some(ACTION_INTENT));
    }

    #[test]
    fn test_event_is_uppercased() {
        let trigger = Trigger::builder("alice", Target::channel("#rust"))
            .event("join")
            .build();
        assert_eq!(trigger.event(), "JOIN");
    }

    #[test]
    fn test_actor_display() {
        assert_eq!(Actor::new("bob").to_string(), "bob");
        assert_eq!(
            Actor::new("bob").with_mask("~b", "example.org").to_string(),
            "bob!~b@example.org"
        );
    }
}
