//! Compilation of match specifications and per-trigger matching.

use std::sync::{Arc, LazyLock};

use regex::{Regex, RegexBuilder};

use belfry_core::{RegistryError, RegistryResult, Trigger};

use super::{MatchSpec, PatternMode, Rule};
use crate::context::{ARGS_GROUP, COMMAND_GROUP, Captures};

/// Placeholder replaced by the bot's nick (or any alias) in patterns.
const NICKNAME_PLACEHOLDER: &str = "$nickname";

/// Command prefix examples are written with.
pub const DEFAULT_HELP_PREFIX: &str = ".";

static URL_FINDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bhttps?://[^\s<>"']+"#).expect("invalid url finder regex")
});

/// Bot identity used when compiling rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSettings {
    pub nick: String,
    pub aliases: Vec<String>,
    /// Regular expression placed in front of command names.
    pub command_prefix: String,
    /// Literal prefix shown in front of commands in help examples.
    pub help_prefix: String,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            nick: "Belfry".to_string(),
            aliases: Vec::new(),
            command_prefix: r"\.".to_string(),
            help_prefix: DEFAULT_HELP_PREFIX.to_string(),
        }
    }
}

impl MatchSettings {
    pub fn new(nick: impl Into<String>) -> Self {
        Self {
            nick: nick.into(),
            ..Default::default()
        }
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_command_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.command_prefix = prefix.into();
        self
    }

    pub fn with_help_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.help_prefix = prefix.into();
        self
    }

    /// Renders an example for help output: `$nickname` becomes the bot's
    /// nick, and a leading default help prefix becomes the configured one.
    pub fn render_example(&self, example: &str) -> String {
        let example = example.replace(NICKNAME_PLACEHOLDER, &self.nick);
        if example.starts_with(self.help_prefix.as_str()) || example.starts_with(self.nick.as_str())
        {
            return example;
        }
        match example.strip_prefix(DEFAULT_HELP_PREFIX) {
            Some(rest) => format!("{}{rest}", self.help_prefix),
            None => example,
        }
    }

    /// Alternation over the escaped nick and aliases.
    fn nick_alternation(&self) -> String {
        let nicks: Vec<String> = std::iter::once(&self.nick)
            .chain(&self.aliases)
            .map(|n| regex::escape(n))
            .collect();
        format!("(?:{})", nicks.join("|"))
    }
}

#[derive(Debug)]
enum Matcher {
    Anchored(Regex),
    Search(Regex),
    FindAll(Regex),
    Action(Regex),
    Url(Regex),
    Event,
}

impl Matcher {
    fn captures(&self, trigger: &Trigger) -> Vec<Captures> {
        let text = trigger.text();
        match self {
            Self::Anchored(re) | Self::Search(re) => re
                .captures(text)
                .map(|caps| Captures::from_regex(re, &caps))
                .into_iter()
                .collect(),
            Self::FindAll(re) => re
                .captures_iter(text)
                .map(|caps| Captures::from_regex(re, &caps))
                .collect(),
            Self::Action(re) => {
                if !trigger.is_action() {
                    return Vec::new();
                }
                re.captures(text)
                    .map(|caps| Captures::from_regex(re, &caps))
                    .into_iter()
                    .collect()
            }
            Self::Url(re) => URL_FINDER
                .find_iter(text)
                .filter_map(|url| re.captures(url.as_str()).map(|caps| Captures::from_regex(re, &caps)))
                .collect(),
            Self::Event => vec![Captures::whole(text)],
        }
    }
}

/// A rule with its match specifications compiled against the bot identity.
#[derive(Debug)]
pub struct CompiledRule {
    rule: Arc<Rule>,
    matchers: Vec<Matcher>,
    intents: Vec<Regex>,
}

impl CompiledRule {
    pub fn compile(rule: Arc<Rule>, settings: &MatchSettings) -> RegistryResult<Self> {
        let nicks = settings.nick_alternation();
        let compile = |pattern: &str| {
            RegexBuilder::new(pattern)
                .case_insensitive(rule.is_case_insensitive())
                .build()
                .map_err(|e| RegistryError::invalid_pattern(rule.name(), e))
        };

        let mut matchers = Vec::with_capacity(rule.specs().len());
        for spec in rule.specs() {
            let matcher = match spec {
                MatchSpec::Command(names) => Matcher::Anchored(compile(&format!(
                    "^(?:{}){}",
                    settings.command_prefix,
                    command_body(names)
                ))?),
                MatchSpec::NicknameCommand(names) => Matcher::Anchored(compile(&format!(
                    r"^{nicks}[:,]?\s+{}",
                    command_body(names)
                ))?),
                MatchSpec::ActionCommand(names) => {
                    Matcher::Action(compile(&format!("^{}", command_body(names)))?)
                }
                MatchSpec::Pattern { pattern, mode } => {
                    let pattern = pattern.replace(NICKNAME_PLACEHOLDER, &nicks);
                    match mode {
                        PatternMode::Anchored => {
                            Matcher::Anchored(compile(&format!("^(?:{pattern})"))?)
                        }
                        PatternMode::Search => Matcher::Search(compile(&pattern)?),
                        PatternMode::FindAll => Matcher::FindAll(compile(&pattern)?),
                    }
                }
                MatchSpec::Url(pattern) => Matcher::Url(compile(&format!("^(?:{pattern})"))?),
                MatchSpec::Event => Matcher::Event,
            };
            matchers.push(matcher);
        }

        let intents = rule
            .intents()
            .iter()
            .map(|intent| {
                RegexBuilder::new(&format!("^(?:{intent})$"))
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| RegistryError::invalid_pattern(rule.name(), e))
            })
            .collect::<RegistryResult<Vec<_>>>()?;

        Ok(Self {
            rule,
            matchers,
            intents,
        })
    }

    pub fn rule(&self) -> &Arc<Rule> {
        &self.rule
    }

    /// Returns one [`Captures`] per invocation the trigger calls for, or an
    /// empty vector when the rule does not accept it.
    ///
    /// Filters (event kind, echo, intent) are checked first. The first match
    /// specification that yields any match decides the captures.
    pub fn matches(&self, trigger: &Trigger) -> Vec<Captures> {
        if !self.rule.events().iter().any(|e| e == trigger.event()) {
            return Vec::new();
        }
        if trigger.is_echo() && !self.rule.echo() {
            return Vec::new();
        }
        if !self.intents.is_empty() {
            let accepted = trigger
                .intent()
                .is_some_and(|intent| self.intents.iter().any(|re| re.is_match(intent)));
            if !accepted {
                return Vec::new();
            }
        }

        self.matchers
            .iter()
            .map(|m| m.captures(trigger))
            .find(|caps| !caps.is_empty())
            .unwrap_or_default()
    }
}

/// Named command and args groups. Groups in the prefix may precede them.
fn command_body(names: &[String]) -> String {
    let names = names
        .iter()
        .map(|n| regex::escape(n))
        .collect::<Vec<_>>()
        .join("|");
    format!(r"(?P<{COMMAND_GROUP}>{names})(?:\s+(?P<{ARGS_GROUP}>.*))?$")
}

#[cfg(test)]
mod tests {
    use super::*;
    use belfry_core::Target;

    fn compile(rule: Rule) -> CompiledRule {
        let settings = MatchSettings::new("Belfry").with_aliases(["bel"]);
        CompiledRule::compile(Arc::new(rule), &settings).unwrap()
    }

    fn msg(text: &str) -> Trigger {
        Trigger::builder("alice", Target::channel("#rust"))
            .text(text)
            .build()
    }

    #[test]
    fn test_command_captures() {
        let rule = compile(Rule::builder("seen").command("seen").handler(|| async {}));

        let caps = rule.matches(&msg(".seen bob"));
        assert_eq!(caps.len(), 1);
        assert_eq!(caps[0].command(), Some("seen"));
        assert_eq!(caps[0].args(), Some("bob"));

        assert!(rule.matches(&msg(".seeny bob")).is_empty());
        assert!(rule.matches(&msg("seen bob")).is_empty());
        assert!(rule.matches(&msg(".SEEN bob")).is_empty());
    }

    #[test]
    fn test_custom_prefix_is_structural() {
        let settings = MatchSettings::default().with_command_prefix(r"[!?]");
        let rule = Rule::builder("ping").command("ping").handler(|| async {});
        let compiled = CompiledRule::compile(Arc::new(rule), &settings).unwrap();

        assert_eq!(compiled.matches(&msg("!ping")).len(), 1);
        assert_eq!(compiled.matches(&msg("?ping")).len(), 1);
        assert!(compiled.matches(&msg(".ping")).is_empty());
    }

    #[test]
    fn test_capturing_prefix_keeps_command_groups() {
        let settings = MatchSettings::default().with_command_prefix(r"(!|\?)");
        let rule = Rule::builder("ping").command("ping").handler(|| async {});
        let compiled = CompiledRule::compile(Arc::new(rule), &settings).unwrap();

        let caps = compiled.matches(&msg("!ping bob"));
        assert_eq!(caps.len(), 1);
        assert_eq!(caps[0].command(), Some("ping"));
        assert_eq!(caps[0].args(), Some("bob"));

        let bare = compiled.matches(&msg("?ping"));
        assert_eq!(bare[0].command(), Some("ping"));
        assert_eq!(bare[0].args(), None);
    }

    #[test]
    fn test_case_insensitive_opt_in() {
        let rule = compile(
            Rule::builder("seen")
                .command("seen")
                .case_insensitive()
                .handler(|| async {}),
        );
        assert_eq!(rule.matches(&msg(".SEEN bob")).len(), 1);
    }

    #[test]
    fn test_nickname_command() {
        let rule = compile(
            Rule::builder("help")
                .nickname_command("help")
                .handler(|| async {}),
        );

        assert_eq!(rule.matches(&msg("Belfry: help")).len(), 1);
        assert_eq!(rule.matches(&msg("bel, help me")).len(), 1);
        assert_eq!(rule.matches(&msg("Belfry help"))[0].command(), Some("help"));
        assert!(rule.matches(&msg("someone: help")).is_empty());
    }

    #[test]
    fn test_action_command_requires_action() {
        let rule = compile(
            Rule::builder("hug")
                .action_command("hugs")
                .handler(|| async {}),
        );

        let action = Trigger::builder("alice", Target::channel("#rust"))
            .intent("ACTION")
            .text("hugs bob")
            .build();
        assert_eq!(rule.matches(&action)[0].args(), Some("bob"));
        assert!(rule.matches(&msg("hugs bob")).is_empty());
    }

    #[test]
    fn test_pattern_modes() {
        let anchored = compile(Rule::builder("a").pattern("hello").handler(|| async {}));
        let search = compile(Rule::builder("s").search("hello").handler(|| async {}));
        let find = compile(Rule::builder("f").find(r"#(\d+)").handler(|| async {}));

        assert!(anchored.matches(&msg("well hello")).is_empty());
        assert_eq!(search.matches(&msg("well hello")).len(), 1);

        let caps = find.matches(&msg("see #12 and #34"));
        assert_eq!(caps.len(), 2);
        assert_eq!(caps[1].group(1), Some("34"));
    }

    #[test]
    fn test_nickname_placeholder() {
        let rule = compile(
            Rule::builder("hi")
                .pattern(r"$nickname!")
                .handler(|| async {}),
        );
        assert_eq!(rule.matches(&msg("Belfry!")).len(), 1);
        assert_eq!(rule.matches(&msg("bel!")).len(), 1);
        assert!(rule.matches(&msg("other!")).is_empty());
    }

    #[test]
    fn test_url_matches_per_url() {
        let rule = compile(
            Rule::builder("gh")
                .url(r"https://github\.com/([^/\s]+)")
                .handler(|| async {}),
        );

        let caps = rule.matches(&msg(
            "see https://github.com/tokio and https://example.org and https://github.com/serde",
        ));
        assert_eq!(caps.len(), 2);
        assert_eq!(caps[0].group(1), Some("tokio"));
        assert_eq!(caps[1].group(1), Some("serde"));
    }

    #[test]
    fn test_event_filter() {
        let rule = compile(Rule::builder("joins").event("JOIN").handler(|| async {}));

        let join = Trigger::builder("alice", Target::channel("#rust"))
            .event("JOIN")
            .build();
        assert_eq!(rule.matches(&join).len(), 1);
        assert!(rule.matches(&msg("hello")).is_empty());
    }

    #[test]
    fn test_echo_policy() {
        let plain = compile(Rule::builder("any").handler(|| async {}));
        let echoing = compile(Rule::builder("echo").echo(true).handler(|| async {}));

        let echo = Trigger::builder("Belfry", Target::channel("#rust"))
            .text("hi")
            .echo(true)
            .build();
        assert!(plain.matches(&echo).is_empty());
        assert_eq!(echoing.matches(&echo).len(), 1);
    }

    #[test]
    fn test_intent_filter_is_case_insensitive() {
        let rule = compile(Rule::builder("v").intent("version").handler(|| async {}));

        let version = Trigger::builder("alice", Target::direct("alice"))
            .intent("VERSION")
            .build();
        assert_eq!(rule.matches(&version).len(), 1);
        assert!(rule.matches(&msg("VERSION")).is_empty());
    }

    #[test]
    fn test_render_example() {
        let settings = MatchSettings::new("bell").with_help_prefix("!");

        assert_eq!(settings.render_example(".seen bob"), "!seen bob");
        assert_eq!(settings.render_example("$nickname: help"), "bell: help");
        assert_eq!(settings.render_example("!ping"), "!ping");
        assert_eq!(settings.render_example("hugs bob"), "hugs bob");
    }

    #[test]
    fn test_invalid_pattern() {
        let rule = Rule::builder("broken").pattern("(unclosed").handler(|| async {});
        let err = CompiledRule::compile(Arc::new(rule), &MatchSettings::default()).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidPattern { ref name, .. } if name == "broken"));
    }
}
