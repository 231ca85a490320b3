//! Console Bot Example
//!
//! Drives the Belfry engine from standard input. Every line typed becomes a
//! trigger from the current nick in the current channel; replies are printed
//! to standard output.
//!
//! ```text
//! hello Belfry           greet (pattern with $nickname)
//! .ping                  rate limited per actor
//! .echo <text>           unthrottled when called without text
//! Belfry: help [cmd]     nickname command, lists or describes commands
//! /me waves              action command
//! https://example.org    URL rule
//! .slow                  exclusive, times out after 2s
//! .boom                  handler error
//! .stats                 executor counters
//! /nick <name>           switch the actor
//! /join <#channel>       switch channel (dispatches a JOIN)
//! /quit                  shut down
//! ```
//!
//! # Usage
//!
//! ```bash
//! cargo run --package console-bot -- --as alice --channel '#belfry'
//! ```

use std::fmt::Display;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use anyhow::Result;
use belfry::core::{ACTION_INTENT, Suppression};
use belfry::framework::{Executor, RuleRegistry, SuppressionNotifier};
use belfry::prelude::*;
use clap::Parser;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::DropGuard;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(about = "Type chat lines, watch Belfry dispatch them")]
struct Args {
    /// Configuration file (defaults to ./belfry.toml when present).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Nick the typed lines come from.
    #[arg(long = "as", default_value = "you")]
    nick: String,

    #[arg(long, default_value = "#belfry")]
    channel: String,
}

/// `[plugins.console]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct ConsoleConfig {
    greeting: String,
    heartbeat_secs: u64,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            greeting: "Hello".to_string(),
            heartbeat_secs: 30,
        }
    }
}

fn reply(trigger: &Trigger, text: impl Display) {
    println!("[{}] <bot> {}", trigger.target(), text);
}

// ============================================================================
// Handler Functions
// ============================================================================

async fn greet(trigger: Arc<Trigger>, config: PluginConfig<ConsoleConfig>) {
    reply(
        &trigger,
        format!("{}, {}!", config.greeting, trigger.actor().nick()),
    );
}

async fn ping(trigger: Arc<Trigger>) {
    reply(&trigger, "Pong!");
}

/// Echoes the arguments. A bare `.echo` does not count against the limit.
async fn echo(trigger: Arc<Trigger>, captures: Captures) -> Outcome {
    match captures.args().map(str::trim).filter(|a| !a.is_empty()) {
        Some(text) => {
            reply(&trigger, text);
            Outcome::Handled
        }
        None => {
            reply(&trigger, "usage: .echo <text>");
            Outcome::Unthrottled
        }
    }
}

/// Lists documented commands, or describes the one named in the arguments.
async fn help(trigger: Arc<Trigger>, captures: Captures, registry: Weak<RuleRegistry>) {
    let Some(registry) = registry.upgrade() else {
        return;
    };
    let Some(command) = captures.args().map(str::trim).filter(|a| !a.is_empty()) else {
        let commands: Vec<String> = registry.help_index().into_keys().collect();
        reply(&trigger, format!("commands: {}", commands.join(" ")));
        return;
    };
    match registry.help(command) {
        Some(help) => {
            reply(
                &trigger,
                help.doc.as_deref().unwrap_or("no description"),
            );
            for example in help.examples {
                reply(&trigger, format!("e.g. {example}"));
            }
        }
        None => reply(&trigger, format!("no help for {command}")),
    }
}

async fn wave_back(trigger: Arc<Trigger>) {
    println!(
        "[{}] * bot waves back at {}",
        trigger.target(),
        trigger.actor().nick()
    );
}

async fn link(trigger: Arc<Trigger>, captures: Captures) {
    reply(&trigger, format!("that looks like a link: {}", captures.matched()));
}

async fn slow(trigger: Arc<Trigger>) {
    reply(&trigger, "thinking...");
    tokio::time::sleep(Duration::from_secs(3)).await;
    reply(&trigger, "done thinking");
}

async fn boom() -> Result<(), BoxError> {
    Err("the handler blew up".into())
}

async fn welcome(trigger: Arc<Trigger>) {
    reply(
        &trigger,
        format!("welcome to {}, {}", trigger.target(), trigger.actor().nick()),
    );
}

async fn heartbeat(tick: JobTick) {
    info!(lag = ?tick.lag(), "heartbeat");
}

// ============================================================================
// Plugin
// ============================================================================

fn console_plugin(
    executor: Arc<Executor>,
    registry: Weak<RuleRegistry>,
    heartbeat_secs: u64,
) -> Plugin {
    Plugin::new("console")
        .rule(
            Rule::builder("greet")
                .pattern(r"(?:hi|hello|hey),?\s+$nickname\b")
                .case_insensitive()
                .handler(greet),
        )
        .rule(
            Rule::builder("ping")
                .command("ping")
                .doc("Replies with Pong!")
                .example(".ping")
                .rate_limit(RateLimit::per_actor(2, Duration::from_secs(30)))
                .handler(ping),
        )
        .rule(
            Rule::builder("echo")
                .command("echo")
                .doc("Repeats the text back.")
                .example(".echo hi")
                .help_example(".echo hello $nickname")
                .rate_limit(RateLimit::per_actor_in_target(3, Duration::from_secs(60)))
                .handler(echo),
        )
        .rule(
            Rule::builder("help")
                .nickname_command("help")
                .doc("Lists commands, or describes one.")
                .help_example("$nickname: help echo")
                .unblockable()
                .handler(move |trigger: Arc<Trigger>, captures: Captures| {
                    help(trigger, captures, registry.clone())
                }),
        )
        .rule(
            Rule::builder("wave")
                .action_command("waves")
                .priority(Priority::Low)
                .handler(wave_back),
        )
        .rule(Rule::builder("link").url(r"https?://\S+").handler(link))
        .rule(
            Rule::builder("slow")
                .command("slow")
                .doc("Takes longer than its two second budget.")
                .exclusive()
                .timeout(Duration::from_secs(2))
                .handler(slow),
        )
        .rule(Rule::builder("boom").command("boom").handler(boom))
        .rule(
            Rule::builder("stats")
                .command("stats")
                .doc("Shows executor counters.")
                .unblockable()
                .priority(Priority::High)
                .handler(move |trigger: Arc<Trigger>| {
                    let executor = Arc::clone(&executor);
                    async move {
                        let stats = executor.stats();
                        reply(
                            &trigger,
                            format!(
                                "submitted={} completed={} failed={} timed_out={} running={}",
                                stats.submitted,
                                stats.completed,
                                stats.failed,
                                stats.timed_out,
                                stats.running
                            ),
                        );
                    }
                }),
        )
        .rule(Rule::builder("welcome").event("JOIN").handler(welcome))
        .job(
            Job::builder("heartbeat")
                .every(Duration::from_secs(heartbeat_secs))
                .jitter(Duration::from_secs(5))
                .handler(heartbeat),
        )
        .on_load(|ctx: LoadContext| async move {
            info!(plugin = ctx.plugin(), "console plugin ready");
            Ok::<_, BoxError>(())
        })
        .on_shutdown(|| async {
            info!("console plugin unloaded");
        })
}

/// Prints suppressed candidates so throttling is visible in the console.
struct ConsoleNotifier;

impl SuppressionNotifier for ConsoleNotifier {
    fn suppressed(&self, rule: &Rule, trigger: &Trigger, reason: Suppression) {
        match reason {
            Suppression::RateLimited => reply(
                trigger,
                format!("{}: slow down with {}", trigger.actor().nick(), rule.name()),
            ),
            Suppression::Exclusive => reply(trigger, format!("{} is busy", rule.name())),
        }
    }
}

// ============================================================================
// Console Input
// ============================================================================

/// Who is typing, and where.
struct Session {
    nick: String,
    channel: String,
}

impl Session {
    /// Turns one typed line into a trigger, or `None` for local commands.
    fn parse(&mut self, line: &str) -> Option<Trigger> {
        let line = line.trim_end();
        if let Some(nick) = line.strip_prefix("/nick ") {
            self.nick = nick.trim().to_string();
            println!("* you are now {}", self.nick);
            return None;
        }
        if let Some(channel) = line.strip_prefix("/join ") {
            self.channel = channel.trim().to_string();
            return Some(
                Trigger::builder(self.nick.as_str(), Target::channel(&self.channel))
                    .event("JOIN")
                    .build(),
            );
        }

        let builder = Trigger::builder(self.nick.as_str(), Target::channel(&self.channel));
        let trigger = match line.strip_prefix("/me ") {
            Some(action) => builder.intent(ACTION_INTENT).text(action),
            None => builder.text(line),
        };
        Some(trigger.build())
    }
}

/// Feeds typed lines to the runtime. Dropping `shutdown` on EOF or `/quit`
/// stops the runtime.
async fn read_console(
    mut session: Session,
    triggers: mpsc::Sender<Trigger>,
    shutdown: DropGuard,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read from stdin: {e}");
                break;
            }
        };
        if line.trim() == "/quit" {
            break;
        }
        if let Some(trigger) = session.parse(&line)
            && triggers.send(trigger).await.is_err()
        {
            break;
        }
    }
    drop(shutdown);
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut builder = BelfryRuntime::builder();
    if let Some(path) = &args.config {
        builder = builder.config_file(path);
    }
    let runtime = builder.build()?.with_notifier(Arc::new(ConsoleNotifier));

    let console: ConsoleConfig = match runtime.config().plugins.get("console") {
        Some(section) => serde_json::from_value(section.clone())?,
        None => ConsoleConfig::default(),
    };
    runtime
        .load_plugin(console_plugin(
            Arc::clone(runtime.executor()),
            Arc::downgrade(runtime.registry()),
            console.heartbeat_secs,
        ))
        .await?;

    println!(
        "* talking as {} in {}; try `.ping`, `hello {}` or `/quit`",
        args.nick,
        args.channel,
        runtime.config().core.nick
    );

    let session = Session {
        nick: args.nick,
        channel: args.channel,
    };
    tokio::spawn(read_console(
        session,
        runtime.trigger_sender(),
        runtime.shutdown_token().drop_guard(),
    ));

    runtime.run().await?;
    Ok(())
}
