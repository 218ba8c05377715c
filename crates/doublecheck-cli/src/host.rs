//! The command dispatcher the broker plugs into.
//!
//! Every input line is `<actor> <command> [argument...]`, except host
//! commands, which start with `:`:
//!
//! | Line | Effect |
//! |------|--------|
//! | `alice ask [@plugin] <prompt>` | submit a request for alice |
//! | `alice confirm [token]` | any confirm/deny word of any plugin |
//! | `alice forget` | cancel alice's pending request |
//! | `:list` | pending requests of every plugin |
//! | `:sweep` | expire overdue requests now |
//!
//! Blank lines and `#` comments are ignored.

use doublecheck_core::{
    BrokerConfig, BrokerError, ConfigError, ConfirmationBroker, OccupationBus, Outcome, Request,
    Resolution,
};
use serde_json::{json, Value};
use tracing::warn;

pub struct Host {
    plugins: Vec<Plugin>,
}

struct Plugin {
    name: String,
    broker: ConfirmationBroker<String>,
}

impl Host {
    /// One broker per plugin name, all sharing one occupation bus.
    pub fn new(config: &BrokerConfig, names: &[String]) -> Result<Self, ConfigError> {
        if names.is_empty() {
            return Err(ConfigError::Invalid {
                message: "at least one plugin is required".into(),
            });
        }
        let bus = OccupationBus::new();
        let plugins = names
            .iter()
            .map(|name| {
                let broker = ConfirmationBroker::builder()
                    .config(config.clone())
                    .bus(bus.clone())
                    .build()?;
                Ok(Plugin {
                    name: name.clone(),
                    broker,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(Self { plugins })
    }

    pub fn brokers(&self) -> impl Iterator<Item = &ConfirmationBroker<String>> {
        self.plugins.iter().map(|p| &p.broker)
    }

    /// Handle one input line, returning the lines to print.
    pub fn handle_line(&self, line: &str) -> Vec<String> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Vec::new();
        }
        if let Some(command) = line.strip_prefix(':') {
            return self.host_command(command.trim());
        }

        let (actor, rest) = split_word(line);
        let (command, argument) = split_word(rest);
        if command.is_empty() {
            return vec![format!("{actor}: missing command")];
        }

        match command {
            "ask" => self.ask(actor, argument),
            "forget" => self.forget(actor),
            _ => self.route(actor, command, argument),
        }
    }

    fn host_command(&self, command: &str) -> Vec<String> {
        match command {
            "list" => self.list(),
            "sweep" => self.sweep(),
            other => vec![format!("unknown host command :{other}")],
        }
    }

    fn ask(&self, actor: &str, argument: &str) -> Vec<String> {
        let (plugin, prompt) = match argument.strip_prefix('@') {
            Some(tagged) => {
                let (name, prompt) = split_word(tagged);
                match self.plugins.iter().find(|p| p.name == name) {
                    Some(plugin) => (plugin, prompt),
                    None => return vec![format!("{actor}: no plugin named {name:?}")],
                }
            }
            None => (&self.plugins[0], argument),
        };
        if prompt.is_empty() {
            return vec![format!("{actor}: ask needs a prompt")];
        }

        let broker = &plugin.broker;
        let request = plugin.request(prompt);
        match broker.submit(actor.to_string(), request) {
            Ok(token) => vec![
                format!("[{}] {actor}: {prompt}", plugin.name),
                broker.messages().instructions(broker.vocabulary()),
                broker.messages().action_line(broker.vocabulary(), token),
            ],
            Err(e) => vec![render_error(broker, actor, &e)],
        }
    }

    /// Offer the command to every plugin; the one holding the actor's claim
    /// answers.
    fn route(&self, actor: &str, command: &str, argument: &str) -> Vec<String> {
        let mut failure: Option<(&Plugin, BrokerError)> = None;
        for plugin in &self.plugins {
            match plugin
                .broker
                .handle_command(actor.to_string(), command, argument)
            {
                None => {}
                Some(Ok(resolution)) => return vec![plugin.render(&resolution)],
                Some(Err(e)) => {
                    let replace = match &failure {
                        None => true,
                        Some((_, current)) => rank(&e) > rank(current),
                    };
                    if replace {
                        failure = Some((plugin, e));
                    }
                }
            }
        }
        match failure {
            Some((plugin, e)) => vec![render_error(&plugin.broker, actor, &e)],
            None => vec![format!("{actor}: unknown command {command:?}")],
        }
    }

    fn forget(&self, actor: &str) -> Vec<String> {
        let actor = actor.to_string();
        let mut cancelled = false;
        for plugin in &self.plugins {
            match plugin.broker.remove(&actor) {
                Ok(removed) => cancelled |= removed,
                Err(e) => return vec![render_error(&plugin.broker, &actor, &e)],
            }
        }
        if cancelled {
            vec![format!("{actor}: request withdrawn")]
        } else {
            vec![format!("{actor}: nothing to withdraw")]
        }
    }

    fn list(&self) -> Vec<String> {
        let mut out = Vec::new();
        for plugin in &self.plugins {
            match plugin.broker.list_active() {
                Ok(entries) => out.extend(entries.iter().map(|entry| {
                    format!(
                        "[{}] {} {} expires {} :: {}",
                        plugin.name,
                        entry.actor(),
                        entry.token(),
                        entry.expires_at().format("%H:%M:%S"),
                        entry.prompt()
                    )
                })),
                Err(e) => out.push(format!("[{}] error: {e}", plugin.name)),
            }
        }
        if out.is_empty() {
            out.push("no pending requests".to_string());
        }
        out
    }

    fn sweep(&self) -> Vec<String> {
        let mut expired = 0;
        for plugin in &self.plugins {
            match plugin.broker.sweep() {
                Ok(report) => expired += report.expired,
                Err(e) => warn!(plugin = %plugin.name, error = %e, "sweep failed"),
            }
        }
        vec![format!("swept {expired}")]
    }
}

impl Plugin {
    fn request(&self, prompt: &str) -> Request<String> {
        let tag = json!({ "plugin": self.name, "prompt": prompt });
        let notice = format!("[{}] {{actor}}: {}", self.name, self.broker.messages().expired_notice);
        Request::builder()
            .prompt(prompt)
            .args(tag)
            .on_confirm(|_, args| Ok(args.clone()))
            .on_deny(|_, args| Ok(args.clone()))
            .on_expire(move |actor: &String, _: &Value| {
                // Nobody is waiting on an expiry; tell the actor directly.
                println!("{}", notice.replace("{actor}", actor));
                Ok(Value::Null)
            })
            .build()
    }

    fn render(&self, resolution: &Resolution<String>) -> String {
        let messages = self.broker.messages();
        let verdict = match resolution.outcome {
            Outcome::Confirmed => &messages.confirmed,
            Outcome::Denied => &messages.denied,
            Outcome::Expired | Outcome::Cancelled => &messages.expired_notice,
        };
        let prompt = resolution.value["prompt"].as_str().unwrap_or_default();
        format!("[{}] {}: {verdict} ({prompt})", self.name, resolution.actor)
    }
}

/// Which of several plugin errors the actor should see.
fn rank(e: &BrokerError) -> u8 {
    match e {
        BrokerError::NoActiveRequest => 0,
        BrokerError::RequestExpired { .. } => 1,
        _ => 2,
    }
}

fn render_error(broker: &ConfirmationBroker<String>, actor: &str, e: &BrokerError) -> String {
    match broker.messages().for_error(e) {
        Some(text) => format!("{actor}: {text}"),
        None => {
            warn!(actor, error = %e, "request handling failed");
            format!("{actor}: error: {e}")
        }
    }
}

fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], s[i..].trim()),
        None => (s, ""),
    }
}
