//! Mesh command table and dispatcher.
//!
//! Commands are `!`-prefixed words heard on the mesh channel (`!status`, `!relay hi`, ...).
//! The table is built once at startup and never changes. Mesh senders are unauthenticated,
//! so modes 2 and 3 block every command that mutates relay policy; only mode 1 lets the mesh
//! reconfigure the bridge.
//!
//! Handlers do not send anything themselves. They return a list of [`Outbound`] actions and
//! the caller routes them to the mesh queue or to Signal.
use log::info;
use std::sync::Arc;

use super::format::{bridge_message, relayed, status_message};
use super::state::{RelayMode, RelayState};
use crate::logutil::escape_log;
use crate::metrics;

pub const COMMAND_PREFIX: char = '!';

/// Commands that change relay policy
const POLICY_COMMANDS: &[&str] = &["on", "off", "mode", "mode1", "mode2", "mode3"];

/// Commands hidden from the mesh in the given mode
pub fn blocked_commands(mode: RelayMode) -> &'static [&'static str] {
    match mode {
        RelayMode::Mode1 => &[],
        RelayMode::Mode2 | RelayMode::Mode3 => POLICY_COMMANDS,
    }
}

pub fn is_blocked(command: &str, mode: RelayMode) -> bool {
    blocked_commands(mode).contains(&command)
}

/// Who issued a command. Built fresh for every inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandContext {
    pub sender_id: String,
    pub sender_label: String,
    /// Hops travelled, when the packet carried enough information to tell
    pub hops: Option<u32>,
}

/// An action requested by a command handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Text for the mesh channel (bridge feedback, not logged as a relay)
    Mesh(String),
    /// Text for the Signal group, relayed on behalf of `label`
    Chat { text: String, label: String },
}

/// Everything a handler may look at
pub struct Invocation<'a> {
    pub args: &'a [&'a str],
    pub ctx: &'a CommandContext,
    pub state: &'a RelayState,
    pub table: &'a CommandTable,
}

pub type Handler = fn(&Invocation<'_>) -> Vec<Outbound>;

#[derive(Clone)]
pub struct CommandDescriptor {
    pub name: &'static str,
    pub handler: Handler,
    pub help: &'static str,
}

impl std::fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("name", &self.name)
            .finish()
    }
}

/// Ordered, immutable command table
#[derive(Debug, Clone)]
pub struct CommandTable {
    commands: Vec<CommandDescriptor>,
}

impl CommandTable {
    /// The built-in mesh command set.
    pub fn builtin() -> Self {
        let commands = vec![
            CommandDescriptor {
                name: "test",
                handler: cmd_test,
                help: "!test — Verify bridge is online, hop distance to bridge.",
            },
            CommandDescriptor {
                name: "on",
                handler: cmd_on,
                help: "!on — Enable message relaying.",
            },
            CommandDescriptor {
                name: "off",
                handler: cmd_off,
                help: "!off — Disable all message relaying.",
            },
            CommandDescriptor {
                name: "mode",
                handler: cmd_mode,
                help: "!mode — Set relay modes using !mode[1,2,3].",
            },
            CommandDescriptor {
                name: "mode1",
                handler: cmd_mode1,
                help: "!mode1 — Relay all messages between Mesh and Signal. Default.",
            },
            CommandDescriptor {
                name: "mode2",
                handler: cmd_mode2,
                help: "!mode2 — Relay all Signal → Mesh. Mesh → Signal REQUIRES !relay [message].",
            },
            CommandDescriptor {
                name: "mode3",
                handler: cmd_mode3,
                help: "!mode3 — Mesh → Signal ONLY via !relay [message]. Signal → Mesh relay DISABLED.",
            },
            CommandDescriptor {
                name: "status",
                handler: cmd_status,
                help: "!status — Show relay state and active mode.",
            },
            CommandDescriptor {
                name: "relay",
                handler: cmd_relay,
                help: "!relay <message> — Explicitly relay a message using the bridge. Modes[2,3] only.",
            },
            CommandDescriptor {
                name: "help",
                handler: cmd_help,
                help: "!help [command] — Show help for a command.",
            },
        ];
        Self { commands }
    }

    /// Case-sensitive lookup; callers lowercase first.
    pub fn get(&self, name: &str) -> Option<&CommandDescriptor> {
        self.commands.iter().find(|c| c.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommandDescriptor> {
        self.commands.iter()
    }

    /// Commands usable in `mode`, in table order
    pub fn available(&self, mode: RelayMode) -> impl Iterator<Item = &CommandDescriptor> {
        self.commands
            .iter()
            .filter(move |c| !is_blocked(c.name, mode))
    }
}

/// Parses and executes mesh commands against the shared relay state.
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    table: Arc<CommandTable>,
    state: Arc<RelayState>,
}

impl CommandDispatcher {
    pub fn new(state: Arc<RelayState>) -> Self {
        Self {
            table: Arc::new(CommandTable::builtin()),
            state,
        }
    }

    pub fn table(&self) -> &CommandTable {
        &self.table
    }

    /// Returns `None` when `text` is not a command at all, otherwise the actions to perform
    /// (possibly just a feedback message).
    pub fn dispatch(&self, text: &str, ctx: &CommandContext) -> Option<Vec<Outbound>> {
        let body = text.strip_prefix(COMMAND_PREFIX)?;
        let parts: Vec<&str> = body.split_whitespace().collect();
        let Some((first, args)) = parts.split_first() else {
            return Some(vec![Outbound::Mesh(bridge_message("Empty command. Try !help."))]);
        };
        let command = first.to_lowercase();

        let Some(descriptor) = self.table.get(&command) else {
            info!(
                "Unknown command: !{} ({})",
                escape_log(&command),
                escape_log(&ctx.sender_label)
            );
            metrics::inc_commands_rejected();
            return Some(vec![Outbound::Mesh(bridge_message(
                "Unknown command. Try !help.",
            ))]);
        };

        let mode = self.state.mode();
        if is_blocked(descriptor.name, mode) {
            info!(
                "Blocked command: !{} in {} ({})",
                descriptor.name,
                mode,
                escape_log(&ctx.sender_label)
            );
            metrics::inc_commands_rejected();
            return Some(vec![Outbound::Mesh(bridge_message(&format!(
                "!{} is not available in {}.",
                descriptor.name, mode
            )))]);
        }

        info!(
            "Executing mesh command: !{} ({})",
            descriptor.name,
            escape_log(&ctx.sender_label)
        );
        metrics::inc_commands_executed();
        let invocation = Invocation {
            args,
            ctx,
            state: &self.state,
            table: &self.table,
        };
        Some((descriptor.handler)(&invocation))
    }
}

fn mesh(text: &str) -> Vec<Outbound> {
    vec![Outbound::Mesh(bridge_message(text))]
}

fn hop_text(hops: Option<u32>) -> String {
    match hops {
        None => "? hops".to_string(),
        Some(1) => "1 hop".to_string(),
        Some(n) => format!("{} hops", n),
    }
}

fn cmd_test(inv: &Invocation<'_>) -> Vec<Outbound> {
    mesh(&hop_text(inv.ctx.hops))
}

fn cmd_on(inv: &Invocation<'_>) -> Vec<Outbound> {
    if !inv.state.enable() {
        return mesh("Relay already enabled. Use !off to disable.");
    }
    info!("Relay ENABLED ({})", escape_log(&inv.ctx.sender_label));
    mesh("Relay enabled. Use !off to disable.")
}

fn cmd_off(inv: &Invocation<'_>) -> Vec<Outbound> {
    if !inv.state.disable() {
        return mesh("Relay already disabled. Use !on to enable.");
    }
    info!("Relay DISABLED ({})", escape_log(&inv.ctx.sender_label));
    mesh("Relay disabled. Use !on to enable.")
}

fn cmd_mode(_inv: &Invocation<'_>) -> Vec<Outbound> {
    mesh("Use !mode1, !mode2, !mode3, or !help mode1/2/3")
}

fn switch_mode(inv: &Invocation<'_>, mode: RelayMode, announcement: &str) -> Vec<Outbound> {
    inv.state.set_mode(mode);
    info!("{} enabled ({})", mode, escape_log(&inv.ctx.sender_label));
    mesh(announcement)
}

fn cmd_mode1(inv: &Invocation<'_>) -> Vec<Outbound> {
    switch_mode(
        inv,
        RelayMode::Mode1,
        "MODE1 enabled. Relay all messages between Mesh and Signal. Default.",
    )
}

fn cmd_mode2(inv: &Invocation<'_>) -> Vec<Outbound> {
    switch_mode(
        inv,
        RelayMode::Mode2,
        "MODE2 enabled. Relay all Signal → Mesh. Mesh → Signal REQUIRES !relay [message].",
    )
}

fn cmd_mode3(inv: &Invocation<'_>) -> Vec<Outbound> {
    switch_mode(
        inv,
        RelayMode::Mode3,
        "MODE3 enabled. Mesh → Signal ONLY via !relay [message]. Signal → Mesh relay DISABLED.",
    )
}

fn cmd_status(inv: &Invocation<'_>) -> Vec<Outbound> {
    vec![Outbound::Mesh(status_message(inv.state.snapshot()))]
}

fn cmd_relay(inv: &Invocation<'_>) -> Vec<Outbound> {
    if inv.args.is_empty() {
        return mesh("Usage: !relay <message>");
    }
    let message = inv.args.join(" ");
    let label = inv.ctx.sender_label.clone();

    let mut out = Vec::with_capacity(2);
    if inv.state.mode() == RelayMode::Mode1 {
        out.extend(mesh("MODE1 enabled. !relay not needed in this mode."));
    }
    out.push(Outbound::Chat {
        text: relayed(&label, &message),
        label,
    });
    out
}

fn cmd_help(inv: &Invocation<'_>) -> Vec<Outbound> {
    let mode = inv.state.mode();

    if let Some(first) = inv.args.first() {
        let cmd = first.trim_start_matches(COMMAND_PREFIX).to_lowercase();
        let Some(descriptor) = inv.table.get(&cmd) else {
            info!(
                "Mesh !help for unknown command: !{} ({})",
                escape_log(&cmd),
                escape_log(&inv.ctx.sender_label)
            );
            return mesh("Unknown command. Try !help.");
        };
        if is_blocked(descriptor.name, mode) {
            return mesh(&format!("!{} is not available in {}.", descriptor.name, mode));
        }
        info!(
            "Mesh !help for command: !{} ({})",
            descriptor.name,
            escape_log(&inv.ctx.sender_label)
        );
        return mesh(descriptor.help);
    }

    let list = inv
        .table
        .available(mode)
        .filter(|c| c.name != "help")
        .map(|c| format!("{}{}", COMMAND_PREFIX, c.name))
        .collect::<Vec<_>>()
        .join(", ");
    mesh(&format!("Try {}, or !help [command]", list))
}
