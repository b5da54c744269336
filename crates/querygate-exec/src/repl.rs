//! Interactive REPL for querygate.
//!
//! Launch with `querygate repl` to enter interactive mode.
//! Lines starting with `/` are commands; anything else runs as a query against
//! the selected target. Type `/help` for available commands, Tab for completion.

use std::sync::Arc;

use rustyline::completion::{Completer, Pair};
use rustyline::config::CompletionType;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{
    Cmd, ConditionalEventHandler, Config, Editor, Event, EventContext, EventHandler, Helper,
    KeyEvent, RepeatCount,
};
use tokio::runtime::Handle;

use querygate::OperationKind;

use crate::dispatcher::QueryExecutor;
use crate::registry::FileTargetRegistry;
use crate::types::ExecutionResult;

/// Available REPL commands.
const COMMANDS: &[(&str, &str)] = &[
    ("/target", "Select the target queries run against"),
    ("/targets", "List registered targets"),
    ("/inspect", "Show what a query would run, without connecting"),
    ("/probe", "Connect to the selected target and list collections"),
    ("/close", "Close the selected target's connection"),
    ("/clear", "Clear the screen"),
    ("/help", "Show available commands"),
    ("/exit", "Quit the REPL"),
];

/// REPL helper for tab completion.
struct QueryHelper {
    target_ids: Vec<String>,
}

impl QueryHelper {
    fn complete_method(&self, input: &str) -> Option<(usize, Vec<Pair>)> {
        if !input.starts_with("db.") {
            return None;
        }
        let dot = input.rfind('.')?;
        let prefix = &input[dot + 1..];
        if dot < 3
            || input[..dot].contains('(')
            || prefix.contains(|c: char| !c.is_ascii_alphanumeric())
        {
            return None;
        }
        let matches = OperationKind::collection_methods()
            .iter()
            .map(|kind| kind.as_str())
            .filter(|name| name.starts_with(prefix))
            .map(|name| Pair {
                display: name.to_string(),
                replacement: format!("{name}("),
            })
            .collect();
        Some((dot + 1, matches))
    }
}

impl Completer for QueryHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let input = &line[..pos];

        if input.starts_with('/') && !input.contains(' ') {
            let matches: Vec<Pair> = COMMANDS
                .iter()
                .filter(|(cmd, _)| cmd.starts_with(input))
                .map(|(cmd, desc)| Pair {
                    display: format!("{cmd:<16} {desc}"),
                    replacement: format!("{cmd} "),
                })
                .collect();
            return Ok((0, matches));
        }

        if let Some(args) = input.strip_prefix("/target ") {
            let prefix_start = input.len() - args.len();
            let matches: Vec<Pair> = self
                .target_ids
                .iter()
                .filter(|id| id.starts_with(args.trim()))
                .map(|id| Pair {
                    display: id.clone(),
                    replacement: format!("{id} "),
                })
                .collect();
            return Ok((prefix_start, matches));
        }

        if let Some(found) = self.complete_method(input) {
            return Ok(found);
        }

        Ok((pos, Vec::new()))
    }
}

impl Hinter for QueryHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> Option<String> {
        if pos < line.len() || line.is_empty() {
            return None;
        }
        if line.starts_with('/') && !line.contains(' ') {
            for (cmd, _) in COMMANDS {
                if cmd.starts_with(line) && *cmd != line {
                    return Some(cmd[line.len()..].to_string());
                }
            }
        }
        None
    }
}

impl Highlighter for QueryHelper {}
impl Validator for QueryHelper {}
impl Helper for QueryHelper {}

struct TabCompleteOrAcceptHint;

impl ConditionalEventHandler for TabCompleteOrAcceptHint {
    fn handle(
        &self,
        _evt: &Event,
        _n: RepeatCount,
        _positive: bool,
        ctx: &EventContext<'_>,
    ) -> Option<Cmd> {
        if ctx.has_hint() {
            Some(Cmd::CompleteHint)
        } else {
            Some(Cmd::Complete)
        }
    }
}

/// Session state.
struct ReplState {
    runtime: Handle,
    executor: Arc<QueryExecutor>,
    registry: Arc<FileTargetRegistry>,
    target: Option<String>,
}

/// Run the interactive REPL.
///
/// Blocks the calling thread; async work is driven on `runtime`, so call this
/// from a blocking task rather than from inside the runtime.
pub fn run(
    runtime: Handle,
    executor: Arc<QueryExecutor>,
    registry: Arc<FileTargetRegistry>,
    target: Option<String>,
) -> anyhow::Result<()> {
    eprintln!();
    eprintln!(
        "  \x1b[32m\u{25c9}\x1b[0m \x1b[1mquerygate v{}\x1b[0m \x1b[90m- shell queries, one reviewed path\x1b[0m",
        env!("CARGO_PKG_VERSION")
    );
    eprintln!();
    eprintln!(
        "    Type a query like \x1b[36mdb.users.find()\x1b[0m, \x1b[36m/\x1b[0m for commands, \x1b[90mTab\x1b[0m to complete, \x1b[90m/exit\x1b[0m to quit."
    );
    eprintln!();

    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .completion_type(CompletionType::List)
        .completion_prompt_limit(20)
        .build();

    let mut rl: Editor<QueryHelper, rustyline::history::DefaultHistory> =
        Editor::with_config(config)?;
    rl.set_helper(Some(QueryHelper {
        target_ids: registry.ids(),
    }));
    rl.bind_sequence(
        KeyEvent::from('\t'),
        EventHandler::Conditional(Box::new(TabCompleteOrAcceptHint)),
    );

    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    let hist_path = std::path::PathBuf::from(&home).join(".querygate_history");
    if hist_path.exists() {
        let _ = rl.load_history(&hist_path);
    }

    let mut state = ReplState {
        runtime,
        executor,
        registry,
        target: None,
    };
    if let Some(id) = target {
        cmd_target(&id, &mut state);
    }

    loop {
        let prompt = match &state.target {
            Some(id) => format!(" \x1b[36m{id}>\x1b[0m "),
            None => " \x1b[36mquerygate>\x1b[0m ".to_string(),
        };
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let Some(input) = line.strip_prefix('/') else {
                    cmd_query(line, &state);
                    continue;
                };
                if input.is_empty() {
                    cmd_help();
                    continue;
                }

                let mut parts = input.splitn(2, ' ');
                let cmd = parts.next().unwrap_or("");
                let args = parts.next().unwrap_or("").trim();

                match cmd {
                    "exit" | "quit" => {
                        eprintln!("  \x1b[90m\u{2728}\x1b[0m Goodbye!");
                        break;
                    }
                    "help" | "h" | "?" => cmd_help(),
                    "clear" | "cls" => eprint!("\x1b[2J\x1b[H"),
                    "target" | "use" => cmd_target(args, &mut state),
                    "targets" => cmd_targets(&state),
                    "inspect" => cmd_inspect(args, &state),
                    "probe" => cmd_probe(&state),
                    "close" => cmd_close(&state),
                    _ => {
                        eprintln!("  Unknown command '/{cmd}'. Type /help for commands.");
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                eprintln!("  \x1b[90m(Ctrl+C)\x1b[0m Type \x1b[1m/exit\x1b[0m to quit.");
            }
            Err(ReadlineError::Eof) => {
                eprintln!("  \x1b[90m\u{2728}\x1b[0m Goodbye!");
                break;
            }
            Err(err) => {
                eprintln!("  Error: {err}");
                break;
            }
        }
    }

    let _ = std::fs::create_dir_all(hist_path.parent().unwrap_or(std::path::Path::new(".")));
    let _ = rl.save_history(&hist_path);

    Ok(())
}

fn cmd_help() {
    eprintln!();
    eprintln!("  Commands:");
    eprintln!();
    for (cmd, desc) in COMMANDS {
        eprintln!("    {cmd:<18} {desc}");
    }
    eprintln!();
    eprintln!("  Anything not starting with '/' runs as a query on the selected target.");
    eprintln!("  Tip: Tab completion works for commands, target ids and collection methods.");
    eprintln!();
}

fn cmd_target(args: &str, state: &mut ReplState) {
    let id = args.split_whitespace().next().unwrap_or("");
    if id.is_empty() {
        match &state.target {
            Some(current) => eprintln!("  Current target: {current}"),
            None => eprintln!("  Usage: /target <id>"),
        }
        return;
    }
    match state.registry.iter().find(|(known, _)| *known == id) {
        Some((_, target)) => {
            eprintln!(
                "  Target: {id} ({} / {}){}",
                target.redacted_address(),
                target.default_namespace,
                if target.active { "" } else { " [inactive]" }
            );
            state.target = Some(id.to_string());
        }
        None => eprintln!("  Unknown target '{id}'. Type /targets to list them."),
    }
}

fn cmd_targets(state: &ReplState) {
    eprintln!();
    if state.registry.is_empty() {
        eprintln!("  No targets registered.");
    }
    for (id, target) in state.registry.iter() {
        let marker = if state.target.as_deref() == Some(id) { "*" } else { " " };
        eprintln!(
            "  {marker} {id:<24} {:<40} {}",
            target.redacted_address(),
            target.default_namespace
        );
    }
    eprintln!();
}

fn cmd_inspect(args: &str, state: &ReplState) {
    if args.is_empty() {
        eprintln!("  Usage: /inspect <query>");
        return;
    }
    match state.executor.inspect(args) {
        Ok(preview) => match serde_json::to_string_pretty(&preview) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("  Error: {e}"),
        },
        Err(e) => eprintln!("  Rejected: {e}"),
    }
}

fn cmd_query(query: &str, state: &ReplState) {
    let Some(target) = &state.target else {
        eprintln!("  No target selected. Use /target <id> first.");
        return;
    };
    let result = state
        .runtime
        .block_on(state.executor.execute(target, query));
    match &result {
        ExecutionResult::Success {
            data,
            elapsed_millis,
            row_count,
        } => {
            match serde_json::to_string_pretty(data) {
                Ok(json) => println!("{json}"),
                Err(e) => eprintln!("  Error: {e}"),
            }
            eprintln!("  \x1b[90m{row_count} row(s) in {elapsed_millis} ms\x1b[0m");
        }
        ExecutionResult::Failure {
            error_kind,
            message,
        } => {
            eprintln!("  \x1b[31m{error_kind}\x1b[0m: {message}");
        }
    }
}

fn cmd_probe(state: &ReplState) {
    let Some(target) = &state.target else {
        eprintln!("  No target selected. Use /target <id> first.");
        return;
    };
    match state.runtime.block_on(state.executor.probe_target(target)) {
        Ok(names) => {
            eprintln!();
            eprintln!("  {} collection(s) on '{target}':", names.len());
            for name in names {
                eprintln!("    {name}");
            }
            eprintln!();
        }
        Err(e) => eprintln!("  Probe failed: {e}"),
    }
}

fn cmd_close(state: &ReplState) {
    let Some(target) = &state.target else {
        eprintln!("  No target selected.");
        return;
    };
    if state.runtime.block_on(state.executor.close_connection(target)) {
        eprintln!("  Closed connection to '{target}'.");
    } else {
        eprintln!("  No open connection to '{target}'.");
    }
}
