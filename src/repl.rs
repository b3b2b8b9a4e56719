//! Interactive REPL.

use crate::commands;
use crate::Commands;
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use std::path::PathBuf;
use stepflow_core::WorkflowEngine;

const HELP_TEXT: &str = r#"
Available commands:
  help                            Show this help

  validate <file>                 Validate a definition file
  define <file>                   Validate and store a definition
  definitions                     List stored definitions
  definition <id>                 Show a definition

  start <definition>              Start an instance
  fire <instance> <transition>    Fire a transition
  status <instance>               Show an instance

  quit, exit                      Exit the REPL
"#;

pub fn run(engine: &WorkflowEngine) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "stepflow".bold().cyan());

    // Create readline editor
    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    // Load history
    let history_path = std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(".stepflow_history"))
        .unwrap_or_else(|_| ".stepflow_history".into());
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    loop {
        let prompt = format!("{} ", "stepflow>".cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match execute_repl_command(engine, line) {
                    Ok(Some(output)) => println!("{}\n", output),
                    Ok(None) => break, // Exit command
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    // Save history
    let _ = rl.save_history(&history_path);

    Ok(())
}

/// Outcome of parsing one REPL line.
#[derive(Debug, PartialEq)]
enum Line {
    Help,
    Quit,
    Usage(&'static str),
    Unknown(String),
    Command(Commands),
}

fn parse_line(line: &str) -> Line {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some((first, args)) = parts.split_first() else {
        return Line::Help;
    };
    let cmd = first.to_lowercase();

    match cmd.as_str() {
        "help" | "?" => Line::Help,

        "quit" | "exit" | "q" => Line::Quit,

        "validate" | "v" => match args {
            [file] => Line::Command(Commands::Validate {
                file: PathBuf::from(file),
            }),
            _ => Line::Usage("Usage: validate <file>"),
        },

        "define" | "def" => match args {
            [file] => Line::Command(Commands::Define {
                file: PathBuf::from(file),
            }),
            _ => Line::Usage("Usage: define <file>"),
        },

        "definitions" | "ls" => Line::Command(Commands::Definitions),

        "definition" | "show" => match args {
            [id] => Line::Command(Commands::Definition { id: id.to_string() }),
            _ => Line::Usage("Usage: definition <id>"),
        },

        "start" | "s" => match args {
            [definition] => Line::Command(Commands::Start {
                definition: definition.to_string(),
            }),
            _ => Line::Usage("Usage: start <definition>"),
        },

        "fire" | "f" => match args {
            [instance, transition] => Line::Command(Commands::Fire {
                instance: instance.to_string(),
                transition: transition.to_string(),
            }),
            _ => Line::Usage("Usage: fire <instance> <transition>"),
        },

        "status" | "get" | "g" => match args {
            [instance] => Line::Command(Commands::Status {
                instance: instance.to_string(),
            }),
            _ => Line::Usage("Usage: status <instance>"),
        },

        _ => Line::Unknown(cmd),
    }
}

fn execute_repl_command(
    engine: &WorkflowEngine,
    line: &str,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    match parse_line(line) {
        Line::Help => Ok(Some(HELP_TEXT.to_string())),
        Line::Quit => Ok(None),
        Line::Usage(usage) => Ok(Some(usage.to_string())),
        Line::Unknown(cmd) => Ok(Some(format!(
            "Unknown command: {}. Type 'help' for help.",
            cmd
        ))),
        Line::Command(cmd) => commands::execute(engine, cmd).map(Some),
    }
}
