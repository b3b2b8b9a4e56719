//! Command execution.

use crate::Commands;
use colored::Colorize;
use std::path::Path;
use stepflow_core::{Definition, DefinitionRequest, Instance, WorkflowEngine, STARTED};

/// Executes a command and returns the formatted output.
pub fn execute(
    engine: &WorkflowEngine,
    cmd: Commands,
) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Repl => Ok(String::new()),

        Commands::Validate { file } => {
            let request = load_definition_file(&file)?;
            let definition = engine
                .validator()
                .validate(request)
                .map_err(|v| format!("{} check failed: {}", v.rule(), v))?;
            Ok(format!(
                "{} definition {} ({} states, {} transitions, checksum: {})",
                "Valid".green(),
                definition.id.cyan(),
                definition.states.len(),
                definition.transitions.len(),
                definition.checksum
            ))
        }

        Commands::Define { file } => {
            let request = load_definition_file(&file)?;
            let existed = engine.get_definition(&request.id).is_ok();
            let definition = engine.create_definition(request)?;
            Ok(format!(
                "{} definition {} (checksum: {})",
                if existed {
                    "Already exists".yellow()
                } else {
                    "Created".green()
                },
                definition.id.cyan(),
                definition.checksum
            ))
        }

        Commands::Definitions => {
            let definitions = engine.list_definitions()?;
            if definitions.is_empty() {
                return Ok("No definitions stored".yellow().to_string());
            }

            let mut output = String::new();
            for def in &definitions {
                output.push_str(&format!(
                    "  {} [states: {}, transitions: {}, checksum: {}]\n",
                    def.id.cyan(),
                    def.states.len(),
                    def.transitions.len(),
                    def.checksum
                ));
            }
            Ok(output.trim_end().to_string())
        }

        Commands::Definition { id } => {
            let definition = engine.get_definition(&id)?;
            Ok(format_definition(&definition))
        }

        Commands::Start { definition } => {
            let instance = engine.start_instance(&definition)?;
            Ok(format!(
                "{} instance {}\n  Definition: {}\n  State: {}",
                "Started".green(),
                instance.id.cyan(),
                instance.definition_id,
                instance.current_state.yellow()
            ))
        }

        Commands::Fire {
            instance,
            transition,
        } => {
            let updated = engine.execute(&instance, &transition)?;
            let from = updated
                .last_record()
                .and_then(|r| r.from.as_deref())
                .unwrap_or("?");
            Ok(format!(
                "{} {} on {}\n  {} → {}\n  Version: {}",
                "Fired".green(),
                transition.cyan(),
                instance,
                from,
                updated.current_state.yellow(),
                updated.version
            ))
        }

        Commands::Status { instance } => {
            let status = engine.get_instance_status(&instance)?;
            let available = engine.available_transitions(&instance)?;
            Ok(format_instance(&status, &available))
        }
    }
}

/// Reads a definition from a JSON or YAML file, chosen by extension.
pub fn load_definition_file(path: &Path) -> Result<DefinitionRequest, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read '{}': {}", path.display(), e))?;
    parse_definition(&content, is_yaml(path))
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
        .unwrap_or(false)
}

/// Parses definition text. Both formats go through the same JSON model.
pub fn parse_definition(
    content: &str,
    yaml: bool,
) -> Result<DefinitionRequest, Box<dyn std::error::Error>> {
    let value: serde_json::Value = if yaml {
        serde_yaml::from_str(content)?
    } else {
        serde_json::from_str(content)?
    };
    Ok(DefinitionRequest::from_json(&value)?)
}

fn format_definition(def: &Definition) -> String {
    let mut output = format!(
        "{}\n  Checksum: {}\n  Created: {}\n  States:\n",
        format!("Definition {}", def.id.cyan()).bold(),
        def.checksum,
        def.created_at.to_rfc3339()
    );

    for state in &def.states {
        let mut tags = Vec::new();
        if state.is_initial {
            tags.push("initial");
        }
        if state.is_final {
            tags.push("final");
        }
        if !state.enabled {
            tags.push("disabled");
        }
        let tags = if tags.is_empty() {
            String::new()
        } else {
            format!(" ({})", tags.join(", "))
        };
        output.push_str(&format!("    {}{}\n", state.id.yellow(), tags.dimmed()));
    }

    output.push_str("  Transitions:\n");
    for t in &def.transitions {
        output.push_str(&format!(
            "    {}: {} → {}{}\n",
            t.id.cyan(),
            t.from.join(", "),
            t.to,
            (if t.enabled { "" } else { " (disabled)" }).dimmed()
        ));
    }

    output.trim_end().to_string()
}

fn format_instance(instance: &Instance, available: &[String]) -> String {
    let mut output = format!(
        "{}\n  Definition: {}\n  State: {}\n  Version: {}\n  History:\n",
        format!("Instance {}", instance.id.cyan()).bold(),
        instance.definition_id,
        instance.current_state.yellow(),
        instance.version
    );

    for record in &instance.history {
        let step = if record.transition == STARTED {
            format!("{} → {}", STARTED.dimmed(), record.to)
        } else {
            format!(
                "{}: {} → {}",
                record.transition.cyan(),
                record.from.as_deref().unwrap_or("?"),
                record.to
            )
        };
        output.push_str(&format!(
            "    [{}] {}\n",
            record.at.format("%Y-%m-%d %H:%M:%S"),
            step
        ));
    }

    if available.is_empty() {
        output.push_str(&format!("  Available: {}", "none".dimmed()));
    } else {
        output.push_str(&format!("  Available: {}", available.join(", ")));
    }
    output
}
