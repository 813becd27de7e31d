use anyhow::{bail, Context as _, Result};
use clap::ArgMatches;
use colored::Colorize;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::core::context::Context;
use crate::core::environment::{
    CloneOptions, Environment, EnvironmentOptions, EnvironmentPatch, EnvironmentRegistry,
    ProgramSpec,
};
use crate::ui::format_time;

pub fn handle_env(ctx: Arc<Context>, matches: &ArgMatches) -> Result<()> {
    let registry = EnvironmentRegistry::new(&ctx);

    match matches.subcommand() {
        Some(("list", sub)) => list(&registry, sub),
        Some(("create", sub)) => create(&registry, sub),
        Some(("show", sub)) => show(&registry, sub),
        Some(("update", sub)) => update(&registry, sub),
        Some(("delete", sub)) => delete(&registry, sub),
        Some(("use", sub)) => switch(&registry, sub),
        Some(("current", _)) => {
            println!("{}", registry.get_current());
            Ok(())
        }
        Some(("clone", sub)) => clone(&registry, sub),
        Some(("export", sub)) => export(&registry, sub),
        Some(("import", sub)) => import(&registry, sub),
        _ => {
            println!("Use 'valmon env --help' for more information.");
            Ok(())
        }
    }
}

fn name_arg(matches: &ArgMatches) -> Result<&str> {
    matches
        .get_one::<String>("name")
        .map(String::as_str)
        .context("Environment name is required")
}

fn strings(matches: &ArgMatches, id: &str) -> Vec<String> {
    matches
        .get_many::<String>(id)
        .map(|values| values.cloned().collect())
        .unwrap_or_default()
}

/// `--flag` given at least once, as a replacement list
fn replaced(matches: &ArgMatches, id: &str) -> Option<Vec<String>> {
    matches.get_many::<String>(id).map(|values| values.cloned().collect())
}

fn parse_program(value: &str) -> Result<ProgramSpec> {
    match value.split_once(':') {
        Some((address, path)) if !address.is_empty() && !path.is_empty() => Ok(ProgramSpec {
            address: address.to_string(),
            path: PathBuf::from(path),
        }),
        _ => bail!("Invalid program '{}', expected ADDRESS:PATH", value),
    }
}

fn programs(matches: &ArgMatches) -> Result<Option<Vec<ProgramSpec>>> {
    matches
        .get_many::<String>("program")
        .map(|values| values.map(|v| parse_program(v)).collect::<Result<Vec<_>>>())
        .transpose()
}

fn list(registry: &EnvironmentRegistry, matches: &ArgMatches) -> Result<()> {
    let environments = registry.list()?;

    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&environments)?);
        return Ok(());
    }

    if environments.is_empty() {
        println!("{}", "No environments defined.".yellow());
        println!("Create one with: valmon env create <NAME>");
        return Ok(());
    }

    let current = registry.get_current();
    println!(
        "{}",
        format!("{:<3}{:<20} {:>6}  {}", "", "NAME", "PORT", "DESCRIPTION").bold()
    );
    for summary in &environments {
        let env = &summary.environment;
        let marker = if summary.running {
            "●".green().bold()
        } else if env.name == current {
            "*".cyan().bold()
        } else {
            " ".normal()
        };
        let name = if env.name == current {
            format!("{:<20}", env.name).cyan().bold()
        } else {
            format!("{:<20}", env.name).normal()
        };
        println!(
            "{:<3}{} {:>6}  {}",
            marker,
            name,
            env.port,
            env.description.dimmed()
        );
    }
    println!();
    println!("{}", "* current   ● running".dimmed());
    Ok(())
}

fn create(registry: &EnvironmentRegistry, matches: &ArgMatches) -> Result<()> {
    let name = name_arg(matches)?;
    let opts = EnvironmentOptions {
        port: matches.get_one::<u16>("port").copied(),
        reset: matches.get_flag("reset"),
        clone_accounts: strings(matches, "clone"),
        accounts_dir: matches.get_one::<String>("accounts-dir").map(PathBuf::from),
        description: matches.get_one::<String>("description").cloned(),
        custom_flags: strings(matches, "flag"),
        programs: programs(matches)?.unwrap_or_default(),
        setup_scripts: strings(matches, "setup"),
        teardown_scripts: strings(matches, "teardown"),
    };

    let env = registry.create(name, opts)?;
    println!(
        "{} {} (port {})",
        "✓ Created environment".green(),
        env.name.cyan().bold(),
        env.port
    );
    Ok(())
}

fn print_environment(env: &Environment, current: bool) {
    let title = if current {
        format!("{} (current)", env.name)
    } else {
        env.name.clone()
    };
    println!("{}", title.cyan().bold());
    if !env.description.is_empty() {
        println!("  {}", env.description.dimmed());
    }
    println!("  {} {}", "Port:".dimmed(), env.port);
    println!("  {} {}", "Reset on start:".dimmed(), env.reset);
    println!("  {} {}", "Created:".dimmed(), format_time(env.created));
    if let Some(updated) = env.updated {
        println!("  {} {}", "Updated:".dimmed(), format_time(updated));
    }
    if let Some(dir) = &env.accounts_dir {
        println!("  {} {}", "Accounts dir:".dimmed(), dir.display());
    }

    let sections: [(&str, Vec<String>); 4] = [
        ("Cloned accounts:", env.clone_accounts.clone()),
        ("Extra flags:", env.custom_flags.clone()),
        ("Setup scripts:", env.setup_scripts.clone()),
        ("Teardown scripts:", env.teardown_scripts.clone()),
    ];
    for (label, items) in sections.iter().filter(|(_, items)| !items.is_empty()) {
        println!("  {}", label.dimmed());
        for item in items {
            println!("    - {}", item);
        }
    }

    if !env.programs.is_empty() {
        println!("  {}", "Programs:".dimmed());
        for program in &env.programs {
            println!("    - {} {}", program.address, program.path.display());
        }
    }
}

fn show(registry: &EnvironmentRegistry, matches: &ArgMatches) -> Result<()> {
    let name = match matches.get_one::<String>("name") {
        Some(name) => name.clone(),
        None => registry.get_current(),
    };
    let env = registry.require(&name)?;

    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&env)?);
        return Ok(());
    }

    print_environment(&env, registry.get_current() == env.name);
    Ok(())
}

fn update(registry: &EnvironmentRegistry, matches: &ArgMatches) -> Result<()> {
    let name = name_arg(matches)?;
    let reset = if matches.get_flag("reset") {
        Some(true)
    } else if matches.get_flag("no-reset") {
        Some(false)
    } else {
        None
    };
    let accounts_dir = if matches.get_flag("no-accounts-dir") {
        Some(None)
    } else {
        matches
            .get_one::<String>("accounts-dir")
            .map(|dir| Some(PathBuf::from(dir)))
    };

    let patch = EnvironmentPatch {
        port: matches.get_one::<u16>("port").copied(),
        reset,
        clone_accounts: replaced(matches, "clone"),
        accounts_dir,
        description: matches.get_one::<String>("description").cloned(),
        custom_flags: replaced(matches, "flag"),
        programs: programs(matches)?,
        setup_scripts: replaced(matches, "setup"),
        teardown_scripts: replaced(matches, "teardown"),
    };

    let env = registry.update(name, patch)?;
    println!("{} {}", "✓ Updated environment".green(), env.name.cyan().bold());
    Ok(())
}

fn delete(registry: &EnvironmentRegistry, matches: &ArgMatches) -> Result<()> {
    let name = name_arg(matches)?;
    registry.delete(name)?;
    println!("{} {}", "✓ Deleted environment".green(), name.cyan());
    Ok(())
}

fn switch(registry: &EnvironmentRegistry, matches: &ArgMatches) -> Result<()> {
    let name = name_arg(matches)?;
    registry.switch_current(name)?;
    println!("{} {}", "✓ Current environment:".green(), name.cyan().bold());
    Ok(())
}

fn clone(registry: &EnvironmentRegistry, matches: &ArgMatches) -> Result<()> {
    let source = matches
        .get_one::<String>("source")
        .context("Source environment is required")?;
    let target = matches
        .get_one::<String>("target")
        .context("Target environment is required")?;

    let opts = CloneOptions {
        port: matches.get_one::<u16>("port").copied(),
        description: matches.get_one::<String>("description").cloned(),
    };

    let env = registry.clone_environment(source, target, opts)?;
    println!(
        "{} {} {} {} (port {})",
        "✓ Cloned".green(),
        source.cyan(),
        "into".green(),
        env.name.cyan().bold(),
        env.port
    );
    Ok(())
}

fn export(registry: &EnvironmentRegistry, matches: &ArgMatches) -> Result<()> {
    let name = name_arg(matches)?;
    let text = registry.export(name)?;

    match matches.get_one::<String>("output") {
        Some(output) => {
            fs::write(output, text)
                .with_context(|| format!("Failed to write export to {}", output))?;
            println!("{} {}", "✓ Exported to".green(), output);
        }
        None => println!("{}", text),
    }
    Ok(())
}

fn import(registry: &EnvironmentRegistry, matches: &ArgMatches) -> Result<()> {
    let file = matches
        .get_one::<String>("file")
        .context("Import file is required")?;
    let text =
        fs::read_to_string(file).with_context(|| format!("Failed to read {}", file))?;

    let env = registry.import(&text, matches.get_one::<String>("name").map(String::as_str))?;
    println!(
        "{} {} (port {})",
        "✓ Imported environment".green(),
        env.name.cyan().bold(),
        env.port
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_program() {
        let spec = parse_program("Prog1111:/tmp/prog.so").unwrap();
        assert_eq!(spec.address, "Prog1111");
        assert_eq!(spec.path, PathBuf::from("/tmp/prog.so"));

        assert!(parse_program("no-separator").is_err());
        assert!(parse_program(":/tmp/prog.so").is_err());
        assert!(parse_program("Prog1111:").is_err());
    }
}
