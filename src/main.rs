use anyhow::Result;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;

use valmon::commands::{config, env, metrics, monitor, validator};
use valmon::core::context::{Context, Paths};

fn port_arg(help: &'static str) -> Arg {
    Arg::new("port")
        .short('p')
        .long("port")
        .value_name("PORT")
        .help(help)
        .value_parser(clap::value_parser!(u16))
}

fn json_arg() -> Arg {
    Arg::new("json")
        .long("json")
        .help("Print as JSON")
        .action(ArgAction::SetTrue)
}

fn name_arg(help: &'static str) -> Arg {
    Arg::new("name").help(help).required(true).index(1)
}

fn repeated(id: &'static str, long: &'static str, value_name: &'static str, help: &'static str) -> Arg {
    Arg::new(id)
        .long(long)
        .value_name(value_name)
        .help(help)
        .action(ArgAction::Append)
}

/// Options shared by `env create` and `env update`
fn environment_args(cmd: Command) -> Command {
    cmd.arg(port_arg("RPC port"))
        .arg(
            Arg::new("reset")
                .long("reset")
                .help("Reset the ledger on every start")
                .action(ArgAction::SetTrue),
        )
        .arg(repeated("clone", "clone", "ADDRESS", "Account to clone from the clone URL (repeatable)"))
        .arg(
            Arg::new("accounts-dir")
                .long("accounts-dir")
                .value_name("DIR")
                .help("Directory of account files to preload"),
        )
        .arg(
            Arg::new("description")
                .short('d')
                .long("description")
                .value_name("TEXT")
                .help("Free-form description"),
        )
        .arg(repeated("flag", "flag", "FLAG", "Extra validator flag (repeatable)").allow_hyphen_values(true))
        .arg(repeated("program", "program", "ADDRESS:PATH", "Program to deploy at genesis (repeatable)"))
        .arg(repeated("setup", "setup", "COMMAND", "Command to run after start (repeatable)"))
        .arg(repeated("teardown", "teardown", "COMMAND", "Command to run before stop (repeatable)"))
}

fn start_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("env")
            .short('e')
            .long("env")
            .value_name("NAME")
            .help("Environment to start (defaults to the current one)"),
    )
    .arg(
        Arg::new("reset")
            .long("reset")
            .help("Clear the ledger before starting")
            .action(ArgAction::SetTrue),
    )
    .arg(
        Arg::new("hard")
            .long("hard")
            .help("With --reset, also clear accounts")
            .requires("reset")
            .action(ArgAction::SetTrue),
    )
    .arg(
        Arg::new("monitor")
            .short('m')
            .long("monitor")
            .help("Serve the monitoring WebSocket while running")
            .action(ArgAction::SetTrue),
    )
    .arg(port_arg("Monitoring port (defaults to the configured one)").requires("monitor"))
}

fn build_cli() -> Command {
    Command::new("valmon")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Local validator supervisor with real-time metrics")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("home")
                .long("home")
                .value_name("DIR")
                .help("State directory (defaults to $VALMON_HOME or <config dir>/valmon)")
                .global(true),
        )
        .subcommand(start_args(
            Command::new("start").about("Start the validator in the foreground"),
        ))
        .subcommand(Command::new("stop").about("Stop the running validator"))
        .subcommand(start_args(
            Command::new("restart").about("Stop the running validator and start again"),
        ))
        .subcommand(
            Command::new("reset")
                .about("Clear the ledger of a stopped validator")
                .arg(
                    Arg::new("hard")
                        .long("hard")
                        .help("Also clear accounts")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("yes")
                        .short('y')
                        .long("yes")
                        .help("Skip the confirmation prompt")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("status")
                .about("Show whether the validator is running")
                .arg(json_arg()),
        )
        .subcommand(
            Command::new("env")
                .about("Manage environments (use 'valmon env --help' for subcommands)")
                .subcommand_required(true)
                .arg_required_else_help(true)
                .subcommand(Command::new("list").about("List environments").arg(json_arg()))
                .subcommand(environment_args(
                    Command::new("create")
                        .about("Create an environment")
                        .arg(name_arg("Environment name")),
                ))
                .subcommand(
                    Command::new("show")
                        .about("Show an environment (defaults to the current one)")
                        .arg(Arg::new("name").help("Environment name").index(1))
                        .arg(json_arg()),
                )
                .subcommand(environment_args(
                    Command::new("update")
                        .about("Update an environment; list options replace the stored lists")
                        .arg(name_arg("Environment name"))
                        .arg(
                            Arg::new("no-reset")
                                .long("no-reset")
                                .help("Stop resetting the ledger on start")
                                .conflicts_with("reset")
                                .action(ArgAction::SetTrue),
                        )
                        .arg(
                            Arg::new("no-accounts-dir")
                                .long("no-accounts-dir")
                                .help("Stop preloading an accounts directory")
                                .conflicts_with("accounts-dir")
                                .action(ArgAction::SetTrue),
                        ),
                ))
                .subcommand(
                    Command::new("delete")
                        .about("Delete an environment")
                        .arg(name_arg("Environment name")),
                )
                .subcommand(
                    Command::new("use")
                        .about("Set the current environment")
                        .arg(name_arg("Environment name")),
                )
                .subcommand(Command::new("current").about("Print the current environment"))
                .subcommand(
                    Command::new("clone")
                        .about("Copy an environment under a new name")
                        .arg(Arg::new("source").help("Source environment").required(true).index(1))
                        .arg(Arg::new("target").help("New environment name").required(true).index(2))
                        .arg(port_arg("RPC port (defaults to the source port + 100)"))
                        .arg(
                            Arg::new("description")
                                .short('d')
                                .long("description")
                                .value_name("TEXT")
                                .help("Description for the copy"),
                        ),
                )
                .subcommand(
                    Command::new("export")
                        .about("Export an environment as JSON")
                        .arg(name_arg("Environment name"))
                        .arg(
                            Arg::new("output")
                                .short('o')
                                .long("output")
                                .value_name("FILE")
                                .help("Write to a file instead of stdout"),
                        ),
                )
                .subcommand(
                    Command::new("import")
                        .about("Import an exported environment")
                        .arg(Arg::new("file").help("Exported JSON file").required(true).index(1))
                        .arg(
                            Arg::new("name")
                                .short('n')
                                .long("name")
                                .value_name("NAME")
                                .help("Store under this name instead"),
                        ),
                ),
        )
        .subcommand(
            Command::new("metrics")
                .about("Inspect collected metrics (use 'valmon metrics --help' for subcommands)")
                .subcommand_required(true)
                .arg_required_else_help(true)
                .subcommand(Command::new("show").about("Take and print a sample").arg(json_arg()))
                .subcommand(
                    Command::new("history")
                        .about("Print stored samples for a date range")
                        .arg(
                            Arg::new("from")
                                .long("from")
                                .value_name("YYYY-MM-DD")
                                .help("First UTC day (defaults to today)"),
                        )
                        .arg(
                            Arg::new("to")
                                .long("to")
                                .value_name("YYYY-MM-DD")
                                .help("Last UTC day (defaults to today)"),
                        )
                        .arg(json_arg()),
                )
                .subcommand(
                    Command::new("cleanup")
                        .about("Delete day files older than the retention period")
                        .arg(
                            Arg::new("days")
                                .long("days")
                                .value_name("DAYS")
                                .help("Retention in days (defaults to the configured one)")
                                .value_parser(clap::value_parser!(u32)),
                        ),
                ),
        )
        .subcommand(
            Command::new("monitor")
                .about("Run the monitoring service without starting a validator")
                .arg(port_arg("Port to listen on (defaults to the configured one)")),
        )
        .subcommand(
            Command::new("config")
                .about("Inspect the global configuration")
                .subcommand_required(true)
                .arg_required_else_help(true)
                .subcommand(Command::new("show").about("Print the effective configuration"))
                .subcommand(Command::new("path").about("Print the configuration file path")),
        )
}

async fn run(matches: ArgMatches) -> Result<()> {
    let root = match matches.get_one::<String>("home") {
        Some(home) => PathBuf::from(home),
        None => Paths::default_root()?,
    };
    let ctx = Context::load(root)?;

    match matches.subcommand() {
        Some(("start", sub_matches)) => validator::start(ctx, sub_matches).await,
        Some(("stop", _)) => validator::stop(ctx).await,
        Some(("restart", sub_matches)) => validator::restart(ctx, sub_matches).await,
        Some(("reset", sub_matches)) => validator::reset(ctx, sub_matches).await,
        Some(("status", sub_matches)) => validator::status(ctx, sub_matches),
        Some(("env", sub_matches)) => env::handle_env(ctx, sub_matches),
        Some(("metrics", sub_matches)) => metrics::handle_metrics(ctx, sub_matches).await,
        Some(("monitor", sub_matches)) => monitor::handle_monitor(ctx, sub_matches).await,
        Some(("config", sub_matches)) => config::handle_config(ctx, sub_matches),
        _ => {
            println!("Use 'valmon --help' for more information.");
            Ok(())
        }
    }
}

fn main() -> Result<()> {
    valmon::init_logging();

    let matches = build_cli().get_matches();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("valmon-worker")
        .build()?;

    runtime.block_on(run(matches))
}
