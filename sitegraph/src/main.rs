use clap::ArgMatches;
use colored::Colorize;
use sitegraph::commands::command_argument_builder;
use sitegraph::handlers::*;
use sitegraph_core::print_banner;

#[tokio::main]
async fn main() {
    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let quiet = chosen_command.get_flag("quiet");

    // Show banner unless --quiet flag is set
    if !quiet {
        print_banner();
    }

    if chosen_command.subcommand().is_none() {
        // No subcommand provided, just show the banner
        return;
    }

    if let Err(e) = run(&chosen_command).await {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(matches: &ArgMatches) -> anyhow::Result<()> {
    init_tracing("info", matches.get_flag("verbose"));

    let settings = load_settings(matches)?;

    match matches.subcommand() {
        Some(("init", primary_command)) => handle_init(primary_command),
        Some(("record", primary_command)) => match primary_command.subcommand() {
            Some(("add", secondary_command)) => handle_record_add(secondary_command, &settings),
            Some(("import", secondary_command)) => {
                handle_record_import(secondary_command, &settings)
            }
            Some(("update", secondary_command)) => {
                handle_record_update(secondary_command, &settings)
            }
            Some(("delete", secondary_command)) => {
                handle_record_delete(secondary_command, &settings)
            }
            Some(("activate", secondary_command)) => {
                handle_record_set_active(secondary_command, &settings, true)
            }
            Some(("deactivate", secondary_command)) => {
                handle_record_set_active(secondary_command, &settings, false)
            }
            Some(("list", secondary_command)) => handle_record_list(secondary_command, &settings),
            _ => unreachable!("clap should ensure we don't get here"),
        },
        Some(("crawl", primary_command)) => handle_crawl(primary_command, &settings).await,
        Some(("run", primary_command)) => handle_run(primary_command, &settings).await,
        Some(("graph", primary_command)) => handle_graph(primary_command, &settings),
        Some(("executions", primary_command)) => handle_executions(primary_command, &settings),
        Some(("serve", _)) => handle_serve(&settings).await,
        _ => unreachable!("clap should ensure we don't get here"),
    }
}
