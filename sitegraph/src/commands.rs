use crate::CLAP_STYLING;
use clap::{arg, command};
use url::Url;

fn record_id_arg() -> clap::Arg {
    arg!(-i --"id" <RECORD_ID>)
        .required(true)
        .help("Id of the website record")
        .value_parser(clap::value_parser!(i64))
}

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("sitegraph")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("sitegraph")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress banner and non-essential output").required(false))
        .arg(
            arg!(-v --"verbose" "Log at debug level (RUST_LOG still wins)")
                .required(false)
                .global(true),
        )
        .arg(
            arg!(-c --"config" <PATH>)
                .required(false)
                .global(true)
                .help("Settings file (default: ~/.config/sitegraph/config.json)")
                .value_parser(clap::value_parser!(std::path::PathBuf)),
        )
        .arg(
            arg!(--"db" <PATH>)
                .required(false)
                .global(true)
                .help("Database file, overriding the settings file")
                .value_parser(clap::value_parser!(std::path::PathBuf)),
        )
        .arg(
            arg!(--"timeout" <SECONDS>)
                .required(false)
                .global(true)
                .help("Per-request timeout in seconds, overriding the settings file")
                .value_parser(clap::value_parser!(u64)),
        )
        .subcommand_required(false)
        .subcommand(
            command!("init")
                .about("Initializes the sitegraph database and settings on your filesystem")
                .arg(
                    arg!([PATH])
                        .required(false)
                        .help("Directory to store the database and settings in")
                        .default_value("~/.config/sitegraph/"),
                )
                .arg(
                    arg!(-f --"force")
                        .help(
                            "Forces the overwriting of any existing database at the specified \
                        location.",
                        )
                        .required(false),
                ),
        )
        .subcommand(
            command!("record")
                .about("Manage website records (what to crawl, how often, and where to stop)")
                .subcommand_required(true)
                .subcommand(
                    command!("add")
                        .about("Adds a website record")
                        .arg(
                            arg!(-u --"url" <URL>)
                                .required(true)
                                .help("Start URL of the crawl"),
                        )
                        .arg(
                            arg!(-l --"label" <LABEL>)
                                .required(true)
                                .help("Human readable name of the record"),
                        )
                        .arg(
                            arg!(-r --"regex" <REGEX>)
                                .required(false)
                                .help("Boundary regex; links not matching it become leaves")
                                .default_value(".*"),
                        )
                        .arg(
                            arg!(-n --"interval" <SECONDS>)
                                .required(false)
                                .help("Seconds between crawls; 0 crawls once")
                                .value_parser(clap::value_parser!(u64))
                                .default_value("0"),
                        )
                        .arg(
                            arg!(-t --"tags" <TAGS>)
                                .required(false)
                                .help("Comma separated tags"),
                        )
                        .arg(
                            arg!(--"inactive")
                                .required(false)
                                .help("Store the record without scheduling it")
                                .action(clap::ArgAction::SetTrue),
                        ),
                )
                .subcommand(
                    command!("import")
                        .about("Adds one record per URL listed in a file (one per line)")
                        .arg(
                            arg!(-F --"file" <PATH>)
                                .required(true)
                                .help("File with one URL or host per line")
                                .value_parser(clap::value_parser!(std::path::PathBuf)),
                        )
                        .arg(
                            arg!(-n --"interval" <SECONDS>)
                                .required(false)
                                .help("Seconds between crawls for every imported record")
                                .value_parser(clap::value_parser!(u64))
                                .default_value("0"),
                        )
                        .arg(
                            arg!(-t --"tags" <TAGS>)
                                .required(false)
                                .help("Comma separated tags for every imported record"),
                        ),
                )
                .subcommand(
                    command!("update")
                        .about("Updates fields of a website record")
                        .arg(record_id_arg())
                        .arg(arg!(-u --"url" <URL>).required(false).help("New start URL"))
                        .arg(arg!(-l --"label" <LABEL>).required(false).help("New label"))
                        .arg(
                            arg!(-r --"regex" <REGEX>)
                                .required(false)
                                .help("New boundary regex"),
                        )
                        .arg(
                            arg!(-n --"interval" <SECONDS>)
                                .required(false)
                                .help("New interval in seconds; 0 crawls once")
                                .value_parser(clap::value_parser!(u64)),
                        )
                        .arg(
                            arg!(-t --"tags" <TAGS>)
                                .required(false)
                                .help("Replaces the tag set; pass \"\" to clear it"),
                        ),
                )
                .subcommand(
                    command!("delete")
                        .about("Deletes a website record with its executions and graph")
                        .arg(record_id_arg()),
                )
                .subcommand(
                    command!("activate")
                        .about("Resumes scheduling of a record")
                        .arg(record_id_arg()),
                )
                .subcommand(
                    command!("deactivate")
                        .about("Stops scheduling a record")
                        .arg(record_id_arg()),
                )
                .subcommand(
                    command!("list").about("Lists website records").arg(
                        arg!(-f --"format" <FORMAT>)
                            .required(false)
                            .help("Output format")
                            .value_parser(["text", "json"])
                            .default_value("text"),
                    ),
                ),
        )
        .subcommand(
            command!("crawl")
                .about("Crawl a URL once without storing anything and print what was found")
                .arg(
                    arg!(-u --"url" <URL>)
                        .required(true)
                        .help("The URL to crawl")
                        .value_parser(clap::value_parser!(Url)),
                )
                .arg(
                    arg!(-r --"regex" <REGEX>)
                        .required(false)
                        .help("Boundary regex (default: follow everything)")
                        .default_value(""),
                )
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Report format: text, json")
                        .value_parser(["text", "json"])
                        .default_value("text"),
                ),
        )
        .subcommand(
            command!("run")
                .about("Crawl a record now, whatever its interval, and store the graph")
                .arg(record_id_arg()),
        )
        .subcommand(
            command!("graph")
                .about("Print the stored graph of one or more records as JSON")
                .arg(
                    arg!(-r --"records" <IDS>)
                        .required(true)
                        .help("Comma separated record ids"),
                )
                .arg(
                    arg!(-m --"mode" <MODE>)
                        .required(false)
                        .help("website: one node per page, domain: one node per domain")
                        .value_parser(["website", "domain"])
                        .default_value("website"),
                ),
        )
        .subcommand(
            command!("executions")
                .about("List crawl executions and their status")
                .arg(
                    arg!(-r --"record" <RECORD_ID>)
                        .required(false)
                        .help("Only executions of this record, newest first")
                        .value_parser(clap::value_parser!(i64)),
                )
                .arg(
                    arg!(-l --"links" <EXECUTION_ID>)
                        .required(false)
                        .help("Print the URLs visited by one execution")
                        .value_parser(clap::value_parser!(i64))
                        .conflicts_with("record"),
                ),
        )
        .subcommand(
            command!("serve")
                .about("Run the scheduler: crawl every active record on its interval until Ctrl-C"),
        )
}
