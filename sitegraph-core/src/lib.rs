pub mod config;
pub mod crawl;
pub mod data;
pub mod error;
pub mod events;
pub mod jobs;
pub mod map;
pub mod model;
pub mod scheduler;

use colored::Colorize;

pub use config::Settings;
pub use crawl::CrawlRunner;
pub use data::{Database, GraphCounts, SharedDatabase};
pub use error::{CoreError, Result};
pub use events::{RecordEvent, diff_records};
pub use jobs::{CrawlJob, JobHandle, JobQueue, JobRunner, TokioJobQueue};
pub use map::{Graph, GraphMode};
pub use model::{Execution, ExecutionStatus, RecordDraft, RecordUpdate, WebsiteRecord};
pub use scheduler::{RecordWatcher, ScheduleOutcome, Scheduler};

const BANNER: &str = r#"
     _ _                              _
 ___(_) |_ ___  __ _ _ __ __ _ _ __ | |__
/ __| | __/ _ \/ _` | '__/ _` | '_ \| '_ \
\__ \ | ||  __/ (_| | | | (_| | |_) | | | |
|___/_|\__\___|\__, |_|  \__,_| .__/|_| |_|
               |___/          |_|
"#;

pub fn print_banner() {
    println!("{}", BANNER.bright_cyan());
    println!(
        "  {} {}\n",
        "recurring crawls, stored as link graphs".dimmed(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
}
