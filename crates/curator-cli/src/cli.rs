//! CLI argument definitions (clap derive)

use anyhow::{bail, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use curator_ingestion::models::DateRange;

#[derive(Parser)]
#[command(name = "curator", version, about = "Ingest arXiv papers into PostgreSQL and OpenSearch")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Suppress info logs (only warnings and errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Fetch, parse, store and index papers for a date range
    Ingest(IngestArgs),
    /// Create the OpenSearch papers index
    InitIndex {
        /// Drop and recreate the index if it exists
        #[arg(long)]
        force: bool,
    },
    /// Show stored paper counts
    Stats,
}

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// Single submission day (default: yesterday, UTC)
    #[arg(long, conflicts_with_all = ["from", "to"])]
    pub date: Option<NaiveDate>,

    /// First submission day of the range
    #[arg(long, requires = "to")]
    pub from: Option<NaiveDate>,

    /// Last submission day of the range
    #[arg(long, requires = "from")]
    pub to: Option<NaiveDate>,

    /// Store metadata only, without downloading PDFs
    #[arg(long)]
    pub no_pdfs: bool,

    /// Also index papers into OpenSearch
    #[arg(long)]
    pub index: bool,

    /// Skip the database
    #[arg(long)]
    pub no_store: bool,

    /// Maximum papers to request (default from config)
    #[arg(long)]
    pub max_results: Option<usize>,

    /// Re-download PDFs even when cached
    #[arg(long)]
    pub no_cache: bool,
}

impl IngestArgs {
    /// Target range; `today` is the logical run date.
    pub fn date_range(&self, today: NaiveDate) -> Result<DateRange> {
        match (self.date, self.from, self.to) {
            (Some(day), _, _) => Ok(DateRange::single_day(day)),
            (None, Some(from), Some(to)) => match DateRange::new(from, to) {
                Some(range) => Ok(range),
                None => bail!("--from {from} is after --to {to}"),
            },
            _ => Ok(DateRange::day_before(today)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ingest(args: &[&str]) -> IngestArgs {
        let argv = ["curator", "ingest"].iter().chain(args.iter()).copied();
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Ingest(a) => a,
            _ => panic!("expected ingest"),
        }
    }

    fn day(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn default_range_is_yesterday() {
        let range = ingest(&[]).date_range(day("2024-03-01")).unwrap();
        assert_eq!(range, DateRange::single_day(day("2024-02-29")));
    }

    #[test]
    fn explicit_range() {
        let args = ingest(&["--from", "2024-01-01", "--to", "2024-01-05", "--no-pdfs", "--index"]);
        assert!(args.no_pdfs && args.index && !args.no_store);
        let range = args.date_range(day("2024-06-01")).unwrap();
        assert_eq!(range.source_from(), "20240101");
        assert_eq!(range.source_to(), "20240105");
    }

    #[test]
    fn inverted_range_is_rejected() {
        let args = ingest(&["--from", "2024-01-05", "--to", "2024-01-01"]);
        assert!(args.date_range(day("2024-06-01")).is_err());
    }

    #[test]
    fn date_conflicts_with_range() {
        let argv = ["curator", "ingest", "--date", "2024-01-01", "--from", "2024-01-01", "--to", "2024-01-02"];
        assert!(Cli::try_parse_from(argv).is_err());
        assert!(Cli::try_parse_from(["curator", "ingest", "--from", "2024-01-01"]).is_err());
    }

    #[test]
    fn init_index_force() {
        let cli = Cli::try_parse_from(["curator", "init-index", "--force"]).unwrap();
        assert!(matches!(cli.command, Command::InitIndex { force: true }));
    }
}
