//! Command-line interface for the waitlist engine.
//!
//! Every command opens the `SQLite` database, starts an engine over it, runs
//! one operation and prints the result as JSON on stdout.

pub mod handlers;
pub mod ledger;
pub mod setup;

use chrono::NaiveDate;
use clap::{Arg, ArgAction, Command};
use waitlist_core::{parse_time, TimeRange};

pub fn build_cli() -> Command {
    Command::new("waitlist")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Salon waitlist: queue customers, offer freed slots, cascade on skip or expiry")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_name("PATH")
                .help("Config file layered over the global and project config"),
        )
        .arg(
            Arg::new("database")
                .long("database")
                .global(true)
                .value_name("URL")
                .help("SQLite database URL (overrides config)"),
        )
        .arg(
            Arg::new("offer-ttl")
                .long("offer-ttl")
                .global(true)
                .value_name("SECS")
                .value_parser(clap::value_parser!(u64))
                .help("Offer time-to-live in seconds (overrides config)"),
        )
        .subcommand(cmd_join())
        .subcommand(entry_command("leave", "Leave the waitlist (only while waiting)"))
        .subcommand(entry_command("position", "Show an entry's queue position"))
        .subcommand(cmd_list())
        .subcommand(cmd_free_slot())
        .subcommand(entry_command("confirm", "Accept an outstanding offer and book it"))
        .subcommand(entry_command("skip", "Decline an outstanding offer"))
        .subcommand(entry_command("events", "Show an entry's audit trail"))
        .subcommand(Command::new("stats").about("Count entries per status"))
        .subcommand(Command::new("sweep").about("Expire overdue offers once"))
        .subcommand(cmd_serve())
}

fn entry_command(name: &'static str, about: &'static str) -> Command {
    Command::new(name).about(about).arg(
        Arg::new("entry-id")
            .required(true)
            .value_name("ENTRY_ID")
            .help("Waitlist entry ID"),
    )
}

fn cmd_join() -> Command {
    Command::new("join")
        .about("Join the waitlist for a fully-booked date")
        .arg(Arg::new("user").long("user").required(true).help("Customer ID"))
        .arg(Arg::new("salon").long("salon").required(true).help("Salon ID"))
        .arg(Arg::new("service").long("service").required(true).help("Service ID"))
        .arg(
            Arg::new("staff")
                .long("staff")
                .help("Required staff member (default: any)"),
        )
        .arg(
            Arg::new("date")
                .long("date")
                .required(true)
                .value_name("YYYY-MM-DD")
                .value_parser(parse_date),
        )
        .arg(
            Arg::new("slot")
                .long("slot")
                .required(true)
                .action(ArgAction::Append)
                .value_name("HH:MM-HH:MM")
                .value_parser(parse_range)
                .help("Acceptable time range; repeat for several"),
        )
}

fn cmd_list() -> Command {
    Command::new("list")
        .about("List a customer's entries with positions")
        .arg(Arg::new("user").long("user").required(true).help("Customer ID"))
}

fn cmd_free_slot() -> Command {
    Command::new("free-slot")
        .about("Report a freed slot and offer it down the queue")
        .arg(Arg::new("salon").long("salon").required(true))
        .arg(Arg::new("service").long("service").required(true))
        .arg(Arg::new("staff").long("staff"))
        .arg(
            Arg::new("date")
                .long("date")
                .required(true)
                .value_name("YYYY-MM-DD")
                .value_parser(parse_date),
        )
        .arg(
            Arg::new("time")
                .long("time")
                .required(true)
                .value_name("HH:MM")
                .value_parser(|s: &str| parse_time(s).map_err(|e| e.to_string())),
        )
}

fn cmd_serve() -> Command {
    Command::new("serve")
        .about("Run the engine with the reconciliation sweeper until interrupted")
        .arg(
            Arg::new("sweep-interval")
                .long("sweep-interval")
                .value_name("SECS")
                .value_parser(clap::value_parser!(u64))
                .help("Sweep interval in seconds (overrides config)"),
        )
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("invalid date '{s}': {e}"))
}

fn parse_range(s: &str) -> Result<TimeRange, String> {
    s.parse().map_err(|e: waitlist_core::Error| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        build_cli().debug_assert();
    }

    #[test]
    fn test_join_collects_repeated_slots() {
        let matches = build_cli().try_get_matches_from([
            "waitlist",
            "join",
            "--user",
            "u-1",
            "--salon",
            "s-1",
            "--service",
            "cut",
            "--date",
            "2030-01-02",
            "--slot",
            "09:00-10:00",
            "--slot",
            "14:00-16:00",
        ]);
        let slots: Vec<TimeRange> = matches
            .ok()
            .and_then(|m| {
                m.subcommand_matches("join")
                    .and_then(|j| j.get_many::<TimeRange>("slot"))
                    .map(|v| v.copied().collect())
            })
            .unwrap_or_default();
        assert_eq!(slots.len(), 2);
    }

    #[test]
    fn test_bad_range_rejected_by_parser() {
        let result = build_cli().try_get_matches_from([
            "waitlist", "join", "--user", "u", "--salon", "s", "--service", "c", "--date",
            "2030-01-02", "--slot", "10:00-09:00",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_database_flag_after_subcommand() {
        let matches = build_cli()
            .try_get_matches_from(["waitlist", "stats", "--database", "sqlite::memory:"]);
        let url = matches
            .ok()
            .and_then(|m| m.get_one::<String>("database").cloned());
        assert_eq!(url.as_deref(), Some("sqlite::memory:"));
    }
}
