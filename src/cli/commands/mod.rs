pub mod auth;

use clap::{
    Arg, ArgAction, ColorChoice, Command,
    builder::{
        ValueParser,
        styling::{AnsiColor, Effects, Styles},
    },
};

pub const ARG_PORT: &str = "port";
pub const ARG_DSN: &str = "dsn";
pub const ARG_VERBOSITY: &str = "verbosity";

/// `STOREGATE_LOG_LEVEL` takes either a level name or the equivalent `-v`
/// count (`error` = 0 .. `trace` = 4). Repeated `-v` flags arrive here as
/// their running count.
fn log_level() -> ValueParser {
    ValueParser::from(|raw: &str| -> std::result::Result<u8, String> {
        let level = match raw.trim().to_ascii_lowercase().as_str() {
            "error" => 0,
            "warn" => 1,
            "info" => 2,
            "debug" => 3,
            "trace" => 4,
            other => other
                .parse::<u8>()
                .map_err(|_| format!("unknown log level: {raw}"))?,
        };
        Ok(level)
    })
}

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("storegate")
        .about("Authentication and store-scoped authorization")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("STOREGATE_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long(ARG_DSN)
                .help("Database connection string")
                .long_help(
                    "PostgreSQL connection string. When omitted, state is kept in memory and lost on restart.",
                )
                .env("STOREGATE_DSN")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_VERBOSITY)
                .short('v')
                .long("verbose")
                .help("Log verbosity, repeat for more (-vv = INFO); or set a level name")
                .env("STOREGATE_LOG_LEVEL")
                .global(true)
                .action(ArgAction::Count)
                .value_parser(log_level()),
        );

    auth::with_args(command)
}
