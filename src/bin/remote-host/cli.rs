use std::path::PathBuf;

use clap_serde_derive::{
    clap::{self, Parser, Subcommand, ValueEnum},
    serde::{self, Deserialize, Serialize},
    ClapSerde,
};
use color_eyre::eyre::Result as EyreResult;
use expand_tilde::ExpandTilde;
use log::LevelFilter;
use remote_host::executor::DEFAULT_SHELL;

const APP_VERSION: &str = env!("REMOTE_HOST_BUILD_VERSION");

pub const DEFAULT_PORT: u16 = 3389;

#[derive(Parser)]
#[command(author, version = APP_VERSION, about)]
pub struct Args {
    /// Client subcommand; without one, the host server runs
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Server options
    #[command(flatten)]
    pub config: <Config as ClapSerde>::Opt,
}

/// Client commands against a running host
#[derive(Subcommand)]
pub enum Command {
    /// Run a command on a remote host and print its output
    Exec {
        #[command(flatten)]
        remote: RemoteArgs,

        /// Command line to run on the host
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Show remote host information
    Info {
        #[command(flatten)]
        remote: RemoteArgs,
    },
}

/// Connection options shared by client commands
#[derive(clap::Args)]
pub struct RemoteArgs {
    /// Host to connect to, as ADDRESS:PORT
    #[arg(short = 'H', long = "server", default_value_t = format!("127.0.0.1:{}", DEFAULT_PORT))]
    pub server: String,

    /// Account name
    #[arg(short, long, default_value = "admin")]
    pub username: String,

    /// Account password (falls back to REMOTE_HOST_PASSWORD)
    #[arg(short, long)]
    pub password: Option<String>,

    /// Seconds to wait for a response
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

impl RemoteArgs {
    pub fn password(&self) -> Option<String> {
        self.password
            .clone()
            .or_else(|| std::env::var("REMOTE_HOST_PASSWORD").ok())
    }
}

#[derive(ClapSerde, Clone, Serialize)]
pub struct Config {
    /// Address to bind to
    #[default("0.0.0.0".to_string())]
    #[arg(long)]
    pub host: String,

    /// Port to listen on
    #[default(DEFAULT_PORT)]
    #[arg(long)]
    pub port: u16,

    /// Enable debug logging (same as --log-level debug)
    #[default(false)]
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub debug: bool,

    /// Log level
    #[default(LogLevel::Info)]
    #[arg(long, value_enum)]
    pub log_level: LogLevel,

    /// Also append log output to this file
    #[arg(long, num_args = 1)]
    pub log_file: Option<PathBuf>,

    /// Seconds a command may run before it is killed
    #[default(30u64)]
    #[arg(long)]
    pub command_timeout: u64,

    /// Shell interpreter used to run commands
    #[default(DEFAULT_SHELL.to_string())]
    #[arg(long)]
    pub shell: String,

    /// Account allowed to log in, as NAME:PASSWORD (repeatable; replaces the built-in accounts)
    #[arg(long = "user", value_name = "NAME:PASSWORD")]
    #[serde(skip_serializing)]
    pub users: Vec<String>,
}

impl Config {
    pub fn from_opt(config_opt: &mut <Config as ClapSerde>::Opt) -> EyreResult<Self> {
        let mut config = Config::from(config_opt);
        config.log_file = config
            .log_file
            .map(|p| p.expand_tilde_owned())
            .transpose()?;
        Ok(config)
    }

    /// Effective log level; `--debug` wins over `--log-level`
    pub fn level_filter(&self) -> LevelFilter {
        if self.debug {
            LevelFilter::Debug
        } else {
            self.log_level.into()
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    #[value(hide = true)]
    Trace = 5,
}

impl From<LogLevel> for LevelFilter {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

impl Args {
    pub fn parse() -> Self {
        <Self as clap::Parser>::parse()
    }
}
