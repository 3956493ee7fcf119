//! One-shot client commands against a running host.

use std::io::Write;
use std::process::ExitCode;
use std::time::Duration;

use remote_host::host::{HostClient, RemoteOutput, RemoteSystemInfo};
use serde_json::json;

use crate::cli::{Command, RemoteArgs};

/// Output format for client commands
#[derive(Clone, Copy)]
pub enum OutputFormat {
    Human,
    Json,
}

impl From<&RemoteArgs> for OutputFormat {
    fn from(remote: &RemoteArgs) -> Self {
        if remote.json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Run a client command against the host
pub fn run_command(command: &Command) -> ExitCode {
    let remote = match command {
        Command::Exec { remote, .. } | Command::Info { remote } => remote,
    };

    let mut client = match connect(remote) {
        Ok(client) => client,
        Err(code) => return code,
    };
    let format = OutputFormat::from(remote);

    match command {
        Command::Exec { command, .. } => cmd_exec(&mut client, &command.join(" "), format),
        Command::Info { .. } => cmd_info(&mut client, format),
    }
}

fn connect(remote: &RemoteArgs) -> Result<HostClient, ExitCode> {
    let Some(password) = remote.password() else {
        eprintln!("Error: no password given (use --password or REMOTE_HOST_PASSWORD)");
        return Err(ExitCode::FAILURE);
    };

    let timeout = Duration::from_secs(remote.timeout);
    let mut client = match HostClient::connect_with_timeout(remote.server.as_str(), timeout) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Is remote-host running on {}?", remote.server);
            return Err(ExitCode::FAILURE);
        }
    };

    if let Err(e) = client.authenticate(&remote.username, &password) {
        eprintln!("Error: {}", e);
        return Err(ExitCode::FAILURE);
    }
    Ok(client)
}

fn cmd_exec(client: &mut HostClient, command: &str, format: OutputFormat) -> ExitCode {
    match client.execute(command) {
        Ok(output) => {
            match format {
                OutputFormat::Json => print_json(&json!({
                    "stdout": output.stdout,
                    "stderr": output.stderr,
                    "returncode": output.returncode,
                })),
                OutputFormat::Human => print_output_human(&output),
            }
            exit_code(output.returncode)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn print_output_human(output: &RemoteOutput) {
    // Relay the remote streams unchanged; a closed pipe is not worth reporting
    let _ = std::io::stdout().write_all(output.stdout.as_bytes());
    let _ = std::io::stderr().write_all(output.stderr.as_bytes());
}

fn exit_code(returncode: i32) -> ExitCode {
    match u8::try_from(returncode) {
        Ok(code) => ExitCode::from(code),
        Err(_) => ExitCode::FAILURE,
    }
}

fn cmd_info(client: &mut HostClient, format: OutputFormat) -> ExitCode {
    match client.system_info() {
        Ok(info) => {
            match format {
                OutputFormat::Json => print_json(&json!({
                    "hostname": info.hostname,
                    "platform": info.platform,
                    "version": info.version,
                    "current_time": info.current_time,
                })),
                OutputFormat::Human => print_info_human(&info),
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn print_info_human(info: &RemoteSystemInfo) {
    println!("Host:");
    println!("  Hostname:       {}", info.hostname);
    println!("  Platform:       {}", info.platform);
    println!("  Version:        {}", info.version);
    println!("  Time:           {}", info.current_time);
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Error: failed to render JSON: {}", e),
    }
}
