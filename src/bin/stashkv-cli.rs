//! stashkv-cli: command-line client for StashKV.
//!
//! Without trailing arguments it runs a REPL; otherwise it sends the one
//! command given and exits. Each command is preceded by a `PING` so a dead
//! server is reported before anything is sent.

use clap::Parser;
use stashkv::client::{command_tokens, tokenize, Client, ClientError};
use stashkv::config::{DEFAULT_HOST, DEFAULT_PORT};
use stashkv::protocol::Response;
use std::io::Write as _;
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Interactive client for StashKV.
#[derive(Parser, Debug)]
#[command(name = "stashkv-cli", version, about)]
struct Args {
    /// Server host
    #[arg(short = 'H', long, default_value = DEFAULT_HOST)]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Command to run once. If omitted, starts the REPL.
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let mut client = match Client::connect((args.host.as_str(), args.port)).await {
        Ok(client) => client,
        Err(e) => {
            eprintln!("could not connect to {}:{}: {e}", args.host, args.port);
            return Ok(ExitCode::FAILURE);
        }
    };

    if !args.command.is_empty() {
        return Ok(match run_one(&mut client, &args.command).await {
            Ok(response) => {
                println!("{response}");
                if response.is_error() {
                    ExitCode::FAILURE
                } else {
                    ExitCode::SUCCESS
                }
            }
            Err(e) => {
                eprintln!("error: {e}");
                ExitCode::FAILURE
            }
        });
    }

    repl(&mut client, &format!("{}:{}", args.host, args.port)).await?;
    Ok(ExitCode::SUCCESS)
}

/// Pings, then sends one translated command.
async fn run_one(client: &mut Client, words: &[String]) -> Result<Response, ClientError> {
    let tokens = command_tokens(words)?;
    client.ping().await?;
    client.send(&tokens).await
}

async fn repl(client: &mut Client, prompt: &str) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("{prompt}> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        // Ctrl-D or Ctrl-C
        let Some(line) = line else {
            println!();
            return Ok(());
        };

        let words = match tokenize(&line) {
            Ok(words) if words.is_empty() => continue,
            Ok(words) => words,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };
        if words[0].eq_ignore_ascii_case("exit") || words[0].eq_ignore_ascii_case("quit") {
            return Ok(());
        }

        match run_one(client, &words).await {
            Ok(response) => {
                println!("{response}");
                if response.is_fatal() {
                    return Ok(());
                }
            }
            Err(ClientError::Usage(msg)) => println!("{msg}"),
            Err(e) => {
                eprintln!("error: {e}");
                return Ok(());
            }
        }
    }
}
