mod args;
mod client;
mod handlers;

use clap::Parser;

use args::{CliArgs, Command};
use client::ApiClient;

#[tokio::main]
async fn main() {
    let cli = CliArgs::parse();

    let client = match ApiClient::new(&cli.server, &cli.ops_server, &cli.token) {
        Ok(client) => client,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Command::Jobs(command) => handlers::jobs(&client, command).await,
        Command::Submit(submit_args) => handlers::submit(&client, submit_args).await,
        Command::Credits(command) => handlers::credits(&client, command).await,
        Command::Sweep(sweep_args) => handlers::sweep(&client, sweep_args).await,
        Command::Ratelimit(command) => handlers::ratelimit(&client, command).await,
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
