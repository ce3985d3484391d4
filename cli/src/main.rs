mod client;

use anyhow::Result;
use chrono::Local;
use clap::{Parser, Subcommand};
use client::DaemonClient;
use shared::ipc::{Command, Response};
use shared::{ConversationTurn, PollSnapshot};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "CLI for the parley conversation daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start listening
    Start,
    /// Stop listening
    Stop,
    /// Start if idle, stop otherwise
    Toggle,
    /// Show the session state and the latest exchange
    Status,
    /// Poll the daemon and print each new exchange
    Watch {
        /// Seconds between polls
        #[arg(short, long, default_value_t = 2)]
        interval: u64,
    },
    /// Print the conversation so far
    History,
    /// Forget the conversation so far
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = DaemonClient::new();

    let command = match cli.command {
        Commands::Start => Command::Start,
        Commands::Stop => Command::Stop,
        Commands::Toggle => Command::Toggle,
        Commands::Status => Command::Poll,
        Commands::History => Command::History,
        Commands::Clear => Command::ClearHistory,
        Commands::Watch { interval } => {
            return watch(&client, Duration::from_secs(interval.max(1))).await;
        }
    };

    match client.send_command(command).await {
        Ok(Response::Ok) => {
            println!("Success");
        }
        Ok(Response::Snapshot(snapshot)) => print_snapshot(&snapshot),
        Ok(Response::History(turns)) => {
            if turns.is_empty() {
                println!("No conversation yet");
            }
            for turn in &turns {
                print_turn(turn);
            }
        }
        Ok(Response::Error(msg)) => {
            eprintln!("Error: {}", msg);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Failed to connect to parleyd: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}

async fn watch(client: &DaemonClient, interval: Duration) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    let mut last: Option<PollSnapshot> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }

        let snapshot = match client.send_command(Command::Poll).await? {
            Response::Snapshot(snapshot) => snapshot,
            Response::Error(msg) => {
                eprintln!("Error: {}", msg);
                continue;
            }
            _ => continue,
        };

        let previous = last.as_ref();
        if previous.map(|p| p.state) != Some(snapshot.state) {
            println!("[{}] {}", Local::now().format("%H:%M:%S"), snapshot.state);
        }
        if previous.map(|p| p.turns) != Some(snapshot.turns) && snapshot.turns > 0 {
            if let (Some(q), Some(a)) = (&snapshot.last_transcript, &snapshot.last_response_text) {
                println!("  You:    {}", q);
                println!("  Tutor:  {}", a);
            }
        }
        if previous.and_then(|p| p.last_failure.as_ref()) != snapshot.last_failure.as_ref() {
            if let Some(failure) = &snapshot.last_failure {
                println!("  ! {:?}: {}", failure.kind, failure.message);
            }
        }
        if previous.and_then(|p| p.fault.as_ref()) != snapshot.fault.as_ref() {
            if let Some(fault) = &snapshot.fault {
                println!("  ! device: {}", fault);
            }
        }

        last = Some(snapshot);
    }
}

fn print_snapshot(snapshot: &PollSnapshot) {
    println!("Status:");
    println!("  State: {}", snapshot.state);
    println!("  Turns: {}", snapshot.turns);
    if snapshot.dropped_utterances > 0 {
        println!("  Dropped utterances: {}", snapshot.dropped_utterances);
    }
    if let Some(transcript) = &snapshot.last_transcript {
        println!("  Last question: {}", transcript);
    }
    if let Some(response) = &snapshot.last_response_text {
        println!("  Last answer: {}", response);
    }
    if let Some(failure) = &snapshot.last_failure {
        println!("  Last failure: {:?}: {}", failure.kind, failure.message);
    }
    if let Some(fault) = &snapshot.fault {
        println!("  Device fault: {}", fault);
    }
}

fn print_turn(turn: &ConversationTurn) {
    let time = turn.timestamp.with_timezone(&Local).format("%H:%M:%S");
    match &turn.subject {
        Some(subject) => println!("[{}] ({})", time, subject),
        None => println!("[{}]", time),
    }
    println!("  You:    {}", turn.transcript);
    println!("  Tutor:  {}", turn.response_text);
    if !turn.sources.is_empty() {
        println!("  Sources: {}", turn.sources.join(", "));
    }
}
