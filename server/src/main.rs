use clap::Parser;
use log::{error, info, warn};
use server::config::SessionConfig;
use server::error::SessionError;
use server::server::Server;
use shared::PlayerId;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    host: String,
    /// Rendezvous port; dedicated ports are allocated above it
    #[clap(short, long, default_value = "5000")]
    port: u16,
    /// Players required before the game may start
    #[clap(long, default_value = "2")]
    min_players: usize,
    /// Admission stops once this many players have joined
    #[clap(long, default_value = "5")]
    target_players: usize,
    /// Turn budget in seconds
    #[clap(long, default_value = "15")]
    turn_time: u64,
    /// Reaction window budget in seconds
    #[clap(long, default_value = "5")]
    react_time: u64,
    /// Seed for identities and shuffling
    #[clap(long)]
    seed: Option<u64>,
    /// End the game after this many turns
    #[clap(long)]
    max_turns: Option<u32>,
    /// Start the game as soon as enough players are ready
    #[clap(long)]
    auto_start: bool,
}

impl Args {
    fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig {
            host: self.host.clone(),
            port: self.port,
            min_players: self.min_players,
            target_players: self.target_players,
            ..SessionConfig::default()
        };
        config.engine.turn_time_limit = Duration::from_secs(self.turn_time);
        config.engine.react_time_limit = Duration::from_secs(self.react_time);
        config.engine.seed = self.seed;
        config.engine.max_turns = self.max_turns;
        config
    }
}

/// Main-method of the application.
/// Parses command-line arguments, opens admission, then serves the console
/// until the game ends or the operator quits.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let server = Arc::new(Server::new(args.session_config()).await?);
    info!("Rendezvous listening on {}", server.rendezvous_addr()?);

    server.accept_connections().await;

    let session = {
        let server = Arc::clone(&server);
        let auto_start = args.auto_start;
        tokio::spawn(async move { run_console(server, auto_start).await })
    };

    tokio::select! {
        result = session => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Session failed: {}", e),
                Err(e) => error!("Console task panicked: {}", e),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

/// Reads operator commands from stdin. With `auto_start` the game also
/// starts by itself once the table is ready.
async fn run_console(server: Arc<Server>, auto_start: bool) -> Result<(), SessionError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ready_check = tokio::time::interval(Duration::from_secs(1));

    info!("Commands: list, kick <id>, ready, start, quit");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line? {
                    Some(line) => line,
                    // stdin closed; keep serving if the game can start itself
                    None if auto_start => {
                        wait_and_start(&server).await?;
                        return Ok(());
                    }
                    None => return Ok(()),
                };

                match handle_command(&server, line.trim()).await {
                    Ok(true) => return Ok(()),
                    Ok(false) => {}
                    Err(e) => warn!("{}", e),
                }
            }
            _ = ready_check.tick(), if auto_start => {
                if server.registry().len().await >= server.min_players() && server.is_ready().await {
                    report_winner(server.start().await?);
                    return Ok(());
                }
            }
        }
    }
}

/// Returns `Ok(true)` when the console should exit.
async fn handle_command(server: &Server, line: &str) -> Result<bool, SessionError> {
    let mut words = line.split_whitespace();
    match words.next() {
        Some("list") => {
            server.list_participants().await;
        }
        Some("kick") => match words.next().and_then(|id| id.parse().ok()) {
            Some(id) => server.kick(PlayerId(id)).await?,
            None => warn!("Usage: kick <id>"),
        },
        Some("ready") => {
            let ready = server.is_ready().await;
            info!(
                "Ready: {} ({} of {} players)",
                ready,
                server.registry().len().await,
                server.min_players()
            );
        }
        Some("start") => {
            report_winner(server.start().await?);
            return Ok(true);
        }
        Some("quit") | Some("exit") => {
            server.stop_admission().await?;
            return Ok(true);
        }
        Some(other) => warn!("Unknown command: {}", other),
        None => {}
    }
    Ok(false)
}

async fn wait_and_start(server: &Server) -> Result<(), SessionError> {
    let mut ready_check = tokio::time::interval(Duration::from_secs(1));
    loop {
        ready_check.tick().await;
        if server.registry().len().await >= server.min_players() && server.is_ready().await {
            report_winner(server.start().await?);
            return Ok(());
        }
    }
}

fn report_winner(winner: Option<PlayerId>) {
    match winner {
        Some(id) => info!("Game over, player {} wins", id),
        None => info!("Game over, no winner"),
    }
}
