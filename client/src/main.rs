use clap::Parser;
use client::bot::Bot;
use client::network::Connection;
use log::info;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Rendezvous address of the session server
    #[arg(short = 's', long, default_value = "127.0.0.1:5000")]
    server: SocketAddr,

    /// Seconds to wait for the server to answer the connect request
    #[arg(short = 't', long, default_value = "2")]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), client::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    info!("Starting client...");
    let connection = Connection::connect(args.server, Duration::from_secs(args.timeout)).await?;
    let mut bot = Bot::new(connection.player_id());

    client::run(&connection, &mut bot).await?;

    info!("Client finished");
    Ok(())
}
