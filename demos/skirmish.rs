//! # Lane skirmish over iroh
//!
//! Start a swarm, open a match from one terminal and join it from another.
//! Units spawn on your baseline and march to the other side.
//!
//! ## Host a swarm
//!
//! ```sh
//! cargo run --example skirmish -- host --name Alice
//! ```
//!
//! ## Join a swarm
//!
//! ```sh
//! cargo run --example skirmish -- join <ticket> --name Bob
//! ```
//!
//! Then type `help` for the list of commands.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use p2p_skirmish::skirmish::{Lane, Skirmish, SkirmishInput, SkirmishState};
use p2p_skirmish::transport::IrohTransport;
use p2p_skirmish::{Config, GameRoom, MatchId, MatchResult, Role, UiEvent, Winner};
use tokio_util::io::ReaderStream;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Name shown to other peers
    #[arg(long, global = true)]
    name: Option<String>,
    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Keep keys and the status log here so a restart resumes
    #[arg(long, global = true)]
    store: Option<PathBuf>,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Start a new swarm
    Host,
    /// Join an existing swarm
    Join {
        /// Ticket printed by the host
        ticket: String,
    },
}

const HELP: &str = "\
commands:
  list           show open requests and running matches
  open           open a match request
  join <n>       accept open request number n
  cancel         forget a pending join
  watch <n>      spectate running match number n
  l | r          spawn a unit in the left or right lane
  status         show the current game
  end            report the current score as the result
  giveup         concede the current match
  tie            end the current match as a tie
  leave          stop showing the current game
  quit";

fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

fn print_state(frame: u32, state: &SkirmishState) {
    println!(
        "[frame {frame}] units: {} | score {}:{}",
        state.units.len(),
        state.host_score,
        state.guest_score
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    }
    .with_env()?;
    if let Some(name) = cli.name {
        config.display_name = name;
    }
    if cli.store.is_some() {
        config.store_path = cli.store;
    }
    init_tracing(&config.log);

    let transport = match cli.command {
        Commands::Host => {
            let transport = IrohTransport::create(config.store_path.clone()).await?;
            println!("Swarm created! Ticket: {}", transport.ticket());
            transport
        }
        Commands::Join { ticket } => IrohTransport::join(&ticket, config.store_path.clone()).await?,
    };
    let my_id = transport.peer_id();
    println!("Your ID: {my_id}");
    let (room, mut events) = GameRoom::create(Skirmish, my_id, transport, config)?;
    println!("{HELP}");

    let mut stdin = ReaderStream::new(tokio::io::stdin());
    loop {
        print!("> ");
        io::stdout().flush()?;

        tokio::select! {
            Some(Ok(input)) = futures::StreamExt::next(&mut stdin) => {
                let line = String::from_utf8_lossy(&input).trim().to_string();
                if line == "quit" {
                    break;
                }
                if let Err(e) = handle_command(&room, &line).await {
                    eprintln!("{e}");
                }
            }
            Some(event) = events.recv() => match event {
                UiEvent::RequestOpened(request) => {
                    println!("\nMatch request {} opened by {}", request.match_id, request.host);
                }
                UiEvent::MatchStarted(running) => {
                    println!("\nMatch {}: {} vs {}", running.match_id, running.host, running.guest);
                }
                UiEvent::MatchEnded(past) => {
                    println!(
                        "\nMatch {} ended: {:?} ({})",
                        past.match_id, past.result.winner, past.result.score
                    );
                }
                UiEvent::CurrentGameChanged(Some(match_id)) => {
                    println!("\nYou are playing in {match_id}")
                }
                UiEvent::CurrentGameChanged(None) => println!("\nBack in the lobby"),
                UiEvent::GameReady { frame, .. } => {
                    println!("\nGame ready at frame {frame}. Spawn with l or r.")
                }
                UiEvent::FrameAdvanced { frame, state, .. } => {
                    if frame % 60 == 0 {
                        println!();
                        print_state(frame, &state);
                    }
                }
                UiEvent::RolledBack { from, to, .. } => tracing::debug!(from, to, "rolled back"),
                UiEvent::GameAborted { match_id, reason } => {
                    eprintln!("\nGame {match_id} aborted: {reason}");
                }
                UiEvent::PeerDiscovered(peer) => println!("\nPeer {peer} is here"),
                UiEvent::PingMeasured { .. } => {}
                UiEvent::NameLearned { peer, name } => println!("\n{peer} is called {name}"),
            },
            else => break,
        }
    }
    room.shutdown().await;
    Ok(())
}

async fn handle_command(room: &GameRoom<Skirmish>, line: &str) -> Result<()> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(());
    };
    match command {
        "help" => println!("{HELP}"),
        "list" => {
            let lobby = room.lobby().await?;
            println!("{} peers online", lobby.online_peers);
            for (n, open) in lobby.open_requests.iter().enumerate() {
                println!(
                    "  open {n}: {} by {} ({:?})",
                    open.request.match_id, open.host_name, open.host_status
                );
            }
            for (n, running) in lobby.running.iter().enumerate() {
                println!(
                    "  running {n}: {} ({} vs {})",
                    running.match_id, running.host, running.guest
                );
            }
            println!("  {} matches played", lobby.past.len());
        }
        "open" => {
            let match_id = room.request_match().await?;
            println!("Opened {match_id}, waiting for somebody to join");
        }
        "join" => {
            let match_id = pick(room, words.next(), false).await?;
            room.join_match(match_id).await?;
        }
        "cancel" => match room.cancel_join().await? {
            Some(match_id) => println!("No longer waiting for {match_id}"),
            None => println!("Not waiting for any match"),
        },
        "watch" => {
            let match_id = pick(room, words.next(), true).await?;
            room.spectate(match_id).await?;
        }
        "l" | "r" => {
            let lane = if command == "l" { Lane::Left } else { Lane::Right };
            let Some(game) = room.game().await? else {
                anyhow::bail!("no game running");
            };
            let frame = room.send_input(SkirmishInput::spawn(game.role, lane)).await?;
            println!("Unit arrives at frame {frame}");
        }
        "status" => match room.game().await? {
            Some(game) => {
                println!("{} as {:?}, {:?}", game.match_id, game.role, game.readiness);
                if let Some(state) = &game.state {
                    print_state(game.frame, state);
                }
            }
            None => println!("no game running"),
        },
        "end" | "giveup" | "tie" => {
            let Some(game) = room.game().await? else {
                anyhow::bail!("no game running");
            };
            let score = game.state.as_ref().map(SkirmishState::result);
            let result = match command {
                "end" => score.unwrap_or(MatchResult {
                    winner: Winner::Tie,
                    score: "0:0".to_string(),
                }),
                "giveup" => MatchResult {
                    winner: if game.role == Role::Host {
                        Winner::Guest
                    } else {
                        Winner::Host
                    },
                    score: "forfeit".to_string(),
                },
                _ => MatchResult {
                    winner: Winner::Tie,
                    score: score.map(|s| s.score).unwrap_or_default(),
                },
            };
            room.end_match(game.match_id, result).await?;
        }
        "leave" => {
            if let Some(match_id) = room.leave_game().await? {
                println!("Stopped showing {match_id}");
            }
        }
        other => println!("unknown command '{other}', try help"),
    }
    Ok(())
}

/// Resolve a list index from `list` into a match id.
async fn pick(room: &GameRoom<Skirmish>, arg: Option<&str>, running: bool) -> Result<MatchId> {
    let n: usize = arg
        .ok_or_else(|| anyhow::anyhow!("which one? see list"))?
        .parse()?;
    let lobby = room.lobby().await?;
    let match_id = if running {
        lobby.running.get(n).map(|m| m.match_id.clone())
    } else {
        lobby.open_requests.get(n).map(|o| o.request.match_id.clone())
    };
    match_id.ok_or_else(|| anyhow::anyhow!("no match number {n}"))
}
