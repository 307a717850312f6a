//! Room Draw
//!
//! Relay server, terminal client and an in-process demo.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use room_draw::{
    DrawRng, VERSION,
    core::hash::short_hex,
    game::{Catalog, DrawEngine, Ordinal, RollOutcome},
    network::{
        HandledEvent, LocalHub, LocalRelay, RelayChannel, RelayServer, RelayServerConfig,
        SessionConfig, SessionController, SyncMessage, WsRelay,
    },
    storage::{self, FileCache, LocalCache, MemoryCache},
};

#[derive(Parser)]
#[command(name = "room-draw", version, about = "Shared number-draw rooms")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the WebSocket relay server
    Relay {
        /// Address to listen on
        #[arg(long)]
        bind: Option<SocketAddr>,
        /// Maximum concurrent connections
        #[arg(long)]
        max_connections: Option<usize>,
    },
    /// Join a room from the terminal
    Play(PlayArgs),
    /// Run two in-process peers through join, draw, add and exclude
    Demo {
        /// Item catalogue (JSON)
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
}

#[derive(Args)]
struct PlayArgs {
    /// Relay URL
    #[arg(long, default_value = "ws://127.0.0.1:8090")]
    url: String,
    /// Room to join; defaults to the last joined room
    #[arg(long)]
    room: Option<String>,
    /// Display name
    #[arg(long)]
    name: Option<String>,
    /// Cache file
    #[arg(long, default_value = "room-draw-cache.json")]
    cache: PathBuf,
    /// Item catalogue (JSON)
    #[arg(long)]
    catalog: Option<PathBuf>,
    /// Ask the relay to echo our own messages
    #[arg(long)]
    echo_self: bool,
}

type Terminal = SessionController<Box<dyn RelayChannel>, FileCache>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    info!("Room Draw v{}", VERSION);

    match cli.command {
        Command::Relay { bind, max_connections } => run_relay(bind, max_connections).await,
        Command::Play(args) => play(args).await,
        Command::Demo { catalog } => demo(load_catalog(catalog)?),
    }
}

fn load_catalog(path: Option<PathBuf>) -> anyhow::Result<Catalog> {
    let path = path.or_else(|| std::env::var_os("ROOM_DRAW_CATALOG").map(PathBuf::from));
    match path {
        Some(path) => {
            let catalog = Catalog::load(&path)
                .with_context(|| format!("loading catalogue {}", path.display()))?;
            info!("Loaded {} items from {}", catalog.len(), path.display());
            Ok(catalog)
        }
        None => Ok(Catalog::builtin()),
    }
}

async fn run_relay(bind: Option<SocketAddr>, max_connections: Option<usize>) -> anyhow::Result<()> {
    let mut config = RelayServerConfig::from_env();
    if let Some(bind) = bind {
        config.bind_addr = bind;
    }
    if let Some(max) = max_connections {
        config.max_connections = max;
    }

    let server = Arc::new(RelayServer::new(config));
    let signal = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal.shutdown();
        }
    });

    server.run().await?;
    Ok(())
}

// =============================================================================
// TERMINAL CLIENT
// =============================================================================

async fn play(args: PlayArgs) -> anyhow::Result<()> {
    let catalog = Arc::new(load_catalog(args.catalog)?);
    let mut cache = FileCache::open(&args.cache);

    let mut config = SessionConfig::from_env();
    config.echo_self |= args.echo_self;
    if config.participant_id.is_none() {
        config.participant_id = Some(storage::participant_id(&mut cache));
    }

    let relay: Box<dyn RelayChannel> = match WsRelay::connect(&args.url).await {
        Ok(relay) => Box::new(relay),
        Err(e) => {
            warn!("Relay {} unreachable, playing offline: {}", args.url, e);
            Box::new(LocalHub::new().connect())
        }
    };

    let mut controller: Terminal = SessionController::new(relay, cache, catalog, config);

    if let Some(room) = args.room.or_else(|| controller.last_room()) {
        controller.join(&room)?;
    }
    if let Some(name) = args.name {
        controller.set_display_name(&name)?;
    }

    print_help();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        if !run_command(&mut controller, line.trim()).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = controller.next_event(), if controller.is_connected() => {
                if let Some(inbound) = inbound {
                    let handled = controller.handle_event(inbound);
                    report(&controller, &handled);
                }
            }
        }
    }

    controller.leave();
    Ok(())
}

fn print_help() {
    println!("commands: join R | leave | roll | spin | exclude N | add TEXT | remove N");
    println!("          name NAME | reset | list | state | help | quit");
}

/// Run one terminal command. Returns false to quit.
async fn run_command(controller: &mut Terminal, line: &str) -> bool {
    let (command, rest) = match line.split_once(' ') {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };

    let result = match command {
        "" => Ok(()),
        "quit" | "exit" => return false,
        "help" => {
            print_help();
            Ok(())
        }
        "join" => controller.join(rest),
        "leave" => {
            controller.leave();
            Ok(())
        }
        "roll" => controller.roll().map(|outcome| print_outcome(controller, outcome)),
        "spin" => controller
            .roll_animated(|ordinal| println!("  ... {}", ordinal))
            .await
            .map(|outcome| print_outcome(controller, outcome)),
        "exclude" => match rest.parse::<Ordinal>() {
            Ok(ordinal) => controller.toggle_exclude(ordinal).map(|excluded| {
                println!("{} {}", if excluded { "excluded" } else { "included" }, ordinal);
            }),
            Err(_) => {
                println!("usage: exclude N");
                Ok(())
            }
        },
        "add" => controller.add_item(rest).map(|ordinal| println!("added #{}", ordinal)),
        "remove" => match rest.parse::<Ordinal>() {
            Ok(ordinal) => controller.remove_item(ordinal).map(|removed| {
                if removed {
                    println!("removed #{}", ordinal);
                } else {
                    println!("#{} cannot be removed", ordinal);
                }
            }),
            Err(_) => {
                println!("usage: remove N");
                Ok(())
            }
        },
        "name" => controller.set_display_name(rest),
        "reset" => controller.reset_session(),
        "list" => {
            print_pool(controller);
            Ok(())
        }
        "state" => {
            print_state(controller);
            Ok(())
        }
        other => {
            println!("unknown command {:?}", other);
            Ok(())
        }
    };

    if let Err(e) = result {
        println!("error: {}", e);
    }
    true
}

fn print_outcome(controller: &Terminal, outcome: RollOutcome) {
    match outcome {
        RollOutcome::Settled(ordinal) => {
            let text = controller
                .state()
                .and_then(|s| s.item(ordinal))
                .map(|item| item.text)
                .unwrap_or_default();
            println!("drew #{}: {}", ordinal, text);
        }
        RollOutcome::NothingAvailable => println!("nothing left to draw"),
        RollOutcome::AlreadyRolling => println!("already rolling"),
        RollOutcome::Spinning => {}
    }
}

fn print_pool(controller: &Terminal) {
    let Some(state) = controller.state() else {
        println!("not in a room");
        return;
    };
    let me = controller.participant();

    for item in state.pool() {
        let current = if state.current_ordinal() == Some(item.ordinal) { '*' } else { ' ' };
        let excluded = if state.is_excluded_by(item.ordinal, me) { 'x' } else { ' ' };
        let drawn_by: Vec<&str> = state
            .claimants(item.ordinal)
            .into_iter()
            .map(|p| state.display_name(p).unwrap_or(p.as_str()))
            .collect();

        print!("{}{} #{:<3} [{}] {}", current, excluded, item.ordinal, item.category, item.text);
        if !drawn_by.is_empty() {
            print!("  (drawn by {})", drawn_by.join(", "));
        }
        println!();
    }
}

fn print_state(controller: &Terminal) {
    match (controller.room(), controller.state()) {
        (Some(room), Some(state)) => {
            println!(
                "room {} as {} | {} items | current {:?} | {} | digest {}",
                room,
                controller.display_name(),
                state.pool_len(),
                state.current_ordinal(),
                if controller.is_subscribed() { "synced" } else { "local-only" },
                short_hex(&state.digest()),
            );
        }
        _ => println!("not in a room"),
    }
}

fn report(controller: &Terminal, handled: &HandledEvent) {
    match handled {
        HandledEvent::Applied(SyncMessage::Roll(p)) => {
            let name = controller
                .state()
                .and_then(|s| s.display_name(&p.id))
                .unwrap_or(p.id.as_str())
                .to_string();
            println!("{} drew #{}", name, p.ordinal);
        }
        HandledEvent::Applied(SyncMessage::AddQuestion(p)) => println!("new item: {}", p.text),
        HandledEvent::Applied(SyncMessage::Reset(_)) => println!("room was reset"),
        HandledEvent::Closed => println!("relay connection lost, continuing offline"),
        _ => {}
    }
}

// =============================================================================
// DEMO
// =============================================================================

type DemoPeer = SessionController<LocalRelay, MemoryCache>;

fn demo_peer(hub: &LocalHub, catalog: &Arc<Catalog>, id: &str, name: &str, seed: u64) -> DemoPeer {
    let config = SessionConfig {
        participant_id: Some(room_draw::ParticipantId::new(id)),
        default_name: name.to_string(),
        ..SessionConfig::from_env()
    };
    SessionController::new(hub.connect(), MemoryCache::new(), catalog.clone(), config)
        .with_draw_engine(DrawEngine::new(DrawRng::new(seed)))
}

fn pump(peers: &mut [&mut DemoPeer]) {
    loop {
        let mut idle = true;
        for peer in peers.iter_mut() {
            if !peer.poll().is_empty() {
                idle = false;
            }
        }
        if idle {
            return;
        }
    }
}

fn log_digests(step: &str, x: &DemoPeer, y: &DemoPeer) {
    let hex = |peer: &DemoPeer| peer.digest().map(|d| short_hex(&d)).unwrap_or_default();
    info!("{}: x={} y={}", step, hex(x), hex(y));
}

fn demo(catalog: Catalog) -> anyhow::Result<()> {
    info!("=== Starting Demo Room ===");
    let catalog = Arc::new(catalog);
    let hub = LocalHub::new();

    let mut x = demo_peer(&hub, &catalog, "demo-x", "Xena", 1);
    let mut y = demo_peer(&hub, &catalog, "demo-y", "Yuri", 2);

    x.join("DEMO")?;
    pump(&mut [&mut x]);
    if let RollOutcome::Settled(ordinal) = x.roll()? {
        info!("Xena drew #{}", ordinal);
    }

    y.join("DEMO")?;
    pump(&mut [&mut x, &mut y]);
    log_digests("Late join", &x, &y);

    let ordinal = x.add_item("What made you laugh this week?")?;
    pump(&mut [&mut x, &mut y]);
    info!(
        "Custom item #{} seen by Yuri: {}",
        ordinal,
        y.state().and_then(|s| s.item(ordinal)).is_some()
    );

    x.set_excluded(1, true)?;
    y.set_excluded(1, true)?;
    pump(&mut [&mut x, &mut y]);
    log_digests("Concurrent excludes", &x, &y);

    info!("Removing fixed #2: {}", y.remove_item(2)?);

    if let RollOutcome::Settled(ordinal) = y.roll()? {
        info!("Yuri drew #{}", ordinal);
    }
    pump(&mut [&mut x, &mut y]);
    log_digests("Final", &x, &y);

    if x.digest() == y.digest() {
        info!("CONVERGED: digests match");
    } else {
        warn!("DIVERGED: digests differ");
    }
    if let Some(cached) = x.cache().get("claimedBy:DEMO") {
        info!("Xena's cached claims: {}", cached);
    }

    Ok(())
}
