use anyhow::{anyhow, bail, Context};
use huddle::testing::SyntheticDevices;
use huddle::{
    CallState, ChatSession, Collaborators, HuddleConfig, LocalHub, LogUi, Route, SignalRouter,
    WebRtcConnector,
};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    huddle::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: huddle-cli <init-config|check-config|decode|loopback> [args]");
        std::process::exit(1);
    }

    let command = &args[1];
    match command.as_str() {
        "init-config" => cmd_init_config(&args),
        "check-config" => cmd_check_config(&args),
        "decode" => cmd_decode(&args),
        "loopback" => cmd_loopback(&args).await,
        _ => {
            eprintln!("Unknown command: {}", command);
            std::process::exit(1);
        }
    }
}

fn config_path(args: &[String]) -> PathBuf {
    args.get(2)
        .map(PathBuf::from)
        .unwrap_or_else(HuddleConfig::default_path)
}

fn cmd_init_config(args: &[String]) -> anyhow::Result<()> {
    let path = config_path(args);
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    HuddleConfig::default().save_to_file(&path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

fn cmd_check_config(args: &[String]) -> anyhow::Result<()> {
    let path = config_path(args);
    let config = HuddleConfig::load_layered(&path)
        .with_context(|| format!("loading {}", path.display()))?;
    config.validate().map_err(|e| anyhow!(e))?;

    println!("Configuration OK");
    println!("  channel:    {}", config.chat.default_channel);
    println!("  heartbeat:  {}s", config.transport.heartbeat_interval_secs);
    println!("  ice:        {} server(s), {:?}", config.ice.ice_servers.len(), config.ice.ice_transport_policy);
    println!("  media:      audio={} video={}", config.media.audio, config.media.video);
    Ok(())
}

fn cmd_decode(args: &[String]) -> anyhow::Result<()> {
    // decode <json> [--sender <id>] [--me <id>]
    let mut payload = None;
    let mut sender = "remote".to_string();
    let mut me = "me".to_string();

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--sender" => {
                i += 1;
                sender = args.get(i).cloned().context("--sender needs a value")?;
            }
            "--me" => {
                i += 1;
                me = args.get(i).cloned().context("--me needs a value")?;
            }
            other => payload = Some(other.to_string()),
        }
        i += 1;
    }

    let payload = payload.context("usage: huddle-cli decode <json> [--sender <id>] [--me <id>]")?;
    let value: serde_json::Value = serde_json::from_str(&payload).context("payload is not JSON")?;

    match SignalRouter::new(me).route_value(&value, "cli", &sender) {
        Route::Chat { from, text } => println!("chat from {}: {}", from, text),
        Route::Call(route) => {
            println!("{} from {}", route.kind, route.sender);
            if let Some(surface) = route.surface {
                println!("  surface: {:?}", surface);
            }
            match route.signal {
                Some(signal) => println!("  signal:  {:?}", signal),
                None => println!("  self-echo, not forwarded"),
            }
        }
        Route::Ignored { reason } => println!("ignored: {}", reason),
    }
    Ok(())
}

/// Two in-process clients on one hub; alice calls bob.
async fn cmd_loopback(args: &[String]) -> anyhow::Result<()> {
    let decline = args.iter().any(|a| a == "--decline");
    let config = HuddleConfig::load_or_default();
    config.validate().map_err(|e| anyhow!(e))?;

    let hub = LocalHub::new();
    let join = |id: &str, answer: bool| {
        let collab = Collaborators {
            transport: Arc::new(hub.connect_as(id)),
            ui: Arc::new(LogUi::new(id, answer)),
            media: Arc::new(SyntheticDevices::new()),
            connector: Arc::new(WebRtcConnector),
        };
        ChatSession::join(collab, config.join_options(Some("loopback")))
    };

    let mut alice = join("alice", true).await?;
    let mut bob = join("bob", !decline).await?;
    alice.settle().await;

    alice.send_chat("ringing you now").await?;
    alice.request_call().await?;

    // Settle both sides in turn so each event is handled to completion.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    let mut settled = false;
    while !settled && tokio::time::Instant::now() < deadline {
        alice.settle().await;
        bob.settle().await;
        settled = match (alice.call_state(), bob.call_state()) {
            (CallState::Connected, CallState::Connected) => true,
            (CallState::Closed, _) | (_, CallState::Closed) => true,
            _ => false,
        };
        if !settled {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    if !settled {
        println!("Timed out waiting for the call to settle");
    }
    alice.settle().await;
    bob.settle().await;
    println!("alice: {}", alice.call_state());
    println!("bob:   {}", bob.call_state());

    alice.leave().await?;
    bob.leave().await?;
    Ok(())
}
