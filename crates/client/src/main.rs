mod chat;
mod config;

use std::io::{self, BufRead};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

use anyhow::{Result, bail};
use clap::Parser;

use chat::ChatClient;
use config::ClientConfig;

#[derive(Parser)]
#[command(name = "skein-client")]
#[command(about = "Chat client for a skein relay")]
struct Args {
    #[arg(short, long, help = "Server host, found by discovery when omitted")]
    server: Option<String>,

    #[arg(short, long, default_value_t = skein::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value = "player")]
    name: String,

    #[arg(long, default_value_t = skein::DEFAULT_PING_PORT)]
    ping_port: u16,

    #[arg(long, help = "List servers on the local network and exit")]
    discover: bool,

    #[arg(long, default_value_t = 0.0, help = "Simulated latency in seconds")]
    fake_lag: f64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut config = ClientConfig {
        name: args.name.clone(),
        ping_port: args.ping_port,
        ..Default::default()
    };
    config.transport.fake_lag = args.fake_lag.max(0.0);

    skein::initialize_system();
    let result = run(args, config);
    skein::close_system();

    result
}

fn run(args: Args, config: ClientConfig) -> Result<()> {
    let mut client = ChatClient::new(config)?;

    if args.discover || args.server.is_none() {
        let servers = client.discover();
        if args.discover {
            return Ok(());
        }

        let Some(server) = servers.first() else {
            bail!("no server given and none answered discovery");
        };
        let host = server.address.ip().to_string();
        client.connect(&host, server.address.port)?;
    } else if let Some(host) = &args.server {
        client.connect(host, args.port)?;
    }

    let lines = spawn_stdin_reader();
    let tick = client.tick_duration();
    let mut quitting = false;

    while client.tick_once() {
        if !quitting {
            quitting = forward_lines(&mut client, &lines);
            if quitting {
                client.quit();
            }
        }
        thread::sleep(tick);
    }

    Ok(())
}

fn spawn_stdin_reader() -> Receiver<String> {
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if sender.send(line).is_err() {
                break;
            }
        }
    });
    receiver
}

/// Returns `true` when the user asked to leave or stdin closed.
fn forward_lines(client: &mut ChatClient, lines: &Receiver<String>) -> bool {
    loop {
        match lines.try_recv() {
            Ok(line) => {
                let line = line.trim();
                if line == "/quit" {
                    return true;
                }
                if !line.is_empty() {
                    client.say(line);
                }
            }
            Err(TryRecvError::Empty) => return false,
            Err(TryRecvError::Disconnected) => return true,
        }
    }
}
