mod config;
mod server;

use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use config::ServerConfig;
use server::RelayServer;

#[derive(Parser)]
#[command(name = "skein-server")]
#[command(about = "Chat relay over the skein transport")]
struct Args {
    #[arg(short, long, default_value_t = skein::DEFAULT_PORT)]
    port: u16,

    #[arg(long, default_value_t = skein::DEFAULT_PING_PORT)]
    ping_port: u16,

    #[arg(short, long, default_value_t = 32)]
    max_peers: usize,

    #[arg(short, long, default_value_t = 60)]
    tick_rate: u32,

    #[arg(short, long, default_value = "skein relay")]
    name: String,

    #[arg(long, default_value_t = 0.0, help = "Simulated latency in seconds")]
    fake_lag: f64,

    #[arg(long, default_value_t = 20.0, help = "Broadcast flushes per second")]
    send_rate: f64,

    #[arg(long, help = "Shut down after this many seconds")]
    run_for: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut config = ServerConfig {
        name: args.name,
        port: args.port,
        ping_port: args.ping_port,
        max_peers: args.max_peers,
        tick_rate: args.tick_rate,
        ..Default::default()
    };
    config.transport.fake_lag = args.fake_lag.max(0.0);
    if args.send_rate > 0.0 {
        config.transport.update_period = 1.0 / args.send_rate;
    }

    skein::initialize_system();
    let result = run(config, args.run_for);
    skein::close_system();

    result
}

fn run(config: ServerConfig, run_for: Option<u64>) -> Result<()> {
    let mut server = RelayServer::new(config)?;
    log::info!("Server started on port {}", server.listen_port());

    if let Some(seconds) = run_for {
        let running = server.running();
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(seconds));
            running.store(false, Ordering::SeqCst);
        });
    }

    server.run();
    Ok(())
}
