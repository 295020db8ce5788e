use std::process;

use log::{error, info};
use prometheus::Registry;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use netloss::transport::IcmpSocket;
use netloss::{server, Aggregator, Config, Error, Prober, PrometheusSink, Result, Target};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Every way out of `run` is fatal: let the supervisor restart us.
    if let Err(e) = run().await {
        error!("{}. PROGRAM EXIT", e);
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            return Err(Error::Config(e.to_string()));
        }
    }
    let config = Config::load()?;
    let mut targets = Vec::with_capacity(config.targets.len());
    for host in &config.targets {
        targets.push(Target::resolve(host).await?);
    }

    let registry = Registry::new();
    let sink = PrometheusSink::register(&registry)?;
    let (addr, server) = server::bind(config.listen, registry)?;
    info!("serving metrics on http://{}/metrics", addr);

    let (tx, rx) = mpsc::channel(config.queue_capacity);
    let aggregator = Aggregator::new(
        targets.iter().map(|target| target.name().clone()),
        config.resolution,
        sink,
    );

    let mut probers = JoinSet::new();
    for target in targets {
        info!("opening icmp socket for {}", target);
        let socket = IcmpSocket::open(target.addr(), config.socket, config.ttl)?;
        let prober = Prober::new(target, socket, config.prober(), tx.clone());
        probers.spawn(prober.run());
    }
    drop(tx);
    tokio::spawn(aggregator.run(rx));

    tokio::select! {
        _ = server => Err(Error::ServerStopped),
        Some(res) = probers.join_next() => match res? {
            Ok(never) => match never {},
            Err(e) => Err(e),
        },
    }
}
