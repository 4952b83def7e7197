use clap::{Args as ClapArgs, Parser, Subcommand};
use prique::{Config, CycleEvent, CycleExit, Item, QueueClient, QueueCycle};
use std::ops::ControlFlow;
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Store address
    #[arg(short, long, default_value = "127.0.0.1:6379")]
    addr: String,

    /// Queue name
    #[arg(short, long, default_value = "prique")]
    queue: String,

    /// Config file path (overrides address, queue and scripts)
    #[arg(short, long)]
    config: Option<String>,

    #[command(flatten)]
    scripts: ScriptArgs,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(ClapArgs, Debug)]
struct ScriptArgs {
    /// SHA1 of the loaded enqueue script
    #[arg(long)]
    enqueue_sha1: Option<String>,
    /// Path of the enqueue script, sent inline
    #[arg(long)]
    enqueue_path: Option<PathBuf>,
    /// SHA1 of the loaded dequeue script
    #[arg(long)]
    dequeue_sha1: Option<String>,
    /// Path of the dequeue script, sent inline
    #[arg(long)]
    dequeue_path: Option<PathBuf>,
    /// SHA1 of the loaded length script
    #[arg(long)]
    len_sha1: Option<String>,
    /// Path of the length script, sent inline
    #[arg(long)]
    len_path: Option<PathBuf>,
    /// SHA1 of the loaded remove script
    #[arg(long)]
    remove_sha1: Option<String>,
    /// Path of the remove script, sent inline
    #[arg(long)]
    remove_path: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Push one item
    Push {
        priority: u32,
        value: String,
        /// Expiry passed through to the enqueue script
        #[arg(short, long, default_value_t = 0)]
        expire: u32,
    },
    /// Pop one item without blocking
    Pop,
    /// Wait for an item, then pop it
    Bpop {
        /// Seconds to wait, 0 waits forever
        #[arg(short, long, default_value_t = 0)]
        timeout: u32,
    },
    /// Print the queue length
    Len,
    /// Remove the queue
    Remove,
    /// Pipeline `count` pushes of `msg-<i>` with priority `i % 10`
    Produce {
        #[arg(short = 'n', long, default_value_t = 100)]
        count: u32,
    },
    /// Consume items as they arrive until stopped
    Consume {
        /// Stop after this many items
        #[arg(short = 'n', long)]
        count: Option<u64>,
    },
}

fn build_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config {
            addr: args.addr.clone(),
            queue: args.queue.clone(),
            log_level: args.log_level.clone(),
            ..Default::default()
        },
    };

    let s = &args.scripts;
    let overrides = [
        (&mut config.scripts.enqueue, &s.enqueue_sha1, &s.enqueue_path),
        (&mut config.scripts.dequeue, &s.dequeue_sha1, &s.dequeue_path),
        (&mut config.scripts.len, &s.len_sha1, &s.len_path),
        (&mut config.scripts.remove, &s.remove_sha1, &s.remove_path),
    ];
    for (source, sha1, path) in overrides {
        if sha1.is_some() || path.is_some() {
            source.sha1 = sha1.clone();
            source.path = path.clone();
        }
    }

    config.validate()?;
    Ok(config)
}

fn print_payload(payload: Option<bytes::Bytes>) {
    match payload {
        Some(data) => println!("{}", String::from_utf8_lossy(&data)),
        None => println!("(empty)"),
    }
}

fn consume(config: &Config, count: Option<u64>) -> anyhow::Result<()> {
    let mut cycle = QueueCycle::connect(config)?;

    let stopper = cycle.stopper();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal, stopping consumer...");
        if let Err(e) = stopper.stop() {
            error!("Failed to wake consumer: {}", e);
        }
    })?;

    let mut consumed = 0u64;
    let exit = cycle.run(|event| {
        match event {
            CycleEvent::Popped(item) => {
                consumed += 1;
                println!("{}", String::from_utf8_lossy(&item));
            }
            CycleEvent::Failed { state, message } => warn!("{:?}: {}", state, message),
            CycleEvent::Signalled | CycleEvent::Empty => {}
        }
        match count {
            Some(limit) if consumed >= limit => ControlFlow::Break(()),
            _ => ControlFlow::Continue(()),
        }
    })?;

    let stats = cycle.stats();
    info!(
        "Consumer finished ({:?}): {} waits, {} pops, {} items",
        exit, stats.waits, stats.pops, stats.items
    );
    if exit == CycleExit::Disconnected {
        warn!("Store closed the connection");
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let log_level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };
    tracing_subscriber::fmt()
        .with_env_filter(format!("prique={}", log_level))
        .with_writer(std::io::stderr)
        .init();

    let config = build_config(&args)?;
    info!(
        "prique v{} using {} on {}",
        env!("CARGO_PKG_VERSION"),
        config.queue,
        config.addr
    );

    if let Command::Consume { count } = args.command {
        return consume(&config, count);
    }

    let mut client = QueueClient::connect(&config)?;
    match args.command {
        Command::Push {
            priority,
            value,
            expire,
        } => {
            client.push(priority, expire, value.as_bytes())?;
            println!("OK");
        }
        Command::Pop => print_payload(client.pop()?),
        Command::Bpop { timeout } => print_payload(client.bpop(timeout)?),
        Command::Len => println!("{}", client.len()?),
        Command::Remove => println!("{}", client.remove()?),
        Command::Produce { count } => {
            let items: Vec<Item> = (0..count)
                .map(|i| Item::new(i % 10, 0, format!("msg-{}", i)))
                .collect();
            let results = client.push_batch(&items)?;
            let failed = results.iter().filter(|r| r.is_err()).count();
            if let Some(Err(e)) = results.iter().find(|r| r.is_err()) {
                error!("First failed push: {}", e);
            }
            println!("pushed {} of {}", results.len() - failed, results.len());
        }
        Command::Consume { .. } => {}
    }

    Ok(())
}
