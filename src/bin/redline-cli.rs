use std::io::{self, BufRead, Write};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use redline::cli::{CliAction, format_reply, parse_line};
use redline::{Client, Config, PooledConnection, RedlineResult};

#[tokio::main]
async fn main() -> io::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = Config::from_args(&args);

    // RUST_LOG wins over --loglevel. Logs go to stderr, replies to stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.loglevel)),
        )
        .with_writer(io::stderr)
        .init();

    let addr = config.addr();
    let client = Client::new(config);

    // One lease for the whole session so MULTI and WATCH span lines.
    let mut lease = match client.pool().acquire().await {
        Ok(conn) => Some(conn),
        Err(e) => {
            eprintln!("Could not connect to {addr}: {e}");
            std::process::exit(1);
        }
    };
    info!("Connected to {addr}");

    let stdin = io::stdin();
    let mut reader = stdin.lock();

    loop {
        print!("redline> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break; // EOF
        }

        let action = match parse_line(&line) {
            Ok(action) => action,
            Err(e) => {
                println!("(error) {e}");
                continue;
            }
        };

        match action {
            CliAction::Skip => continue,
            CliAction::Quit => break,
            CliAction::Subscribe { patterns, targets } => {
                if let Err(e) = stream_messages(&client, patterns, &targets).await {
                    println!("(error) {e}");
                }
            }
            CliAction::Command(tokens) => {
                let conn = match ensure_lease(&client, &mut lease).await {
                    Ok(conn) => conn,
                    Err(e) => {
                        println!("(error) {e}");
                        continue;
                    }
                };
                match conn.execute(&tokens).await {
                    Ok(reply) => print!("{}", format_reply(&reply)),
                    Err(e) => println!("(error) {e}"),
                }
            }
        }
    }

    Ok(())
}

/// Returns the session's connection, replacing it first if it broke.
async fn ensure_lease<'a>(
    client: &Client,
    lease: &'a mut Option<PooledConnection>,
) -> RedlineResult<&'a mut PooledConnection> {
    let conn = match lease.take() {
        Some(conn) if !conn.is_broken() => conn,
        broken => {
            // Drop the broken lease first so its slot is free for the new one.
            if broken.is_some() {
                eprintln!("Connection lost, reconnecting...");
            }
            drop(broken);
            client.pool().acquire().await?
        }
    };
    Ok(lease.insert(conn))
}

/// Prints push frames until Ctrl-C. The subscribed connection is closed
/// afterwards; the session lease is untouched.
async fn stream_messages(client: &Client, patterns: bool, targets: &[String]) -> RedlineResult<()> {
    let mut pubsub = client.pubsub().await?;
    if patterns {
        pubsub.psubscribe(targets).await?;
    } else {
        pubsub.subscribe(targets).await?;
    }
    eprintln!("Reading messages... (press Ctrl-C to quit)");

    loop {
        tokio::select! {
            message = pubsub.receive() => print!("{}", message?),
            _ = tokio::signal::ctrl_c() => {
                debug!("Leaving subscribe mode");
                break;
            }
        }
    }

    pubsub.close();
    Ok(())
}
