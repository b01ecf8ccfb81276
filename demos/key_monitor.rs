//! Print the name, System ID and key presses of every nearby key input device
//!
//! Run with: cargo run --example key_monitor

use key_input_gatt::{AdapterConfig, GattSession, Result, SessionConfig};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("key_input_gatt=info".parse().unwrap()),
        )
        .init();

    let adapter = AdapterConfig::default().with_scan_duration(Duration::from_secs(5));
    let session = GattSession::with_btleplug(adapter, SessionConfig::default()).await?;

    let mut events = session.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(line) = event.console_line() {
                        println!("{}", line);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    eprintln!("(skipped {} events)", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let token = CancellationToken::new();
    let stop = token.clone();
    tokio::spawn(async move {
        let mut stdin = BufReader::new(tokio::io::stdin()).lines();
        tokio::select! {
            _ = stdin.next_line() => {}
            _ = tokio::signal::ctrl_c() => {}
        }
        stop.cancel();
    });

    println!("Scanning for key input devices...");
    println!("Press Enter or Ctrl+C to exit.\n");

    let result = session.run(token).await;

    // Dropping the session closes the event channel so the printer drains and exits
    drop(session);
    let _ = printer.await;
    result?;

    println!("\nDone!");

    Ok(())
}
