use std::time::Duration;

use memwatch::prelude::*;
use tracing_subscriber::EnvFilter;

/// Watches host memory and prints every Low/Normal transition.
///
/// Optional arguments: `<memory_low_trigger> <interval_ms>`. Set `RUST_LOG=memwatch=debug` to see every cycle.
#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let mut args = std::env::args().skip(1);
    let config = MonitorConfig {
        memory_low_trigger: args.next().map(|a| a.parse()).transpose()?.unwrap_or(0.20),
        interval_ms: args.next().map(|a| a.parse()).transpose()?.unwrap_or(1000),
        ..MonitorConfig::default()
    };
    config.validate()?;

    println!("memwatch - Memory Watch Example");
    println!("Low when less than {:.0}% is available. Press Ctrl+C to exit\n", config.memory_low_trigger * 100.0);

    let engine = MonitorEngine::from_config(&config, SystemSampler::new())?;
    engine.on_event(|event: &MonitorEvent| {
        match event {
            MonitorEvent::MemoryLow(snapshot) => println!("LOW     {}", snapshot),
            MonitorEvent::MemoryNormal(snapshot) => println!("NORMAL  {}", snapshot),
            MonitorEvent::Error(error) => eprintln!("monitor stopped: {}", error),
            _ => {},
        }
        Ok(())
    });

    engine.start();
    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => match engine.last_snapshot() {
                Ok(snapshot) => println!("        {}", snapshot),
                Err(Error::NoSnapshot) => {},
                Err(e) => {
                    eprintln!("{}", e);
                    break;
                },
            },
        }
    }

    engine.stop();
    Ok(())
}
