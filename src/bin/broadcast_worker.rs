use std::io::Write;

use discord_broadcaster::environment::{self, CHECK_ENV_FLAG};
use discord_broadcaster::errors::AppResult;
use discord_broadcaster::protocol::DeliverySettings;
use discord_broadcaster::worker::{self, DeliveryWorker, DiscordClient, LineWriterSink, Platform};

fn connect(settings: &DeliverySettings) -> AppResult<Box<dyn Platform>> {
    Ok(Box::new(DiscordClient::new(settings)?))
}

#[tokio::main]
async fn main() {
    // stderr is the diagnostic stream; stdout carries only progress events.
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Warn)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .init();

    if std::env::args().skip(1).any(|arg| arg == CHECK_ENV_FLAG) {
        let report = environment::probe_local();
        match serde_json::to_string(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Failed to encode environment report: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    let stdout = std::io::stdout();
    let mut delivery = DeliveryWorker::new(LineWriterSink::new(stdout.lock()));

    let result = delivery.run(tokio::io::stdin(), Box::new(connect)).await;

    if let Err(e) = result {
        let mut stderr = std::io::stderr();
        let _ = writeln!(stderr, "{}", e);
        let _ = stderr.flush();
        std::process::exit(worker::exit_code(&e));
    }
}
