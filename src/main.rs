use std::{
    process,
    sync::{Arc, OnceLock},
};

use gatelog::{
    config::Config,
    core::{
        checkpoint::{AutoCheckpoint, Checkpoint, ConsoleCheckpoint},
        read_store,
        registry::InMemoryRegistry,
        session::{Collaborators, Session},
        sink::CsvMessageLogger,
        transport::MqttGatewayTransport,
    },
    logger::LoggerManager,
    print_error,
};
use gatelog_mqtt::{CredentialProvider, StaticCredentials};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

static CONFIG: OnceLock<Config> = OnceLock::new();

pub fn config() -> &'static Config {
    CONFIG.get_or_init(|| {
        Config::new().unwrap_or_else(|e| {
            print_error!("{}", e);
            process::exit(1);
        })
    })
}

#[tokio::main]
async fn main() {
    let cfg = config();
    let logger_manager = LoggerManager::new(cfg.logger.clone()).unwrap_or_else(|e| {
        print_error!("Failed to setup Log Manager: {}", e);
        process::exit(1);
    });
    logger_manager.init().unwrap_or_else(|e| {
        print_error!("Failed to init Log Manager: {}", e);
        process::exit(1);
    });
    info!("Starting gatelog version {}...", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", cfg.logger.level);
    debug!(host = %cfg.transport.host, port = cfg.transport.port, "Transport configured");

    let credentials: Arc<dyn CredentialProvider> =
        match StaticCredentials::from_config(&cfg.transport.credentials) {
            Ok(credentials) => Arc::new(credentials),
            Err(e) => {
                error!("Failed to load bridge credentials: {}", e);
                process::exit(1);
            }
        };

    let store = Arc::new(CsvMessageLogger::new(&cfg.store.log_path));
    info!("Recording messages to {}", store.path().display());

    warn!("No cloud registry client configured, registry operations are simulated in memory");
    let registry = Arc::new(InMemoryRegistry::new());

    let transport = Arc::new(MqttGatewayTransport::new(
        cfg.transport.clone(),
        cfg.session.gateway_identity(),
        credentials,
    ));

    let checkpoint: Arc<dyn Checkpoint> = if cfg.session.interactive {
        Arc::new(ConsoleCheckpoint)
    } else {
        Arc::new(AutoCheckpoint::new())
    };

    let cancel = CancellationToken::new();
    let session = Session::new(
        &cfg.session,
        Collaborators {
            registry,
            transport,
            sink: store.clone(),
            checkpoint,
        },
        cancel.clone(),
    );

    let run = session.run();
    tokio::pin!(run);

    let finished = tokio::select! {
        result = &mut run => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    let result = match finished {
        Some(result) => result,
        None => {
            info!("Received Ctrl+C, cancelling session...");
            cancel.cancel();
            // the session still rolls back what it created
            run.await
        }
    };

    match result {
        Ok(report) => {
            info!(
                "Session finished in {:.1}s: {} messages recorded, {} published",
                report.elapsed.as_secs_f64(),
                report.messages_recorded,
                report.messages_published
            );
            match read_store(store.path()) {
                Ok(contents) => info!(
                    "{} holds {} messages",
                    store.path().display(),
                    contents.records.len()
                ),
                Err(e) => debug!("Message store not readable: {}", e),
            }
        }
        Err(e) => {
            error!("Session failed: {}", e);
            process::exit(1);
        }
    }
}
