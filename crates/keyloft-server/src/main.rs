use std::sync::Arc;
use std::time::Duration;

use rand::rngs::OsRng;
use tokio::net::TcpListener;

use keyloft_crypto::keys::SYM_KEY_LEN;
use keyloft_crypto::Keypair;
use keyloft_server::{
    AcceptAll, DenyList, Engine, EngineOptions, MemoryStorage, Restrictor, ServerConfig,
};

/// Command-line arguments for the server daemon.
struct Args {
    config_path: Option<String>,
    listen_addr: Option<String>,
}

fn parse_args() -> Args {
    let mut args = std::env::args().skip(1);
    let mut config_path = None;
    let mut listen_addr = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config_path = args.next(),
            "--listen" => listen_addr = args.next(),
            _ => {}
        }
    }

    Args {
        config_path,
        listen_addr,
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    tracing::info!("keyloft-server starting");

    let args = parse_args();
    let mut config = match args.config_path {
        Some(path) => match ServerConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(error = %e, "failed to load config");
                std::process::exit(1);
            }
        },
        None => ServerConfig::default(),
    };
    if let Some(listen_addr) = args.listen_addr {
        config.listen_addr = listen_addr;
    }

    let keypair = match load_keypair(&config) {
        Ok(keypair) => keypair,
        Err(e) => {
            tracing::error!(error = %e, "failed to load server key");
            std::process::exit(1);
        }
    };

    let restrictor: Box<dyn Restrictor> = if config.deny.is_empty() {
        Box::new(AcceptAll)
    } else {
        Box::new(DenyList::new(config.deny.clone()))
    };

    let options = EngineOptions {
        identity: config.identity.clone(),
        phi: config.listen_addr.as_bytes().to_vec(),
        fragment_prefix: config.fragment_prefix.clone(),
        max_fragment_len: config.max_fragment_len,
        instance_tag: config.instance_tag,
    };
    let engine = Arc::new(Engine::new(
        options,
        keypair,
        Box::new(MemoryStorage::new()),
        restrictor,
        Box::new(OsRng),
    ));

    tracing::info!(
        identity = %config.identity,
        fingerprint = %engine.fingerprint(),
        "server key loaded"
    );

    // Periodic expiry sweep: sessions, fragment contexts, stored profiles.
    let sweep_engine = Arc::clone(&engine);
    let session_timeout = Duration::from_secs(config.session_timeout_secs);
    let fragment_timeout = Duration::from_secs(config.fragment_timeout_secs);
    let cleanup_interval = Duration::from_secs(config.cleanup_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cleanup_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = sweep_engine.cleanup(session_timeout, fragment_timeout) {
                tracing::warn!(error = %e, "cleanup sweep failed");
            }
        }
    });

    let listener = match TcpListener::bind(&config.listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %config.listen_addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };
    tracing::info!(addr = %config.listen_addr, "keyloft-server ready");

    let serve_engine = Arc::clone(&engine);
    tokio::spawn(async move {
        keyloft_server::transport::serve(listener, serve_engine).await;
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to wait for shutdown signal");
    }
    tracing::info!("keyloft-server shutting down");
}

/// Load the long-term key from the configured seed, or generate one.
fn load_keypair(config: &ServerConfig) -> Result<Keypair, String> {
    match &config.key_seed_hex {
        Some(seed_hex) => {
            let bytes = hex::decode(seed_hex).map_err(|e| format!("invalid key seed hex: {e}"))?;
            let seed: [u8; SYM_KEY_LEN] = bytes
                .try_into()
                .map_err(|_| format!("key seed must be {SYM_KEY_LEN} bytes"))?;
            Ok(Keypair::from_symmetric_key(seed))
        }
        None => {
            tracing::warn!("no key seed configured — generating an ephemeral server key");
            Ok(Keypair::generate(&mut OsRng))
        }
    }
}
