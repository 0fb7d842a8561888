//! Context Translator server entry point
//!
//! # Usage
//!
//! ```bash
//! context-translator
//! context-translator --port 9000 --no-context
//! context-translator --config config/translator.toml --backend http
//! ```

use clap::Parser;

use context_translator::translator::backend;
use context_translator::{logging, Args, Config, SessionServer, TranslatorHandle};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.write_default_config {
        Config::default().save_to(&args.config)?;
        println!("Wrote default configuration to {}", args.config.display());
        return Ok(());
    }

    let (mut config, created) = Config::load_or_create(&args.config)?;
    args.apply(&mut config)?;

    logging::init(&config.logging)?;
    if created {
        tracing::info!("Wrote default configuration to {}", args.config.display());
    } else {
        tracing::info!("Loaded configuration from {}", args.config.display());
    }

    let translation = config.translation.clone();
    let translator = TranslatorHandle::spawn(move || backend::from_config(&translation))?;
    if !translator.is_ready() {
        tracing::warn!("Translator backend reports not ready; requests may fail");
    }

    let server = SessionServer::bind(config, translator).await?;
    let handle = server.handle();

    // Ctrl-C triggers a graceful shutdown
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Interrupt received, shutting down");
                handle.shutdown().await;
            }
            Err(e) => tracing::error!("Failed to listen for interrupt: {}", e),
        }
    });

    server.run().await?;
    Ok(())
}
