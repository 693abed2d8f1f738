use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use companion_core::{
    Collaborators, Geolocator, Orchestrator, OrchestratorConfig, Personality, SessionEvent,
};
use companion_service::audio_io::{CpalMicrophone, CpalOutputFactory};
use companion_service::config::Config;
use companion_service::console::{Action, ConsoleObserver};
use companion_service::gemini_adapter::GeminiConnector;
use companion_service::location::FixedLocation;
use companion_service::personality_store::{export_personality, load_personality};
use companion_service::tools_adapter::GeminiTools;
use companion_service::upload::load_upload;
use secrecy::ExposeSecret;
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(version, about = "Talk to Roboshin over the Gemini Live API")]
struct Cli {
    /// Name of the microphone to use (see --list-devices)
    #[arg(long)]
    input_device: Option<String>,
    /// Name of the speaker to use (see --list-devices)
    #[arg(long)]
    output_device: Option<String>,
    /// Print the audio devices and exit
    #[arg(long)]
    list_devices: bool,
    /// Send this file into the conversation once the session is up
    #[arg(long, value_name = "FILE")]
    upload: Option<PathBuf>,
    /// Start from a personality exported earlier
    #[arg(long, value_name = "FILE")]
    personality: Option<PathBuf>,
    /// Where `exportKnowledge` writes the personality
    #[arg(long, value_name = "FILE", default_value = "personality.json")]
    export_to: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Parse Command-Line Arguments ---
    let args = Cli::parse();
    if args.list_devices {
        println!("Inputs:\n{}", companion_native_utils::device::get_available_inputs()?);
        println!("Outputs:\n{}", companion_native_utils::device::get_available_outputs()?);
        return Ok(());
    }

    // --- 2. Load Configuration ---
    let config = Config::from_env().context("Failed to load application configuration")?;

    // --- 3. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    tracing::info!("Configuration loaded successfully. Starting companion service...");

    // --- 4. Load Personality ---
    let base_personality = Personality {
        voice: config.voice.clone(),
        creator_name: config.creator_name.clone(),
        ..Personality::default()
    };
    let personality = match &args.personality {
        Some(path) => load_personality(path)?,
        None => base_personality.clone(),
    };
    tracing::info!(
        "Personality: voice={} facts={}",
        personality.voice,
        personality.learned_facts.len()
    );

    // --- 5. Initialize API Clients ---
    let api_config = gemini_live::Config::builder()
        .with_api_key(config.api_key.expose_secret())
        .with_model(&config.live_model)
        .build();
    let geolocator = config
        .location
        .map(|at| Arc::new(FixedLocation::new(at)) as Arc<dyn Geolocator>);
    if geolocator.is_none() {
        tracing::info!("No location configured, map searches are not located");
    }

    let collaborators = Collaborators {
        connector: Arc::new(GeminiConnector::new(&config.api_key)),
        microphone: Arc::new(CpalMicrophone::new(args.input_device.clone())),
        output: Arc::new(CpalOutputFactory::new(args.output_device.clone())),
        remote: Arc::new(GeminiTools::new(
            &api_config,
            &config.tool_model,
            &config.image_model,
        )),
        geolocator,
    };
    let orchestrator_config = OrchestratorConfig {
        model: config.live_model.clone(),
        retry: config.retry_policy(),
        ..OrchestratorConfig::default()
    };

    // --- 6. Start the Session ---
    let (events_tx, mut events) = tokio::sync::mpsc::unbounded_channel::<SessionEvent>();
    let mut orchestrator =
        Orchestrator::new(collaborators, orchestrator_config, personality, events_tx);
    let mut console = ConsoleObserver::new();

    if let Err(e) = orchestrator.start_session().await {
        tracing::error!("Failed to start the session: {}", e);
    } else if let Some(path) = &args.upload {
        // Queued by the orchestrator until the channel is open.
        let blob = load_upload(path)?;
        tracing::info!("Uploading {} ({})", path.display(), blob.mime_type);
        orchestrator.send_realtime_input(blob)?;
    }

    // --- 7. Event Loop ---
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl-C received, shutting down.");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                console.handle(event);
                let mut exit = false;
                for action in console.take_actions() {
                    match action {
                        Action::UpdatePersonality(update) => {
                            if let Err(e) = orchestrator.apply_personality_update(&update).await {
                                tracing::error!("Failed to restart with the new personality: {}", e);
                            }
                        }
                        Action::ResetPersonality => {
                            if let Err(e) = orchestrator.set_personality(base_personality.clone()).await {
                                tracing::error!("Failed to restart with the default personality: {}", e);
                            }
                        }
                        Action::ExportKnowledge => {
                            match export_personality(&args.export_to, orchestrator.personality()) {
                                Ok(()) => tracing::info!("Personality exported to {}", args.export_to.display()),
                                Err(e) => tracing::error!("Failed to export personality: {:#}", e),
                            }
                        }
                        Action::ApiKeyInvalid => {
                            tracing::error!("The Gemini API key was rejected. Check GEMINI_API_KEY and try again.");
                            exit = true;
                        }
                    }
                }
                if exit {
                    break;
                }
            }
            _ = ticker.tick() => console.refresh(Instant::now()),
        }
    }

    // --- 8. Shutdown ---
    orchestrator.stop_session().await;
    tracing::info!(
        "Session ended with {} history items.",
        console.history().len()
    );
    Ok(())
}
