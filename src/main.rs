#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use sportello::ai::{ChatBackend, IntentClassifier, OpenAiBackend, ResponseGenerator};
use sportello::channels::{
    linkmobility::LinkMobilitySender, messenger::MessengerSender, sendgrid::SendGridSender,
    skebby::SkebbySender, twilio::TwilioWhatsAppSender,
};
use sportello::config::Config;
use sportello::context::StaticContextStore;
use sportello::dispatch::Dispatcher;
use sportello::fanout::InMemoryNotifier;
use sportello::gateway::{self, AppState};
use sportello::hours::BusinessHours;
use sportello::pipeline::MessagePipeline;

/// Sportello - inbound message engine for the back office.
#[derive(Parser, Debug)]
#[command(name = "sportello")]
#[command(version)]
#[command(about = "Multi-channel webhook engine with AI-assisted replies", long_about = None)]
struct Cli {
    /// Config file path. Defaults to the platform config directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the webhook gateway.
    Serve,
    /// Validate the config file and report problems without starting.
    CheckConfig,
    /// Print the webhook URLs to register with each provider.
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respects RUST_LOG, defaults to INFO.
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve => serve(&config).await,
        Commands::CheckConfig => check_config(&config),
        Commands::Info => {
            print_info(&config);
            Ok(())
        }
    }
}

fn check_config(config: &Config) -> Result<()> {
    let problems = config.validate();
    if problems.is_empty() {
        println!("config ok ({})", config.environment.as_str());
        return Ok(());
    }
    for problem in &problems {
        eprintln!("problem: {problem}");
    }
    bail!("{} config problem(s) found", problems.len());
}

fn print_info(config: &Config) {
    let base = config
        .gateway
        .public_url
        .clone()
        .unwrap_or_else(|| format!("http://{}:{}", config.gateway.host, config.gateway.port));
    let base = base.trim_end_matches('/');

    println!("environment: {}", config.environment.as_str());
    println!("{base}/webhooks/twilio/whatsapp");
    println!("{base}/webhooks/linkmobility/whatsapp");
    println!("{base}/webhooks/skebby/sms");
    println!("{base}/webhooks/sendgrid/inbound");
    println!("{base}/webhooks/facebook/messenger");
}

/// Wire every configured provider into the dispatcher.
fn build_dispatcher(config: &Config) -> Dispatcher {
    let mut dispatcher = Dispatcher::new();

    if let Some(twilio) = &config.providers.twilio {
        dispatcher.register(Arc::new(TwilioWhatsAppSender::new(
            &twilio.account_sid,
            &twilio.auth_token,
            &twilio.from_number,
        )));
    }
    if let Some(link) = &config.providers.linkmobility {
        dispatcher.register(Arc::new(LinkMobilitySender::new(
            &link.api_key,
            &link.sender_id,
            &link.base_url,
        )));
    }
    if let Some(skebby) = &config.providers.skebby {
        dispatcher.register(Arc::new(SkebbySender::new(
            &skebby.user_key,
            &skebby.session_key,
            &skebby.sender_id,
            &skebby.base_url,
        )));
    }
    if let Some(sendgrid) = &config.providers.sendgrid {
        dispatcher.register(Arc::new(SendGridSender::new(
            &sendgrid.api_key,
            &sendgrid.from_address,
        )));
    }
    if let Some(facebook) = &config.providers.facebook {
        dispatcher.register(Arc::new(MessengerSender::new(&facebook.page_access_token)));
    }

    dispatcher
}

async fn serve(config: &Config) -> Result<()> {
    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            eprintln!("problem: {problem}");
        }
        bail!("refusing to start with an invalid config");
    }

    let api_key = config.ai.api_key.clone().unwrap_or_default();
    if api_key.is_empty() {
        tracing::warn!("no AI api key configured, classification will fall back on every message");
    }
    let backend: Arc<dyn ChatBackend> = Arc::new(OpenAiBackend::new(
        &config.ai.api_url,
        &api_key,
        &config.ai.model,
    ));

    let dispatcher = Arc::new(build_dispatcher(config));
    for (provider, channel) in dispatcher.registered() {
        tracing::info!(%provider, %channel, "outbound sender registered");
    }

    let pipeline = Arc::new(MessagePipeline::new(
        IntentClassifier::new(backend.clone()),
        ResponseGenerator::new(backend),
        dispatcher,
        Arc::new(StaticContextStore::default()),
        Arc::new(InMemoryNotifier::new()),
        BusinessHours::new(
            config.business_hours.open_hour,
            config.business_hours.close_hour,
        ),
    ));

    let state = AppState::new(pipeline, config);
    gateway::serve(state, config).await
}
