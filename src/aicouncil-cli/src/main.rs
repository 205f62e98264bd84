//! AI Council CLI
//!
//! A command-line tool for watching a council of AI participants talk a topic through.

use aicouncil_core::assets::DirectoryAssetStore;
use aicouncil_core::config::{self, Config};
use aicouncil_core::tts::{KokoroSynthesizer, WavFileSink};
use aicouncil_core::video::ReplicateAnimator;
use aicouncil_core::{
    ConversationController, ConversationDriver, ConversationEvent, ConversationStyle,
    MediaStatus, Participant, PersonaProfile, Personality, Provider, ProviderRegistry,
    ResponderFactory, SideEffectPipeline, TurnMode, generate_summary,
};
use clap::{ArgAction, Parser};
use colored::Colorize;
use std::collections::HashMap;
use std::env;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "aicouncil",
    version,
    about = "AI Council - Watch a council of AIs discuss a topic",
    long_about = "A CLI tool for running conversations between AI participants. \
                  While it runs, type a line to interject, or use /pause, /resume, \
                  /pick <name|number>, /clear and /stop."
)]
struct Cli {
    /// The topic to discuss
    #[arg(value_name = "TOPIC", required_unless_present = "check")]
    topic: Option<String>,

    /// Council configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Model names for an ad-hoc council on an OpenAI-compatible endpoint
    /// (specify once per participant, replaces the configured participants)
    #[arg(short, long, action = ArgAction::Append, value_name = "MODEL")]
    model: Vec<String>,

    /// Names for the participants (optional, specify in roster order)
    #[arg(long, action = ArgAction::Append, value_name = "NAME")]
    name: Vec<String>,

    /// Turn mode: sequential, random, contextual or manual
    #[arg(long, value_name = "MODE")]
    mode: Option<String>,

    /// Conversation style: discussion, debate, consensus or questioning
    #[arg(long, value_name = "STYLE")]
    style: Option<String>,

    /// Rounds before the council stops (0 runs until /stop)
    #[arg(short, long, value_name = "ROUNDS")]
    rounds: Option<u32>,

    /// Token cap per response
    #[arg(long, value_name = "TOKENS")]
    length: Option<u32>,

    /// Speak every turn with Kokoro and render the speech to WAV files
    #[arg(long)]
    voice: bool,

    /// Animate participants with portraits into talking-head videos
    #[arg(long)]
    talking_heads: bool,

    /// Ask the council for a summary and a winner at the end
    #[arg(long)]
    summary: bool,

    /// Test the connection of every participant and exit
    #[arg(long)]
    check: bool,

    /// Log driver activity to stderr
    #[arg(short, long)]
    verbose: bool,
}

const DEFAULT_NAMES: [&str; 6] = ["Nova", "Echo", "Sage", "Atlas", "Iris", "Orion"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => config::default_config(),
    };

    let roster = build_roster(&cli, &config);
    for p in roster.iter().filter(|p| p.binding.credential.is_none()) {
        eprintln!(
            "{}",
            format!(
                "Warning: no API key for {} ({}). Its turns will fail.",
                p.name,
                p.binding.provider.display_name()
            )
            .yellow()
        );
    }

    if cli.check {
        return check_connections(&roster).await;
    }

    let Some(topic) = cli.topic.clone() else {
        return Err("a topic is required".into());
    };

    let mut settings = config.conversation_settings();
    if let Some(mode) = &cli.mode {
        settings.turn_mode = mode.parse::<TurnMode>()?;
    }
    if let Some(style) = &cli.style {
        settings.style = style.parse::<ConversationStyle>()?;
    }
    if let Some(rounds) = cli.rounds {
        settings.max_rounds = rounds;
    }
    if let Some(length) = cli.length {
        settings.response_length = length;
    }
    settings.talking_heads |= cli.talking_heads;
    let voice = cli.voice || settings.talking_heads;
    settings.auto_play_voice = voice;

    // Speech and video collaborators
    let mut pipeline = SideEffectPipeline::silent();
    let mut recorder = None;
    if voice {
        println!("{}", "Loading Kokoro voices...".dimmed());
        let synthesizer = Arc::new(KokoroSynthesizer::new(config.voices.clone()).await?);
        let sink = Arc::new(WavFileSink::new(&config.voices.output_dir)?);
        pipeline = pipeline.with_speech(synthesizer, sink.clone());
        recorder = Some(sink);
    }
    if settings.talking_heads {
        let video = config
            .video
            .as_ref()
            .ok_or("talking heads need a [video] section in the config file")?;
        let animator = ReplicateAnimator::new(video.resolve_api_key()?)?.with_polling(
            Duration::from_millis(video.poll_interval_ms),
            video.poll_attempts,
        );
        let assets = DirectoryAssetStore::new(&video.asset_dir, &video.public_base_url);
        pipeline = pipeline.with_video(Arc::new(assets), Arc::new(animator));
    }

    let active: Vec<Participant> = roster.iter().filter(|p| p.is_active).cloned().collect();

    // Print header
    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!(
        "{}",
        format!(
            "  {} - {} ({} turns)",
            "AI Council".bold(),
            settings.style,
            settings.turn_mode
        )
        .bright_blue()
        .bold()
    );
    println!("{}", "═".repeat(70).bright_blue());
    println!();
    println!("{} {}", "Topic:".bold(), topic.bright_white());
    println!();
    println!("{}", "Participants:".bold());
    for (i, p) in active.iter().enumerate() {
        println!(
            "  {}. {} ({}) - using {}",
            i + 1,
            p.name.bright_cyan(),
            describe_profile(p).yellow(),
            p.binding.model.dimmed()
        );
    }
    println!();
    println!(
        "{}",
        "Type to interject. Commands: /pause /resume /pick <name|n> /clear /stop".dimmed()
    );
    println!("{}", "─".repeat(70).dimmed());

    let (_settings_tx, settings_rx) = watch::channel(settings);
    let names: HashMap<String, String> = active
        .iter()
        .map(|p| (p.id.clone(), p.name.clone()))
        .collect();

    let handle = ConversationDriver::new(
        roster.clone(),
        settings_rx,
        Arc::new(ProviderRegistry),
        pipeline,
    )?
    .with_callback(create_console_callback(names, active.clone()))
    .spawn();

    spawn_input_reader(handle.controller(), active.clone());
    let ctrl_c = handle.controller();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.stop();
        }
    });

    handle.start(topic.as_str());
    let transcript = handle.finished().await;

    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!("{}", "  Council adjourned.".bright_green().bold());
    println!("{}", "═".repeat(70).bright_blue());
    println!();

    if let Some(sink) = recorder {
        match sink.write_recording(&topic) {
            Ok(Some(path)) => println!("{} {}", "Recording:".bold(), path.display()),
            Ok(None) => {}
            Err(e) => eprintln!("{} {}", "Error:".red().bold(), e),
        }
    }

    if cli.summary {
        println!("{}", "Summarizing...".dimmed());
        let summary = generate_summary(&transcript, &roster, &ProviderRegistry).await;
        println!();
        println!("{}", "Summary".bold().underline());
        for line in textwrap(&summary.summary, 66).lines() {
            println!("  {}", line);
        }
        println!();
        println!("{} {}", "Winner:".bold(), summary.winner.bright_green());
        println!();
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "aicouncil_core=debug,info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Participants from `-m` flags, or from the configuration.
fn build_roster(cli: &Cli, config: &Config) -> Vec<Participant> {
    let mut roster = if cli.model.is_empty() {
        config.roster()
    } else {
        let api_base = env::var("OPENAI_API_BASE")
            .or_else(|_| env::var("OPENAI_BASE_URL"))
            .ok();
        let api_key = env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());

        cli.model
            .iter()
            .enumerate()
            .map(|(i, model)| {
                let mut p = Participant::new(
                    format!("p{}", i + 1),
                    DEFAULT_NAMES[i % DEFAULT_NAMES.len()],
                    Provider::OpenAI,
                    model,
                )
                .with_personality(Personality::ALL[i % Personality::ALL.len()]);
                p.binding.credential = api_key.clone();
                p.binding.api_base = api_base.clone();
                p
            })
            .collect()
    };

    for (p, name) in roster.iter_mut().zip(&cli.name) {
        p.name = name.clone();
    }
    roster
}

fn describe_profile(p: &Participant) -> String {
    match &p.profile {
        PersonaProfile::Generic { personality } => personality.to_string(),
        PersonaProfile::Persona(persona) => format!("as {}", persona.name),
    }
}

async fn check_connections(roster: &[Participant]) -> Result<(), Box<dyn std::error::Error>> {
    let mut all_ok = true;
    for p in roster.iter().filter(|p| p.is_active) {
        let ok = match ProviderRegistry.responder_for(p) {
            Ok(responder) => responder.test_connection().await,
            Err(e) => {
                eprintln!("  {} {}", "Error:".red().bold(), e);
                false
            }
        };
        all_ok &= ok;
        println!(
            "  {} {} ({} / {})",
            if ok { "OK".bright_green() } else { "FAILED".red() },
            p.name.bright_cyan(),
            p.binding.provider.display_name(),
            p.binding.model.dimmed()
        );
    }

    if all_ok {
        Ok(())
    } else {
        Err("one or more participants could not connect".into())
    }
}

/// Read stdin on a plain thread so a pending read never holds up shutdown.
fn spawn_input_reader(controller: ConversationController, roster: Vec<Participant>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match line.split_once(' ').unwrap_or((line, "")) {
                ("/pause", _) => controller.pause(),
                ("/resume", _) => controller.resume(),
                ("/stop", _) | ("/quit", _) => {
                    controller.stop();
                    break;
                }
                ("/clear", _) => controller.clear(),
                ("/pick", who) => match find_participant(&roster, who.trim()) {
                    Some(p) => controller.select_manual_speaker(p.id.clone()),
                    None => eprintln!("{} no participant '{}'", "Error:".red().bold(), who),
                },
                _ => controller.interject(line),
            }
        }
    });
}

/// Match by 1-based position, id or case-insensitive name.
fn find_participant<'a>(roster: &'a [Participant], who: &str) -> Option<&'a Participant> {
    if let Ok(n) = who.parse::<usize>() {
        return n.checked_sub(1).and_then(|i| roster.get(i));
    }
    roster
        .iter()
        .find(|p| p.id == who || p.name.eq_ignore_ascii_case(who))
}

/// Create a callback that prints conversation events to the console.
fn create_console_callback(
    names: HashMap<String, String>,
    roster: Vec<Participant>,
) -> Box<dyn Fn(ConversationEvent) + Send + Sync> {
    Box::new(move |event| match event {
        ConversationEvent::Started { .. } => {
            println!();
        }
        ConversationEvent::Typing { name, .. } => {
            println!("{} {}", "▶".bright_cyan(), name.bright_cyan().bold());
        }
        ConversationEvent::TurnRecorded(message) => {
            match message.participant_id() {
                Some(id) => {
                    let name = names.get(id).map(String::as_str).unwrap_or("AI");
                    println!(
                        "{}",
                        format!("{} (round {})", name, message.round).dimmed()
                    );
                }
                None => println!("{}", "You:".yellow().bold()),
            }
            // Word wrap and indent the content
            let wrapped = textwrap(&message.content, 66);
            for line in wrapped.lines() {
                println!("  {}", line);
            }
            println!();
        }
        ConversationEvent::MessageUpdated(message) => match message.video_status {
            Some(MediaStatus::Completed) => {
                if let Some(video) = &message.video_ref {
                    println!("  {} {}", "Video:".bright_magenta(), video);
                }
            }
            Some(MediaStatus::Failed) => {
                println!("  {}", "Video generation failed, spoke instead.".dimmed());
            }
            _ => {}
        },
        ConversationEvent::Error { name, message, .. } => {
            eprintln!("{} {}: {}", "Error:".red().bold(), name, message);
        }
        ConversationEvent::AwaitingManualSelection => {
            println!("{}", "Who speaks next? /pick <name|number>".yellow());
            for (i, p) in roster.iter().enumerate() {
                println!("  {}. {}", i + 1, p.name.bright_cyan());
            }
        }
        ConversationEvent::Paused => println!("{}", "⏸ Paused. /resume to continue.".yellow()),
        ConversationEvent::Resumed => println!("{}", "▶ Resumed.".yellow()),
        ConversationEvent::Notice(text) => eprintln!("{} {}", "Notice:".yellow().bold(), text),
        ConversationEvent::Cleared => println!("{}", "Transcript cleared.".yellow()),
        ConversationEvent::TypingCleared
        | ConversationEvent::ParticipantStatsChanged { .. }
        | ConversationEvent::Stopped => {
            // Handled in main
        }
    })
}

/// Simple text wrapping function.
fn textwrap(text: &str, width: usize) -> String {
    let mut result = String::new();
    let mut current_line_len = 0;

    for word in text.split_whitespace() {
        if current_line_len + word.len() + 1 > width && current_line_len > 0 {
            result.push('\n');
            current_line_len = 0;
        }
        if current_line_len > 0 {
            result.push(' ');
            current_line_len += 1;
        }
        result.push_str(word);
        current_line_len += word.len();
    }

    result
}
