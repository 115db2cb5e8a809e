//! Rehearsal console: a terminal front end for one role-play session.
//!
//! Loads settings and `.env`, optionally asks for the access code, then reads
//! the trainee's turns from stdin and streams the personas' replies back.

mod commands;
mod gate;

use anyhow::{Context, Result};
use clap::Parser;
use commands::Command;
use rehearsal_core::{
    report_incident, Affordance, CompletionDriver, Phase, ProviderKind, ReplyEvent, Role, Secrets,
    Session, SessionSettings, SessionView, Turn, UiEvent, Utterance,
};
use rehearsal_voice::{
    recognize, AudioSink, NullSink, OpenAiStt, OpenAiTts, CannedStt, SilentTts,
    RecordedAudio, SttBackend, TtsBackend, VoiceSequencer,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser)]
#[command(name = "rehearsal")]
#[command(about = "Practice a difficult conversation with an instructor and a resistant stakeholder")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to $REHEARSAL_SETTINGS or settings.toml)
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Use canned replies and silent speech; no API keys needed
    #[arg(long)]
    offline: bool,

    /// Print the effective settings as TOML and exit
    #[arg(long)]
    print_settings: bool,

    /// Do not synthesize or play speech
    #[arg(long)]
    mute: bool,

    /// Show debug logs on stderr
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.verbose);

    let path = cli.settings.clone().unwrap_or_else(SessionSettings::default_path);
    let mut settings = SessionSettings::load_or_default(&path);
    if cli.offline {
        settings.completion.provider = ProviderKind::Scripted;
    }
    if cli.print_settings {
        println!("{}", settings.to_toml()?);
        return Ok(());
    }

    let secrets = Secrets::from_env();
    let settings = Arc::new(settings);
    let driver = CompletionDriver::from_settings(&settings.completion, &secrets)
        .context("Unable to set up the completion provider (set an API key or use --offline)")?;
    let voice = VoiceSequencer::new(build_tts(&settings, &secrets, &cli), build_sink(cli.mute));
    let stt = build_stt(&settings, &secrets, cli.offline);
    let mut session = Session::new(Arc::clone(&settings), driver, voice)?;

    print_header(&settings);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    match &secrets.access_code {
        Some(code) => {
            if !gate::unlock(&mut lines, code).await? {
                warn!("Access denied; exiting");
                return Ok(());
            }
        }
        None => info!("No access code configured; gate skipped"),
    }
    if let Some(welcome) = session.open() {
        print_turn(&settings, &welcome);
    }

    let mut shown_phase = session.phase();
    loop {
        let view = session.view();
        if view.phase != shown_phase {
            shown_phase = view.phase;
            print_profile(&settings, &view);
        }
        print_prompt(&settings, &view)?;

        let line = if session.has_deferred() {
            tokio::select! {
                opening = session.settle() => {
                    println!();
                    for appended in &opening {
                        print_turn(&settings, &appended.turn);
                    }
                    continue;
                }
                line = lines.next_line() => line?,
            }
        } else {
            lines.next_line().await?
        };
        let Some(line) = line else {
            break;
        };

        let utterance = match commands::parse(&line) {
            Command::Empty => continue,
            Command::Quit => break,
            Command::Help => {
                println!("{}", commands::HELP);
                continue;
            }
            Command::Unknown(input) => {
                println!("Unknown command {}. Type /help for the list.", input);
                continue;
            }
            Command::Save(target) => {
                if !session.flags().transcript_ready {
                    println!("The transcript can be downloaded once the debrief starts.");
                    continue;
                }
                match session.save_transcript(target.as_deref()).await {
                    Ok(saved) => println!("📥 Transcript saved to {}", saved.display()),
                    Err(e) => println!("{}", report_incident(&e, &settings.error_message).message),
                }
                continue;
            }
            Command::Voice(file) => match transcribe(stt.as_ref(), &file).await {
                Some(text) => {
                    println!("🎙 {}", text);
                    Utterance::spoken(text)
                }
                None => {
                    println!("(no speech recognized)");
                    continue;
                }
            },
            Command::Meet => Utterance::button(UiEvent::MeetStakeholder, &settings.scripts),
            Command::End => Utterance::button(UiEvent::EndSession, &settings.scripts),
            Command::Say(text) => Utterance::typed(text),
        };

        let names = Arc::clone(&settings);
        let mut render = move |event: ReplyEvent| render_event(&names, event);
        match session.handle(utterance, &mut render).await {
            Ok(outcome) if outcome.ignored => println!("(that is not available right now)"),
            Ok(outcome) => {
                outcome
                    .appended
                    .iter()
                    .filter(|a| !a.streamed && a.turn.role() == Role::Assistant)
                    .for_each(|a| print_turn(&settings, &a.turn));
            }
            Err(e) => {
                let incident = report_incident(&e, &settings.error_message);
                println!("\n{}\n", incident.message);
            }
        }
    }

    session.close();
    Ok(())
}

/// File log plus stderr. `RUST_LOG` drives the file; stderr stays quiet unless `--verbose`.
fn init_logging(verbose: bool) -> tracing_appender::non_blocking::WorkerGuard {
    let file_appender = tracing_appender::rolling::never(".", "rehearsal.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let file_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_filter = EnvFilter::new(if verbose { "debug" } else { "warn" });

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer)
                .with_filter(file_filter),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(stderr_filter),
        )
        .init();
    guard
}

fn build_tts(settings: &SessionSettings, secrets: &Secrets, cli: &Cli) -> Arc<dyn TtsBackend> {
    if cli.offline || cli.mute {
        return Arc::new(SilentTts);
    }
    let Some(key) = &secrets.openai_api_key else {
        warn!("🔇 OPENAI_API_KEY not set; personas will not be voiced");
        return Arc::new(SilentTts);
    };
    match OpenAiTts::new(&settings.speech.base_url, key, &settings.speech.tts_model) {
        Ok(tts) => Arc::new(tts),
        Err(e) => {
            warn!("🔇 TTS unavailable: {}", e);
            Arc::new(SilentTts)
        }
    }
}

fn build_stt(settings: &SessionSettings, secrets: &Secrets, offline: bool) -> Box<dyn SttBackend> {
    match (&secrets.openai_api_key, offline) {
        (Some(key), false) => {
            match OpenAiStt::new(&settings.speech.base_url, key, &settings.speech.stt_model) {
                Ok(stt) => Box::new(stt),
                Err(e) => {
                    warn!("🎙 STT unavailable: {}", e);
                    Box::new(CannedStt::silent())
                }
            }
        }
        _ => Box::new(CannedStt::silent()),
    }
}

#[cfg(feature = "speaker")]
fn build_sink(mute: bool) -> Arc<dyn AudioSink> {
    if mute {
        return Arc::new(NullSink);
    }
    match rehearsal_voice::RodioSink::new() {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            warn!("🔇 No audio output ({}); continuing silently", e);
            Arc::new(NullSink)
        }
    }
}

#[cfg(not(feature = "speaker"))]
fn build_sink(_mute: bool) -> Arc<dyn AudioSink> {
    Arc::new(NullSink)
}

async fn transcribe(stt: &dyn SttBackend, file: &std::path::Path) -> Option<String> {
    match RecordedAudio::from_wav_file(file).await {
        Ok(audio) => recognize(stt, &audio).await,
        Err(e) => {
            warn!("Could not read recording {}: {}", file.display(), e);
            None
        }
    }
}

fn print_header(settings: &SessionSettings) {
    println!("\n{}\n", settings.title);
    println!("{}\n", settings.intro);
    println!("⚠️  {}\n", settings.warning);
    println!("Type /help for commands.\n");
}

fn print_profile(settings: &SessionSettings, view: &SessionView) {
    let persona = settings.persona(view.active);
    let heading = match view.phase {
        Phase::Simulation => format!("Meeting with {}", persona.name),
        _ => format!("Session with {}", persona.name),
    };
    println!("\n── {} ──", heading);
    for line in &persona.profile {
        println!("   {}", line);
    }
    println!();
}

fn print_prompt(settings: &SessionSettings, view: &SessionView) -> std::io::Result<()> {
    for affordance in &view.affordances {
        match affordance {
            Affordance::MeetStakeholder => println!("  [/meet] {}", settings.scripts.meet_button_label),
            Affordance::EndSession => println!("  [/end]  {}", settings.scripts.end_button_label),
            Affordance::DownloadTranscript => println!("  [/save] 📥 Download Transcript"),
        }
    }
    print!("{} › ", view.placeholder);
    std::io::stdout().flush()
}

fn print_turn(settings: &SessionSettings, turn: &Turn) {
    let (name, _) = settings.roster().identity(turn.speaker());
    println!("\n{}: {}\n", name, turn.text());
}

fn render_event(settings: &SessionSettings, event: ReplyEvent) {
    match event {
        ReplyEvent::Started(persona) => print!("\n{}: ", settings.persona(persona).name),
        ReplyEvent::Fragment(text) => print!("{}", text),
        ReplyEvent::Replaced(apology) => print!("\n  ⚠ {}", apology),
        ReplyEvent::Finished => println!("\n"),
    }
    let _ = std::io::stdout().flush();
}
