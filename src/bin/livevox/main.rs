use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use tracing_subscriber::EnvFilter;

use livevox::audio::device::{CpalBackend, InputSource};
use livevox::config::Config;
use livevox::error::LivevoxError;
use livevox::inference::{self, ChatRequest};
use livevox::live::{SessionManager, SessionState, Status, WebSocketConnector};

#[derive(Parser)]
#[command(
    name = "livevox",
    about = "Talk to a hosted live voice model",
    long_about = "Livevox streams your microphone to a hosted real-time voice model and \
        plays its spoken replies back without gaps. It also offers one-shot \
        grounded chat, image generation and video generation against the same \
        API."
)]
struct Cli {
    /// Path to config file
    ///
    /// Defaults to ~/.config/livevox/config.yaml if not specified.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    ///
    /// Sets the log level to debug for the livevox crate, showing session
    /// transitions, device setup and dropped or malformed messages.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a live voice session (foreground)
    ///
    /// Opens the microphone and speakers, connects to the live endpoint and
    /// streams audio both ways until Ctrl+C or until the remote end closes
    /// the session. Status changes are printed as they happen.
    Talk {
        /// Speak a WAV file instead of the microphone
        ///
        /// The file is streamed in real time, followed by silence so the
        /// model can answer.
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Ask a one-shot question, grounded with web search
    Chat {
        /// The question to ask
        message: String,
    },

    /// Generate an image from a prompt
    Image {
        prompt: String,

        /// Where to write the image
        #[arg(long)]
        out: PathBuf,
    },

    /// Generate a short educational video from a prompt
    ///
    /// Video generation is a long-running operation; the command polls
    /// until it finishes, then downloads the result.
    Video {
        prompt: String,

        /// Where to write the video
        #[arg(long)]
        out: PathBuf,
    },

    /// List available audio input and output devices
    Devices,

    /// Create a new configuration file
    ///
    /// Walks through an interactive setup for the API key, audio devices
    /// and voice. Writes the result to the config file.
    Init,

    /// Generate shell completions
    ///
    /// Prints a completion script for the given shell to stdout.
    Completions {
        /// Shell to generate completions for (bash, zsh, fish, elvish, powershell)
        shell: Shell,
    },
}

fn config_path(cli: &Cli) -> PathBuf {
    cli.config.clone().unwrap_or_else(Config::default_path)
}

/// A missing config file is fine for everything but explicit `--config`.
fn load_config(cli: &Cli) -> Result<Config, LivevoxError> {
    let path = config_path(cli);
    if cli.config.is_none() && !path.exists() {
        tracing::debug!("no config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    Config::load(&path)
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("livevox=debug,info")
    } else {
        EnvFilter::new("livevox=info,warn")
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() {
    install_completions_if_missing();

    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

/// Install shell completions for `$SHELL` if the completion file does not
/// exist yet. Failures are ignored.
fn install_completions_if_missing() {
    let Ok(shell_env) = std::env::var("SHELL") else {
        return;
    };

    let Some(home) = dirs::home_dir() else {
        return;
    };

    let (shell, path) = if shell_env.ends_with("/bash") {
        let dir = home.join(".local/share/bash-completion/completions");
        (Shell::Bash, dir.join("livevox"))
    } else if shell_env.ends_with("/zsh") {
        (Shell::Zsh, home.join(".zfunc/_livevox"))
    } else if shell_env.ends_with("/fish") {
        (Shell::Fish, home.join(".config/fish/completions/livevox.fish"))
    } else {
        return;
    };

    if path.exists() {
        return;
    }

    if let Some(parent) = path.parent()
        && std::fs::create_dir_all(parent).is_err()
    {
        return;
    }

    let mut buf = Vec::new();
    generate(shell, &mut Cli::command(), "livevox", &mut buf);

    let _ = std::fs::write(&path, buf);
}

fn run(cli: Cli) -> Result<(), LivevoxError> {
    match cli.command {
        Command::Devices => run_devices(),
        Command::Init => run_init(&config_path(&cli)),
        Command::Completions { shell } => {
            generate(shell, &mut Cli::command(), "livevox", &mut std::io::stdout());
            Ok(())
        }
        _ => run_with_config(cli),
    }
}

fn run_with_config(cli: Cli) -> Result<(), LivevoxError> {
    let config = load_config(&cli)?;
    let rt = tokio::runtime::Runtime::new()?;

    match cli.command {
        Command::Talk { file } => run_talk(&rt, &config, file),
        Command::Chat { message } => rt.block_on(run_chat(&config, message)),
        Command::Image { prompt, out } => rt.block_on(run_image(&config, prompt, &out)),
        Command::Video { prompt, out } => rt.block_on(run_video(&config, &prompt, &out)),
        Command::Devices | Command::Init | Command::Completions { .. } => unreachable!(),
    }
}

// ---------------------------------------------------------------------------
// livevox talk
// ---------------------------------------------------------------------------

fn run_talk(
    rt: &tokio::runtime::Runtime,
    config: &Config,
    file: Option<PathBuf>,
) -> Result<(), LivevoxError> {
    let api_key = config.api_key()?;

    let mut backend = CpalBackend::new(&config.audio);
    if let Some(path) = file {
        backend = backend.with_input(InputSource::WavFile(path));
    }
    let connector = WebSocketConnector::new(&config.live, api_key, rt.handle().clone());

    let mut manager = SessionManager::new(
        config.live.clone(),
        &config.audio,
        Arc::new(backend),
        Arc::new(connector),
    );

    rt.block_on(drive_session(&mut manager))
}

async fn drive_session(manager: &mut SessionManager) -> Result<(), LivevoxError> {
    let mut status = manager.subscribe();

    manager.start()?;
    println!("Connecting... press Ctrl+C to stop.");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let next = tokio::select! {
            _ = &mut ctrl_c => None,
            envelope = manager.next_event() => envelope,
        };

        let Some(envelope) = next else {
            tracing::info!("interrupted, stopping session");
            manager.stop();
            break;
        };
        manager.handle(envelope);

        if status.has_changed().unwrap_or(false) {
            print_status(&status.borrow_and_update());
        }
        if manager.state() == SessionState::Closed {
            break;
        }
    }

    println!("Session ended.");
    match manager.status().error {
        Some(error) => Err(LivevoxError::Other(error)),
        None => Ok(()),
    }
}

fn print_status(status: &Status) {
    if let Some(error) = &status.error {
        println!("[error] {error}");
    } else if status.speaking {
        println!("[speaking]");
    } else if status.connected {
        println!("[listening]");
    }
}

// ---------------------------------------------------------------------------
// livevox chat / image / video
// ---------------------------------------------------------------------------

async fn run_chat(config: &Config, message: String) -> Result<(), LivevoxError> {
    let client = inference::create_client(&config.inference, config.api_key()?);
    let reply = client.chat_complete(ChatRequest::new(message)).await?;

    println!("{}", reply.text);
    if !reply.sources.is_empty() {
        println!();
        println!("Sources:");
        for source in &reply.sources {
            println!("  {} <{}>", source.title, source.uri);
        }
    }
    Ok(())
}

async fn run_image(config: &Config, prompt: String, out: &Path) -> Result<(), LivevoxError> {
    let client = inference::create_client(&config.inference, config.api_key()?);
    let Some(image) = client.generate_image(prompt).await? else {
        return Err(LivevoxError::Inference(
            "the model returned no image".to_string(),
        ));
    };

    std::fs::write(out, &image.data)?;
    println!("Wrote {} ({}) to {}", image.mime_type, image.data.len(), out.display());
    Ok(())
}

async fn run_video(config: &Config, prompt: &str, out: &Path) -> Result<(), LivevoxError> {
    let client = inference::create_client(&config.inference, config.api_key()?);
    let interval = Duration::from_secs(config.inference.video_poll_secs.max(1));

    println!("Generating video, this can take a few minutes...");
    let Some(uri) = inference::wait_for_video(client.as_ref(), prompt, interval).await? else {
        return Err(LivevoxError::Inference(
            "video generation finished without a video".to_string(),
        ));
    };

    let bytes = client.download_video(uri).await?;
    std::fs::write(out, &bytes)?;
    println!("Wrote {} bytes to {}", bytes.len(), out.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// livevox devices
// ---------------------------------------------------------------------------

fn print_device_list(devices: &[String], default_name: Option<&str>) {
    for (i, name) in devices.iter().enumerate() {
        let marker = if default_name == Some(name.as_str()) {
            " (default)"
        } else {
            ""
        };
        println!("  {}: {name}{marker}", i + 1);
    }
}

fn run_devices() -> Result<(), LivevoxError> {
    let inputs = livevox::audio::capture::list_input_devices()?;
    let outputs = livevox::audio::output::list_output_devices()?;

    println!("Input devices:");
    if inputs.is_empty() {
        println!("  (none)");
    }
    print_device_list(
        &inputs,
        livevox::audio::capture::default_input_device_name().as_deref(),
    );

    println!("Output devices:");
    if outputs.is_empty() {
        println!("  (none)");
    }
    print_device_list(
        &outputs,
        livevox::audio::output::default_output_device_name().as_deref(),
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Prompt helpers
// ---------------------------------------------------------------------------

fn prompt(msg: &str) -> Result<String, LivevoxError> {
    print!("{msg}");
    std::io::stdout()
        .flush()
        .map_err(|e| LivevoxError::Other(format!("failed to flush stdout: {e}")))?;
    let mut buf = String::new();
    std::io::stdin()
        .read_line(&mut buf)
        .map_err(|e| LivevoxError::Other(format!("failed to read input: {e}")))?;
    Ok(buf.trim().to_string())
}

fn prompt_yes_no(msg: &str, default_yes: bool) -> Result<bool, LivevoxError> {
    let hint = if default_yes { "Y/n" } else { "y/N" };
    let input = prompt(&format!("{msg} [{hint}]: "))?;
    if input.is_empty() {
        return Ok(default_yes);
    }
    match input.to_lowercase().as_str() {
        "y" | "yes" => Ok(true),
        "n" | "no" => Ok(false),
        _ => Ok(default_yes),
    }
}

/// Offer a numbered device list; Enter skips.
fn prompt_device(
    kind: &str,
    devices: &[String],
    default_name: Option<&str>,
) -> Result<Option<String>, LivevoxError> {
    if devices.is_empty() {
        println!("No audio {kind} devices found, skipping.");
        return Ok(None);
    }
    println!("Available audio {kind} devices:");
    print_device_list(devices, default_name);
    let input = prompt(&format!(
        "Select {kind} device [1-{}] (Enter for system default): ",
        devices.len()
    ))?;
    Ok(input
        .parse::<usize>()
        .ok()
        .filter(|&choice| choice >= 1 && choice <= devices.len())
        .map(|choice| devices[choice - 1].clone()))
}

// ---------------------------------------------------------------------------
// YAML builder helper
// ---------------------------------------------------------------------------

fn yaml_section<'a>(
    root: &'a mut serde_yaml_ng::Mapping,
    key: &str,
) -> Result<&'a mut serde_yaml_ng::Mapping, LivevoxError> {
    let k = serde_yaml_ng::Value::String(key.to_string());
    root.entry(k)
        .or_insert_with(|| serde_yaml_ng::Value::Mapping(serde_yaml_ng::Mapping::new()))
        .as_mapping_mut()
        .ok_or_else(|| LivevoxError::Config(format!("{key} section is not a mapping")))
}

// ---------------------------------------------------------------------------
// livevox init
// ---------------------------------------------------------------------------

fn run_init(path: &Path) -> Result<(), LivevoxError> {
    use serde_yaml_ng::{Mapping, Value};

    if path.exists() {
        let overwrite = prompt_yes_no(
            &format!("Config file already exists at {}. Overwrite?", path.display()),
            false,
        )?;
        if !overwrite {
            println!("Aborted.");
            return Ok(());
        }
    }

    let mut root = Mapping::new();

    // API key
    println!();
    let api_key = prompt("API key (Enter to use GEMINI_API_KEY / GOOGLE_API_KEY): ")?;
    if !api_key.is_empty() {
        root.insert(Value::String("api_key".to_string()), Value::String(api_key));
    }

    // Audio devices
    println!();
    if prompt_yes_no("Pick audio devices?", false)? {
        let inputs = livevox::audio::capture::list_input_devices()?;
        let default_input = livevox::audio::capture::default_input_device_name();
        if let Some(name) = prompt_device("input", &inputs, default_input.as_deref())? {
            yaml_section(&mut root, "audio")?
                .insert(Value::String("input_device".to_string()), Value::String(name));
        }

        println!();
        let outputs = livevox::audio::output::list_output_devices()?;
        let default_output = livevox::audio::output::default_output_device_name();
        if let Some(name) = prompt_device("output", &outputs, default_output.as_deref())? {
            yaml_section(&mut root, "audio")?
                .insert(Value::String("output_device".to_string()), Value::String(name));
        }
    }

    // Voice
    println!();
    let voice = prompt("Prebuilt voice name (Enter for the model default): ")?;
    if !voice.is_empty() {
        yaml_section(&mut root, "live")?
            .insert(Value::String("voice".to_string()), Value::String(voice));
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            LivevoxError::Config(format!(
                "failed to create config directory {}: {e}",
                parent.display()
            ))
        })?;
    }

    let yaml = serde_yaml_ng::to_string(&Value::Mapping(root))
        .map_err(|e| LivevoxError::Config(format!("failed to serialize config: {e}")))?;

    std::fs::write(path, &yaml).map_err(|e| {
        LivevoxError::Config(format!(
            "failed to write config file {}: {e}",
            path.display()
        ))
    })?;

    println!();
    println!("Config written to {}", path.display());
    println!("Run `livevox talk` to start a session.");

    Ok(())
}
