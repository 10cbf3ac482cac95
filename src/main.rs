//! `convo`: console front end for the conversation runtime.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Parse CLI flags
//!   3. Load settings
//!   4. Init logger once (CLI `-v` flags > env > config)
//!   5. Build the host config from `[chat]` + `LLM_API_KEY`
//!   6. Spawn Ctrl-C → shutdown watcher
//!   7. Print greeting, then run the console loop until shutdown or EOF

use std::io::Write as _;
use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use convo_runtime::config;
use convo_runtime::error::{AppError, ChatError};
use convo_runtime::logger;
use convo_runtime::{AppConfig, ConversationManager};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // .env is optional.
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();
    let mut settings = config::load(args.config_path.as_deref())?;
    if let Some(dir) = args.data_dir {
        settings.data_dir = dir;
    }

    let effective_log_level = args.log_level.unwrap_or(settings.log_level.as_str());
    if args.log_level.is_none() {
        logger::parse_level(effective_log_level)?;
    }
    logger::init(effective_log_level, args.log_level.is_some())?;

    let chat = settings.chat_config();
    info!(
        data_dir = %settings.data_dir.display(),
        mode = ?chat.mode,
        family = chat.provider.family.as_str(),
        agent = %chat.agent_name(),
        conversation = %chat.conversation_id(),
        has_key = chat.provider.has_credentials(),
        "settings loaded"
    );

    let manager = ConversationManager::new(&settings);

    let shutdown = CancellationToken::new();
    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            ctrlc_token.cancel();
        }
    });

    run_console(&manager, &chat, shutdown).await
}

async fn run_console(
    manager: &ConversationManager,
    chat: &AppConfig,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    println!("─────────────────────────────────");
    println!(" convo console  (Ctrl-C to quit)");
    println!(" /history  /reset");
    println!("─────────────────────────────────");
    println!("{}", manager.get_greeting_text(chat));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                println!();
                info!("console shutting down");
                break;
            }

            line = lines.next_line() => {
                let input = match line {
                    Err(e) => {
                        warn!("stdin read error: {e}");
                        break;
                    }
                    Ok(None) => {
                        info!("stdin closed");
                        break;
                    }
                    Ok(Some(input)) => input.trim().to_string(),
                };
                if input.is_empty() {
                    continue;
                }
                debug!(input = %input, "console received line");

                if let Err(e) = handle_line(manager, chat, &input).await {
                    // Only bad input keeps the session going.
                    warn!(error = %e, "console command failed");
                    println!("error: {e}");
                    if !matches!(e, ChatError::InvalidInput(_)) {
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

async fn handle_line(
    manager: &ConversationManager,
    chat: &AppConfig,
    input: &str,
) -> Result<(), ChatError> {
    match input {
        "/history" => {
            let history = manager.get_history(chat, None).await?;
            if history.is_empty() {
                println!("(no messages)");
            }
            for m in history {
                println!("{:>9}: {}", m.role.as_str(), m.text);
            }
        }
        "/reset" => {
            manager.reset_conversation(chat, None).await?;
            println!("(conversation cleared)");
            println!("{}", manager.get_greeting_text(chat));
        }
        text => {
            let out = manager.send_message(chat, text, None).await?;
            println!("[{}] {}", out.effective_mode, out.response_text);
        }
    }
    Ok(())
}

// ── CLI ───────────────────────────────────────────────────────────────────────

struct CliArgs {
    log_level: Option<&'static str>,
    config_path: Option<String>,
    data_dir: Option<PathBuf>,
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut config_path = None;
    let mut data_dir = None;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }

        match arg.as_str() {
            "-h" | "--help" => {
                println!("Usage: convo [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -h, --help                 Print help");
                println!("  -f, --config <PATH>        Path to configuration file (default: config/default.toml)");
                println!("  -d, --data-dir <PATH>      Storage directory for conversation history");
                println!("  -v, -vv, -vvv, -vvvv       Increase logging verbosity");
                std::process::exit(0);
            }
            "-f" | "--config" => match iter.next() {
                Some(path) => config_path = Some(path),
                None => {
                    eprintln!("error: -f/--config requires a path argument");
                    std::process::exit(1);
                }
            },
            "-d" | "--data-dir" => match iter.next() {
                Some(path) => data_dir = Some(config::expand_home(&path)),
                None => {
                    eprintln!("error: -d/--data-dir requires a path argument");
                    std::process::exit(1);
                }
            },
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            _ => {}
        }
    }

    // Each -v raises verbosity one tier:
    //   -v → warn, -vv → info, -vvv → debug, -vvvv → trace
    let log_level = match verbosity {
        0 => None,
        1 => Some("warn"),
        2 => Some("info"),
        3 => Some("debug"),
        _ => Some("trace"),
    };

    CliArgs { log_level, config_path, data_dir }
}
