use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod chat;
mod config;
mod controller;
mod persistence;
mod registry;
mod session;
#[cfg(test)]
mod testutil;
mod tui;
mod upload;

use api::{HttpBackend, UploadOptions};
use controller::SessionController;
use persistence::PersistenceBridge;
use session::{Identity, SessionStore};
use shared::AuthUser;
use upload::UploadPhase;

// Default backend URL (local development server)
const DEFAULT_SERVER: &str = "http://127.0.0.1:8000";
// Default identity provider URL
const DEFAULT_AUTH_URL: &str = "http://127.0.0.1:8000/auth";

#[derive(Parser)]
#[command(name = "csvchat")]
#[command(about = "Chat with your CSV data - upload a file and ask questions in plain language")]
#[command(version)]
struct Cli {
    /// Backend server URL (overrides config)
    #[arg(long)]
    server: Option<String>,

    /// Auth token (overrides config)
    #[arg(long)]
    token: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with email and password
    Login {
        /// Email address (prompted when omitted)
        email: Option<String>,
    },
    /// Create an account and sign in
    Signup {
        /// Email address (prompted when omitted)
        email: Option<String>,
    },
    /// Sign out and forget the stored session
    Logout,
    /// Show current login status
    Whoami,
    /// Upload a CSV file and select the resulting dataset
    Upload {
        /// Path to the CSV file
        file: PathBuf,
        /// Create a distinct copy even if the content already exists
        #[arg(long, conflicts_with = "reuse")]
        force: bool,
        /// Reuse the existing dataset if the content already exists
        #[arg(long)]
        reuse: bool,
    },
    /// Manage datasets
    Datasets {
        #[command(subcommand)]
        action: DatasetsAction,
    },
    /// Ask a question about the selected dataset
    Ask {
        /// The question, in plain language
        #[arg(required = true)]
        question: Vec<String>,
    },
    /// Show past questions and answers
    History {
        /// Filter items by a search term
        #[arg(long)]
        search: Option<String>,
        #[command(subcommand)]
        action: Option<HistoryAction>,
    },
    /// Clear the active selection and start fresh (history is kept)
    NewChat,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum DatasetsAction {
    /// List your datasets
    List,
    /// Select the active dataset by id
    Select {
        /// Dataset id
        id: String,
    },
    /// Delete a dataset by id
    Delete {
        /// Dataset id
        id: String,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    /// Delete all stored history
    Clear {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Set a configuration value
    Set {
        /// Configuration key (server, token, auth_url)
        key: String,
        /// Configuration value
        value: String,
    },
    /// Get a configuration value
    Get {
        /// Configuration key
        key: String,
    },
    /// Show all configuration
    Show,
    /// Get the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "csvchat=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Config { action }) => handle_config_command(action),
        Some(Commands::Login { email }) => handle_login(cli.server, email, false).await,
        Some(Commands::Signup { email }) => handle_login(cli.server, email, true).await,
        Some(Commands::Logout) => handle_logout(cli.server, cli.token),
        Some(Commands::Whoami) => handle_whoami(),
        Some(Commands::Upload { file, force, reuse }) => {
            handle_upload(cli.server, cli.token, file, force, reuse).await
        }
        Some(Commands::Datasets { action }) => handle_datasets(cli.server, cli.token, action).await,
        Some(Commands::Ask { question }) => {
            handle_ask(cli.server, cli.token, question.join(" ")).await
        }
        Some(Commands::History { search, action }) => {
            handle_history(cli.server, cli.token, search, action)
        }
        Some(Commands::NewChat) => handle_new_chat(cli.server, cli.token),
        None => run_interactive(cli.server, cli.token).await,
    }
}

/// Builds the session controller from config, CLI overrides applied
fn build_controller(
    cli_server: Option<String>,
    cli_token: Option<String>,
) -> Result<SessionController<HttpBackend>> {
    let config = config::Config::load().unwrap_or_default();

    let server = cli_server
        .or(config.remote.server.clone())
        .unwrap_or_else(|| DEFAULT_SERVER.to_string());
    let auth_url = config
        .auth
        .url
        .clone()
        .unwrap_or_else(|| DEFAULT_AUTH_URL.to_string());

    let session = match cli_token.or(config.remote.token.clone()) {
        Some(token) => SessionStore::from_saved(
            auth_url,
            Identity {
                user: AuthUser {
                    id: config.auth.user_id.clone().unwrap_or_default(),
                    email: config.auth.email.clone().unwrap_or_default(),
                },
                access_token: token,
            },
        ),
        None => SessionStore::new(auth_url),
    };

    let bridge = PersistenceBridge::new(config::Config::data_dir()?);
    Ok(SessionController::new(HttpBackend::new(server), session, bridge))
}

async fn handle_login(
    server: Option<String>,
    email: Option<String>,
    signup: bool,
) -> Result<()> {
    let mut controller = build_controller(server, None)?;

    let email = match email {
        Some(email) => email,
        None => prompt("Email: ")?,
    };
    let password = prompt_password("Password: ")?;

    let identity = if signup {
        controller.sign_up(&email, &password).await?
    } else {
        controller.sign_in(&email, &password).await?
    };

    let mut config = config::Config::load().unwrap_or_default();
    config.remote.token = Some(identity.access_token.clone());
    config.auth.user_id = Some(identity.user.id.clone());
    config.auth.email = Some(identity.user.email.clone());
    config.save()?;

    println!("\x1b[32m✅ Signed in as {}\x1b[0m", identity.user.email);
    Ok(())
}

fn handle_logout(server: Option<String>, token: Option<String>) -> Result<()> {
    let mut controller = build_controller(server, token)?;
    // drops the cached registry state and the persisted selection
    controller.sign_out();

    let mut config = config::Config::load().unwrap_or_default();
    config.clear_session();
    config.save()?;

    println!("\x1b[32m✅ Signed out\x1b[0m");
    Ok(())
}

fn handle_whoami() -> Result<()> {
    let config = config::Config::load().unwrap_or_default();
    match (&config.remote.token, &config.auth.email) {
        (Some(_), Some(email)) => {
            println!("\x1b[32m✓ Signed in as {email}\x1b[0m");
        }
        (Some(_), None) => {
            println!("\x1b[32m✓ Signed in\x1b[0m");
        }
        _ => {
            println!("\x1b[33m✗ Not signed in\x1b[0m");
            println!("Run '\x1b[1mcsvchat login\x1b[0m' to authenticate");
        }
    }
    Ok(())
}

async fn handle_upload(
    server: Option<String>,
    token: Option<String>,
    file: PathBuf,
    force: bool,
    reuse: bool,
) -> Result<()> {
    let mut controller = build_controller(server, token)?;

    let filename = file
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid file name: {}", file.display()))?;
    let bytes = std::fs::read(&file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    println!("Uploading {filename}...");
    let progress = spawn_progress_printer(controller.reconciler().progress_probe());
    let phase = controller
        .upload(
            &filename,
            bytes,
            UploadOptions {
                force_upload: force,
                reuse,
            },
        )
        .await;
    progress.abort();
    eprint!("\r        \r");
    let phase = phase?;

    if let UploadPhase::DuplicateDetected { existing } = &phase {
        println!("This file matches an existing dataset:");
        println!(
            "  {} ({} rows, uploaded {})",
            existing.dataset_name,
            existing.row_count,
            existing.created_at.format("%Y-%m-%d")
        );
        let resolved = loop {
            let choice = prompt("Use [e]xisting, upload as [n]ew, or [c]ancel? ")?;
            match choice.trim().to_lowercase().as_str() {
                "e" | "existing" => break controller.resolve_reuse().await?,
                "n" | "new" => break controller.resolve_force_new().await?,
                "c" | "cancel" => {
                    controller.cancel_upload();
                    println!("Upload cancelled");
                    return Ok(());
                }
                _ => continue,
            }
        };
        report_upload_outcome(&controller, &resolved)?;
        show_storage_warning_once()?;
        return Ok(());
    }

    report_upload_outcome(&controller, &phase)?;
    show_storage_warning_once()?;
    Ok(())
}

fn report_upload_outcome(
    controller: &SessionController<HttpBackend>,
    phase: &UploadPhase,
) -> Result<()> {
    match phase {
        UploadPhase::Done { reused, .. } => {
            if let Some(dataset) = controller.registry().selected() {
                if *reused {
                    println!(
                        "\x1b[32m✅ Reusing existing dataset '{}'\x1b[0m",
                        dataset.dataset_name
                    );
                } else {
                    println!(
                        "\x1b[32m✅ Uploaded '{}' ({} rows)\x1b[0m",
                        dataset.dataset_name, dataset.row_count
                    );
                }
                println!("Columns: {}", dataset.column_names.join(", "));
                println!("Ask away: csvchat ask \"...\"");
            }
            Ok(())
        }
        UploadPhase::Failed { message } => anyhow::bail!("Upload failed: {message}"),
        _ => Ok(()),
    }
}

async fn handle_datasets(
    server: Option<String>,
    token: Option<String>,
    action: DatasetsAction,
) -> Result<()> {
    let mut controller = build_controller(server, token)?;
    controller.startup().await?;

    match action {
        DatasetsAction::List => {
            if controller.registry().datasets().is_empty() {
                println!("No datasets yet. Upload one with 'csvchat upload <file.csv>'");
                return Ok(());
            }
            let selected_id = controller.registry().selected().map(|d| d.id.clone());
            for dataset in controller.registry().datasets() {
                let marker = if Some(&dataset.id) == selected_id.as_ref() {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{marker} {}  {}  ({} rows, {} columns, {})",
                    dataset.id,
                    dataset.dataset_name,
                    dataset.row_count,
                    dataset.column_names.len(),
                    dataset.created_at.format("%Y-%m-%d")
                );
            }
        }
        DatasetsAction::Select { id } => {
            let dataset = controller.select_by_id(&id)?;
            println!("Selected '{}'", dataset.dataset_name);
        }
        DatasetsAction::Delete { id, yes } => {
            if !yes && !confirm(&format!("Delete dataset {id}? This cannot be undone"))? {
                println!("Aborted");
                return Ok(());
            }
            controller.delete_dataset(&id).await?;
            println!("\x1b[32m✅ Deleted {id}\x1b[0m");
        }
    }
    Ok(())
}

async fn handle_ask(
    server: Option<String>,
    token: Option<String>,
    question: String,
) -> Result<()> {
    let mut controller = build_controller(server, token)?;
    controller.startup().await?;

    let response = controller.ask(&question).await?;
    println!("{}", response.answer);
    if let Some(sql) = &response.generated_sql {
        println!("\x1b[90msql: {sql}\x1b[0m");
    }
    if response.is_no_data() {
        println!("\x1b[90m(query matched no rows)\x1b[0m");
    }
    Ok(())
}

fn handle_history(
    server: Option<String>,
    token: Option<String>,
    search: Option<String>,
    action: Option<HistoryAction>,
) -> Result<()> {
    let mut controller = build_controller(server, token)?;

    if let Some(HistoryAction::Clear { yes }) = action {
        if !yes && !confirm("Clear all stored history?")? {
            println!("Aborted");
            return Ok(());
        }
        controller.chat_mut().clear();
        println!("History cleared");
        return Ok(());
    }

    let items: Vec<_> = match &search {
        Some(query) => controller.chat().search(query),
        None => controller.chat().history().iter().collect(),
    };
    if items.is_empty() {
        println!("No history");
        return Ok(());
    }
    for item in items {
        let marker = if item.success { " " } else { "!" };
        println!(
            "{marker} [{}] {}",
            item.timestamp.format("%Y-%m-%d %H:%M"),
            item.question
        );
        println!("    {}", item.answer);
        if !item.sql.is_empty() {
            println!("    \x1b[90m{}\x1b[0m", item.sql);
        }
    }
    Ok(())
}

fn handle_new_chat(server: Option<String>, token: Option<String>) -> Result<()> {
    let mut controller = build_controller(server, token)?;
    controller.new_chat();
    println!("Started a new chat; no dataset selected");
    Ok(())
}

async fn run_interactive(server: Option<String>, token: Option<String>) -> Result<()> {
    let mut controller = build_controller(server, token)?;

    if controller.session().current().is_none() {
        eprintln!("\x1b[33m🔐 Not signed in.\x1b[0m");
        eprintln!("   Run '\x1b[1mcsvchat login\x1b[0m' to authenticate.");
        return Ok(());
    }

    controller.startup().await?;
    show_storage_warning_once()?;

    if controller.registry().selected().is_none() {
        eprintln!("No dataset selected. Upload one with 'csvchat upload <file.csv>'");
        eprintln!("or pick one with 'csvchat datasets select <id>'.");
    }

    tracing::info!("Starting interactive chat");
    tui::run(controller).await
}

/// Renders the reconciler's progress signal while the server is working
fn spawn_progress_printer(probe: std::sync::Arc<std::sync::atomic::AtomicU8>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            let percent = probe.load(std::sync::atomic::Ordering::Relaxed);
            eprint!("\r  {percent:>3}%");
        }
    })
}

/// Prints the local-storage notice the first time, then stays quiet
fn show_storage_warning_once() -> Result<()> {
    let bridge = PersistenceBridge::new(config::Config::data_dir()?);
    if !bridge.is_warning_dismissed() {
        eprintln!(
            "\x1b[33mNote: your dataset selection is remembered on this machine for 24 hours; chat history stays until you clear it.\x1b[0m"
        );
        bridge.dismiss_warning();
    }
    Ok(())
}

fn prompt(message: &str) -> Result<String> {
    print!("{message}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn confirm(message: &str) -> Result<bool> {
    let answer = prompt(&format!("{message} [y/N]: "))?;
    Ok(matches!(answer.to_lowercase().as_str(), "y" | "yes"))
}

/// Reads a password without echoing it
fn prompt_password(message: &str) -> Result<String> {
    print!("{message}");
    std::io::stdout().flush()?;

    crossterm::terminal::enable_raw_mode()?;
    let result = read_password_raw();
    crossterm::terminal::disable_raw_mode()?;
    println!();
    result
}

fn read_password_raw() -> Result<String> {
    use crossterm::event::{Event, KeyCode, KeyModifiers};

    let mut password = String::new();
    loop {
        if let Event::Key(key) = crossterm::event::read()? {
            match key.code {
                KeyCode::Enter => return Ok(password),
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    anyhow::bail!("Cancelled")
                }
                KeyCode::Char(c) => password.push(c),
                KeyCode::Backspace => {
                    password.pop();
                }
                _ => {}
            }
        }
    }
}

fn handle_config_command(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Set { key, value } => {
            let mut config = config::Config::load().unwrap_or_default();
            match key.as_str() {
                "server" => config.remote.server = Some(value),
                "token" => config.remote.token = Some(value),
                "auth_url" => config.auth.url = Some(value),
                _ => anyhow::bail!(
                    "Unknown config key: {}. Valid keys: server, token, auth_url",
                    key
                ),
            }
            config.save()?;
            println!("Configuration saved");
        }
        ConfigAction::Get { key } => {
            let config = config::Config::load()?;
            let value = match key.as_str() {
                "server" => config.remote.server.unwrap_or_default(),
                "token" => config.remote.token.map(|_| "****").unwrap_or_default().to_string(),
                "auth_url" => config.auth.url.unwrap_or_default(),
                _ => anyhow::bail!("Unknown config key: {}", key),
            };
            println!("{}", value);
        }
        ConfigAction::Show => {
            let config = config::Config::load()?;
            println!("server: {}", config.remote.server.unwrap_or_default());
            println!("token: {}", config.remote.token.map(|_| "****").unwrap_or_default());
            println!("auth_url: {}", config.auth.url.unwrap_or_default());
            println!("email: {}", config.auth.email.unwrap_or_default());
        }
        ConfigAction::Path => {
            let path = config::Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}
