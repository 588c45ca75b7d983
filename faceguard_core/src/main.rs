//! FaceGuard - CLI
//!
//! Command-line front end over [`AppContext`]. Face captures are JSON
//! `Candidate` documents produced by the external detector.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};

use faceguard_core::config::CONFIG_FILE;
use faceguard_core::crypto::VaultKey;
use faceguard_core::{
    spawn_poller, AppContext, AuthOutcome, Candidate, CaptureOutcome, ForegroundProbe, ForegroundSource,
    FrameObservation, GateHandle, GateObserver, GateStatus, GuardConfig, GuardError, GuardResult, SqliteStore,
};
use faceguard_keystore::secrecy::SecretBox;
use faceguard_keystore::FileKeyStore;

const KEYSTORE_FILE: &str = "keys.json";
const DATABASE_FILE: &str = "faceguard.db";

#[derive(Parser)]
#[command(name = "faceguard")]
#[command(author = "FaceGuard")]
#[command(version = faceguard_core::VERSION)]
#[command(about = "FaceGuard - face-gated protection for apps and hidden files")]
struct Cli {
    /// Data directory
    #[arg(short, long, default_value = "./faceguard-data")]
    data_dir: PathBuf,

    /// Key store passphrase
    #[arg(short, long)]
    passphrase: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory, key store and config
    Init,

    /// Show enrollment, learning and protection status
    Status,

    /// Submit enrollment captures
    Enroll {
        /// Capture JSON files
        #[arg(required = true)]
        captures: Vec<PathBuf>,
    },

    /// Authenticate one capture
    Authenticate {
        capture: PathBuf,
    },

    /// Set the backup password
    SetPassword {
        #[arg(short = 'w', long)]
        password: String,
    },

    /// Manage protected apps
    Apps {
        #[command(subcommand)]
        action: AppsAction,
    },

    /// Manage protected files
    Files {
        #[command(subcommand)]
        action: FilesAction,
    },

    /// Hide one protected file, or all of them
    Hide {
        id: Option<String>,
    },

    /// Reveal one hidden file, or all of them
    Reveal {
        id: Option<String>,

        /// Backup password
        #[arg(short = 'w', long)]
        password: String,
    },

    /// Adaptive learning controls
    Learning {
        #[command(subcommand)]
        action: LearningAction,
    },

    /// Run the protection gate, driven by commands on stdin
    Monitor,
}

#[derive(Subcommand)]
enum AppsAction {
    Add { app: String },
    Remove { app: String },
    List,
}

#[derive(Subcommand)]
enum FilesAction {
    Protect { path: PathBuf },
    Unprotect { id: String },
    List,
}

#[derive(Subcommand)]
enum LearningAction {
    Enable,
    Disable,
    /// Drop everything learned since enrollment
    Clear,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn open_context(data_dir: &Path, passphrase: String) -> Result<AppContext> {
    fs::create_dir_all(data_dir).with_context(|| format!("creating {}", data_dir.display()))?;

    let config = GuardConfig::load_or_default(data_dir)?;
    let passphrase = SecretBox::new(Box::new(passphrase));
    let keys = FileKeyStore::open_or_create(data_dir.join(KEYSTORE_FILE), &passphrase)
        .context("opening key store")?;

    let store_key = VaultKey::from_provider(&keys, &config.store_key_id)?;
    let store = Arc::new(SqliteStore::open(&data_dir.join(DATABASE_FILE), &store_key)?);

    Ok(AppContext::new(config, data_dir, store, &keys)?)
}

fn read_candidate(path: &Path) -> Result<Candidate> {
    let json = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("parsing {}", path.display()))
}

fn run(cli: Cli) -> Result<()> {
    let ctx = open_context(&cli.data_dir, cli.passphrase)?;

    match cli.command {
        Commands::Init => {
            let config_path = cli.data_dir.join(CONFIG_FILE);
            if !config_path.exists() {
                ctx.config().save(&cli.data_dir)?;
            }
            println!("✅ FaceGuard initialized at {}", cli.data_dir.display());
            println!("   {}  - configuration", CONFIG_FILE);
            println!("   {}     - wrapped keys", KEYSTORE_FILE);
            println!("   {}  - sealed state", DATABASE_FILE);
            println!("   {}/      - hidden files", ctx.config().vault.hidden_dir);
        }

        Commands::Status => {
            let settings = ctx.settings().get();
            let learner = ctx.learner_status();
            let record = ctx.gate_record()?;

            println!("📊 FaceGuard status");
            println!("{:-<50}", "");
            println!("Enrolled:          {}", settings.face_enrolled);
            println!("Templates:         {}/{}", learner.templates, learner.capacity);
            println!("Adaptive learning: {}", learner.learning_enabled);
            println!("Multi-face alarm:  {}", settings.multi_face_detection);
            println!("Backup password:   {}", ctx.has_backup_password()?);
            println!("Protected apps:    {}", ctx.apps().len());
            println!(
                "Protected files:   {} ({} hidden)",
                ctx.vault().list().len(),
                ctx.vault().hidden_count()
            );
            println!(
                "Failures:          face {}, password {}",
                record.face_failures, record.password_failures
            );
            if let Some(until) = record.locked_until {
                println!("Locked until:      {}", until);
            }
        }

        Commands::Enroll { captures } => {
            for path in &captures {
                let candidate = read_candidate(path)?;
                match ctx.submit_capture(&candidate)? {
                    CaptureOutcome::Accepted { captured, required } => {
                        println!("📸 {} accepted ({}/{})", path.display(), captured, required)
                    }
                    CaptureOutcome::Rejected { reason, captured, required } => {
                        println!("⚠️  {} rejected: {:?} ({}/{})", path.display(), reason, captured, required)
                    }
                    CaptureOutcome::Completed { templates } => {
                        println!("✅ Enrollment complete ({} templates)", templates)
                    }
                }
            }

            let (captured, required) = ctx.enrollment_progress();
            if captured > 0 {
                println!("Enrollment incomplete: {}/{} good captures", captured, required);
            }
        }

        Commands::Authenticate { capture } => {
            let frame = FrameObservation::Single(read_candidate(&capture)?);
            match ctx.authenticate(&frame) {
                Some(Ok(outcome)) => println!("✅ {}", serde_json::to_string(&outcome)?),
                Some(Err(e)) => return Err(e.into()),
                None => bail!("authentication already in progress"),
            }
        }

        Commands::SetPassword { password } => {
            ctx.set_backup_password(&password)?;
            println!("🔑 Backup password set");
        }

        Commands::Apps { action } => match action {
            AppsAction::Add { app } => {
                if ctx.apps().add(&app)? {
                    println!("🔒 Protecting {}", app);
                } else {
                    println!("{} is already protected", app);
                }
            }
            AppsAction::Remove { app } => {
                if ctx.apps().remove(&app)? {
                    println!("🔓 No longer protecting {}", app);
                } else {
                    println!("{} was not protected", app);
                }
            }
            AppsAction::List => {
                let apps = ctx.apps().list();
                if apps.is_empty() {
                    println!("📭 No protected apps");
                }
                for app in apps {
                    println!("  {}", app);
                }
            }
        },

        Commands::Files { action } => match action {
            FilesAction::Protect { path } => {
                let record = ctx.protect_file(&path)?;
                println!("🔒 {} protected as {}", record.name, record.id);
            }
            FilesAction::Unprotect { id } => {
                let record = ctx.unprotect_file(&id)?;
                println!("🔓 {} restored to {}", record.name, record.original_path.display());
            }
            FilesAction::List => {
                let files = ctx.vault().list();
                if files.is_empty() {
                    println!("📭 No protected files");
                } else {
                    println!("{:<34} {:<6} {:<7} {:>10}  NAME", "ID", "KIND", "HIDDEN", "SIZE");
                    for f in files {
                        println!(
                            "{:<34} {:<6} {:<7} {:>10}  {}",
                            f.id,
                            f.kind.label(),
                            f.is_encrypted,
                            f.size,
                            f.name
                        );
                    }
                }
            }
        },

        Commands::Hide { id } => {
            let count = ctx.hide(id.as_deref())?;
            println!("🙈 {} file(s) hidden", count);
        }

        Commands::Reveal { id, password } => {
            let count = ctx.reveal_with_password(id.as_deref(), &password)?;
            println!("👀 {} file(s) revealed", count);
        }

        Commands::Learning { action } => match action {
            LearningAction::Enable => {
                ctx.set_learning_enabled(true)?;
                println!("🧠 Adaptive learning enabled");
            }
            LearningAction::Disable => {
                ctx.set_learning_enabled(false)?;
                println!("🧠 Adaptive learning disabled");
            }
            LearningAction::Clear => {
                let removed = ctx.clear_learning_data()?;
                println!("🧹 Removed {} learned template(s)", removed);
            }
        },

        Commands::Monitor => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(monitor(ctx))?;
        }
    }

    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// MONITOR
// ═══════════════════════════════════════════════════════════════════════════

struct ConsoleObserver;

impl GateObserver for ConsoleObserver {
    fn on_status(&self, status: &GateStatus) {
        let app = status.app.as_deref().unwrap_or("-");
        match status.lockout_remaining_secs {
            Some(secs) => println!("🛡️  {} [{}] locked for {}s", status.state, app, secs),
            None => println!(
                "🛡️  {} [{}] face {} / password {} attempts left",
                status.state, app, status.face_attempts_left, status.password_attempts_left
            ),
        }
    }

    fn on_auth_requested(&self, app: &str) {
        println!("👤 Authenticate to open {}", app);
    }

    fn on_rejected(&self, error: &GuardError) {
        println!("⛔ {}", error);
    }
}

/// Last app typed at the prompt, replayed by the poller
#[derive(Default)]
struct TypedForeground(Mutex<Option<String>>);

impl ForegroundProbe for TypedForeground {
    fn foreground_app(&self) -> Option<String> {
        self.0.lock().clone()
    }
}

async fn monitor(ctx: AppContext) -> Result<()> {
    let (gate, task) = ctx.spawn_gate(Arc::new(ConsoleObserver))?;

    let probe = Arc::new(TypedForeground::default());
    let interval = Duration::from_millis(ctx.config().gate.poll_interval_ms);
    let poller = spawn_poller(gate.clone(), probe.clone(), interval);

    println!("Commands: fg <app> | faces | auth <capture.json> | password <pw> | retry | cancel | quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, arg) = line
            .split_once(' ')
            .map(|(c, a)| (c, a.trim()))
            .unwrap_or((line, ""));

        if matches!(command, "quit" | "exit") {
            break;
        }
        if let Err(e) = handle_line(&ctx, &gate, &probe, command, arg).await {
            println!("❌ {:#}", e);
        }
    }

    poller.abort();
    drop(gate);
    task.await?;

    Ok(())
}

async fn handle_line(
    ctx: &AppContext,
    gate: &GateHandle,
    probe: &TypedForeground,
    command: &str,
    arg: &str,
) -> Result<()> {
    match command {
        "" => {}
        "fg" if !arg.is_empty() => {
            *probe.0.lock() = Some(arg.to_string());
            gate.foreground(arg, ForegroundSource::Event).await?;
        }
        "faces" => {
            let frame = FrameObservation::MultipleFaces { count: 2 };
            report(ctx.authenticate_for_gate(gate, &frame).await);
        }
        "auth" if !arg.is_empty() => {
            let frame = FrameObservation::Single(read_candidate(Path::new(arg))?);
            report(ctx.authenticate_for_gate(gate, &frame).await);
        }
        "password" if !arg.is_empty() => {
            if let Err(e) = ctx.password_for_gate(gate, arg).await {
                println!("❌ {}", e);
            }
        }
        "retry" => gate.retry().await?,
        "cancel" => gate.cancel().await?,
        other => println!("Unknown command: {}", other),
    }
    Ok(())
}

fn report(result: Option<GuardResult<AuthOutcome>>) {
    match result {
        Some(Ok(AuthOutcome::Accepted { score, .. })) => println!("✅ Face accepted ({:.3})", score),
        Some(Ok(AuthOutcome::MultipleFaces { count })) => println!("👥 {} faces in view", count),
        Some(Err(e)) => println!("❌ {}", e),
        None => println!("⏳ Busy, frame dropped"),
    }
}
