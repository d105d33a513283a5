use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[zbus::proxy(
    interface = "org.aura.FaceId1",
    default_service = "org.aura.FaceId1",
    default_path = "/org/aura/FaceId1"
)]
trait FaceId {
    async fn recognize(&self, image: &str) -> zbus::Result<String>;
    async fn enroll(&self, external_id: &str, images: Vec<String>) -> zbus::Result<String>;
    async fn test_detection(&self, image: &str) -> zbus::Result<String>;
    async fn load_gallery(&self, identities: &str) -> zbus::Result<String>;
    async fn health(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "aura", about = "Aura face identification CLI")]
struct Cli {
    /// Talk to a daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Identify the faces in an image
    Recognize {
        image: PathBuf,
    },
    /// Compute a representative embedding from several photos of one person
    Enroll {
        /// External identifier for the person
        #[arg(short, long)]
        id: String,
        /// 3 to 50 photos
        #[arg(required = true, num_args = 1..)]
        images: Vec<PathBuf>,
    },
    /// Locate faces without recognizing them
    Detect {
        image: PathBuf,
    },
    /// Replace the daemon's gallery from a JSON file
    Load {
        file: PathBuf,
    },
    /// Show daemon health
    Health,
    /// List loaded identities
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let connection = if cli.system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("connecting to D-Bus")?;
    let proxy = FaceIdProxy::new(&connection).await.context("is aurad running?")?;

    let response = match cli.command {
        Commands::Recognize { image } => proxy.recognize(&encode_file(&image)?).await?,
        Commands::Enroll { id, images } => {
            let encoded = images.iter().map(|p| encode_file(p)).collect::<Result<Vec<_>>>()?;
            proxy.enroll(&id, encoded).await?
        }
        Commands::Detect { image } => proxy.test_detection(&encode_file(&image)?).await?,
        Commands::Load { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            proxy.load_gallery(&text).await?
        }
        Commands::Health => proxy.health().await?,
        Commands::Status => proxy.status().await?,
    };

    let (pretty, success) = render(&response)?;
    println!("{pretty}");
    if !success {
        std::process::exit(1);
    }
    Ok(())
}

fn encode_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    if bytes.is_empty() {
        bail!("{} is empty", path.display());
    }
    Ok(STANDARD.encode(bytes))
}

/// Pretty-print a daemon response and report its `success` flag.
fn render(response: &str) -> Result<(String, bool)> {
    let value: serde_json::Value =
        serde_json::from_str(response).context("daemon returned invalid JSON")?;
    let success = value.get("success").and_then(|s| s.as_bool()).unwrap_or(false);
    Ok((serde_json::to_string_pretty(&value)?, success))
}
