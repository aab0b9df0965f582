use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "facetrack", about = "FaceTrack attendance CLI")]
struct Cli {
    /// Talk to a daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll face samples for an employee
    Enroll {
        /// Employee ID
        #[arg(short, long)]
        id: String,
        /// Employee display name
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        department: Option<String>,
        /// Job title
        #[arg(short, long)]
        position: Option<String>,
        /// Face crop images (PNG, JPEG, ...)
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Recognize a face without recording attendance
    Recognize {
        image: PathBuf,
    },
    /// Recognize a face and punch attendance on a match
    CheckIn {
        image: PathBuf,
    },
    /// Record attendance manually for an enrolled employee
    Punch {
        /// Employee ID
        id: String,
        /// IN or OUT (alternates automatically when omitted)
        #[arg(short, long)]
        kind: Option<String>,
    },
    /// Show attendance records, newest first
    Attendance {
        /// Only this employee
        #[arg(short, long)]
        employee: Option<String>,
        #[arg(short, long, default_value_t = 20)]
        limit: u32,
    },
    /// List enrolled employees
    List,
    /// Remove an employee and their face samples
    Remove {
        /// Employee ID to remove
        id: String,
    },
    /// Show enrollment totals
    Stats,
    /// Show daemon status
    Status,
}

#[zbus::proxy(
    interface = "org.facetrack.FaceTrack1",
    default_service = "org.facetrack.FaceTrack1",
    default_path = "/org/facetrack/FaceTrack1"
)]
trait FaceTrack {
    async fn enroll(
        &self,
        employee_id: &str,
        name: &str,
        department: &str,
        position: &str,
        images: Vec<Vec<u8>>,
    ) -> zbus::Result<String>;
    async fn recognize(&self, image: Vec<u8>) -> zbus::Result<String>;
    async fn check_in(&self, image: Vec<u8>) -> zbus::Result<String>;
    async fn record_attendance(&self, employee_id: &str, kind: &str) -> zbus::Result<String>;
    async fn attendance(&self, employee_id: &str, limit: u32) -> zbus::Result<String>;
    async fn list_employees(&self) -> zbus::Result<String>;
    async fn delete_employee(&self, employee_id: &str) -> zbus::Result<bool>;
    async fn stats(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = if cli.system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    };
    let conn = conn.context("connecting to D-Bus")?;
    let proxy = FaceTrackProxy::new(&conn)
        .await
        .context("facetrackd not reachable")?;

    let reply = match cli.command {
        Commands::Enroll {
            id,
            name,
            department,
            position,
            images,
        } => {
            let images = images
                .iter()
                .map(|p| read_image(p))
                .collect::<Result<Vec<_>>>()?;
            tracing::debug!(count = images.len(), "sending enrollment samples");
            proxy
                .enroll(
                    &id,
                    &name,
                    department.as_deref().unwrap_or(""),
                    position.as_deref().unwrap_or(""),
                    images,
                )
                .await?
        }
        Commands::Recognize { image } => proxy.recognize(read_image(&image)?).await?,
        Commands::CheckIn { image } => proxy.check_in(read_image(&image)?).await?,
        Commands::Punch { id, kind } => {
            proxy
                .record_attendance(&id, kind.as_deref().unwrap_or(""))
                .await?
        }
        Commands::Attendance { employee, limit } => {
            proxy
                .attendance(employee.as_deref().unwrap_or(""), limit)
                .await?
        }
        Commands::List => proxy.list_employees().await?,
        Commands::Remove { id } => {
            proxy.delete_employee(&id).await?;
            serde_json::json!({ "removed": id }).to_string()
        }
        Commands::Stats => proxy.stats().await?,
        Commands::Status => proxy.status().await?,
    };

    println!("{}", pretty(&reply));
    Ok(())
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

/// Pretty-print a JSON reply; non-JSON text is printed as-is.
fn pretty(reply: &str) -> String {
    serde_json::from_str::<serde_json::Value>(reply)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or_else(|_| reply.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_enroll_requires_images() {
        assert!(Cli::try_parse_from(["facetrack", "enroll", "--id", "1", "--name", "Ada"]).is_err());
        let cli = Cli::try_parse_from(["facetrack", "enroll", "-i", "1", "-n", "Ada", "a.png", "b.png"])
            .unwrap();
        match cli.command {
            Commands::Enroll { id, images, .. } => {
                assert_eq!(id, "1");
                assert_eq!(images.len(), 2);
            }
            _ => panic!("expected enroll"),
        }
    }

    #[test]
    fn test_enroll_details_are_optional() {
        let cli = Cli::try_parse_from([
            "facetrack", "enroll", "-i", "1", "-n", "Ada", "-d", "Research", "a.png",
        ])
        .unwrap();
        match cli.command {
            Commands::Enroll { department, position, .. } => {
                assert_eq!(department.as_deref(), Some("Research"));
                assert_eq!(position, None);
            }
            _ => panic!("expected enroll"),
        }
    }

    #[test]
    fn test_global_system_flag() {
        let cli = Cli::try_parse_from(["facetrack", "stats", "--system"]).unwrap();
        assert!(cli.system);
    }

    #[test]
    fn test_pretty_passes_through_plain_text() {
        assert_eq!(pretty("not json"), "not json");
        assert_eq!(pretty(r#"{"a":1}"#), "{\n  \"a\": 1\n}");
    }
}
