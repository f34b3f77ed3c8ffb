use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::{ImageSource, ModelFamily, Orientation};
use rollcall_engine::{Attendance, Config, EngineError, EnrollmentImage, EnrollmentRequest, RecognitionRequest};
use rollcall_index::{AnyIndex, SimilarityIndex};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall classroom attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll an identity from one or more photos
    Enroll {
        /// Identity id (e.g. student number)
        id: String,
        /// Enrollment photos
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Head pose of each photo, in the same order (front/left/right/up/down)
        #[arg(short, long, value_delimiter = ',')]
        orientation: Vec<Orientation>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        contact: Option<String>,
    },
    /// Recognize every face in a classroom photo
    Recognize {
        photo: PathBuf,
        /// Comma-separated identity ids to restrict matching to
        #[arg(short, long, value_delimiter = ',')]
        roster: Option<Vec<String>>,
        /// Cosine similarity threshold for this call
        #[arg(short, long)]
        threshold: Option<f32>,
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Tombstone an enrolled identity
    Remove { id: String },
    /// Permanently delete an identity's record, tombstoned or not
    Purge { id: String },
    /// Show one identity's stored metadata
    Show {
        id: String,
        /// Include the reference embedding
        #[arg(long)]
        embedding: bool,
    },
    /// List enrolled identity ids
    List,
    /// Show index statistics
    Stats,
    /// Show the active model and which model files are present
    Models,
    /// Delete every record in the index
    Reset {
        /// Required; reset cannot be undone
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("invalid configuration")?;

    match cli.command {
        Commands::Enroll {
            id,
            images,
            orientation,
            name,
            contact,
        } => {
            if !orientation.is_empty() && orientation.len() != images.len() {
                bail!(
                    "{} orientations given for {} images; give one per image or none",
                    orientation.len(),
                    images.len()
                );
            }
            let images = images
                .iter()
                .enumerate()
                .map(|(i, path)| {
                    let image = EnrollmentImage::new(read_image(path)?);
                    Ok(match orientation.get(i) {
                        Some(o) => image.with_orientation(*o),
                        None => image,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let request = EnrollmentRequest {
                identity_id: id,
                images,
                display_name: name,
                contact,
            };
            let attendance = Attendance::from_config(&config)?;
            match attendance.enroll(&request) {
                Ok(report) => print_json(&report)?,
                Err(EngineError::InsufficientSamples {
                    usable,
                    total,
                    required,
                    samples,
                }) => {
                    print_json(&samples)?;
                    bail!("only {usable} of {total} photos were usable; at least {required} required");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Recognize {
            photo,
            roster,
            threshold,
            top_k,
        } => {
            let request = RecognitionRequest {
                image: read_image(&photo)?,
                roster,
                threshold,
                top_k,
            };
            let attendance = Attendance::from_config(&config)?;
            print_json(&attendance.recognize(&request)?)?;
        }
        Commands::Remove { id } => {
            if open_index(&config)?.remove(&id)? {
                println!("removed {id}");
            } else {
                bail!("{id} is not enrolled");
            }
        }
        Commands::Purge { id } => {
            if open_index(&config)?.purge(&id)? {
                println!("purged {id}");
            } else {
                bail!("no record for {id}");
            }
        }
        Commands::Show { id, embedding } => {
            let Some(stored) = open_index(&config)?.fetch(&id)? else {
                bail!("{id} is not enrolled");
            };
            let mut value = serde_json::to_value(&stored)?;
            if !embedding {
                if let Some(obj) = value.as_object_mut() {
                    obj.remove("embedding");
                }
            }
            print_json(&value)?;
        }
        Commands::List => {
            let ids = open_index(&config)?.identities()?;
            if ids.is_empty() {
                println!("No identities enrolled");
            }
            for id in ids {
                println!("{id}");
            }
        }
        Commands::Stats => {
            let index = open_index(&config)?;
            print_json(&serde_json::json!({
                "backend": index.backend_name(),
                "metric": index.native_metric().as_str(),
                "stats": index.stats()?,
            }))?;
        }
        Commands::Models => {
            let attendance = Attendance::from_config(&config)?;
            let status = attendance.status()?;
            print_json(&serde_json::json!({
                "model_dir": config.model_dir,
                "configured": config.model_family,
                "active": status.model_family,
                "dimension": status.dimension,
                "error": status.model_error,
                "files": model_files(&config.model_dir),
            }))?;
        }
        Commands::Reset { yes } => {
            if !yes {
                bail!("reset deletes every enrolled identity; pass --yes to confirm");
            }
            let removed = open_index(&config)?.reset()?;
            println!("deleted {removed} records");
        }
    }

    Ok(())
}

fn open_index(config: &Config) -> Result<AnyIndex> {
    AnyIndex::open(&config.index).context("failed to open face index")
}

fn read_image(path: &Path) -> Result<ImageSource> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(ImageSource::Bytes(bytes))
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Presence of each family's detector and recognizer files.
fn model_files(model_dir: &Path) -> serde_json::Value {
    [ModelFamily::Arcface, ModelFamily::Legacy]
        .into_iter()
        .map(|family| {
            let spec = family.spec();
            let files: serde_json::Map<String, serde_json::Value> = [spec.detector_file, spec.model_file]
                .into_iter()
                .map(|file| (file.to_string(), model_dir.join(file).exists().into()))
                .collect();
            (family.as_str().to_string(), serde_json::Value::Object(files))
        })
        .collect::<serde_json::Map<_, _>>()
        .into()
}
