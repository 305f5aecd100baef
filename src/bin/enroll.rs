//! enroll - add a face to the registry from a still image.
//!
//! The image must contain exactly one face; the embedding goes into the same
//! SQLite registry the daemon authenticates against.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;

use facegate::{FaceRegistry, Frame, Recognizer, RegistryEntry, SqliteRegistryStore};

#[derive(Parser, Debug)]
#[command(name = "enroll", about = "Enroll a face into the registry from an image file")]
struct Args {
    /// Name to enroll (case-sensitive, unique across the registry).
    #[arg(long, required_unless_present = "list")]
    name: Option<String>,

    /// Path to an image containing exactly one face.
    #[arg(long, required_unless_present = "list")]
    image: Option<PathBuf>,

    /// Registry database path.
    #[arg(long, default_value = "facegate.db", env = "FACEGATE_DB_PATH")]
    db: String,

    /// Recognizer backend.
    #[arg(long, default_value = "cpu")]
    backend: String,

    /// List enrolled names and exit.
    #[arg(long)]
    list: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let registry = FaceRegistry::open(Box::new(SqliteRegistryStore::open(&args.db)?))?;

    if args.list {
        for name in registry.names() {
            println!("{}", name);
        }
        return Ok(());
    }

    let (Some(name), Some(image_path)) = (args.name, args.image) else {
        return Err(anyhow!("--name and --image are required to enroll"));
    };

    let decoded = image::open(&image_path)
        .map_err(|e| anyhow!("failed to read image {}: {}", image_path.display(), e))?
        .to_rgb8();
    let (width, height) = decoded.dimensions();
    let frame = Frame::from_rgb24(decoded.into_raw(), width, height)?;

    let mut recognizer = Recognizer::from_backend_name(&args.backend)?;
    recognizer.warm_up()?;
    let regions = recognizer.detect_faces(&frame)?;
    match regions.len() {
        0 => return Err(anyhow!("no face found in {}", image_path.display())),
        1 => {}
        n => {
            return Err(anyhow!(
                "{} faces found in {}; enrollment needs exactly one",
                n,
                image_path.display()
            ))
        }
    }

    let embedding = recognizer
        .embed(&frame, &regions[0])
        .map_err(|e| anyhow!("face in {} is not usable: {}", image_path.display(), e))?;
    registry.insert(RegistryEntry::new(name.clone(), embedding))?;

    println!("enrolled '{}' ({} entries in {})", name, registry.len(), args.db);
    Ok(())
}
