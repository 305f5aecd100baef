//! camera_probe - pull frames from a camera source and report capture and
//! detection statistics. Useful for verifying a device before running the
//! daemon against it.

use anyhow::Result;
use clap::Parser;
use std::time::Instant;

use facegate::{CameraConfig, CameraSource, FrameSource, Recognizer};

#[derive(Parser, Debug)]
#[command(name = "camera_probe", about = "Probe a camera source")]
struct Args {
    /// Device identifier (stub://<name> or a device node).
    #[arg(long, default_value = "stub://probe", env = "FACEGATE_CAMERA_DEVICE")]
    device: String,

    /// Number of frames to pull.
    #[arg(long, default_value_t = 30)]
    frames: u32,

    /// Preferred frame width.
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Preferred frame height.
    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Recognizer backend to run on each frame.
    #[arg(long, default_value = "cpu")]
    backend: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut source = CameraSource::acquire(CameraConfig {
        device: args.device.clone(),
        target_fps: 0,
        width: args.width,
        height: args.height,
    })?;
    let mut recognizer = Recognizer::from_backend_name(&args.backend)?;
    recognizer.warm_up()?;

    let started = Instant::now();
    let mut frames_with_faces = 0u32;
    let mut total_faces = 0usize;
    for _ in 0..args.frames {
        let frame = source.next_frame()?;
        let faces = recognizer.detect_faces(&frame)?;
        if !faces.is_empty() {
            frames_with_faces += 1;
        }
        total_faces += faces.len();
    }
    let elapsed = started.elapsed();

    let stats = source.stats();
    println!("device:            {}", stats.device);
    println!("frames captured:   {}", stats.frames_captured);
    println!("frames with faces: {}", frames_with_faces);
    println!("faces detected:    {}", total_faces);
    println!("healthy:           {}", source.is_healthy());
    println!(
        "effective fps:     {:.1}",
        stats.frames_captured as f64 / elapsed.as_secs_f64().max(1e-6)
    );

    source.release();
    Ok(())
}
