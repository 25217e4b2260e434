//! demo - headless end-to-end run on synthetic frames
//!
//! A scripted detector walks a phone toward a standing person and away again
//! while the real pipeline decides, draws and encodes every frame. Time is
//! simulated from the frame rate, so cooldown behaviour is reproducible.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use touchwatch::{
    AlertCue, BoundingBox, DecisionSettings, Detection, FramePipeline, FrameSource, JpegEncoder,
    LogSink, ScriptedBackend, SharedDetector, SourceSettings, SyntheticSource,
};

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;
const PHONE_SIZE: f64 = 20.0;
/// Frames for the phone to cross the frame one way.
const SWEEP_FRAMES: usize = 20;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Number of frames to process.
    #[arg(long, default_value_t = 100)]
    frames: u64,
    /// Output directory for encoded frames.
    #[arg(long, default_value = "demo_out")]
    out: String,
    /// Alert cooldown in seconds.
    #[arg(long, default_value_t = 4.0)]
    cooldown: f64,
    /// Subject box growth factor.
    #[arg(long, default_value_t = 1.1)]
    proximity: f64,
    /// Simulated frames per second.
    #[arg(long, default_value_t = 10)]
    fps: u32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("fps must be >= 1"));
    }
    if !args.proximity.is_finite() || args.proximity <= 1.0 {
        return Err(anyhow!("proximity must be greater than 1.0"));
    }
    let cooldown = Duration::try_from_secs_f64(args.cooldown)
        .map_err(|e| anyhow!("invalid cooldown {}: {}", args.cooldown, e))?;

    let out_dir = PathBuf::from(&args.out);
    fs::create_dir_all(&out_dir)
        .with_context(|| format!("create output directory {}", out_dir.display()))?;

    stage("prepare alert cue");
    let cue_path = out_dir.join("cue.txt");
    fs::write(&cue_path, b"demo alert cue\n")?;
    let cue = AlertCue::load(&cue_path)?;

    stage("connect synthetic source");
    let mut source = SyntheticSource::new(SourceSettings {
        uri: "stub://demo".to_string(),
        width: WIDTH,
        height: HEIGHT,
        // the clock is simulated, so frames are not paced
        target_fps: 0,
    });
    source.connect()?;

    let detector: SharedDetector = Arc::new(Mutex::new(ScriptedBackend::new(sweep_script()?)));
    let settings = DecisionSettings {
        proximity: args.proximity,
        cooldown,
        ..DecisionSettings::default()
    };
    let mut pipeline = FramePipeline::new(detector, Arc::new(LogSink), cue, &settings);
    let encoder = JpegEncoder::default();

    stage("run pipeline");
    let start = Instant::now();
    let mut flagged = 0u64;
    let mut fired = 0u64;
    let mut written = 0u64;
    for index in 0..args.frames {
        let mut frame = source.next_frame()?;
        let now = start + simulated_offset(index, args.fps);
        let decision = pipeline.process(&mut frame, now);
        if decision.flagged {
            flagged += 1;
        }
        if decision.alert.fired() {
            fired += 1;
            println!(
                "frame {:>5}: alert fired at t={:.1}s",
                decision.sequence,
                (now - start).as_secs_f64()
            );
        }

        let jpeg = match encoder.encode(&frame) {
            Ok(jpeg) => jpeg,
            Err(err) => {
                log::warn!("frame {} dropped: {}", frame.sequence, err);
                continue;
            }
        };
        let path = out_dir.join(format!("frame_{:05}.jpg", frame.sequence));
        fs::write(&path, jpeg).with_context(|| format!("write {}", path.display()))?;
        written += 1;
    }

    println!(
        "frames={} written={} flagged={} alerts_fired={} out={}",
        args.frames,
        written,
        flagged,
        fired,
        out_dir.display()
    );
    Ok(())
}

/// Time of frame `index` since the start of a run at `fps`.
fn simulated_offset(index: u64, fps: u32) -> Duration {
    let fps = u64::from(fps);
    let whole = Duration::from_secs(index / fps);
    let nanos = (index % fps) * 1_000_000_000 / fps;
    whole + Duration::from_nanos(nanos)
}

fn stage(msg: &str) {
    eprintln!("demo: {}", msg);
}

/// A person on the left third of the frame and a phone sweeping across and back.
fn sweep_script() -> Result<Vec<Vec<Detection>>> {
    let person = Detection::new("person", BoundingBox::new(40.0, 30.0, 130.0, 230.0)?)
        .with_confidence(0.91);
    let travel = f64::from(WIDTH) - PHONE_SIZE;
    let mut script = Vec::with_capacity(SWEEP_FRAMES * 2);
    for step in 0..SWEEP_FRAMES * 2 {
        let progress = if step < SWEEP_FRAMES {
            step as f64 / SWEEP_FRAMES as f64
        } else {
            (SWEEP_FRAMES * 2 - step) as f64 / SWEEP_FRAMES as f64
        };
        let min_x = travel * progress;
        let phone = Detection::new(
            "cell phone",
            BoundingBox::new(min_x, 100.0, min_x + PHONE_SIZE, 100.0 + PHONE_SIZE)?,
        )
        .with_confidence(0.67);
        script.push(vec![person.clone(), phone]);
    }
    Ok(script)
}
