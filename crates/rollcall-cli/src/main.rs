mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use rollcall_core::annotate::{label_text, Annotator};
use rollcall_core::{
    CaptureEvent, CaptureSession, CaptureState, CascadeDetector, ChainedSource, FolderSource,
    RecognitionResult, Recognizer, RecognizerState, Trainer, TrainingWorker,
};
use rollcall_hw::Camera;
use rollcall_store::{prepare_image, Student, StudentStore};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face recognition attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the student roster
    Student {
        #[command(subcommand)]
        command: StudentCommand,
    },
    /// Manage enrolled face images
    Image {
        #[command(subcommand)]
        command: ImageCommand,
    },
    /// Train the recognition model from the enrolled images
    Train {
        /// Also train on a labeled folder tree (<dir>/<student id>/<image>)
        #[arg(long)]
        folder: Option<PathBuf>,
    },
    /// Recognize faces in an image file
    Recognize {
        image: PathBuf,
        /// Write the annotated image here
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Recognize faces live from the camera
    Watch {
        /// Stop after this many frames (default: until Ctrl-C)
        #[arg(short, long)]
        frames: Option<u64>,
        /// Save every annotated frame into this directory
        #[arg(long)]
        save_dir: Option<PathBuf>,
    },
    /// List V4L2 capture devices
    Devices,
}

#[derive(Subcommand)]
enum StudentCommand {
    /// Add a student, or update the one with the same id
    Add {
        id: String,
        name: String,
        birthdate: String,
        class_name: String,
    },
    /// Remove a student and all of their images
    Remove { id: String },
    /// List all students
    List {
        #[arg(long)]
        json: bool,
    },
    /// Find students by id or name
    Search {
        term: String,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ImageCommand {
    /// Add face images (jpg, jpeg, png, gif, bmp) for a student
    Add {
        id: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// List a student's images
    List {
        id: String,
        /// Write the images into this directory
        #[arg(long)]
        export: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Student { command } => student(&config, command),
        Commands::Image { command } => image_cmd(&config, command),
        Commands::Train { folder } => train(&config, folder).await,
        Commands::Recognize {
            image,
            output,
            json,
        } => recognize(&config, &image, output.as_deref(), json),
        Commands::Watch { frames, save_dir } => watch(config, frames, save_dir).await,
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}\t{} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
            Ok(())
        }
    }
}

fn open_store(config: &Config) -> Result<StudentStore> {
    StudentStore::open(&config.db_path)
        .with_context(|| format!("failed to open database {}", config.db_path.display()))
}

fn print_students(students: &[Student], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(students)?);
        return Ok(());
    }
    if students.is_empty() {
        println!("No students");
    }
    for s in students {
        println!("{}\t{}\t{}\t{}", s.id, s.name, s.birthdate, s.class_name);
    }
    Ok(())
}

fn student(config: &Config, command: StudentCommand) -> Result<()> {
    let store = open_store(config)?;
    match command {
        StudentCommand::Add {
            id,
            name,
            birthdate,
            class_name,
        } => {
            store.upsert_student(&Student::new(id.as_str(), name, birthdate, class_name))?;
            println!("Saved student {id}");
        }
        StudentCommand::Remove { id } => {
            if store.remove_student(&id)? {
                println!("Removed student {id}");
            } else {
                bail!("no student with id {id}");
            }
        }
        StudentCommand::List { json } => print_students(&store.list_students()?, json)?,
        StudentCommand::Search { term, json } => print_students(&store.search_students(&term)?, json)?,
    }
    Ok(())
}

fn image_cmd(config: &Config, command: ImageCommand) -> Result<()> {
    let store = open_store(config)?;
    match command {
        ImageCommand::Add { id, files } => {
            if store.student(&id)?.is_none() {
                bail!("no student with id {id}; add the student first");
            }
            let mut added = 0usize;
            for file in &files {
                let stored = prepare_image(file)
                    .map_err(anyhow::Error::from)
                    .and_then(|bytes| Ok(store.add_face_image(&id, &bytes)?));
                match stored {
                    Ok(number) => {
                        added += 1;
                        println!("Added {} as image #{number}", file.display());
                    }
                    Err(e) => tracing::warn!(file = %file.display(), error = %e, "image not added"),
                }
            }
            if added == 0 {
                bail!("no images were added for {id}");
            }
            println!("Added {added} image(s) for {id}");
        }
        ImageCommand::List { id, export } => {
            let images = store.face_images(&id)?;
            if images.is_empty() {
                println!("No images for {id}");
                return Ok(());
            }
            if let Some(dir) = &export {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create {}", dir.display()))?;
            }
            for img in &images {
                let ext = image::guess_format(&img.bytes)
                    .ok()
                    .and_then(|f| f.extensions_str().first().copied())
                    .unwrap_or("bin");
                println!("#{}\t{} bytes\t{ext}", img.image_number, img.bytes.len());
                if let Some(dir) = &export {
                    let path = dir.join(format!("{}_{}.{ext}", img.student_id, img.image_number));
                    std::fs::write(&path, &img.bytes)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                }
            }
        }
    }
    Ok(())
}

async fn train(config: &Config, folder: Option<PathBuf>) -> Result<()> {
    let store = open_store(config)?;
    let counts = store.counts()?;
    if folder.is_none() && (counts.students == 0 || counts.images == 0) {
        bail!(
            "not enough data to train ({} students, {} images); add students and images first",
            counts.students,
            counts.images
        );
    }

    let detector = CascadeDetector::load(&config.cascade_path, config.training)
        .with_context(|| format!("failed to load cascade {}", config.cascade_path.display()))?;
    let handle = TrainingWorker::spawn(Trainer::new(detector, &config.model_path))?;

    let mut source = ChainedSource::new();
    if let Some(dir) = folder {
        source = source.with(FolderSource::new(dir));
    }
    let source = source.with(store);

    println!("Training...");
    let outcome = handle.train_from(Box::new(source)).await?;
    if outcome.persons_trained == 0 {
        println!("No faces found in the training images; the existing model was kept");
    } else {
        println!(
            "Trained {} person(s) from {} face(s) -> {}",
            outcome.persons_trained,
            outcome.faces_used,
            config.model_path.display()
        );
    }
    if outcome.samples_skipped > 0 {
        println!("Skipped {} unreadable image(s)", outcome.samples_skipped);
    }
    Ok(())
}

fn annotator(config: &Config) -> Annotator {
    let Some(path) = &config.font_path else {
        return Annotator::new();
    };
    Annotator::from_font_file(path).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "captions will be drawn without text");
        Annotator::new()
    })
}

fn build_recognizer(config: &Config, store: &StudentStore) -> Result<Recognizer<CascadeDetector>> {
    let detector = CascadeDetector::load(&config.cascade_path, config.recognition)
        .with_context(|| format!("failed to load cascade {}", config.cascade_path.display()))?;
    let recognizer = Recognizer::load(&config.model_path, detector, store, config.label_source)?
        .with_annotator(annotator(config));
    if recognizer.state() == RecognizerState::NoModel {
        eprintln!("warning: no trained model; run `rollcall train` first");
    }
    Ok(recognizer)
}

fn summary(results: &[RecognitionResult]) -> String {
    if results.is_empty() {
        return "no faces".to_string();
    }
    results.iter().map(label_text).collect::<Vec<_>>().join(", ")
}

fn recognize(config: &Config, path: &Path, output: Option<&Path>, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let recognizer = build_recognizer(config, &store)?;
    let frame = image::open(path)
        .with_context(|| format!("failed to read image {}", path.display()))?
        .to_rgb8();

    let recognition = recognizer.recognize(&frame)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&recognition.results)?);
    } else {
        for r in &recognition.results {
            println!(
                "{}\t{:.2}\t{},{} {}x{}",
                r.name, r.confidence, r.region.x, r.region.y, r.region.width, r.region.height
            );
        }
        if recognition.results.is_empty() {
            println!("No faces detected");
        }
    }

    if let Some(out) = output {
        recognition
            .frame
            .save(out)
            .with_context(|| format!("failed to write {}", out.display()))?;
        println!("Annotated image written to {}", out.display());
    }
    Ok(())
}

async fn watch(config: Config, frames: Option<u64>, save_dir: Option<PathBuf>) -> Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            flag.store(true, Ordering::Relaxed);
        }
    });

    tokio::task::spawn_blocking(move || run_watch(&config, frames, save_dir.as_deref(), &stop))
        .await
        .context("capture thread panicked")?
}

fn run_watch(config: &Config, frames: Option<u64>, save_dir: Option<&Path>, stop: &AtomicBool) -> Result<()> {
    let store = open_store(config)?;
    let recognizer = build_recognizer(config, &store)?;
    let camera = Camera::open(&config.camera_device, config.camera_width, config.camera_height)
        .with_context(|| format!("failed to open camera {}", config.camera_device))?;
    if let Some(dir) = save_dir {
        std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let mut stream = camera.stream()?;
    let mut session = CaptureSession::new(&recognizer).with_mirror(config.mirror);
    session.handle(CaptureEvent::Start)?;

    while !stop.load(Ordering::Relaxed) && frames.map_or(true, |n| session.frames_processed() < n) {
        let event = match stream.next_frame() {
            Ok(frame) => CaptureEvent::FrameArrived(frame.image),
            Err(e) => CaptureEvent::FrameFailed(e.to_string()),
        };
        let Some(recognition) = session.handle(event)? else {
            if session.state() == CaptureState::Idle {
                bail!("camera stopped delivering frames");
            }
            continue;
        };

        let n = session.frames_processed();
        println!("frame {n}: {}", summary(&recognition.results));
        if let Some(dir) = save_dir {
            let path = dir.join(format!("frame_{n:06}.png"));
            recognition
                .frame
                .save(&path)
                .with_context(|| format!("failed to write {}", path.display()))?;
        }
    }

    session.handle(CaptureEvent::Stop)?;
    Ok(())
}
