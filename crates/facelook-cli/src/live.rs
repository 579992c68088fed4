//! Webcam loop: capture, recognize, annotate, repeat until `q`.
//!
//! Capture and recognition run on a worker thread. Annotated frames go to
//! the window (when enabled) and to the optional preview file.

use crate::annotate;
use anyhow::{anyhow, Context, Result};
use facelook_core::{FaceDetector, MatchResult, Recognizer};
use facelook_hw::Camera;
use image::RgbImage;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;

const MAX_CONSECUTIVE_CAPTURE_FAILURES: u32 = 5;

pub struct LiveOptions {
    pub device_index: u32,
    pub preview: Option<PathBuf>,
    /// Show annotated frames in a window.
    pub window: bool,
}

pub fn run<D>(recognizer: Recognizer<D>, options: LiveOptions) -> Result<()>
where
    D: FaceDetector + Send + 'static,
{
    let quit = Arc::new(AtomicBool::new(false));
    let (frame_tx, frame_rx) = mpsc::sync_channel::<RgbImage>(1);
    let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<String>>(1);

    let worker = {
        let quit = Arc::clone(&quit);
        let device_index = options.device_index;
        let preview = options.preview.clone();
        let frames = options.window.then_some(frame_tx);
        std::thread::Builder::new()
            .name("facelook-capture".into())
            .spawn(move || {
                capture_loop(recognizer, device_index, preview, frames, &quit, ready_tx)
            })
            .context("failed to spawn capture thread")?
    };

    // Camera errors surface here, before any window opens.
    let device_path = match ready_rx.recv() {
        Ok(Ok(path)) => path,
        Ok(Err(e)) => {
            let _ = worker.join();
            return Err(e);
        }
        Err(_) => return join_worker(worker),
    };

    spawn_quit_watcher(Arc::clone(&quit));
    println!("Recognizing on {device_path}. Type q and press Enter to quit.");

    if options.window {
        show_window(frame_rx, Arc::clone(&quit))?;
        quit.store(true, Ordering::Relaxed);
    } else {
        drop(frame_rx);
    }

    join_worker(worker)
}

fn join_worker(worker: std::thread::JoinHandle<Result<()>>) -> Result<()> {
    worker
        .join()
        .map_err(|_| anyhow!("capture thread panicked"))?
}

#[cfg(feature = "window")]
fn show_window(frames: Receiver<RgbImage>, quit: Arc<AtomicBool>) -> Result<()> {
    crate::window::run(frames, quit)
}

#[cfg(not(feature = "window"))]
fn show_window(_frames: Receiver<RgbImage>, _quit: Arc<AtomicBool>) -> Result<()> {
    anyhow::bail!("this build of facelook has no window support; use --no-window")
}

fn capture_loop<D: FaceDetector>(
    mut recognizer: Recognizer<D>,
    device_index: u32,
    preview: Option<PathBuf>,
    frames: Option<SyncSender<RgbImage>>,
    quit: &AtomicBool,
    ready: SyncSender<Result<String>>,
) -> Result<()> {
    let device_path = Camera::device_path_for_index(device_index);
    let opened = Camera::open(&device_path)
        .with_context(|| format!("failed to open camera {device_path}"));
    let camera = match opened {
        Ok(camera) => camera,
        Err(e) => {
            let _ = ready.send(Err(e));
            return Ok(());
        }
    };
    let mut stream = match camera.stream().context("failed to start capture stream") {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return Ok(());
        }
    };

    tracing::info!(
        device = %device_path,
        width = camera.width,
        height = camera.height,
        format = ?camera.pixel_format(),
        entries = recognizer.database().len(),
        "live capture starting"
    );
    let _ = ready.send(Ok(device_path));

    let mut failures = 0;
    let mut last_summary = String::new();

    while !quit.load(Ordering::Relaxed) {
        let frame = match stream.next_frame() {
            Ok(frame) => {
                failures = 0;
                frame
            }
            Err(e) => {
                failures += 1;
                tracing::warn!(error = %e, failures, "frame capture failed");
                if failures >= MAX_CONSECUTIVE_CAPTURE_FAILURES {
                    tracing::info!("camera stream ended");
                    break;
                }
                continue;
            }
        };

        let sequence = frame.sequence;
        let mut image = frame.into_image()?;
        let results = recognizer.recognize(&image)?;
        for result in &results {
            tracing::debug!(
                sequence,
                label = %result.label,
                dissimilarity = result.dissimilarity,
                bbox = ?result.bbox,
                "face"
            );
        }
        annotate::annotate(&mut image, &results);

        let summary = frame_summary(&results);
        if summary != last_summary {
            println!("{summary}");
            last_summary = summary;
        }

        if let Some(path) = &preview {
            if let Err(e) = image.save(path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to write preview");
            }
        }

        if let Some(tx) = &frames {
            match tx.try_send(image) {
                Ok(()) | Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Disconnected(_)) => break,
            }
        }
    }

    Ok(())
}

/// One line per frame: each face's caption, in detector order.
fn frame_summary(results: &[MatchResult]) -> String {
    if results.is_empty() {
        return "no faces".to_string();
    }
    results
        .iter()
        .map(annotate::caption)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Set `quit` once a `q` line arrives on stdin.
fn spawn_quit_watcher(quit: Arc<AtomicBool>) {
    let spawned = std::thread::Builder::new()
        .name("facelook-stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) if is_quit(&line) => {
                        quit.store(true, Ordering::Relaxed);
                        break;
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "could not watch stdin; stop with Ctrl-C");
    }
}

fn is_quit(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case("q")
}
