//! Live preview window.

use anyhow::{anyhow, Result};
use eframe::egui;
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

const REPAINT_INTERVAL: Duration = Duration::from_millis(15);

/// Show frames from `frames` until the window is closed, `q` is pressed,
/// `quit` is set elsewhere, or the sender goes away.
pub fn run(frames: Receiver<RgbImage>, quit: Arc<AtomicBool>) -> Result<()> {
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size([800.0, 640.0]),
        ..Default::default()
    };

    eframe::run_native(
        "facelook - live recognition",
        options,
        Box::new(|_cc| Ok(Box::new(LiveWindow::new(frames, quit)))),
    )
    .map_err(|e| anyhow!("window failed: {e}"))
}

struct LiveWindow {
    frames: Receiver<RgbImage>,
    quit: Arc<AtomicBool>,
    texture: Option<egui::TextureHandle>,
    stream_ended: bool,
}

impl LiveWindow {
    fn new(frames: Receiver<RgbImage>, quit: Arc<AtomicBool>) -> Self {
        Self {
            frames,
            quit,
            texture: None,
            stream_ended: false,
        }
    }

    /// Drain the channel and keep only the newest frame.
    fn latest_frame(&mut self) -> Option<RgbImage> {
        let mut latest = None;
        loop {
            match self.frames.try_recv() {
                Ok(frame) => latest = Some(frame),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.stream_ended = true;
                    break;
                }
            }
        }
        latest
    }
}

impl eframe::App for LiveWindow {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if let Some(frame) = self.latest_frame() {
            let size = [frame.width() as usize, frame.height() as usize];
            let color_image = egui::ColorImage::from_rgb(size, frame.as_raw());
            match &mut self.texture {
                Some(texture) => texture.set(color_image, Default::default()),
                None => {
                    self.texture = Some(ctx.load_texture("live", color_image, Default::default()))
                }
            }
        }

        let q_pressed = ctx.input(|i| i.key_pressed(egui::Key::Q));
        if q_pressed || self.stream_ended || self.quit.load(Ordering::Relaxed) {
            self.quit.store(true, Ordering::Relaxed);
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
        }

        egui::CentralPanel::default().show(ctx, |ui| {
            if let Some(texture) = &self.texture {
                let available_size = ui.available_size();
                let texture_size = texture.size_vec2();
                let scale = (available_size.x / texture_size.x)
                    .min(available_size.y / texture_size.y)
                    .min(1.0);
                let display_size = texture_size * scale;

                ui.centered_and_justified(|ui| {
                    ui.image((texture.id(), display_size));
                });
            } else {
                ui.centered_and_justified(|ui| {
                    ui.heading("Waiting for camera...");
                });
            }
        });

        ctx.request_repaint_after(REPAINT_INTERVAL);
    }
}
