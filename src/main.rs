#![allow(dead_code)]

//! xyscope - X-Y (Lissajous) oscilloscope
//!
//! Visualizes a stereo signal as an X-Y plot: left channel on the
//! horizontal axis, right channel on the vertical. Two sources are
//! supported, selected in the top bar:
//! - Live: the system output mix (loopback where the platform allows it)
//! - File: any audio file symphonia can decode, played back audibly while
//!   a sliding window around the playback cursor is traced

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use eframe::egui;

mod audio;
mod render;
mod settings;

use audio::{
    AudioSource, CaptureState, FilePhase, FileSession, HistoryBuffer, LiveCapture,
    LoopbackEndpoint, SourceStatus,
};
use render::Oscilloscope;
use settings::Config;

/// Input source mode
#[derive(Debug, Clone, Copy, PartialEq, Default)]
enum InputMode {
    #[default]
    Live,
    File,
}

fn main() -> eframe::Result<()> {
    env_logger::init();
    log::info!("starting xyscope");

    let config = Config::load();

    // A positional argument opens that file directly; a bad path is
    // rejected before any window appears.
    let initial_file = std::env::args().nth(1).map(PathBuf::from);
    if let Some(path) = &initial_file {
        if !path.exists() {
            log::error!("file does not exist: {}", path.display());
            std::process::exit(1);
        }
    }

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([640.0, 560.0])
            .with_title("xyscope"),
        ..Default::default()
    };

    eframe::run_native(
        "xyscope",
        options,
        Box::new(move |_cc| Ok(Box::new(ScopeApp::new(config, initial_file)))),
    )
}

struct ScopeApp {
    config: Config,
    input_mode: InputMode,
    capture: Option<LiveCapture>,
    file: Option<FileSession>,
    oscilloscope: Oscilloscope,
}

impl ScopeApp {
    fn new(config: Config, initial_file: Option<PathBuf>) -> Self {
        let mut app = Self {
            config,
            input_mode: InputMode::default(),
            capture: None,
            file: None,
            oscilloscope: Oscilloscope::new(),
        };
        match initial_file {
            Some(path) => {
                app.input_mode = InputMode::File;
                app.open_file(path);
            }
            None => app.start_capture(),
        }
        app
    }

    fn start_capture(&mut self) {
        let history = Arc::new(HistoryBuffer::new(self.config.history_capacity));
        self.capture = Some(LiveCapture::spawn(
            LoopbackEndpoint::open,
            history,
            self.config.capture_options(),
        ));
    }

    fn stop_capture(&mut self) {
        // Dropping the handle joins the producer thread.
        self.capture = None;
    }

    fn open_file(&mut self, path: PathBuf) {
        match FileSession::open(
            &path,
            self.config.channel_options(),
            self.config.window_half_width,
        ) {
            Ok(session) => self.file = Some(session),
            Err(e) => {
                log::error!("failed to open {}: {e}", path.display());
                self.file = None;
            }
        }
    }

    fn capture_status_label(&self) -> String {
        match &self.capture {
            None => "Stopped".to_string(),
            Some(capture) => match capture.state() {
                CaptureState::Idle => "Starting…".to_string(),
                CaptureState::Running => match capture.format() {
                    Some(f) => format!("Capturing ({} Hz, {} ch)", f.sample_rate, f.channels),
                    None => "Capturing".to_string(),
                },
                CaptureState::Recovering => "Recovering…".to_string(),
                CaptureState::Stopped => match capture.error() {
                    Some(e) => format!("Error: {e}"),
                    None => "Stopped".to_string(),
                },
            },
        }
    }

    fn top_bar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.heading("xyscope");
            ui.separator();

            ui.selectable_value(&mut self.input_mode, InputMode::Live, "Live");
            ui.selectable_value(&mut self.input_mode, InputMode::File, "File");
            ui.separator();

            match self.input_mode {
                InputMode::Live => {
                    let capturing = self
                        .capture
                        .as_ref()
                        .is_some_and(|c| c.state() != CaptureState::Stopped);
                    let button_text = if capturing { "⏹ Stop" } else { "▶ Capture" };
                    if ui.button(button_text).clicked() {
                        if capturing {
                            self.stop_capture();
                        } else {
                            self.start_capture();
                        }
                    }
                    ui.separator();
                    ui.label(self.capture_status_label());
                }
                InputMode::File => {
                    if ui.button("📂 Open").clicked() {
                        if let Some(path) = rfd::FileDialog::new()
                            .add_filter(
                                "Audio",
                                &["wav", "mp3", "flac", "ogg", "m4a", "aac", "aiff"],
                            )
                            .pick_file()
                        {
                            self.open_file(path);
                        }
                    }
                    ui.separator();
                    if let Some(session) = &self.file {
                        ui.label(&session.info.filename);
                        ui.separator();
                        let phase = match session.phase() {
                            FilePhase::Decoding => "Decoding…",
                            FilePhase::Playing => "Playing",
                            FilePhase::Paused => "Paused",
                            FilePhase::Finished => "Finished",
                            FilePhase::Failed => "Failed",
                        };
                        ui.label(phase);
                    } else {
                        ui.label("No file loaded");
                    }
                }
            }
        });
    }

    fn transport_bar(&mut self, ui: &mut egui::Ui) {
        let Some(session) = &mut self.file else {
            return;
        };

        ui.horizontal(|ui| {
            let play_text = match session.phase() {
                FilePhase::Playing => "⏸",
                _ => "▶",
            };
            if ui.button(play_text).clicked() {
                session.toggle();
            }

            ui.separator();
            ui.label(format!(
                "{} / {}",
                format_ms(session.elapsed_ms()),
                format_ms(session.total_ms())
            ));
            ui.separator();

            let mut fraction = session.progress();
            let slider = egui::Slider::new(&mut fraction, 0.0..=1.0).show_value(false);
            if ui.add(slider).changed() {
                session.seek_fraction(fraction);
            }
        });
    }
}

impl eframe::App for ScopeApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        ctx.request_repaint_after(Duration::from_millis(self.config.render_tick_ms));

        egui::TopBottomPanel::top("top_panel").show(ctx, |ui| self.top_bar(ui));

        if self.input_mode == InputMode::File && self.file.is_some() {
            egui::TopBottomPanel::bottom("transport_panel").show(ctx, |ui| {
                ui.add_space(4.0);
                self.transport_bar(ui);
                ui.add_space(4.0);
            });
        }

        egui::CentralPanel::default().show(ctx, |ui| {
            let (points, status) = match self.input_mode {
                InputMode::Live => match &mut self.capture {
                    Some(capture) => (capture.points(), capture.status()),
                    None => (Vec::new(), SourceStatus::Waiting),
                },
                InputMode::File => match &mut self.file {
                    Some(session) => (session.points(), session.status()),
                    None => (Vec::new(), SourceStatus::Waiting),
                },
            };

            ui.vertical_centered(|ui| {
                self.oscilloscope.show(ui, &points, &status);
            });

            ui.with_layout(egui::Layout::bottom_up(egui::Align::LEFT), |ui| {
                ui.small(format!("Points: {}", points.len()));
            });
        });
    }
}

/// Format milliseconds as MM:SS.
fn format_ms(ms: i64) -> String {
    let secs = (ms / 1000).max(0);
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_formatting() {
        assert_eq!(format_ms(0), "00:00");
        assert_eq!(format_ms(-10), "00:00");
        assert_eq!(format_ms(61_500), "01:01");
        assert_eq!(format_ms(600_000), "10:00");
    }
}
