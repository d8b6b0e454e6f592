//! XY oscilloscope display widget
//!
//! Consumes the current point view on every frame and paints it into a
//! square plot region. Besides the trace itself it renders two placeholder
//! states: a waiting message while no points exist yet, and a fatal-error
//! message when the session died.

use eframe::egui::{self, Align2, Color32, FontId, Pos2, Rect, Stroke, Vec2};

use crate::audio::{SourceStatus, XyPoint};

/// Map a normalized point into a square plot region.
///
/// X grows rightwards, Y is flipped because screen coordinates grow
/// downwards. The result is clamped to the region so slightly
/// out-of-range samples never paint outside it.
pub fn plot_point(point: XyPoint, rect: Rect) -> Pos2 {
    let side = rect.width().min(rect.height());
    let x = rect.left() + (1.0 + point.x) * side / 2.0;
    let y = rect.top() + (1.0 - point.y) * side / 2.0;
    Pos2::new(
        x.clamp(rect.left(), rect.right()),
        y.clamp(rect.top(), rect.bottom()),
    )
}

/// Display settings for the oscilloscope.
#[derive(Clone)]
pub struct OscilloscopeSettings {
    pub color: Color32,
    pub background: Color32,
    pub line_width: f32,
    pub show_graticule: bool,
}

impl Default for OscilloscopeSettings {
    fn default() -> Self {
        Self {
            color: Color32::from_rgb(100, 255, 100),
            background: Color32::from_rgb(10, 20, 10),
            line_width: 1.5,
            show_graticule: true,
        }
    }
}

/// XY oscilloscope widget.
#[derive(Default)]
pub struct Oscilloscope {
    pub settings: OscilloscopeSettings,
}

impl Oscilloscope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn show(
        &mut self,
        ui: &mut egui::Ui,
        points: &[XyPoint],
        status: &SourceStatus,
    ) -> egui::Response {
        let available = ui.available_size();
        let side = available.x.min(available.y);
        let size = Vec2::new(side, side);

        let (response, painter) = ui.allocate_painter(size, egui::Sense::hover());
        let rect = response.rect;

        painter.rect_filled(rect, 4.0, self.settings.background);

        if self.settings.show_graticule {
            self.draw_graticule(&painter, rect);
        }

        match status {
            SourceStatus::Failed(message) => {
                painter.text(
                    rect.center(),
                    Align2::CENTER_CENTER,
                    format!("Capture failed: {message}"),
                    FontId::proportional(16.0),
                    Color32::from_rgb(255, 80, 80),
                );
            }
            SourceStatus::Waiting => {
                painter.text(
                    rect.center(),
                    Align2::CENTER_CENTER,
                    "Waiting for audio…",
                    FontId::proportional(16.0),
                    Color32::GRAY,
                );
            }
            SourceStatus::Active | SourceStatus::Finished => {
                self.draw_trace(&painter, rect, points);
                if *status == SourceStatus::Finished {
                    painter.text(
                        rect.center_top() + Vec2::new(0.0, 16.0),
                        Align2::CENTER_CENTER,
                        "Playback finished",
                        FontId::proportional(13.0),
                        Color32::GRAY,
                    );
                }
            }
        }

        response
    }

    fn draw_graticule(&self, painter: &egui::Painter, rect: Rect) {
        let grid_color = Color32::from_rgba_unmultiplied(60, 80, 60, 100);
        let axis_color = Color32::from_rgba_unmultiplied(80, 100, 80, 150);

        let stroke_grid = Stroke::new(0.5, grid_color);
        let stroke_axis = Stroke::new(1.0, axis_color);

        for i in 0..=8 {
            let t = i as f32 / 8.0;
            let x = rect.left() + t * rect.width();
            let y = rect.top() + t * rect.height();
            let stroke = if i == 4 { stroke_axis } else { stroke_grid };

            painter.line_segment([Pos2::new(x, rect.top()), Pos2::new(x, rect.bottom())], stroke);
            painter.line_segment([Pos2::new(rect.left(), y), Pos2::new(rect.right(), y)], stroke);
        }
    }

    fn draw_trace(&self, painter: &egui::Painter, rect: Rect, points: &[XyPoint]) {
        if points.is_empty() {
            return;
        }

        let stroke = Stroke::new(self.settings.line_width, self.settings.color);
        let screen: Vec<Pos2> = points.iter().map(|p| plot_point(*p, rect)).collect();

        if screen.len() == 1 {
            painter.circle_filled(screen[0], self.settings.line_width, self.settings.color);
            return;
        }

        // Suppress segments that jump across the plot; those read as
        // noise rather than signal.
        let max_dist_sq = (rect.width() * 0.5).powi(2);
        for pair in screen.windows(2) {
            let dist_sq = (pair[1].x - pair[0].x).powi(2) + (pair[1].y - pair[0].y).powi(2);
            if dist_sq < max_dist_sq {
                painter.line_segment([pair[0], pair[1]], stroke);
            }
        }
    }
}
