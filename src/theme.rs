use eframe::egui::{self, Color32, CornerRadius, FontId, Frame, Margin, Stroke, TextStyle};

#[derive(Debug, Clone)]
pub struct Theme {
    pub window: Color32,
    pub transcript: Color32,
    pub input: Color32,
    pub input_border: Color32,
    pub user_bubble: Color32,
    pub assistant_bubble: Color32,
    pub code_background: Color32,
    pub accent: Color32,
    pub danger: Color32,
    pub text_primary: Color32,
    pub text_strong: Color32,
    pub text_muted: Color32,
    pub link: Color32,
    pub spacing_8: f32,
    pub spacing_12: f32,
    pub radius_6: u8,
    pub radius_10: u8,
    pub bubble_width_ratio: f32,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            window: Color32::from_rgb(0x2D, 0x2D, 0x30),
            transcript: Color32::from_rgb(0x1E, 0x1E, 0x1E),
            input: Color32::from_rgb(0x2D, 0x2D, 0x30),
            input_border: Color32::from_rgb(0x44, 0x44, 0x44),
            user_bubble: Color32::from_rgb(0x00, 0x78, 0xD4),
            assistant_bubble: Color32::from_rgb(0x44, 0x44, 0x44),
            code_background: Color32::from_rgba_premultiplied(0, 0, 0, 90),
            accent: Color32::from_rgb(0x00, 0x5A, 0x9E),
            danger: Color32::from_rgb(0xEF, 0x44, 0x44),
            text_primary: Color32::from_rgb(0xE6, 0xE6, 0xE6),
            text_strong: Color32::WHITE,
            text_muted: Color32::from_rgb(0x88, 0x88, 0x88),
            link: Color32::from_rgb(0x9C, 0xDC, 0xFE),
            spacing_8: 8.0,
            spacing_12: 12.0,
            radius_6: 6,
            radius_10: 10,
            bubble_width_ratio: 0.8,
        }
    }
}

impl Theme {
    pub fn apply_visuals(&self, ctx: &egui::Context) {
        let mut visuals = egui::Visuals::dark();
        visuals.panel_fill = self.window;
        visuals.window_fill = self.window;
        visuals.extreme_bg_color = self.input;
        visuals.override_text_color = Some(self.text_primary);
        visuals.widgets.noninteractive.bg_stroke = Stroke::NONE;
        visuals.widgets.inactive.bg_stroke = Stroke::new(1.0, self.input_border);
        visuals.widgets.hovered.bg_fill = self.accent;
        visuals.widgets.active.bg_fill = self.accent;
        visuals.selection.bg_fill = self.user_bubble;
        visuals.hyperlink_color = self.link;

        let mut style = (*ctx.style()).clone();
        style.visuals = visuals;
        style.spacing.item_spacing = egui::vec2(8.0, 8.0);
        style.spacing.button_padding = egui::vec2(12.0, 8.0);
        style.text_styles.insert(TextStyle::Heading, FontId::proportional(18.0));
        style.text_styles.insert(TextStyle::Body, FontId::proportional(14.0));
        style.text_styles.insert(TextStyle::Monospace, FontId::monospace(13.0));
        style.text_styles.insert(TextStyle::Small, FontId::proportional(12.0));
        ctx.set_style(style);
    }

    pub fn transcript_frame(&self) -> Frame {
        Frame::new()
            .fill(self.transcript)
            .inner_margin(Margin::same(self.spacing_12 as i8))
            .corner_radius(CornerRadius::same(self.radius_6))
    }

    /// User bubbles use the accent fill; failures get a danger outline.
    pub fn bubble_frame(&self, is_user: bool, failed: bool) -> Frame {
        let fill = if is_user {
            self.user_bubble
        } else {
            self.assistant_bubble
        };
        let stroke = if failed {
            Stroke::new(1.5, self.danger)
        } else {
            Stroke::NONE
        };
        Frame::new()
            .fill(fill)
            .stroke(stroke)
            .inner_margin(Margin::same(10))
            .corner_radius(CornerRadius::same(self.radius_10))
    }

    pub fn code_frame(&self) -> Frame {
        Frame::new()
            .fill(self.code_background)
            .inner_margin(Margin::symmetric(self.spacing_8 as i8, 6))
            .corner_radius(CornerRadius::same(self.radius_6))
    }

    pub fn composer_frame(&self) -> Frame {
        Frame::new()
            .fill(self.input)
            .stroke(Stroke::new(1.0, self.input_border))
            .inner_margin(Margin::same(6))
            .corner_radius(CornerRadius::same(self.radius_6))
    }
}
