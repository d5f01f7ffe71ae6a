//! Markdown to styled egui text.
//!
//! Message content is parsed once into [`Block`]s of styled [`Span`]s and then
//! laid out with egui `LayoutJob`s, so markup characters never reach the screen.

use crate::theme::Theme;
use eframe::egui::{self, text::LayoutJob, FontId, Stroke, TextFormat};
use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpanStyle {
    pub strong: bool,
    pub emphasis: bool,
    pub strike: bool,
    pub code: bool,
    pub link: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub text: String,
    pub style: SpanStyle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    Paragraph,
    Heading(u8),
    /// `marker` is empty for continuation paragraphs inside an item.
    ListItem { depth: usize, marker: String },
    CodeBlock { language: Option<String> },
    Quote,
    Rule,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    pub spans: Vec<Span>,
}

impl Block {
    fn new(kind: BlockKind) -> Self {
        Self {
            kind,
            spans: Vec::new(),
        }
    }

    pub fn text(&self) -> String {
        self.spans.iter().map(|span| span.text.as_str()).collect()
    }

    fn push(&mut self, text: &str, style: SpanStyle) {
        if text.is_empty() {
            return;
        }
        match self.spans.last_mut() {
            Some(last) if last.style == style => last.text.push_str(text),
            _ => self.spans.push(Span {
                text: text.to_string(),
                style,
            }),
        }
    }
}

#[derive(Default)]
struct BlockBuilder {
    blocks: Vec<Block>,
    current: Option<Block>,
    /// Next number for ordered lists, `None` for bullet lists.
    lists: Vec<Option<u64>>,
    pending_marker: Option<String>,
    quote_depth: usize,
    strong: usize,
    emphasis: usize,
    strike: usize,
    link: usize,
}

impl BlockBuilder {
    fn style(&self) -> SpanStyle {
        SpanStyle {
            strong: self.strong > 0,
            emphasis: self.emphasis > 0,
            strike: self.strike > 0,
            code: false,
            link: self.link > 0,
        }
    }

    fn flush(&mut self) {
        if let Some(mut block) = self.current.take() {
            if let Some(last) = block.spans.last_mut() {
                let trimmed = last.text.trim_end_matches('\n').len();
                last.text.truncate(trimmed);
                if last.text.is_empty() {
                    block.spans.pop();
                }
            }
            if !block.spans.is_empty() {
                self.blocks.push(block);
            }
        }
    }

    fn open(&mut self, kind: BlockKind) {
        self.flush();
        self.current = Some(Block::new(kind));
    }

    /// Opens the block that inline text flows into when none is open yet.
    fn ensure_block(&mut self) -> &mut Block {
        if self.current.is_none() {
            let kind = if !self.lists.is_empty() {
                BlockKind::ListItem {
                    depth: self.lists.len(),
                    marker: self.pending_marker.take().unwrap_or_default(),
                }
            } else if self.quote_depth > 0 {
                BlockKind::Quote
            } else {
                BlockKind::Paragraph
            };
            self.current = Some(Block::new(kind));
        }
        self.current.get_or_insert_with(|| Block::new(BlockKind::Paragraph))
    }

    fn push_text(&mut self, text: &str, style: SpanStyle) {
        self.ensure_block().push(text, style);
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Paragraph => {
                if !matches!(self.current, Some(Block { kind: BlockKind::ListItem { .. }, .. })) {
                    self.flush();
                }
            }
            Tag::Heading { level, .. } => self.open(BlockKind::Heading(heading_level(level))),
            Tag::BlockQuote { .. } => {
                self.flush();
                self.quote_depth += 1;
            }
            Tag::CodeBlock(kind) => {
                let language = match kind {
                    CodeBlockKind::Fenced(info) => info
                        .split_whitespace()
                        .next()
                        .map(str::to_string),
                    CodeBlockKind::Indented => None,
                };
                self.open(BlockKind::CodeBlock { language });
            }
            Tag::List(start) => {
                self.flush();
                self.lists.push(start);
            }
            Tag::Item => {
                self.flush();
                let marker = match self.lists.last_mut() {
                    Some(Some(next)) => {
                        let marker = format!("{next}.");
                        *next += 1;
                        marker
                    }
                    _ => "•".to_string(),
                };
                self.pending_marker = Some(marker);
            }
            Tag::Emphasis => self.emphasis += 1,
            Tag::Strong => self.strong += 1,
            Tag::Strikethrough => self.strike += 1,
            Tag::Link { .. } => self.link += 1,
            Tag::HtmlBlock => self.flush(),
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph
            | TagEnd::Heading(_)
            | TagEnd::CodeBlock
            | TagEnd::Item
            | TagEnd::HtmlBlock => self.flush(),
            TagEnd::BlockQuote { .. } => {
                self.flush();
                self.quote_depth = self.quote_depth.saturating_sub(1);
            }
            TagEnd::List(_) => {
                self.flush();
                self.lists.pop();
                self.pending_marker = None;
            }
            TagEnd::Emphasis => self.emphasis = self.emphasis.saturating_sub(1),
            TagEnd::Strong => self.strong = self.strong.saturating_sub(1),
            TagEnd::Strikethrough => self.strike = self.strike.saturating_sub(1),
            TagEnd::Link => self.link = self.link.saturating_sub(1),
            _ => {}
        }
    }

    fn event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),
            Event::Text(text) => {
                let style = match self.current {
                    Some(Block {
                        kind: BlockKind::CodeBlock { .. },
                        ..
                    }) => SpanStyle {
                        code: true,
                        ..SpanStyle::default()
                    },
                    _ => self.style(),
                };
                self.push_text(&text, style);
            }
            Event::Code(code) => {
                let style = SpanStyle {
                    code: true,
                    ..self.style()
                };
                self.push_text(&code, style);
            }
            Event::Html(html) => {
                let style = self.style();
                self.push_text(&strip_tags(&html), style);
            }
            Event::InlineHtml(html) => self.inline_html(&html),
            Event::SoftBreak => {
                let style = self.style();
                self.push_text(" ", style);
            }
            Event::HardBreak => {
                let style = self.style();
                self.push_text("\n", style);
            }
            Event::Rule => {
                self.flush();
                self.blocks.push(Block::new(BlockKind::Rule));
            }
            Event::TaskListMarker(done) => {
                let style = self.style();
                self.push_text(if done { "☑ " } else { "☐ " }, style);
            }
            _ => {}
        }
    }

    /// Maps simple inline formatting tags onto span styles; other tags are dropped.
    fn inline_html(&mut self, html: &str) {
        let Some((name, closing)) = html_tag(html) else {
            let style = self.style();
            self.push_text(&strip_tags(html), style);
            return;
        };
        if name == "br" {
            let style = self.style();
            self.push_text("\n", style);
            return;
        }
        let counter = match name.as_str() {
            "b" | "strong" => &mut self.strong,
            "i" | "em" => &mut self.emphasis,
            "s" | "del" | "strike" => &mut self.strike,
            _ => return,
        };
        if closing {
            *counter = counter.saturating_sub(1);
        } else {
            *counter += 1;
        }
    }

    fn finish(mut self) -> Vec<Block> {
        self.flush();
        self.blocks
    }
}

/// Lowercased name of a single tag such as `<b>` or `</em>`, and whether it closes.
fn html_tag(fragment: &str) -> Option<(String, bool)> {
    let inner = fragment.trim().strip_prefix('<')?.strip_suffix('>')?;
    if inner.starts_with('!') || inner.starts_with('?') || inner.contains('<') {
        return None;
    }
    let (closing, inner) = match inner.strip_prefix('/') {
        Some(rest) => (true, rest),
        None => (false, inner),
    };
    let name: String = inner
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric())
        .collect();
    if name.is_empty() {
        None
    } else {
        Some((name.to_ascii_lowercase(), closing))
    }
}

fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

fn heading_level(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

pub fn parse(text: &str) -> Vec<Block> {
    let options = Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS;
    let mut builder = BlockBuilder::default();
    for event in Parser::new_ext(text, options) {
        builder.event(event);
    }
    let mut blocks = builder.finish();
    // Bare link definitions and similar inputs produce no blocks; show them raw.
    if blocks.is_empty() && !text.trim().is_empty() {
        blocks.push(Block {
            kind: BlockKind::Paragraph,
            spans: vec![Span {
                text: text.trim().to_string(),
                style: SpanStyle::default(),
            }],
        });
    }
    blocks
}

fn heading_size(level: u8) -> f32 {
    match level {
        1 => 22.0,
        2 => 19.0,
        3 => 17.0,
        _ => 15.0,
    }
}

fn layout_spans(
    spans: &[Span],
    theme: &Theme,
    base_color: egui::Color32,
    font_size: f32,
    wrap_width: f32,
) -> LayoutJob {
    let mut job = LayoutJob::default();
    job.wrap.max_width = wrap_width;
    for span in spans {
        let style = span.style;
        let mut format = TextFormat {
            font_id: if style.code {
                FontId::monospace(font_size - 1.0)
            } else {
                FontId::proportional(font_size)
            },
            color: if style.strong {
                theme.text_strong
            } else {
                base_color
            },
            italics: style.emphasis,
            ..Default::default()
        };
        if style.code {
            format.background = theme.code_background;
        }
        if style.strike {
            format.strikethrough = Stroke::new(1.0, base_color);
        }
        if style.link {
            format.color = theme.link;
            format.underline = Stroke::new(1.0, theme.link);
        }
        job.append(&span.text, 0.0, format);
    }
    job
}

/// Draws parsed blocks top to bottom into `ui`.
pub fn render(ui: &mut egui::Ui, blocks: &[Block], theme: &Theme, text_color: egui::Color32) {
    let body = 14.0;
    for block in blocks {
        let width = ui.available_width();
        match &block.kind {
            BlockKind::Paragraph => {
                ui.label(layout_spans(&block.spans, theme, text_color, body, width));
            }
            BlockKind::Heading(level) => {
                let mut spans = block.spans.clone();
                for span in &mut spans {
                    span.style.strong = true;
                }
                let size = heading_size(*level);
                ui.label(layout_spans(&spans, theme, text_color, size, width));
            }
            BlockKind::ListItem { depth, marker } => {
                ui.horizontal_wrapped(|ui| {
                    ui.add_space(theme.spacing_12 * (*depth as f32 - 1.0));
                    ui.label(egui::RichText::new(marker.as_str()).color(text_color));
                    let width = ui.available_width();
                    ui.label(layout_spans(&block.spans, theme, text_color, body, width));
                });
            }
            BlockKind::CodeBlock { .. } => {
                theme.code_frame().show(ui, |ui| {
                    let width = ui.available_width();
                    ui.label(layout_spans(&block.spans, theme, text_color, body, width));
                });
            }
            BlockKind::Quote => {
                ui.horizontal(|ui| {
                    let (rect, _) = ui.allocate_exact_size(
                        egui::vec2(3.0, ui.text_style_height(&egui::TextStyle::Body)),
                        egui::Sense::hover(),
                    );
                    ui.painter()
                        .rect_filled(rect, egui::CornerRadius::same(1), theme.text_muted);
                    let width = ui.available_width();
                    ui.label(layout_spans(&block.spans, theme, theme.text_muted, body, width));
                });
            }
            BlockKind::Rule => {
                ui.separator();
            }
        }
    }
}
