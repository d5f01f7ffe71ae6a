use crate::completion::Completer;
use crate::conversation::{Message, Role};
use crate::event::AppEvent;
use crate::markdown::{self, Block};
use crate::session::{Session, SessionState};
use crate::theme::Theme;
use eframe::egui::{self, Align, Layout, RichText, ScrollArea};
use log::warn;
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::runtime::Handle;

/// Parsed markdown for the active conversation, one entry per message.
#[derive(Default)]
struct RenderCache {
    conversation_id: String,
    blocks: Vec<Vec<Block>>,
}

impl RenderCache {
    fn sync(&mut self, conversation_id: &str, messages: &[Message]) {
        if self.conversation_id != conversation_id {
            self.conversation_id = conversation_id.to_string();
            self.blocks.clear();
        }
        if self.blocks.len() > messages.len() {
            self.blocks.clear();
        }
        for message in &messages[self.blocks.len()..] {
            self.blocks.push(markdown::parse(&message.content));
        }
    }
}

pub struct ChatApp {
    session: Session,
    completer: Arc<dyn Completer>,
    runtime: Handle,
    tx: Sender<AppEvent>,
    rx: Receiver<AppEvent>,
    theme: Theme,
    conversations: Vec<String>,
    input_buffer: String,
    render_cache: RenderCache,
    diagnostics_log: Vec<String>,
    scroll_to_bottom: bool,
}

impl ChatApp {
    pub fn new(
        session: Session,
        completer: Arc<dyn Completer>,
        runtime: Handle,
        tx: Sender<AppEvent>,
        rx: Receiver<AppEvent>,
    ) -> Self {
        let conversations = session.list_conversations();
        Self {
            session,
            completer,
            runtime,
            tx,
            rx,
            theme: Theme::default(),
            conversations,
            input_buffer: String::new(),
            render_cache: RenderCache::default(),
            diagnostics_log: Vec::new(),
            scroll_to_bottom: true,
        }
    }

    pub fn theme(&self) -> &Theme {
        &self.theme
    }

    fn timestamp() -> String {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(duration) => duration.as_secs().to_string(),
            Err(_) => "0".to_string(),
        }
    }

    fn log_diagnostic(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        self.diagnostics_log
            .push(format!("[{}] {message}", Self::timestamp()));
    }

    fn refresh_conversations(&mut self) {
        self.conversations = self.session.list_conversations();
    }

    fn start_new_conversation(&mut self) {
        if let Err(err) = self.session.start_new() {
            self.log_diagnostic(format!("failed to start conversation: {err}"));
        }
        self.refresh_conversations();
        self.scroll_to_bottom = true;
    }

    fn open_conversation(&mut self, id: &str) {
        if let Err(err) = self.session.select(id) {
            self.log_diagnostic(format!("failed to open conversation {id}: {err}"));
        }
        self.scroll_to_bottom = true;
    }

    fn submit_prompt(&mut self, ctx: &egui::Context) {
        let request = match self.session.begin_send(&self.input_buffer) {
            Ok(request) => request,
            Err(err) => {
                self.log_diagnostic(format!("message not sent: {err}"));
                return;
            }
        };
        self.input_buffer.clear();
        self.scroll_to_bottom = true;

        let completer = Arc::clone(&self.completer);
        let tx = self.tx.clone();
        let repaint_ctx = ctx.clone();
        self.runtime.spawn(async move {
            let outcome = completer.complete(&request.messages).await;
            let _ = tx.send(AppEvent::ReplyReady {
                conversation_id: request.conversation_id,
                outcome,
            });
            repaint_ctx.request_repaint();
        });
        ctx.request_repaint();
    }

    fn drain_events(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(event) => self.apply_event(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.log_diagnostic("event channel disconnected");
                    break;
                }
            }
        }
    }

    fn apply_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::ReplyReady {
                conversation_id,
                outcome,
            } => {
                match self.session.complete_send(&conversation_id, outcome) {
                    Ok(reply) if reply.is_failure() => {
                        self.log_diagnostic(format!("completion failed: {}", reply.text()));
                    }
                    Ok(_) => {}
                    Err(err) => self.log_diagnostic(format!("failed to record reply: {err}")),
                }
                self.refresh_conversations();
                self.scroll_to_bottom = true;
            }
        }
    }

    fn render_conversation_list(&mut self, ctx: &egui::Context) {
        let busy = self.session.is_busy();
        let active_id = self.session.active().map(|c| c.id.clone());
        let mut clicked: Option<String> = None;

        egui::SidePanel::left("conversation_list")
            .resizable(false)
            .exact_width(200.0)
            .show(ctx, |ui| {
                ui.heading("Conversations");
                ui.separator();
                ScrollArea::vertical()
                    .id_salt("conversation_ids")
                    .show(ui, |ui| {
                        for id in &self.conversations {
                            let selected = active_id.as_deref() == Some(id.as_str());
                            let response = ui
                                .add_enabled(
                                    !busy,
                                    egui::SelectableLabel::new(selected, short_id(id)),
                                )
                                .on_hover_text(id.as_str());
                            if response.clicked() && !selected {
                                clicked = Some(id.clone());
                            }
                        }
                    });
            });

        if let Some(id) = clicked {
            self.open_conversation(&id);
        }
    }

    fn render_composer(&mut self, ctx: &egui::Context) {
        let busy = self.session.is_busy();
        let mut send_now = false;
        let mut new_chat = false;

        egui::TopBottomPanel::bottom("composer")
            .resizable(false)
            .show(ctx, |ui| {
                ui.add_space(self.theme.spacing_8);
                self.theme.composer_frame().show(ui, |ui| {
                    let response = ui.add_sized(
                        [ui.available_width(), 80.0],
                        egui::TextEdit::multiline(&mut self.input_buffer)
                            .hint_text("Type a message… (Ctrl+Enter to send)")
                            .frame(false),
                    );
                    if response.has_focus()
                        && ui.input(|i| i.modifiers.command && i.key_pressed(egui::Key::Enter))
                    {
                        send_now = true;
                    }
                });

                ui.horizontal(|ui| {
                    new_chat = ui
                        .add_enabled(!busy, egui::Button::new("+ New chat"))
                        .clicked();
                    ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
                        let can_send = !busy && !self.input_buffer.trim().is_empty();
                        send_now |= ui
                            .add_enabled(
                                can_send,
                                egui::Button::new(RichText::new("Send").color(self.theme.text_strong))
                                    .fill(self.theme.user_bubble),
                            )
                            .clicked();
                    });
                });

                egui::CollapsingHeader::new("Diagnostics")
                    .default_open(false)
                    .show(ui, |ui| {
                        ScrollArea::vertical()
                            .id_salt("diagnostics_log")
                            .max_height(90.0)
                            .stick_to_bottom(true)
                            .show(ui, |ui| {
                                for entry in &self.diagnostics_log {
                                    ui.label(RichText::new(entry).small());
                                }
                            });
                    });
            });

        if new_chat {
            self.start_new_conversation();
        } else if send_now && !busy {
            self.submit_prompt(ctx);
        }
    }

    fn render_transcript(&mut self, ctx: &egui::Context) {
        if let Some(conversation) = self.session.active() {
            self.render_cache.sync(&conversation.id, &conversation.messages);
        }
        let busy = self.session.state() == SessionState::AwaitingReply;

        egui::CentralPanel::default().show(ctx, |ui| {
            self.theme.transcript_frame().show(ui, |ui| {
                ui.set_min_size(ui.available_size());
                ScrollArea::vertical()
                    .id_salt("chat_transcript")
                    .auto_shrink([false, false])
                    .stick_to_bottom(true)
                    .show(ui, |ui| {
                        let Some(conversation) = self.session.active() else {
                            ui.label(RichText::new("No conversation").color(self.theme.text_muted));
                            return;
                        };

                        for (message, blocks) in
                            conversation.messages.iter().zip(&self.render_cache.blocks)
                        {
                            if message.role == Role::System {
                                continue;
                            }
                            render_message(ui, &self.theme, message, blocks);
                        }

                        if busy {
                            ui.horizontal(|ui| {
                                ui.add_space(self.theme.spacing_12);
                                ui.spinner();
                                ui.label(
                                    RichText::new("Assistant is typing…")
                                        .color(self.theme.text_muted),
                                );
                            });
                        }

                        if self.scroll_to_bottom {
                            ui.scroll_to_cursor(Some(Align::BOTTOM));
                        }
                    });
            });
        });
        self.scroll_to_bottom = false;
    }
}

fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

fn render_message(ui: &mut egui::Ui, theme: &Theme, message: &Message, blocks: &[Block]) {
    let is_user = message.role == Role::User;
    let layout = if is_user {
        Layout::right_to_left(Align::TOP)
    } else {
        Layout::left_to_right(Align::TOP)
    };
    let max_width = ui.available_width() * theme.bubble_width_ratio;
    let text_color = if is_user {
        theme.text_strong
    } else {
        theme.text_primary
    };

    ui.with_layout(layout, |ui| {
        theme.bubble_frame(is_user, message.failed).show(ui, |ui| {
            ui.set_max_width(max_width);
            ui.vertical(|ui| {
                if message.failed {
                    ui.label(RichText::new("Request failed").small().color(theme.danger));
                }
                markdown::render(ui, blocks, theme, text_color);
            });
        });
    });
}

impl eframe::App for ChatApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_events();
        self.render_conversation_list(ctx);
        self.render_composer(ctx);
        self.render_transcript(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::{short_id, ChatApp, RenderCache};
    use crate::completion::{Completer, CompletionError};
    use crate::conversation::store::ConversationStore;
    use crate::conversation::Message;
    use crate::session::{Session, SessionState};
    use async_trait::async_trait;
    use eframe::egui;
    use std::sync::{mpsc, Arc};
    use std::time::Duration;
    use tempfile::TempDir;

    struct FixedCompleter(Result<&'static str, &'static str>);

    #[async_trait]
    impl Completer for FixedCompleter {
        async fn complete(&self, _messages: &[Message]) -> Result<String, CompletionError> {
            match self.0 {
                Ok(reply) => Ok(reply.to_string()),
                Err(message) => Err(CompletionError::Api {
                    status: 500,
                    message: message.to_string(),
                }),
            }
        }
    }

    fn app_with(
        completer: FixedCompleter,
        runtime: &tokio::runtime::Runtime,
    ) -> (TempDir, ConversationStore, ChatApp) {
        let tmp = TempDir::new().expect("temp dir should be created");
        let store = ConversationStore::new(tmp.path().join("chats"));
        let mut session = Session::new(store.clone(), "system");
        session.start_new().expect("start should succeed");
        let (tx, rx) = mpsc::channel();
        let app = ChatApp::new(session, Arc::new(completer), runtime.handle().clone(), tx, rx);
        (tmp, store, app)
    }

    fn wait_for_idle(app: &mut ChatApp) {
        for _ in 0..500 {
            app.drain_events();
            if app.session.state() == SessionState::Idle {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("reply never arrived");
    }

    #[test]
    fn submitted_prompt_round_trips_through_background_task() {
        let runtime = tokio::runtime::Runtime::new().expect("runtime should build");
        let (_tmp, store, mut app) = app_with(FixedCompleter(Ok("Hi there")), &runtime);
        assert_eq!(app.conversations.len(), 1);
        let ctx = egui::Context::default();

        app.input_buffer = "Hello".to_string();
        app.submit_prompt(&ctx);
        assert_eq!(app.session.state(), SessionState::AwaitingReply);
        assert!(app.input_buffer.is_empty());

        store
            .save("external", &[Message::system("system")])
            .expect("save should succeed");
        wait_for_idle(&mut app);

        let conversation = app.session.active().expect("active conversation");
        assert_eq!(
            conversation.messages,
            vec![
                Message::system("system"),
                Message::user("Hello"),
                Message::assistant("Hi there"),
            ]
        );
        assert_eq!(store.load(&conversation.id), conversation.messages);
        assert!(app.conversations.contains(&"external".to_string()));
        assert_eq!(app.conversations.len(), 2);
        assert!(app.diagnostics_log.is_empty());
    }

    #[test]
    fn failed_completion_is_recorded_and_logged() {
        let runtime = tokio::runtime::Runtime::new().expect("runtime should build");
        let (_tmp, _store, mut app) = app_with(FixedCompleter(Err("upstream down")), &runtime);

        app.input_buffer = "Hello".to_string();
        app.submit_prompt(&egui::Context::default());
        wait_for_idle(&mut app);

        let last = app
            .session
            .active()
            .and_then(|conversation| conversation.messages.last())
            .expect("reply appended");
        assert!(last.failed);
        assert_eq!(last.content, "Error: service returned 500: upstream down");
        assert_eq!(app.diagnostics_log.len(), 1);
        assert!(app.diagnostics_log[0].contains("completion failed"));
    }

    #[test]
    fn blank_prompt_is_not_sent() {
        let runtime = tokio::runtime::Runtime::new().expect("runtime should build");
        let (_tmp, _store, mut app) = app_with(FixedCompleter(Ok("unused")), &runtime);

        app.input_buffer = "   ".to_string();
        app.submit_prompt(&egui::Context::default());

        assert_eq!(app.session.state(), SessionState::Idle);
        assert_eq!(app.diagnostics_log.len(), 1);
    }

    #[test]
    fn render_cache_parses_only_new_messages() {
        let mut cache = RenderCache::default();
        let mut messages = vec![Message::system("s"), Message::user("**hi**")];
        cache.sync("a", &messages);
        assert_eq!(cache.blocks.len(), 2);

        messages.push(Message::assistant("- one"));
        cache.sync("a", &messages);
        assert_eq!(cache.blocks.len(), 3);
        assert_eq!(cache.blocks[1][0].text(), "hi");
    }

    #[test]
    fn render_cache_resets_on_conversation_switch() {
        let mut cache = RenderCache::default();
        cache.sync("a", &[Message::system("s"), Message::user("one")]);
        cache.sync("b", &[Message::system("other")]);
        assert_eq!(cache.conversation_id, "b");
        assert_eq!(cache.blocks.len(), 1);
        assert_eq!(cache.blocks[0][0].text(), "other");
    }

    #[test]
    fn short_id_keeps_first_eight_chars() {
        assert_eq!(short_id("0f8e2c9a-1111-2222"), "0f8e2c9a");
        assert_eq!(short_id("abc"), "abc");
    }
}
