use crate::completion::CompletionError;

#[derive(Debug)]
pub enum AppEvent {
    ReplyReady {
        conversation_id: String,
        outcome: Result<String, CompletionError>,
    },
}
