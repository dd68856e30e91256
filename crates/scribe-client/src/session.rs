//! Session orchestration: a finite set of states, transitions expressed as
//! a pure reducer returning side-effecting commands, and the
//! one-open-transport-per-kind rule.

use std::collections::BTreeSet;

/// Session lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Empty,
    /// A template preview or section skeleton is loaded; editing allowed.
    Template,
    /// A generation stream is open for the selected (transcript, template).
    Generating,
    /// A note exists for the transcript; its template is locked.
    Complete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Transcription,
    Generation,
}

/// Inputs to the reducer.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// Startup or new-session skeleton finished loading.
    TemplateLoaded { template: String },
    /// User picked a different template.
    TemplateSwitchRequested {
        template: String,
        /// Result of the placeholder heuristic over the current document.
        document_has_user_content: bool,
    },
    /// User dropped a new audio file.
    UploadRequested { filename: String },
    /// The transcription stream finished and a transcript exists.
    TranscriptReady { transcript_id: String },
    /// User asked for a note.
    GenerateRequested,
    /// Terminal success on the generation stream.
    GenerationCompleted,
    /// Terminal `error` payload or transport failure on generation.
    GenerationFailed { message: String },
    /// Explicit new-session reset.
    NewSessionRequested,
}

/// Side effects the reducer asks for; executed by a controller.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    CloseStream(StreamKind),
    OpenTranscription { filename: String },
    OpenGeneration { transcript_id: String, template: String },
    LoadTemplate { template: String },
    ClearDocument,
    SurfaceError(String),
}

#[derive(Clone, Debug, Default)]
pub struct Session {
    pub state: SessionState,
    pub transcript_id: Option<String>,
    pub selected_template: Option<String>,
    pub locked_templates: BTreeSet<String>,
    generated: BTreeSet<(String, String)>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a note was already generated for this (transcript, template)
    /// pair in the current session.
    pub fn already_generated(&self, transcript_id: &str, template: &str) -> bool {
        self.generated
            .contains(&(transcript_id.to_string(), template.to_string()))
    }

    /// Apply one event, returning the commands it implies. Guarded
    /// transitions that fail their guard are no-ops (possibly surfacing a
    /// message); they never corrupt state.
    pub fn apply(&mut self, event: SessionEvent) -> Vec<Command> {
        match event {
            SessionEvent::TemplateLoaded { template } => {
                match self.state {
                    SessionState::Empty => {
                        self.selected_template = Some(template);
                        self.state = SessionState::Template;
                    }
                    SessionState::Template => self.selected_template = Some(template),
                    // A stale load must not retarget an in-flight or
                    // recorded (transcript, template) pair.
                    SessionState::Generating | SessionState::Complete => {
                        tracing::debug!("ignoring template load outside editing states");
                    }
                }
                Vec::new()
            }

            SessionEvent::TemplateSwitchRequested {
                template,
                document_has_user_content,
            } => self.switch_template(template, document_has_user_content),

            SessionEvent::UploadRequested { filename } => {
                if self.state == SessionState::Generating {
                    tracing::warn!("upload rejected while generation is in flight");
                    return vec![Command::SurfaceError(
                        "Wait for the current note to finish before uploading new audio"
                            .to_string(),
                    )];
                }

                // New audio starts a new session: clear transcript, traces,
                // locks and generation markers, then stream the upload.
                self.transcript_id = None;
                self.locked_templates.clear();
                self.generated.clear();
                self.state = SessionState::Template;

                vec![
                    Command::CloseStream(StreamKind::Transcription),
                    Command::ClearDocument,
                    Command::OpenTranscription { filename },
                ]
            }

            SessionEvent::TranscriptReady { transcript_id } => {
                self.transcript_id = Some(transcript_id);
                Vec::new()
            }

            SessionEvent::GenerateRequested => self.request_generation(),

            SessionEvent::GenerationCompleted => {
                if self.state != SessionState::Generating {
                    return Vec::new();
                }
                if let (Some(tid), Some(template)) =
                    (self.transcript_id.clone(), self.selected_template.clone())
                {
                    self.generated.insert((tid, template.clone()));
                    self.locked_templates.insert(template);
                }
                self.state = SessionState::Complete;
                Vec::new()
            }

            SessionEvent::GenerationFailed { message } => {
                if self.state != SessionState::Generating {
                    return Vec::new();
                }
                // Recoverable: back to template, retry permitted.
                self.state = SessionState::Template;
                vec![Command::SurfaceError(message)]
            }

            SessionEvent::NewSessionRequested => {
                *self = Session::new();
                vec![
                    Command::CloseStream(StreamKind::Transcription),
                    Command::CloseStream(StreamKind::Generation),
                    Command::ClearDocument,
                ]
            }
        }
    }

    fn switch_template(&mut self, template: String, document_has_user_content: bool) -> Vec<Command> {
        match self.state {
            SessionState::Generating => {
                tracing::warn!("template switch rejected during generation");
                vec![Command::SurfaceError(
                    "Cannot switch templates while a note is being generated".to_string(),
                )]
            }
            SessionState::Complete => {
                vec![Command::SurfaceError(
                    "Template is locked once a note exists for this transcript".to_string(),
                )]
            }
            SessionState::Template if document_has_user_content => {
                vec![Command::SurfaceError(
                    "Clear or save your edits before switching templates".to_string(),
                )]
            }
            SessionState::Template | SessionState::Empty => {
                self.selected_template = Some(template.clone());
                if self.state == SessionState::Empty {
                    self.state = SessionState::Template;
                }
                vec![Command::LoadTemplate { template }]
            }
        }
    }

    fn request_generation(&mut self) -> Vec<Command> {
        if self.state != SessionState::Template {
            return Vec::new();
        }
        let Some(transcript_id) = self.transcript_id.clone() else {
            return vec![Command::SurfaceError(
                "Upload audio before generating a note".to_string(),
            )];
        };
        let Some(template) = self.selected_template.clone() else {
            return vec![Command::SurfaceError("Select a template first".to_string())];
        };
        if self.already_generated(&transcript_id, &template) {
            tracing::debug!(%transcript_id, %template, "generation already done for this pair");
            return Vec::new();
        }

        self.state = SessionState::Generating;
        vec![
            Command::CloseStream(StreamKind::Generation),
            Command::OpenGeneration { transcript_id, template },
        ]
    }
}
