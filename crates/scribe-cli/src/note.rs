use anyhow::{Context, Result};
use clap::Args;
use scribe_client::{
    section_skeleton, ApiClient, Command, GenerateEvent, GenerateStream, NoteRequest, ScribeError,
    SectionPatcher, Session, SessionEvent, SessionState, StreamKind, TraceAggregator,
};
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct NoteArgs {
    /// Transcript to generate from
    #[arg(long)]
    pub transcript_id: String,

    /// Template name
    #[arg(long, default_value = "soap")]
    pub template: String,

    /// Print trace step groups while generating
    #[arg(long)]
    pub traces: bool,

    /// Skip the non-streaming fallback on transport failure
    #[arg(long)]
    pub no_fallback: bool,
}

/// Executes reducer commands and owns the at-most-one-open-stream-per-kind
/// rule: opening a stream of a kind first closes any prior instance so two
/// transports can never deliver into the same document.
struct SessionController {
    api: ApiClient,
    session: Session,
    patcher: SectionPatcher,
    document: String,
    traces: TraceAggregator,
    generation: Option<GenerateStream>,
}

impl SessionController {
    fn execute(&mut self, commands: Vec<Command>) -> Result<()> {
        for command in commands {
            match command {
                Command::CloseStream(StreamKind::Generation) => {
                    if let Some(mut stream) = self.generation.take() {
                        stream.close();
                    }
                }
                Command::CloseStream(StreamKind::Transcription) => {
                    // The note command never holds a transcription stream.
                }
                Command::OpenGeneration { transcript_id, template } => {
                    let request = NoteRequest {
                        transcript_id,
                        template_name: template,
                        custom_sections: None,
                    };
                    self.generation = Some(self.api.stream_generation(&request)?);
                }
                Command::OpenTranscription { .. } | Command::LoadTemplate { .. } => {}
                Command::ClearDocument => {
                    self.document.clear();
                    self.traces.clear();
                }
                Command::SurfaceError(message) => eprintln!("error: {message}"),
            }
        }
        Ok(())
    }
}

pub async fn run(api: ApiClient, args: NoteArgs) -> Result<()> {
    // Template skeleton and defaults come from REST collaborators; a missing
    // preview degrades to a skeleton built from the template's section keys,
    // then to an empty document, never a failure.
    let document = match api.template_preview(&args.template).await {
        Ok(preview) => preview,
        Err(e) => {
            warn!(error = %e, "no template preview, deriving skeleton from sections");
            match api.template_info(&args.template).await {
                Ok(info) => section_skeleton(&info.sections),
                Err(e) => {
                    warn!(error = %e, "no template info available");
                    String::new()
                }
            }
        }
    };
    let defaults = api.template_defaults(&args.template).await.unwrap_or_else(|e| {
        warn!(error = %e, "no template defaults available");
        Vec::new()
    });

    // The transcript must exist before generation is allowed.
    let transcript = api
        .get_transcript(&args.transcript_id)
        .await
        .context("transcript not found")?;
    info!(transcript = %transcript.id, template = %args.template, "starting generation");

    let mut controller = SessionController {
        api,
        session: Session::new(),
        patcher: SectionPatcher::with_template_defaults(defaults),
        document,
        traces: TraceAggregator::new(),
        generation: None,
    };

    let commands = controller.session.apply(SessionEvent::TemplateLoaded {
        template: args.template.clone(),
    });
    controller.execute(commands)?;
    let commands = controller.session.apply(SessionEvent::TranscriptReady {
        transcript_id: transcript.id.clone(),
    });
    controller.execute(commands)?;

    let commands = controller.session.apply(SessionEvent::GenerateRequested);
    controller.execute(commands)?;
    anyhow::ensure!(
        controller.session.state == SessionState::Generating,
        "generation was not started"
    );

    let mut note_markdown = None;
    let mut transport_failure = None;

    'stream: while let Some(mut stream) = controller.generation.take() {
        loop {
            let Some(event) = stream.next_event().await else {
                break 'stream;
            };
            match event {
                Ok(GenerateEvent::Trace(trace)) => {
                    let before = controller.traces.groups().len();
                    controller.traces.push(&trace);
                    if args.traces && controller.traces.groups().len() > before {
                        if let Some(group) = controller.traces.groups().last() {
                            eprintln!("· {}", group.label);
                        }
                    }
                }
                Ok(GenerateEvent::SectionComplete { section, content, .. }) => {
                    controller.document =
                        controller.patcher.patch(&controller.document, &section, &content);
                    eprintln!("✓ section {section}");
                }
                Ok(GenerateEvent::Complete { note_markdown: markdown, .. }) => {
                    note_markdown = Some(markdown);
                    let commands = controller.session.apply(SessionEvent::GenerationCompleted);
                    controller.execute(commands)?;
                    break 'stream;
                }
                Ok(GenerateEvent::Error { message, .. }) => {
                    let commands = controller
                        .session
                        .apply(SessionEvent::GenerationFailed { message: message.clone() });
                    controller.execute(commands)?;
                    return Err(ScribeError::Domain(message)).context("generation failed");
                }
                Err(e) if e.is_transport() => {
                    warn!(error = %e, "generation stream transport failed");
                    let commands = controller
                        .session
                        .apply(SessionEvent::GenerationFailed { message: e.to_string() });
                    controller.execute(commands)?;
                    transport_failure = Some(e);
                    break 'stream;
                }
                Err(e) => return Err(e).context("generation stream"),
            }
        }
    }

    // Transport failures fall back to the non-streaming endpoint. The
    // session stays in the template state: the fallback is a plain request,
    // not a second generation stream.
    if let Some(failure) = transport_failure {
        if args.no_fallback {
            return Err(failure).context("generation stream");
        }
        info!("falling back to non-streaming generation");
        let request = NoteRequest {
            transcript_id: transcript.id.clone(),
            template_name: args.template.clone(),
            custom_sections: None,
        };
        let markdown = controller
            .api
            .generate_note(&request)
            .await
            .context("fallback generation")?;
        note_markdown = Some(markdown);
    }

    // Prefer the fully rendered note; the incrementally patched document is
    // the live view while sections stream in.
    let rendered = note_markdown.unwrap_or(controller.document);
    anyhow::ensure!(!rendered.is_empty(), "stream ended without a note");
    println!("{rendered}");

    Ok(())
}
