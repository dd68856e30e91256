use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use scribe_client::transcript::{format_timecode, merge_for_display};
use scribe_client::{ApiClient, ScribeError, TranscribeEvent, TranscriptAssembler};
use tracing::info;

#[derive(Args, Debug)]
pub struct TranscribeArgs {
    /// Audio file to upload
    #[arg(required_unless_present = "resume")]
    pub path: Option<PathBuf>,

    /// Re-attach to the stream of an already-uploaded transcript
    #[arg(long, conflicts_with = "path")]
    pub resume: Option<String>,

    /// Show raw segments instead of the display-merged view
    #[arg(long)]
    pub raw: bool,

    /// Print live partial utterances while streaming
    #[arg(long)]
    pub partials: bool,
}

fn mime_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("m4a") | Some("mp4") => "audio/mp4",
        Some("ogg") | Some("opus") => "audio/ogg",
        Some("flac") => "audio/flac",
        _ => "application/octet-stream",
    }
}

pub async fn run(api: ApiClient, args: TranscribeArgs) -> Result<()> {
    let mut stream = match (&args.path, &args.resume) {
        (_, Some(transcript_id)) => {
            info!(%transcript_id, "re-attaching to transcription stream");
            api.resume_transcription(transcript_id)?
        }
        (Some(path), None) => {
            let filename = path
                .file_name()
                .and_then(|n| n.to_str())
                .context("audio path has no file name")?
                .to_string();
            let audio =
                std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;

            info!(%filename, bytes = audio.len(), "uploading audio");
            api.stream_transcription(&filename, audio, mime_for(path))?
        }
        (None, None) => anyhow::bail!("an audio file or --resume is required"),
    };

    let mut assembler = TranscriptAssembler::new();
    let mut final_transcript = None;

    while let Some(event) = stream.next_event().await {
        match event {
            Ok(TranscribeEvent::Status { message, .. }) => eprintln!("· {message}"),
            Ok(TranscribeEvent::Partial { text, speaker, speaker_tag }) => {
                assembler.push_partial(text, speaker, speaker_tag);
                if args.partials {
                    if let Some(partial) = assembler.live_partial() {
                        eprint!("\r… {}", partial.text);
                        std::io::stderr().flush().ok();
                    }
                }
            }
            Ok(TranscribeEvent::FinalSegment { segment }) => {
                if args.partials {
                    eprintln!();
                }
                assembler.push_final(segment);
            }
            Ok(TranscribeEvent::AudioUrl { audio_url, .. }) => {
                info!(%audio_url, "audio available");
            }
            Ok(TranscribeEvent::Complete { transcript }) => {
                final_transcript = Some(assembler.finish(transcript));
                break;
            }
            Ok(TranscribeEvent::Error { error }) => {
                return Err(ScribeError::Domain(error)).context("transcription failed");
            }
            Err(e) => return Err(e).context("transcription stream"),
        }
    }

    let transcript = final_transcript.context("stream ended without a complete event")?;
    let segments = if args.raw {
        transcript.segments.clone()
    } else {
        merge_for_display(&transcript.segments)
    };

    println!("transcript {}", transcript.id);
    for segment in &segments {
        println!(
            "[{}] {}: {}",
            format_timecode(segment.start),
            transcript.speaker_label(segment.speaker_tag),
            segment.text,
        );
    }

    Ok(())
}
