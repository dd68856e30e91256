use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use scribe_client::ApiClient;
use tracing_subscriber::EnvFilter;

mod note;
mod transcribe;

#[derive(Parser, Debug)]
#[command(author, version, about = "Streaming client for the ambient scribe backend")]
struct Cli {
    #[command(flatten)]
    server: ServerArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct ServerArgs {
    /// Base URL of the scribe backend
    #[arg(long, env = "SCRIBE_API_URL", default_value = "http://localhost:8000/")]
    base_url: String,

    /// Bearer token for authentication
    #[arg(long, env = "SCRIBE_API_TOKEN")]
    auth_token: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upload an audio file and stream its transcription
    Transcribe(transcribe::TranscribeArgs),
    /// Generate a structured note from a transcript
    Note(note::NoteArgs),
    /// List available note templates
    Templates,
    /// List stored transcripts
    Transcripts,
}

impl ServerArgs {
    fn client(&self) -> Result<ApiClient> {
        let mut builder = ApiClient::builder().base_url(&self.base_url);
        if let Some(token) = &self.auth_token {
            builder = builder.auth_token(token);
        }
        Ok(builder.build()?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let api = cli.server.client()?;

    match cli.command {
        Commands::Transcribe(args) => transcribe::run(api, args).await?,
        Commands::Note(args) => note::run(api, args).await?,
        Commands::Templates => {
            for template in api.list_templates().await? {
                let display = template.display_name.as_deref().unwrap_or(&template.name);
                println!("{:<24} {}", template.name, display);
                if !template.sections.is_empty() {
                    println!("    sections: {}", template.sections.join(", "));
                }
            }
        }
        Commands::Transcripts => {
            for transcript in api.list_transcripts().await? {
                println!(
                    "{:<38} {:<28} {}",
                    transcript.id,
                    transcript.filename.as_deref().unwrap_or("-"),
                    transcript
                        .duration
                        .map(scribe_client::transcript::format_timecode)
                        .unwrap_or_else(|| "-".to_string()),
                );
            }
        }
    }

    Ok(())
}
