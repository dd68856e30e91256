mod error;

pub mod api;
pub mod framing;
pub mod note;
pub mod protocol;
pub mod session;
pub mod trace;
pub mod transcript;
pub mod transport;

pub use api::{ApiClient, ApiClientBuilder, GenerateStream, NoteRequest, TemplateInfo, TranscribeStream};
pub use error::{Result, ScribeError};
pub use note::{section_skeleton, SectionPatcher};
pub use protocol::{GenerateEvent, TraceEvent, TranscribeEvent, Transcript, TranscriptSegment};
pub use session::{Command, Session, SessionEvent, SessionState, StreamKind};
pub use trace::{TraceAggregator, TraceGroup};
pub use transcript::TranscriptAssembler;
pub use transport::{ReadyState, StreamItem, StreamTransport};
