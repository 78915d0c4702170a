//! Markdown traces of outbound requests, responses and streamed chunks.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::config::TraceConfig;
use crate::protocol::canonical::GenericChunk;
use crate::protocol::openai_chat::ChatCompletion;
use crate::routing::prepare::PreparedRequest;
use crate::util::utc_timestamp;

/// Side channel receiving the values that cross the translation layer.
///
/// Failures are reported back to the caller through [`notify`], which logs
/// them; they never alter the data path.
pub trait ChunkObserver: Send + Sync {
    fn on_request(&self, _request: &PreparedRequest) -> io::Result<()> {
        Ok(())
    }

    fn on_response(&self, _raw: &Value, _translated: &ChatCompletion) -> io::Result<()> {
        Ok(())
    }

    /// `upstream` is the event the chunk was normalized from; the EOF chunk
    /// has none.
    fn on_chunk(
        &self,
        _chunk_idx: usize,
        _upstream: Option<&UpstreamChunk>,
        _chunk: &GenericChunk,
    ) -> io::Result<()> {
        Ok(())
    }
}

/// A raw upstream event, tagged with the API shape it arrived in.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamChunk {
    Responses(Value),
    ChatCompletions(Value),
}

impl UpstreamChunk {
    fn title(&self) -> &'static str {
        match self {
            UpstreamChunk::Responses(_) => "Responses API",
            UpstreamChunk::ChatCompletions(_) => "ChatCompletions API",
        }
    }

    #[must_use]
    pub fn value(&self) -> &Value {
        match self {
            UpstreamChunk::Responses(value) | UpstreamChunk::ChatCompletions(value) => value,
        }
    }
}

/// Run one observer callback, logging instead of propagating a failure.
pub fn notify<O, F>(observer: &O, what: &'static str, f: F)
where
    O: ChunkObserver + ?Sized,
    F: FnOnce(&O) -> io::Result<()>,
{
    if let Err(e) = f(observer) {
        tracing::warn!(what, error = %e, "trace observer failed");
    }
}

/// Writes one request's traces as Markdown files named after its timestamp.
pub struct MarkdownTraceWriter {
    dir: PathBuf,
    timestamp: String,
    calling_method: String,
    stream_lock: Mutex<()>,
}

impl MarkdownTraceWriter {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, timestamp: &str, calling_method: &str) -> Self {
        Self {
            dir: dir.into(),
            timestamp: timestamp.to_string(),
            calling_method: calling_method.to_string(),
            stream_lock: Mutex::new(()),
        }
    }

    /// A writer sharing the prepared request's timestamp, when tracing is on.
    #[must_use]
    pub fn for_request(config: &TraceConfig, request: &PreparedRequest) -> Option<Self> {
        config
            .write_traces_to_files
            .then(|| Self::new(&config.traces_dir, &request.timestamp, &request.calling_method))
    }

    /// A writer with a fresh timestamp, when tracing is on.
    #[must_use]
    pub fn from_config(config: &TraceConfig, calling_method: &str) -> Option<Self> {
        config
            .write_traces_to_files
            .then(|| Self::new(&config.traces_dir, &utc_timestamp(), calling_method))
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn path_for(&self, suffix: &str) -> PathBuf {
        self.dir.join(format!("{}_{suffix}.md", self.timestamp))
    }

    fn header(&self) -> String {
        format!("# {}\n\n", self.calling_method.to_uppercase())
    }

    /// Create a trace file, refusing to replace one that already exists.
    fn create_new(&self, suffix: &str) -> io::Result<File> {
        std::fs::create_dir_all(&self.dir)?;
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.path_for(suffix))
    }

    fn append(&self, suffix: &str) -> io::Result<(File, bool)> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(suffix);
        let existed = path.exists();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok((file, existed))
    }
}

fn json_block<T: Serialize + ?Sized>(out: &mut String, title: &str, value: &T) -> io::Result<()> {
    let body = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
    out.push_str("### ");
    out.push_str(title);
    out.push_str(":\n```json\n");
    out.push_str(&body);
    out.push_str("\n```\n\n");
    Ok(())
}

impl ChunkObserver for MarkdownTraceWriter {
    fn on_request(&self, request: &PreparedRequest) -> io::Result<()> {
        let mut out = self.header();
        out.push_str("## Request Messages\n\n");
        json_block(&mut out, "ChatCompletions API", &request.messages)?;
        if let Some(responses) = &request.responses {
            json_block(&mut out, "Responses API", &responses.input)?;
        }
        out.push_str("## Request Params\n\n");
        json_block(&mut out, "ChatCompletions API", &request.params)?;
        if let Some(responses) = &request.responses {
            json_block(&mut out, "Responses API", &responses.params)?;
        }
        self.create_new("REQUEST")?.write_all(out.as_bytes())
    }

    fn on_response(&self, raw: &Value, translated: &ChatCompletion) -> io::Result<()> {
        let mut out = self.header();
        out.push_str("## Response\n\n");
        json_block(&mut out, "Responses API", raw)?;
        json_block(&mut out, "ChatCompletions API", translated)?;
        self.create_new("RESPONSE")?.write_all(out.as_bytes())
    }

    fn on_chunk(
        &self,
        chunk_idx: usize,
        upstream: Option<&UpstreamChunk>,
        chunk: &GenericChunk,
    ) -> io::Result<()> {
        let _guard = self.stream_lock.lock();

        let mut out = String::new();
        let (mut file, existed) = self.append("RESPONSE_STREAM")?;
        if !existed {
            out.push_str(&self.header());
        }
        out.push_str(&format!("## Response Chunk #{chunk_idx}\n\n"));
        if let Some(upstream) = upstream {
            json_block(&mut out, upstream.title(), upstream.value())?;
        }
        json_block(&mut out, "GenericStreamingChunk", chunk)?;
        file.write_all(out.as_bytes())?;

        if !chunk.text.is_empty() {
            let (mut text_file, _) = self.append("RESPONSE_TEXT")?;
            text_file.write_all(chunk.text.as_bytes())?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for MarkdownTraceWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarkdownTraceWriter")
            .field("dir", &self.dir)
            .field("timestamp", &self.timestamp)
            .field("calling_method", &self.calling_method)
            .finish_non_exhaustive()
    }
}
