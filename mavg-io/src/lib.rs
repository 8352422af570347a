//! mavg-io: event sources and result sinks.
//! - `FileSource`: scans a JSONL file line by line, one event per line
//! - `QueueSource`: polls a message queue, acknowledging each message after aggregation
//! - `FileSink`: writes points as JSON lines into an output folder or to stdout

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use mavg_core::{decode_record, metrics, AveragedPoint, Context, Error, Event, Result, Sink, Source};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, info};

pub mod queue;
pub use queue::{Backoff, Queue, QueueMessage, QueueSource};

#[cfg(feature = "sqs")]
pub mod sqs;
#[cfg(feature = "sqs")]
pub use sqs::SqsQueue;

/// Reads newline-delimited `TranslationDelivered` records.
///
/// A line that fails to decode aborts the run with `Error::Decode`; blank lines are skipped.
pub struct FileSource {
    pub path: PathBuf,
}

impl FileSource {
    pub fn jsonl(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Source for FileSource {
    async fn run(&mut self, ctx: &mut dyn Context) -> Result<()> {
        let file = tokio::fs::File::open(&self.path).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("failed to open {}: {e}", self.path.display()),
            ))
        })?;
        let mut lines = tokio::io::BufReader::new(file).lines();
        let mut line_no = 0usize;
        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            if line.trim().is_empty() {
                debug!(line = line_no, "blank line skipped");
                continue;
            }
            let record = decode_record(line.as_bytes()).map_err(|source| {
                metrics::DECODE_FAILURES.with_label_values(&["file"]).inc();
                Error::Decode {
                    origin: format!("{}:{}", self.path.display(), line_no),
                    source,
                }
            })?;
            ctx.collect(Event::from(record)).await?;
        }
        debug!(lines = line_no, path = %self.path.display(), "input exhausted");
        Ok(())
    }
}

type BoxedWriter = BufWriter<Box<dyn AsyncWrite + Send + Unpin>>;

/// Writes each point as a single JSON line to stdout or to `events_<timestamp>.json` in a folder.
///
/// The output file (and folder) is created lazily on the first write.
pub struct FileSink {
    folder: Option<PathBuf>,
    path: Option<PathBuf>,
    writer: Option<BoxedWriter>,
}

impl FileSink {
    pub fn stdout() -> Self {
        Self {
            folder: None,
            path: None,
            writer: None,
        }
    }

    pub fn in_folder(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: Some(folder.into()),
            path: None,
            writer: None,
        }
    }

    /// File currently written to; `None` for stdout or before the first write.
    pub fn output_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn label(&self) -> &'static str {
        if self.folder.is_some() {
            "file"
        } else {
            "stdout"
        }
    }

    async fn ensure_writer(&mut self) -> Result<()> {
        if self.writer.is_some() {
            return Ok(());
        }
        let inner: Box<dyn AsyncWrite + Send + Unpin> = match &self.folder {
            Some(folder) => {
                tokio::fs::create_dir_all(folder).await.map_err(Error::Sink)?;
                let path = output_file_path(folder);
                let file = tokio::fs::File::create(&path).await.map_err(Error::Sink)?;
                info!(path = %path.display(), "writing to file");
                self.path = Some(path);
                Box::new(file)
            }
            None => Box::new(tokio::io::stdout()),
        };
        self.writer = Some(BufWriter::new(inner));
        Ok(())
    }

    async fn write_points(&mut self, points: &[AveragedPoint]) -> Result<()> {
        let mut buf = Vec::new();
        for p in points {
            serde_json::to_writer(&mut buf, p)?;
            buf.push(b'\n');
        }
        self.ensure_writer().await?;
        if let Some(w) = self.writer.as_mut() {
            w.write_all(&buf).await.map_err(Error::Sink)?;
            w.flush().await.map_err(Error::Sink)?;
        }
        metrics::BYTES_WRITTEN
            .with_label_values(&[self.label()])
            .inc_by(buf.len() as u64);
        Ok(())
    }
}

fn output_file_path(folder: &Path) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d%H%M%S");
    folder.join(format!("events_{stamp}.json"))
}

#[async_trait]
impl Sink for FileSink {
    async fn store(&mut self, point: &AveragedPoint) -> Result<()> {
        self.write_points(std::slice::from_ref(point)).await
    }

    async fn store_all(&mut self, points: &[AveragedPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        self.write_points(points).await
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut w) = self.writer.take() {
            w.flush().await.map_err(Error::Sink)?;
            if self.folder.is_some() {
                w.shutdown().await.map_err(Error::Sink)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    struct Collect {
        out: Vec<Event>,
    }

    #[async_trait]
    impl Context for Collect {
        async fn collect(&mut self, event: Event) -> Result<()> {
            self.out.push(event);
            Ok(())
        }
    }

    fn tmp_path(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        p.push(format!("mavg_test_{}_{}", name, nanos));
        p
    }

    #[tokio::test]
    async fn file_source_reads_lines_and_skips_blanks() {
        let path = tmp_path("jsonl");
        let content = concat!(
            r#"{"timestamp": "2018-12-26 18:11:08.509654","#,
            r#""translation_id": "5aa5b2f39f7254a75aa5","#,
            r#""client_name": "airliberty","nr_words": 30, "duration": 20}"#,
            "\n",
            "\n",
            "{\"timestamp\": \"2018-12-26 18:15:19.903159\", \"duration\": 31}\n",
        );
        tokio::fs::write(&path, content).await.unwrap();

        let mut src = FileSource::jsonl(&path);
        let mut ctx = Collect { out: vec![] };
        src.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.out.iter().map(|e| e.duration).collect::<Vec<_>>(), vec![20, 31]);

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn file_source_aborts_on_bad_line() {
        let path = tmp_path("bad");
        let content = concat!(
            "{\"timestamp\": \"2018-12-26 18:11:08\", \"duration\": 20}\n",
            "{\"timestamp\": \"yesterday\", \"duration\": 1}\n",
            "{\"timestamp\": \"2018-12-26 18:12:08\", \"duration\": 5}\n",
        );
        tokio::fs::write(&path, content).await.unwrap();

        let mut src = FileSource::jsonl(&path);
        let mut ctx = Collect { out: vec![] };
        let err = src.run(&mut ctx).await.unwrap_err();
        match err {
            Error::Decode { origin, .. } => assert!(origin.ends_with(":2"), "origin was {origin}"),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(ctx.out.len(), 1);

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn file_source_missing_file_is_io_error() {
        let mut src = FileSource::jsonl(tmp_path("missing"));
        let mut ctx = Collect { out: vec![] };
        assert!(matches!(src.run(&mut ctx).await, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn file_sink_creates_folder_and_appends_lines() {
        let folder = tmp_path("out");
        let mut sink = FileSink::in_folder(&folder);
        assert!(sink.output_path().is_none());

        let t = Utc.with_ymd_and_hms(2018, 12, 26, 18, 11, 0).unwrap();
        sink.store(&AveragedPoint::new(t, 0.0)).await.unwrap();
        sink.store_all(&[
            AveragedPoint::new(t + chrono::Duration::minutes(1), 20.0),
            AveragedPoint::new(t + chrono::Duration::minutes(2), 25.5),
        ])
        .await
        .unwrap();
        sink.close().await.unwrap();

        let path = sink.output_path().unwrap().to_path_buf();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("events_") && name.ends_with(".json"), "{name}");

        let data = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<_> = data.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], r#"{"date":"2018-12-26 18:11:00","average_delivery_time":0.0}"#);
        assert_eq!(lines[2], r#"{"date":"2018-12-26 18:13:00","average_delivery_time":25.5}"#);

        let _ = tokio::fs::remove_dir_all(&folder).await;
    }

    #[tokio::test]
    async fn file_sink_close_without_writes_creates_nothing() {
        let folder = tmp_path("untouched");
        let mut sink = FileSink::in_folder(&folder);
        sink.close().await.unwrap();
        sink.close().await.unwrap();
        assert!(!folder.exists());
    }
}
