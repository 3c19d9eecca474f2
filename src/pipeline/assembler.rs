//! Result assembly and output sinks

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};

use super::batcher::Batch;
use super::runner::GeneratedRows;
use crate::config::DecodingStrategy;
use crate::tokenizer::TokenizerTrait;

/// One output record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    /// `{original_index}_{threshold}`
    pub id: String,
    /// Prompt as submitted to the model
    pub prompt: String,
    /// Raw decoded continuation, special tokens included
    pub response: String,
}

/// Record key combining prompt position and strategy
pub fn composite_id(original_index: usize, strategy: DecodingStrategy) -> String {
    format!("{}_{}", original_index, strategy.label())
}

/// Append-only destination for records
pub trait RecordSink {
    fn append(&mut self, record: GenerationResult) -> Result<()>;

    /// Make appended records durable
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl RecordSink for Vec<GenerationResult> {
    fn append(&mut self, record: GenerationResult) -> Result<()> {
        self.push(record);
        Ok(())
    }
}

/// CSV table with columns `id`, `prompt`, `response`; every field quoted
pub struct CsvSink<W: Write> {
    writer: W,
}

impl CsvSink<BufWriter<File>> {
    /// Create (or truncate) the output file and write the header
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)
            .with_context(|| format!("failed to create output file {}", path.display()))?;
        tracing::info!("Writing records to {}", path.display());
        Self::new(BufWriter::new(file))
    }
}

impl<W: Write> CsvSink<W> {
    pub fn new(mut writer: W) -> Result<Self> {
        write_row(&mut writer, &["id", "prompt", "response"])?;
        Ok(Self { writer })
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> RecordSink for CsvSink<W> {
    fn append(&mut self, record: GenerationResult) -> Result<()> {
        write_row(
            &mut self.writer,
            &[record.id.as_str(), record.prompt.as_str(), record.response.as_str()],
        )
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

fn write_row<W: Write>(writer: &mut W, fields: &[&str]) -> Result<()> {
    let line = fields
        .iter()
        .map(|f| format!("\"{}\"", f.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(",");
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\r\n")?;
    Ok(())
}

/// Turns generated rows into records
pub struct ResultAssembler<'t> {
    tokenizer: &'t dyn TokenizerTrait,
}

impl<'t> ResultAssembler<'t> {
    pub fn new(tokenizer: &'t dyn TokenizerTrait) -> Self {
        Self { tokenizer }
    }

    /// Decode each row's continuation and append one record per row.
    ///
    /// Returns the number of records appended.
    pub fn emit<S: RecordSink + ?Sized>(
        &self,
        batch: &Batch,
        rows: &GeneratedRows,
        strategy: DecodingStrategy,
        sink: &mut S,
    ) -> Result<usize> {
        if rows.len() != batch.len() {
            bail!(
                "batch has {} prompts but {} generated rows",
                batch.len(),
                rows.len()
            );
        }

        for (row, (prompt, &index)) in batch.prompts().iter().zip(batch.indices()).enumerate() {
            let response = self.tokenizer.decode(rows.continuation(row))?;
            sink.append(GenerationResult {
                id: composite_id(index, strategy),
                prompt: prompt.text().to_string(),
                response,
            })?;
        }

        Ok(batch.len())
    }
}
