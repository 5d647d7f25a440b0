//! Typed output records and the sinks that receive them.
//!
//! Analysis stages hand their results to a [`RecordSink`] instead of
//! writing files, so reporting formats stay outside the core.

use crate::analysis::corroboration::ScoredRelationship;
use crate::analysis::graph::{CommunityBridge, StructuralGap};
use crate::analysis::priority::PriorityScore;
use crate::model::audit::ReviewItem;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io::Write;

/// One row of analytical output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum OutputRecord {
    ScoredRelationship(ScoredRelationship),
    StructuralGap(StructuralGap),
    CommunityBridge(CommunityBridge),
    Priority(PriorityScore),
    ReviewItem(ReviewItem),
}

impl OutputRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ScoredRelationship(_) => "scored_relationship",
            Self::StructuralGap(_) => "structural_gap",
            Self::CommunityBridge(_) => "community_bridge",
            Self::Priority(_) => "priority",
            Self::ReviewItem(_) => "review_item",
        }
    }
}

#[derive(Debug)]
pub enum SinkError {
    Io(std::io::Error),
    Encode(serde_json::Error),
}

impl Display for SinkError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "sink write failed: {err}"),
            Self::Encode(err) => write!(f, "record encoding failed: {err}"),
        }
    }
}

impl Error for SinkError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Encode(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for SinkError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(value: serde_json::Error) -> Self {
        Self::Encode(value)
    }
}

/// Destination for output records.
pub trait RecordSink {
    fn emit(&mut self, record: OutputRecord) -> Result<(), SinkError>;

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Collects records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub records: Vec<OutputRecord>,
}

impl MemorySink {
    pub fn count(&self, kind: &str) -> usize {
        self.records.iter().filter(|record| record.kind() == kind).count()
    }
}

impl RecordSink for MemorySink {
    fn emit(&mut self, record: OutputRecord) -> Result<(), SinkError> {
        self.records.push(record);
        Ok(())
    }
}

/// Writes one JSON object per line.
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> RecordSink for JsonLinesSink<W> {
    fn emit(&mut self, record: OutputRecord) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{JsonLinesSink, OutputRecord, RecordSink};
    use crate::analysis::graph::CommunityBridge;

    #[test]
    fn json_lines_are_tagged_by_record_kind() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.emit(OutputRecord::CommunityBridge(CommunityBridge {
            entity_id: "PER-00001".to_string(),
            community: 0,
            communities_spanned: 3,
        }))
        .unwrap();
        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert!(text.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(value["record"], "community_bridge");
        assert_eq!(value["communities_spanned"], 3);
    }
}
