use std::fmt;

use serde::{Deserialize, Serialize};

/// One file/line position in a provenance chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceFrame {
    pub file_name: String,
    pub line: Option<usize>,
}

/// Provenance of a node or row.
///
/// Frames are ordered innermost first, so a row authored in an include file
/// reads `included.wxi*3|parent.wxs*1` once encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLineNumber {
    frames: Vec<SourceFrame>,
}

impl SourceLineNumber {
    pub fn new(file_name: impl Into<String>, line: Option<usize>) -> Self {
        Self {
            frames: vec![SourceFrame {
                file_name: file_name.into(),
                line,
            }],
        }
    }

    pub fn at(file_name: impl Into<String>, line: usize) -> Self {
        Self::new(file_name, Some(line))
    }

    pub fn synthetic() -> Self {
        Self::new("<generated>", None)
    }

    /// Appends `parent` as the including context of this position.
    pub fn within(mut self, parent: &SourceLineNumber) -> Self {
        self.frames.extend(parent.frames.iter().cloned());
        self
    }

    pub fn frames(&self) -> &[SourceFrame] {
        &self.frames
    }

    pub fn file_name(&self) -> &str {
        self.frames
            .first()
            .map(|frame| frame.file_name.as_str())
            .unwrap_or_default()
    }

    pub fn line(&self) -> Option<usize> {
        self.frames.first().and_then(|frame| frame.line)
    }

    pub fn encode(&self) -> String {
        self.frames
            .iter()
            .map(|frame| match frame.line {
                Some(line) => format!("{}*{}", frame.file_name, line),
                None => frame.file_name.clone(),
            })
            .collect::<Vec<_>>()
            .join("|")
    }

    pub fn decode(encoded: &str) -> Option<Self> {
        if encoded.trim().is_empty() {
            return None;
        }

        let mut frames = Vec::new();
        for part in encoded.split('|') {
            let frame = match part.rsplit_once('*') {
                Some((file_name, line)) => SourceFrame {
                    file_name: file_name.to_string(),
                    line: Some(line.parse().ok()?),
                },
                None => SourceFrame {
                    file_name: part.to_string(),
                    line: None,
                },
            };
            if frame.file_name.is_empty() {
                return None;
            }
            frames.push(frame);
        }

        Some(Self { frames })
    }
}

impl fmt::Display for SourceLineNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line() {
            Some(line) => write!(f, "{}({})", self.file_name(), line),
            None => write!(f, "{}", self.file_name()),
        }
    }
}

#[cfg(test)]
mod source_tests {
    use super::*;

    #[test]
    fn include_chain_encodes_innermost_first() {
        let parent = SourceLineNumber::at("parent.wxs", 1);
        let nested = SourceLineNumber::at("included.wxi", 3).within(&parent);
        assert_eq!(nested.encode(), "included.wxi*3|parent.wxs*1");
        assert_eq!(nested.file_name(), "included.wxi");
        assert_eq!(nested.line(), Some(3));
        assert_eq!(nested.to_string(), "included.wxi(3)");
    }

    #[test]
    fn decode_accepts_frames_without_line_numbers() {
        let decoded = SourceLineNumber::decode("a.wxi*7|b.wxs").expect("should decode");
        assert_eq!(decoded.frames().len(), 2);
        assert_eq!(decoded.frames()[1].line, None);
        assert_eq!(decoded.encode(), "a.wxi*7|b.wxs");
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(SourceLineNumber::decode("").is_none());
        assert!(SourceLineNumber::decode("a.wxs*x").is_none());
        assert!(SourceLineNumber::decode("|a.wxs*1").is_none());
    }
}
