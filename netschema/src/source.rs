//! Types related to source files.

use std::fmt;
use std::ops::Range;

/// File ids, as handed out by [`codespan_reporting::files::SimpleFiles`].
pub type FileId = usize;

/// Byte offsets into source files.
pub type BytePos = u32;

/// Byte ranges in source files.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct ByteRange {
    start: BytePos,
    end: BytePos,
}

impl fmt::Debug for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteRange({}..{})", self.start, self.end)
    }
}

impl ByteRange {
    pub const fn new(start: BytePos, end: BytePos) -> ByteRange {
        ByteRange { start, end }
    }

    pub const fn start(&self) -> BytePos {
        self.start
    }

    pub const fn end(&self) -> BytePos {
        self.end
    }

    pub fn merge(self, other: ByteRange) -> ByteRange {
        ByteRange::new(self.start.min(other.start), self.end.max(other.end))
    }
}

impl From<ByteRange> for Range<usize> {
    fn from(range: ByteRange) -> Range<usize> {
        (range.start as usize)..(range.end as usize)
    }
}

/// Byte ranges in a specific source file.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct FileRange {
    file_id: FileId,
    byte_range: ByteRange,
}

impl fmt::Debug for FileRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FileRange({}, {}..{})",
            self.file_id, self.byte_range.start, self.byte_range.end
        )
    }
}

impl FileRange {
    pub const fn new(file_id: FileId, byte_range: ByteRange) -> FileRange {
        FileRange {
            file_id,
            byte_range,
        }
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub const fn byte_range(&self) -> ByteRange {
        self.byte_range
    }

    pub const fn start(&self) -> BytePos {
        self.byte_range.start
    }

    pub const fn end(&self) -> BytePos {
        self.byte_range.end
    }

    pub fn merge(&self, other: &FileRange) -> Option<FileRange> {
        if self.file_id == other.file_id {
            Some(FileRange::new(
                self.file_id,
                ByteRange::merge(self.byte_range, other.byte_range),
            ))
        } else {
            None
        }
    }
}

impl From<FileRange> for Range<usize> {
    fn from(file_range: FileRange) -> Range<usize> {
        file_range.byte_range.into()
    }
}

/// The location of a document node.
///
/// Nodes that were constructed in code rather than read from a file have an
/// empty span.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Span {
    Range(FileRange),
    Empty,
}

impl Span {
    pub fn merge(&self, other: &Span) -> Span {
        match (self, other) {
            (Span::Range(a), Span::Range(b)) => a.merge(b).map_or(Span::Empty, Span::Range),
            (_, _) => Span::Empty,
        }
    }

    pub fn file_range(&self) -> Option<FileRange> {
        match self {
            Span::Range(range) => Some(*range),
            Span::Empty => None,
        }
    }
}

impl From<FileRange> for Span {
    fn from(range: FileRange) -> Span {
        Span::Range(range)
    }
}

impl From<Option<FileRange>> for Span {
    fn from(range: Option<FileRange>) -> Span {
        range.map_or(Span::Empty, Span::Range)
    }
}
