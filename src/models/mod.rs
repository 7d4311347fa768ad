use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Post-upload lifecycle of a file record. Transitions only ever go
/// `Transferring -> Using` or `Transferring -> TransferFailed`; both end
/// states are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "i32", db_type = "Integer")]
pub enum FileStatus {
    #[sea_orm(num_value = 0)]
    Transferring,
    #[sea_orm(num_value = 1)]
    TransferFailed,
    #[sea_orm(num_value = 2)]
    Using,
}

/// Visibility of a record in listings. The upload pipeline only ever creates
/// `Active` records; the other states belong to the (out of scope) CRUD layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "i32", db_type = "Integer")]
pub enum DelFlag {
    #[sea_orm(num_value = 0)]
    Deleted,
    #[sea_orm(num_value = 1)]
    Recycled,
    #[sea_orm(num_value = 2)]
    Active,
}

/// State of a queued transfer job in the outbox table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "i32", db_type = "Integer")]
pub enum JobStatus {
    #[sea_orm(num_value = 0)]
    Pending,
    #[sea_orm(num_value = 1)]
    Running,
    #[sea_orm(num_value = 2)]
    Done,
    #[sea_orm(num_value = 3)]
    Failed,
}

/// Coarse media category, derived from the file extension at ingestion time.
/// Drives the post-processing branch: videos get segmented, images get a
/// thumbnail, everything else passes through untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "i32", db_type = "Integer")]
pub enum FileCategory {
    #[sea_orm(num_value = 1)]
    Video,
    #[sea_orm(num_value = 2)]
    Music,
    #[sea_orm(num_value = 3)]
    Image,
    #[sea_orm(num_value = 4)]
    Doc,
    #[sea_orm(num_value = 5)]
    Others,
}

/// Finer-grained file type, also derived from the extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "i32", db_type = "Integer")]
pub enum FileKind {
    #[sea_orm(num_value = 1)]
    Video,
    #[sea_orm(num_value = 2)]
    Music,
    #[sea_orm(num_value = 3)]
    Image,
    #[sea_orm(num_value = 4)]
    Pdf,
    #[sea_orm(num_value = 5)]
    Word,
    #[sea_orm(num_value = 6)]
    Excel,
    #[sea_orm(num_value = 7)]
    Txt,
    #[sea_orm(num_value = 8)]
    Program,
    #[sea_orm(num_value = 9)]
    Zip,
    #[sea_orm(num_value = 10)]
    Others,
}

const VIDEO_SUFFIXES: &[&str] = &[".mp4", ".avi", ".rmvb", ".mkv", ".mov"];
const MUSIC_SUFFIXES: &[&str] = &[
    ".mp3", ".wav", ".wma", ".mp2", ".flac", ".midi", ".ra", ".ape", ".aac", ".cda",
];
const IMAGE_SUFFIXES: &[&str] = &[
    ".jpeg", ".jpg", ".png", ".gif", ".bmp", ".dds", ".psd", ".pdt", ".webp", ".xmp", ".svg",
    ".tiff",
];
const PROGRAM_SUFFIXES: &[&str] = &[
    ".h", ".c", ".hpp", ".hxx", ".cpp", ".cc", ".c++", ".cxx", ".m", ".o", ".s", ".dll", ".cs",
    ".java", ".class", ".js", ".ts", ".css", ".scss", ".vue", ".jsx", ".sql", ".md", ".json",
    ".html", ".xml",
];
const ZIP_SUFFIXES: &[&str] = &[
    ".rar", ".zip", ".7z", ".cab", ".arj", ".lzh", ".tar", ".gz", ".ace", ".uue", ".bz", ".jar",
    ".iso", ".mpq",
];

impl FileKind {
    /// Classify a file by its extension (dot included, case-insensitive).
    pub fn from_suffix(suffix: &str) -> Self {
        let suffix = suffix.to_ascii_lowercase();
        let suffix = suffix.as_str();
        if VIDEO_SUFFIXES.contains(&suffix) {
            FileKind::Video
        } else if MUSIC_SUFFIXES.contains(&suffix) {
            FileKind::Music
        } else if IMAGE_SUFFIXES.contains(&suffix) {
            FileKind::Image
        } else if suffix == ".pdf" {
            FileKind::Pdf
        } else if suffix == ".docx" {
            FileKind::Word
        } else if suffix == ".xlsx" {
            FileKind::Excel
        } else if suffix == ".txt" {
            FileKind::Txt
        } else if PROGRAM_SUFFIXES.contains(&suffix) {
            FileKind::Program
        } else if ZIP_SUFFIXES.contains(&suffix) {
            FileKind::Zip
        } else {
            FileKind::Others
        }
    }

    pub fn category(self) -> FileCategory {
        match self {
            FileKind::Video => FileCategory::Video,
            FileKind::Music => FileCategory::Music,
            FileKind::Image => FileCategory::Image,
            FileKind::Pdf | FileKind::Word | FileKind::Excel | FileKind::Txt => FileCategory::Doc,
            FileKind::Program | FileKind::Zip | FileKind::Others => FileCategory::Others,
        }
    }
}

/// Outcome phase of a single chunk submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadPhase {
    /// Content hash matched an existing artifact; no bytes were stored.
    Instant,
    /// Chunk accepted, more chunks expected.
    Uploading,
    /// Last chunk accepted and the record committed; post-processing queued.
    Finished,
}

/// Per-request caller identity, constructed once at the edge and passed down
/// explicitly instead of living in task-local state.
#[derive(Clone, Debug)]
pub struct RequestCtx {
    pub user_id: String,
}

impl RequestCtx {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_suffix_case_insensitive() {
        assert_eq!(FileKind::from_suffix(".MP4"), FileKind::Video);
        assert_eq!(FileKind::from_suffix(".jpg"), FileKind::Image);
        assert_eq!(FileKind::from_suffix(".flac"), FileKind::Music);
        assert_eq!(FileKind::from_suffix(".docx"), FileKind::Word);
        assert_eq!(FileKind::from_suffix(".weird"), FileKind::Others);
    }

    #[test]
    fn kind_maps_to_category() {
        assert_eq!(FileKind::Video.category(), FileCategory::Video);
        assert_eq!(FileKind::Pdf.category(), FileCategory::Doc);
        assert_eq!(FileKind::Zip.category(), FileCategory::Others);
    }
}
