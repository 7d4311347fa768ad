use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

pub const FILE_ID_LEN: usize = 10;
const RENAME_TAG_LEN: usize = 5;

/// Generates file ids and collision-rename tags from an instance-owned RNG
/// instead of process-global state.
pub struct NameGen {
    rng: Mutex<StdRng>,
}

impl NameGen {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic generator for tests.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn file_id(&self) -> String {
        self.random_string(FILE_ID_LEN)
    }

    /// Resolve a name collision by inserting a random tag before the
    /// extension: `report.pdf` becomes `report_aB3xZ.pdf`.
    pub fn rename(&self, file_name: &str) -> String {
        let tag = self.random_string(RENAME_TAG_LEN);
        match file_name.rfind('.') {
            Some(pos) => format!("{}_{}{}", &file_name[..pos], tag, &file_name[pos..]),
            None => format!("{}_{}", file_name, tag),
        }
    }

    fn random_string(&self, len: usize) -> String {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        (0..len).map(|_| rng.sample(Alphanumeric) as char).collect()
    }
}

impl Default for NameGen {
    fn default() -> Self {
        Self::new()
    }
}

/// File extension including the leading dot, empty when there is none.
pub fn file_suffix(file_name: &str) -> &str {
    file_name
        .rfind('.')
        .map(|pos| &file_name[pos..])
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_ids_are_alphanumeric() {
        let names = NameGen::from_seed(7);
        let id = names.file_id();
        assert_eq!(id.len(), FILE_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(id, names.file_id());
    }

    #[test]
    fn rename_keeps_extension() {
        let names = NameGen::from_seed(7);
        let renamed = names.rename("movie.mp4");
        assert!(renamed.starts_with("movie_"));
        assert!(renamed.ends_with(".mp4"));
        assert_ne!(renamed, "movie.mp4");
    }

    #[test]
    fn rename_without_extension_appends_tag() {
        let names = NameGen::from_seed(7);
        let renamed = names.rename("README");
        assert!(renamed.starts_with("README_"));
    }

    #[test]
    fn suffix_extraction() {
        assert_eq!(file_suffix("a.tar.gz"), ".gz");
        assert_eq!(file_suffix("movie.MP4"), ".MP4");
        assert_eq!(file_suffix("noext"), "");
    }
}
