use chrono::{DateTime, TimeZone};
use std::path::{Path, PathBuf};

/// File name layout for captured photos
pub const FILENAME_FORMAT: &str = "%Y-%m-%d-%H-%M-%S-%3f";
pub const FILE_EXTENSION: &str = "jpg";

/// Hands out unique photo file names derived from the wall clock.
///
/// When two captures land on the same millisecond, or a name is already
/// taken, a `-N` suffix is appended instead of reusing the name.
#[derive(Debug, Default)]
pub struct DestinationAllocator {
    last_stem: Option<String>,
    last_suffix: u32,
}

impl DestinationAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate<Tz, F>(&mut self, at: DateTime<Tz>, taken: F) -> String
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
        F: Fn(&str) -> bool,
    {
        let stem = at.format(FILENAME_FORMAT).to_string();
        let mut suffix = match &self.last_stem {
            Some(last) if *last == stem => self.last_suffix + 1,
            _ => 0,
        };

        loop {
            let name = compose(&stem, suffix);
            if !taken(&name) {
                self.last_stem = Some(stem);
                self.last_suffix = suffix;
                return name;
            }
            suffix += 1;
        }
    }
}

/// `destination` with a `-N` suffix on its stem, in the same directory
pub(crate) fn with_suffix(destination: &Path, suffix: u32) -> PathBuf {
    let stem = destination
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    destination.with_file_name(compose(&stem, suffix))
}

fn compose(stem: &str, suffix: u32) -> String {
    if suffix == 0 {
        format!("{}.{}", stem, FILE_EXTENSION)
    } else {
        format!("{}-{}.{}", stem, suffix, FILE_EXTENSION)
    }
}
