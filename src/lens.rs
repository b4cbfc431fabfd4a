use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Logical camera selectable by the user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LensFacing {
    Front,
    #[default]
    Back,
}

impl LensFacing {
    /// The other lens
    pub fn opposite(self) -> Self {
        match self {
            LensFacing::Front => LensFacing::Back,
            LensFacing::Back => LensFacing::Front,
        }
    }
}

impl fmt::Display for LensFacing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LensFacing::Front => write!(f, "front"),
            LensFacing::Back => write!(f, "back"),
        }
    }
}

/// Holds the desired lens for the next bind.
///
/// Flipping never touches the camera; the session reads `current()` when it
/// binds.
#[derive(Debug, Clone)]
pub struct LensSelector {
    current: LensFacing,
}

impl LensSelector {
    pub fn new(initial: LensFacing) -> Self {
        Self { current: initial }
    }

    pub fn current(&self) -> LensFacing {
        self.current
    }

    /// Toggle between front and back, returning the new selection
    pub fn flip(&mut self) -> LensFacing {
        self.current = self.current.opposite();
        debug!("Lens selection flipped to {}", self.current);
        self.current
    }

    pub fn select(&mut self, lens: LensFacing) {
        self.current = lens;
    }
}

impl Default for LensSelector {
    fn default() -> Self {
        Self::new(LensFacing::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_back() {
        let selector = LensSelector::default();
        assert_eq!(selector.current(), LensFacing::Back);
    }

    #[test]
    fn test_flip_toggles_and_returns_new_value() {
        let mut selector = LensSelector::new(LensFacing::Back);

        assert_eq!(selector.flip(), LensFacing::Front);
        assert_eq!(selector.current(), LensFacing::Front);
        assert_eq!(selector.flip(), LensFacing::Back);
        assert_eq!(selector.current(), LensFacing::Back);
    }

    #[test]
    fn test_select_overrides_current() {
        let mut selector = LensSelector::new(LensFacing::Back);
        selector.select(LensFacing::Front);
        assert_eq!(selector.current(), LensFacing::Front);
    }

    #[test]
    fn test_lens_serde_lowercase() {
        let json = serde_json::to_string(&LensFacing::Front).unwrap();
        assert_eq!(json, "\"front\"");
        let lens: LensFacing = serde_json::from_str("\"back\"").unwrap();
        assert_eq!(lens, LensFacing::Back);
    }
}
