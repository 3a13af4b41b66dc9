use serde::{Deserialize, Serialize};
use std::fmt;

/// Binary class of a frame or video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Label {
    Real = 0,
    Fake = 1,
}

impl Label {
    pub const ALL: [Label; 2] = [Label::Real, Label::Fake];

    /// Class index used by the classifier output.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Real),
            1 => Some(Self::Fake),
            _ => None,
        }
    }

    /// Directory name of this class in an extracted corpus.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Real => "REAL",
            Self::Fake => "FAKE",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl std::str::FromStr for Label {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "real" | "0" => Ok(Self::Real),
            "fake" | "1" => Ok(Self::Fake),
            other => Err(format!("unknown label '{}', expected real or fake", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_indices() {
        assert_eq!(Label::Real.index(), 0);
        assert_eq!(Label::Fake.index(), 1);
        assert_eq!(Label::from_index(1), Some(Label::Fake));
        assert_eq!(Label::from_index(2), None);
    }

    #[test]
    fn test_label_parsing() {
        assert_eq!("FAKE".parse::<Label>().unwrap(), Label::Fake);
        assert_eq!("real".parse::<Label>().unwrap(), Label::Real);
        assert!("maybe".parse::<Label>().is_err());
    }
}
