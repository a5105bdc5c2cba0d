use std::fmt;
use std::str::FromStr;

use crate::error::TraceError;

/// Particle species tag as stored in the catalogue parttype files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Species {
    Gas,
    DarkMatter,
    Stars,
    BlackHoles,
}

impl Species {
    pub const ALL: [Species; 4] = [
        Species::Gas,
        Species::DarkMatter,
        Species::Stars,
        Species::BlackHoles,
    ];

    #[inline]
    pub fn code(self) -> i16 {
        match self {
            Species::Gas => 0,
            Species::DarkMatter => 1,
            Species::Stars => 4,
            Species::BlackHoles => 5,
        }
    }

    pub fn from_code(code: i16) -> Option<Species> {
        Species::ALL.into_iter().find(|s| s.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            Species::Gas => "gas",
            Species::DarkMatter => "dark_matter",
            Species::Stars => "stars",
            Species::BlackHoles => "black_holes",
        }
    }
}

impl fmt::Display for Species {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Species {
    type Err = TraceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Species::ALL
            .into_iter()
            .find(|sp| sp.name() == lower)
            .ok_or_else(|| TraceError::config(format!("{s:?} is not a valid particle species")))
    }
}
