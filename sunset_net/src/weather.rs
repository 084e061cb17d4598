use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::NetErr;

/// The weather condition a parameter set was trained under.
///
/// Every variant shares the same architecture, the tag only selects which persisted
/// parameters a model reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weather {
    Sunny,
    Cloudy,
    Overcast,
}

impl Weather {
    pub const ALL: [Weather; 3] = [Weather::Sunny, Weather::Cloudy, Weather::Overcast];

    pub fn as_str(self) -> &'static str {
        match self {
            Weather::Sunny => "sunny",
            Weather::Cloudy => "cloudy",
            Weather::Overcast => "overcast",
        }
    }

    /// The checkpoint file name for this weather, without directory.
    pub fn file_name(self) -> String {
        format!("sunset_{}.safetensors", self.as_str())
    }
}

impl fmt::Display for Weather {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Weather {
    type Err = NetErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sunny" => Ok(Weather::Sunny),
            "cloudy" => Ok(Weather::Cloudy),
            "overcast" => Ok(Weather::Overcast),
            _ => Err(NetErr::UnknownWeather(s.to_string())),
        }
    }
}
