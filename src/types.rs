use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ballot_card::BallotSide;

impl FromStr for BallotSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "front" => Ok(BallotSide::Front),
            "back" => Ok(BallotSide::Back),
            _ => Err(format!("invalid ballot side: {}", s)),
        }
    }
}

impl Display for BallotSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BallotSide::Front => write!(f, "front"),
            BallotSide::Back => write!(f, "back"),
        }
    }
}

impl<'de> Deserialize<'de> for BallotSide {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl Serialize for BallotSide {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

// Defines a new type that wraps a String for use as an ID.
macro_rules! idtype {
    ($name:ident) => {
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            #[allow(dead_code)]
            pub fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

pub(crate) use idtype;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_ballot_side_serde() {
        assert_eq!(serde_json::to_string(&BallotSide::Back).unwrap(), "\"back\"");
        assert_eq!(
            serde_json::from_str::<BallotSide>("\"front\"").unwrap(),
            BallotSide::Front
        );
        assert!(serde_json::from_str::<BallotSide>("\"middle\"").is_err());
    }
}
