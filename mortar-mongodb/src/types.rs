//! Shared value types: namespaces, read/write policy and sort directions.

use std::fmt;
use std::time::Duration;

use bson::{Bson, Document, doc};
use mongodb::options::{ReadConcern as DriverReadConcern, SelectionCriteria};
use serde::{Deserialize, Deserializer, Serialize};

/// A fully qualified collection name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    /// Database name.
    pub database: String,
    /// Collection name.
    pub collection: String,
}

impl Namespace {
    /// Create a namespace.
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// MongoDB read preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadPreference {
    /// Read from primary only.
    #[default]
    Primary,
    /// Read from primary preferred, fallback to secondary.
    PrimaryPreferred,
    /// Read from secondary only.
    Secondary,
    /// Read from secondary preferred, fallback to primary.
    SecondaryPreferred,
    /// Read from nearest member.
    Nearest,
}

impl ReadPreference {
    /// Convert to the driver's selection criteria.
    pub fn to_selection_criteria(self) -> SelectionCriteria {
        use mongodb::options::ReadPreference as Driver;

        SelectionCriteria::ReadPreference(match self {
            Self::Primary => Driver::Primary,
            Self::PrimaryPreferred => Driver::PrimaryPreferred {
                options: Default::default(),
            },
            Self::Secondary => Driver::Secondary {
                options: Default::default(),
            },
            Self::SecondaryPreferred => Driver::SecondaryPreferred {
                options: Default::default(),
            },
            Self::Nearest => Driver::Nearest {
                options: Default::default(),
            },
        })
    }
}

/// MongoDB read concern level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadConcern {
    /// Most recent data on the queried member.
    Local,
    /// Data acknowledged by a majority of members.
    #[default]
    Majority,
    /// Majority data reflecting all prior acknowledged writes.
    Linearizable,
    /// Whatever the member has, without consistency guarantees.
    Available,
    /// Snapshot isolation.
    Snapshot,
}

impl ReadConcern {
    /// Convert to the driver's read concern.
    pub fn to_driver(self) -> DriverReadConcern {
        match self {
            Self::Local => DriverReadConcern::local(),
            Self::Majority => DriverReadConcern::majority(),
            Self::Linearizable => DriverReadConcern::linearizable(),
            Self::Available => DriverReadConcern::available(),
            Self::Snapshot => DriverReadConcern::snapshot(),
        }
    }
}

/// Acknowledgment level of a write concern.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub enum WriteConcernLevel {
    /// Acknowledge writes from the specified number of nodes.
    W(u32),
    /// Acknowledge writes from majority of nodes.
    #[default]
    Majority,
    /// Custom tag set.
    Custom(String),
}

impl<'de> Deserialize<'de> for WriteConcernLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Nodes(u32),
            Tag(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Nodes(n) => Self::W(n),
            Raw::Tag(tag) if tag.eq_ignore_ascii_case("majority") => Self::Majority,
            Raw::Tag(tag) => Self::Custom(tag),
        })
    }
}

impl WriteConcernLevel {
    fn to_bson(&self) -> Bson {
        match self {
            Self::W(n) => Bson::Int64(i64::from(*n)),
            Self::Majority => Bson::String("majority".to_string()),
            Self::Custom(tag) => Bson::String(tag.clone()),
        }
    }
}

/// Write timeout applied to every write issued by the builder.
pub const WRITE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Durability requested for a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteConcern {
    /// Acknowledgment level.
    pub level: WriteConcernLevel,
    /// How long the server may wait for the acknowledgment.
    pub timeout: Duration,
    /// Require the write to reach the on-disk journal.
    pub journal: Option<bool>,
}

impl Default for WriteConcern {
    fn default() -> Self {
        Self {
            level: WriteConcernLevel::Majority,
            timeout: WRITE_TIMEOUT,
            journal: None,
        }
    }
}

impl WriteConcern {
    /// Render the `writeConcern` document sent with write commands.
    pub fn to_document(&self) -> Document {
        let mut concern = doc! {
            "w": self.level.to_bson(),
            "wtimeout": self.timeout.as_millis() as i64,
        };
        if let Some(journal) = self.journal {
            concern.insert("j", journal);
        }
        concern
    }
}

/// Output shape requested for read and command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnAs {
    /// Loosely typed key/value maps.
    #[default]
    Array,
    /// Record-like JSON objects.
    Object,
}

/// Normalize a sort or index direction.
///
/// `-1`, `false` and `"desc"` (any case) are descending; everything else
/// is ascending.
pub fn direction(value: &Bson) -> i32 {
    let descending = match value {
        Bson::Int32(n) => *n == -1,
        Bson::Int64(n) => *n == -1,
        Bson::Double(n) => *n == -1.0,
        Bson::Boolean(b) => !*b,
        Bson::String(s) => {
            let s = s.trim();
            s.eq_ignore_ascii_case("desc") || s == "-1"
        }
        _ => false,
    };

    if descending { -1 } else { 1 }
}

/// Apply [`direction`] to every value of a key document.
pub fn normalize_directions(keys: &Document) -> Document {
    keys.iter()
        .map(|(field, value)| (field.clone(), Bson::Int32(direction(value))))
        .collect()
}
