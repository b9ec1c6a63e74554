use chrono::NaiveDate;
use serde::de::{self, Deserializer, Unexpected, Visitor};
use serde::{Deserialize, Serialize};

/// Date stamp format used as the prefix of every staged page/listing file.
const FILE_STAMP_FORMAT: &str = "%y%m%d";

/// Renders `date` as the `YYMMDD` prefix used in staged file names.
#[must_use]
pub fn file_stamp(date: NaiveDate) -> String {
    date.format(FILE_STAMP_FORMAT).to_string()
}

/// Accepts a listing identifier written either as a JSON string or as an
/// integer; both become the same text. Empty strings are rejected.
fn listing_id_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    struct ListingIdVisitor;

    impl Visitor<'_> for ListingIdVisitor {
        type Value = String;

        fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("a non-empty string or an integer listing id")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
            if v.is_empty() {
                return Err(E::invalid_value(Unexpected::Str(v), &self));
            }
            Ok(v.to_owned())
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<String, E> {
            Ok(v.to_string())
        }
    }

    deserializer.deserialize_any(ListingIdVisitor)
}

/// One observation of a listing on one day.
///
/// `listing_id`, `observed_on`, `source_file`, and `archive_object_name` are
/// metadata; every other field is a business attribute that participates in
/// change detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingSnapshot {
    #[serde(deserialize_with = "listing_id_text")]
    pub listing_id: String,
    pub observed_on: NaiveDate,
    /// Name of the staged listing file the row was extracted from.
    pub source_file: String,
    /// Object-store key of the archived source document, if any.
    #[serde(default)]
    pub archive_object_name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    /// Room layout, e.g. `"2+kk"`.
    #[serde(default)]
    pub disposition: Option<String>,
    #[serde(default)]
    pub area_m2: Option<f64>,
    #[serde(default)]
    pub rent: Option<i64>,
    #[serde(default)]
    pub utilities: Option<i64>,
    #[serde(default)]
    pub services: Option<i64>,
    #[serde(default)]
    pub fee: Option<i64>,
    #[serde(default)]
    pub available_from: Option<NaiveDate>,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

/// Download lifecycle of an image.
///
/// Legal transitions are `Pending → Downloaded`, `Pending → Failed`, and
/// `Downloaded → Archived`. `Archived` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i16", into = "i16")]
pub enum DownloadStatus {
    Pending,
    Downloaded,
    Archived,
    Failed,
}

impl DownloadStatus {
    #[must_use]
    pub fn as_i16(self) -> i16 {
        match self {
            Self::Pending => 0,
            Self::Downloaded => 1,
            Self::Archived => 3,
            Self::Failed => 9,
        }
    }

    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Downloaded | Self::Failed) | (Self::Downloaded, Self::Archived)
        )
    }
}

impl TryFrom<i16> for DownloadStatus {
    type Error = String;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Pending),
            1 => Ok(Self::Downloaded),
            3 => Ok(Self::Archived),
            9 => Ok(Self::Failed),
            other => Err(format!("unknown download status {other}")),
        }
    }
}

impl From<DownloadStatus> for i16 {
    fn from(status: DownloadStatus) -> Self {
        status.as_i16()
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Downloaded => "downloaded",
            Self::Archived => "archived",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// An image reference produced by extraction, not yet stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewImage {
    #[serde(deserialize_with = "listing_id_text")]
    pub listing_id: String,
    pub filename: String,
    /// Object-store key the image is archived under.
    pub object_name: String,
    pub url: String,
}

/// A stored image row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: i64,
    pub listing_id: String,
    pub filename: String,
    pub object_name: String,
    pub url: String,
    pub downloaded: DownloadStatus,
}

impl ImageRecord {
    /// Local staging key for the image bytes: `<listing_id>-<filename>`.
    #[must_use]
    pub fn sink_key(&self) -> String {
        format!("{}-{}", self.listing_id, self.filename)
    }

    /// Moves the record to `next` if the transition is legal.
    ///
    /// Returns `false` (and leaves the status untouched) otherwise.
    pub fn transition(&mut self, next: DownloadStatus) -> bool {
        if self.downloaded.can_transition_to(next) {
            self.downloaded = next;
            true
        } else {
            false
        }
    }
}
