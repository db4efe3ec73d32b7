//! `ebs://<region>/<snapshot-id>` backup references.

use std::fmt;
use std::str::FromStr;

use reqwest::Url;

use super::{BACKEND_NAME, EbsError};

const SNAPSHOT_PREFIX: &str = "snap-";

/// A durable reference to a snapshot in a region.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BackupRef {
    /// Region holding the snapshot.
    pub region: String,
    /// Cloud snapshot identifier.
    pub snapshot_id: String,
}

impl BackupRef {
    /// Creates a reference.
    #[must_use]
    pub fn new(region: impl Into<String>, snapshot_id: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            snapshot_id: snapshot_id.into(),
        }
    }

    /// Renders the reference as a URL string.
    #[must_use]
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Parses a backup URL.
    ///
    /// # Errors
    ///
    /// Returns [`EbsError::SchemeMismatch`] for a scheme other than `ebs`
    /// and [`EbsError::InvalidBackupUrl`] for anything else malformed,
    /// including snapshot identifiers outside `snap-[0-9a-z]+`.
    pub fn decode(raw: &str) -> Result<Self, EbsError> {
        let invalid = |message: &str| EbsError::InvalidBackupUrl {
            url: raw.to_owned(),
            message: message.to_owned(),
        };
        let url = Url::parse(raw).map_err(|err| invalid(&err.to_string()))?;
        if url.scheme() != BACKEND_NAME {
            return Err(EbsError::SchemeMismatch {
                scheme: url.scheme().to_owned(),
            });
        }

        let region = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| invalid("missing region"))?;
        let snapshot_id = url.path().trim_matches('/');
        if !is_snapshot_id(snapshot_id) {
            return Err(invalid(&format!("invalid snapshot id '{snapshot_id}'")));
        }
        Ok(Self::new(region, snapshot_id))
    }
}

impl fmt::Display for BackupRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{BACKEND_NAME}://{}/{}", self.region, self.snapshot_id)
    }
}

impl FromStr for BackupRef {
    type Err = EbsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::decode(value)
    }
}

fn is_snapshot_id(id: &str) -> bool {
    id.strip_prefix(SNAPSHOT_PREFIX).is_some_and(|rest| {
        !rest.is_empty()
            && rest
                .bytes()
                .all(|byte| byte.is_ascii_digit() || byte.is_ascii_lowercase())
    })
}
