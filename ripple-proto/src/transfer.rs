//! Content pull requests published on the `file-requests` exchange

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::validation::{ValidationError, Validator};

/// A request for the content of one path at one checksum.
///
/// The reply destination is carried by the message's reply-to address, not
/// by the record itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub requestor: String,
    pub path: String,
    pub checksum: String,
}

impl TransferRequest {
    pub fn new(
        requestor: impl Into<String>,
        path: impl Into<String>,
        checksum: impl Into<String>,
    ) -> Self {
        Self {
            requestor: requestor.into(),
            path: path.into(),
            checksum: checksum.into(),
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        Validator::validate_node_id(&self.requestor)?;
        Validator::validate_path(&self.path)?;
        Validator::validate_hash(&self.checksum)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let request: TransferRequest = serde_json::from_slice(bytes)?;
        request.validate()?;
        Ok(request)
    }
}
