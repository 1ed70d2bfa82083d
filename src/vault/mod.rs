//! Vault module: secrets, their access policies, the encrypted revision
//! log, the access request workflow, and the on-disk vault file.
//!
//! - `secret`: secret metadata, payload kinds, create/update inputs
//! - `policy`: pure visibility/readability rules
//! - `revision`: append-only encrypted revision log
//! - `access_request`: the request/approve/reject state machine
//! - `registry`: the composition root every caller goes through
//! - `format` / `store`: binary vault file with HMAC integrity

pub mod access_request;
pub mod format;
pub mod policy;
pub mod registry;
pub mod revision;
pub mod secret;
pub mod store;

pub use access_request::{AccessRequest, AccessRequestWorkflow, RequestId, RequestStatus};
pub use format::{VaultHeader, VaultSnapshot};
pub use registry::{Collaborators, SearchHit, SecretDetail, SecretRegistry, DEFAULT_SEARCH_LIMIT};
pub use revision::{RevealedValue, RevisionId, RevisionInfo, RevisionRecord, RevisionStore};
pub use secret::{
    AccessPolicy, CardData, ContentType, NewSecret, Secret, SecretId, SecretPayload,
    SecretStatus, SecretUpdate,
};
pub use store::{VaultLock, VaultStore};
