//! Field names and protocol literals shared across crates.

/// The only multipart field the artifacts processor accepts as the upload.
pub const FILE_FIELD: &str = "file";

/// Field group under which derived metadata is written downstream.
pub const METADATA_FIELD: &str = "metadata";

/// Logical name the derived metadata stream is persisted under.
pub const METADATA_FILENAME: &str = "metadata.gz";

/// Query parameter selecting the declared artifact format.
pub const ARTIFACT_FORMAT_KEY: &str = "artifact_format";
pub const ARTIFACT_FORMAT_ZIP: &str = "zip";
pub const ARTIFACT_FORMAT_DEFAULT: &str = "";

/// Header carrying the signed list of rewritten multipart fields.
pub const REWRITTEN_FIELDS_HEADER: &str = "Sluice-Multipart-Fields";

/// Suffix of the per-file signed upload token field.
pub const UPLOAD_TOKEN_SUFFIX: &str = "sluice-upload";

/// JWT issuer for everything signed by the gateway.
pub const ISSUER: &str = "sluice";

/// Suffixes the gateway writes for every rewritten file field. Clients may not
/// send value fields ending in any of these.
pub const RESERVED_FIELD_SUFFIXES: &[&str] = &[
    ".name",
    ".path",
    ".remote_url",
    ".remote_id",
    ".size",
    ".sha256",
    ".sha512",
    ".upload_duration",
    ".sluice-upload",
];

/// Reserved suffixes that carry storage locations or signatures. No client
/// value field may end in one of these, whatever its prefix.
pub const LOCATOR_FIELD_SUFFIXES: &[&str] = &[".path", ".remote_url", ".remote_id", ".sluice-upload"];
