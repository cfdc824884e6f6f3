//! Shared key generation for storage backends.
//!
//! Key format: `usage/{tenant_id}/{upload_id}/{file_name}`.

use uuid::Uuid;

/// Generate a storage key for one upload.
///
/// The upload id makes every key unique, so two uploads never share a blob even when
/// their tenant and file name collide (including after separator replacement).
/// Any path separator left in the tenant or file name is replaced so the key always
/// has exactly four segments.
pub fn generate_storage_key(tenant_id: &str, upload_id: Uuid, file_name: &str) -> String {
    format!(
        "usage/{}/{}/{}",
        sanitize(tenant_id),
        upload_id,
        sanitize(file_name)
    )
}

fn sanitize(segment: &str) -> String {
    segment.replace(['/', '\\'], "_")
}
