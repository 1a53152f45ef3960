//! SecureVault Core - Vault Items and Metadata Index

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::{VaultError, VaultResult};

/// 128-bit opaque item identifier, generated at import.
///
/// Rendered everywhere (object names, serialization) as 32 lowercase hex
/// characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId([u8; 16]);

impl ItemId {
    /// Generate a fresh random id
    pub fn generate() -> Self {
        Self(*Uuid::new_v4().as_bytes())
    }

    /// The logical object-store name of this item's envelope
    pub fn object_name(&self) -> String {
        format!("file/{self}")
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Uuid::from_bytes(self.0).simple())
    }
}

impl fmt::Debug for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemId({self})")
    }
}

impl FromStr for ItemId {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 || !s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
            return Err(VaultError::ConstraintViolated(format!(
                "malformed item id: {s:?}"
            )));
        }
        let uuid = Uuid::try_parse(s)
            .map_err(|_| VaultError::ConstraintViolated(format!("malformed item id: {s:?}")))?;
        Ok(Self(*uuid.as_bytes()))
    }
}

impl Serialize for ItemId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ItemId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One deposited file, as recorded in the metadata index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultItem {
    /// Unique id within the vault
    pub id: ItemId,
    /// Original filename (may be attacker-chosen; display-only)
    pub original_name: String,
    /// Advisory MIME label
    pub mime_type: String,
    /// Plaintext byte count
    pub size: u64,
    /// Import timestamp (informational)
    pub imported_at: DateTime<Utc>,
}

/// Per-identity ordered list of vault items, newest first.
///
/// Persisted as a single sealed envelope under `meta/real` or
/// `meta/decoy`; the plaintext is canonical JSON.
#[derive(Debug, Clone, Default)]
pub struct MetadataIndex {
    items: Vec<VaultItem>,
}

impl MetadataIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Prepend a freshly imported item
    pub fn prepend(&mut self, item: VaultItem) {
        self.items.insert(0, item);
    }

    /// Remove an item, returning its position and the item if present
    pub fn remove(&mut self, id: ItemId) -> Option<(usize, VaultItem)> {
        let pos = self.items.iter().position(|i| i.id == id)?;
        Some((pos, self.items.remove(pos)))
    }

    /// Reinsert an item at a position (rollback path for a failed
    /// metadata write)
    pub fn insert_at(&mut self, pos: usize, item: VaultItem) {
        self.items.insert(pos.min(self.items.len()), item);
    }

    pub fn get(&self, id: ItemId) -> Option<&VaultItem> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Cheap immutable copy for callers; order preserved
    pub fn snapshot(&self) -> Vec<VaultItem> {
        self.items.clone()
    }

    pub fn ids(&self) -> Vec<ItemId> {
        self.items.iter().map(|i| i.id).collect()
    }

    /// Canonical plaintext for the metadata envelope
    pub fn encode(&self) -> VaultResult<Vec<u8>> {
        serde_json::to_vec(&self.items).map_err(|_| VaultError::Crypto)
    }

    /// Decode a metadata plaintext, enforcing the configured size bound
    /// before any parsing touches it.
    pub fn decode(plaintext: &[u8], max_bytes: usize) -> VaultResult<Self> {
        if plaintext.len() > max_bytes {
            return Err(VaultError::ConstraintViolated(format!(
                "metadata index of {} bytes exceeds the {} byte bound",
                plaintext.len(),
                max_bytes
            )));
        }
        let items: Vec<VaultItem> =
            serde_json::from_slice(plaintext).map_err(|_| VaultError::Crypto)?;
        Ok(Self { items })
    }
}

/// Sniff a MIME label from leading magic bytes.
///
/// Used when the caller imports without a label. Advisory only.
pub fn detect_mime(data: &[u8]) -> &'static str {
    if data.len() < 8 {
        return "application/octet-stream";
    }

    match &data[0..8] {
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A] => "image/png",
        [0x47, 0x49, 0x46, 0x38, ..] => "image/gif",
        [0x52, 0x49, 0x46, 0x46, ..] if data.len() > 12 && &data[8..12] == b"WEBP" => "image/webp",
        [0x25, 0x50, 0x44, 0x46, ..] => "application/pdf",
        _ => {
            if data.len() > 12 && &data[4..8] == b"ftyp" {
                if &data[8..12] == b"heic" || &data[8..12] == b"heix" {
                    return "image/heic";
                }
                if &data[8..12] == b"mif1" {
                    return "image/heif";
                }
                if &data[8..12] == b"mp42" || &data[8..12] == b"isom" {
                    return "video/mp4";
                }
            }
            "application/octet-stream"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str) -> VaultItem {
        VaultItem {
            id: ItemId::generate(),
            original_name: name.to_string(),
            mime_type: "text/plain".to_string(),
            size: 5,
            imported_at: Utc::now(),
        }
    }

    #[test]
    fn id_renders_as_32_lower_hex() {
        let id = ItemId::generate();
        let hex = id.to_string();
        assert_eq!(hex.len(), 32);
        assert!(hex.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
        assert_eq!(id.object_name(), format!("file/{hex}"));
        assert_eq!(hex.parse::<ItemId>().unwrap(), id);
    }

    #[test]
    fn malformed_ids_rejected() {
        for bad in ["", "short", "ZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZ", "ABCDEF00112233445566778899AABBCC"] {
            assert!(bad.parse::<ItemId>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn order_survives_encode_decode() {
        let mut index = MetadataIndex::empty();
        index.prepend(item("first.txt"));
        index.prepend(item("second.txt"));
        index.prepend(item("third.txt"));

        let names: Vec<_> = index.snapshot().iter().map(|i| i.original_name.clone()).collect();
        assert_eq!(names, ["third.txt", "second.txt", "first.txt"]);

        let decoded = MetadataIndex::decode(&index.encode().unwrap(), 1 << 20).unwrap();
        let decoded_names: Vec<_> = decoded
            .snapshot()
            .iter()
            .map(|i| i.original_name.clone())
            .collect();
        assert_eq!(decoded_names, names);
    }

    #[test]
    fn remove_by_id() {
        let mut index = MetadataIndex::empty();
        let keep = item("keep.txt");
        let drop = item("drop.txt");
        let drop_id = drop.id;
        index.prepend(keep);
        index.prepend(drop);

        let (pos, removed) = index.remove(drop_id).unwrap();
        assert_eq!(pos, 0);
        assert_eq!(removed.original_name, "drop.txt");
        assert!(index.remove(drop_id).is_none());
        assert_eq!(index.len(), 1);
        assert!(!index.contains(drop_id));

        index.insert_at(pos, removed);
        assert!(index.contains(drop_id));
        assert_eq!(index.snapshot()[0].original_name, "drop.txt");
    }

    #[test]
    fn oversized_plaintext_rejected_before_parse() {
        let blob = vec![b'x'; 64];
        assert!(matches!(
            MetadataIndex::decode(&blob, 32),
            Err(VaultError::ConstraintViolated(_))
        ));
    }

    #[test]
    fn garbage_plaintext_is_crypto_error() {
        assert!(matches!(
            MetadataIndex::decode(b"not json", 1 << 20),
            Err(VaultError::Crypto)
        ));
    }

    #[test]
    fn mime_sniffing() {
        assert_eq!(detect_mime(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0, 0, 0]), "image/jpeg");
        assert_eq!(
            detect_mime(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]),
            "image/png"
        );
        assert_eq!(detect_mime(b"hello"), "application/octet-stream");
        assert_eq!(detect_mime(b""), "application/octet-stream");
    }
}
