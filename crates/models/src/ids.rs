use rand::Rng;

/// Host-assigned identifier of a page tab.
pub type TabId = i64;

/// Prefix carried by every quick-tab id.
pub const ID_PREFIX: &str = "qt-";

const SUFFIX_LEN: usize = 9;
const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Stable opaque identifier of a quick tab.
/// Generated ids are `qt-` plus a random base-36 suffix.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct QuickTabId(String);

impl QuickTabId {
    pub fn generate<R: Rng>(rng: &mut R) -> Self {
        let mut id = String::with_capacity(ID_PREFIX.len() + SUFFIX_LEN);
        id.push_str(ID_PREFIX);
        for _ in 0..SUFFIX_LEN {
            id.push(ALPHABET[rng.gen_range(0..ALPHABET.len())] as char);
        }
        Self(id)
    }

    pub fn random() -> Self {
        Self::generate(&mut rand::thread_rng())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id carries the expected prefix and a non-empty suffix.
    /// Ids from legacy stores may be arbitrary strings; they remain usable
    /// but are flagged by validation diagnostics.
    pub fn is_well_formed(&self) -> bool {
        self.0.len() > ID_PREFIX.len() && self.0.starts_with(ID_PREFIX)
    }
}

impl From<String> for QuickTabId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for QuickTabId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for QuickTabId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Debug for QuickTabId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        <Self as std::fmt::Display>::fmt(self, f)
    }
}
