use crate::PoolState;

/// 32-bit DJB2-style digest of the pool, folding each entity's id bytes,
/// minimized bit, and origin tab id in sequence order.
///
/// This is the readback checksum the store compares after every write:
/// it is sensitive to membership, ordering, minimized flips, and origin
/// re-assignment, while staying cheap enough to run on every attempt.
pub fn checksum(state: &PoolState) -> u32 {
    let mut hash: u32 = 5381;

    let mut fold = |byte: u8| {
        hash = hash.wrapping_mul(33).wrapping_add(byte as u32);
    };

    for quick_tab in &state.all_quick_tabs {
        for byte in quick_tab.id.as_str().bytes() {
            fold(byte);
        }
        fold(quick_tab.minimized as u8);
        for byte in quick_tab.origin_tab_id.to_le_bytes() {
            fold(byte);
        }
    }
    hash
}
