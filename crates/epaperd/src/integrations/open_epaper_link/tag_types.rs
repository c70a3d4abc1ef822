//! Hardware type codes reported by OpenEPaperLink tags.

/// Known hardware types and their display names.
const HW_TYPES: &[(u8, &str)] = &[
    (0x00, "M2 1.54\""),
    (0x01, "M2 2.9\""),
    (0x02, "M2 4.2\""),
    (0x05, "M2 7.4\""),
    (0x11, "M2 2.9\" (NFC)"),
    (0x12, "M2 4.2\" (NFC)"),
    (0x26, "M2 7.4\" (outdated)"),
    (0x2E, "M2 1.6\" (200px)"),
    (0x33, "M3 1.54\""),
    (0x34, "M3 2.9\""),
    (0x35, "M3 4.2\""),
    (0xB0, "Solum 2.9\" BW"),
    (0xE0, "Chroma 29\""),
    (0xF0, "Segmented Tag"),
];

/// Model name for a hardware type code.
///
/// Unknown codes still produce a stable, readable model string.
pub fn hw_string(hw_type: u8) -> String {
    match HW_TYPES.iter().find(|(code, _)| *code == hw_type) {
        Some((_, name)) => (*name).to_string(),
        None => format!("Unknown (0x{:02X})", hw_type),
    }
}
