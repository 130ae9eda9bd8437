//! Fixed session color palette.

pub const PALETTE: [&str; 7] = [
    "#007AFF", "#FF3B30", "#34C759", "#FF9500", "#AF52DE", "#00C7BE", "#FFCC00",
];

/// Color for the session in slot `index`, cycling through [`PALETTE`].
pub fn color_for(index: usize) -> &'static str {
    PALETTE[index % PALETTE.len()]
}
