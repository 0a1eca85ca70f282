use colored::Color;

pub const PRIMARY: Color = Color::BrightGreen;
pub const ACCENT: Color = Color::BrightCyan;
pub const SEPARATOR: Color = Color::BrightBlack;
pub const TEXT_DEFAULT: Color = Color::White;

pub const STATUS_OK: Color = Color::Green;
pub const STATUS_SKIPPED: Color = Color::Yellow;
pub const STATUS_FAILED: Color = Color::Red;

pub const SUBNET: Color = Color::TrueColor {
    r: 120,
    g: 190,
    b: 255,
};
pub const PORTS: Color = Color::TrueColor {
    r: 255,
    g: 200,
    b: 90,
};
