//! Reference texts races are typed against

use rand::Rng;

pub const PASSAGES: &[&str] = &[
    "The quick brown fox jumps over the lazy dog.",
    "All happy families are alike; each unhappy family is unhappy in its own way.",
    "It was the best of times, it was the worst of times, it was the age of wisdom.",
    "The only way to do great work is to love what you do. If you haven't found it yet, keep looking.",
    "Programming is not about typing, it's about thinking. The keyboard is just the interface.",
    "Rust empowers everyone to build reliable and efficient software.",
    "Lorem ipsum dolor sit amet, consectetur adipiscing elit. Sed do eiusmod tempor incididunt ut labore et dolore magna aliqua.",
];

/// Pick a random passage for a new race
pub fn random_passage() -> &'static str {
    let mut rng = rand::rng();
    PASSAGES[rng.random_range(0..PASSAGES.len())]
}
