//! Deterministic content-type embedding
//!
//! Maps a content-type string to two values centred at 0.5. The mapping is a
//! pure function of the string: FNV-1a over the bytes, SplitMix64 to spread
//! the bits, then a Box-Muller transform so the values follow a normal shape
//! with the configured spread.

const CENTER: f64 = 0.5;
const SPREAD: f64 = 0.15;
const SEED: u64 = 0x6d65_7269_6469_616e;

/// Two-dimensional embedding of a content type, each value in [0, 1]
pub fn content_type_embedding(content_type: &str) -> [f64; 2] {
    let h = stable_hash64(SEED, content_type);
    let u1 = unit_open(h);
    let u2 = unit_open(splitmix64(h));

    let radius = (-2.0 * u1.ln()).sqrt();
    let theta = std::f64::consts::TAU * u2;

    [
        (CENTER + SPREAD * radius * theta.cos()).clamp(0.0, 1.0),
        (CENTER + SPREAD * radius * theta.sin()).clamp(0.0, 1.0),
    ]
}

fn stable_hash64(seed: u64, s: &str) -> u64 {
    let mut h: u64 = 14695981039346656037u64;
    for b in s.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(1099511628211u64);
    }
    splitmix64(seed ^ h)
}

#[inline]
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Top 53 bits as a float in the open interval (0, 1)
#[inline]
fn unit_open(bits: u64) -> f64 {
    ((bits >> 11) as f64 + 0.5) / (1u64 << 53) as f64
}
