//! Perceptual hashes (pHash, dHash) and Hamming-distance helpers.
//!
//! These fingerprints are a near-duplicate signal only. Storage addressing
//! uses the exact SHA-256 of the standardized bytes.

use image::imageops::FilterType;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

const PHASH_SIZE: usize = 32;
const PHASH_LOW: usize = 8;

/// Both 64-bit perceptual fingerprints of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerceptualHashes {
    pub phash: u64,
    pub dhash: u64,
}

pub fn compute_hashes(img: &DynamicImage) -> PerceptualHashes {
    PerceptualHashes {
        phash: phash(img),
        dhash: dhash(img),
    }
}

/// DCT-based hash: 32×32 grayscale, low 8×8 frequencies vs. their median.
pub fn phash(img: &DynamicImage) -> u64 {
    let small = img
        .resize_exact(PHASH_SIZE as u32, PHASH_SIZE as u32, FilterType::Triangle)
        .to_luma8();
    let pixels: Vec<f64> = small.pixels().map(|p| f64::from(p[0])).collect();
    let dct = dct_2d(&pixels, PHASH_SIZE);

    let mut low = Vec::with_capacity(PHASH_LOW * PHASH_LOW);
    for y in 0..PHASH_LOW {
        for x in 0..PHASH_LOW {
            low.push(dct[y * PHASH_SIZE + x]);
        }
    }

    // DC term excluded from the median; it only encodes mean brightness.
    let mut ac: Vec<f64> = low[1..].to_vec();
    ac.sort_by(|a, b| a.total_cmp(b));
    let median = ac[ac.len() / 2];

    low.iter()
        .enumerate()
        .filter(|(_, c)| **c > median)
        .fold(0u64, |hash, (i, _)| hash | (1u64 << (63 - i)))
}

/// Gradient hash: 9×8 grayscale, one bit per left>right comparison.
pub fn dhash(img: &DynamicImage) -> u64 {
    let small = img.resize_exact(9, 8, FilterType::Triangle).to_luma8();
    let mut hash = 0u64;
    let mut bit = 63i32;
    for y in 0..8 {
        for x in 0..8 {
            if small.get_pixel(x, y)[0] > small.get_pixel(x + 1, y)[0] {
                hash |= 1u64 << bit;
            }
            bit -= 1;
        }
    }
    hash
}

pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// 16 lowercase hex characters.
pub fn format_hash(hash: u64) -> String {
    format!("{hash:016x}")
}

pub fn parse_hash(s: &str) -> Option<u64> {
    u64::from_str_radix(s, 16).ok()
}

// Separable 2-D DCT-II over an n×n row-major matrix.
fn dct_2d(input: &[f64], n: usize) -> Vec<f64> {
    let table = cosine_table(n);
    let mut rows = vec![0.0; n * n];
    for y in 0..n {
        dct_1d(&input[y * n..(y + 1) * n], &mut rows[y * n..(y + 1) * n], &table, n);
    }

    let mut out = vec![0.0; n * n];
    let mut column = vec![0.0; n];
    let mut transformed = vec![0.0; n];
    for x in 0..n {
        for y in 0..n {
            column[y] = rows[y * n + x];
        }
        dct_1d(&column, &mut transformed, &table, n);
        for y in 0..n {
            out[y * n + x] = transformed[y];
        }
    }
    out
}

fn cosine_table(n: usize) -> Vec<f64> {
    let mut table = vec![0.0; n * n];
    for k in 0..n {
        for i in 0..n {
            table[k * n + i] =
                (std::f64::consts::PI / n as f64 * (i as f64 + 0.5) * k as f64).cos();
        }
    }
    table
}

fn dct_1d(input: &[f64], output: &mut [f64], table: &[f64], n: usize) {
    for k in 0..n {
        output[k] = (0..n).map(|i| input[i] * table[k * n + i]).sum();
    }
}

/// A pair of distinct stored images that look alike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearDuplicate {
    pub first: String,
    pub second: String,
    pub phash_distance: u32,
    pub dhash_distance: u32,
}

/// Fingerprint of a stored image for near-duplicate scanning.
#[derive(Debug, Clone)]
pub struct Fingerprint {
    pub id: String,
    pub content_hash: String,
    pub phash: u64,
    pub dhash: u64,
}

/// All pairs with distinct content whose pHash distance is within `threshold`.
///
/// Advisory only: callers surface these for review and never merge them.
pub fn find_near_duplicates(prints: &[Fingerprint], threshold: u32) -> Vec<NearDuplicate> {
    let mut pairs = Vec::new();
    for (i, a) in prints.iter().enumerate() {
        for b in &prints[i + 1..] {
            if a.content_hash == b.content_hash {
                continue;
            }
            let phash_distance = hamming_distance(a.phash, b.phash);
            if phash_distance <= threshold {
                pairs.push(NearDuplicate {
                    first: a.id.clone(),
                    second: b.id.clone(),
                    phash_distance,
                    dhash_distance: hamming_distance(a.dhash, b.dhash),
                });
            }
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn gradient(w: u32, h: u32, flip: bool) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| {
            let v = ((x * 255) / w.max(1)) as u8;
            let v = if flip { 255 - v } else { v };
            Rgb([v, ((y * 255) / h.max(1)) as u8, 128])
        }))
    }

    #[test]
    fn test_hashes_deterministic() {
        let img = gradient(200, 150, false);
        assert_eq!(compute_hashes(&img), compute_hashes(&img));
    }

    #[test]
    fn test_resized_copy_is_near() {
        let big = gradient(400, 300, false);
        let small = gradient(200, 150, false);
        assert!(hamming_distance(dhash(&big), dhash(&small)) <= 8);
    }

    #[test]
    fn test_mirrored_gradient_differs() {
        let a = gradient(200, 150, false);
        let b = gradient(200, 150, true);
        assert!(hamming_distance(dhash(&a), dhash(&b)) > 16);
    }

    #[test]
    fn test_format_and_parse() {
        let s = format_hash(0xdead_beef);
        assert_eq!(s, "00000000deadbeef");
        assert_eq!(parse_hash(&s), Some(0xdead_beef));
        assert_eq!(parse_hash("zz"), None);
    }

    #[test]
    fn test_find_near_duplicates_skips_identical_content() {
        let prints = vec![
            Fingerprint { id: "a".into(), content_hash: "x".into(), phash: 0, dhash: 0 },
            Fingerprint { id: "b".into(), content_hash: "x".into(), phash: 0, dhash: 0 },
            Fingerprint { id: "c".into(), content_hash: "y".into(), phash: 0b111, dhash: 0 },
            Fingerprint { id: "d".into(), content_hash: "z".into(), phash: u64::MAX, dhash: 0 },
        ];
        let pairs = find_near_duplicates(&prints, 4);
        assert_eq!(pairs.len(), 2);
        assert!(pairs.iter().all(|p| p.phash_distance == 3));
    }
}
