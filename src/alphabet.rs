use phf::phf_map;

/// Number of symbols in the amino-acid alphabet (A..Z minus J).
pub const N_RESIDUES: usize = 25;

/// Set of possible amino-acid symbols, including the ambiguity codes
/// B, O, U, X and Z used by public thermostability tables.
pub const AA_LETTERS: [char; N_RESIDUES] = [
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S', 'T',
    'U', 'V', 'W', 'X', 'Y', 'Z',
];

/// Residue symbol to index into a count profile.
pub static AA_INDEX: phf::Map<char, usize> = phf_map! {
    'A' => 0, 'B' => 1, 'C' => 2, 'D' => 3, 'E' => 4,
    'F' => 5, 'G' => 6, 'H' => 7, 'I' => 8, 'K' => 9,
    'L' => 10, 'M' => 11, 'N' => 12, 'O' => 13, 'P' => 14,
    'Q' => 15, 'R' => 16, 'S' => 17, 'T' => 18, 'U' => 19,
    'V' => 20, 'W' => 21, 'X' => 22, 'Y' => 23, 'Z' => 24,
};

/// Counts how often each residue occurs in `sequence`.
///
/// Symbols outside the alphabet are ignored. The resulting profile is a
/// cheap fingerprint used to pre-filter candidate mutants before the
/// exact character comparison.
pub fn residue_counts(sequence: &str) -> [u32; N_RESIDUES] {
    let mut counts = [0u32; N_RESIDUES];
    for c in sequence.chars() {
        if let Some(&idx) = AA_INDEX.get(&c) {
            counts[idx] += 1;
        }
    }
    counts
}

/// Lower bound on the number of substitutions between two equal-length
/// sequences, estimated from their residue-count profiles.
///
/// Every substitution changes exactly two count entries (one up, one
/// down), so half the L1 distance between profiles never exceeds the
/// true substitution count.
pub fn count_distance(a: &[u32; N_RESIDUES], b: &[u32; N_RESIDUES]) -> u32 {
    let l1: u32 = a
        .iter()
        .zip(b.iter())
        .map(|(&x, &y)| x.abs_diff(y))
        .sum();
    l1 / 2
}
